use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE, WWW_AUTHENTICATE};
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::command::server::error::Error;

pub type ResponseBody = Full<Bytes>;

const BASIC_CHALLENGE: &str = r#"Basic realm="Simple Guard", charset="UTF-8""#;

fn with_json_body(status: StatusCode, body: Bytes) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn json_response<T: Serialize + ?Sized>(
    status: StatusCode,
    body: &T,
) -> Result<Response<ResponseBody>, Error> {
    let body = serde_json::to_vec(body)
        .map_err(|error| Error::Internal(format!("Failed to serialize response: {error}")))?;

    Ok(with_json_body(status, Bytes::from(body)))
}

pub fn error_to_response(error: &Error, trace_id: Option<&String>) -> Response<ResponseBody> {
    let body = error.as_json(trace_id).to_string();
    with_json_body(error.status_code(), Bytes::from(body))
}

/// The uniform 401 answer. `challenge` adds a Basic `WWW-Authenticate`
/// header so browsers and CLI clients know to prompt.
pub fn authentication_failure(challenge: bool) -> Response<ResponseBody> {
    let mut response = error_to_response(&Error::InvalidCredential, None);
    if challenge {
        response
            .headers_mut()
            .insert(WWW_AUTHENTICATE, HeaderValue::from_static(BASIC_CHALLENGE));
    }
    response
}

pub fn access_denied() -> Response<ResponseBody> {
    error_to_response(&Error::AuthorizationDenied, None)
}
