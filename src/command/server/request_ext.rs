use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use hyper::header::{AsHeaderName, AUTHORIZATION};
use hyper::HeaderMap;

static BASIC_SCHEME: &str = "Basic";

pub trait HeaderExt {
    fn get_header<K: AsHeaderName>(&self, header: K) -> Option<String>;
    fn basic_auth(&self) -> Option<(String, String)>;
}

impl HeaderExt for HeaderMap {
    fn get_header<K>(&self, header: K) -> Option<String>
    where
        K: AsHeaderName,
    {
        self.get(header)
            .and_then(|header| header.to_str().ok())
            .map(ToString::to_string)
    }

    fn basic_auth(&self) -> Option<(String, String)> {
        let authorization = self.get_header(AUTHORIZATION)?;

        // auth schemes are case-insensitive
        let (scheme, value) = authorization.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case(BASIC_SCHEME) {
            return None;
        }

        let value = BASE64_STANDARD.decode(value.trim()).ok()?;
        let value = String::from_utf8(value).ok()?;

        let (username, password) = value.split_once(':')?;
        Some((username.to_string(), password.to_string()))
    }
}
