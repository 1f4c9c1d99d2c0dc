use std::fmt;

use hyper::StatusCode;
use serde_json::json;

use crate::configuration;
use crate::identity::CredentialKind;

pub const AUTHENTICATION_ERROR: &str = "Authentication error";
pub const ACCESS_DENIED: &str = "Access denied";

#[derive(Debug, PartialEq)]
pub enum Error {
    Initialization(String),
    Execution(String),
    // authentication failures, all rendered as the same 401
    InvalidCredential,
    UnsupportedCredentialType(CredentialKind),
    CollaboratorUnavailable(String),
    // authorization failures
    AuthorizationDenied,
    // mappable to classical HTTP responses
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Initialization(err) | Error::Execution(err) => write!(f, "{err}"),
            Error::InvalidCredential => write!(f, "Invalid credential"),
            Error::UnsupportedCredentialType(kind) => {
                write!(f, "No verifier registered for credential type '{kind}'")
            }
            Error::CollaboratorUnavailable(err) => write!(f, "Collaborator unavailable: {err}"),
            Error::AuthorizationDenied => write!(f, "{ACCESS_DENIED}"),
            Error::BadRequest(err) => write!(f, "Bad Request: {err}"),
            Error::NotFound(err) => write!(f, "Not Found: {err}"),
            Error::Internal(err) => write!(f, "Internal Server Error: {err}"),
        }
    }
}

impl From<configuration::Error> for Error {
    fn from(error: configuration::Error) -> Self {
        Error::Initialization(error.to_string())
    }
}

impl Error {
    /// Coarse category used in logs and metrics. Never exposed to clients.
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidCredential => "invalid-credential",
            Error::UnsupportedCredentialType(_) => "unsupported-credential-type",
            Error::CollaboratorUnavailable(_) => "collaborator-unavailable",
            Error::AuthorizationDenied => "authorization-denied",
            Error::BadRequest(_) => "bad-request",
            Error::NotFound(_) => "not-found",
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => "internal",
        }
    }

    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Error::InvalidCredential
                | Error::UnsupportedCredentialType(_)
                | Error::CollaboratorUnavailable(_)
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidCredential
            | Error::UnsupportedCredentialType(_)
            | Error::CollaboratorUnavailable(_) => StatusCode::UNAUTHORIZED,
            Error::AuthorizationDenied => StatusCode::FORBIDDEN,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn as_json(&self, trace_id: Option<&String>) -> serde_json::Value {
        if self.is_authentication_failure() {
            return json!({ "error": AUTHENTICATION_ERROR });
        }

        let message = match self {
            Error::AuthorizationDenied => ACCESS_DENIED.to_string(),
            Error::Initialization(_) | Error::Execution(_) | Error::Internal(_) => {
                "Internal server error".to_string()
            }
            error => error.to_string(),
        };

        if let Some(trace_id) = trace_id {
            json!({ "error": message, "trace_id": trace_id })
        } else {
            json!({ "error": message })
        }
    }
}
