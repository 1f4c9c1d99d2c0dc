use hyper::header::HeaderName;
use hyper::HeaderMap;

use crate::command::server::request_ext::HeaderExt;
use crate::identity::Credential;

/// Where a credential may be found in a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialSource {
    /// A shared secret carried verbatim in the named header.
    Header(HeaderName),
    /// `Authorization: Basic <base64(username:password)>`.
    Basic,
}

/// Reads at most one credential from request headers, trying sources in order.
///
/// Malformed values are treated as absent; deciding whether anonymous access
/// is acceptable is left to authorization.
#[derive(Clone, Debug, Default)]
pub struct CredentialExtractor {
    sources: Vec<CredentialSource>,
}

impl CredentialExtractor {
    pub fn new(sources: Vec<CredentialSource>) -> Self {
        Self { sources }
    }

    pub fn has_source(&self, source: &CredentialSource) -> bool {
        self.sources.contains(source)
    }

    pub fn extract(&self, headers: &HeaderMap) -> Option<Credential> {
        self.sources.iter().find_map(|source| match source {
            CredentialSource::Header(name) => headers.get_header(name).map(Credential::SharedSecret),
            CredentialSource::Basic => {
                headers
                    .basic_auth()
                    .map(|(username, password)| Credential::UsernamePassword {
                        username,
                        password,
                    })
            }
        })
    }
}
