//! Bearer token authentication.
//!
//! A [`TokenVerifier`] turns an `Authorization` header into a caller
//! [`Identity`]. The shipped verifier compares against one configured token
//! in constant time.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid bearer token")]
    InvalidToken,
}

/// Who is calling. Used to authorize writes and to key rate limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous,
    Token(String),
}

impl Identity {
    pub fn rate_limit_key(&self) -> String {
        match self {
            Identity::Anonymous => "anonymous".to_string(),
            Identity::Token(subject) => format!("token:{subject}"),
        }
    }
}

pub trait TokenVerifier: Send + Sync {
    /// Resolve the caller from an `Authorization` header value.
    fn verify(&self, header: Option<&str>) -> Result<Identity, AuthError>;
}

/// Accepts exactly one shared token, or everyone when none is configured.
pub struct StaticTokenVerifier {
    token: Option<String>,
}

impl StaticTokenVerifier {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()),
        }
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, header: Option<&str>) -> Result<Identity, AuthError> {
        let Some(expected) = &self.token else {
            return Ok(Identity::Anonymous);
        };

        let provided = header
            .and_then(extract_bearer_token)
            .ok_or(AuthError::MissingToken)?;

        if validate_token(provided, expected) {
            Ok(Identity::Token(token_subject(provided)))
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

/// Short, non-reversible label of a token for logs and rate-limit keys.
fn token_subject(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(token.as_bytes());
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

/// Constant-time token comparison. Empty tokens never match.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Token of a `Bearer <token>` header value, prefix matched case-insensitively.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let prefix = header.get(..7)?;
    if !prefix.eq_ignore_ascii_case("Bearer ") {
        return None;
    }

    let token = header[7..].trim();
    (!token.is_empty()).then_some(token)
}
