//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides the bearer header helper the
//! backend client uses.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// `Authorization` header value for a backend token.
pub fn bearer(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}
