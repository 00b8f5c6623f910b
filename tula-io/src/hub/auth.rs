//! Credential check at the hub boundary.
//!
//! The hub only asks a [`CredentialVerifier`] for a verdict; where
//! credentials come from is up to the caller.

use crate::error::AuthError;

/// Decides whether a client may join the hub
pub trait CredentialVerifier: Send + Sync + 'static {
    fn verify(&self, client_name: &str, credential: Option<&str>) -> Result<(), AuthError>;
}

/// Accepts every client
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAccess;

impl CredentialVerifier for OpenAccess {
    fn verify(&self, _client_name: &str, _credential: Option<&str>) -> Result<(), AuthError> {
        Ok(())
    }
}

/// One shared password for every client
#[derive(Clone)]
pub struct PasswordVerifier {
    password: String,
}

impl PasswordVerifier {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PasswordVerifier { .. }")
    }
}

impl CredentialVerifier for PasswordVerifier {
    fn verify(&self, client_name: &str, credential: Option<&str>) -> Result<(), AuthError> {
        let Some(given) = credential else {
            return Err(AuthError::Rejected {
                reason: "password required".to_string(),
            });
        };
        if constant_time_eq(given.as_bytes(), self.password.as_bytes()) {
            Ok(())
        } else {
            log::warn!("Wrong password from client '{}'", client_name);
            Err(AuthError::Rejected {
                reason: "wrong password".to_string(),
            })
        }
    }
}

/// Comparison whose running time does not depend on where the inputs differ
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
