// Thread-safe store of secret values that are replaced in log output.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use std::sync::Arc;

/// Replacement text used when a secret is found.
const MASK: &str = "***";

/// Replaces registered secret values in arbitrary strings with `***`.
///
/// Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct SecretMasker {
    inner: Arc<RwLock<Vec<String>>>,
}

impl SecretMasker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a secret value. Empty or whitespace-only values are ignored.
    pub fn add_value(&self, secret: &str) {
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return;
        }

        let mut secrets = self.inner.write();
        if !secrets.iter().any(|s| s == trimmed) {
            secrets.push(trimmed.to_string());
            // Longest first so a secret containing another is masked whole.
            secrets.sort_by(|a, b| b.len().cmp(&a.len()));
        }
    }

    /// Register a git token along with the basic-auth header value derived
    /// from it, which is what git prints when tracing HTTP.
    pub fn add_token(&self, token: &str) {
        if token.trim().is_empty() {
            return;
        }
        self.add_value(token);
        self.add_value(&basic_auth_value(token));
    }

    pub fn mask_secrets(&self, input: &str) -> String {
        let secrets = self.inner.read();
        let mut result = input.to_string();
        for secret in secrets.iter() {
            if result.contains(secret.as_str()) {
                result = result.replace(secret.as_str(), MASK);
            }
        }
        result
    }

    pub fn secret_count(&self) -> usize {
        self.inner.read().len()
    }
}

/// Base64 of `x-access-token:<token>`.
pub fn basic_auth_value(token: &str) -> String {
    STANDARD.encode(format!("x-access-token:{}", token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_single_secret() {
        let masker = SecretMasker::new();
        masker.add_value("password123");
        assert_eq!(masker.mask_secrets("my password123 is here"), "my *** is here");
    }

    #[test]
    fn test_mask_overlapping_secrets() {
        let masker = SecretMasker::new();
        masker.add_value("pass");
        masker.add_value("password");
        assert_eq!(masker.mask_secrets("my password is here"), "my *** is here");
    }

    #[test]
    fn test_empty_secret_ignored() {
        let masker = SecretMasker::new();
        masker.add_value("");
        masker.add_value("   ");
        masker.add_token("");
        assert_eq!(masker.secret_count(), 0);
    }

    #[test]
    fn test_token_registers_header_form() {
        let masker = SecretMasker::new();
        masker.add_token("ghs_abc");
        let header = format!("AUTHORIZATION: basic {}", basic_auth_value("ghs_abc"));
        assert_eq!(masker.mask_secrets(&header), "AUTHORIZATION: basic ***");
        assert_eq!(masker.secret_count(), 2);
    }

    #[test]
    fn test_clones_share_store() {
        let masker = SecretMasker::new();
        let other = masker.clone();
        other.add_value("shared");
        assert_eq!(masker.mask_secrets("a shared b"), "a *** b");
    }
}
