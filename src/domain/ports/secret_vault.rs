//! Secret vault port.
//!
//! Webhook endpoint secrets are encrypted at rest by an external vault;
//! the core only sees this interface. The in-tree implementation is a
//! passthrough so that single-process deployments and tests work without
//! a vault.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;

/// Encrypts and decrypts endpoint secrets.
#[async_trait]
pub trait SecretVault: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> CoreResult<String>;

    async fn decrypt(&self, ciphertext: &str) -> CoreResult<String>;

    /// Generate a fresh secret, e.g. for endpoint rotation.
    fn generate(&self) -> String;
}

/// Passthrough vault: stores secrets verbatim.
#[derive(Debug, Clone, Default)]
pub struct PlaintextVault;

#[async_trait]
impl SecretVault for PlaintextVault {
    async fn encrypt(&self, plaintext: &str) -> CoreResult<String> {
        Ok(plaintext.to_string())
    }

    async fn decrypt(&self, ciphertext: &str) -> CoreResult<String> {
        Ok(ciphertext.to_string())
    }

    fn generate(&self) -> String {
        format!("whsec_{}", uuid::Uuid::new_v4().simple())
    }
}
