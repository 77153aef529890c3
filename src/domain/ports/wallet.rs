//! Wallet data port.
//!
//! Billing lives outside the core; the alert evaluator reads the
//! `budget_usage` metric through this interface.

use async_trait::async_trait;

use crate::domain::errors::CoreResult;

/// Supplies externally computed budget usage per user.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Fraction of the user's budget consumed, in [0, 1].
    async fn budget_usage(&self, user_id: &str) -> CoreResult<f64>;
}

/// Wallet stub reporting zero usage; the default when no billing
/// collaborator is wired in.
#[derive(Debug, Clone, Default)]
pub struct NullWallet;

#[async_trait]
impl WalletProvider for NullWallet {
    async fn budget_usage(&self, _user_id: &str) -> CoreResult<f64> {
        Ok(0.0)
    }
}
