//! Readiness endpoint check.

use async_trait::async_trait;

#[async_trait]
pub trait ReadinessCheck: Send + Sync {
    /// One attempt against `url`. True on any 2xx response.
    async fn check(&self, url: &str) -> bool;
}
