//! HTTP readiness check.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use crate::port::outbound::readiness::ReadinessCheck;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpReadiness {
    client: Client,
}

impl HttpReadiness {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> crate::error::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessCheck for HttpReadiness {
    async fn check(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                trace!(url, error = %e, "Readiness attempt failed");
                false
            }
        }
    }
}
