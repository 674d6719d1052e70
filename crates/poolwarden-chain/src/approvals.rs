//! Multisig approval registry client
//!
//! The registry is written by an external governance process; this
//! client only ever asks whether a specific (amount_a, amount_b, day)
//! tuple has been pre-approved. An unreachable registry reads as
//! not-approved upstream, never as approval.

use async_trait::async_trait;
use poolwarden_core::{ApprovalSource, GatewayError};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
struct ApprovalResponse {
    approved: bool,
}

/// HTTP client for the approval registry
pub struct RegistryApprovalSource {
    base_url: String,
    client: Client,
}

impl RegistryApprovalSource {
    pub fn new(base_url: String, request_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { base_url, client }
    }
}

#[async_trait]
impl ApprovalSource for RegistryApprovalSource {
    async fn is_approved(
        &self,
        amount_a: Decimal,
        amount_b: Decimal,
        day: &str,
    ) -> Result<bool, GatewayError> {
        let url = format!(
            "{}/v1/approvals/{}?amount_a={}&amount_b={}",
            self.base_url, day, amount_a, amount_b
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout(e.to_string())
            } else {
                GatewayError::Http(e.to_string())
            }
        })?;

        // The registry answers 404 for tuples it has never seen
        if response.status().as_u16() == 404 {
            return Ok(false);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http(format!("HTTP {}: {}", status, body)));
        }

        let approval: ApprovalResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;

        debug!(
            day = %day,
            amount_a = %amount_a,
            amount_b = %amount_b,
            approved = approval.approved,
            "Approval registry queried"
        );

        Ok(approval.approved)
    }
}
