// SPDX-FileCopyrightText: 2026 Botfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the PIX gateway.

use std::time::Duration;

use botfleet_core::FleetError;
use serde::Deserialize;
use tracing::{debug, info};

/// Minimum charge accepted by the gateway.
pub const MIN_AMOUNT_CENTS: i64 = 50;

/// A freshly created charge.
#[derive(Debug, Clone)]
pub struct CreatedCharge {
    /// Gateway-side transaction id.
    pub external_id: String,
    /// Copy-and-paste PIX code.
    pub qr_code: String,
}

/// Gateway-reported transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayStatus {
    Created,
    Paid,
    Expired,
    Unknown,
}

impl GatewayStatus {
    fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "created" | "pending" => GatewayStatus::Created,
            "paid" | "approved" => GatewayStatus::Paid,
            "expired" | "canceled" | "cancelled" => GatewayStatus::Expired,
            _ => GatewayStatus::Unknown,
        }
    }
}

#[derive(Deserialize)]
struct CreateResponse {
    id: String,
    qr_code: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
}

/// PIX gateway client bound to one base URL; the bearer token is
/// per-call because each admin (and the top-up flow) has its own.
#[derive(Debug, Clone)]
pub struct PixGateway {
    client: reqwest::Client,
    base_url: String,
}

impl PixGateway {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, FleetError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| FleetError::Config(format!("failed to build gateway http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a charge. Amounts below [`MIN_AMOUNT_CENTS`] are refused
    /// locally with a validation error.
    pub async fn create_charge(
        &self,
        token: &str,
        amount_cents: i64,
        webhook_url: Option<&str>,
    ) -> Result<CreatedCharge, FleetError> {
        if amount_cents < MIN_AMOUNT_CENTS {
            return Err(FleetError::Validation(format!(
                "minimum charge is {MIN_AMOUNT_CENTS} cents"
            )));
        }

        let mut payload = serde_json::json!({ "value": amount_cents });
        if let Some(url) = webhook_url {
            payload["webhook_url"] = serde_json::Value::String(url.to_string());
        }

        let response = self
            .client
            .post(format!("{}/api/pix/cashIn", self.base_url))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| transport_error(e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(http_error("create charge", status.as_u16(), &body));
        }

        let parsed: CreateResponse =
            serde_json::from_str(&body).map_err(|e| FleetError::PermanentExternal {
                service: "gateway",
                message: format!("malformed create response: {e}"),
            })?;

        info!(external_id = %parsed.id, amount_cents, "pix charge created");
        Ok(CreatedCharge {
            external_id: parsed.id,
            qr_code: parsed.qr_code,
        })
    }

    /// Polls one transaction's status.
    pub async fn charge_status(
        &self,
        token: &str,
        external_id: &str,
    ) -> Result<GatewayStatus, FleetError> {
        let response = self
            .client
            .get(format!("{}/api/transactions/{external_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error(e))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(http_error("charge status", status.as_u16(), &body));
        }

        let parsed: StatusResponse =
            serde_json::from_str(&body).map_err(|e| FleetError::PermanentExternal {
                service: "gateway",
                message: format!("malformed status response: {e}"),
            })?;
        let parsed_status = GatewayStatus::parse(&parsed.status);
        debug!(external_id, status = ?parsed_status, "charge status polled");
        Ok(parsed_status)
    }
}

fn transport_error(e: reqwest::Error) -> FleetError {
    if e.is_timeout() {
        FleetError::Timeout {
            duration: Duration::from_secs(0),
        }
    } else {
        FleetError::TransientExternal {
            service: "gateway",
            message: format!("http request failed: {e}"),
        }
    }
}

fn http_error(op: &str, status: u16, body: &str) -> FleetError {
    let message = format!("{op}: status {status}: {body}");
    if status == 429 || status >= 500 {
        FleetError::TransientExternal {
            service: "gateway",
            message,
        }
    } else {
        FleetError::PermanentExternal {
            service: "gateway",
            message,
        }
    }
}
