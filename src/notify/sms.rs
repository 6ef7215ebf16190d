use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::SmsConfig;
use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("sms gateway is not configured")]
    NotConfigured,
    #[error("sms gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sms gateway sent an unreadable response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("sms gateway returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("sms gateway rejected message: {0}")]
    Rejected(String),
}

impl From<SmsError> for ApiError {
    fn from(err: SmsError) -> Self {
        match err {
            SmsError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            other => Self::BadGateway(other.to_string()),
        }
    }
}

/// Arkesel v2 SMS client.
pub struct ArkeselClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    sender: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    sender: &'a str,
    message: &'a str,
    recipients: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

impl ArkeselClient {
    pub fn new(config: &SmsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build sms http client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            sender: config.sender_id.clone(),
        })
    }

    /// Send one message to every recipient in a single gateway call.
    #[tracing::instrument(skip(self, recipients, message), fields(recipients = recipients.len()), err)]
    pub async fn send(&self, recipients: &[String], message: &str) -> Result<(), SmsError> {
        if self.api_key.is_empty() {
            return Err(SmsError::NotConfigured);
        }

        let response = self
            .client
            .post(format!("{}/api/v2/sms/send", self.base_url))
            .header("api-key", &self.api_key)
            .json(&SendRequest {
                sender: &self.sender,
                message,
                recipients,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "sms gateway error");
            return Err(SmsError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body: SendResponse = response.json().await.map_err(SmsError::Decode)?;
        if body.status != "success" {
            return Err(SmsError::Rejected(
                body.message.unwrap_or(body.status),
            ));
        }

        tracing::info!("sms accepted by gateway");
        Ok(())
    }
}
