use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::MomoConfig;
use crate::error::ApiError;
use crate::store::valkey;

/// Tokens are cached per API user: `momo:token:<api_user>`.
const TOKEN_CACHE_PREFIX: &str = "momo:token";

/// Seconds shaved off the token lifetime before caching.
const TOKEN_EXPIRY_MARGIN: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum MomoError {
    #[error("momo collection is not configured")]
    NotConfigured,
    #[error("momo unreachable: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("momo sent an unreadable response: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("momo returned {status}: {body}")]
    Http { status: u16, body: String },
    #[error("momo transaction {0} not found")]
    UnknownReference(Uuid),
}

impl From<MomoError> for ApiError {
    fn from(err: MomoError) -> Self {
        match err {
            MomoError::NotConfigured => Self::ServiceUnavailable(err.to_string()),
            MomoError::UnknownReference(_) => Self::NotFound("payment".into()),
            other => Self::BadGateway(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessToken {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: i64,
}

/// A collection request as sent to MoMo.
#[derive(Debug)]
pub struct RequestToPay<'a> {
    pub reference_id: Uuid,
    pub amount: f64,
    pub phone: &'a str,
    pub external_id: &'a str,
    pub payer_message: &'a str,
    pub payee_note: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestToPayBody<'a> {
    amount: String,
    currency: &'a str,
    external_id: &'a str,
    payer: Payer<'a>,
    payer_message: &'a str,
    payee_note: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Payer<'a> {
    party_id_type: &'static str,
    party_id: &'a str,
}

/// Upstream view of a request-to-pay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub status: String,
    #[serde(default)]
    pub financial_transaction_id: Option<String>,
    #[serde(default)]
    reason: Option<serde_json::Value>,
}

impl TransactionStatus {
    /// MoMo sends the reason as a bare code or as `{code, message}`.
    pub fn reason(&self) -> Option<String> {
        match self.reason.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(map) => map
                .get("message")
                .or_else(|| map.get("code"))
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned),
            other => Some(other.to_string()),
        }
    }
}

/// Two decimal places, trailing zeros dropped: `10.5`, `0.3`, `25`.
fn format_amount(amount: f64) -> String {
    let fixed = format!("{amount:.2}");
    fixed.trim_end_matches('0').trim_end_matches('.').to_owned()
}

/// MTN MoMo Collection API client.
pub struct MomoClient {
    client: reqwest::Client,
    config: MomoConfig,
}

impl MomoClient {
    pub fn new(config: &MomoConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build momo http client")?;

        let mut config = config.clone();
        config.base_url = config.base_url.trim_end_matches('/').to_owned();
        Ok(Self { client, config })
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    fn ensure_configured(&self) -> Result<(), MomoError> {
        let c = &self.config;
        if c.subscription_key.is_empty() || c.api_user.is_empty() || c.api_key.is_empty() {
            return Err(MomoError::NotConfigured);
        }
        Ok(())
    }

    pub fn token_cache_key(&self) -> String {
        format!("{TOKEN_CACHE_PREFIX}:{}", self.config.api_user)
    }

    /// Bearer token for the collection product, cached in Valkey.
    async fn access_token(&self, cache: &fred::clients::Pool) -> Result<String, MomoError> {
        let key = self.token_cache_key();
        if let Some(token) = valkey::get_cached::<AccessToken>(cache, &key).await {
            return Ok(token.access_token);
        }

        let response = self
            .client
            .post(format!("{}/collection/token/", self.config.base_url))
            .basic_auth(&self.config.api_user, Some(&self.config.api_key))
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header("Content-Length", "0")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "momo token request rejected");
            return Err(MomoError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let token: AccessToken = response.json().await.map_err(MomoError::Decode)?;
        let ttl = token.expires_in - TOKEN_EXPIRY_MARGIN;
        if ttl > 0
            && let Err(e) = valkey::set_cached(cache, &key, &token, ttl).await
        {
            tracing::warn!(error = %e, "failed to cache momo token");
        }

        Ok(token.access_token)
    }

    /// Drop the cached token after MoMo rejects it.
    async fn forget_token(&self, cache: &fred::clients::Pool) {
        if let Err(e) = valkey::invalidate(cache, &self.token_cache_key()).await {
            tracing::warn!(error = %e, "failed to drop cached momo token");
        }
    }

    /// Ask the payer to approve a debit. MoMo answers 202 on acceptance; the
    /// outcome is only known later via [`Self::request_status`].
    #[tracing::instrument(skip(self, cache, request), fields(reference = %request.reference_id), err)]
    pub async fn request_to_pay(
        &self,
        cache: &fred::clients::Pool,
        request: &RequestToPay<'_>,
    ) -> Result<(), MomoError> {
        self.ensure_configured()?;
        let token = self.access_token(cache).await?;

        let body = RequestToPayBody {
            amount: format_amount(request.amount),
            currency: &self.config.currency,
            external_id: request.external_id,
            payer: Payer {
                party_id_type: "MSISDN",
                party_id: request.phone.trim_start_matches('+'),
            },
            payer_message: request.payer_message,
            payee_note: request.payee_note,
        };

        let mut builder = self
            .client
            .post(format!("{}/collection/v1_0/requesttopay", self.config.base_url))
            .bearer_auth(&token)
            .header("X-Reference-Id", request.reference_id.to_string())
            .header("X-Target-Environment", &self.config.target_environment)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .json(&body);
        if let Some(ref callback) = self.config.callback_url {
            builder = builder.header("X-Callback-Url", callback);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::ACCEPTED {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.forget_token(cache).await;
            }
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "momo request-to-pay rejected");
            return Err(MomoError::Http {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("momo request-to-pay accepted");
        Ok(())
    }

    #[tracing::instrument(skip(self, cache), err)]
    pub async fn request_status(
        &self,
        cache: &fred::clients::Pool,
        reference_id: Uuid,
    ) -> Result<TransactionStatus, MomoError> {
        self.ensure_configured()?;
        let token = self.access_token(cache).await?;

        let response = self
            .client
            .get(format!(
                "{}/collection/v1_0/requesttopay/{reference_id}",
                self.config.base_url
            ))
            .bearer_auth(&token)
            .header("X-Target-Environment", &self.config.target_environment)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response.json().await.map_err(MomoError::Decode);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MomoError::UnknownReference(reference_id));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.forget_token(cache).await;
        }
        let body = response.text().await.unwrap_or_default();
        Err(MomoError::Http {
            status: status.as_u16(),
            body,
        })
    }
}
