use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DeliveryError, PushProvider};
use crate::model::Receipt;

/// reqwest-backed push provider speaking an FCM-v1-shaped message API.
#[derive(Clone)]
pub struct HttpPushProvider {
    http: Client,
    endpoint: Url,
    api_key: String,
}

impl fmt::Debug for HttpPushProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPushProvider")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpPushProvider {
    pub fn new(endpoint: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("invalid push endpoint URL")?;
        let http = Client::builder()
            .user_agent("order-notify/0.1")
            .timeout(timeout)
            .no_proxy()
            .build()
            .context("failed to build push http client")?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    pub fn build_request(&self, body: &Value) -> Result<reqwest::Request> {
        self.http
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .build()
            .context("failed to build push request")
    }
}

pub fn build_message(
    token: &str,
    title: &str,
    body: &str,
    metadata: &HashMap<String, String>,
) -> Value {
    json!({
        "message": {
            "token": token,
            "notification": {
                "title": title,
                "body": body,
            },
            "data": metadata,
        }
    })
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    name: Option<String>,
}

#[async_trait]
impl PushProvider for HttpPushProvider {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Receipt, DeliveryError> {
        let payload = build_message(token, title, body, metadata);
        let request = self
            .build_request(&payload)
            .map_err(|err| DeliveryError::Unreachable(format!("{err:#}")))?;
        debug!(url = %request.url(), "sending push request");

        let res = self
            .http
            .execute(request)
            .await
            .map_err(|err| DeliveryError::Unreachable(err.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let message = res.text().await.unwrap_or_default();
            warn!(%status, "push provider refused message");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        // The provider accepted the message; a body without a message name
        // still counts as delivered, under a locally generated receipt id.
        let text = res.text().await.unwrap_or_default();
        let name = serde_json::from_str::<SendResponse>(&text)
            .ok()
            .and_then(|r| r.name)
            .filter(|n| !n.trim().is_empty());
        match name {
            Some(name) => Ok(Receipt::new(name)),
            None => {
                let id = format!("local-{}", Uuid::new_v4());
                warn!(%status, receipt = %id, "provider response carried no message name");
                Ok(Receipt::new(id))
            }
        }
    }
}
