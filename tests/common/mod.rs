#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use order_notify::dispatch::DispatchCoordinator;
use order_notify::model::{Fields, Receipt};
use order_notify::push::{DeliveryError, DeliveryGateway, PushProvider};
use order_notify::recipient::{RecipientResolver, TokenStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCall {
    pub token: String,
    pub title: String,
    pub body: String,
    pub metadata: HashMap<String, String>,
}

/// Provider double that records every call and replays queued results.
#[derive(Clone, Default)]
pub struct RecordingProvider {
    responses: Arc<Mutex<VecDeque<Result<Receipt, DeliveryError>>>>,
    calls: Arc<Mutex<Vec<SendCall>>>,
    delay: Option<Duration>,
}

impl RecordingProvider {
    pub fn with_responses(responses: Vec<Result<Receipt, DeliveryError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::from(responses))),
            ..Default::default()
        }
    }

    pub fn failing(err: DeliveryError) -> Self {
        Self::with_responses((0..16).map(|_| Err(err.clone())).collect())
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl PushProvider for RecordingProvider {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Receipt, DeliveryError> {
        self.calls.lock().await.push(SendCall {
            token: token.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            metadata: metadata.clone(),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut guard = self.responses.lock().await;
        let n = self.calls.lock().await.len();
        guard
            .pop_front()
            .unwrap_or_else(|| Ok(Receipt::new(format!("msg-{n}"))))
    }
}

/// Token store double with a lookup log and an optional outage switch.
#[derive(Clone, Default)]
pub struct MemoryTokens {
    tokens: Arc<Mutex<HashMap<String, String>>>,
    lookups: Arc<Mutex<Vec<String>>>,
    offline: bool,
}

impl MemoryTokens {
    pub fn with(pairs: &[(&str, &str)]) -> Self {
        let map = pairs
            .iter()
            .map(|(o, t)| (o.to_string(), t.to_string()))
            .collect();
        Self {
            tokens: Arc::new(Mutex::new(map)),
            ..Default::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    pub async fn lookups(&self) -> Vec<String> {
        self.lookups.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokens {
    async fn lookup_by_owner(&self, owner_id: &str) -> Result<Option<String>> {
        self.lookups.lock().await.push(owner_id.to_string());
        if self.offline {
            return Err(anyhow!("token store offline"));
        }
        Ok(self.tokens.lock().await.get(owner_id).cloned())
    }
}

pub fn coordinator(tokens: &MemoryTokens, provider: &RecordingProvider) -> DispatchCoordinator {
    DispatchCoordinator::new(
        RecipientResolver::new(Arc::new(tokens.clone())),
        DeliveryGateway::new(Arc::new(provider.clone()), Duration::from_secs(2)),
    )
}

pub fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
