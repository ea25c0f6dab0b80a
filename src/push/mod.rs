use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::model::{Destination, NotificationSpec, Receipt};

pub mod http;

pub use http::HttpPushProvider;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("push provider client is not available")]
    Unavailable,
    #[error("push provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("push provider unreachable: {0}")]
    Unreachable(String),
}

impl DeliveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Unavailable => "delivery_unavailable",
            DeliveryError::Rejected { .. } => "delivery_rejected",
            DeliveryError::Unreachable(_) => "delivery_unreachable",
        }
    }
}

/// Capability to hand one message to the external push service.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(
        &self,
        token: &str,
        title: &str,
        body: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Receipt, DeliveryError>;
}

/// Adapts a composed notification to exactly one provider call.
///
/// The provider handle is injected at startup and only read afterwards. A
/// gateway built without one reports every delivery as `Unavailable`.
#[derive(Clone)]
pub struct DeliveryGateway {
    provider: Option<Arc<dyn PushProvider>>,
    timeout: Duration,
}

impl fmt::Debug for DeliveryGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryGateway")
            .field("provider", &self.provider.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DeliveryGateway {
    pub fn new(provider: Arc<dyn PushProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            provider: None,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    #[instrument(skip_all, fields(owner_id = %destination.owner_id))]
    pub async fn deliver(
        &self,
        destination: &Destination,
        spec: &NotificationSpec,
    ) -> Result<Receipt, DeliveryError> {
        let provider = self.provider.as_ref().ok_or(DeliveryError::Unavailable)?;
        debug!(token = %destination.redacted_token(), title = %spec.title, "sending push");
        let call = provider.send(&destination.token, &spec.title, &spec.body, &spec.metadata);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(res) => res,
            Err(_) => Err(DeliveryError::Unreachable(format!(
                "no response within {}ms",
                self.timeout.as_millis()
            ))),
        }
    }
}
