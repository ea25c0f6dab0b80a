use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::push::DeliveryError;

/// Field map of a record, keyed by field name.
pub type Fields = BTreeMap<String, String>;

/// Immutable view of a record at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: String,
    pub fields: Fields,
}

impl EntitySnapshot {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// One write against a monitored record, as delivered by the storage layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    pub entity_id: String,
    /// Used only when the current fields do not carry the owner field.
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub original_fields: Fields,
    pub current_fields: Fields,
}

impl MutationEvent {
    pub fn original(&self) -> EntitySnapshot {
        EntitySnapshot::new(self.entity_id.clone(), self.original_fields.clone())
    }

    pub fn current(&self) -> EntitySnapshot {
        EntitySnapshot::new(self.entity_id.clone(), self.current_fields.clone())
    }
}

/// A status change on one record. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub entity_id: String,
    pub from: String,
    pub to: String,
}

/// Statuses that produce a notification when an order arrives at them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotifiableStatus {
    Cooking,
    OutForDelivery,
    Completed,
    Cancelled,
}

impl NotifiableStatus {
    pub const ALL: [NotifiableStatus; 4] = [
        NotifiableStatus::Cooking,
        NotifiableStatus::OutForDelivery,
        NotifiableStatus::Completed,
        NotifiableStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotifiableStatus::Cooking => "cooking",
            NotifiableStatus::OutForDelivery => "out_for_delivery",
            NotifiableStatus::Completed => "completed",
            NotifiableStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "cooking" => Some(NotifiableStatus::Cooking),
            "out_for_delivery" => Some(NotifiableStatus::OutForDelivery),
            "completed" => Some(NotifiableStatus::Completed),
            "cancelled" => Some(NotifiableStatus::Cancelled),
            _ => None,
        }
    }
}

/// Composed push message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationSpec {
    pub title: String,
    pub body: String,
    pub metadata: HashMap<String, String>,
}

/// Resolved delivery target for one owner.
#[derive(Clone, PartialEq, Eq)]
pub struct Destination {
    pub owner_id: String,
    pub token: String,
}

impl Destination {
    /// Token prefix safe to put in logs: at most 6 chars and never more
    /// than half of the token.
    pub fn redacted_token(&self) -> String {
        let keep = (self.token.chars().count() / 2).min(6);
        let prefix: String = self.token.chars().take(keep).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("owner_id", &self.owner_id)
            .field("token", &self.redacted_token())
            .finish()
    }
}

/// Provider acknowledgement of an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub id: String,
    pub accepted_at: DateTime<Utc>,
}

impl Receipt {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            accepted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoTransition,
    StatusNotNotifiable,
    NoOwner,
    NoDestination,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoTransition => "no_transition",
            SkipReason::StatusNotNotifiable => "status_not_notifiable",
            SkipReason::NoOwner => "no_owner",
            SkipReason::NoDestination => "no_destination",
        }
    }
}

/// Why a dispatch failed after passing every skip check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchFailure {
    /// Token store could not be read.
    Resolver(String),
    Delivery(DeliveryError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(SkipReason),
    Delivered(Receipt),
    Failed(DispatchFailure),
}

impl DispatchOutcome {
    /// Stable label used in the outcome log line.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchOutcome::Skipped(reason) => reason.as_str(),
            DispatchOutcome::Delivered(_) => "delivered",
            DispatchOutcome::Failed(DispatchFailure::Resolver(_)) => "resolver_error",
            DispatchOutcome::Failed(DispatchFailure::Delivery(err)) => err.kind(),
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered(_))
    }
}
