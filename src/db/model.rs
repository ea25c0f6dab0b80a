//! Row models used by repositories.

use crate::model::{EntitySnapshot, Fields};

/// One row of the `orders` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub total: i64,
}

impl OrderRow {
    /// Field view handed to the mutation hook, with the status and customer
    /// columns published under the names the hook reads them by.
    pub fn snapshot(&self, status_field: &str, owner_field: &str) -> EntitySnapshot {
        let mut fields = Fields::new();
        fields.insert(owner_field.into(), self.customer.clone());
        fields.insert(status_field.into(), self.status.clone());
        fields.insert("total".into(), self.total.to_string());
        EntitySnapshot::new(self.id.clone(), fields)
    }
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderChanges {
    pub customer: Option<String>,
    pub status: Option<String>,
    pub total: Option<i64>,
}

impl OrderChanges {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.customer.is_none() && self.status.is_none() && self.total.is_none()
    }
}
