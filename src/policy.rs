//! Status → message table. This is the only place that knows what each
//! order status means to the customer.

use std::collections::HashMap;

use crate::model::{NotifiableStatus, NotificationSpec, Transition};

pub const META_ORDER_ID: &str = "orderId";
pub const META_STATUS: &str = "status";

/// Title and body for an order arriving at `status`.
pub fn template(status: NotifiableStatus) -> (&'static str, &'static str) {
    match status {
        NotifiableStatus::Cooking => (
            "Your order is being prepared",
            "The kitchen has started preparing your order.",
        ),
        NotifiableStatus::OutForDelivery => (
            "Your order is on the way",
            "A courier has picked up your order and is heading to you.",
        ),
        NotifiableStatus::Completed => (
            "Order delivered",
            "Your order has been delivered. Enjoy your meal!",
        ),
        NotifiableStatus::Cancelled => (
            "Order cancelled",
            "Your order has been cancelled. Contact support if this was unexpected.",
        ),
    }
}

/// Compose the notification for a transition, keyed only by the new status.
/// Returns `None` for statuses outside the notifiable set.
pub fn compose(transition: &Transition) -> Option<NotificationSpec> {
    let status = NotifiableStatus::parse_status(&transition.to)?;
    let (title, body) = template(status);
    let mut metadata = HashMap::with_capacity(2);
    metadata.insert(META_ORDER_ID.to_string(), transition.entity_id.clone());
    metadata.insert(META_STATUS.to_string(), status.as_str().to_string());
    Some(NotificationSpec {
        title: title.to_string(),
        body: body.to_string(),
        metadata,
    })
}
