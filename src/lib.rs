//! Push notifications for order status changes.
//!
//! A storage-layer hook hands each order write to [`worker::DispatchQueue`],
//! which runs [`dispatch::DispatchCoordinator`]: detect the status
//! transition, pick the message, resolve the customer's device token and
//! deliver through the injected push provider.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod model;
pub mod policy;
pub mod push;
pub mod recipient;
pub mod transition;
pub mod worker;
