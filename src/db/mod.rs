//! Database module: order and device-token storage.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions, plus the after-update hook call on order writes.
//!
//! The repository API is re-exported at `order_notify::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{OrderChanges, OrderRow};
