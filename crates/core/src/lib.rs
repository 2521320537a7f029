//! `fedsync-core` — keys, object metadata and reconciliation outcomes.
//!
//! This crate contains **pure value types** shared by the scheduling runtime
//! and by reconcile functions (no threads, no timers).

pub mod error;
pub mod key;
pub mod object;
pub mod status;

pub use error::{KeyError, KeyResult};
pub use key::QualifiedName;
pub use object::{ObjectMeta, Resource};
pub use status::ReconciliationStatus;
