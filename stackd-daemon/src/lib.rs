//! stackd daemon library
//!
//! The event-driven reconciliation engine: dispatcher, kernel, kind
//! plugins, and the manager that ties their lifetimes together.

pub mod reconciler;
