//! Concrete `Plugin` implementations hosted by the daemon.

pub mod bridge;
pub mod worker_adapter;
