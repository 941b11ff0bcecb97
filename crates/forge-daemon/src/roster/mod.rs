//! Roster: tracking of synthetic team members registered by daemon plugins

pub mod service;
pub mod tracking;

pub use service::{CleanupMode, RosterError, RosterService};
pub use tracking::MembershipTracker;
