//! Idempotent applier: converges a named set of desired objects into the store
//! and prunes what the set owned before but no longer wants.

pub mod applier;
pub mod error;
pub mod record;
pub mod set;

pub use applier::{ApplyReport, Applier};
pub use error::ApplyError;
pub use record::OwnershipRecord;
pub use set::DesiredObjectSet;
