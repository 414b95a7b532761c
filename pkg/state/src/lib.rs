pub mod memory;
pub mod slate;
pub mod store;
pub mod watch;

pub use store::{ObjectStore, StoreError, StoreResult};
