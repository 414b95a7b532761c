//! Background reconcilers. Each controller is started as its own tokio task.

pub mod managed;
pub mod policy;
pub mod pvc;

pub use managed::ManagedLabelController;
pub use policy::PolicySyncController;
pub use pvc::PvcMountedByController;
