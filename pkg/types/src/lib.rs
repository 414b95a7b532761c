pub mod config;
pub mod instance;
pub mod meta;
pub mod rbac;
pub mod selector;
pub mod validate;
pub mod volume;
