//! Policy composition: a fluent role chain, template resolution, and emission of
//! cluster roles, role templates and global roles.

pub mod chain;
pub mod defaults;
pub mod emit;
pub mod error;
pub mod resolve;

pub use chain::{ComposedChain, RoleChain, RoleSpec};
pub use error::BuildError;
pub use resolve::Resolver;
