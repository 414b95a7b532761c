//! Centralized constants for the virtrs project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod auth;
pub mod labels;
pub mod paths;
pub mod rbac;
pub mod state;
