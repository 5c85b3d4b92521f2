//! Fleet configuration
//!
//! Split into the core types, the typestate builder, and read accessors.

mod builder;
mod getters;
mod types;

pub use builder::{Complete, FleetConfigBuilder, WithWorkDir};
pub use types::FleetConfig;
