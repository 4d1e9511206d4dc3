//! Application layer: assembling the bridge from its parts.

pub mod builder;

pub use self::builder::{Bridge, BridgeBuilder, BuildError};
