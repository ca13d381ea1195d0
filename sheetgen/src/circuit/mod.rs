//! Circuit description and construction.

pub mod builder;
pub mod graph;
pub mod schema;

pub use builder::{ChainItem, CircuitBuilder, NO_CONNECT_NET};
pub use graph::{CircuitGraph, CircuitStats};
pub use schema::*;
