//! Trigger dispatch and per-target serialization

pub mod queue;
pub mod resolver;
pub mod trigger;
