//! Port allocation

pub mod allocator;
pub mod state;
