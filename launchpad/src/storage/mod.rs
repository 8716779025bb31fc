//! Persistent storage: on-disk layout and locked JSON documents

pub mod document;
pub mod layout;
