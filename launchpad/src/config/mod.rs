//! Configuration model: global settings, application and engine descriptors

pub mod app;
pub mod engine;
pub mod env;
pub mod global;
pub mod loader;
pub mod types;
