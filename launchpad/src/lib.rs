//! Launchpad Library
//!
//! Push-to-deploy for single-host servers: descriptors, sticky port
//! allocation, the deployment engine and the webhook surface.

pub mod app;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod ports;
pub mod server;
pub mod storage;
pub mod utils;
