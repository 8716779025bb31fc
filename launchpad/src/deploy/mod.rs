//! Deployment module

pub mod attempt_log;
pub mod command;
pub mod executor;
pub mod fsm;
pub mod git;
pub mod health;
pub mod history;
pub mod supervisor;
pub mod target;
