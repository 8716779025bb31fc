//! Wire models shared by the launchpad webhook server and its clients.

pub mod models;
