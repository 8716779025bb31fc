//! Server state

use secrecy::SecretString;

use crate::dispatch::trigger::Dispatcher;

/// Server state shared across handlers
pub struct ServerState {
    pub dispatcher: Dispatcher,
    /// Shared secret for request signatures
    pub secret: SecretString,
}

impl ServerState {
    pub fn new(dispatcher: Dispatcher, secret: SecretString) -> Self {
        Self { dispatcher, secret }
    }
}
