// Application state shared across all modules

use std::sync::Arc;

use crate::auth::handshake::HandshakeController;
use crate::auth::identity::UserStore;

/// Read-only state handed to every handler
///
/// Nothing in here is mutated after startup apart from the pending OAuth
/// states owned by the handshake controller.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub handshake: Arc<HandshakeController>,
}
