//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use conversation_analytics_core::retention::RetentionSweeper;
use conversation_analytics_core::service::ConversationService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConversationService>,
    pub sweeper: Arc<RetentionSweeper>,
    pub config: Arc<Config>,
}
