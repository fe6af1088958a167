pub mod rest;
pub mod state;

use crate::web::rest::{
    conversation_detail_handler, create_conversation_handler, create_message_handler,
    health_handler, issue_nonce_handler, kb_location_handler, list_conversations_handler,
};
use crate::web::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use rest::ApiDoc;

/// Builds the REST router over the shared state.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/conversations/nonce", post(issue_nonce_handler))
        .route(
            "/conversations",
            get(list_conversations_handler).post(create_conversation_handler),
        )
        .route("/conversations/{id}", get(conversation_detail_handler))
        .route("/conversations/{id}/messages", post(create_message_handler))
        .route("/knowledge-bases/{kb_id}/location", get(kb_location_handler))
        .with_state(app_state)
}
