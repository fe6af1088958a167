//! crates/conversation_analytics_core/src/nonce.rs
//!
//! Single-use nonces that gate conversation creation against replayed requests.

use crate::domain::IssuedNonce;
use crate::ports::{NonceCheck, NonceStore, PortError};
use std::sync::Arc;
use tracing::{info, warn, Span};
use uuid::Uuid;

/// A rejected nonce. Callers must surface these as a refused request, not retry them.
#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    #[error("Invalid nonce for conversation {0}")]
    Invalid(Uuid),
    #[error("Nonce for conversation {0} was already used")]
    AlreadyUsed(Uuid),
    #[error("No nonce issued for conversation {0}")]
    NotFound(Uuid),
    #[error("Nonce store error: {0}")]
    Store(#[from] PortError),
}

pub struct NonceValidator {
    store: Arc<dyn NonceStore>,
    span: Span,
}

impl NonceValidator {
    pub fn new(store: Arc<dyn NonceStore>, span: Span) -> Self {
        Self { store, span }
    }

    /// Generates a conversation id and an unused nonce for it.
    pub async fn issue(&self) -> Result<IssuedNonce, NonceError> {
        let issued = IssuedNonce {
            conversation_id: Uuid::new_v4(),
            nonce: Uuid::new_v4(),
        };
        self.store
            .store_nonce(issued.conversation_id, issued.nonce)
            .await?;
        info!(
            parent: &self.span,
            conversation_id = %issued.conversation_id,
            "issued conversation nonce"
        );
        Ok(issued)
    }

    /// Checks `nonce` and consumes it. A second call with the same nonce reports `AlreadyUsed`.
    pub async fn validate(&self, conversation_id: Uuid, nonce: Uuid) -> Result<(), NonceError> {
        let outcome = match self
            .store
            .validate_and_consume_nonce(conversation_id, nonce)
            .await?
        {
            NonceCheck::Consumed => return Ok(()),
            NonceCheck::Mismatch => NonceError::Invalid(conversation_id),
            NonceCheck::AlreadyUsed => NonceError::AlreadyUsed(conversation_id),
            NonceCheck::Unknown => NonceError::NotFound(conversation_id),
        };
        warn!(
            parent: &self.span,
            conversation_id = %conversation_id,
            reason = %outcome,
            "nonce rejected"
        );
        Err(outcome)
    }
}
