//! crates/conversation_analytics_core/src/service.rs
//!
//! Orchestrates conversation creation, listing and detail retrieval.
//!
//! Persistence is the source of truth. Geographic enrichment is best-effort:
//! lookup or cache failures are logged and degrade to a missing location,
//! they never fail the call.

use crate::domain::{
    Conversation, ConversationDetail, ConversationListFilter, ConversationListItem,
    ConversationMessage, ConversationReference, GeoLocation, IssuedNonce, PaginatedResult,
};
use crate::geo::{GeoCache, GeoResolver, ResolutionMemo};
use crate::nonce::{NonceError, NonceValidator};
use crate::ports::{ConversationStore, PortError, PortResult};
use crate::references::extract_references;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Span};
use uuid::Uuid;

/// Errors surfaced by [`ConversationService`].
///
/// Nonce rejections stay distinguishable from storage failures so callers can
/// refuse the former and retry the latter.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error(transparent)]
    Nonce(#[from] NonceError),
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
}

pub struct ConversationService {
    store: Arc<dyn ConversationStore>,
    nonces: NonceValidator,
    resolver: GeoResolver,
    geo_cache: GeoCache,
    span: Span,
}

impl ConversationService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        nonces: NonceValidator,
        resolver: GeoResolver,
        geo_cache: GeoCache,
        span: Span,
    ) -> Self {
        Self {
            store,
            nonces,
            resolver,
            geo_cache,
            span,
        }
    }

    /// Hands out a conversation id together with the nonce its creation must present.
    pub async fn issue_conversation_nonce(&self) -> Result<IssuedNonce, ConversationError> {
        Ok(self.nonces.issue().await?)
    }

    pub async fn validate_conversation_nonce(
        &self,
        conversation_id: Uuid,
        nonce: Uuid,
    ) -> Result<(), ConversationError> {
        Ok(self.nonces.validate(conversation_id, nonce).await?)
    }

    /// Consumes the conversation's nonce, persists it, then records its location for the kb.
    pub async fn create_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<(), ConversationError> {
        self.nonces
            .validate(conversation.id, conversation.nonce)
            .await?;
        self.store.create_conversation(conversation).await?;
        info!(
            parent: &self.span,
            conversation_id = %conversation.id,
            kb_id = %conversation.kb_id,
            "conversation created"
        );

        let remote_ip = &conversation.remote_ip;
        match self.resolver.resolve(remote_ip).await {
            Ok(location) => {
                if let Err(e) = self.geo_cache.set(&conversation.kb_id, &location).await {
                    warn!(
                        parent: &self.span,
                        error = %e,
                        conversation_id = %conversation.id,
                        ip = %remote_ip,
                        "set geo cache failed"
                    );
                }
            }
            Err(e) => {
                warn!(
                    parent: &self.span,
                    error = %e,
                    ip = %remote_ip,
                    conversation_id = %conversation.id,
                    "get ip address failed"
                );
            }
        }
        Ok(())
    }

    /// Persists a message together with the references parsed from its content.
    pub async fn create_message(
        &self,
        kb_id: &str,
        message: &ConversationMessage,
    ) -> PortResult<Vec<ConversationReference>> {
        let references =
            extract_references(message.conversation_id, &message.app_id, &message.content);
        self.store
            .create_conversation_message(message, &references)
            .await?;
        debug!(
            parent: &self.span,
            kb_id = %kb_id,
            message_id = %message.id,
            references = references.len(),
            "conversation message stored"
        );
        Ok(references)
    }

    /// Fetches one page and attaches locations, looking up each distinct IP once.
    pub async fn list_conversations(
        &self,
        filter: &ConversationListFilter,
    ) -> PortResult<PaginatedResult<ConversationListItem>> {
        let (mut conversations, total) = self.store.get_conversation_list(filter).await?;

        let mut memo = ResolutionMemo::new(&self.resolver);
        for conversation in conversations.iter_mut() {
            conversation.location = memo.resolve(&conversation.remote_ip, &self.span).await;
        }
        Ok(PaginatedResult::new(conversations, total))
    }

    /// Assembles a conversation with its location, messages and references.
    ///
    /// A failed location lookup leaves the location empty; failing to read the
    /// messages or references fails the call.
    pub async fn get_conversation_detail(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<ConversationDetail> {
        let conversation = self.store.get_conversation_detail(conversation_id).await?;

        let location = match self.resolver.resolve(&conversation.remote_ip).await {
            Ok(location) => Some(location),
            Err(e) => {
                error!(
                    parent: &self.span,
                    error = %e,
                    ip = %conversation.remote_ip,
                    "get ip address failed"
                );
                None
            }
        };

        let messages = self.store.get_conversation_messages(conversation_id).await?;
        let references = self.store.get_conversation_references(conversation_id).await?;

        Ok(ConversationDetail {
            conversation,
            location,
            messages,
            references,
        })
    }

    /// The last location observed for a knowledge base, if the cache still holds one.
    pub async fn kb_location(&self, kb_id: &str) -> Option<GeoLocation> {
        match self.geo_cache.location(kb_id).await {
            Ok(location) => location,
            Err(e) => {
                warn!(parent: &self.span, error = %e, kb_id = %kb_id, "get geo cache failed");
                None
            }
        }
    }
}
