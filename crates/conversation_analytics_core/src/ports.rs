//! crates/conversation_analytics_core/src/ports.rs
//!
//! Defines the service contracts (traits) the conversation analytics core depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the relational store, the IP database and the cache backend.

use crate::domain::{
    Conversation, ConversationListFilter, ConversationListItem, ConversationMessage,
    ConversationReference, GeoLocation,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::net::IpAddr;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, cache).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports
//=========================================================================================

/// What the store found when asked to consume a conversation nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceCheck {
    /// The nonce matched an unused entry, which is now marked used.
    Consumed,
    /// An entry exists for the conversation but the nonce differs.
    Mismatch,
    /// The nonce matched but was consumed by an earlier call.
    AlreadyUsed,
    /// No nonce was ever issued for the conversation.
    Unknown,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<()>;

    /// Persists a message and the references derived from it as one logical write.
    async fn create_conversation_message(
        &self,
        message: &ConversationMessage,
        references: &[ConversationReference],
    ) -> PortResult<()>;

    /// Returns one page of rows plus the total number of rows matching the filter.
    async fn get_conversation_list(
        &self,
        filter: &ConversationListFilter,
    ) -> PortResult<(Vec<ConversationListItem>, u64)>;

    async fn get_conversation_detail(&self, conversation_id: Uuid) -> PortResult<Conversation>;

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<Vec<ConversationMessage>>;

    async fn get_conversation_references(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<Vec<ConversationReference>>;
}

#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Records an unused nonce for a conversation that is about to be created.
    async fn store_nonce(&self, conversation_id: Uuid, nonce: Uuid) -> PortResult<()>;

    /// Atomically checks the nonce and marks it used when it matches.
    async fn validate_and_consume_nonce(
        &self,
        conversation_id: Uuid,
        nonce: Uuid,
    ) -> PortResult<NonceCheck>;
}

#[async_trait]
pub trait StatStore: Send + Sync {
    /// Deletes every stat record created before `threshold`, returning how many went.
    async fn delete_stats_older_than(&self, threshold: DateTime<Utc>) -> PortResult<u64>;
}

//=========================================================================================
// Geo Ports
//=========================================================================================

#[async_trait]
pub trait IpDatabase: Send + Sync {
    /// Looks up the location of an address. `Ok(None)` means no range covers it.
    async fn lookup(&self, ip: IpAddr) -> PortResult<Option<GeoLocation>>;
}

#[async_trait]
pub trait GeoCacheStore: Send + Sync {
    async fn get(&self, kb_id: &str) -> PortResult<Option<String>>;

    async fn set(&self, kb_id: &str, value: &str) -> PortResult<()>;
}
