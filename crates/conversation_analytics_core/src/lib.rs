pub mod domain;
pub mod geo;
pub mod nonce;
pub mod ports;
pub mod references;
pub mod retention;
pub mod service;

#[cfg(test)]
mod testing;

pub use domain::{
    Conversation, ConversationDetail, ConversationListFilter, ConversationListItem,
    ConversationMessage, ConversationReference, GeoLocation, IssuedNonce, MessageRole,
    PaginatedResult, Pagination,
};
pub use geo::{GeoCache, GeoLookupError, GeoResolver};
pub use nonce::{NonceError, NonceValidator};
pub use ports::{
    ConversationStore, GeoCacheStore, IpDatabase, NonceCheck, NonceStore, PortError, PortResult,
    StatStore,
};
pub use references::extract_references;
pub use retention::{RetentionSweeper, ScheduledJob, Scheduler, SweeperState};
pub use service::{ConversationError, ConversationService};
