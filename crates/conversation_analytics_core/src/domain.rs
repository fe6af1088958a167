//! crates/conversation_analytics_core/src/domain.rs
//!
//! Defines the pure, core data structures for conversation analytics.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Who produced a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

/// A resolved geographic location for a remote IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoLocation {
    pub country: String,
    pub province: String,
    pub city: String,
}

/// The `country|province|city` form used as the geo cache value.
impl fmt::Display for GeoLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.country, self.province, self.city)
    }
}

impl FromStr for GeoLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '|');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(country), Some(province), Some(city)) => Ok(GeoLocation {
                country: country.to_string(),
                province: province.to_string(),
                city: city.to_string(),
            }),
            _ => Err(format!("malformed location '{}'", s)),
        }
    }
}

/// A conversation between a visitor and an assistant app of a knowledge base.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub kb_id: String,
    pub app_id: String,
    pub subject: String,
    pub remote_ip: String,
    /// Single-use token proving the creation request is not a replay.
    pub nonce: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A single turn within a conversation.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub app_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A citation derived from the trailing reference block of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationReference {
    pub conversation_id: Uuid,
    pub app_id: String,
    /// The citation number as written in the source text. Used for display order only.
    pub ordinal: u32,
    pub name: String,
    pub url: String,
}

/// One row of a conversation listing.
#[derive(Debug, Clone)]
pub struct ConversationListItem {
    pub id: Uuid,
    pub kb_id: String,
    pub app_id: String,
    pub subject: String,
    pub remote_ip: String,
    pub location: Option<GeoLocation>,
    pub created_at: DateTime<Utc>,
}

/// A conversation with everything a detail view needs.
#[derive(Debug, Clone)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub location: Option<GeoLocation>,
    pub messages: Vec<ConversationMessage>,
    pub references: Vec<ConversationReference>,
}

/// Page selection for listings. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(1, 20)
    }
}

/// Filter for a conversation listing. `kb_id` is always required.
#[derive(Debug, Clone, Default)]
pub struct ConversationListFilter {
    pub kb_id: String,
    pub app_id: Option<String>,
    pub remote_ip: Option<String>,
    /// Case-insensitive substring match against the conversation subject.
    pub subject: Option<String>,
    pub pagination: Pagination,
}

/// One page of results plus the total number of rows matching the filter.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub data: Vec<T>,
    pub total: u64,
}

impl<T> PaginatedResult<T> {
    pub fn new(data: Vec<T>, total: u64) -> Self {
        Self { data, total }
    }
}

/// A freshly issued conversation id and the nonce that must accompany its creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedNonce {
    pub conversation_id: Uuid,
    pub nonce: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_cache_value_round_trips() {
        let location = GeoLocation {
            country: "China".to_string(),
            province: "Sichuan".to_string(),
            city: "Chengdu".to_string(),
        };
        assert_eq!(location.to_string(), "China|Sichuan|Chengdu");
        assert_eq!("China|Sichuan|Chengdu".parse::<GeoLocation>().unwrap(), location);
    }

    #[test]
    fn location_keeps_empty_segments() {
        let location: GeoLocation = "Reserved||".parse().unwrap();
        assert_eq!(location.country, "Reserved");
        assert!(location.province.is_empty());
        assert!(location.city.is_empty());
        assert!("only-country".parse::<GeoLocation>().is_err());
    }

    #[test]
    fn pagination_clamps_and_computes_offset() {
        let p = Pagination::new(0, 0);
        assert_eq!((p.page, p.per_page), (1, 1));
        let p = Pagination::new(3, 500);
        assert_eq!(p.per_page, Pagination::MAX_PER_PAGE);
        assert_eq!(p.offset(), 200);
        assert_eq!(Pagination::new(2, 10).offset(), 10);
    }

    #[test]
    fn zero_page_built_directly_starts_at_offset_zero() {
        let p = Pagination {
            page: 0,
            per_page: 20,
        };
        assert_eq!(p.offset(), 0);
        assert_eq!(p.limit(), 20);
    }
}
