//! In-memory port implementations shared by the unit tests.

use crate::domain::{
    Conversation, ConversationListFilter, ConversationListItem, ConversationMessage,
    ConversationReference, GeoLocation,
};
use crate::ports::{
    ConversationStore, GeoCacheStore, IpDatabase, NonceCheck, NonceStore, PortError, PortResult,
    StatStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

pub fn location(country: &str, province: &str, city: &str) -> GeoLocation {
    GeoLocation {
        country: country.to_string(),
        province: province.to_string(),
        city: city.to_string(),
    }
}

fn unexpected(what: &str) -> PortError {
    PortError::Unexpected(format!("{} failed", what))
}

//=========================================================================================
// IP database
//=========================================================================================

#[derive(Default)]
pub struct FakeIpDatabase {
    entries: HashMap<IpAddr, GeoLocation>,
    failing: bool,
    lookups: AtomicUsize,
}

impl FakeIpDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with(mut self, ip: &str, location: GeoLocation) -> Self {
        let addr: IpAddr = ip.parse().expect("test ip parses");
        self.entries.insert(addr, location);
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IpDatabase for FakeIpDatabase {
    async fn lookup(&self, ip: IpAddr) -> PortResult<Option<GeoLocation>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(unexpected("ip lookup"));
        }
        Ok(self.entries.get(&ip).cloned())
    }
}

//=========================================================================================
// Geo cache
//=========================================================================================

#[derive(Default)]
pub struct FakeGeoCacheStore {
    values: Mutex<HashMap<String, String>>,
    failing: bool,
}

impl FakeGeoCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn value(&self, kb_id: &str) -> Option<String> {
        self.values.lock().unwrap().get(kb_id).cloned()
    }

    pub fn put_raw(&self, kb_id: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(kb_id.to_string(), value.to_string());
    }
}

#[async_trait]
impl GeoCacheStore for FakeGeoCacheStore {
    async fn get(&self, kb_id: &str) -> PortResult<Option<String>> {
        if self.failing {
            return Err(unexpected("cache get"));
        }
        Ok(self.value(kb_id))
    }

    async fn set(&self, kb_id: &str, value: &str) -> PortResult<()> {
        if self.failing {
            return Err(unexpected("cache set"));
        }
        self.put_raw(kb_id, value);
        Ok(())
    }
}

//=========================================================================================
// Nonces
//=========================================================================================

#[derive(Default)]
pub struct FakeNonceStore {
    // conversation id -> (nonce, used)
    entries: Mutex<HashMap<Uuid, (Uuid, bool)>>,
    fail_next_store: AtomicBool,
}

impl FakeNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_store(&self) {
        self.fail_next_store.store(true, Ordering::SeqCst);
    }

    pub fn is_unused(&self, conversation_id: Uuid) -> bool {
        matches!(
            self.entries.lock().unwrap().get(&conversation_id),
            Some((_, false))
        )
    }
}

#[async_trait]
impl NonceStore for FakeNonceStore {
    async fn store_nonce(&self, conversation_id: Uuid, nonce: Uuid) -> PortResult<()> {
        if self.fail_next_store.swap(false, Ordering::SeqCst) {
            return Err(unexpected("store nonce"));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(conversation_id, (nonce, false));
        Ok(())
    }

    async fn validate_and_consume_nonce(
        &self,
        conversation_id: Uuid,
        nonce: Uuid,
    ) -> PortResult<NonceCheck> {
        let mut entries = self.entries.lock().unwrap();
        let check = match entries.get_mut(&conversation_id) {
            None => NonceCheck::Unknown,
            Some((stored, _)) if *stored != nonce => NonceCheck::Mismatch,
            Some((_, used)) if *used => NonceCheck::AlreadyUsed,
            Some((_, used)) => {
                *used = true;
                NonceCheck::Consumed
            }
        };
        Ok(check)
    }
}

//=========================================================================================
// Conversations
//=========================================================================================

#[derive(Default)]
pub struct FakeConversationStore {
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<Vec<ConversationMessage>>,
    references: Mutex<Vec<ConversationReference>>,
    fail_writes: bool,
    fail_messages: bool,
    fail_references: bool,
}

impl FakeConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn failing_messages() -> Self {
        Self {
            fail_messages: true,
            ..Self::default()
        }
    }

    pub fn failing_references() -> Self {
        Self {
            fail_references: true,
            ..Self::default()
        }
    }

    /// Seeds a conversation without going through the nonce gate.
    pub fn insert(&self, conversation: Conversation) {
        self.conversations.lock().unwrap().push(conversation);
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn references_for(&self, conversation_id: Uuid) -> Vec<ConversationReference> {
        self.references
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .cloned()
            .collect()
    }
}

fn matches_filter(conversation: &Conversation, filter: &ConversationListFilter) -> bool {
    conversation.kb_id == filter.kb_id
        && filter.app_id.as_ref().map_or(true, |a| &conversation.app_id == a)
        && filter
            .remote_ip
            .as_ref()
            .map_or(true, |ip| &conversation.remote_ip == ip)
        && filter.subject.as_ref().map_or(true, |s| {
            conversation
                .subject
                .to_lowercase()
                .contains(&s.to_lowercase())
        })
}

#[async_trait]
impl ConversationStore for FakeConversationStore {
    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<()> {
        if self.fail_writes {
            return Err(unexpected("insert conversation"));
        }
        self.insert(conversation.clone());
        Ok(())
    }

    async fn create_conversation_message(
        &self,
        message: &ConversationMessage,
        references: &[ConversationReference],
    ) -> PortResult<()> {
        if self.fail_writes {
            return Err(unexpected("insert message"));
        }
        self.messages.lock().unwrap().push(message.clone());
        self.references
            .lock()
            .unwrap()
            .extend(references.iter().cloned());
        Ok(())
    }

    async fn get_conversation_list(
        &self,
        filter: &ConversationListFilter,
    ) -> PortResult<(Vec<ConversationListItem>, u64)> {
        let mut matching: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches_filter(c, filter))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let rows = matching
            .into_iter()
            .skip(filter.pagination.offset() as usize)
            .take(filter.pagination.limit() as usize)
            .map(|c| ConversationListItem {
                id: c.id,
                kb_id: c.kb_id,
                app_id: c.app_id,
                subject: c.subject,
                remote_ip: c.remote_ip,
                location: None,
                created_at: c.created_at,
            })
            .collect();
        Ok((rows, total))
    }

    async fn get_conversation_detail(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Conversation {} not found", conversation_id))
            })
    }

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<Vec<ConversationMessage>> {
        if self.fail_messages {
            return Err(unexpected("select messages"));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn get_conversation_references(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<Vec<ConversationReference>> {
        if self.fail_references {
            return Err(unexpected("select references"));
        }
        Ok(self.references_for(conversation_id))
    }
}

//=========================================================================================
// Stats
//=========================================================================================

#[derive(Default)]
pub struct FakeStatStore {
    records: Mutex<Vec<DateTime<Utc>>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeStatStore {
    pub fn with_records(records: Vec<DateTime<Utc>>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<DateTime<Utc>> {
        self.records.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatStore for FakeStatStore {
    async fn delete_stats_older_than(&self, threshold: DateTime<Utc>) -> PortResult<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(unexpected("delete stats"));
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|created_at| *created_at >= threshold);
        Ok((before - records.len()) as u64)
    }
}
