//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `ConversationStore`, `NonceStore` and `StatStore` ports from the core crate.
//! It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conversation_analytics_core::domain::{
    Conversation, ConversationListFilter, ConversationListItem, ConversationMessage,
    ConversationReference, MessageRole,
};
use conversation_analytics_core::ports::{
    ConversationStore, NonceCheck, NonceStore, PortError, PortResult, StatStore,
};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct ConversationRecord {
    id: Uuid,
    kb_id: String,
    app_id: String,
    subject: String,
    remote_ip: String,
    nonce: Uuid,
    created_at: DateTime<Utc>,
}
impl ConversationRecord {
    fn to_domain(self) -> Conversation {
        Conversation {
            id: self.id,
            kb_id: self.kb_id,
            app_id: self.app_id,
            subject: self.subject,
            remote_ip: self.remote_ip,
            nonce: self.nonce,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ConversationListRecord {
    id: Uuid,
    kb_id: String,
    app_id: String,
    subject: String,
    remote_ip: String,
    created_at: DateTime<Utc>,
}
impl ConversationListRecord {
    fn to_domain(self) -> ConversationListItem {
        ConversationListItem {
            id: self.id,
            kb_id: self.kb_id,
            app_id: self.app_id,
            subject: self.subject,
            remote_ip: self.remote_ip,
            location: None,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    app_id: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<ConversationMessage> {
        let role = self
            .role
            .parse::<MessageRole>()
            .map_err(PortError::Unexpected)?;
        Ok(ConversationMessage {
            id: self.id,
            conversation_id: self.conversation_id,
            app_id: self.app_id,
            role,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ReferenceRecord {
    conversation_id: Uuid,
    app_id: String,
    ordinal: i64,
    name: String,
    url: String,
}
impl ReferenceRecord {
    fn to_domain(self) -> PortResult<ConversationReference> {
        let ordinal = u32::try_from(self.ordinal).map_err(|_| {
            PortError::Unexpected(format!("reference ordinal {} out of range", self.ordinal))
        })?;
        Ok(ConversationReference {
            conversation_id: self.conversation_id,
            app_id: self.app_id,
            ordinal,
            name: self.name,
            url: self.url,
        })
    }
}

/// Appends the listing predicate shared by the page query and the count query.
fn push_list_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ConversationListFilter) {
    builder.push(" WHERE kb_id = ").push_bind(filter.kb_id.clone());
    if let Some(app_id) = &filter.app_id {
        builder.push(" AND app_id = ").push_bind(app_id.clone());
    }
    if let Some(remote_ip) = &filter.remote_ip {
        builder.push(" AND remote_ip = ").push_bind(remote_ip.clone());
    }
    if let Some(subject) = &filter.subject {
        builder
            .push(" AND subject ILIKE ")
            .push_bind(format!("%{}%", subject));
    }
}

//=========================================================================================
// `ConversationStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl ConversationStore for DbAdapter {
    async fn create_conversation(&self, conversation: &Conversation) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO conversations (id, kb_id, app_id, subject, remote_ip, nonce, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(conversation.id)
        .bind(&conversation.kb_id)
        .bind(&conversation.app_id)
        .bind(&conversation.subject)
        .bind(&conversation.remote_ip)
        .bind(conversation.nonce)
        .bind(conversation.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn create_conversation_message(
        &self,
        message: &ConversationMessage,
        references: &[ConversationReference],
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO conversation_messages (id, conversation_id, app_id, role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(&message.app_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        for reference in references {
            sqlx::query(
                "INSERT INTO conversation_references (conversation_id, app_id, message_id, ordinal, name, url) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(reference.conversation_id)
            .bind(&reference.app_id)
            .bind(message.id)
            .bind(i64::from(reference.ordinal))
            .bind(&reference.name)
            .bind(&reference.url)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn get_conversation_list(
        &self,
        filter: &ConversationListFilter,
    ) -> PortResult<(Vec<ConversationListItem>, u64)> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM conversations");
        push_list_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let mut page_query = QueryBuilder::<Postgres>::new(
            "SELECT id, kb_id, app_id, subject, remote_ip, created_at FROM conversations",
        );
        push_list_filter(&mut page_query, filter);
        page_query
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(filter.pagination.limit() as i64)
            .push(" OFFSET ")
            .push_bind(filter.pagination.offset() as i64);
        let records: Vec<ConversationListRecord> = page_query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;

        let rows = records.into_iter().map(|r| r.to_domain()).collect();
        Ok((rows, total.max(0) as u64))
    }

    async fn get_conversation_detail(&self, conversation_id: Uuid) -> PortResult<Conversation> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            "SELECT id, kb_id, app_id, subject, remote_ip, nonce, created_at \
             FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Conversation {} not found", conversation_id))
            }
            _ => PortError::Unexpected(e.to_string()),
        })?;
        Ok(record.to_domain())
    }

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<Vec<ConversationMessage>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, conversation_id, app_id, role, content, created_at \
             FROM conversation_messages WHERE conversation_id = $1 ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_conversation_references(
        &self,
        conversation_id: Uuid,
    ) -> PortResult<Vec<ConversationReference>> {
        let records = sqlx::query_as::<_, ReferenceRecord>(
            "SELECT conversation_id, app_id, ordinal, name, url \
             FROM conversation_references WHERE conversation_id = $1 ORDER BY id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }
}

//=========================================================================================
// `NonceStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl NonceStore for DbAdapter {
    async fn store_nonce(&self, conversation_id: Uuid, nonce: Uuid) -> PortResult<()> {
        sqlx::query("INSERT INTO conversation_nonces (conversation_id, nonce) VALUES ($1, $2)")
            .bind(conversation_id)
            .bind(nonce)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_and_consume_nonce(
        &self,
        conversation_id: Uuid,
        nonce: Uuid,
    ) -> PortResult<NonceCheck> {
        let consumed: Option<Uuid> = sqlx::query_scalar(
            "UPDATE conversation_nonces SET used_at = NOW() \
             WHERE conversation_id = $1 AND nonce = $2 AND used_at IS NULL \
             RETURNING conversation_id",
        )
        .bind(conversation_id)
        .bind(nonce)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        if consumed.is_some() {
            return Ok(NonceCheck::Consumed);
        }

        // The conditional update missed; work out why.
        let stored: Option<Uuid> = sqlx::query_scalar(
            "SELECT nonce FROM conversation_nonces WHERE conversation_id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(match stored {
            None => NonceCheck::Unknown,
            Some(stored) if stored != nonce => NonceCheck::Mismatch,
            // Used earlier, or by a concurrent request between the two statements.
            Some(_) => NonceCheck::AlreadyUsed,
        })
    }
}

//=========================================================================================
// `StatStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl StatStore for DbAdapter {
    async fn delete_stats_older_than(&self, threshold: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM stat_pages WHERE created_at < $1")
            .bind(threshold)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}
