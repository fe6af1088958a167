//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI document.

use crate::web::state::AppState;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Utc};
use conversation_analytics_core::domain::{
    Conversation, ConversationDetail, ConversationListFilter, ConversationListItem,
    ConversationMessage, ConversationReference, GeoLocation, MessageRole, Pagination,
};
use conversation_analytics_core::nonce::NonceError;
use conversation_analytics_core::ports::PortError;
use conversation_analytics_core::retention::SweeperState;
use conversation_analytics_core::service::ConversationError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        issue_nonce_handler,
        create_conversation_handler,
        create_message_handler,
        list_conversations_handler,
        conversation_detail_handler,
        kb_location_handler,
        health_handler,
    ),
    components(
        schemas(
            IssueNonceResponse,
            CreateConversationRequest,
            CreateConversationResponse,
            CreateMessageRequest,
            CreateMessageResponse,
            ReferenceResponse,
            LocationResponse,
            ConversationListItemResponse,
            ConversationListResponse,
            MessageResponse,
            ConversationDetailResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "Conversation Analytics API", description = "Conversation records, citations and visitor geography.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A conversation id and the single-use nonce its creation must present.
#[derive(Serialize, ToSchema)]
pub struct IssueNonceResponse {
    conversation_id: Uuid,
    nonce: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateConversationRequest {
    pub conversation_id: Uuid,
    pub nonce: Uuid,
    pub kb_id: String,
    pub app_id: String,
    #[serde(default)]
    pub subject: String,
}

#[derive(Serialize, ToSchema)]
pub struct CreateConversationResponse {
    conversation_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateMessageRequest {
    pub kb_id: String,
    pub app_id: String,
    /// One of `user`, `assistant`, `system`.
    pub role: String,
    pub content: String,
}

#[derive(Serialize, ToSchema)]
pub struct CreateMessageResponse {
    message_id: Uuid,
    references: Vec<ReferenceResponse>,
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct ReferenceResponse {
    ordinal: u32,
    name: String,
    url: String,
}

impl From<ConversationReference> for ReferenceResponse {
    fn from(r: ConversationReference) -> Self {
        Self {
            ordinal: r.ordinal,
            name: r.name,
            url: r.url,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct LocationResponse {
    country: String,
    province: String,
    city: String,
}

impl From<GeoLocation> for LocationResponse {
    fn from(l: GeoLocation) -> Self {
        Self {
            country: l.country,
            province: l.province,
            city: l.city,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConversationListQuery {
    /// Knowledge base whose conversations are listed.
    pub kb_id: String,
    pub app_id: Option<String>,
    pub remote_ip: Option<String>,
    /// Case-insensitive substring of the subject.
    pub subject: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl ConversationListQuery {
    fn into_filter(self) -> ConversationListFilter {
        let defaults = Pagination::default();
        ConversationListFilter {
            kb_id: self.kb_id,
            app_id: self.app_id,
            remote_ip: self.remote_ip,
            subject: self.subject.filter(|s| !s.trim().is_empty()),
            pagination: Pagination::new(
                self.page.unwrap_or(defaults.page),
                self.per_page.unwrap_or(defaults.per_page),
            ),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConversationListItemResponse {
    id: Uuid,
    kb_id: String,
    app_id: String,
    subject: String,
    remote_ip: String,
    location: Option<LocationResponse>,
    created_at: DateTime<Utc>,
}

impl From<ConversationListItem> for ConversationListItemResponse {
    fn from(item: ConversationListItem) -> Self {
        Self {
            id: item.id,
            kb_id: item.kb_id,
            app_id: item.app_id,
            subject: item.subject,
            remote_ip: item.remote_ip,
            location: item.location.map(LocationResponse::from),
            created_at: item.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConversationListResponse {
    data: Vec<ConversationListItemResponse>,
    total: u64,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<ConversationMessage> for MessageResponse {
    fn from(m: ConversationMessage) -> Self {
        Self {
            id: m.id,
            role: m.role.as_str().to_string(),
            content: m.content,
            created_at: m.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ConversationDetailResponse {
    id: Uuid,
    kb_id: String,
    app_id: String,
    subject: String,
    remote_ip: String,
    location: Option<LocationResponse>,
    created_at: DateTime<Utc>,
    messages: Vec<MessageResponse>,
    references: Vec<ReferenceResponse>,
}

impl From<ConversationDetail> for ConversationDetailResponse {
    fn from(detail: ConversationDetail) -> Self {
        let c = detail.conversation;
        Self {
            id: c.id,
            kb_id: c.kb_id,
            app_id: c.app_id,
            subject: c.subject,
            remote_ip: c.remote_ip,
            location: detail.location.map(LocationResponse::from),
            created_at: c.created_at,
            messages: detail.messages.into_iter().map(MessageResponse::from).collect(),
            references: detail.references.into_iter().map(ReferenceResponse::from).collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    retention_sweeper: String,
}

//=========================================================================================
// Error Mapping and Request Helpers
//=========================================================================================

type HandlerError = (StatusCode, String);

fn port_error_status(e: &PortError) -> StatusCode {
    match e {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Unauthorized => StatusCode::UNAUTHORIZED,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Rejected nonces are client errors distinct from storage failures.
fn conversation_error_status(e: &ConversationError) -> StatusCode {
    match e {
        ConversationError::Nonce(NonceError::Invalid(_) | NonceError::NotFound(_)) => {
            StatusCode::FORBIDDEN
        }
        ConversationError::Nonce(NonceError::AlreadyUsed(_)) => StatusCode::CONFLICT,
        ConversationError::Nonce(NonceError::Store(p)) | ConversationError::Port(p) => {
            port_error_status(p)
        }
    }
}

fn port_failure(context: &str, e: PortError) -> HandlerError {
    let status = port_error_status(&e);
    if status.is_server_error() {
        error!("{}: {:?}", context, e);
        (status, context.to_string())
    } else {
        (status, e.to_string())
    }
}

fn conversation_failure(context: &str, e: ConversationError) -> HandlerError {
    let status = conversation_error_status(&e);
    if status.is_server_error() {
        error!("{}: {:?}", context, e);
        (status, context.to_string())
    } else {
        warn!("{}: {}", context, e);
        (status, e.to_string())
    }
}

/// The requester's address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or(real_ip)
        .map(str::to_string)
        .unwrap_or_else(|| peer.ip().to_string())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Issue a conversation id and the nonce required to create it.
#[utoipa::path(
    post,
    path = "/conversations/nonce",
    responses(
        (status = 201, description = "Nonce issued", body = IssueNonceResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn issue_nonce_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, HandlerError> {
    let issued = app_state
        .conversations
        .issue_conversation_nonce()
        .await
        .map_err(|e| conversation_failure("Failed to issue nonce", e))?;
    let response = IssueNonceResponse {
        conversation_id: issued.conversation_id,
        nonce: issued.nonce,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Create a conversation. The nonce is consumed; replays are rejected.
#[utoipa::path(
    post,
    path = "/conversations",
    request_body = CreateConversationRequest,
    responses(
        (status = 201, description = "Conversation created", body = CreateConversationResponse),
        (status = 403, description = "Nonce invalid or never issued"),
        (status = 409, description = "Nonce already used"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_conversation_handler(
    State(app_state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let conversation = Conversation {
        id: req.conversation_id,
        kb_id: req.kb_id,
        app_id: req.app_id,
        subject: req.subject,
        remote_ip: client_ip(&headers, peer),
        nonce: req.nonce,
        created_at: Utc::now(),
    };
    app_state
        .conversations
        .create_conversation(&conversation)
        .await
        .map_err(|e| conversation_failure("Failed to create conversation", e))?;

    let response = CreateConversationResponse {
        conversation_id: conversation.id,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Append a message; citations at the end of its content are stored as references.
#[utoipa::path(
    post,
    path = "/conversations/{id}/messages",
    request_body = CreateMessageRequest,
    responses(
        (status = 201, description = "Message stored", body = CreateMessageResponse),
        (status = 400, description = "Unknown role"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("id" = Uuid, Path, description = "Conversation id")
    )
)]
pub async fn create_message_handler(
    State(app_state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let role = req
        .role
        .parse::<MessageRole>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    let message = ConversationMessage {
        id: Uuid::new_v4(),
        conversation_id,
        app_id: req.app_id,
        role,
        content: req.content,
        created_at: Utc::now(),
    };
    let references = app_state
        .conversations
        .create_message(&req.kb_id, &message)
        .await
        .map_err(|e| port_failure("Failed to store message", e))?;

    let response = CreateMessageResponse {
        message_id: message.id,
        references: references.into_iter().map(ReferenceResponse::from).collect(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// List a knowledge base's conversations, newest first.
#[utoipa::path(
    get,
    path = "/conversations",
    params(ConversationListQuery),
    responses(
        (status = 200, description = "One page of conversations", body = ConversationListResponse),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_conversations_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<ConversationListResponse>, HandlerError> {
    let page = app_state
        .conversations
        .list_conversations(&query.into_filter())
        .await
        .map_err(|e| port_failure("Failed to list conversations", e))?;

    Ok(Json(ConversationListResponse {
        data: page
            .data
            .into_iter()
            .map(ConversationListItemResponse::from)
            .collect(),
        total: page.total,
    }))
}

/// Fetch a conversation with its messages and references.
#[utoipa::path(
    get,
    path = "/conversations/{id}",
    responses(
        (status = 200, description = "Conversation detail", body = ConversationDetailResponse),
        (status = 404, description = "Conversation not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("id" = Uuid, Path, description = "Conversation id")
    )
)]
pub async fn conversation_detail_handler(
    State(app_state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<ConversationDetailResponse>, HandlerError> {
    let detail = app_state
        .conversations
        .get_conversation_detail(conversation_id)
        .await
        .map_err(|e| port_failure("Failed to load conversation", e))?;
    Ok(Json(detail.into()))
}

/// The location most recently observed for a knowledge base.
#[utoipa::path(
    get,
    path = "/knowledge-bases/{kb_id}/location",
    responses(
        (status = 200, description = "Cached location", body = LocationResponse),
        (status = 404, description = "No location cached")
    ),
    params(
        ("kb_id" = String, Path, description = "Knowledge base id")
    )
)]
pub async fn kb_location_handler(
    State(app_state): State<Arc<AppState>>,
    Path(kb_id): Path<String>,
) -> Result<Json<LocationResponse>, HandlerError> {
    app_state
        .conversations
        .kb_location(&kb_id)
        .await
        .map(|l| Json(l.into()))
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("No location cached for knowledge base {}", kb_id),
            )
        })
}

/// Liveness plus the retention sweeper's current state.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_handler(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let sweeper = match app_state.sweeper.state() {
        SweeperState::Idle => "idle",
        SweeperState::Running => "running",
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        retention_sweeper: sweeper.to_string(),
    })
}
