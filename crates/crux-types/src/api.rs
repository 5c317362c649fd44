use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MemberRole;

// -- Auth --

#[derive(Debug, Serialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
}

#[derive(Debug, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Session as returned by the auth endpoints. The token is opaque to us —
/// it is attached to requests verbatim and never inspected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user_id: Uuid,
    pub display_name: String,
    pub expires_at: DateTime<Utc>,
}

// -- Remote procedures --

#[derive(Debug, Serialize)]
pub struct ToggleReactionArgs {
    pub message_id: Uuid,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: u32,
    /// Whether the calling user is among the reactors.
    pub reacted: bool,
}

/// Updated per-message counts returned by the reaction rpcs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionCounts {
    pub message_id: Uuid,
    pub counts: Vec<ReactionCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleResponse {
    pub role: MemberRole,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardArgs {
    /// Aggregation window in days.
    pub window_days: u32,
}
