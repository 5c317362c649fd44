use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Member,
    Setter,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Discipline {
    Boulder,
    Sport,
    Trad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimbEvent {
    pub id: Uuid,
    pub title: String,
    pub location: String,
    pub discipline: Discipline,
    pub starts_at: DateTime<Utc>,
    /// None means unlimited.
    pub capacity: Option<u32>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One row per (event, user). The backend enforces uniqueness on that pair,
/// which is what makes duplicate joins benign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventParticipant {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    /// Carpool coordination: seats this participant can offer (0 = none).
    pub seats_offered: u32,
    pub needs_ride: bool,
    /// Free-form note about shared gear ("60m rope, 12 draws").
    pub gear_offered: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClimbGroup {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: Uuid,
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub display_name: String,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Chat room identifier. Rooms exist for groups and for events; on the wire
/// and in table rows this is a string like `group:<uuid>` / `event:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Group(Uuid),
    Event(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Group(id) => write!(f, "group:{id}"),
            Room::Event(id) => write!(f, "event:{id}"),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("malformed room id: {s}"))?;
        let id: Uuid = id.parse().map_err(|e| format!("bad room uuid: {e}"))?;
        match kind {
            "group" => Ok(Room::Group(id)),
            "event" => Ok(Room::Event(id)),
            other => Err(format!("unknown room kind: {other}")),
        }
    }
}

impl Serialize for Room {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Room {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room: Room,
    pub author_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReaction {
    pub id: Uuid,
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// Transient "user X is typing in room Y" marker. Refreshed on keystrokes,
/// deleted on stop/send, and expired locally after 10s without a refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingIndicator {
    pub room: Room,
    pub user_id: Uuid,
    pub display_name: String,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    /// Club-local grade string ("6b+", "V4").
    pub grade: String,
    pub sector: String,
    pub set_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetaPost {
    pub id: Uuid,
    pub route_id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GearCategory {
    Rope,
    Quickdraws,
    Cams,
    Crashpad,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GearItem {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub category: GearCategory,
    pub available: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingKind {
    Bouldering,
    Endurance,
    Strength,
    Flexibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TrainingKind,
    pub minutes: u32,
    /// 1 (easy) to 5 (max effort).
    pub intensity: u8,
    pub logged_at: DateTime<Utc>,
}

/// Server-side aggregate; clients never compute this locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub attendance: u32,
    pub training_minutes: u32,
    pub points: i64,
}
