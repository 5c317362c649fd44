pub mod api;
pub mod events;
pub mod models;

/// Change-feed topic names, matching backend table names.
pub mod topics {
    pub const EVENTS: &str = "events";
    pub const EVENT_PARTICIPANTS: &str = "event_participants";
    pub const GROUPS: &str = "groups";
    pub const GROUP_MEMBERS: &str = "group_members";
    pub const MESSAGES: &str = "messages";
    pub const MESSAGE_REACTIONS: &str = "message_reactions";
    pub const TYPING_INDICATORS: &str = "typing_indicators";
    pub const ROUTES: &str = "routes";
    pub const BETA_POSTS: &str = "beta_posts";
    pub const GEAR_ITEMS: &str = "gear_items";
    pub const TRAINING_SESSIONS: &str = "training_sessions";
    pub const PROFILES: &str = "profiles";

    /// Virtual topic for the aggregated leaderboard. Not a table — refreshed
    /// via rpc and nudged by attendance changes and relay broadcasts.
    pub const LEADERBOARD: &str = "leaderboard";
}
