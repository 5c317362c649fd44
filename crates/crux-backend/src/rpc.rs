//! Server-side computed operations.
//!
//! These are the few places where the client asks the service to do the
//! arithmetic: role lookups, reaction toggles returning updated counts, and
//! the leaderboard aggregation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crux_types::api::{LeaderboardArgs, ReactionCounts, RoleResponse, ToggleReactionArgs};
use crux_types::models::LeaderboardEntry;

use crate::Backend;
use crate::error::BackendError;

impl Backend {
    async fn rpc<A, T>(&self, name: &str, args: &A) -> Result<T, BackendError>
    where
        A: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(&format!("/rpc/{name}"));
        let resp = self.authed(self.http.post(url).json(args)).send().await?;

        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// The calling user's club role.
    pub async fn current_role(&self) -> Result<RoleResponse, BackendError> {
        self.rpc("current_role", &serde_json::json!({})).await
    }

    /// Toggle the calling user's reaction and return the message's updated
    /// counts in one round trip.
    pub async fn toggle_reaction(
        &self,
        message_id: Uuid,
        emoji: &str,
    ) -> Result<ReactionCounts, BackendError> {
        self.rpc(
            "toggle_reaction",
            &ToggleReactionArgs { message_id, emoji: emoji.into() },
        )
        .await
    }

    /// Reaction counts for a batch of messages.
    pub async fn reaction_counts(
        &self,
        message_ids: &[Uuid],
    ) -> Result<Vec<ReactionCounts>, BackendError> {
        self.rpc(
            "reaction_counts",
            &serde_json::json!({ "message_ids": message_ids }),
        )
        .await
    }

    /// Aggregated leaderboard over the given window.
    pub async fn leaderboard(
        &self,
        window_days: u32,
    ) -> Result<Vec<LeaderboardEntry>, BackendError> {
        self.rpc("leaderboard", &LeaderboardArgs { window_days }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn toggle_reaction_decodes_counts() {
        let mut server = mockito::Server::new_async().await;
        let message_id = Uuid::new_v4();

        server
            .mock("POST", "/rpc/toggle_reaction")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "emoji": "💪",
            })))
            .with_status(200)
            .with_body(format!(
                r#"{{"message_id":"{message_id}","counts":[{{"emoji":"💪","count":3,"reacted":true}}]}}"#
            ))
            .create_async()
            .await;

        let backend = Backend::new(server.url());
        let counts = backend.toggle_reaction(message_id, "💪").await.unwrap();

        assert_eq!(counts.message_id, message_id);
        assert_eq!(counts.counts.len(), 1);
        assert!(counts.counts[0].reacted);
    }

    #[tokio::test]
    async fn rpc_denial_surfaces_as_denied() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/rpc/leaderboard")
            .with_status(403)
            .with_body(r#"{"message":"members only"}"#)
            .create_async()
            .await;

        let backend = Backend::new(server.url());
        let err = backend.leaderboard(30).await.unwrap_err();
        assert!(err.is_denied());
    }
}
