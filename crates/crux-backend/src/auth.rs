//! Session handling for the hosted auth service.
//!
//! Tokens are opaque strings attached verbatim to requests; validation and
//! refresh policy live server-side. The interesting part here is the
//! auth-state stream: anything holding a receiver observes sign-in/out,
//! including the forced sign-out after a backend 401.

use std::sync::RwLock;

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crux_types::api::{Session, SignInRequest, SignUpRequest};

use crate::Backend;
use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    SignedIn { user_id: Uuid, display_name: String },
}

pub(crate) struct SessionStore {
    session: RwLock<Option<Session>>,
    state_tx: watch::Sender<AuthState>,
}

impl SessionStore {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(AuthState::SignedOut);
        Self {
            session: RwLock::new(None),
            state_tx,
        }
    }

    pub(crate) fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    pub(crate) fn current(&self) -> Option<Session> {
        self.session.read().expect("session lock poisoned").clone()
    }

    pub(crate) fn store(&self, session: Session) {
        let state = AuthState::SignedIn {
            user_id: session.user_id,
            display_name: session.display_name.clone(),
        };
        *self.session.write().expect("session lock poisoned") = Some(session);
        self.state_tx.send_replace(state);
    }

    pub(crate) fn clear(&self) {
        *self.session.write().expect("session lock poisoned") = None;
        self.state_tx.send_replace(AuthState::SignedOut);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }
}

impl Backend {
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Session, BackendError> {
        let req = SignUpRequest {
            email: email.into(),
            password: password.into(),
            display_name: display_name.into(),
        };
        let resp = self.http.post(self.url("/auth/signup")).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }

        let session: Session = resp.json().await?;
        info!("signed up as {}", session.display_name);
        self.sessions.store(session.clone());
        Ok(session)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let req = SignInRequest { email: email.into(), password: password.into() };
        let resp = self.http.post(self.url("/auth/signin")).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(self.fail(resp).await);
        }

        let session: Session = resp.json().await?;
        info!("signed in as {}", session.display_name);
        self.sessions.store(session.clone());
        Ok(session)
    }

    /// Revoke the session server-side and drop it locally. The local drop
    /// happens even if the revoke call fails — the caller asked to be out.
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        let had_session = self.sessions.current().is_some();
        let result = match self.sessions.access_token() {
            Some(_) => {
                let resp = self
                    .authed(self.http.post(self.url("/auth/signout")))
                    .send()
                    .await;
                match resp {
                    Ok(r) if r.status().is_success() => Ok(()),
                    Ok(r) => Err(self.fail(r).await),
                    Err(e) => Err(BackendError::Network(e)),
                }
            }
            None => Ok(()),
        };

        if had_session {
            self.sessions.clear();
        }
        result
    }

    /// The current session, if signed in.
    pub fn session(&self) -> Option<Session> {
        self.sessions.current()
    }

    /// Stream of auth-state changes. The receiver always reports the latest
    /// state on first read.
    pub fn auth_changes(&self) -> watch::Receiver<AuthState> {
        self.sessions.subscribe()
    }
}
