//! Realtime socket lifecycle.
//!
//! One websocket per client instance carries every change-feed channel and
//! the relay. The connection task owns the socket; everything else talks to
//! it through the command queue (so subscribes issued while offline are
//! replayed once the socket is back) and observes it through a
//! [`ConnectionState`] watch — dependents that need a polling fallback can
//! see `Disconnected`/`Reconnecting` instead of silently going stale.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crux_types::events::{ClientCommand, ServerFrame};

use crate::channels::ChannelRegistry;
use crate::relay::RelayHub;
use crate::RealtimeError;

/// Client pings every 15 seconds; two consecutive missed pongs (~30s) drop
/// the connection and enter the reconnect loop.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: String,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl RealtimeConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_base: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Supplies the current access token at (re)connect time, so a socket opened
/// after re-authentication identifies with the fresh token.
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

pub struct RealtimeClient {
    registry: Arc<ChannelRegistry>,
    relay: Arc<RelayHub>,
    state_rx: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl RealtimeClient {
    /// Spawn the connection task and return the handle bundle. The task runs
    /// until `cancel` fires.
    pub fn connect(config: RealtimeConfig, tokens: TokenProvider, cancel: CancellationToken) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(ChannelRegistry::new(cmd_tx.clone()));
        let relay = Arc::new(RelayHub::new(cmd_tx));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        tokio::spawn(run(
            config,
            tokens,
            cmd_rx,
            registry.clone(),
            relay.clone(),
            state_tx,
            cancel.clone(),
        ));

        Self { registry, relay, state_rx, cancel }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<RelayHub> {
        &self.relay
    }

    /// Observable connection state; always reports the latest value on first
    /// read.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn run(
    config: RealtimeConfig,
    tokens: TokenProvider,
    mut commands: mpsc::UnboundedReceiver<ClientCommand>,
    registry: Arc<ChannelRegistry>,
    relay: Arc<RelayHub>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        state_tx.send_replace(if attempt == 0 {
            ConnectionState::Connecting
        } else {
            ConnectionState::Reconnecting
        });

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connect_once(&config, &tokens) => result,
        };

        match outcome {
            Ok((ws, token)) => {
                attempt = 0;
                state_tx.send_replace(ConnectionState::Connected);
                info!("realtime socket connected to {}", config.url);

                if let Err(e) =
                    session(ws, token, &mut commands, &registry, &relay, &cancel).await
                {
                    warn!("realtime session ended: {}", e);
                }
                state_tx.send_replace(ConnectionState::Disconnected);
            }
            Err(e) => {
                warn!("realtime connect failed: {}", e);
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        attempt += 1;
        let delay = backoff(attempt, config.reconnect_base, config.reconnect_max);
        debug!("reconnecting in {:?} (attempt {})", delay, attempt);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    state_tx.send_replace(ConnectionState::Disconnected);
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_once(
    config: &RealtimeConfig,
    tokens: &TokenProvider,
) -> Result<(Socket, String), RealtimeError> {
    // Without a session there is nothing to identify with; treat it like a
    // failed attempt so the backoff loop keeps polling for sign-in.
    let token = tokens().ok_or(RealtimeError::NoToken)?;
    let (ws, _) = tokio_tungstenite::connect_async(&config.url).await?;
    Ok((ws, token))
}

/// Drive one established connection until it drops or `cancel` fires.
async fn session(
    mut ws: Socket,
    token: String,
    commands: &mut mpsc::UnboundedReceiver<ClientCommand>,
    registry: &ChannelRegistry,
    relay: &RelayHub,
    cancel: &CancellationToken,
) -> Result<(), RealtimeError> {
    // Identify, then replay every live subscription — this is what makes
    // subscribe-before-connect and reconnects transparent to consumers.
    send_command(&mut ws, &ClientCommand::Identify { token }).await?;
    for key in registry.active_keys() {
        send_command(&mut ws, &ClientCommand::Subscribe { key }).await?;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut pong_received = true;
    let mut missed_pongs: u8 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.send(Message::Close(None)).await;
                return Ok(());
            }

            Some(cmd) = commands.recv() => {
                send_command(&mut ws, &cmd).await?;
            }

            frame = ws.next() => {
                let Some(frame) = frame else { return Ok(()) };
                match frame? {
                    Message::Text(text) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(frame) => handle_frame(frame, registry, relay),
                        Err(e) => warn!(
                            "bad realtime frame: {} -- raw: {}",
                            e,
                            &text.as_str()[..text.len().min(200)]
                        ),
                    },
                    Message::Ping(payload) => {
                        ws.send(Message::Pong(payload)).await?;
                    }
                    Message::Pong(_) => {
                        pong_received = true;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }

            _ = heartbeat.tick() => {
                if pong_received {
                    missed_pongs = 0;
                } else {
                    missed_pongs += 1;
                    if missed_pongs >= MAX_MISSED_PONGS {
                        warn!("heartbeat timeout (missed {} pongs), reconnecting", missed_pongs);
                        return Err(RealtimeError::Closed);
                    }
                }
                pong_received = false;
                ws.send(Message::Ping(Vec::new().into())).await?;
            }
        }
    }
}

fn handle_frame(frame: ServerFrame, registry: &ChannelRegistry, relay: &RelayHub) {
    match frame {
        ServerFrame::Ready { user_id } => {
            info!("realtime identified as {}", user_id);
        }
        ServerFrame::Change(event) => {
            registry.dispatch(event);
        }
        ServerFrame::Broadcast(message) => {
            relay.dispatch(message);
        }
        ServerFrame::Subscribed { key } => {
            debug!("subscribed to {:?}", key);
        }
        ServerFrame::Unsubscribed { key } => {
            debug!("unsubscribed from {:?}", key);
        }
        ServerFrame::Error { message } => {
            warn!("realtime server error: {}", message);
        }
    }
}

async fn send_command(ws: &mut Socket, cmd: &ClientCommand) -> Result<(), RealtimeError> {
    let text = serde_json::to_string(cmd)?;
    ws.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Exponential backoff with jitter in [0.5, 1.5) of the nominal delay.
fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let nominal = base.saturating_mul(1u32 << attempt.min(16).saturating_sub(1));
    let nominal = nominal.min(max);
    let jitter: f64 = rand::rng().random_range(0.5..1.5);
    Duration::from_secs_f64(nominal.as_secs_f64() * jitter).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(30);

        let first = backoff(1, base, max);
        assert!(first >= Duration::from_millis(250));
        assert!(first < Duration::from_millis(750));

        // Deep attempts stay at the cap regardless of jitter.
        let deep = backoff(30, base, max);
        assert!(deep <= max);
        assert!(deep >= Duration::from_secs(15));
    }

    #[tokio::test]
    async fn client_starts_disconnected_until_connect_attempt() {
        let cancel = CancellationToken::new();
        let tokens: TokenProvider = Arc::new(|| None);
        let client = RealtimeClient::connect(
            RealtimeConfig::new("ws://127.0.0.1:1"),
            tokens,
            cancel.clone(),
        );

        // No token: the task cycles between Connecting and Disconnected,
        // never reaching Connected.
        let state = *client.state().borrow();
        assert_ne!(state, ConnectionState::Connected);
        cancel.cancel();
    }
}
