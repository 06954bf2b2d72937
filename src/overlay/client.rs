//! Native overlay client: persistent WebSocket, reconnect, and resync.
//!
//! A connection loss is never a hard failure. The client sleeps out a
//! reconnect delay and, independently of whether the reconnect succeeds,
//! pulls the latest state over `GET /api/current` before each attempt, so a
//! broadcast missed entirely during the outage window still lands.

use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use tungstenite::Message;

use super::renderer::OverlayElement;
use crate::protocol::{CurrentState, OverlayMessage};

/// Base delay before a reconnect attempt, matching the reference overlay.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Backoff ceiling so a long outage never waits more than this between tries.
pub const RECONNECT_CAP: Duration = Duration::from_secs(30);

const RENDER_TICK: Duration = Duration::from_millis(16);

/// Client-side failures. All of them self-heal through the reconnect loop;
/// none terminate the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("overlay connection lost: {reason}")]
    ConnectionLost { reason: String },
    #[error("undecodable overlay payload: {reason}")]
    MalformedMessage { reason: String },
}

/// Grows the wait between reconnect attempts, never below the base delay.
#[derive(Debug)]
pub struct ReconnectSchedule {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Delay to sleep before the next attempt: base, then half again longer
    /// each consecutive failure, capped.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1.5_f64.powi(self.attempt.min(8) as i32);
        self.attempt = self.attempt.saturating_add(1);
        self.base.mul_f64(factor).min(self.cap)
    }

    /// A successful connection restores the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for ReconnectSchedule {
    fn default() -> Self {
        Self::new(RECONNECT_DELAY, RECONNECT_CAP)
    }
}

pub struct OverlayClient {
    /// Server authority, e.g. `127.0.0.1:7474`.
    server: String,
    element: OverlayElement,
    schedule: ReconnectSchedule,
    started: Instant,
}

impl OverlayClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self::with_schedule(server, ReconnectSchedule::default())
    }

    /// Like [`OverlayClient::new`] with an explicit reconnect schedule.
    pub fn with_schedule(server: impl Into<String>, schedule: ReconnectSchedule) -> Self {
        Self {
            server: server.into(),
            element: OverlayElement::new(),
            schedule,
            started: Instant::now(),
        }
    }

    pub fn element(&self) -> &OverlayElement {
        &self.element
    }

    /// Connect-and-render loop. Runs until the task is cancelled.
    pub async fn run(&mut self, mut on_render: impl FnMut(&OverlayElement)) {
        loop {
            // Fallback pull first; it fires whether or not the socket comes up.
            match self.fetch_current().await {
                Ok(current) => self.apply_current(&current, &mut on_render),
                Err(err) => debug!("state pull failed: {err}"),
            }

            let url = format!("ws://{}", self.server);
            match connect_async(&url).await {
                Ok((stream, _)) => {
                    info!("connected to overlay server at {url}");
                    self.schedule.reset();
                    self.pump(stream, &mut on_render).await;
                    warn!("disconnected from overlay server");
                }
                Err(err) => {
                    debug!("connect to {url} failed: {err}");
                }
            }

            let delay = self.schedule.next_delay();
            debug!("reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
        }
    }

    /// Read pushes and drive render ticks until the connection drops.
    async fn pump(
        &mut self,
        mut stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        on_render: &mut impl FnMut(&OverlayElement),
    ) {
        let mut ticker = tokio::time::interval(RENDER_TICK);
        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(err) = self.handle_text(&text, on_render) {
                            // Undecodable payloads are dropped; the
                            // connection stays alive.
                            warn!("{err}");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!("websocket read error: {err}");
                        return;
                    }
                },
                _ = ticker.tick() => {
                    if self.element.tick(self.now_ms()) {
                        on_render(&self.element);
                    }
                }
            }
        }
    }

    /// Apply one text frame from the server.
    pub fn handle_text(
        &mut self,
        text: &str,
        on_render: &mut impl FnMut(&OverlayElement),
    ) -> Result<(), ClientError> {
        let message: OverlayMessage =
            serde_json::from_str(text).map_err(|err| ClientError::MalformedMessage {
                reason: err.to_string(),
            })?;
        match message {
            OverlayMessage::State {
                data,
                transition,
                duration,
            } => {
                let now = self.now_ms();
                if self.element.apply(&data, transition, duration, now) {
                    on_render(&self.element);
                }
            }
            OverlayMessage::Unknown => {
                debug!("ignoring unrecognized message type");
            }
        }
        Ok(())
    }

    fn apply_current(&mut self, current: &CurrentState, on_render: &mut impl FnMut(&OverlayElement)) {
        let Some(state) = &current.state else {
            return;
        };
        let now = self.now_ms();
        if self
            .element
            .apply(state, current.transition, current.duration, now)
        {
            on_render(&self.element);
        }
    }

    async fn fetch_current(&self) -> Result<CurrentState, ClientError> {
        let uri: hyper::Uri = format!("http://{}/api/current", self.server)
            .parse()
            .map_err(|err| ClientError::ConnectionLost {
                reason: format!("bad server address: {err}"),
            })?;
        let response = hyper::Client::new().get(uri).await.map_err(|err| {
            ClientError::ConnectionLost {
                reason: err.to_string(),
            }
        })?;
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|err| ClientError::ConnectionLost {
                reason: err.to_string(),
            })?;
        serde_json::from_slice(&body).map_err(|err| ClientError::MalformedMessage {
            reason: err.to_string(),
        })
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}
