// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event Channel (spec §4.5): a persistent, authenticated, bidirectional
//! transport with an explicit state machine and no implicit queueing.

mod backoff;
mod state;
pub mod types;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use backoff::BackoffPolicy;
pub use state::ChannelState;
pub use types::{EmitOutcome, InboundEvent, OutboundEvent};

#[derive(Debug, Clone)]
pub struct EventChannelConfig {
    pub url: String,
    pub agent_id: String,
    pub token: String,
    pub backoff: BackoffPolicy,
}

/// Handle to a running Event Channel. The connect/reconnect loop runs as a
/// detached task; this struct is the caller-facing surface.
pub struct EventChannel {
    state_rx: watch::Receiver<ChannelState>,
    outbound_tx: mpsc::UnboundedSender<OutboundEvent>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<InboundEvent>>,
}

impl EventChannel {
    /// Start connecting immediately and return a handle. The background
    /// loop runs until `cancel` fires or (for auth rejection) permanently
    /// settles in [`ChannelState::Suspended`].
    pub fn connect(config: EventChannelConfig, cancel: CancellationToken) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_loop(config, cancel, state_tx, outbound_rx, inbound_tx));

        Self { state_rx, outbound_tx, inbound_rx: Mutex::new(inbound_rx) }
    }

    pub fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    /// Wait until the channel reaches `Connected` at least once, or the
    /// channel is dropped/closes for good.
    pub async fn wait_for_connected(&self) -> bool {
        let mut rx = self.state_rx.clone();
        loop {
            if *rx.borrow() == ChannelState::Connected {
                return true;
            }
            if rx.borrow().eq(&ChannelState::Suspended) {
                return false;
            }
            if rx.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Emit an outbound event. Returns [`EmitOutcome::NotConnected`]
    /// immediately when the channel is not in `Connected` state; the caller
    /// is responsible for enqueueing into the Offline Queue in that case.
    pub fn emit(&self, event: OutboundEvent) -> EmitOutcome {
        if self.state() != ChannelState::Connected {
            return EmitOutcome::NotConnected;
        }
        match self.outbound_tx.send(event) {
            Ok(()) => EmitOutcome::Sent,
            Err(_) => EmitOutcome::NotConnected,
        }
    }

    /// Receive the next inbound event. Delivery is single-threaded and
    /// serialized to this one consumer per spec §4.5.
    pub async fn recv(&self) -> Option<InboundEvent> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Wait for the next state transition (for the Session Controller's
    /// suspension monitor). Returns the current state immediately if the
    /// watch has already closed.
    pub async fn changed(&self) -> ChannelState {
        let mut rx = self.state_rx.clone();
        if rx.changed().await.is_err() {
            return self.state();
        }
        *rx.borrow()
    }

    /// Build a handle with no background connect loop, for tests of
    /// consumers (Command Pipeline, Telemetry Producer) that only need to
    /// observe `emit`.
    #[cfg(test)]
    pub(crate) fn for_tests() -> (Self, watch::Sender<ChannelState>, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (Self { state_rx, outbound_tx, inbound_rx: Mutex::new(inbound_rx) }, state_tx, outbound_rx)
    }

    /// Like [`EventChannel::for_tests`] but keeps the inbound sender instead
    /// of the outbound receiver, for tests of consumers of `recv()` (the
    /// Session Controller's inbound dispatch loop).
    #[cfg(test)]
    pub(crate) fn for_tests_with_inbound() -> (Self, watch::Sender<ChannelState>, mpsc::UnboundedSender<InboundEvent>) {
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (Self { state_rx, outbound_tx, inbound_rx: Mutex::new(inbound_rx) }, state_tx, inbound_tx)
    }
}

async fn run_loop(
    config: EventChannelConfig,
    cancel: CancellationToken,
    state_tx: watch::Sender<ChannelState>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundEvent>,
    inbound_tx: mpsc::UnboundedSender<InboundEvent>,
) {
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            let _ = state_tx.send(ChannelState::Closing);
            return;
        }

        let _ = state_tx.send(ChannelState::Connecting);
        let request = match build_handshake_request(&config) {
            Ok(req) => req,
            Err(e) => {
                warn!(error = %e, "failed to build event channel handshake request");
                return;
            }
        };

        match tokio_tungstenite::connect_async(request).await {
            Ok((ws_stream, _response)) => {
                let _ = state_tx.send(ChannelState::Authenticating);
                let (mut write, mut read) = ws_stream.split();

                match wait_for_accept(&mut read, &cancel).await {
                    AcceptOutcome::Accepted => {
                        attempt = 0;
                        let _ = state_tx.send(ChannelState::Connected);
                        debug!("event channel connected");
                    }
                    AcceptOutcome::Rejected => {
                        warn!("event channel authentication rejected; suspending");
                        let _ = state_tx.send(ChannelState::Suspended);
                        return;
                    }
                    AcceptOutcome::Cancelled => {
                        let _ = state_tx.send(ChannelState::Closing);
                        return;
                    }
                    AcceptOutcome::Disconnected => {
                        let _ = state_tx.send(ChannelState::Disconnected);
                        continue_with_backoff(&config, &cancel, &mut attempt).await;
                        continue;
                    }
                }

                let disconnect_reason = drive_connection(&mut write, &mut read, &mut outbound_rx, &inbound_tx, &cancel).await;
                if matches!(disconnect_reason, DriveOutcome::Cancelled) {
                    let _ = state_tx.send(ChannelState::Closing);
                    return;
                }
                let _ = state_tx.send(ChannelState::Disconnected);
            }
            Err(e) => {
                warn!(error = %e, attempt, "event channel connect failed");
                let _ = state_tx.send(ChannelState::Disconnected);
            }
        }

        if config.backoff.exhausted(attempt) {
            warn!(attempt, "event channel reconnect attempts exhausted; giving up");
            let _ = state_tx.send(ChannelState::Suspended);
            return;
        }
        continue_with_backoff(&config, &cancel, &mut attempt).await;
    }
}

async fn continue_with_backoff(config: &EventChannelConfig, cancel: &CancellationToken, attempt: &mut u32) {
    let delay = config.backoff.delay_with_jitter(*attempt);
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
    *attempt += 1;
}

enum AcceptOutcome {
    Accepted,
    Rejected,
    Cancelled,
    Disconnected,
}

async fn wait_for_accept(
    read: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    cancel: &CancellationToken,
) -> AcceptOutcome {
    tokio::select! {
        _ = cancel.cancelled() => AcceptOutcome::Cancelled,
        msg = read.next() => match msg {
            Some(Ok(Message::Text(text))) => {
                #[derive(serde::Deserialize)]
                #[serde(tag = "type", rename_all = "snake_case")]
                enum Handshake {
                    Connect,
                    AuthError,
                }
                match serde_json::from_str::<Handshake>(&text) {
                    Ok(Handshake::Connect) => AcceptOutcome::Accepted,
                    Ok(Handshake::AuthError) => AcceptOutcome::Rejected,
                    Err(_) => AcceptOutcome::Disconnected,
                }
            }
            _ => AcceptOutcome::Disconnected,
        }
    }
}

enum DriveOutcome {
    Disconnected,
    Cancelled,
}

async fn drive_connection(
    write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    read: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    inbound_tx: &mpsc::UnboundedSender<InboundEvent>,
    cancel: &CancellationToken,
) -> DriveOutcome {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return DriveOutcome::Cancelled,

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<InboundEvent>(&text) {
                        Ok(event) => {
                            if inbound_tx.send(event).is_err() {
                                return DriveOutcome::Cancelled;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping unparseable inbound event"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => return DriveOutcome::Disconnected,
                Some(Err(e)) => {
                    warn!(error = %e, "event channel read error");
                    return DriveOutcome::Disconnected;
                }
                _ => {}
            },

            outbound = outbound_rx.recv() => match outbound {
                Some(event) => {
                    let Ok(text) = serde_json::to_string(&event) else {
                        warn!(kind = event.kind(), "failed to encode outbound event");
                        continue;
                    };
                    if write.send(Message::Text(text.into())).await.is_err() {
                        return DriveOutcome::Disconnected;
                    }
                }
                None => return DriveOutcome::Cancelled,
            },
        }
    }
}

fn build_handshake_request(
    config: &EventChannelConfig,
) -> Result<Request<()>, tokio_tungstenite::tungstenite::http::Error> {
    Request::builder()
        .uri(&config.url)
        .header("X-Agent-Channel-Type", "agent")
        .header("X-Agent-Id", &config.agent_id)
        .header("Authorization", format!("Bearer {}", config.token))
        .body(())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
