//! Health / reconnect supervisor
//!
//! Owns the single upstream connection and drives it through
//! `Connecting → Connected → (Degraded) → Reconnecting → Connecting`.
//! The registry is the source of truth for what the connection carries: on
//! every open the full set of active streams is subscribed again, so nothing
//! is assumed to survive a reconnect at the exchange.
//!
//! Retries never stop. After `unavailable_after` consecutive failures the
//! upstream is flagged unavailable in the health status until the next open.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use relay_core::{
    ConnectionState, ControlFrame, RelayError, StreamKey, UpstreamConnection, UpstreamConnector,
    UpstreamEvent,
};

use crate::backoff::Backoff;
use crate::config::{ReconnectConfig, RelayConfig};
use crate::hub::RelayHub;
use crate::registry::SubscriptionCommand;

/// Supervisor tunables
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub reconnect: ReconnectConfig,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub max_streams_per_frame: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for SupervisorConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            ping_interval: config.upstream_ping_interval,
            pong_timeout: config.upstream_pong_timeout,
            max_streams_per_frame: config.max_streams_per_frame,
        }
    }
}

/// Why a connected session ended
enum SessionEnd {
    Lost(RelayError),
    Shutdown,
}

/// Handle to a spawned supervisor. Dropping it also stops the supervisor.
pub struct SupervisorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Close the upstream connection and wait for the supervisor to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("[Supervisor] Task ended abnormally: {}", e);
        }
    }
}

pub struct Supervisor<C: UpstreamConnector> {
    connector: C,
    hub: Arc<RelayHub>,
    commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    config: SupervisorConfig,
    backoff: Backoff,
}

impl<C: UpstreamConnector> Supervisor<C> {
    pub fn new(
        connector: C,
        hub: Arc<RelayHub>,
        commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
        config: SupervisorConfig,
    ) -> Self {
        let backoff = Backoff::from(&config.reconnect);
        Self {
            connector,
            hub,
            commands,
            config,
            backoff,
        }
    }

    /// Run on a background task
    pub fn spawn(self) -> SupervisorHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        SupervisorHandle { shutdown, task }
    }

    /// Supervise the upstream connection until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let status = Arc::clone(self.hub.status());
        status.set_target(self.connector.target());
        info!("[Supervisor] Starting upstream supervisor for {}", self.connector.target());

        loop {
            if *shutdown.borrow() {
                break;
            }

            status.set_state(ConnectionState::Connecting);
            let connected = tokio::select! {
                result = self.connector.connect() => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(mut conn) => {
                    status.record_open();
                    let opened_at = Instant::now();

                    let end = self.run_session(&mut conn, &mut shutdown).await;
                    conn.close().await;
                    self.backoff.record_session(opened_at.elapsed());

                    match end {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(err) => {
                            warn!("[Supervisor] Upstream connection lost: {}", err);
                            status.record_failure(&err);
                        }
                    }
                }
                Err(err) => {
                    let failures = status.record_failure(&err);
                    warn!(
                        "[Supervisor] Connect attempt {} failed: {}",
                        failures, err
                    );
                    if failures >= self.config.reconnect.unavailable_after {
                        let unavailable = RelayError::upstream_unavailable(failures, err.to_string());
                        warn!("[Supervisor] {}", unavailable);
                        status.set_unavailable(unavailable);
                    }
                }
            }

            status.set_state(ConnectionState::Reconnecting);
            let delay = self.backoff.next_delay();
            info!(
                "[Supervisor] Reconnecting in {:?} (attempt {})",
                delay,
                self.backoff.attempt()
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        status.set_state(ConnectionState::Disconnected);
        info!("[Supervisor] Stopped");
    }

    /// Replay active streams, then pump events until the session ends
    async fn run_session(
        &mut self,
        conn: &mut C::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let status = Arc::clone(self.hub.status());

        // Requests queued while disconnected are superseded by the replay
        let mut superseded = 0;
        while self.commands.try_recv().is_ok() {
            superseded += 1;
        }
        if superseded > 0 {
            debug!("[Supervisor] Discarded {} queued requests before replay", superseded);
        }

        let keys = self.hub.registry().active_keys();
        if !keys.is_empty() {
            info!("[Supervisor] Replaying {} subscriptions", keys.len());
        }
        for chunk in keys.chunks(self.config.max_streams_per_frame.max(1)) {
            if let Err(e) = conn.send(ControlFrame::Subscribe(chunk.to_vec())).await {
                return SessionEnd::Lost(e);
            }
        }

        status.set_state(ConnectionState::Connected);
        info!("[Supervisor] Upstream connected");

        let period = self.config.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                event = conn.recv() => {
                    // Any inbound traffic proves the connection is alive
                    pong_deadline = None;
                    match event {
                        Ok(UpstreamEvent::Envelope(envelope)) => {
                            status.record_message();
                            self.hub.publish(envelope);
                        }
                        Ok(UpstreamEvent::Ack { id }) => {
                            debug!("[Supervisor] Control frame {} acknowledged", id);
                        }
                        Ok(UpstreamEvent::Rejected { streams, message }) => {
                            // Local ref-counts stay authoritative; the next replay retries
                            let err = RelayError::subscription(join_keys(&streams), message);
                            warn!("[Supervisor] {}", err);
                        }
                        Ok(UpstreamEvent::Pong) => {}
                        Ok(UpstreamEvent::Closed { reason }) => {
                            let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                            return SessionEnd::Lost(RelayError::transport(format!(
                                "closed by upstream: {}",
                                reason
                            )));
                        }
                        Err(e) => return SessionEnd::Lost(e),
                    }
                }
                command = self.commands.recv() => {
                    let frame = match command {
                        Some(SubscriptionCommand::Subscribe(key)) => ControlFrame::Subscribe(vec![key]),
                        Some(SubscriptionCommand::Unsubscribe(key)) => ControlFrame::Unsubscribe(vec![key]),
                        None => return SessionEnd::Shutdown,
                    };
                    let unsubscribe = matches!(frame, ControlFrame::Unsubscribe(_));
                    if let Err(e) = conn.send(frame).await {
                        if unsubscribe {
                            debug!("[Supervisor] Unsubscribe not delivered: {}", e);
                        }
                        return SessionEnd::Lost(e);
                    }
                }
                _ = ping.tick() => {
                    if let Err(e) = conn.ping().await {
                        return SessionEnd::Lost(e);
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }
                _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                    status.set_state(ConnectionState::Degraded);
                    return SessionEnd::Lost(RelayError::transport(format!(
                        "no pong within {:?}",
                        self.config.pong_timeout
                    )));
                }
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            }
        }
    }
}

fn join_keys(keys: &[StreamKey]) -> String {
    keys.iter()
        .map(StreamKey::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
