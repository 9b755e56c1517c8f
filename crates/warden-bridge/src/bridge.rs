use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;
use warden_api::TokenSource;
use warden_types::EventBus;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::message::{self, Fingerprint};
use crate::state::{ConnectionEvent, ConnectionStatus, Phase};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;

/// How long a manual teardown waits for the socket task to finish.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct SocketHandle {
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ConnectionState {
    phase: Phase,
    attempts: u32,
    connecting: bool,
    /// Set by operator teardown; suppresses automatic reconnects.
    manual: bool,
    /// Bumped on every connect and teardown. Callbacks carrying an older
    /// value belong to a superseded socket and are ignored.
    generation: u64,
    last_fingerprint: Option<Fingerprint>,
    connected_since: Option<DateTime<Utc>>,
    messages_received: u64,
    duplicates_dropped: u64,
    socket: Option<SocketHandle>,
    reconnect_timer: Option<JoinHandle<()>>,
    stability_timer: Option<JoinHandle<()>>,
}

enum CloseCause {
    Local,
    Remote(Option<String>),
    Failed(String),
}

struct Inner {
    config: BridgeConfig,
    tokens: Arc<dyn TokenSource>,
    bus: EventBus,
    events: broadcast::Sender<ConnectionEvent>,
    state: Mutex<ConnectionState>,
}

/// Maintains the push connection and publishes every accepted frame on the
/// event bus as a [`warden_types::NormalizedEvent`].
///
/// At most one socket is live at a time. Unexpected closes schedule a
/// reconnect with linear backoff; operator teardown does not.
#[derive(Clone)]
pub struct EventBridge {
    inner: Arc<Inner>,
}

impl EventBridge {
    pub fn new(config: BridgeConfig, tokens: Arc<dyn TokenSource>, bus: EventBus) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                tokens,
                bus,
                events,
                state: Mutex::new(ConnectionState::default()),
            }),
        }
    }

    /// Opens the push connection.
    ///
    /// # Errors
    ///
    /// Refused with `AlreadyConnected` / `ConnectInFlight` while a socket
    /// exists or another attempt is running. Token and transport failures
    /// are returned after a reconnect has been scheduled.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        Arc::clone(&self.inner).connect(true).await
    }

    /// Closes the connection and cancels every pending timer. No automatic
    /// reconnect follows.
    pub async fn disconnect(&self) {
        self.inner.teardown().await;
        tracing::info!("push connection stopped by operator");
    }

    /// Tears the connection down, clears connection state, waits the settle
    /// delay and connects again from scratch.
    pub async fn force_reconnect(&self) -> Result<(), BridgeError> {
        Arc::clone(&self.inner).force_reconnect().await
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.inner.lock();
        ConnectionStatus {
            phase: state.phase,
            attempts: state.attempts,
            connecting: state.connecting,
            manual: state.manual,
            last_fingerprint: state.last_fingerprint.map(hex::encode),
            connected_since: state.connected_since,
            messages_received: state.messages_received,
            duplicates_dropped: state.duplicates_dropped,
        }
    }

    /// Subscribes to connection lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("push connection state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is normal before the server attaches.
        let _ = self.events.send(event);
    }

    fn set_phase(&self, state: &mut ConnectionState, phase: Phase) {
        if state.phase != phase {
            state.phase = phase;
            tracing::debug!(phase = phase.as_str(), "push connection phase changed");
            self.emit(ConnectionEvent::PhaseChanged { phase });
        }
    }

    fn socket_url(&self, token: &str) -> Result<Url, BridgeError> {
        let mut url =
            Url::parse(&self.config.url).map_err(|e| BridgeError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("authToken", token);
        Ok(url)
    }

    /// Boxed so timers can call back into it from spawned tasks.
    fn connect(self: Arc<Self>, fresh: bool) -> BoxFuture<'static, Result<(), BridgeError>> {
        Box::pin(async move {
            let generation = {
                let mut state = self.lock();
                if state.socket.is_some() {
                    return Err(BridgeError::AlreadyConnected);
                }
                if state.connecting {
                    return Err(BridgeError::ConnectInFlight);
                }
                state.connecting = true;
                state.manual = false;
                if fresh {
                    state.attempts = 0;
                }
                if let Some(timer) = state.reconnect_timer.take() {
                    timer.abort();
                }
                state.generation += 1;
                self.set_phase(&mut state, Phase::Connecting);
                state.generation
            };

            let token = match self.tokens.pipeline_token().await {
                Ok(token) => token,
                Err(e) => {
                    tracing::warn!(error = %e, "push token unavailable");
                    self.attempt_failed(
                        generation,
                        ConnectionEvent::TokenUnavailable {
                            error: e.to_string(),
                        },
                    );
                    return Err(BridgeError::TokenUnavailable(e));
                }
            };

            let url = match self.socket_url(&token) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(error = %e, "cannot build push url");
                    let mut state = self.lock();
                    if state.generation == generation {
                        state.connecting = false;
                        self.set_phase(&mut state, Phase::Idle);
                        self.emit(ConnectionEvent::ConnectionError {
                            error: e.to_string(),
                        });
                    }
                    return Err(e);
                }
            };

            let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((socket, _response)) => socket,
                Err(e) => {
                    tracing::warn!(error = %e, "push connection failed");
                    self.attempt_failed(
                        generation,
                        ConnectionEvent::ConnectionError {
                            error: e.to_string(),
                        },
                    );
                    return Err(BridgeError::Connection(e.to_string()));
                }
            };

            let mut state = self.lock();
            if state.generation != generation || state.manual {
                tracing::debug!("discarding superseded push connection");
                return Err(BridgeError::Superseded);
            }

            state.connecting = false;
            state.attempts = 0;
            state.connected_since = Some(Utc::now());

            let (close, close_rx) = oneshot::channel();
            let task = tokio::spawn(Arc::clone(&self).run_socket(socket, close_rx, generation));
            state.socket = Some(SocketHandle { close, task });

            if let Some(interval) = self.config.stability_interval() {
                state.stability_timer = Some(self.spawn_stability_timer(interval, generation));
            }

            self.set_phase(&mut state, Phase::Connected);
            self.emit(ConnectionEvent::Connected);
            tracing::info!("push connection established");
            Ok(())
        })
    }

    /// Bookkeeping for a connect attempt that failed before a socket existed.
    fn attempt_failed(self: &Arc<Self>, generation: u64, event: ConnectionEvent) {
        let mut state = self.lock();
        if state.generation != generation {
            return;
        }
        state.connecting = false;
        self.emit(event);
        if state.manual {
            self.set_phase(&mut state, Phase::Idle);
            return;
        }
        self.schedule_reconnect(&mut state);
    }

    fn schedule_reconnect(self: &Arc<Self>, state: &mut ConnectionState) {
        state.attempts += 1;
        let attempt = state.attempts;

        if attempt > self.config.max_attempts {
            let attempts = attempt - 1;
            self.set_phase(state, Phase::Idle);
            tracing::error!(attempts, "push reconnect attempts exhausted");
            self.emit(ConnectionEvent::ReconnectFailed { attempts });
            return;
        }

        let delay = self.config.backoff(attempt);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.set_phase(state, Phase::ReconnectScheduled);
        self.emit(ConnectionEvent::ReconnectScheduled { attempt, delay_ms });
        tracing::info!(attempt, delay_ms, "push reconnect scheduled");

        let inner = Arc::clone(self);
        let generation = state.generation;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut state = inner.lock();
                if state.generation != generation || state.manual {
                    return;
                }
                // Detach our own handle so connect does not abort this task.
                state.reconnect_timer = None;
            }
            if let Err(e) = inner.connect(false).await {
                tracing::debug!(error = %e, "scheduled reconnect did not connect");
            }
        });

        if let Some(previous) = state.reconnect_timer.replace(timer) {
            previous.abort();
        }
    }

    fn spawn_stability_timer(self: &Arc<Self>, interval: Duration, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            {
                let mut state = inner.lock();
                if state.generation != generation {
                    return;
                }
                state.stability_timer = None;
            }
            tracing::info!(
                interval_secs = interval.as_secs(),
                "stability interval elapsed, forcing reconnect"
            );
            if let Err(e) = inner.force_reconnect().await {
                tracing::warn!(error = %e, "forced reconnect failed");
            }
        })
    }

    fn force_reconnect(self: Arc<Self>) -> BoxFuture<'static, Result<(), BridgeError>> {
        Box::pin(async move {
            tracing::info!("forcing push reconnect");
            self.teardown().await;

            let generation = {
                let mut state = self.lock();
                state.last_fingerprint = None;
                state.generation
            };

            tokio::time::sleep(self.config.settle_delay()).await;

            let current = self.lock().generation;
            if current != generation {
                tracing::debug!("forced reconnect overtaken during settle delay");
                return Err(BridgeError::Superseded);
            }
            self.connect(true).await
        })
    }

    /// Closes any live socket and cancels timers, leaving the bridge idle
    /// with automatic reconnects suppressed.
    async fn teardown(&self) {
        let socket = {
            let mut state = self.lock();
            state.manual = true;
            state.generation += 1;
            state.connecting = false;
            state.attempts = 0;
            state.connected_since = None;
            for timer in [state.reconnect_timer.take(), state.stability_timer.take()]
                .into_iter()
                .flatten()
            {
                timer.abort();
            }
            let socket = state.socket.take();
            if socket.is_some() {
                self.set_phase(&mut state, Phase::Closing);
            }
            socket
        };

        let had_socket = socket.is_some();
        if let Some(SocketHandle { close, task }) = socket {
            let _ = close.send(());
            let abort = task.abort_handle();
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                tracing::warn!("push socket did not close in time, aborting");
                abort.abort();
            }
        }

        let mut state = self.lock();
        self.set_phase(&mut state, Phase::Idle);
        if had_socket {
            self.emit(ConnectionEvent::Disconnected {
                manual: true,
                reason: None,
            });
        }
    }

    async fn run_socket(
        self: Arc<Self>,
        socket: Socket,
        mut close_rx: oneshot::Receiver<()>,
        generation: u64,
    ) {
        let (mut sink, mut stream) = socket.split();
        let cause = loop {
            tokio::select! {
                _ = &mut close_rx => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        tracing::debug!(error = %e, "close frame not delivered");
                    }
                    break CloseCause::Local;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_frame(text.as_bytes()),
                    Some(Ok(Message::Binary(bytes))) => self.handle_frame(&bytes),
                    Some(Ok(Message::Close(frame))) => {
                        break CloseCause::Remote(frame.map(|f| f.reason.as_str().to_string()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseCause::Failed(e.to_string()),
                    None => break CloseCause::Remote(None),
                },
            }
        };
        self.on_socket_closed(generation, cause);
    }

    fn handle_frame(&self, raw: &[u8]) {
        let fingerprint = message::fingerprint(raw);
        {
            let mut state = self.lock();
            if state.last_fingerprint == Some(fingerprint) {
                state.duplicates_dropped += 1;
                tracing::trace!("dropping duplicate push frame");
                return;
            }
            state.last_fingerprint = Some(fingerprint);
            state.messages_received += 1;
        }

        let message = match message::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, bytes = raw.len(), "ignoring malformed push frame");
                return;
            }
        };

        if let Some(err) = &message.err {
            tracing::warn!(error = %err, "push server reported an error");
            self.emit(ConnectionEvent::RemoteError {
                message: err.clone(),
            });
            return;
        }

        let event = message::normalize(&message);
        tracing::debug!(
            kind = event.kind.as_str(),
            remote_type = %message.kind,
            "push event received"
        );
        self.bus.publish(event);
    }

    fn on_socket_closed(self: &Arc<Self>, generation: u64, cause: CloseCause) {
        let mut state = self.lock();
        if state.generation != generation {
            tracing::debug!("ignoring close of superseded socket");
            return;
        }

        state.socket = None;
        state.connected_since = None;
        if let Some(timer) = state.stability_timer.take() {
            timer.abort();
        }
        self.set_phase(&mut state, Phase::Closing);

        let reason = match cause {
            CloseCause::Local => None,
            CloseCause::Remote(reason) => reason,
            CloseCause::Failed(error) => {
                self.emit(ConnectionEvent::ConnectionError {
                    error: error.clone(),
                });
                Some(error)
            }
        };
        tracing::info!(reason = ?reason, manual = state.manual, "push connection closed");
        self.emit(ConnectionEvent::Disconnected {
            manual: state.manual,
            reason,
        });

        if state.manual {
            self.set_phase(&mut state, Phase::Idle);
            return;
        }
        self.schedule_reconnect(&mut state);
    }
}
