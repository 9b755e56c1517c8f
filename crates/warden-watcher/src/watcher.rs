use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use warden_types::{EventBus, KindFilter, NormalizedEvent, Subscription};

use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::grammar::Grammar;
use crate::session::SessionState;

struct TailState {
    path: PathBuf,
    offset: u64,
    /// Bytes after the last newline, completed by a later poll.
    partial: Vec<u8>,
}

#[derive(Default)]
struct WatchState {
    session: SessionState,
    tail: Option<TailState>,
    /// Set after the first poll. A log file found before that is history.
    primed: bool,
    poll_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: WatcherConfig,
    log_dir: PathBuf,
    grammar: Grammar,
    bus: EventBus,
    state: Mutex<WatchState>,
    /// Serializes apply+publish against subscriber replay so a new consumer
    /// neither misses nor double-receives an event.
    feed: Mutex<()>,
}

/// Tails the client's output log and publishes what it reads.
///
/// The first log file found at startup is read silently to rebuild the
/// session; only lines appended afterwards, and every line of log files
/// created later, are published.
#[derive(Clone)]
pub struct ActivityWatcher {
    inner: Arc<Inner>,
}

impl ActivityWatcher {
    pub fn new(config: WatcherConfig, log_dir: PathBuf, bus: EventBus) -> Result<Self, WatcherError> {
        let grammar = Grammar::compile(&config.grammar)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                log_dir,
                grammar,
                bus,
                state: Mutex::new(WatchState::default()),
                feed: Mutex::new(()),
            }),
        })
    }

    /// Attaches `consumer` for events matching `filter`.
    ///
    /// The current state (location, world name, roster) is replayed to the
    /// consumer synchronously before it is attached. The polling loop is
    /// spawned on the first call. `consumer` must not call `start` itself.
    pub fn start<F>(&self, filter: impl Into<KindFilter>, consumer: F) -> Subscription
    where
        F: Fn(&NormalizedEvent) + Send + Sync + 'static,
    {
        let filter = filter.into();
        let _feed = lock(&self.inner.feed);

        let replay = {
            let mut state = lock(&self.inner.state);
            if state.poll_task.is_none() {
                state.poll_task = Some(tokio::spawn(Arc::clone(&self.inner).run()));
                tracing::info!(dir = %self.inner.log_dir.display(), "log watcher started");
            }
            state.session.replay()
        };

        for event in replay.iter().filter(|e| filter.matches(e.kind)) {
            consumer(event);
        }
        self.inner.bus.subscribe(filter, consumer)
    }

    /// Halts polling. Session state is kept; a later `start` resumes.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.inner.state).poll_task.take() {
            task.abort();
            tracing::info!("log watcher stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.state).poll_task.is_some()
    }

    /// Snapshot of the reconstructed session.
    pub fn session(&self) -> SessionState {
        lock(&self.inner.state).session.clone()
    }

    /// Reads whatever has been appended since the last poll.
    ///
    /// Returns the number of events published.
    pub async fn poll_once(&self) -> Result<usize, WatcherError> {
        self.inner.poll_once().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::error!("log watcher lock poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let interval = self.config.poll_interval();
        loop {
            if let Err(e) = self.poll_once().await {
                tracing::warn!(error = %e, "log poll failed");
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn poll_once(&self) -> Result<usize, WatcherError> {
        let latest = latest_log(&self.log_dir, &self.config.file_prefix).await?;
        let Some((path, len)) = latest else {
            lock(&self.state).primed = true;
            return Ok(0);
        };

        let (offset, publish) = {
            let mut state = lock(&self.state);
            let switched = state.tail.as_ref().map(|t| t.path != path).unwrap_or(true);
            if switched {
                // Catch up silently on the file that was already there at startup.
                let publish = state.primed;
                if publish {
                    tracing::info!(file = %path.display(), "new client log, session reset");
                    state.session.reset();
                } else {
                    tracing::info!(file = %path.display(), "rebuilding session from existing log");
                }
                state.primed = true;
                state.tail = Some(TailState {
                    path: path.clone(),
                    offset: 0,
                    partial: Vec::new(),
                });
                (0, publish)
            } else {
                let tail = match state.tail.as_mut() {
                    Some(tail) => tail,
                    None => return Ok(0),
                };
                if len < tail.offset {
                    tracing::info!(file = %path.display(), "client log truncated, rereading");
                    tail.offset = 0;
                    tail.partial.clear();
                }
                (tail.offset, true)
            }
        };

        if len <= offset {
            return Ok(0);
        }

        let mut file = tokio::fs::File::open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut chunk = Vec::new();
        file.take(len - offset).read_to_end(&mut chunk).await?;

        let _feed = lock(&self.feed);
        let events = {
            let mut state = lock(&self.state);
            let WatchState { session, tail, .. } = &mut *state;
            let tail = match tail.as_mut() {
                Some(tail) if tail.path == path && tail.offset == offset => tail,
                _ => return Ok(0),
            };
            tail.offset += chunk.len() as u64;
            tail.partial.extend_from_slice(&chunk);

            let mut events = Vec::new();
            let mut consumed = 0;
            while let Some(pos) = tail.partial[consumed..].iter().position(|b| *b == b'\n') {
                let raw = &tail.partial[consumed..consumed + pos];
                consumed += pos + 1;
                let line = String::from_utf8_lossy(raw);
                if let Some(parsed) = self.grammar.parse(&line) {
                    if let Some(event) = session.apply(parsed) {
                        events.push(event);
                    }
                }
            }
            tail.partial.drain(..consumed);
            events
        };

        if !publish {
            tracing::debug!(skipped = events.len(), "session rebuilt from existing log");
            return Ok(0);
        }
        let count = events.len();
        for event in events {
            self.bus.publish(event);
        }
        Ok(count)
    }
}

/// Finds the most recently modified `<prefix>*.txt` in `dir` and its length.
async fn latest_log(dir: &Path, prefix: &str) -> Result<Option<(PathBuf, u64)>, WatcherError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<(SystemTime, PathBuf, u64)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(prefix) || !name.ends_with(".txt") {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let path = entry.path();
        let newer = match &best {
            Some((best_time, best_path, _)) => (modified, &path) > (*best_time, best_path),
            None => true,
        };
        if newer {
            best = Some((modified, path, metadata.len()));
        }
    }
    Ok(best.map(|(_, path, len)| (path, len)))
}
