//! Local-socket adapters between the dispatch core and neighbouring processes.
//!
//! - [`FeedListener`] accepts newline-delimited JSON [`FeedMessage`]s and writes them into the
//!   snapshot caches.
//! - [`IpcTrajectoryClient`] forwards trajectory goals to an executor process, one JSON line
//!   per goal.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use interprocess::local_socket::{LocalSocketListener, LocalSocketStream};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{JointStateCache, MarkerCache};
use crate::msgs::{FeedMessage, TrajectoryGoal};
use crate::{DispatchError, TrajectoryExecutor};

/// Delay between connection attempts while waiting for the executor.
const CONNECT_RETRY: Duration = Duration::from_millis(250);

/// Writes one feed message into the matching cache.
pub fn apply_feed_message(msg: FeedMessage, joints: &JointStateCache, markers: &MarkerCache) {
    match msg {
        FeedMessage::JointState(js) => joints.update(js),
        FeedMessage::VisibleMarkers(array) => markers.update_from_array(array),
    }
}

/// Listens for snapshot feeds on a local socket.
///
/// The accept loop runs on a dedicated thread; each connection gets its own reader thread.
/// Dropping the listener stops the accept loop and unlinks the socket. Reader threads end when
/// their peer disconnects.
#[derive(Debug)]
pub struct FeedListener {
    name: String,
    shutdown: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
}

impl FeedListener {
    pub fn bind(name: &str, joints: JointStateCache, markers: MarkerCache) -> Result<Self, DispatchError> {
        // Best-effort cleanup on Unix if a prior run left the socket path behind.
        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(name);
        }

        let listener = LocalSocketListener::bind(name)?;
        info!(socket = %name, "Feed listener bound");

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let accept = thread::Builder::new()
            .name("feed-accept".to_string())
            .spawn(move || accept_loop(listener, &stop, joints, markers))?;

        Ok(Self {
            name: name.to_string(),
            shutdown,
            accept: Some(accept),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for FeedListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);

        // Wake the blocked accept with a throwaway connection; only join if that worked.
        let woke = LocalSocketStream::connect(self.name.as_str()).is_ok();
        if let Some(accept) = self.accept.take() {
            if woke && accept.join().is_err() {
                warn!("Feed accept thread panicked");
            }
        }

        #[cfg(unix)]
        {
            let _ = std::fs::remove_file(&self.name);
        }
    }
}

fn accept_loop(
    listener: LocalSocketListener,
    shutdown: &AtomicBool,
    joints: JointStateCache,
    markers: MarkerCache,
) {
    for conn in listener.incoming() {
        if shutdown.load(Ordering::SeqCst) {
            debug!("Feed accept loop stopping");
            break;
        }

        let stream = match conn {
            Ok(s) => s,
            Err(e) => {
                warn!("Feed accept failed: {e}");
                continue;
            }
        };

        let joints = joints.clone();
        let markers = markers.clone();
        let spawned = thread::Builder::new()
            .name("feed-conn".to_string())
            .spawn(move || read_feed(stream, &joints, &markers));
        if let Err(e) = spawned {
            warn!("Could not start feed reader: {e}");
        }
    }
}

fn read_feed(stream: LocalSocketStream, joints: &JointStateCache, markers: &MarkerCache) {
    for line in BufReader::new(stream).lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                debug!("Feed connection closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<FeedMessage>(&line) {
            Ok(msg) => apply_feed_message(msg, joints, markers),
            Err(e) => warn!("Ignoring malformed feed message: {e}"),
        }
    }
}

/// The envelope written to the executor socket for each goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRequest {
    pub action: String,
    pub goal: TrajectoryGoal,
}

/// Sends goals to an executor process listening on a local socket.
pub struct IpcTrajectoryClient {
    name: String,
    action: String,
    stream: Arc<Mutex<Option<LocalSocketStream>>>,
}

impl std::fmt::Debug for IpcTrajectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcTrajectoryClient")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl IpcTrajectoryClient {
    pub fn new(name: &str, action: &str) -> Self {
        Self {
            name: name.to_string(),
            action: action.to_string(),
            stream: Arc::new(Mutex::new(None)),
        }
    }

    /// A write in progress counts as connected.
    pub fn is_connected(&self) -> bool {
        match self.stream.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
            Err(TryLockError::WouldBlock) => true,
        }
    }

    async fn connect(&self) -> Result<(), DispatchError> {
        let name = self.name.clone();
        let stream = tokio::task::spawn_blocking(move || LocalSocketStream::connect(name.as_str()))
            .await
            .map_err(io::Error::other)??;
        *lock(&self.stream) = Some(stream);
        Ok(())
    }
}

fn lock(slot: &Mutex<Option<LocalSocketStream>>) -> MutexGuard<'_, Option<LocalSocketStream>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TrajectoryExecutor for IpcTrajectoryClient {
    async fn wait_for_server(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.connect().await {
                Ok(()) => return true,
                Err(e) => debug!(name = %self.name, "Executor not reachable yet: {e}"),
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(CONNECT_RETRY.min(deadline - now)).await;
        }
    }

    /// Never queues: if a previous goal is still being written, this goal is dropped with
    /// [`DispatchError::ExecutorBusy`].
    async fn send_goal(&self, goal: TrajectoryGoal) -> Result<(), DispatchError> {
        let request = GoalRequest {
            action: self.action.clone(),
            goal,
        };
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');

        let slot = Arc::clone(&self.stream);
        tokio::task::spawn_blocking(move || -> Result<(), DispatchError> {
            let mut guard = match slot.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return Err(DispatchError::ExecutorBusy),
            };
            let stream = guard.as_mut().ok_or(DispatchError::NotConnected)?;
            stream.write_all(&line)?;
            stream.flush()?;
            Ok(())
        })
        .await
        .map_err(io::Error::other)?
    }
}
