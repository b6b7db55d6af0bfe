//! Async cluster client.
//!
//! Routing mirrors the blocking client, with two differences in failure
//! handling: topology refreshes never run inline — they are spawned onto the
//! ambient tokio runtime and throttled to one per second with at most one in
//! flight — and commands targeted at an explicit node are delivered verbatim,
//! without redirect or retry handling.

use crate::cluster::{ClusterInner, ConnKind, Node, NodeIterator};
use crate::command::first_key_span;
use crate::config::{ClusterConfig, ClusterEvent};
use crate::error::{Result, RsvalkeyError, ServerErrorKind};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_str;
use crate::slot::hash_slot;

use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum spacing between topology refresh attempts.
const REFRESH_THROTTLE: Duration = Duration::from_micros(1_000_000);

#[derive(Default)]
struct RefreshState {
    /// A refresh task is currently running; new triggers are dropped.
    in_flight: bool,
    /// Completion time of the last attempt, successful or not.
    last_attempt: Option<Instant>,
}

/// State a spawned refresh task needs to outlive the caller.
struct AsyncShared {
    inner: Arc<ClusterInner>,
    refresh: Mutex<RefreshState>,
    disconnecting: AtomicBool,
}

enum Redirect {
    Moved(Arc<Node>),
    Ask(Arc<Node>),
    /// TRYAGAIN/CLUSTERDOWN: retry against the same node.
    Same(Arc<Node>),
}

/// Async Valkey Cluster client.
pub struct AsyncClusterClient {
    shared: Arc<AsyncShared>,
}

impl AsyncClusterClient {
    /// Connect using a comma-separated seed list.
    pub async fn connect(addrs: &str) -> Result<Self> {
        Self::connect_with_config(ClusterConfig::new(addrs)?).await
    }

    /// Connect with full configuration.
    ///
    /// With `blocking_initial_update` the first topology fetch completes
    /// before this returns (over short-lived blocking-path connections that
    /// are closed again); otherwise the fetch is fired off in the background
    /// and commands issued before it lands fail with an unserved-slot error.
    pub async fn connect_with_config(config: ClusterConfig) -> Result<Self> {
        let blocking_update = config.blocking_initial_update;
        let shared = Arc::new(AsyncShared {
            inner: Arc::new(ClusterInner::new(config)?),
            refresh: Mutex::new(RefreshState::default()),
            disconnecting: AtomicBool::new(false),
        });

        if blocking_update {
            shared.inner.refresh_blocking().await?;
            // The initial update ran on blocking-path connections; this
            // client speaks through the async slots only.
            let (nodes, _) = shared.inner.snapshot_nodes();
            for node in nodes {
                node.conn.lock().await.take();
            }
        } else {
            AsyncShared::spawn_refresh(&shared, None, false);
        }

        Ok(Self { shared })
    }

    /// Execute one key-routed command.
    ///
    /// Server errors other than cluster redirections are returned as a
    /// [`RespValue::Error`] value, exactly as received.
    pub async fn command(&self, args: &[&str]) -> Result<RespValue> {
        self.formatted_command(encode_command_str(args)).await
    }

    /// Execute an already-serialized command.
    pub async fn formatted_command(&self, wire: Vec<u8>) -> Result<RespValue> {
        self.execute_routed(wire).await
    }

    /// Execute a command on a specific node. No redirect or retry handling:
    /// MOVED/ASK/TRYAGAIN replies are delivered to the caller verbatim.
    pub async fn command_to_node(&self, node: &Arc<Node>, args: &[&str]) -> Result<RespValue> {
        self.execute_to_node(node, encode_command_str(args)).await
    }

    /// Trigger a topology refresh, subject to the single-flight guard but
    /// not the time throttle.
    pub fn refresh_topology(&self) {
        AsyncShared::spawn_refresh(&self.shared, None, false);
    }

    /// Reject new commands, then close every async connection.
    pub async fn disconnect(&self) {
        self.shared.disconnecting.store(true, Ordering::Relaxed);
        let (nodes, _) = self.shared.inner.snapshot_nodes();
        for node in nodes {
            let mut guard = node.aconn.lock().await;
            if guard.take().is_some() {
                node.async_connected.store(false, Ordering::Relaxed);
                if let Some(cb) = &self.shared.inner.config.async_disconnect_callback {
                    cb(node.addr(), true);
                }
            }
        }
    }

    /// The primary currently serving `key`'s slot.
    pub fn node_for_key(&self, key: &[u8]) -> Result<Arc<Node>> {
        self.shared.inner.node_for_slot(hash_slot(key))
    }

    /// The primary currently serving `slot`.
    pub fn node_for_slot(&self, slot: u16) -> Result<Arc<Node>> {
        self.shared.inner.node_for_slot(slot)
    }

    /// Iterate over the currently known nodes.
    pub fn node_iter(&self) -> NodeIterator {
        NodeIterator::new(self.shared.inner.clone())
    }

    /// Bumped on every topology install.
    pub fn route_version(&self) -> u64 {
        self.shared.inner.route_version()
    }

    /// Change the reply timeout for open and future connections.
    pub fn set_command_timeout(&self, timeout: Duration) {
        self.shared.inner.set_command_timeout(timeout);
    }

    async fn execute_routed(&self, wire: Vec<u8>) -> Result<RespValue> {
        let shared = &self.shared;
        let inner = &shared.inner;

        if shared.disconnecting.load(Ordering::Relaxed) {
            return Err(RsvalkeyError::Cluster("disconnecting".into()));
        }

        let span = first_key_span(&wire)?.ok_or_else(|| {
            RsvalkeyError::Cluster("command has no keys and cannot be key-routed".into())
        })?;
        let slot = hash_slot(&wire[span.0..span.0 + span.1]);

        let mut retries = 0u32;
        let mut redirect: Option<Redirect> = None;

        loop {
            let (node, asking) = match redirect.take() {
                Some(Redirect::Moved(node)) | Some(Redirect::Same(node)) => (node, false),
                Some(Redirect::Ask(node)) => (node, true),
                None => match inner.node_for_slot(slot) {
                    Ok(node) => (node, false),
                    Err(e) => {
                        AsyncShared::spawn_refresh(shared, None, true);
                        return Err(e);
                    }
                },
            };

            let mut guard = inner.ensure_conn(&node, ConnKind::Async).await?;
            let conn = guard.as_mut().expect("ensured above");

            if asking {
                if let Err(e) = conn.asking().await {
                    inner.discard_conn(&node, ConnKind::Async, &mut guard);
                    AsyncShared::spawn_refresh(shared, None, true);
                    return Err(e);
                }
            }

            conn.append(&wire);
            let reply = match conn.read_reply().await {
                Ok(reply) => reply,
                Err(e) => {
                    inner.discard_conn(&node, ConnKind::Async, &mut guard);
                    AsyncShared::spawn_refresh(shared, None, true);
                    return Err(e);
                }
            };
            drop(guard);

            // During a disconnect the raw reply is delivered, redirects
            // included, and no retry is attempted.
            if shared.disconnecting.load(Ordering::Relaxed) {
                return Ok(reply);
            }

            let kind = match reply.as_error_msg() {
                Some(msg) => ServerErrorKind::classify(msg),
                None => return Ok(reply),
            };
            if !kind.is_cluster_redirect() {
                return Ok(reply);
            }

            retries += 1;
            if retries > inner.config.max_retries {
                return Err(RsvalkeyError::TooManyRetries);
            }

            match kind {
                ServerErrorKind::Moved { slot: moved_slot, addr } => {
                    debug!(slot = moved_slot, %addr, "following MOVED redirect");
                    // Learn the full topology from the node that redirected.
                    AsyncShared::spawn_refresh(shared, Some(node.clone()), true);
                    let target = inner.redirect_node(&addr, node.host())?;
                    inner.set_slot_owner(moved_slot, &target);
                    redirect = Some(Redirect::Moved(target));
                }
                ServerErrorKind::Ask { addr, .. } => {
                    debug!(%addr, "following ASK redirect");
                    let target = inner.redirect_node(&addr, node.host())?;
                    redirect = Some(Redirect::Ask(target));
                }
                ServerErrorKind::TryAgain | ServerErrorKind::ClusterDown => {
                    redirect = Some(Redirect::Same(node));
                }
                _ => unreachable!("non-redirect kinds handled above"),
            }
        }
    }

    async fn execute_to_node(&self, node: &Arc<Node>, wire: Vec<u8>) -> Result<RespValue> {
        let shared = &self.shared;
        if shared.disconnecting.load(Ordering::Relaxed) {
            return Err(RsvalkeyError::Cluster("disconnecting".into()));
        }

        let mut guard = shared.inner.ensure_conn(node, ConnKind::Async).await?;
        let conn = guard.as_mut().expect("ensured above");
        conn.append(&wire);
        match conn.read_reply().await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                shared.inner.discard_conn(node, ConnKind::Async, &mut guard);
                AsyncShared::spawn_refresh(shared, None, true);
                Err(e)
            }
        }
    }
}

impl Drop for AsyncClusterClient {
    fn drop(&mut self) {
        self.shared.disconnecting.store(true, Ordering::Relaxed);
        self.shared.inner.config.fire_event(ClusterEvent::FreeContext);
    }
}

impl AsyncShared {
    /// Claim the refresh slot. With `throttled`, attempts younger than the
    /// throttle window are vetoed; either way only one refresh runs at a
    /// time and none run during a disconnect.
    fn try_begin_refresh(&self, throttled: bool) -> bool {
        if self.disconnecting.load(Ordering::Relaxed) {
            return false;
        }
        let mut state = self.refresh.lock();
        if state.in_flight {
            return false;
        }
        if throttled {
            if let Some(last) = state.last_attempt {
                if last.elapsed() < REFRESH_THROTTLE {
                    return false;
                }
            }
        }
        state.in_flight = true;
        true
    }

    fn finish_refresh(&self) {
        let mut state = self.refresh.lock();
        state.in_flight = false;
        state.last_attempt = Some(Instant::now());
    }

    /// Start a background topology refresh if the guards allow it.
    /// `preferred` is tried first, typically the node that sent a MOVED.
    fn spawn_refresh(shared: &Arc<AsyncShared>, preferred: Option<Arc<Node>>, throttled: bool) {
        if !shared.try_begin_refresh(throttled) {
            return;
        }
        let shared = shared.clone();
        tokio::spawn(async move {
            if let Err(e) = shared.refresh_once(preferred).await {
                warn!(error = %e, "background topology refresh failed");
            }
            shared.finish_refresh();
        });
    }

    /// One refresh pass: the preferred node first, then nodes picked by
    /// [`select_refresh_node`] until a reply installs or candidates run out.
    async fn refresh_once(&self, preferred: Option<Arc<Node>>) -> Result<()> {
        let mut last_err: Option<RsvalkeyError> = None;

        if let Some(node) = preferred {
            match self.refresh_via(&node).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }

        let (nodes, _) = self.inner.snapshot_nodes();
        for _ in 0..nodes.len() {
            let Some(node) = select_refresh_node(&self.inner) else {
                break;
            };
            match self.refresh_via(&node).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err
            .unwrap_or_else(|| RsvalkeyError::Cluster("no node available for topology refresh".into())))
    }

    async fn refresh_via(&self, node: &Arc<Node>) -> Result<()> {
        let mut guard = self.inner.ensure_conn(node, ConnKind::Async).await?;
        let conn = guard.as_mut().expect("ensured above");
        conn.append(&self.inner.refresh_wire());
        match conn.read_reply().await {
            Ok(reply) => {
                drop(guard);
                self.inner.apply_refresh_reply(reply, node.host())
            }
            Err(e) => {
                self.inner.discard_conn(node, ConnKind::Async, &mut guard);
                Err(e)
            }
        }
    }
}

/// Pick a node to refresh from.
///
/// Prefers a connected node found at or after a uniformly random index so
/// repeated refreshes spread across the cluster; when nothing is connected,
/// falls back to a node whose last connect attempt is older than the
/// throttle window (or that was never tried).
fn select_refresh_node(inner: &ClusterInner) -> Option<Arc<Node>> {
    let (nodes, _) = inner.snapshot_nodes();
    if nodes.is_empty() {
        return None;
    }
    let check_index = rand::thread_rng().gen_range(0..nodes.len());

    let mut selected: Option<Arc<Node>> = None;
    let mut selected_connected = false;
    for (i, node) in nodes.iter().enumerate() {
        if node.has_live_async_conn() {
            selected = Some(node.clone());
            selected_connected = true;
        } else {
            let last_attempt = *node.last_connect_attempt.lock();
            let attempt_is_stale = last_attempt.map_or(true, |t| t.elapsed() >= REFRESH_THROTTLE);
            if attempt_is_stale && (selected.is_none() || (i < check_index && !selected_connected))
            {
                selected = Some(node.clone());
                selected_connected = false;
            }
        }
        if i >= check_index && selected_connected {
            break;
        }
    }
    selected
}

// ── Tests ──────────────────────────────────────────────────────────
