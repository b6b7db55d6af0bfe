//! Blocking cluster client.
//!
//! Public methods are synchronous; I/O runs on the crate-global tokio runtime
//! via [`runtime::block_on`]. A routed command walks the slot table, sends on
//! the owning node's connection, and follows MOVED/ASK/TRYAGAIN/CLUSTERDOWN
//! replies until it has a real answer or the retry budget is spent. A
//! scheduled topology refresh is piggybacked onto an already-used connection
//! whenever possible so it costs no extra round trip.

use crate::cluster::{ClusterInner, ConnKind, Node, NodeIterator};
use crate::command::first_key_span;
use crate::config::{ClusterConfig, ClusterEvent};
use crate::error::{Result, RsvalkeyError, ServerErrorKind};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_str;
use crate::runtime;
use crate::slot::hash_slot;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A pipelined command awaiting its reply.
struct QueuedRequest {
    /// Slot the command was routed by, or `None` for targeted sends.
    slot: Option<u16>,
    /// Explicit target address for `append_command_to_node`.
    target: Option<String>,
}

/// Redirect state carried between attempts of one command.
enum Redirect {
    Moved(Arc<Node>),
    Ask(Arc<Node>),
}

/// Blocking Valkey Cluster client.
pub struct ClusterClient {
    inner: Arc<ClusterInner>,
    /// FIFO of pipelined commands; replies are collected in this order.
    requests: Mutex<VecDeque<QueuedRequest>>,
}

impl ClusterClient {
    /// Connect using a comma-separated seed list, e.g. `"127.0.0.1:7000"`.
    pub fn connect(addrs: &str) -> Result<Self> {
        Self::connect_with_config(ClusterConfig::new(addrs)?)
    }

    /// Connect with a connect timeout applied to every node.
    pub fn connect_with_timeout(addrs: &str, timeout: Duration) -> Result<Self> {
        Self::connect_with_config(ClusterConfig::new(addrs)?.connect_timeout(timeout))
    }

    /// Connect with full configuration. Performs the initial topology fetch
    /// before returning.
    pub fn connect_with_config(config: ClusterConfig) -> Result<Self> {
        let inner = Arc::new(ClusterInner::new(config)?);
        runtime::block_on(inner.refresh_blocking())?;
        Ok(Self {
            inner,
            requests: Mutex::new(VecDeque::new()),
        })
    }

    /// Execute one key-routed command and block for its reply.
    ///
    /// Server errors other than cluster redirections are returned as a
    /// [`RespValue::Error`] value, exactly as received.
    pub fn command(&self, args: &[&str]) -> Result<RespValue> {
        self.formatted_command(encode_command_str(args))
    }

    /// Execute an already-serialized command.
    pub fn formatted_command(&self, wire: Vec<u8>) -> Result<RespValue> {
        runtime::block_on(self.execute_routed(wire))
    }

    /// Execute a command on a specific node, bypassing key routing and
    /// redirect handling.
    pub fn command_to_node(&self, node: &Arc<Node>, args: &[&str]) -> Result<RespValue> {
        let wire = encode_command_str(args);
        runtime::block_on(self.execute_to_node(node, wire))
    }

    /// Route a command and write it out without reading the reply.
    /// Collect replies in submission order with [`ClusterClient::get_reply`].
    pub fn append_command(&self, args: &[&str]) -> Result<()> {
        let wire = encode_command_str(args);
        runtime::block_on(async {
            let slot = self.slot_of(&wire)?;
            let node = self.inner.node_for_slot(slot)?;
            let mut guard = self.inner.ensure_conn(&node, ConnKind::Sync).await?;
            guard.as_mut().expect("ensured above").append(&wire);
            self.requests.lock().push_back(QueuedRequest {
                slot: Some(slot),
                target: None,
            });
            Ok(())
        })
    }

    /// Write a command for a specific node without reading the reply.
    pub fn append_command_to_node(&self, node: &Arc<Node>, args: &[&str]) -> Result<()> {
        let wire = encode_command_str(args);
        runtime::block_on(async {
            let mut guard = self.inner.ensure_conn(node, ConnKind::Sync).await?;
            guard.as_mut().expect("ensured above").append(&wire);
            self.requests.lock().push_back(QueuedRequest {
                slot: None,
                target: Some(node.addr().to_string()),
            });
            Ok(())
        })
    }

    /// Read the reply for the oldest appended command.
    /// Returns `Ok(None)` when no commands are pending.
    pub fn get_reply(&self) -> Result<Option<RespValue>> {
        runtime::block_on(self.get_reply_inner())
    }

    /// Drain pending pipeline replies, closing connections on failure, and
    /// apply a scheduled topology refresh if one is due.
    pub fn reset(&self) {
        runtime::block_on(async {
            loop {
                match self.get_reply_inner().await {
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(_) => {
                        self.close_all_connections().await;
                        break;
                    }
                }
            }
            self.requests.lock().clear();
            if self.inner.need_refresh.load(Ordering::Relaxed) {
                let _ = self.inner.refresh_blocking().await;
            }
        })
    }

    /// Fetch a fresh topology from any reachable node and install it.
    pub fn update_slotmap(&self) -> Result<()> {
        runtime::block_on(self.inner.refresh_blocking())
    }

    /// The primary currently serving `key`'s slot.
    pub fn node_for_key(&self, key: &[u8]) -> Result<Arc<Node>> {
        self.inner.node_for_slot(hash_slot(key))
    }

    /// The primary currently serving `slot`.
    pub fn node_for_slot(&self, slot: u16) -> Result<Arc<Node>> {
        self.inner.node_for_slot(slot)
    }

    /// Iterate over the currently known nodes.
    pub fn node_iter(&self) -> NodeIterator {
        NodeIterator::new(self.inner.clone())
    }

    /// Bumped on every topology install.
    pub fn route_version(&self) -> u64 {
        self.inner.route_version()
    }

    /// Change the reply timeout for open and future connections.
    pub fn set_command_timeout(&self, timeout: Duration) {
        self.inner.set_command_timeout(timeout);
    }

    fn slot_of(&self, wire: &[u8]) -> Result<u16> {
        let span = first_key_span(wire)?.ok_or_else(|| {
            RsvalkeyError::Cluster("command has no keys and cannot be key-routed".into())
        })?;
        Ok(hash_slot(&wire[span.0..span.0 + span.1]))
    }

    /// One routed command: the route → connect → send → receive → classify
    /// loop, with a piggybacked refresh drained at the end.
    async fn execute_routed(&self, wire: Vec<u8>) -> Result<RespValue> {
        let inner = &self.inner;
        let slot = self.slot_of(&wire)?;

        let mut retries = 0u32;
        let mut redirect: Option<Redirect> = None;
        let mut connect_retried = false;
        // Node whose connection carries an unread piggybacked refresh reply.
        let mut refresh_carrier: Option<Arc<Node>> = None;

        let mut result = loop {
            // Route. A slot without an owner triggers one refresh, then a
            // single re-check.
            let from_redirect = redirect.is_some();
            let (node, asking) = match redirect.take() {
                Some(Redirect::Moved(node)) => (node, false),
                Some(Redirect::Ask(node)) => (node, true),
                None => match inner.node_for_slot(slot) {
                    Ok(node) => (node, false),
                    Err(_) => {
                        if refresh_carrier.is_none() {
                            match inner.refresh_blocking().await {
                                Ok(()) => {}
                                Err(e) => break Err(e),
                            }
                        }
                        match inner.node_for_slot(slot) {
                            Ok(node) => (node, false),
                            Err(e) => break Err(e),
                        }
                    }
                },
            };

            // Connect. A connection failure on the routed node may mean a
            // failover; refresh once and retry against the new owner.
            let mut guard = match inner.ensure_conn(&node, ConnKind::Sync).await {
                Ok(guard) => guard,
                Err(e) => {
                    if connect_retried || from_redirect || refresh_carrier.is_some() {
                        break Err(e);
                    }
                    connect_retried = true;
                    if let Err(e) = inner.refresh_blocking().await {
                        break Err(e);
                    }
                    continue;
                }
            };
            let conn = guard.as_mut().expect("ensured above");

            if asking {
                if let Err(e) = conn.asking().await {
                    inner.discard_conn(&node, ConnKind::Sync, &mut guard);
                    inner.need_refresh.store(true, Ordering::Relaxed);
                    break Err(e);
                }
            }

            // Send, and piggyback a scheduled refresh in the same flush.
            conn.append(&wire);
            if refresh_carrier.is_none() && inner.need_refresh.load(Ordering::Relaxed) {
                conn.append(&inner.refresh_wire());
                refresh_carrier = Some(node.clone());
            }

            // Receive.
            let reply = match conn.read_reply().await {
                Ok(reply) => reply,
                Err(e) => {
                    if matches!(&refresh_carrier, Some(c) if Arc::ptr_eq(c, &node)) {
                        refresh_carrier = None;
                    }
                    inner.discard_conn(&node, ConnKind::Sync, &mut guard);
                    inner.need_refresh.store(true, Ordering::Relaxed);
                    break Err(e);
                }
            };

            // Classify.
            let kind = match reply.as_error_msg() {
                Some(msg) => ServerErrorKind::classify(msg),
                None => {
                    drop(guard);
                    break Ok(reply);
                }
            };
            if !kind.is_cluster_redirect() {
                drop(guard);
                break Ok(reply);
            }

            retries += 1;
            if retries > inner.config.max_retries {
                break Err(RsvalkeyError::TooManyRetries);
            }

            match kind {
                ServerErrorKind::Moved { slot: moved_slot, addr } => {
                    debug!(slot = moved_slot, %addr, "following MOVED redirect");
                    let target = match inner.redirect_node(&addr, node.host()) {
                        Ok(target) => target,
                        Err(e) => break Err(e),
                    };
                    inner.set_slot_owner(moved_slot, &target);
                    // Learn the rest of the new topology: piggyback the
                    // refresh on the connection that sent the redirect.
                    if refresh_carrier.is_none() {
                        conn.append(&inner.refresh_wire());
                        refresh_carrier = Some(node.clone());
                    }
                    drop(guard);
                    redirect = Some(Redirect::Moved(target));
                }
                ServerErrorKind::Ask { addr, .. } => {
                    debug!(%addr, "following ASK redirect");
                    drop(guard);
                    let target = match inner.redirect_node(&addr, node.host()) {
                        Ok(target) => target,
                        Err(e) => break Err(e),
                    };
                    redirect = Some(Redirect::Ask(target));
                }
                ServerErrorKind::TryAgain | ServerErrorKind::ClusterDown => {
                    drop(guard);
                }
                _ => unreachable!("non-redirect kinds handled above"),
            }
        };

        // Finalize: a piggybacked refresh reply is still queued on the
        // carrier connection. Drain and install it; when that fails, fall
        // back to a full refresh, and when that fails too the command
        // cannot be trusted to have a current route — report the failure.
        if let Some(carrier) = refresh_carrier {
            let applied = self.drain_refresh_reply(&carrier).await;
            if applied.is_err() {
                if let Err(e) = inner.refresh_blocking().await {
                    result = Err(e);
                }
            }
        }

        result
    }

    async fn drain_refresh_reply(&self, carrier: &Arc<Node>) -> Result<()> {
        let mut guard = carrier.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| RsvalkeyError::Cluster("refresh connection is gone".into()))?;
        match conn.read_reply().await {
            Ok(reply) => {
                drop(guard);
                self.inner.apply_refresh_reply(reply, carrier.host())
            }
            Err(e) => {
                self.inner
                    .discard_conn(carrier, ConnKind::Sync, &mut guard);
                Err(e)
            }
        }
    }

    async fn execute_to_node(&self, node: &Arc<Node>, wire: Vec<u8>) -> Result<RespValue> {
        let inner = &self.inner;
        let mut guard = inner.ensure_conn(node, ConnKind::Sync).await?;
        let conn = guard.as_mut().expect("ensured above");

        conn.append(&wire);
        let piggyback = inner.need_refresh.load(Ordering::Relaxed);
        if piggyback {
            conn.append(&inner.refresh_wire());
        }

        let reply = match conn.read_reply().await {
            Ok(reply) => reply,
            Err(e) => {
                inner.discard_conn(node, ConnKind::Sync, &mut guard);
                inner.need_refresh.store(true, Ordering::Relaxed);
                return Err(e);
            }
        };

        if piggyback {
            match guard.as_mut().expect("still held").read_reply().await {
                // A failed install is retried on a later command.
                Ok(refresh_reply) => {
                    drop(guard);
                    let _ = inner.apply_refresh_reply(refresh_reply, node.host());
                }
                Err(_) => {
                    inner.discard_conn(node, ConnKind::Sync, &mut guard);
                }
            }
        }

        Ok(reply)
    }

    async fn get_reply_inner(&self) -> Result<Option<RespValue>> {
        let request = self.requests.lock().pop_front();
        let Some(request) = request else {
            return Ok(None);
        };

        let node = match (request.slot, request.target) {
            (Some(slot), _) => self.inner.node_for_slot(slot)?,
            (None, Some(addr)) => self.inner.node_by_addr(&addr).ok_or_else(|| {
                RsvalkeyError::Cluster("command was sent to a now unknown node".into())
            })?,
            (None, None) => unreachable!("queued request without slot or target"),
        };

        let mut guard = node.conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            return Err(RsvalkeyError::Cluster(
                "no open connection for queued command".into(),
            ));
        };
        match conn.read_reply().await {
            Ok(reply) => {
                if let Some(msg) = reply.as_error_msg() {
                    if matches!(ServerErrorKind::classify(msg), ServerErrorKind::Moved { .. }) {
                        self.inner.need_refresh.store(true, Ordering::Relaxed);
                    }
                }
                Ok(Some(reply))
            }
            Err(e) => {
                self.inner.discard_conn(&node, ConnKind::Sync, &mut guard);
                self.inner.need_refresh.store(true, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    async fn close_all_connections(&self) {
        let mut it = NodeIterator::new(self.inner.clone());
        while let Some(node) = it.next() {
            node.conn.lock().await.take();
        }
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        self.inner.config.fire_event(ClusterEvent::FreeContext);
    }
}
