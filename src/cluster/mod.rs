//! Cluster state: nodes, the slot routing table, and shared plumbing used by
//! both the blocking and the async client.
//!
//! The topology is owned by a [`Topology`] value behind a `parking_lot`
//! read-write lock. A successful refresh swaps the whole value; a MOVED reply
//! patches a single `table` entry in place. Each [`Node`] carries two lazily
//! opened connections, one per API flavor, guarded by tokio mutexes so a
//! connection is used by one request at a time and replies stay in order.

pub mod aio;
pub mod sync;
pub mod topology;

pub use aio::AsyncClusterClient;
pub use sync::ClusterClient;

use crate::config::{format_addr, ClusterConfig, ClusterEvent};
use crate::connection::NodeConnection;
use crate::error::{Result, RsvalkeyError};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_str;
use crate::slot::SLOT_COUNT;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::MutexGuard;
use tracing::debug;

/// Role of a node within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
    /// Seed nodes start out with an unknown role until the first refresh.
    Unknown,
}

/// An inclusive range of hash slots owned by a primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

/// One known cluster node.
///
/// Metadata is immutable once the node is created; the connection slots are
/// interior-mutable and follow the node through topology swaps (a new node
/// with the same address inherits the old node's live connections).
pub struct Node {
    addr: String,
    host: String,
    port: u16,
    /// Node id from `CLUSTER NODES`; seed and `CLUSTER SLOTS` nodes have none.
    id: Option<String>,
    role: Role,
    slots: Vec<SlotRange>,
    replicas: Vec<Arc<Node>>,
    /// Connection used by the blocking API (and blocking topology refreshes).
    pub(crate) conn: tokio::sync::Mutex<Option<NodeConnection>>,
    /// Connection used by the async API.
    pub(crate) aconn: tokio::sync::Mutex<Option<NodeConnection>>,
    pub(crate) async_connected: AtomicBool,
    pub(crate) last_connect_attempt: parking_lot::Mutex<Option<Instant>>,
}

impl Node {
    pub(crate) fn new(
        host: String,
        port: u16,
        role: Role,
        id: Option<String>,
        slots: Vec<SlotRange>,
        replicas: Vec<Arc<Node>>,
    ) -> Self {
        Self {
            addr: format_addr(&host, port),
            host,
            port,
            id,
            role,
            slots,
            replicas,
            conn: tokio::sync::Mutex::new(None),
            aconn: tokio::sync::Mutex::new(None),
            async_connected: AtomicBool::new(false),
            last_connect_attempt: parking_lot::Mutex::new(None),
        }
    }

    /// A seed node known only by address.
    pub(crate) fn seed(host: String, port: u16) -> Self {
        Self::new(host, port, Role::Unknown, None, Vec::new(), Vec::new())
    }

    /// Canonical `host:port` address, the key in the node map.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Slot ranges owned by this node; empty unless the node is a primary.
    pub fn slot_ranges(&self) -> &[SlotRange] {
        &self.slots
    }

    /// Replica nodes, populated only when replica parsing is enabled.
    pub fn replicas(&self) -> &[Arc<Node>] {
        &self.replicas
    }

    pub(crate) fn has_live_async_conn(&self) -> bool {
        self.async_connected.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("addr", &self.addr)
            .field("role", &self.role)
            .field("slots", &self.slots)
            .field("replicas", &self.replicas.len())
            .finish_non_exhaustive()
    }
}

/// Which connection slot of a node to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnKind {
    Sync,
    Async,
}

/// The routable view of the cluster.
pub(crate) struct Topology {
    /// Address → node. Owns the nodes.
    pub(crate) nodes: HashMap<String, Arc<Node>>,
    /// Dense slot → primary table; `None` entries are unserved slots.
    pub(crate) table: Vec<Option<Arc<Node>>>,
    /// Bumped on every successful install; lets iterators detect swaps.
    pub(crate) version: u64,
}

impl Topology {
    fn seeded(initial_nodes: &[String]) -> Result<Self> {
        let mut nodes = HashMap::new();
        for addr in initial_nodes {
            let (host, port) = crate::config::split_addr(addr)?;
            let node = Arc::new(Node::seed(host, port));
            nodes.entry(node.addr.clone()).or_insert(node);
        }
        Ok(Self {
            nodes,
            table: vec![None; SLOT_COUNT as usize],
            version: 0,
        })
    }
}

/// State shared between the blocking and async clients.
pub(crate) struct ClusterInner {
    pub(crate) config: ClusterConfig,
    pub(crate) topology: RwLock<Topology>,
    /// A transport or MOVED error was seen; refresh opportunistically.
    pub(crate) need_refresh: AtomicBool,
    /// Runtime override of the configured command timeout.
    pub(crate) command_timeout: parking_lot::Mutex<Option<std::time::Duration>>,
}

impl ClusterInner {
    pub(crate) fn new(config: ClusterConfig) -> Result<Self> {
        let topology = Topology::seeded(&config.initial_nodes)?;
        let command_timeout = config.command_timeout;
        Ok(Self {
            config,
            topology: RwLock::new(topology),
            need_refresh: AtomicBool::new(false),
            command_timeout: parking_lot::Mutex::new(command_timeout),
        })
    }

    /// The primary serving `slot`, if any.
    pub(crate) fn node_for_slot(&self, slot: u16) -> Result<Arc<Node>> {
        if slot >= SLOT_COUNT {
            return Err(RsvalkeyError::Cluster("invalid slot".into()));
        }
        let topo = self.topology.read();
        topo.table[slot as usize]
            .clone()
            .ok_or_else(|| RsvalkeyError::Cluster("slot not served by any node".into()))
    }

    pub(crate) fn node_by_addr(&self, addr: &str) -> Option<Arc<Node>> {
        self.topology.read().nodes.get(addr).cloned()
    }

    pub(crate) fn snapshot_nodes(&self) -> (Vec<Arc<Node>>, u64) {
        let topo = self.topology.read();
        (topo.nodes.values().cloned().collect(), topo.version)
    }

    pub(crate) fn route_version(&self) -> u64 {
        self.topology.read().version
    }

    /// Patch the routing table after a MOVED reply. A single entry store; the
    /// full refresh runs out of band.
    pub(crate) fn set_slot_owner(&self, slot: u16, node: &Arc<Node>) {
        let mut topo = self.topology.write();
        topo.table[slot as usize] = Some(node.clone());
    }

    /// Resolve the target of a MOVED/ASK reply to a node, inserting it into
    /// the node map when it is not yet known. An empty host in the reply
    /// means "the same address the reply came from".
    pub(crate) fn redirect_node(&self, addr: &str, responder_host: &str) -> Result<Arc<Node>> {
        let (host_part, port_str) = addr
            .rsplit_once(':')
            .ok_or_else(|| RsvalkeyError::Protocol("Invalid address in redirect".into()))?;
        let port = port_str
            .parse::<u16>()
            .ok()
            .filter(|&p| p > 0)
            .ok_or_else(|| RsvalkeyError::Protocol("Invalid port in redirect".into()))?;
        let host = if host_part.is_empty() {
            responder_host
        } else {
            host_part
        };

        let key = format_addr(host, port);
        let mut topo = self.topology.write();
        if let Some(node) = topo.nodes.get(&key) {
            return Ok(node.clone());
        }
        let node = Arc::new(Node::new(
            host.to_string(),
            port,
            Role::Primary,
            None,
            Vec::new(),
            Vec::new(),
        ));
        topo.nodes.insert(key, node.clone());
        Ok(node)
    }

    /// The configured topology refresh command in wire format.
    pub(crate) fn refresh_wire(&self) -> Vec<u8> {
        if self.config.use_cluster_nodes {
            encode_command_str(&["CLUSTER", "NODES"])
        } else {
            encode_command_str(&["CLUSTER", "SLOTS"])
        }
    }

    /// Parse a `CLUSTER SLOTS`/`CLUSTER NODES` reply and install the result.
    pub(crate) fn apply_refresh_reply(&self, reply: RespValue, responder_host: &str) -> Result<()> {
        if let Some(msg) = reply.as_error_msg() {
            return Err(RsvalkeyError::server(msg.to_string()));
        }
        let parsed = if self.config.use_cluster_nodes {
            let text = reply
                .as_str()
                .ok_or_else(|| RsvalkeyError::Protocol("Unexpected reply type".into()))?;
            topology::parse_cluster_nodes(text, responder_host, self.config.use_replicas)?
        } else {
            topology::parse_cluster_slots(&reply, responder_host, self.config.use_replicas)?
        };
        self.install(parsed)
    }

    /// Atomically replace the topology with a freshly parsed node set.
    ///
    /// Builds and validates the new slot table first; nothing of the live
    /// state is touched until validation has passed. Live connections are
    /// carried over to new nodes with matching addresses.
    pub(crate) fn install(&self, parsed: HashMap<String, topology::ParsedNode>) -> Result<()> {
        let mut nodes: HashMap<String, Arc<Node>> = HashMap::with_capacity(parsed.len());
        for (addr, pnode) in parsed {
            nodes.insert(addr, Arc::new(pnode.into_node()));
        }

        let mut table: Vec<Option<Arc<Node>>> = vec![None; SLOT_COUNT as usize];
        for node in nodes.values() {
            if node.role != Role::Primary {
                return Err(RsvalkeyError::Protocol("Node role must be primary".into()));
            }
            for range in &node.slots {
                if range.start > range.end || range.end >= SLOT_COUNT {
                    return Err(RsvalkeyError::Protocol(
                        "Slot region for node is invalid".into(),
                    ));
                }
                for entry in &mut table[range.start as usize..=range.end as usize] {
                    if entry.is_some() {
                        return Err(RsvalkeyError::Protocol(
                            "Different node holds same slot".into(),
                        ));
                    }
                    *entry = Some(node.clone());
                }
            }
        }

        let version = {
            let mut topo = self.topology.write();
            // Carry live connections over to the replacement nodes.
            for (addr, new_node) in &nodes {
                if let Some(old_node) = topo.nodes.get(addr) {
                    transplant_conn(&old_node.conn, &new_node.conn);
                    transplant_conn(&old_node.aconn, &new_node.aconn);
                    new_node
                        .async_connected
                        .store(old_node.async_connected.load(Ordering::Relaxed), Ordering::Relaxed);
                    *new_node.last_connect_attempt.lock() = *old_node.last_connect_attempt.lock();
                }
            }
            topo.table = table;
            topo.nodes = nodes;
            topo.version += 1;
            topo.version
        };

        debug!(version, "installed new slot mapping");
        self.config.fire_event(ClusterEvent::SlotmapUpdated);
        if version == 1 {
            self.config.fire_event(ClusterEvent::Ready);
        }
        self.need_refresh.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Borrow (opening if needed) one of the node's connections.
    ///
    /// A fresh connection runs the TLS/AUTH/SELECT handshake before it is
    /// stored; a handshake failure leaves the slot empty. The connect
    /// callback for the matching API flavor fires after each attempt.
    pub(crate) async fn ensure_conn<'a>(
        &self,
        node: &'a Node,
        kind: ConnKind,
    ) -> Result<MutexGuard<'a, Option<NodeConnection>>> {
        let slot = match kind {
            ConnKind::Sync => &node.conn,
            ConnKind::Async => &node.aconn,
        };
        let mut guard = slot.lock().await;
        if guard.is_none() {
            if node.host.is_empty() || node.port == 0 {
                return Err(RsvalkeyError::Cluster("node host or port is missing".into()));
            }
            if kind == ConnKind::Async {
                *node.last_connect_attempt.lock() = Some(Instant::now());
            }

            let result = NodeConnection::connect(&node.host, node.port, &self.config).await;
            let callback = match kind {
                ConnKind::Sync => &self.config.connect_callback,
                ConnKind::Async => &self.config.async_connect_callback,
            };
            if let Some(cb) = callback {
                cb(&node.addr, result.is_ok());
            }
            let mut conn = result?;
            conn.set_command_timeout(*self.command_timeout.lock());
            conn.init(&self.config).await?;
            *guard = Some(conn);
            if kind == ConnKind::Async {
                node.async_connected.store(true, Ordering::Relaxed);
            }
        }
        Ok(guard)
    }

    /// Query nodes in turn for the topology until one delivers an
    /// installable reply. Used by the blocking client, and by the async
    /// client for its optional blocking initial update.
    pub(crate) async fn refresh_blocking(&self) -> Result<()> {
        let mut last_err = RsvalkeyError::Cluster("no reachable cluster node".into());
        let (nodes, _) = self.snapshot_nodes();
        for node in nodes {
            let mut guard = match self.ensure_conn(&node, ConnKind::Sync).await {
                Ok(guard) => guard,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };
            let conn = guard.as_mut().expect("ensured above");
            conn.append(&self.refresh_wire());
            let reply = match conn.read_reply().await {
                Ok(reply) => reply,
                Err(e) => {
                    self.discard_conn(&node, ConnKind::Sync, &mut guard);
                    last_err = e;
                    continue;
                }
            };
            drop(guard);
            match self.apply_refresh_reply(reply, node.host()) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = e,
            }
        }
        debug!("topology refresh failed on every known node");
        Err(last_err)
    }

    /// Change the command timeout for new and open connections.
    pub(crate) fn set_command_timeout(&self, timeout: std::time::Duration) {
        *self.command_timeout.lock() = Some(timeout);
        self.apply_command_timeout(timeout);
    }

    /// Drop a connection that returned a transport error. For the async slot
    /// the disconnect callback fires with the failure status.
    pub(crate) fn discard_conn(
        &self,
        node: &Node,
        kind: ConnKind,
        guard: &mut MutexGuard<'_, Option<NodeConnection>>,
    ) {
        if guard.take().is_some() && kind == ConnKind::Async {
            node.async_connected.store(false, Ordering::Relaxed);
            if let Some(cb) = &self.config.async_disconnect_callback {
                cb(&node.addr, false);
            }
        }
    }

    /// Propagate a changed command timeout to every open connection.
    pub(crate) fn apply_command_timeout(&self, timeout: std::time::Duration) {
        let (nodes, _) = self.snapshot_nodes();
        for node in nodes {
            for slot in [&node.conn, &node.aconn] {
                if let Ok(mut guard) = slot.try_lock() {
                    if let Some(conn) = guard.as_mut() {
                        conn.set_command_timeout(Some(timeout));
                    }
                }
            }
            for replica in node.replicas() {
                for slot in [&replica.conn, &replica.aconn] {
                    if let Ok(mut guard) = slot.try_lock() {
                        if let Some(conn) = guard.as_mut() {
                            conn.set_command_timeout(Some(timeout));
                        }
                    }
                }
            }
        }
    }
}

/// Move a live connection from an outgoing node into its replacement.
/// A connection currently checked out by an in-flight request is left behind;
/// it is dropped together with the old node when that request finishes.
fn transplant_conn(
    old: &tokio::sync::Mutex<Option<NodeConnection>>,
    new: &tokio::sync::Mutex<Option<NodeConnection>>,
) {
    if let (Ok(mut old_guard), Ok(mut new_guard)) = (old.try_lock(), new.try_lock()) {
        if let Some(conn) = old_guard.take() {
            *new_guard = Some(conn);
        }
    }
}

/// Iterator over the current node set.
///
/// The iteration snapshots the node map; when a topology install replaces the
/// map mid-iteration, the iterator restarts once against the new map and then
/// ends, because the old snapshot no longer reflects the cluster.
pub struct NodeIterator {
    inner: Arc<ClusterInner>,
    version: u64,
    snapshot: Vec<Arc<Node>>,
    pos: usize,
    restarts_left: u8,
}

impl NodeIterator {
    pub(crate) fn new(inner: Arc<ClusterInner>) -> Self {
        let (snapshot, version) = inner.snapshot_nodes();
        Self {
            inner,
            version,
            snapshot,
            pos: 0,
            restarts_left: 1,
        }
    }

    /// The next node, or `None` when the set is exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Arc<Node>> {
        let current = self.inner.route_version();
        if current != self.version {
            if self.restarts_left == 0 {
                return None;
            }
            self.restarts_left -= 1;
            let (snapshot, version) = self.inner.snapshot_nodes();
            self.snapshot = snapshot;
            self.version = version;
            self.pos = 0;
        }
        let node = self.snapshot.get(self.pos).cloned();
        self.pos += 1;
        node
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::topology::ParsedNode;
    use super::*;
    use crate::config::ClusterConfig;

    fn inner() -> ClusterInner {
        ClusterInner::new(ClusterConfig::new("127.0.0.1:7000").unwrap()).unwrap()
    }

    fn primary(host: &str, port: u16, ranges: &[(u16, u16)]) -> ParsedNode {
        ParsedNode {
            host: host.to_string(),
            port,
            id: None,
            role: Role::Primary,
            ranges: ranges
                .iter()
                .map(|&(start, end)| SlotRange { start, end })
                .collect(),
            replicas: Vec::new(),
        }
    }

    fn parsed_map(nodes: Vec<ParsedNode>) -> HashMap<String, ParsedNode> {
        nodes
            .into_iter()
            .map(|n| (format_addr(&n.host, n.port), n))
            .collect()
    }

    #[test]
    fn seeded_topology_has_no_routes() {
        let inner = inner();
        assert!(inner.node_for_slot(0).is_err());
        assert_eq!(inner.route_version(), 0);
        assert!(inner.node_by_addr("127.0.0.1:7000").is_some());
    }

    #[test]
    fn install_fills_table_and_bumps_version() {
        let inner = inner();
        inner
            .install(parsed_map(vec![
                primary("127.0.0.1", 7000, &[(0, 8191)]),
                primary("127.0.0.1", 7001, &[(8192, 16383)]),
            ]))
            .unwrap();

        assert_eq!(inner.route_version(), 1);
        assert_eq!(inner.node_for_slot(0).unwrap().addr(), "127.0.0.1:7000");
        assert_eq!(inner.node_for_slot(8191).unwrap().addr(), "127.0.0.1:7000");
        assert_eq!(inner.node_for_slot(8192).unwrap().addr(), "127.0.0.1:7001");
        assert_eq!(inner.node_for_slot(16383).unwrap().addr(), "127.0.0.1:7001");
    }

    #[test]
    fn install_accepts_non_contiguous_ranges() {
        let inner = inner();
        inner
            .install(parsed_map(vec![primary(
                "127.0.0.1",
                7000,
                &[(0, 0), (2, 2), (4, 5460)],
            )]))
            .unwrap();
        assert!(inner.node_for_slot(0).is_ok());
        assert!(inner.node_for_slot(1).is_err());
        assert!(inner.node_for_slot(2).is_ok());
        assert!(inner.node_for_slot(3).is_err());
        assert!(inner.node_for_slot(4).is_ok());
        assert!(inner.node_for_slot(5460).is_ok());
        assert!(inner.node_for_slot(5461).is_err());
    }

    #[test]
    fn install_rejects_slot_collision() {
        let inner = inner();
        let err = inner
            .install(parsed_map(vec![
                primary("127.0.0.1", 7000, &[(0, 100)]),
                primary("127.0.0.1", 7001, &[(100, 200)]),
            ]))
            .unwrap_err();
        assert!(err.to_string().contains("Different node holds same slot"));
        // Live state untouched.
        assert_eq!(inner.route_version(), 0);
    }

    #[test]
    fn install_rejects_bad_range_and_role() {
        let inner = inner();
        let err = inner
            .install(parsed_map(vec![primary("h", 7000, &[(5, 16384)])]))
            .unwrap_err();
        assert!(err.to_string().contains("Slot region for node is invalid"));

        let mut replica = primary("h", 7000, &[]);
        replica.role = Role::Replica;
        let err = inner.install(parsed_map(vec![replica])).unwrap_err();
        assert!(err.to_string().contains("Node role must be primary"));
        assert_eq!(inner.route_version(), 0);
    }

    #[test]
    fn reinstall_same_topology_still_bumps_version() {
        let inner = inner();
        let make = || parsed_map(vec![primary("127.0.0.1", 7000, &[(0, 16383)])]);
        inner.install(make()).unwrap();
        let first = inner.node_for_slot(5).unwrap().addr().to_string();
        inner.install(make()).unwrap();
        assert_eq!(inner.route_version(), 2);
        assert_eq!(inner.node_for_slot(5).unwrap().addr(), first);
    }

    #[test]
    fn events_fire_on_install() {
        use std::sync::atomic::AtomicUsize;
        let updates = Arc::new(AtomicUsize::new(0));
        let readies = Arc::new(AtomicUsize::new(0));
        let (u, r) = (updates.clone(), readies.clone());
        let config = ClusterConfig::new("127.0.0.1:7000")
            .unwrap()
            .on_event(move |event| match event {
                ClusterEvent::SlotmapUpdated => {
                    u.fetch_add(1, Ordering::SeqCst);
                }
                ClusterEvent::Ready => {
                    r.fetch_add(1, Ordering::SeqCst);
                }
                ClusterEvent::FreeContext => {}
            });
        let inner = ClusterInner::new(config).unwrap();
        let make = || parsed_map(vec![primary("127.0.0.1", 7000, &[(0, 16383)])]);
        inner.install(make()).unwrap();
        inner.install(make()).unwrap();
        // Ready only once, on the first install.
        assert_eq!(updates.load(Ordering::SeqCst), 2);
        assert_eq!(readies.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn redirect_node_inserts_unknown_addr() {
        let inner = inner();
        let node = inner.redirect_node("127.0.0.1:7002", "ignored").unwrap();
        assert_eq!(node.addr(), "127.0.0.1:7002");
        assert_eq!(node.role(), Role::Primary);
        // Second resolution returns the same node.
        let again = inner.redirect_node("127.0.0.1:7002", "ignored").unwrap();
        assert!(Arc::ptr_eq(&node, &again));
    }

    #[test]
    fn redirect_node_empty_host_uses_responder() {
        let inner = inner();
        let node = inner.redirect_node(":7002", "10.0.0.9").unwrap();
        assert_eq!(node.addr(), "10.0.0.9:7002");
    }

    #[test]
    fn redirect_node_rejects_bad_input() {
        let inner = inner();
        assert!(inner.redirect_node("noport", "h").is_err());
        assert!(inner.redirect_node("h:0", "h").is_err());
        assert!(inner.redirect_node("h:99999", "h").is_err());
    }

    #[test]
    fn set_slot_owner_patches_single_entry() {
        let inner = inner();
        inner
            .install(parsed_map(vec![primary("127.0.0.1", 7000, &[(0, 16383)])]))
            .unwrap();
        let node = inner.redirect_node("127.0.0.1:7002", "h").unwrap();
        inner.set_slot_owner(12182, &node);
        assert_eq!(inner.node_for_slot(12182).unwrap().addr(), "127.0.0.1:7002");
        assert_eq!(inner.node_for_slot(12181).unwrap().addr(), "127.0.0.1:7000");
        // A patch does not count as a topology install.
        assert_eq!(inner.route_version(), 1);
    }

    #[test]
    fn iterator_walks_all_nodes() {
        let inner = Arc::new(inner());
        inner
            .install(parsed_map(vec![
                primary("127.0.0.1", 7000, &[(0, 8191)]),
                primary("127.0.0.1", 7001, &[(8192, 16383)]),
            ]))
            .unwrap();
        let mut it = NodeIterator::new(inner.clone());
        let mut seen = Vec::new();
        while let Some(node) = it.next() {
            seen.push(node.addr().to_string());
        }
        seen.sort();
        assert_eq!(seen, vec!["127.0.0.1:7000", "127.0.0.1:7001"]);
    }

    #[test]
    fn iterator_restarts_once_on_version_change() {
        let inner = Arc::new(inner());
        let make = |port: u16| parsed_map(vec![primary("127.0.0.1", port, &[(0, 16383)])]);
        inner.install(make(7000)).unwrap();

        let mut it = NodeIterator::new(inner.clone());
        assert!(it.next().is_some());

        // First swap: iteration restarts against the new map.
        inner.install(make(7001)).unwrap();
        assert_eq!(it.next().unwrap().addr(), "127.0.0.1:7001");

        // Second swap: the restart budget is spent.
        inner.install(make(7002)).unwrap();
        assert!(it.next().is_none());
    }

    #[test]
    fn refresh_wire_follows_config() {
        let inner = inner();
        assert_eq!(
            inner.refresh_wire(),
            encode_command_str(&["CLUSTER", "SLOTS"])
        );
        let config = ClusterConfig::new("127.0.0.1:7000")
            .unwrap()
            .use_cluster_nodes(true);
        let inner = ClusterInner::new(config).unwrap();
        assert_eq!(
            inner.refresh_wire(),
            encode_command_str(&["CLUSTER", "NODES"])
        );
    }
}
