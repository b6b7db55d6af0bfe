//! Cluster client configuration.
//!
//! A [`ClusterConfig`] is seeded with one or more `host:port` addresses and
//! tuned with builder-style setters. The same configuration drives both the
//! blocking and the async client.

use crate::error::{Result, RsvalkeyError};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default allowed redirect/retry attempts per command.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Notifications delivered through the event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A new slot mapping was installed.
    SlotmapUpdated,
    /// The first slot mapping was installed; the client is usable.
    Ready,
    /// The client is being torn down.
    FreeContext,
}

/// IP family preference applied when resolving node hostnames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpPreference {
    #[default]
    Unspec,
    V4,
    V6,
}

pub type EventCallback = Arc<dyn Fn(ClusterEvent) + Send + Sync>;
/// Invoked with the node address and whether the connect attempt succeeded.
pub type ConnectCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// TLS settings for node connections.
#[cfg(feature = "tls")]
#[derive(Clone)]
pub struct TlsSettings {
    pub(crate) connector: tokio_rustls::TlsConnector,
}

#[cfg(feature = "tls")]
impl TlsSettings {
    /// Use a caller-provided rustls configuration.
    pub fn from_client_config(config: Arc<rustls::ClientConfig>) -> Self {
        Self {
            connector: tokio_rustls::TlsConnector::from(config),
        }
    }

    /// Webpki root store, no client auth.
    pub fn with_webpki_roots() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::from_client_config(Arc::new(config))
    }
}

/// Full cluster client configuration.
#[derive(Clone)]
pub struct ClusterConfig {
    /// Seed addresses, canonical `host:port` form.
    pub(crate) initial_nodes: Vec<String>,
    /// Refresh topology with `CLUSTER NODES` instead of `CLUSTER SLOTS`.
    pub(crate) use_cluster_nodes: bool,
    /// Parse and retain replica nodes on their primaries.
    pub(crate) use_replicas: bool,
    /// Run the first topology fetch synchronously even in the async client.
    pub(crate) blocking_initial_update: bool,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) command_timeout: Option<Duration>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    /// Redirect/retry budget; 0 means a single attempt.
    pub(crate) max_retries: u32,
    /// Logical database selected on new connections when non-zero.
    pub(crate) select_db: u16,
    pub(crate) prefer: IpPreference,
    pub(crate) event_callback: Option<EventCallback>,
    pub(crate) connect_callback: Option<ConnectCallback>,
    pub(crate) async_connect_callback: Option<ConnectCallback>,
    pub(crate) async_disconnect_callback: Option<ConnectCallback>,
    #[cfg(feature = "tls")]
    pub(crate) tls: Option<TlsSettings>,
}

impl ClusterConfig {
    /// Create a configuration from a comma-separated seed list,
    /// e.g. `"127.0.0.1:7000,127.0.0.1:7001"`.
    pub fn new(addrs: &str) -> Result<Self> {
        let mut initial_nodes = Vec::new();
        for part in addrs.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (host, port) = split_addr(part)?;
            initial_nodes.push(format_addr(&host, port));
        }
        if initial_nodes.is_empty() {
            return Err(RsvalkeyError::Cluster(
                "invalid seed addresses (expected format: 127.0.0.1:1234,127.0.0.2:5678)".into(),
            ));
        }

        Ok(Self {
            initial_nodes,
            use_cluster_nodes: false,
            use_replicas: false,
            blocking_initial_update: false,
            connect_timeout: None,
            command_timeout: None,
            username: None,
            password: None,
            max_retries: DEFAULT_MAX_RETRIES,
            select_db: 0,
            prefer: IpPreference::Unspec,
            event_callback: None,
            connect_callback: None,
            async_connect_callback: None,
            async_disconnect_callback: None,
            #[cfg(feature = "tls")]
            tls: None,
        })
    }

    /// Refresh the topology with `CLUSTER NODES` instead of `CLUSTER SLOTS`.
    pub fn use_cluster_nodes(mut self, yes: bool) -> Self {
        self.use_cluster_nodes = yes;
        self
    }

    /// Parse replica nodes and attach them to their primaries.
    pub fn use_replicas(mut self, yes: bool) -> Self {
        self.use_replicas = yes;
        self
    }

    /// Perform the first topology fetch synchronously in the async client.
    pub fn blocking_initial_update(mut self, yes: bool) -> Self {
        self.blocking_initial_update = yes;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Username for `AUTH`. An empty string unsets it.
    pub fn username(mut self, username: &str) -> Self {
        self.username = (!username.is_empty()).then(|| username.to_string());
        self
    }

    /// Password for `AUTH`. An empty string unsets it.
    pub fn password(mut self, password: &str) -> Self {
        self.password = (!password.is_empty()).then(|| password.to_string());
        self
    }

    /// Redirect/retry budget per command. 0 means one attempt, no retries.
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Logical database index; `SELECT` is sent on new connections when ≠ 0.
    pub fn select_db(mut self, db: u16) -> Self {
        self.select_db = db;
        self
    }

    /// IP family preference for hostname resolution.
    pub fn prefer(mut self, prefer: IpPreference) -> Self {
        self.prefer = prefer;
        self
    }

    /// Hook invoked on topology installs, readiness and teardown.
    pub fn on_event(mut self, f: impl Fn(ClusterEvent) + Send + Sync + 'static) -> Self {
        self.event_callback = Some(Arc::new(f));
        self
    }

    /// Hook invoked after each blocking-path connect attempt.
    pub fn on_connect(mut self, f: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.connect_callback = Some(Arc::new(f));
        self
    }

    /// Hook invoked after each async-path connect attempt.
    pub fn on_async_connect(mut self, f: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.async_connect_callback = Some(Arc::new(f));
        self
    }

    /// Hook invoked when an async-path connection is torn down.
    pub fn on_async_disconnect(mut self, f: impl Fn(&str, bool) + Send + Sync + 'static) -> Self {
        self.async_disconnect_callback = Some(Arc::new(f));
        self
    }

    /// Enable TLS for all node connections.
    #[cfg(feature = "tls")]
    pub fn tls(mut self, settings: TlsSettings) -> Self {
        self.tls = Some(settings);
        self
    }

    pub(crate) fn fire_event(&self, event: ClusterEvent) {
        if let Some(cb) = &self.event_callback {
            cb(event);
        }
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("initial_nodes", &self.initial_nodes)
            .field("use_cluster_nodes", &self.use_cluster_nodes)
            .field("use_replicas", &self.use_replicas)
            .field("blocking_initial_update", &self.blocking_initial_update)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<set>"))
            .field("max_retries", &self.max_retries)
            .field("select_db", &self.select_db)
            .field("prefer", &self.prefer)
            .finish_non_exhaustive()
    }
}

/// Split `host:port` at the last colon so IPv6 addresses survive.
/// Brackets around an IPv6 host are accepted and stripped.
pub(crate) fn split_addr(addr: &str) -> Result<(String, u16)> {
    let (host, port_str) = addr.rsplit_once(':').ok_or_else(|| {
        RsvalkeyError::Cluster("server address is incorrect, port separator missing".into())
    })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(RsvalkeyError::Cluster(
            "server address is incorrect, address part missing".into(),
        ));
    }
    let port = port_str
        .parse::<u16>()
        .ok()
        .filter(|&p| p > 0)
        .ok_or_else(|| RsvalkeyError::Cluster("server port is incorrect".into()))?;
    Ok((host.to_string(), port))
}

/// Canonical `host:port` map key.
pub(crate) fn format_addr(host: &str, port: u16) -> String {
    format!("{host}:{port}")
}

// ── Tests ──────────────────────────────────────────────────────────
