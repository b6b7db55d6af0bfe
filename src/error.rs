//! Error types for rsvalkey.
//!
//! Server-returned error strings are classified by prefix so the routers can
//! recognize cluster redirections (`MOVED`, `ASK`) and transient cluster
//! states (`TRYAGAIN`, `CLUSTERDOWN`) without surfacing them to the caller.

use std::fmt;
use std::io;

/// Classification of a server error string by its leading token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// `MOVED <slot> <host>:<port>` — the slot has permanently moved.
    Moved { slot: u16, addr: String },
    /// `ASK <slot> <host>:<port>` — the slot is migrating; retry once there.
    Ask { slot: u16, addr: String },
    /// `TRYAGAIN …` — multi-key operation during migration, retry later.
    TryAgain,
    /// `CLUSTERDOWN …` — the cluster is not serving requests.
    ClusterDown,
    /// Generic `ERR …`
    Err,
    /// Any other error prefix, e.g. `WRONGTYPE`.
    Other(String),
}

impl ServerErrorKind {
    /// Classify a raw server error message.
    ///
    /// `MOVED` and `ASK` carry a slot number and a target address; when either
    /// fails to parse the message degrades to `Other` so it is passed through
    /// to the caller instead of being treated as a redirect.
    pub fn classify(msg: &str) -> Self {
        if let Some(rest) = msg.strip_prefix("MOVED ") {
            if let Some((slot, addr)) = parse_redirect_fields(rest) {
                return Self::Moved { slot, addr };
            }
            return Self::Other("MOVED".to_string());
        }
        if let Some(rest) = msg.strip_prefix("ASK ") {
            if let Some((slot, addr)) = parse_redirect_fields(rest) {
                return Self::Ask { slot, addr };
            }
            return Self::Other("ASK".to_string());
        }
        if msg.starts_with("TRYAGAIN") {
            Self::TryAgain
        } else if msg.starts_with("CLUSTERDOWN") {
            Self::ClusterDown
        } else if msg.starts_with("ERR") {
            Self::Err
        } else {
            let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
            Self::Other(prefix.to_string())
        }
    }

    /// True for the redirect/transient kinds the routers retry on.
    pub fn is_cluster_redirect(&self) -> bool {
        matches!(
            self,
            Self::Moved { .. } | Self::Ask { .. } | Self::TryAgain | Self::ClusterDown
        )
    }
}

/// Parse `<slot> <addr>` from the tail of a MOVED/ASK error.
fn parse_redirect_fields(rest: &str) -> Option<(u16, String)> {
    let (slot_str, addr) = rest.split_once(' ')?;
    let slot = slot_str.parse::<u16>().ok()?;
    if slot >= crate::slot::SLOT_COUNT {
        return None;
    }
    // The address must contain a port separator; host may be empty, which the
    // routers substitute with the responder's address.
    addr.rfind(':')?;
    Some((slot, addr.to_string()))
}

/// All error variants for rsvalkey.
#[derive(Debug)]
pub enum RsvalkeyError {
    /// TCP / IO level errors, including EOF from a closed peer.
    Connection(io::Error),
    /// RESP protocol violations and unparsable commands.
    Protocol(String),
    /// RESP parser needs more data — not a real error, used as control flow.
    Incomplete,
    /// The server returned an error string, classified by prefix.
    Server {
        kind: ServerErrorKind,
        message: String,
    },
    /// Operation timed out.
    Timeout(String),
    /// Cluster routing errors (slot not served, no reachable node, …).
    Cluster(String),
    /// A command exhausted its redirect/retry budget.
    TooManyRetries,
}

impl RsvalkeyError {
    /// Create a server error from a raw message, classifying the kind.
    pub fn server(msg: impl Into<String>) -> Self {
        let message = msg.into();
        let kind = ServerErrorKind::classify(&message);
        Self::Server { kind, message }
    }

    /// Return the MOVED target if this is a MOVED error.
    pub fn moved_info(&self) -> Option<(u16, &str)> {
        match self {
            Self::Server {
                kind: ServerErrorKind::Moved { slot, addr },
                ..
            } => Some((*slot, addr)),
            _ => None,
        }
    }

    /// Return the ASK target if this is an ASK error.
    pub fn ask_info(&self) -> Option<(u16, &str)> {
        match self {
            Self::Server {
                kind: ServerErrorKind::Ask { slot, addr },
                ..
            } => Some((*slot, addr)),
            _ => None,
        }
    }

    /// True when the underlying cause is a closed connection.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Connection(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

impl fmt::Display for RsvalkeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Incomplete => write!(f, "incomplete RESP message"),
            Self::Server { message, .. } => write!(f, "server error: {message}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Cluster(msg) => write!(f, "cluster error: {msg}"),
            Self::TooManyRetries => write!(f, "too many cluster retries"),
        }
    }
}

impl std::error::Error for RsvalkeyError {}

impl From<io::Error> for RsvalkeyError {
    fn from(e: io::Error) -> Self {
        Self::Connection(e)
    }
}

pub type Result<T> = std::result::Result<T, RsvalkeyError>;

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_moved() {
        let kind = ServerErrorKind::classify("MOVED 3999 127.0.0.1:6381");
        assert_eq!(
            kind,
            ServerErrorKind::Moved {
                slot: 3999,
                addr: "127.0.0.1:6381".to_string()
            }
        );
    }

    #[test]
    fn classify_ask() {
        let kind = ServerErrorKind::classify("ASK 3999 127.0.0.1:6381");
        assert_eq!(
            kind,
            ServerErrorKind::Ask {
                slot: 3999,
                addr: "127.0.0.1:6381".to_string()
            }
        );
    }

    #[test]
    fn classify_moved_empty_host() {
        // An empty endpoint is legal; the router resolves it to the responder.
        let kind = ServerErrorKind::classify("MOVED 12182 :7002");
        assert_eq!(
            kind,
            ServerErrorKind::Moved {
                slot: 12182,
                addr: ":7002".to_string()
            }
        );
    }

    #[test]
    fn classify_moved_ipv6() {
        let kind = ServerErrorKind::classify("MOVED 1 ::1:30001");
        assert_eq!(
            kind,
            ServerErrorKind::Moved {
                slot: 1,
                addr: "::1:30001".to_string()
            }
        );
    }

    #[test]
    fn classify_moved_bad_slot() {
        assert_eq!(
            ServerErrorKind::classify("MOVED abc 127.0.0.1:6381"),
            ServerErrorKind::Other("MOVED".to_string())
        );
        assert_eq!(
            ServerErrorKind::classify("MOVED 20000 127.0.0.1:6381"),
            ServerErrorKind::Other("MOVED".to_string())
        );
    }

    #[test]
    fn classify_tryagain_clusterdown() {
        assert_eq!(
            ServerErrorKind::classify("TRYAGAIN Multiple keys request during rehashing"),
            ServerErrorKind::TryAgain
        );
        assert_eq!(
            ServerErrorKind::classify("CLUSTERDOWN The cluster is down"),
            ServerErrorKind::ClusterDown
        );
    }

    #[test]
    fn classify_err_and_other() {
        assert_eq!(
            ServerErrorKind::classify("ERR unknown command 'FOO'"),
            ServerErrorKind::Err
        );
        assert_eq!(
            ServerErrorKind::classify("WRONGTYPE Operation against a key"),
            ServerErrorKind::Other("WRONGTYPE".to_string())
        );
    }

    #[test]
    fn redirect_kinds() {
        assert!(ServerErrorKind::classify("MOVED 1 a:1").is_cluster_redirect());
        assert!(ServerErrorKind::classify("ASK 1 a:1").is_cluster_redirect());
        assert!(ServerErrorKind::classify("TRYAGAIN x").is_cluster_redirect());
        assert!(ServerErrorKind::classify("CLUSTERDOWN x").is_cluster_redirect());
        assert!(!ServerErrorKind::classify("ERR x").is_cluster_redirect());
    }

    #[test]
    fn moved_info_accessor() {
        let err = RsvalkeyError::server("MOVED 3999 127.0.0.1:6381");
        assert_eq!(err.moved_info(), Some((3999, "127.0.0.1:6381")));
        assert_eq!(err.ask_info(), None);
    }

    #[test]
    fn ask_info_accessor() {
        let err = RsvalkeyError::server("ASK 3999 127.0.0.1:6381");
        assert_eq!(err.ask_info(), Some((3999, "127.0.0.1:6381")));
        assert_eq!(err.moved_info(), None);
    }

    #[test]
    fn display_variants() {
        let err = RsvalkeyError::Connection(io::Error::new(io::ErrorKind::Other, "refused"));
        assert!(err.to_string().contains("connection error"));

        let err = RsvalkeyError::Protocol("bad input".into());
        assert_eq!(err.to_string(), "protocol error: bad input");

        let err = RsvalkeyError::Cluster("slot not served by any node".into());
        assert_eq!(err.to_string(), "cluster error: slot not served by any node");

        let err = RsvalkeyError::TooManyRetries;
        assert_eq!(err.to_string(), "too many cluster retries");
    }

    #[test]
    fn eof_detection() {
        let err = RsvalkeyError::Connection(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ));
        assert!(err.is_eof());
        let err = RsvalkeyError::Connection(io::Error::new(io::ErrorKind::Other, "x"));
        assert!(!err.is_eof());
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "refused");
        let err: RsvalkeyError = io_err.into();
        assert!(matches!(err, RsvalkeyError::Connection(_)));
    }
}
