//! Parsing of topology replies into a fresh node set.
//!
//! Two server reply shapes describe the cluster: the structured `CLUSTER
//! SLOTS` array and the line-oriented `CLUSTER NODES` text dump. Both parse
//! into an address-keyed map of [`ParsedNode`]s, which the cache validates
//! and installs as a unit — a parse failure never touches live state.

use crate::cluster::{Node, Role, SlotRange};
use crate::config::format_addr;
use crate::error::{Result, RsvalkeyError};
use crate::resp::types::RespValue;
use crate::slot::SLOT_COUNT;

use std::collections::HashMap;
use std::sync::Arc;

/// A node as described by a topology reply, before it becomes a live
/// [`Node`] with connection slots.
#[derive(Debug)]
pub(crate) struct ParsedNode {
    pub host: String,
    pub port: u16,
    /// Node id; known only from `CLUSTER NODES`.
    pub id: Option<String>,
    pub role: Role,
    pub ranges: Vec<SlotRange>,
    pub replicas: Vec<ParsedNode>,
}

impl ParsedNode {
    pub(crate) fn into_node(self) -> Node {
        let replicas = self
            .replicas
            .into_iter()
            .map(|r| Arc::new(r.into_node()))
            .collect();
        Node::new(self.host, self.port, self.role, self.id, self.ranges, replicas)
    }
}

/// Parse a `CLUSTER SLOTS` reply.
///
/// Each element is `[start, end, primary, replica…]` where every node is an
/// `[ip, port, id?, metadata?]` array. An empty or NIL ip means the address
/// of the node that produced the reply (`responder_host`). A primary that
/// appears in several elements accumulates the additional slot ranges.
pub(crate) fn parse_cluster_slots(
    reply: &RespValue,
    responder_host: &str,
    keep_replicas: bool,
) -> Result<HashMap<String, ParsedNode>> {
    let items = match reply {
        RespValue::Array(items) => items,
        _ => return Err(RsvalkeyError::Protocol("Unexpected reply type".into())),
    };
    if items.is_empty() {
        return Err(RsvalkeyError::Protocol("No slot information".into()));
    }

    let mut nodes: HashMap<String, ParsedNode> = HashMap::new();

    for entry in items {
        let parts = match entry {
            RespValue::Array(parts) if parts.len() >= 3 => parts,
            _ => {
                return Err(RsvalkeyError::Protocol(
                    "slot entry is not a well-formed array".into(),
                ))
            }
        };

        let start = slot_number(&parts[0], "slot begin")?;
        let end = slot_number(&parts[1], "slot end")?;
        if start > end {
            return Err(RsvalkeyError::Protocol(
                "slot begin is bigger than slot end".into(),
            ));
        }
        let range = SlotRange { start, end };

        let (host, port) = node_endpoint(&parts[2], responder_host)?;
        let addr = format_addr(&host, port);

        if let Some(existing) = nodes.get_mut(&addr) {
            // Known primary: only collect the additional range.
            existing.ranges.push(range);
            continue;
        }

        let mut primary = ParsedNode {
            host,
            port,
            id: None,
            role: Role::Primary,
            ranges: vec![range],
            replicas: Vec::new(),
        };
        if keep_replicas {
            for replica in &parts[3..] {
                let (rhost, rport) = node_endpoint(replica, responder_host)?;
                primary.replicas.push(ParsedNode {
                    host: rhost,
                    port: rport,
                    id: None,
                    role: Role::Replica,
                    ranges: Vec::new(),
                    replicas: Vec::new(),
                });
            }
        }
        nodes.insert(addr, primary);
    }

    Ok(nodes)
}

fn slot_number(value: &RespValue, what: &str) -> Result<u16> {
    let n = value
        .as_int()
        .ok_or_else(|| RsvalkeyError::Protocol(format!("{what} is not an integer")))?;
    if !(0..SLOT_COUNT as i64).contains(&n) {
        return Err(RsvalkeyError::Protocol(format!("{what} is out of range")));
    }
    Ok(n as u16)
}

/// Extract `(host, port)` from an `[ip, port, …]` node array.
fn node_endpoint(value: &RespValue, responder_host: &str) -> Result<(String, u16)> {
    let parts = match value {
        RespValue::Array(parts) if parts.len() >= 2 => parts,
        _ => {
            return Err(RsvalkeyError::Protocol(
                "node entry is not a well-formed array".into(),
            ))
        }
    };
    let host = match &parts[0] {
        // An unknown endpoint arrives as NIL; treat like an empty string.
        RespValue::Null => responder_host.to_string(),
        other => {
            let ip = other
                .as_str()
                .ok_or_else(|| RsvalkeyError::Protocol("Invalid node address".into()))?;
            if ip.is_empty() {
                responder_host.to_string()
            } else {
                ip.to_string()
            }
        }
    };
    let port = parts[1]
        .as_int()
        .filter(|&p| (1..=u16::MAX as i64).contains(&p))
        .ok_or_else(|| RsvalkeyError::Protocol("Invalid port".into()))?;
    Ok((host, port as u16))
}

/// Parse a `CLUSTER NODES` reply.
///
/// One line per node:
/// `<id> <addr> <flags> <primary_id> <ping> <pong> <epoch> <link-state> [<slot>…]`
/// where `<addr>` is `ip:port[@cport][,hostname]`. Lines flagged `noaddr` are
/// skipped; replica lines are retained (when enabled) in a side bucket keyed
/// by their primary's id and attached after all primaries are known.
pub(crate) fn parse_cluster_nodes(
    text: &str,
    responder_host: &str,
    keep_replicas: bool,
) -> Result<HashMap<String, ParsedNode>> {
    let mut nodes: HashMap<String, ParsedNode> = HashMap::new();
    let mut pending_replicas: HashMap<String, Vec<ParsedNode>> = HashMap::new();
    let mut ranges_found = 0usize;

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 8 {
            return Err(RsvalkeyError::Protocol("Mandatory fields missing".into()));
        }

        let mut role = Role::Unknown;
        let mut noaddr = false;
        for flag in fields[2].split(',') {
            match flag {
                "master" => role = Role::Primary,
                "slave" => role = Role::Replica,
                "noaddr" => noaddr = true,
                _ => {}
            }
        }
        if noaddr {
            continue;
        }
        if role == Role::Unknown {
            return Err(RsvalkeyError::Protocol("Unknown role".into()));
        }
        if role == Role::Replica && !keep_replicas {
            continue;
        }

        // `ip:port@cport,hostname` → `ip:port`; the last ':' splits the port
        // so bare IPv6 addresses survive.
        let addr_field = fields[1];
        let addr_field = addr_field.split('@').next().unwrap_or(addr_field);
        let addr_field = addr_field.split(',').next().unwrap_or(addr_field);
        let (host_part, port_str) = addr_field
            .rsplit_once(':')
            .ok_or_else(|| RsvalkeyError::Protocol("Invalid node address".into()))?;
        let port = port_str
            .parse::<u16>()
            .ok()
            .filter(|&p| p > 0)
            .ok_or_else(|| RsvalkeyError::Protocol("Invalid port".into()))?;
        let host = if host_part.is_empty() {
            responder_host.to_string()
        } else {
            host_part.to_string()
        };
        let id = fields[0].to_string();

        if role == Role::Replica {
            let primary_id = fields[3].to_string();
            pending_replicas
                .entry(primary_id)
                .or_default()
                .push(ParsedNode {
                    host,
                    port,
                    id: Some(id),
                    role,
                    ranges: Vec::new(),
                    replicas: Vec::new(),
                });
            continue;
        }

        let mut ranges = Vec::new();
        for token in &fields[8..] {
            if token.starts_with('[') {
                // Migrating/importing markers sit at the end of the line.
                break;
            }
            if token.is_empty() {
                continue;
            }
            let (start_str, end_str) = match token.split_once('-') {
                Some((a, b)) => (a, b),
                None => (*token, *token),
            };
            let start = start_str
                .parse::<u16>()
                .map_err(|_| RsvalkeyError::Protocol("Invalid slot entry".into()))?;
            let end = end_str
                .parse::<u16>()
                .map_err(|_| RsvalkeyError::Protocol("Invalid slot entry".into()))?;
            ranges.push(SlotRange { start, end });
        }
        ranges_found += ranges.len();

        let addr = format_addr(&host, port);
        if nodes.contains_key(&addr) {
            return Err(RsvalkeyError::Protocol(
                "Duplicate addresses in cluster nodes response".into(),
            ));
        }
        nodes.insert(
            addr,
            ParsedNode {
                host,
                port,
                id: Some(id),
                role,
                ranges,
                replicas: Vec::new(),
            },
        );
    }

    if ranges_found == 0 {
        return Err(RsvalkeyError::Protocol("No slot information".into()));
    }

    for (primary_id, replicas) in pending_replicas {
        if let Some(primary) = nodes
            .values_mut()
            .find(|n| n.id.as_deref() == Some(primary_id.as_str()))
        {
            primary.replicas = replicas;
        }
    }

    Ok(nodes)
}

// ── Tests ──────────────────────────────────────────────────────────
