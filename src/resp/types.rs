//! RESP reply tree.
//!
//! The router treats RESP3 as transparent: every RESP3 type is represented so
//! replies pass through unharmed, but nothing in the crate interprets them
//! beyond strings, integers, arrays and errors.

use bytes::Bytes;

/// A single RESP2/RESP3 protocol value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// `+OK\r\n`
    SimpleString(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:1000\r\n`
    Integer(i64),
    /// `$6\r\nfoobar\r\n` — zero-copy slice of the read buffer.
    BulkString(Bytes),
    /// `*2\r\n…`
    Array(Vec<RespValue>),
    /// `$-1\r\n`, `*-1\r\n` (RESP2) or `_\r\n` (RESP3)
    Null,
    /// `,3.14\r\n` (RESP3)
    Double(f64),
    /// `#t\r\n` / `#f\r\n` (RESP3)
    Boolean(bool),
    /// `%N\r\n…` (RESP3 map)
    Map(Vec<(RespValue, RespValue)>),
    /// `~N\r\n…` (RESP3 set)
    Set(Vec<RespValue>),
    /// `=15\r\ntxt:…\r\n` (RESP3) — CLUSTER NODES may arrive as this type.
    VerbatimString { encoding: String, data: String },
    /// `(…\r\n` (RESP3 big number)
    BigNumber(String),
    /// `!21\r\n…\r\n` (RESP3 bulk error)
    BulkError(String),
    /// `>N\r\n…` (RESP3 push message)
    Push { kind: String, data: Vec<RespValue> },
    /// `|N\r\n…` (RESP3 attribute preceding the actual value)
    Attribute {
        data: Box<RespValue>,
        attributes: Vec<(RespValue, RespValue)>,
    },
}

impl RespValue {
    /// View this value as a UTF-8 string, if it is string-shaped.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            Self::VerbatimString { data, .. } => Some(data),
            _ => None,
        }
    }

    /// View this value as raw bytes, if it is string-shaped.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::BulkString(b) => Some(b),
            Self::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Integer value, if this is an integer reply.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Consume into the element vector, if this is an array reply.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True when this is a server error (simple or bulk).
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_) | Self::BulkError(_))
    }

    /// The error message, when this is a server error.
    pub fn as_error_msg(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            Self::BulkError(msg) => Some(msg),
            _ => None,
        }
    }

    /// Type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple_string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk_string",
            Self::Array(_) => "array",
            Self::Null => "null",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Map(_) => "map",
            Self::Set(_) => "set",
            Self::VerbatimString { .. } => "verbatim_string",
            Self::BigNumber(_) => "big_number",
            Self::BulkError(_) => "bulk_error",
            Self::Push { .. } => "push",
            Self::Attribute { .. } => "attribute",
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
