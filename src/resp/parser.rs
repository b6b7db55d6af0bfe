//! Streaming RESP2/RESP3 reply parser.
//!
//! [`parse`] consumes one complete value from the front of a buffer and
//! returns `(value, bytes_consumed)`. A short buffer yields
//! `Err(Incomplete)` so the caller can read more bytes and retry; anything
//! malformed yields `Err(Protocol(…))`.
//!
//! Buffers are `Bytes` so bulk strings are extracted by reference-counted
//! `slice()` instead of copying.

use crate::error::{Result, RsvalkeyError};
use crate::resp::types::RespValue;
use bytes::Bytes;
use memchr::memchr;

/// Parse one RESP value from the front of `buf`.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    if buf.is_empty() {
        return Err(RsvalkeyError::Incomplete);
    }

    match buf[0] {
        b'+' => {
            let (line, next) = line_at(buf, 1)?;
            Ok((RespValue::SimpleString(utf8(line, "simple string")?), next))
        }
        b'-' => {
            let (line, next) = line_at(buf, 1)?;
            Ok((RespValue::Error(utf8(line, "error")?), next))
        }
        b':' => {
            let (line, next) = line_at(buf, 1)?;
            Ok((RespValue::Integer(atoi(line)?), next))
        }
        b'$' => {
            let (payload, next) = match bulk_payload(buf)? {
                Some(v) => v,
                None => return null_bulk(buf),
            };
            Ok((RespValue::BulkString(payload), next))
        }
        b'*' => {
            let (line, next) = line_at(buf, 1)?;
            let count = atoi(line)?;
            if count < 0 {
                return Ok((RespValue::Null, next));
            }
            let (elements, next) = elements_at(buf, next, count as usize)?;
            Ok((RespValue::Array(elements), next))
        }
        b'_' => {
            expect_crlf(buf, 1)?;
            Ok((RespValue::Null, 3))
        }
        b'#' => {
            if buf.len() < 4 {
                return Err(RsvalkeyError::Incomplete);
            }
            let val = match buf[1] {
                b't' => true,
                b'f' => false,
                other => {
                    return Err(RsvalkeyError::Protocol(format!(
                        "invalid boolean value: 0x{other:02x}"
                    )))
                }
            };
            expect_crlf(buf, 2)?;
            Ok((RespValue::Boolean(val), 4))
        }
        b',' => {
            let (line, next) = line_at(buf, 1)?;
            let s = utf8(line, "double")?;
            let d = match s.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                "nan" => f64::NAN,
                _ => s
                    .parse::<f64>()
                    .map_err(|e| RsvalkeyError::Protocol(format!("invalid double: {e}")))?,
            };
            Ok((RespValue::Double(d), next))
        }
        b'(' => {
            let (line, next) = line_at(buf, 1)?;
            let s = utf8(line, "big number")?;
            let digits = s.strip_prefix(['+', '-']).unwrap_or(&s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(RsvalkeyError::Protocol(format!("invalid big number: {s}")));
            }
            Ok((RespValue::BigNumber(s), next))
        }
        b'!' => {
            let (payload, next) = bulk_payload(buf)?
                .ok_or_else(|| RsvalkeyError::Protocol("negative bulk error length".into()))?;
            Ok((
                RespValue::BulkError(utf8(&payload, "bulk error")?),
                next,
            ))
        }
        b'=' => {
            let (payload, next) = bulk_payload(buf)?.ok_or_else(|| {
                RsvalkeyError::Protocol("negative verbatim string length".into())
            })?;
            // Layout: three-byte encoding, ':', then the body.
            if payload.len() < 4 || payload[3] != b':' {
                return Err(RsvalkeyError::Protocol(
                    "verbatim string missing encoding prefix".into(),
                ));
            }
            Ok((
                RespValue::VerbatimString {
                    encoding: utf8(&payload[..3], "verbatim encoding")?,
                    data: utf8(&payload[4..], "verbatim string")?,
                },
                next,
            ))
        }
        b'%' => {
            let (line, next) = line_at(buf, 1)?;
            let count = non_negative(atoi(line)?, "map")?;
            let (pairs, next) = pairs_at(buf, next, count)?;
            Ok((RespValue::Map(pairs), next))
        }
        b'~' => {
            let (line, next) = line_at(buf, 1)?;
            let count = non_negative(atoi(line)?, "set")?;
            let (elements, next) = elements_at(buf, next, count)?;
            Ok((RespValue::Set(elements), next))
        }
        b'>' => {
            let (line, mut next) = line_at(buf, 1)?;
            let count = non_negative(atoi(line)?, "push")?;
            if count == 0 {
                return Err(RsvalkeyError::Protocol(
                    "push message must carry a kind element".into(),
                ));
            }
            let (kind_val, consumed) = parse(&buf.slice(next..))?;
            next += consumed;
            let kind = kind_val
                .as_str()
                .ok_or_else(|| {
                    RsvalkeyError::Protocol(format!(
                        "push kind must be a string, got {}",
                        kind_val.type_name()
                    ))
                })?
                .to_string();
            let (data, next) = elements_at(buf, next, count - 1)?;
            Ok((RespValue::Push { kind, data }, next))
        }
        b'|' => {
            let (line, next) = line_at(buf, 1)?;
            let count = non_negative(atoi(line)?, "attribute")?;
            let (attributes, mut next) = pairs_at(buf, next, count)?;
            let (data, consumed) = parse(&buf.slice(next..))?;
            next += consumed;
            Ok((
                RespValue::Attribute {
                    data: Box::new(data),
                    attributes,
                },
                next,
            ))
        }
        other => Err(RsvalkeyError::Protocol(format!(
            "unknown RESP type byte: 0x{other:02x}"
        ))),
    }
}

/// Parse from a plain byte slice (copies into `Bytes` first). Test helper;
/// prefer [`parse`] with a pre-existing `Bytes` on the hot path.
pub fn parse_slice(buf: &[u8]) -> Result<(RespValue, usize)> {
    parse(&Bytes::copy_from_slice(buf))
}

// ── Helpers ────────────────────────────────────────────────────────

/// Read the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
fn line_at(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    match memchr(b'\r', &buf[offset..]) {
        Some(pos) => {
            let cr = offset + pos;
            if cr + 1 >= buf.len() {
                Err(RsvalkeyError::Incomplete)
            } else if buf[cr + 1] != b'\n' {
                Err(RsvalkeyError::Protocol("expected \\n after \\r".into()))
            } else {
                Ok((&buf[offset..cr], cr + 2))
            }
        }
        None => Err(RsvalkeyError::Incomplete),
    }
}

#[inline]
fn expect_crlf(buf: &[u8], at: usize) -> Result<()> {
    if buf.len() < at + 2 {
        return Err(RsvalkeyError::Incomplete);
    }
    if buf[at] != b'\r' || buf[at + 1] != b'\n' {
        return Err(RsvalkeyError::Protocol("missing \\r\\n terminator".into()));
    }
    Ok(())
}

/// Decimal integer from raw bytes, without allocating.
fn atoi(bytes: &[u8]) -> Result<i64> {
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        Some(_) => (false, bytes),
        None => return Err(RsvalkeyError::Protocol("empty integer".into())),
    };
    if digits.is_empty() {
        return Err(RsvalkeyError::Protocol("integer has no digits".into()));
    }

    // Accumulate negative so i64::MIN round-trips.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RsvalkeyError::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| RsvalkeyError::Protocol("integer overflow".into()))?;
    }
    Ok(if negative { n } else { -n })
}

fn non_negative(count: i64, what: &str) -> Result<usize> {
    if count < 0 {
        return Err(RsvalkeyError::Protocol(format!("negative {what} count")));
    }
    Ok(count as usize)
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| RsvalkeyError::Protocol(format!("invalid UTF-8 in {what}: {e}")))
}

/// Length-prefixed payload shared by `$`, `!` and `=` frames.
/// Returns `None` for the RESP2 null form (`$-1`).
fn bulk_payload(buf: &Bytes) -> Result<Option<(Bytes, usize)>> {
    let (line, next) = line_at(buf, 1)?;
    let len = atoi(line)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    let data_end = next + len;
    if buf.len() < data_end + 2 {
        return Err(RsvalkeyError::Incomplete);
    }
    if buf[data_end] != b'\r' || buf[data_end + 1] != b'\n' {
        return Err(RsvalkeyError::Protocol(
            "bulk payload not terminated by \\r\\n".into(),
        ));
    }
    Ok(Some((buf.slice(next..data_end), data_end + 2)))
}

/// `$-1\r\n` — null bulk string. Re-parses the header only to learn its size.
fn null_bulk(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (_, next) = line_at(buf, 1)?;
    Ok((RespValue::Null, next))
}

/// Parse `count` consecutive values starting at `offset`.
fn elements_at(buf: &Bytes, mut offset: usize, count: usize) -> Result<(Vec<RespValue>, usize)> {
    let mut elements = Vec::with_capacity(count);
    for _ in 0..count {
        let (val, consumed) = parse(&buf.slice(offset..))?;
        elements.push(val);
        offset += consumed;
    }
    Ok((elements, offset))
}

/// Parse `count` consecutive key/value pairs starting at `offset`.
fn pairs_at(
    buf: &Bytes,
    mut offset: usize,
    count: usize,
) -> Result<(Vec<(RespValue, RespValue)>, usize)> {
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let (key, consumed) = parse(&buf.slice(offset..))?;
        offset += consumed;
        let (val, consumed) = parse(&buf.slice(offset..))?;
        offset += consumed;
        pairs.push((key, val));
    }
    Ok((pairs, offset))
}

// ── Tests ──────────────────────────────────────────────────────────
