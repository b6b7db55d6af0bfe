//! Command inspection: find the first key of an already-serialized command.
//!
//! The routers receive commands in wire format (`*N\r\n$len\r\n…`). To pick a
//! shard they need the first key, whose position depends on the command. A
//! static table maps command (and subcommand) names to a key-locating rule;
//! the serialized buffer is walked lazily, stopping at the first key.

use crate::error::{Result, RsvalkeyError};

/// Longest command or subcommand name considered for lookup.
const MAX_COMMAND_LEN: usize = 64;

/// How a command's first key is located.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirstKey {
    /// The command takes no keys.
    None,
    /// The key sits at a fixed argument index.
    At(u8),
    /// The argument at the index is the key count; the key follows it.
    KeynumAt(u8),
    /// The key follows a keyword that appears at `startfrom` or later.
    AfterKeyword {
        keyword: &'static str,
        startfrom: u8,
    },
}

struct CommandDef {
    name: &'static str,
    sub: Option<&'static str>,
    /// Positive: exact argument count. Negative: minimum count.
    arity: i16,
    first_key: FirstKey,
}

const fn def(name: &'static str, arity: i16, first_key: FirstKey) -> CommandDef {
    CommandDef {
        name,
        sub: None,
        arity,
        first_key,
    }
}

const fn subdef(
    name: &'static str,
    sub: &'static str,
    arity: i16,
    first_key: FirstKey,
) -> CommandDef {
    CommandDef {
        name,
        sub: Some(sub),
        arity,
        first_key,
    }
}

use FirstKey::{AfterKeyword, At, KeynumAt, None as NoKey};

/// Key-position table, sorted by `(name, sub)` for binary search.
/// Derived from the server's command metadata.
static COMMANDS: &[CommandDef] = &[
    def("APPEND", 3, At(1)),
    def("ASKING", 1, NoKey),
    def("AUTH", -2, NoKey),
    def("BITCOUNT", -2, At(1)),
    def("BITFIELD", -2, At(1)),
    def("BITFIELD_RO", -2, At(1)),
    def("BITOP", -4, At(2)),
    def("BITPOS", -3, At(1)),
    def("BLMOVE", 6, At(1)),
    def("BLMPOP", -5, KeynumAt(2)),
    def("BLPOP", -3, At(1)),
    def("BRPOP", -3, At(1)),
    def("BRPOPLPUSH", 4, At(1)),
    def("BZMPOP", -5, KeynumAt(2)),
    def("BZPOPMAX", -3, At(1)),
    def("BZPOPMIN", -3, At(1)),
    def("COPY", -3, At(1)),
    def("DBSIZE", 1, NoKey),
    def("DECR", 2, At(1)),
    def("DECRBY", 3, At(1)),
    def("DEL", -2, At(1)),
    def("DUMP", 2, At(1)),
    def("ECHO", 2, NoKey),
    def("EVAL", -3, KeynumAt(2)),
    def("EVALSHA", -3, KeynumAt(2)),
    def("EVALSHA_RO", -3, KeynumAt(2)),
    def("EVAL_RO", -3, KeynumAt(2)),
    def("EXISTS", -2, At(1)),
    def("EXPIRE", -3, At(1)),
    def("EXPIREAT", -3, At(1)),
    def("EXPIRETIME", 2, At(1)),
    def("FCALL", -3, KeynumAt(2)),
    def("FCALL_RO", -3, KeynumAt(2)),
    def("FLUSHALL", -1, NoKey),
    def("FLUSHDB", -1, NoKey),
    def("GEOADD", -5, At(1)),
    def("GEODIST", -4, At(1)),
    def("GEOHASH", -2, At(1)),
    def("GEOPOS", -2, At(1)),
    def("GEORADIUS", -6, At(1)),
    def("GEORADIUSBYMEMBER", -5, At(1)),
    def("GEOSEARCH", -7, At(1)),
    def("GEOSEARCHSTORE", -7, At(1)),
    def("GET", 2, At(1)),
    def("GETBIT", 3, At(1)),
    def("GETDEL", 2, At(1)),
    def("GETEX", -2, At(1)),
    def("GETRANGE", 4, At(1)),
    def("GETSET", 3, At(1)),
    def("HDEL", -3, At(1)),
    def("HEXISTS", 3, At(1)),
    def("HGET", 3, At(1)),
    def("HGETALL", 2, At(1)),
    def("HINCRBY", 4, At(1)),
    def("HINCRBYFLOAT", 4, At(1)),
    def("HKEYS", 2, At(1)),
    def("HLEN", 2, At(1)),
    def("HMGET", -3, At(1)),
    def("HMSET", -4, At(1)),
    def("HRANDFIELD", -2, At(1)),
    def("HSCAN", -3, At(1)),
    def("HSET", -4, At(1)),
    def("HSETNX", 4, At(1)),
    def("HSTRLEN", 3, At(1)),
    def("HVALS", 2, At(1)),
    def("INCR", 2, At(1)),
    def("INCRBY", 3, At(1)),
    def("INCRBYFLOAT", 3, At(1)),
    def("INFO", -1, NoKey),
    def("KEYS", 2, NoKey),
    def("LASTSAVE", 1, NoKey),
    def("LCS", -3, At(1)),
    def("LINDEX", 3, At(1)),
    def("LINSERT", 5, At(1)),
    def("LLEN", 2, At(1)),
    def("LMOVE", 5, At(1)),
    def("LMPOP", -4, KeynumAt(1)),
    def("LPOP", -2, At(1)),
    def("LPOS", -3, At(1)),
    def("LPUSH", -3, At(1)),
    def("LPUSHX", -3, At(1)),
    def("LRANGE", 4, At(1)),
    def("LREM", 4, At(1)),
    def("LSET", 4, At(1)),
    def("LTRIM", 4, At(1)),
    def("MGET", -2, At(1)),
    def("MIGRATE", -6, At(3)),
    def("MSET", -3, At(1)),
    def("MSETNX", -3, At(1)),
    subdef("OBJECT", "ENCODING", 3, At(2)),
    subdef("OBJECT", "FREQ", 3, At(2)),
    subdef("OBJECT", "IDLETIME", 3, At(2)),
    subdef("OBJECT", "REFCOUNT", 3, At(2)),
    def("PERSIST", 2, At(1)),
    def("PEXPIRE", -3, At(1)),
    def("PEXPIREAT", -3, At(1)),
    def("PEXPIRETIME", 2, At(1)),
    def("PFADD", -2, At(1)),
    def("PFCOUNT", -2, At(1)),
    def("PFMERGE", -2, At(1)),
    def("PING", -1, NoKey),
    def("PSETEX", 4, At(1)),
    def("PTTL", 2, At(1)),
    def("RANDOMKEY", 1, NoKey),
    def("RENAME", 3, At(1)),
    def("RENAMENX", 3, At(1)),
    def("RESTORE", -4, At(1)),
    def("RPOP", -2, At(1)),
    def("RPOPLPUSH", 3, At(1)),
    def("RPUSH", -3, At(1)),
    def("RPUSHX", -3, At(1)),
    def("SADD", -3, At(1)),
    def("SCARD", 2, At(1)),
    def("SDIFF", -2, At(1)),
    def("SDIFFSTORE", -3, At(1)),
    def("SELECT", 2, NoKey),
    def("SET", -3, At(1)),
    def("SETBIT", 4, At(1)),
    def("SETEX", 4, At(1)),
    def("SETNX", 3, At(1)),
    def("SETRANGE", 4, At(1)),
    def("SINTER", -2, At(1)),
    def("SINTERCARD", -3, KeynumAt(1)),
    def("SINTERSTORE", -3, At(1)),
    def("SISMEMBER", 3, At(1)),
    def("SMEMBERS", 2, At(1)),
    def("SMISMEMBER", -3, At(1)),
    def("SMOVE", 4, At(1)),
    def("SORT", -2, At(1)),
    def("SORT_RO", -2, At(1)),
    def("SPOP", -2, At(1)),
    def("SRANDMEMBER", -2, At(1)),
    def("SREM", -3, At(1)),
    def("SSCAN", -3, At(1)),
    def("STRLEN", 2, At(1)),
    def("SUBSTR", 4, At(1)),
    def("SUNION", -2, At(1)),
    def("SUNIONSTORE", -3, At(1)),
    def("TIME", 1, NoKey),
    def("TOUCH", -2, At(1)),
    def("TTL", 2, At(1)),
    def("TYPE", 2, At(1)),
    def("UNLINK", -2, At(1)),
    def("WAIT", 3, NoKey),
    def("XACK", -4, At(1)),
    def("XADD", -5, At(1)),
    def("XAUTOCLAIM", -7, At(1)),
    def("XCLAIM", -6, At(1)),
    def("XDEL", -3, At(1)),
    subdef("XINFO", "CONSUMERS", 4, At(2)),
    subdef("XINFO", "GROUPS", 3, At(2)),
    subdef("XINFO", "STREAM", -3, At(2)),
    def("XLEN", 2, At(1)),
    def("XPENDING", -3, At(1)),
    def("XRANGE", -4, At(1)),
    def(
        "XREAD",
        -4,
        AfterKeyword {
            keyword: "STREAMS",
            startfrom: 1,
        },
    ),
    def(
        "XREADGROUP",
        -7,
        AfterKeyword {
            keyword: "STREAMS",
            startfrom: 4,
        },
    ),
    def("XREVRANGE", -4, At(1)),
    def("XSETID", -3, At(1)),
    def("XTRIM", -4, At(1)),
    def("ZADD", -4, At(1)),
    def("ZCARD", 2, At(1)),
    def("ZCOUNT", 4, At(1)),
    def("ZDIFF", -3, KeynumAt(1)),
    def("ZDIFFSTORE", -4, At(1)),
    def("ZINCRBY", 4, At(1)),
    def("ZINTER", -3, KeynumAt(1)),
    def("ZINTERCARD", -3, KeynumAt(1)),
    def("ZINTERSTORE", -4, At(1)),
    def("ZLEXCOUNT", 4, At(1)),
    def("ZMPOP", -4, KeynumAt(1)),
    def("ZMSCORE", -3, At(1)),
    def("ZPOPMAX", -2, At(1)),
    def("ZPOPMIN", -2, At(1)),
    def("ZRANDMEMBER", -2, At(1)),
    def("ZRANGE", -4, At(1)),
    def("ZRANGEBYLEX", -4, At(1)),
    def("ZRANGEBYSCORE", -4, At(1)),
    def("ZRANGESTORE", -5, At(1)),
    def("ZRANK", -3, At(1)),
    def("ZREM", -3, At(1)),
    def("ZREMRANGEBYLEX", 4, At(1)),
    def("ZREMRANGEBYRANK", 4, At(1)),
    def("ZREMRANGEBYSCORE", 4, At(1)),
    def("ZREVRANGE", -4, At(1)),
    def("ZREVRANGEBYLEX", -4, At(1)),
    def("ZREVRANGEBYSCORE", -4, At(1)),
    def("ZREVRANK", -3, At(1)),
    def("ZSCAN", -3, At(1)),
    def("ZSCORE", 3, At(1)),
    def("ZUNION", -3, KeynumAt(1)),
    def("ZUNIONSTORE", -4, At(1)),
];

/// Look up a command by its (uppercased) name and optional subcommand.
///
/// Entries that carry a subcommand only match when one is given; the
/// comparison order mirrors the table sort `(name, sub)`.
fn lookup(name: &str, sub: Option<&str>) -> Option<&'static CommandDef> {
    let mut lo = 0usize;
    let mut hi = COMMANDS.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        let c = &COMMANDS[mid];
        let mut ord = c.name.cmp(name);
        if ord == std::cmp::Ordering::Equal {
            if let Some(subname) = c.sub {
                // The command is only addressable with a subcommand.
                ord = subname.cmp(sub?);
            }
        }
        match ord {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Some(c),
        }
    }
    None
}

/// Uppercase-fold an argument into a fixed buffer for table lookup.
fn fold_name(arg: &[u8], buf: &mut [u8; MAX_COMMAND_LEN]) -> Option<usize> {
    if arg.len() > MAX_COMMAND_LEN {
        return None;
    }
    buf[..arg.len()].copy_from_slice(arg);
    buf[..arg.len()].make_ascii_uppercase();
    std::str::from_utf8(&buf[..arg.len()]).ok()?;
    Some(arg.len())
}

/// Walks bulk strings of a serialized multi-bulk command.
struct BulkWalker<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BulkWalker<'a> {
    /// Parse `$<len>\r\n<payload>\r\n`; returns the payload span.
    fn next_bulk(&mut self) -> Option<(usize, usize)> {
        let buf = self.buf;
        let mut p = self.pos;
        if p >= buf.len() || buf[p] != b'$' {
            return None;
        }
        p += 1;
        let mut len: usize = 0;
        let digits_start = p;
        while p < buf.len() && buf[p].is_ascii_digit() {
            len = len.checked_mul(10)?.checked_add((buf[p] - b'0') as usize)?;
            p += 1;
        }
        if p == digits_start {
            return None;
        }
        if buf.len() < p + 2 || buf[p] != b'\r' || buf[p + 1] != b'\n' {
            return None;
        }
        p += 2;
        let start = p;
        p = p.checked_add(len)?;
        if buf.len() < p + 2 || buf[p] != b'\r' || buf[p + 1] != b'\n' {
            return None;
        }
        self.pos = p + 2;
        Some((start, len))
    }
}

/// Locate the first key of a serialized command.
///
/// Returns `Ok(Some((offset, len)))` with the key's span inside `cmd`,
/// `Ok(None)` when the command legitimately takes no keys, or a protocol
/// error for unknown commands, arity mismatches and malformed framing.
pub(crate) fn first_key_span(cmd: &[u8]) -> Result<Option<(usize, usize)>> {
    let parse_error = || RsvalkeyError::Protocol("Command parse error".to_string());

    // Multi-bulk header: *<argc>\r\n
    if cmd.first() != Some(&b'*') {
        return Err(parse_error());
    }
    let mut p = 1;
    let mut argc: usize = 0;
    let digits_start = p;
    while p < cmd.len() && cmd[p].is_ascii_digit() {
        argc = argc
            .checked_mul(10)
            .and_then(|n| n.checked_add((cmd[p] - b'0') as usize))
            .ok_or_else(parse_error)?;
        p += 1;
    }
    if p == digits_start || cmd.len() < p + 2 || cmd[p] != b'\r' || cmd[p + 1] != b'\n' {
        return Err(parse_error());
    }
    if argc == 0 {
        return Err(parse_error());
    }

    let mut walker = BulkWalker {
        buf: cmd,
        pos: p + 2,
    };

    let arg0 = walker.next_bulk().ok_or_else(parse_error)?;
    let arg1 = if argc > 1 {
        Some(walker.next_bulk().ok_or_else(parse_error)?)
    } else {
        None
    };

    let mut name_buf = [0u8; MAX_COMMAND_LEN];
    let mut sub_buf = [0u8; MAX_COMMAND_LEN];
    let unknown = || {
        let name = String::from_utf8_lossy(&cmd[arg0.0..arg0.0 + arg0.1]).into_owned();
        let msg = match arg1 {
            Some((s, l)) => {
                format!("Unknown command {} {}", name, String::from_utf8_lossy(&cmd[s..s + l]))
            }
            None => format!("Unknown command {name}"),
        };
        RsvalkeyError::Protocol(msg)
    };

    let name_len = fold_name(&cmd[arg0.0..arg0.0 + arg0.1], &mut name_buf).ok_or_else(unknown)?;
    let name = std::str::from_utf8(&name_buf[..name_len]).expect("folded above");
    let sub = match arg1 {
        Some((s, l)) => fold_name(&cmd[s..s + l], &mut sub_buf)
            .map(|len| std::str::from_utf8(&sub_buf[..len]).expect("folded above")),
        None => None,
    };

    let info = lookup(name, sub).ok_or_else(unknown)?;

    let keys_error = || {
        let msg = match info.sub {
            Some(sub) => format!("Failed to find keys of command {} {}", info.name, sub),
            None => format!("Failed to find keys of command {}", info.name),
        };
        RsvalkeyError::Protocol(msg)
    };

    // Arity: positive is exact, negative is a minimum.
    if (info.arity >= 0 && argc as i64 != info.arity as i64)
        || (info.arity < 0 && (argc as i64) < -(info.arity as i64))
    {
        return Err(keys_error());
    }

    if info.first_key == NoKey {
        return Ok(None);
    }
    // The command takes keys but only the name was given.
    let Some(arg1) = arg1 else {
        return Err(keys_error());
    };

    if let AfterKeyword { keyword, startfrom } = info.first_key {
        // Search for the keyword at `startfrom` or later; the next arg is
        // the first key.
        let mut arg = arg1;
        let mut argidx = 1usize;
        loop {
            if argidx >= startfrom as usize
                && cmd[arg.0..arg.0 + arg.1].eq_ignore_ascii_case(keyword.as_bytes())
            {
                let key = walker.next_bulk().ok_or_else(keys_error)?;
                return Ok(Some(key));
            }
            argidx += 1;
            if argidx >= argc {
                return Err(keys_error());
            }
            arg = walker.next_bulk().ok_or_else(keys_error)?;
        }
    }

    let keypos = match info.first_key {
        At(pos) | KeynumAt(pos) => pos as usize,
        _ => unreachable!(),
    };

    // Skip forward to the argument at `keypos`.
    let mut arg = arg1;
    let mut argidx = 1usize;
    while argidx < keypos {
        arg = walker.next_bulk().ok_or_else(keys_error)?;
        argidx += 1;
    }

    if matches!(info.first_key, KeynumAt(_)) {
        // `arg` is the ASCII key count; zero means the command has no keys.
        if &cmd[arg.0..arg.0 + arg.1] == b"0" {
            return Ok(None);
        }
        arg = walker.next_bulk().ok_or_else(keys_error)?;
    }

    if info.name == "MIGRATE" && arg.1 == 0 {
        // MIGRATE host port "" db timeout … KEYS key [key …]: the real key
        // set trails behind a KEYS keyword, which is not supported.
        return Err(keys_error());
    }

    Ok(Some(arg))
}

// ── Tests ──────────────────────────────────────────────────────────
