//! RESP command serializer.
//!
//! Commands go on the wire as multi-bulk arrays of binary-safe strings:
//! `*<N>\r\n$<len>\r\narg1\r\n…`

use itoa::Buffer;

/// Encode a command (list of byte-string arguments) into wire format.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut cap = 1 + 10 + 2;
    for arg in args {
        cap += 1 + 10 + 2 + arg.len() + 2;
    }

    let mut buf = Vec::with_capacity(cap);
    let mut digits = Buffer::new();

    buf.push(b'*');
    buf.extend_from_slice(digits.format(args.len()).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(digits.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }

    buf
}

/// Encode a command from string arguments.
pub fn encode_command_str(args: &[&str]) -> Vec<u8> {
    let byte_args: Vec<&[u8]> = args.iter().map(|s| s.as_bytes()).collect();
    encode_command(&byte_args)
}

/// Build a wire-format command ergonomically.
///
/// ```ignore
/// let bytes = cmd!("SET", "mykey", "myvalue");
/// ```
#[macro_export]
macro_rules! cmd {
    ($($arg:expr),+ $(,)?) => {{
        $crate::resp::writer::encode_command_str(&[$($arg),+])
    }};
}

// ── Tests ──────────────────────────────────────────────────────────
