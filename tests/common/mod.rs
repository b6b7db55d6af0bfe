//! Shared helpers for integration tests.
//!
//! Every test runs against in-process mock nodes: plain TCP listeners on
//! std threads that parse incoming RESP commands and answer from a
//! per-node handler closure. No external server is required, and the
//! thread-based design serves the blocking client and `#[tokio::test]`
//! bodies alike.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};

pub type Handler = Box<dyn FnMut(&[String]) -> Vec<u8> + Send>;

/// A scripted cluster node.
pub struct MockNode {
    pub host: String,
    pub port: u16,
    handler: Arc<Mutex<Handler>>,
    /// Every command received, across all connections, in arrival order.
    log: Arc<Mutex<Vec<Vec<String>>>>,
}

impl MockNode {
    /// Bind a listener and start serving. The handler can be installed (or
    /// replaced) later with [`MockNode::set_handler`]; until then every
    /// command is answered with an error.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handler: Arc<Mutex<Handler>> =
            Arc::new(Mutex::new(Box::new(|_| error("ERR no handler installed"))));
        let log: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));

        let accept_handler = handler.clone();
        let accept_log = log.clone();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let handler = accept_handler.clone();
                let log = accept_log.clone();
                std::thread::spawn(move || serve_connection(stream, handler, log));
            }
        });

        Self {
            host: "127.0.0.1".to_string(),
            port,
            handler,
            log,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn set_handler(&self, f: impl FnMut(&[String]) -> Vec<u8> + Send + 'static) {
        *self.handler.lock().unwrap() = Box::new(f);
    }

    /// How many commands with the given name this node has received.
    pub fn received(&self, name: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args.first().is_some_and(|a| a.eq_ignore_ascii_case(name)))
            .count()
    }

    /// All received commands, for order-sensitive assertions.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.log.lock().unwrap().clone()
    }
}

fn serve_connection(
    mut stream: std::net::TcpStream,
    handler: Arc<Mutex<Handler>>,
    log: Arc<Mutex<Vec<Vec<String>>>>,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        // Answer every complete command already buffered.
        while let Some((args, consumed)) = parse_command(&buf) {
            buf.drain(..consumed);
            log.lock().unwrap().push(args.clone());
            let response = {
                let mut handler = handler.lock().unwrap();
                (*handler)(&args)
            };
            if stream.write_all(&response).is_err() {
                return;
            }
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Parse one complete multi-bulk command; `None` when more bytes are needed.
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    let mut pos = 0;
    if buf.get(pos) != Some(&b'*') {
        return None;
    }
    pos += 1;
    let (argc, next) = read_int_line(buf, pos)?;
    pos = next;
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        if buf.get(pos) != Some(&b'$') {
            return None;
        }
        pos += 1;
        let (len, next) = read_int_line(buf, pos)?;
        pos = next;
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[pos..pos + len]).into_owned());
        pos += len + 2;
    }
    Some((args, pos))
}

fn read_int_line(buf: &[u8], mut pos: usize) -> Option<(usize, usize)> {
    let mut n = 0usize;
    let start = pos;
    while let Some(&b) = buf.get(pos) {
        if b.is_ascii_digit() {
            n = n * 10 + (b - b'0') as usize;
            pos += 1;
        } else {
            break;
        }
    }
    if pos == start || buf.get(pos) != Some(&b'\r') || buf.get(pos + 1) != Some(&b'\n') {
        return None;
    }
    Some((n, pos + 2))
}

// ── Reply builders ─────────────────────────────────────────────────

pub fn ok() -> Vec<u8> {
    b"+OK\r\n".to_vec()
}

pub fn pong() -> Vec<u8> {
    b"+PONG\r\n".to_vec()
}

pub fn bulk(s: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", s.len(), s).into_bytes()
}

pub fn nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

pub fn error(msg: &str) -> Vec<u8> {
    format!("-{msg}\r\n").into_bytes()
}

pub fn moved(slot: u16, addr: &str) -> Vec<u8> {
    error(&format!("MOVED {slot} {addr}"))
}

pub fn ask(slot: u16, addr: &str) -> Vec<u8> {
    error(&format!("ASK {slot} {addr}"))
}

/// Encode a `CLUSTER SLOTS` reply from `(start, end, host, port)` shards.
/// Each entry is `[start, end, [host, port, id]]`.
pub fn cluster_slots(shards: &[(u16, u16, &str, u16)]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", shards.len()).into_bytes();
    for (start, end, host, port) in shards {
        out.extend_from_slice(format!("*3\r\n:{start}\r\n:{end}\r\n").as_bytes());
        out.extend_from_slice(b"*3\r\n");
        out.extend_from_slice(format!("${}\r\n{}\r\n", host.len(), host).as_bytes());
        out.extend_from_slice(format!(":{port}\r\n").as_bytes());
        out.extend_from_slice(b"$5\r\nabcde\r\n");
    }
    out
}
