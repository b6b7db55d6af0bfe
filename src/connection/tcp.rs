//! A single connection to one cluster node.
//!
//! Wraps a `tokio::net::TcpStream` (optionally TLS-wrapped) with an integrated
//! read buffer, a RESP parser, and an output buffer so that several commands
//! can be appended and flushed in one socket write — the transport side of
//! pipelining and piggybacked topology refreshes.

use crate::config::{ClusterConfig, IpPreference};
use crate::error::{Result, RsvalkeyError};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_str;

use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Initial read buffer capacity.
const READ_BUF_CAPACITY: usize = 16 * 1024;

/// Hard cap on a single buffered reply.
const MAX_REPLY_SIZE: usize = 512 * 1024 * 1024;

trait NodeStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> NodeStream for T {}

/// One established connection to a node.
pub struct NodeConnection {
    stream: Box<dyn NodeStream>,
    /// Bytes read from the socket but not yet consumed by the parser.
    buf: BytesMut,
    /// Commands appended but not yet written to the socket.
    out: Vec<u8>,
    command_timeout: Option<Duration>,
}

impl NodeConnection {
    /// Open a TCP (or TLS) connection to `host:port`, honoring the configured
    /// connect timeout and IP family preference. Authentication and database
    /// selection are separate steps (see [`NodeConnection::init`]).
    pub async fn connect(host: &str, port: u16, config: &ClusterConfig) -> Result<Self> {
        let setup = Self::connect_inner(host, port, config);
        let conn = match config.connect_timeout {
            Some(t) => tokio::time::timeout(t, setup).await.map_err(|_| {
                RsvalkeyError::Timeout(format!("connection to {host}:{port} timed out after {t:?}"))
            })??,
            None => setup.await?,
        };
        Ok(conn)
    }

    async fn connect_inner(host: &str, port: u16, config: &ClusterConfig) -> Result<Self> {
        let addr = resolve(host, port, config.prefer).await?;
        let tcp = TcpStream::connect(addr).await?;
        tcp.set_nodelay(true).ok();

        #[cfg(feature = "tls")]
        let stream: Box<dyn NodeStream> = match &config.tls {
            Some(tls) => {
                let name = rustls::pki_types::ServerName::try_from(host.to_string())
                    .map_err(|e| RsvalkeyError::Protocol(format!("invalid TLS name {host}: {e}")))?;
                Box::new(tls.connector.connect(name, tcp).await?)
            }
            None => Box::new(tcp),
        };
        #[cfg(not(feature = "tls"))]
        let stream: Box<dyn NodeStream> = Box::new(tcp);

        Ok(Self {
            stream,
            buf: BytesMut::with_capacity(READ_BUF_CAPACITY),
            out: Vec::new(),
            command_timeout: config.command_timeout,
        })
    }

    /// Update the per-reply timeout on an established connection.
    pub fn set_command_timeout(&mut self, timeout: Option<Duration>) {
        self.command_timeout = timeout;
    }

    /// Append an already-serialized command to the output buffer.
    pub fn append(&mut self, wire: &[u8]) {
        self.out.extend_from_slice(wire);
    }

    /// Write any buffered commands to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let out = std::mem::take(&mut self.out);
        self.stream.write_all(&out).await?;
        Ok(())
    }

    /// Flush buffered commands, then read one reply.
    pub async fn read_reply(&mut self) -> Result<RespValue> {
        self.flush().await?;
        match self.command_timeout {
            Some(t) => tokio::time::timeout(t, self.read_reply_inner())
                .await
                .map_err(|_| RsvalkeyError::Timeout(format!("no reply within {t:?}")))?,
            None => self.read_reply_inner().await,
        }
    }

    async fn read_reply_inner(&mut self) -> Result<RespValue> {
        loop {
            if !self.buf.is_empty() {
                // Freeze the buffered bytes so bulk strings can be sliced
                // without copying; unconsumed trailing bytes are put back.
                let snapshot = self.buf.split().freeze();
                match parse(&snapshot) {
                    Ok((value, consumed)) => {
                        if consumed < snapshot.len() {
                            self.buf.extend_from_slice(&snapshot[consumed..]);
                        }
                        return Ok(value);
                    }
                    Err(RsvalkeyError::Incomplete) => {
                        self.buf.extend_from_slice(&snapshot);
                    }
                    Err(e) => {
                        self.buf.extend_from_slice(&snapshot);
                        return Err(e);
                    }
                }
            }

            if self.buf.len() >= MAX_REPLY_SIZE {
                return Err(RsvalkeyError::Protocol(format!(
                    "reply exceeds {MAX_REPLY_SIZE} bytes"
                )));
            }
            let n = self.stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(RsvalkeyError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
        }
    }

    /// Send one command and read its reply.
    pub async fn execute(&mut self, args: &[&str]) -> Result<RespValue> {
        self.append(&encode_command_str(args));
        self.read_reply().await
    }

    /// `AUTH <password>` or `AUTH <username> <password>`.
    pub async fn auth(&mut self, username: Option<&str>, password: &str) -> Result<()> {
        let reply = match username {
            Some(user) => self.execute(&["AUTH", user, password]).await?,
            None => self.execute(&["AUTH", password]).await?,
        };
        match reply {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            RespValue::Error(msg) => Err(RsvalkeyError::server(msg)),
            other => Err(RsvalkeyError::Protocol(format!(
                "unexpected AUTH reply: {}",
                other.type_name()
            ))),
        }
    }

    /// `SELECT <db>`; a no-op for database 0.
    pub async fn select_db(&mut self, db: u16) -> Result<()> {
        if db == 0 {
            return Ok(());
        }
        let reply = self.execute(&["SELECT", &db.to_string()]).await?;
        match reply {
            RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
            RespValue::Error(msg) => Err(RsvalkeyError::server(msg)),
            other => Err(RsvalkeyError::Protocol(format!(
                "unexpected SELECT reply: {}",
                other.type_name()
            ))),
        }
    }

    /// One-shot `ASKING` before a redirected retry. The reply content is
    /// irrelevant; only transport failures matter.
    pub async fn asking(&mut self) -> Result<()> {
        self.execute(&["ASKING"]).await?;
        Ok(())
    }

    /// Run the post-connect handshake: AUTH when credentials are configured,
    /// then SELECT when a non-zero database is configured.
    pub async fn init(&mut self, config: &ClusterConfig) -> Result<()> {
        if let Some(password) = &config.password {
            self.auth(config.username.as_deref(), password).await?;
        }
        self.select_db(config.select_db).await?;
        Ok(())
    }
}

/// Resolve `host:port`, preferring the configured IP family when possible.
async fn resolve(host: &str, port: u16, prefer: IpPreference) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    let picked = match prefer {
        IpPreference::Unspec => addrs.first(),
        IpPreference::V4 => addrs.iter().find(|a| a.is_ipv4()).or_else(|| addrs.first()),
        IpPreference::V6 => addrs.iter().find(|a| a.is_ipv6()).or_else(|| addrs.first()),
    };
    picked.copied().ok_or_else(|| {
        RsvalkeyError::Connection(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address found for {host}:{port}"),
        ))
    })
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn test_config() -> ClusterConfig {
        ClusterConfig::new("127.0.0.1:6379").unwrap()
    }

    /// Mock server answering each connection with the given bytes after a read.
    async fn mock_server(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.ok();
        });
        addr.to_string()
    }

    async fn connect_to(addr: &str) -> NodeConnection {
        let (host, port) = crate::config::split_addr(addr).unwrap();
        NodeConnection::connect(&host, port, &test_config())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn execute_roundtrip() {
        let addr = mock_server(b"+PONG\r\n".to_vec()).await;
        let mut conn = connect_to(&addr).await;
        let reply = conn.execute(&["PING"]).await.unwrap();
        assert_eq!(reply, RespValue::SimpleString("PONG".into()));
    }

    #[tokio::test]
    async fn pipelined_appends_share_one_write() {
        // Both replies arrive from a single flush.
        let addr = mock_server(b"+OK\r\n$5\r\nhello\r\n".to_vec()).await;
        let mut conn = connect_to(&addr).await;
        conn.append(&encode_command_str(&["SET", "k", "hello"]));
        conn.append(&encode_command_str(&["GET", "k"]));
        assert_eq!(
            conn.read_reply().await.unwrap(),
            RespValue::SimpleString("OK".into())
        );
        assert_eq!(
            conn.read_reply().await.unwrap(),
            RespValue::BulkString(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn split_reply_across_packets() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"$5\r\nhel").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            socket.write_all(b"lo\r\n").await.unwrap();
        });
        let mut conn = connect_to(&addr).await;
        let reply = conn.execute(&["GET", "k"]).await.unwrap();
        assert_eq!(reply, RespValue::BulkString(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn auth_success_and_failure() {
        let addr = mock_server(b"+OK\r\n".to_vec()).await;
        let mut conn = connect_to(&addr).await;
        conn.auth(Some("admin"), "secret").await.unwrap();

        let addr = mock_server(b"-ERR invalid password\r\n".to_vec()).await;
        let mut conn = connect_to(&addr).await;
        assert!(conn.auth(None, "wrong").await.is_err());
    }

    #[tokio::test]
    async fn select_db_zero_sends_nothing() {
        let addr = mock_server(Vec::new()).await;
        let mut conn = connect_to(&addr).await;
        conn.select_db(0).await.unwrap();
        assert!(conn.out.is_empty());
    }

    #[tokio::test]
    async fn select_db_nonzero() {
        let addr = mock_server(b"+OK\r\n".to_vec()).await;
        let mut conn = connect_to(&addr).await;
        conn.select_db(3).await.unwrap();
    }

    /// Mock server answering one canned reply per received command.
    async fn mock_server_multi(replies: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for reply in replies {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&reply).await.unwrap();
            }
        });
        addr.to_string()
    }

    #[tokio::test]
    async fn init_runs_auth_then_select() {
        let addr = mock_server_multi(vec![b"+OK\r\n".to_vec(), b"+OK\r\n".to_vec()]).await;
        let config = test_config().password("pw").select_db(2);
        let (host, port) = crate::config::split_addr(&addr).unwrap();
        let mut conn = NodeConnection::connect(&host, port, &config).await.unwrap();
        conn.init(&config).await.unwrap();
    }

    #[tokio::test]
    async fn asking_consumes_reply() {
        let addr = mock_server(b"+OK\r\n".to_vec()).await;
        let mut conn = connect_to(&addr).await;
        conn.asking().await.unwrap();
    }

    #[tokio::test]
    async fn server_close_is_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        let mut conn = connect_to(&addr).await;
        let err = conn.execute(&["PING"]).await.unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test]
    async fn connect_timeout_fires() {
        // RFC 5737 TEST-NET, unroutable.
        let config = test_config().connect_timeout(Duration::from_millis(50));
        let result = NodeConnection::connect("192.0.2.1", 6379, &config).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn command_timeout_fires() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            // Never reply.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let config = test_config().command_timeout(Duration::from_millis(50));
        let (host, port) = crate::config::split_addr(&addr).unwrap();
        let mut conn = NodeConnection::connect(&host, port, &config).await.unwrap();
        let err = conn.execute(&["PING"]).await.unwrap_err();
        assert!(matches!(err, RsvalkeyError::Timeout(_)));
    }
}
