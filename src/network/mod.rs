//! Broker Connection (C2): one addressable endpoint, its socket, and the framed request/response
//! round trip.
//!
//! Grounded in the teacher's `tokio_service::Service` wrapper around a raw socket, generalized to
//! a plain async handle (no `Service`/`tokio-proto` pipeline) per the design notes in §9 of the
//! spec: this crate models the worker itself as the actor, so the connection only needs to expose
//! `send_sync`/`send_async`/`close`/`connected?`.

use std::io;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use native_tls::TlsConnector;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time;
use tokio_native_tls::{TlsConnector as AsyncTlsConnector, TlsStream};

use crate::errors::{Error, ErrorKind, Result, ResultExt};

/// Opaque TLS parameters. Verification details (CA bundle, client cert) are an application
/// concern; this core only decides whether to wrap the socket.
#[derive(Debug, Clone, Default)]
pub struct SslOptions {
    pub danger_accept_invalid_certs: bool,
}

enum Socket {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Socket {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.write_all(buf).await,
            Socket::Tls(s) => s.write_all(buf).await,
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Socket::Plain(s) => s.read_exact(buf).await.map(|_| ()),
            Socket::Tls(s) => s.read_exact(buf).await.map(|_| ()),
        }
    }

    /// A non-blocking zero-length peek: `Ok(true)` if the peer has closed the connection.
    fn peer_closed(&self) -> bool {
        match self {
            Socket::Plain(s) => {
                let mut probe = [0u8; 1];
                matches!(s.try_read(&mut probe), Ok(0))
            }
            Socket::Tls(_) => false,
        }
    }
}

/// One addressable Kafka broker endpoint. `node_id == -1` marks a bootstrap broker that has not
/// yet been identified by a Metadata response (Invariant 5).
pub struct BrokerConnection {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
    socket: Mutex<Option<Socket>>,
}

impl BrokerConnection {
    /// Connect to `host:port`, wrapping in TLS when `use_ssl` is set.
    pub async fn connect(
        node_id: i32,
        host: &str,
        port: i32,
        use_ssl: bool,
        ssl_options: &SslOptions,
    ) -> Result<BrokerConnection> {
        let tcp = TcpStream::connect((host, port as u16)).await?;
        tcp.set_nodelay(true).ok();

        let socket = if use_ssl {
            let mut builder = TlsConnector::builder();
            builder.danger_accept_invalid_certs(ssl_options.danger_accept_invalid_certs);
            let connector = builder
                .build()
                .chain_err(|| ErrorKind::Malformed("failed to build TLS connector"))?;
            let connector = AsyncTlsConnector::from(connector);
            let tls = connector
                .connect(host, tcp)
                .await
                .chain_err(|| ErrorKind::Disconnected(node_id))?;
            Socket::Tls(Box::new(tls))
        } else {
            Socket::Plain(tcp)
        };

        Ok(BrokerConnection {
            node_id,
            host: host.to_owned(),
            port,
            socket: Mutex::new(Some(socket)),
        })
    }

    /// A not-yet-connected bootstrap placeholder, used only in tests and mock reconciliation; real
    /// brokers are always constructed via `connect`.
    pub fn disconnected(node_id: i32, host: &str, port: i32) -> BrokerConnection {
        BrokerConnection {
            node_id,
            host: host.to_owned(),
            port,
            socket: Mutex::new(None),
        }
    }

    /// Write one length-prefixed request frame and read exactly one length-prefixed response
    /// frame, bounded by `timeout`. At most one in-flight request per broker (Invariant 3) is
    /// enforced by holding the socket mutex for the whole round trip.
    ///
    /// A timeout drops the in-flight round trip mid-frame: the request may already be written and
    /// the response may already be partway onto the wire, so the next caller on this socket would
    /// otherwise read a misaligned frame. The socket is closed instead, forcing a reconnect.
    pub async fn send_sync(&self, request: Bytes, timeout: Duration) -> Result<Bytes> {
        match time::timeout(timeout, self.round_trip(request)).await {
            Ok(result) => result,
            Err(_) => {
                self.close().await;
                Err(Error::from(ErrorKind::Timeout(timeout.as_millis() as u64)))
            }
        }
    }

    async fn round_trip(&self, request: Bytes) -> Result<Bytes> {
        let mut guard = self.socket.lock().await;
        let socket = guard
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::Disconnected(self.node_id)))?;

        let mut framed = BytesMut::with_capacity(4 + request.len());
        framed.put_i32(request.len() as i32);
        framed.extend_from_slice(&request);

        if let Err(err) = socket.write_all(&framed).await {
            *guard = None;
            return Err(Error::with_chain(err, ErrorKind::Disconnected(self.node_id)));
        }

        let mut size_buf = [0u8; 4];
        if let Err(err) = socket.read_exact(&mut size_buf).await {
            *guard = None;
            return Err(Error::with_chain(err, ErrorKind::Disconnected(self.node_id)));
        }
        let size = i32::from_be_bytes(size_buf);
        if size < 0 {
            bail!(ErrorKind::Malformed("negative frame size"));
        }

        let mut body = vec![0u8; size as usize];
        if let Err(err) = socket.read_exact(&mut body).await {
            *guard = None;
            return Err(Error::with_chain(err, ErrorKind::Disconnected(self.node_id)));
        }

        Ok(Bytes::from(body))
    }

    /// Fire-and-forget write, used by `produce` when `required_acks == 0`.
    pub async fn send_async(&self, request: Bytes) -> Result<()> {
        let mut guard = self.socket.lock().await;
        let socket = guard
            .as_mut()
            .ok_or_else(|| Error::from(ErrorKind::Disconnected(self.node_id)))?;

        let mut framed = BytesMut::with_capacity(4 + request.len());
        framed.put_i32(request.len() as i32);
        framed.extend_from_slice(&request);

        if let Err(err) = socket.write_all(&framed).await {
            *guard = None;
            return Err(Error::with_chain(err, ErrorKind::Disconnected(self.node_id)));
        }
        Ok(())
    }

    pub async fn close(&self) {
        *self.socket.lock().await = None;
    }

    /// Whether a socket is installed at all (distinct from `info`, which additionally checks
    /// liveness of an installed socket).
    pub async fn connected(&self) -> bool {
        self.socket.lock().await.is_some()
    }

    /// The teacher's `Socket.info/1` check: a live socket returns a non-zero value; a socket whose
    /// peer has already closed returns falsy without a blocking read.
    pub async fn info(&self) -> bool {
        match self.socket.lock().await.as_ref() {
            Some(socket) => !socket.peer_closed(),
            None => false,
        }
    }
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("node_id", &self.node_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}
