//! Byte-stream links between the camera, host and motor controller.
//!
//! An endpoint string selects the transport:
//! - `tcp://host:port` connects out (e.g. to a ser2net bridge or a peer)
//! - `tcp-listen://addr:port` accepts one peer at a time
//! - anything else is a device path such as `/dev/ttyUSB0`, opened read/write
//!   as-is; line settings are left to the OS.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Connect(String),
    Listen(String),
    Device(PathBuf),
}

impl Endpoint {
    pub fn parse(s: &str) -> Result<Self, LinkError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LinkError::InvalidEndpoint(s.to_string()));
        }
        if let Some(addr) = s.strip_prefix("tcp-listen://") {
            return non_empty(addr, s).map(Endpoint::Listen);
        }
        if let Some(addr) = s.strip_prefix("tcp://") {
            return non_empty(addr, s).map(Endpoint::Connect);
        }
        if s.contains("://") {
            return Err(LinkError::InvalidEndpoint(s.to_string()));
        }
        Ok(Endpoint::Device(PathBuf::from(s)))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Connect(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Listen(addr) => write!(f, "tcp-listen://{addr}"),
            Endpoint::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

fn non_empty(addr: &str, original: &str) -> Result<String, LinkError> {
    if addr.is_empty() {
        Err(LinkError::InvalidEndpoint(original.to_string()))
    } else {
        Ok(addr.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("invalid link endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("link {endpoint} failed: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
}

/// An open link, already split into halves.
pub struct Link {
    pub reader: LinkReader,
    pub writer: LinkWriter,
    pub peer: String,
}

/// Opens links for one endpoint, keeping a listening socket across
/// reconnects.
pub struct Connector {
    endpoint: Endpoint,
    listener: Option<TcpListener>,
}

impl Connector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            listener: None,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Bind the listening socket now. Returns the bound address in listen
    /// mode and `None` otherwise.
    pub async fn bind(&mut self) -> Result<Option<SocketAddr>, LinkError> {
        let Endpoint::Listen(addr) = &self.endpoint else {
            return Ok(None);
        };
        if self.listener.is_none() {
            let listener = TcpListener::bind(addr).await.map_err(|e| self.io(e))?;
            self.listener = Some(listener);
        }
        match &self.listener {
            Some(listener) => listener.local_addr().map(Some).map_err(|e| self.io(e)),
            None => Ok(None),
        }
    }

    pub async fn connect(&mut self) -> Result<Link, LinkError> {
        match self.endpoint.clone() {
            Endpoint::Connect(addr) => {
                let stream = TcpStream::connect(&addr).await.map_err(|e| self.io(e))?;
                stream.set_nodelay(true).map_err(|e| self.io(e))?;
                let (reader, writer) = stream.into_split();
                Ok(Link {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    peer: addr,
                })
            }
            Endpoint::Listen(_) => {
                self.bind().await?;
                let Some(listener) = self.listener.as_ref() else {
                    return Err(LinkError::InvalidEndpoint(self.endpoint.to_string()));
                };
                let (stream, peer) = listener.accept().await.map_err(|e| self.io(e))?;
                stream.set_nodelay(true).map_err(|e| self.io(e))?;
                let (reader, writer) = stream.into_split();
                Ok(Link {
                    reader: Box::new(reader),
                    writer: Box::new(writer),
                    peer: peer.to_string(),
                })
            }
            Endpoint::Device(path) => {
                let file = tokio::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&path)
                    .await
                    .map_err(|e| self.io(e))?;
                let writer = file.try_clone().await.map_err(|e| self.io(e))?;
                Ok(Link {
                    reader: Box::new(file),
                    writer: Box::new(writer),
                    peer: path.display().to_string(),
                })
            }
        }
    }

    /// Keep trying until a link opens, backing off from 2 s up to 30 s.
    pub async fn connect_with_backoff(&mut self) -> Link {
        let mut backoff = Duration::from_secs(2);
        let max_backoff = Duration::from_secs(30);

        loop {
            info!(endpoint = %self.endpoint, "opening link");
            match self.connect().await {
                Ok(link) => {
                    info!(endpoint = %self.endpoint, peer = link.peer, "link open");
                    return link;
                }
                Err(e) => {
                    error!(error = %e, "link failed, retrying in {:?}", backoff);
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    fn io(&self, source: std::io::Error) -> LinkError {
        LinkError::Io {
            endpoint: self.endpoint.to_string(),
            source,
        }
    }
}
