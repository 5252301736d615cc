//! Connections to the bridge server.
//!
//! Every exchange with the server uses a fresh socket: open, write one
//! framed request, read the reply, close. The helpers here cover the I/O
//! half of that; framing lives in `dbridge_core::protocol`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use dbridge_core::constants::{MAX_RESPONSE_SIZE, STATUS_LEN};
use dbridge_core::protocol::{Request, Status};
use dbridge_core::{BridgeEndpoint, Error, Result};

/// Byte stream to the bridge server.
pub trait BridgeIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BridgeIo for T {}

/// Boxed bridge socket, TCP or Unix.
pub type BridgeStream = Box<dyn BridgeIo>;

/// Open a new socket to the server.
///
/// Connection failures map to [`Error::Transport`] so callers can tell an
/// absent server from a misbehaving one.
pub async fn connect(endpoint: &BridgeEndpoint) -> Result<BridgeStream> {
    match endpoint {
        BridgeEndpoint::Tcp(addr) => {
            let stream = TcpStream::connect(addr).await.map_err(|e| Error::Transport {
                message: format!("connect {}: {}", endpoint, e),
            })?;
            stream.set_nodelay(true)?;
            trace!(%endpoint, "connected");
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        BridgeEndpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path)
                .await
                .map_err(|e| Error::Transport {
                    message: format!("connect {}: {}", endpoint, e),
                })?;
            trace!(%endpoint, "connected");
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        BridgeEndpoint::Unix(_) => Err(Error::Config {
            message: format!("{} is not supported on this platform", endpoint),
        }),
    }
}

/// Write one framed request.
pub async fn send_request<S: AsyncWrite + Unpin + ?Sized>(
    stream: &mut S,
    request: &Request,
) -> Result<()> {
    let frame = request.encode()?;
    trace!(%request, "send");
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Read a bare status token.
///
/// An early close is a [`Error::Socket`] failure.
pub async fn read_status<S: AsyncRead + Unpin + ?Sized>(stream: &mut S) -> Result<Status> {
    let mut token = [0u8; STATUS_LEN];
    stream.read_exact(&mut token).await.map_err(|e| Error::Socket {
        message: format!("reading status: {}", e),
    })?;
    Ok(Status::from_bytes(&token).unwrap_or(Status::Unknown(token)))
}

/// Read until the server closes the socket.
///
/// Responses larger than [`MAX_RESPONSE_SIZE`] are a protocol violation.
pub async fn read_to_end<S: AsyncRead + Unpin + ?Sized>(stream: &mut S) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() + n > MAX_RESPONSE_SIZE {
            return Err(Error::Protocol {
                message: format!("response exceeds {} bytes", MAX_RESPONSE_SIZE),
            });
        }
        out.extend_from_slice(&chunk[..n]);
    }
}
