//! Framed TCP connections with per-call timeouts.
//!
//! Frames are a u32 big-endian length prefix followed by a JSON body. The
//! client-side [`Conn`] performs the protocol handshake and bounds every
//! round-trip with a timeout; daemons use the free `read_request` /
//! `write_response` helpers on their accepted sockets.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use crate::error::ConnectError;
use crate::proto::{Request, Response, PROTOCOL_VERSION};

/// Upper bound for one frame body. Oversized frames indicate a non-protocol
/// peer or corruption, not legitimate traffic.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Default bound for establishing a TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for one request/response round-trip.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds max {MAX_FRAME_BYTES}", body.len()),
        ));
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Read one length-prefixed frame. Returns `None` on clean EOF at a frame
/// boundary; EOF inside a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds max {MAX_FRAME_BYTES}"),
        ));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Read one request from an accepted daemon socket. `None` means the peer
/// closed the connection.
pub async fn read_request(stream: &mut TcpStream) -> io::Result<Option<Request>> {
    let Some(body) = read_frame(stream).await? else {
        return Ok(None);
    };
    let req = serde_json::from_slice(&body)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    Ok(Some(req))
}

/// Write one response to an accepted daemon socket.
pub async fn write_response(stream: &mut TcpStream, resp: &Response) -> io::Result<()> {
    let body = serde_json::to_vec(resp)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    write_frame(stream, &body).await
}

/// Client side of one framed connection.
#[derive(Debug)]
pub struct Conn {
    stream: TcpStream,
    peer: SocketAddr,
    call_timeout: Duration,
}

impl Conn {
    /// Open a TCP connection within `connect_timeout`. Does not handshake.
    pub async fn open(
        addr: SocketAddr,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let stream = match time::timeout(connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) if err.kind() == io::ErrorKind::ConnectionRefused => {
                return Err(ConnectError::Refused { addr });
            }
            Ok(Err(err)) => {
                return Err(ConnectError::Unreachable { addr, source: err });
            }
            Err(_) => {
                return Err(ConnectError::Timeout {
                    addr,
                    timeout: connect_timeout,
                });
            }
        };
        stream.set_nodelay(true).ok();
        Ok(Self {
            stream,
            peer: addr,
            call_timeout,
        })
    }

    /// The address this connection was opened against.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Exchange protocol versions. A version skew or a peer that answers
    /// with anything but `HandshakeOk` yields `InvalidData`.
    pub async fn handshake(&mut self) -> io::Result<u32> {
        let resp = self
            .call(&Request::Handshake {
                version: PROTOCOL_VERSION,
            })
            .await?;
        match resp {
            Response::HandshakeOk { version } if version == PROTOCOL_VERSION => Ok(version),
            Response::HandshakeOk { version } => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("peer protocol version {version}, expected {PROTOCOL_VERSION}"),
            )),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected handshake response: {other:?}"),
            )),
        }
    }

    /// One request/response round-trip, bounded by the call timeout.
    pub async fn call(&mut self, req: &Request) -> io::Result<Response> {
        let body = serde_json::to_vec(req)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let round_trip = async {
            write_frame(&mut self.stream, &body).await?;
            match read_frame(&mut self.stream).await? {
                Some(frame) => serde_json::from_slice::<Response>(&frame)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err)),
                None => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed connection mid-call",
                )),
            }
        };
        match time::timeout(self.call_timeout, round_trip).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("call to {} timed out after {:?}", self.peer, self.call_timeout),
            )),
        }
    }
}
