//! Reliable (TCP) and unreliable (UDP) channels carrying codec frames.
//!
//! - TCP: a stream of header+payload frames; the body length comes from the
//!   header. A frame that cannot be delimited (bad magic, wrong version,
//!   oversize body) closes the stream, while a well-delimited frame with bad
//!   content is reported as `InvalidFormat` and the stream stays usable.
//! - UDP: exactly one frame per datagram.

use std::net::SocketAddr;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    time,
};

use crate::error::{DecodeError, NetError};

use super::{
    codec::{parse_header, Packet},
    protocol::{HEADER_LEN, MAX_BODY},
};

const DATAGRAM_MAX: usize = HEADER_LEN + MAX_BODY;

fn io_error(err: std::io::Error) -> NetError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe => NetError::Disconnected,
        _ => NetError::Io(err),
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, NetError> {
    let mut frame = vec![0u8; HEADER_LEN];
    reader.read_exact(&mut frame).await.map_err(io_error)?;
    let header = parse_header(&frame)
        .map_err(|err| NetError::ConnectionFailed(format!("unframeable stream: {err}")))?;
    frame.resize(HEADER_LEN + header.payload_len as usize, 0);
    reader
        .read_exact(&mut frame[HEADER_LEN..])
        .await
        .map_err(io_error)?;
    Ok(Packet::decode(&frame)?)
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), NetError> {
    let bytes = packet.encode()?;
    writer.write_all(&bytes).await.map_err(io_error)
}

/// Reliable connection over TCP.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> Result<Self, NetError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| NetError::ConnectionFailed(format!("tcp connect {addr}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), NetError> {
        write_frame(&mut self.stream, packet).await
    }

    pub async fn recv(&mut self) -> Result<Packet, NetError> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.stream.local_addr()?)
    }

    /// Splits into independently owned halves for a reader and a writer task.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (read, write) = self.stream.into_split();
        (ReliableReader { read }, ReliableWriter { write })
    }
}

/// Receiving half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableReader {
    read: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> Result<Packet, NetError> {
        read_frame(&mut self.read).await
    }
}

/// Sending half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableWriter {
    write: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, packet: &Packet) -> Result<(), NetError> {
        write_frame(&mut self.write, packet).await
    }

    /// Writes an already encoded frame.
    pub async fn send_raw(&mut self, frame: &[u8]) -> Result<(), NetError> {
        self.write.write_all(frame).await.map_err(io_error)
    }

    pub async fn shutdown(&mut self) -> Result<(), NetError> {
        self.write.shutdown().await.map_err(io_error)
    }
}

/// TCP server listener.
#[derive(Debug)]
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NetError::ConnectionFailed(format!("tcp bind {addr}: {e}")))?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> Result<(ReliableConn, SocketAddr), NetError> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.listener.local_addr()?)
    }
}

/// Client side unreliable channel, connected to one peer.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UnreliableConn {
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer).await?;
        Ok(Self { socket, peer })
    }

    pub async fn send(&self, packet: &Packet) -> Result<(), NetError> {
        let bytes = packet.encode()?;
        self.socket.send(&bytes).await?;
        Ok(())
    }

    pub async fn recv(&self) -> Result<Packet, NetError> {
        let mut buf = vec![0u8; DATAGRAM_MAX];
        let n = self.socket.recv(&mut buf).await?;
        Ok(Packet::decode(&buf[..n])?)
    }

    /// Receives a datagram within the given timeout.
    pub async fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Option<Packet>, NetError> {
        match time::timeout(timeout, self.recv()).await {
            Ok(res) => res.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Non-blocking receive; `Ok(None)` when nothing is queued.
    pub fn try_recv(&self) -> Result<Option<Packet>, NetError> {
        let mut buf = vec![0u8; DATAGRAM_MAX];
        match self.socket.try_recv(&mut buf) {
            Ok(n) => Ok(Some(Packet::decode(&buf[..n])?)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }
}

/// Server side unreliable endpoint shared by every session.
#[derive(Debug)]
pub struct UnreliableEndpoint {
    socket: UdpSocket,
}

impl UnreliableEndpoint {
    pub async fn bind(addr: SocketAddr) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| NetError::ConnectionFailed(format!("udp bind {addr}: {e}")))?;
        Ok(Self { socket })
    }

    pub async fn send_to(&self, packet: &Packet, peer: SocketAddr) -> Result<(), NetError> {
        let bytes = packet.encode()?;
        self.send_raw_to(&bytes, peer).await
    }

    pub async fn send_raw_to(&self, frame: &Bytes, peer: SocketAddr) -> Result<(), NetError> {
        self.socket.send_to(frame, peer).await?;
        Ok(())
    }

    /// Receives one datagram. The decode result is returned separately so a
    /// malformed datagram never fails the endpoint itself.
    pub async fn recv_from(&self) -> Result<(Result<Packet, DecodeError>, SocketAddr), NetError> {
        let mut buf = vec![0u8; DATAGRAM_MAX];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        Ok((Packet::decode(&buf[..n]), from))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        Ok(self.socket.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::Payload;

    #[tokio::test]
    async fn tcp_frames_cross_the_stream() -> anyhow::Result<()> {
        let listener = ReliableListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;
        let client = tokio::spawn(async move {
            let mut conn = ReliableConn::connect(addr).await?;
            conn.send(&Packet::new(1, 0, Payload::Hello { udp_port: 9 })).await?;
            conn.send(&Packet::new(2, 0, Payload::ListRooms)).await?;
            Ok::<_, NetError>(())
        });

        let (mut conn, _) = listener.accept().await?;
        assert_eq!(conn.recv().await?.payload, Payload::Hello { udp_port: 9 });
        assert_eq!(conn.recv().await?.payload, Payload::ListRooms);
        client.await??;
        assert!(matches!(conn.recv().await, Err(NetError::Disconnected)));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_frame_keeps_stream_in_sync() -> anyhow::Result<()> {
        let listener = ReliableListener::bind("127.0.0.1:0".parse()?).await?;
        let addr = listener.local_addr()?;
        let client = tokio::spawn(async move {
            let (_, mut writer) = ReliableConn::connect(addr).await?.into_split();
            let mut bad = Packet::new(1, 0, Payload::Ping { time_ms: 1 }).encode()?.to_vec();
            bad[3] = 0x77;
            writer.send_raw(&bad).await?;
            writer.send(&Packet::new(2, 0, Payload::Pong { time_ms: 2 })).await?;
            Ok::<_, NetError>(())
        });

        let (mut conn, _) = listener.accept().await?;
        let err = conn.recv().await.err();
        assert!(matches!(
            err,
            Some(NetError::InvalidFormat(DecodeError::UnknownOpCode(0x77)))
        ));
        assert!(!err.is_some_and(|e| e.ends_session()));
        assert_eq!(conn.recv().await?.payload, Payload::Pong { time_ms: 2 });
        client.await??;
        Ok(())
    }

    #[tokio::test]
    async fn udp_datagram_roundtrip() -> anyhow::Result<()> {
        let server = UnreliableEndpoint::bind("127.0.0.1:0".parse()?).await?;
        let server_addr = server.local_addr()?;
        let client = UnreliableConn::connect("127.0.0.1:0".parse()?, server_addr).await?;
        client.send(&Packet::new(5, 3, Payload::Ping { time_ms: 77 })).await?;

        let (packet, from) = server.recv_from().await?;
        let packet = packet?;
        assert_eq!(packet.session_id, 3);
        assert_eq!(from, client.local_addr()?);

        server
            .send_to(&Packet::new(1, 3, Payload::Pong { time_ms: 77 }), from)
            .await?;
        let reply = client.recv_timeout(std::time::Duration::from_secs(2)).await?;
        assert_eq!(reply.map(|p| p.payload), Some(Payload::Pong { time_ms: 77 }));
        Ok(())
    }
}
