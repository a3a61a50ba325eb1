use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
#[cfg(test)] use mockall::automock;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::{info, trace, warn};

use crate::error::TransportError;
use crate::frame::Frame;

/// The datagram transport the engine runs on. This is the only seam towards
/// actual I/O, introduced to keep the engine free of socket concerns and to
/// facilitate mocking it away for testing.
///
/// `receive` returns `Ok(None)` when `poll_timeout` elapses without a frame;
/// the poll timeout is what bounds how quickly the receive loop observes a
/// stop request.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    async fn receive(&self, poll_timeout: Duration) -> Result<Option<Frame>, TransportError>;
}

/// Default transport: one connected UDP socket, one frame per datagram.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Maximum UDP payload; frames beyond this cannot be sent in one datagram.
    pub const MAX_DATAGRAM: usize = 65_507;

    /// Wrap an already bound and connected socket.
    pub fn new(socket: UdpSocket) -> UdpTransport {
        UdpTransport { socket }
    }

    pub async fn bind_and_connect(local_addr: SocketAddr, peer_addr: SocketAddr) -> Result<UdpTransport, TransportError> {
        let socket = UdpSocket::bind(local_addr).await.map_err(map_socket_error)?;
        socket.connect(peer_addr).await.map_err(map_socket_error)?;
        info!("bound datagram socket to {:?}, peer {:?}", socket.local_addr().map_err(map_socket_error)?, peer_addr);

        Ok(UdpTransport { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(map_socket_error)
    }
}

fn map_socket_error(e: io::Error) -> TransportError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        TransportError::PermissionDenied
    }
    else {
        TransportError::Io(e)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        trace!("UDP socket: sending frame {:?}", frame);

        let mut buf = BytesMut::with_capacity(frame.serialized_len());
        frame.ser(&mut buf);
        self.socket.send(&buf).await.map_err(map_socket_error)?;
        Ok(())
    }

    async fn receive(&self, poll_timeout: Duration) -> Result<Option<Frame>, TransportError> {
        //TODO reuse a pooled receive buffer instead of allocating per datagram
        let mut buf = vec![0u8; Self::MAX_DATAGRAM];

        let num_read = match time::timeout(poll_timeout, self.socket.recv(&mut buf)).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(map_socket_error(e)),
            Ok(Ok(num_read)) => num_read,
        };

        match Frame::deser(&mut &buf[..num_read]) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => {
                warn!("received unparsable datagram - dropping: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::frame::FrameKind;

    async fn connected_pair() -> (UdpTransport, UdpTransport) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (UdpTransport::new(a), UdpTransport::new(b))
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let (a, b) = connected_pair().await;

        let frame = Frame::data(5, FrameKind::Data, 3, Bytes::from_static(b"hello"));
        a.send(&frame).await.unwrap();

        let received = b.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(received, Some(frame));
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let (a, _b) = connected_pair().await;
        assert!(matches!(a.receive(Duration::from_millis(10)).await, Ok(None)));
    }

    #[tokio::test]
    async fn test_garbage_datagram_is_dropped() {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();

        // kind 99 is not a valid frame kind
        a.send(&[5u8, 0, 99, 1, 0, 0, 0, 0, 0]).await.unwrap();

        let b = UdpTransport::new(b);
        assert!(matches!(b.receive(Duration::from_millis(100)).await, Ok(None)));
    }
}
