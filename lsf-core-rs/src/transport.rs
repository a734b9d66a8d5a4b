//! UDP transport for JSON messages
//!
//! Used for controller-to-controller traffic, the client method surface and
//! the lamp wire protocol. Each datagram carries exactly one message.

use std::fmt::Debug;
use std::io;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Maximum message size (64KB should be plenty for JSON)
pub const MAX_MSG_SIZE: usize = 65536;

fn encode<M: Serialize>(msg: &M) -> io::Result<Vec<u8>> {
    let bytes = serde_json::to_vec(msg).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if bytes.len() > MAX_MSG_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("message of {} bytes exceeds datagram limit", bytes.len()),
        ));
    }
    Ok(bytes)
}

/// UDP transport for one message type
pub struct Transport<M> {
    socket: Arc<UdpSocket>,
    _message: PhantomData<fn() -> M>,
}

impl<M> Transport<M>
where
    M: Serialize + DeserializeOwned + Debug + Send + 'static,
{
    /// Create a new transport bound to the specified port on all interfaces.
    /// Port 0 picks a free port.
    pub async fn new(port: u16) -> io::Result<Self> {
        Self::bind(SocketAddr::from(([0, 0, 0, 0], port))).await
    }

    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            _message: PhantomData,
        })
    }

    /// Get the local address this transport is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start receiving messages in background. Datagrams that do not parse
    /// are dropped with a warning.
    pub fn start_receive(&self, capacity: usize) -> mpsc::Receiver<(M, SocketAddr)> {
        let socket = self.socket.clone();
        let (tx, rx) = mpsc::channel(capacity);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_MSG_SIZE];

            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, src)) => match serde_json::from_slice::<M>(&buf[..len]) {
                        Ok(msg) => {
                            debug!("Received {:?} from {}", msg, src);
                            if tx.send((msg, src)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Failed to parse message from {}: {}", src, e);
                        }
                    },
                    Err(e) => {
                        error!("UDP receive error: {}", e);
                    }
                }
            }
        });

        rx
    }

    /// Send a message to a specific address. Replies may use a different
    /// message type than the one received.
    pub async fn send<T: Serialize + Debug>(&self, msg: &T, addr: SocketAddr) -> io::Result<()> {
        let bytes = encode(msg)?;
        debug!("Sending {:?} to {}", msg, addr);
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }

    /// Send a message to several addresses. Per-address failures are logged
    /// and skipped.
    pub async fn broadcast<T: Serialize + Debug>(&self, msg: &T, addrs: &[SocketAddr]) -> io::Result<()> {
        let bytes = encode(msg)?;

        for addr in addrs {
            debug!("Broadcasting {:?} to {}", msg, addr);
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                warn!("Failed to send to {}: {}", addr, e);
            }
        }

        Ok(())
    }
}
