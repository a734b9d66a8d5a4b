//! UDP lamp link: JSON requests to lamp firmware, replies matched by
//! sequence number

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{LsfError, LsfResult, ResponseCode};
use crate::lamp::{LampEndpoint, LampLink, LampReply, LampRequest, SessionId};
use crate::transport::Transport;

/// Datagrams exchanged with lamps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LampWireMessage {
    #[serde(rename = "JOIN")]
    Join { seq: u64 },

    #[serde(rename = "JOIN_REPLY")]
    JoinReply {
        seq: u64,
        code: ResponseCode,
        session: Option<SessionId>,
    },

    #[serde(rename = "CALL")]
    Call {
        seq: u64,
        session: SessionId,
        request: LampRequest,
    },

    #[serde(rename = "CALL_REPLY")]
    CallReply {
        seq: u64,
        code: ResponseCode,
        reply: Option<LampReply>,
    },

    #[serde(rename = "LEAVE")]
    Leave { session: SessionId },
}

impl LampWireMessage {
    fn reply_seq(&self) -> Option<u64> {
        match self {
            LampWireMessage::JoinReply { seq, .. } | LampWireMessage::CallReply { seq, .. } => Some(*seq),
            _ => None,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<LampWireMessage>>>>;

/// [`LampLink`] over UDP
pub struct UdpLampLink {
    transport: Transport<LampWireMessage>,
    pending: PendingMap,
    next_seq: AtomicU64,
    request_timeout: Duration,
}

impl UdpLampLink {
    /// Bind the link and start routing replies to waiting requests
    pub async fn bind(port: u16, request_timeout: Duration) -> std::io::Result<Arc<Self>> {
        let transport = Transport::new(port).await?;
        let incoming = transport.start_receive(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(route_replies(incoming, pending.clone()));

        Ok(Arc::new(Self {
            transport,
            pending,
            next_seq: AtomicU64::new(1),
            request_timeout,
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    fn address(endpoint: &LampEndpoint) -> LsfResult<SocketAddr> {
        endpoint.address.parse().map_err(|_| {
            LsfError::InvalidArgs(format!(
                "lamp {} has no usable address {}",
                endpoint.lamp_id, endpoint.address
            ))
        })
    }

    /// Send a request and wait for the reply with the same sequence number
    async fn request(&self, addr: SocketAddr, build: impl FnOnce(u64) -> LampWireMessage) -> LsfResult<LampWireMessage> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(seq, reply_tx);

        if let Err(e) = self.transport.send(&build(seq), addr).await {
            self.pending.lock().remove(&seq);
            return Err(e.into());
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(LsfError::ChannelClosed),
            Err(_) => {
                self.pending.lock().remove(&seq);
                Err(LsfError::Timeout)
            }
        }
    }
}

async fn route_replies(mut incoming: mpsc::Receiver<(LampWireMessage, SocketAddr)>, pending: PendingMap) {
    while let Some((msg, src)) = incoming.recv().await {
        let seq = match msg.reply_seq() {
            Some(seq) => seq,
            None => {
                debug!("LampLink: Ignoring unsolicited {:?} from {}", msg, src);
                continue;
            }
        };
        match pending.lock().remove(&seq) {
            Some(tx) => {
                let _ = tx.send(msg);
            }
            None => warn!("LampLink: Late reply {} from {}", seq, src),
        }
    }
}

#[async_trait]
impl LampLink for UdpLampLink {
    async fn join(&self, endpoint: &LampEndpoint) -> LsfResult<SessionId> {
        let addr = Self::address(endpoint)?;
        match self.request(addr, |seq| LampWireMessage::Join { seq }).await? {
            LampWireMessage::JoinReply {
                code: ResponseCode::Ok,
                session: Some(session),
                ..
            } => Ok(session),
            LampWireMessage::JoinReply { code, .. } => Err(LsfError::Lamp(if code.is_ok() {
                ResponseCode::UnexpectedState
            } else {
                code
            })),
            other => Err(LsfError::UnexpectedState(format!("join answered with {:?}", other))),
        }
    }

    async fn call(
        &self,
        endpoint: &LampEndpoint,
        session: SessionId,
        request: LampRequest,
    ) -> LsfResult<LampReply> {
        let addr = Self::address(endpoint)?;
        let reply = self
            .request(addr, |seq| LampWireMessage::Call { seq, session, request })
            .await?;
        match reply {
            LampWireMessage::CallReply {
                code: ResponseCode::Ok,
                reply,
                ..
            } => Ok(reply.unwrap_or(LampReply::Ack)),
            LampWireMessage::CallReply { code, .. } => Err(LsfError::Lamp(code)),
            other => Err(LsfError::UnexpectedState(format!("call answered with {:?}", other))),
        }
    }

    async fn leave(&self, endpoint: &LampEndpoint, session: SessionId) {
        if let Ok(addr) = Self::address(endpoint) {
            if let Err(e) = self.transport.send(&LampWireMessage::Leave { session }, addr).await {
                debug!("LampLink: Leave to {} failed: {}", endpoint.lamp_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LampState;

    /// Minimal lamp answering joins and state queries
    async fn fake_lamp() -> std::io::Result<SocketAddr> {
        let transport = Transport::<LampWireMessage>::bind("127.0.0.1:0".parse().unwrap()).await?;
        let addr = transport.local_addr()?;
        let mut inbox = transport.start_receive(8);
        tokio::spawn(async move {
            while let Some((msg, src)) = inbox.recv().await {
                let reply = match msg {
                    LampWireMessage::Join { seq } => LampWireMessage::JoinReply {
                        seq,
                        code: ResponseCode::Ok,
                        session: Some(77),
                    },
                    LampWireMessage::Call {
                        seq,
                        request: LampRequest::GetState,
                        ..
                    } => LampWireMessage::CallReply {
                        seq,
                        code: ResponseCode::Ok,
                        reply: Some(LampReply::State(LampState::new(true, 1, 2, 3000, 4))),
                    },
                    LampWireMessage::Call { seq, .. } => LampWireMessage::CallReply {
                        seq,
                        code: ResponseCode::InvalidArgs,
                        reply: None,
                    },
                    _ => continue,
                };
                let _ = transport.send(&reply, src).await;
            }
        });
        Ok(addr)
    }

    #[tokio::test]
    async fn test_join_and_call_over_udp() -> LsfResult<()> {
        let lamp_addr = fake_lamp().await?;
        let link = UdpLampLink::bind(0, Duration::from_secs(2)).await?;
        let endpoint = LampEndpoint::new("l1", lamp_addr.to_string());

        let session = link.join(&endpoint).await?;
        assert_eq!(session, 77);

        let reply = link.call(&endpoint, session, LampRequest::GetState).await?;
        assert_eq!(reply, LampReply::State(LampState::new(true, 1, 2, 3000, 4)));

        let err = link.call(&endpoint, session, LampRequest::GetFaults).await.unwrap_err();
        assert_eq!(err.code(), ResponseCode::InvalidArgs);
        Ok(())
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() -> LsfResult<()> {
        // Bound but never answers
        let silent = Transport::<LampWireMessage>::bind("127.0.0.1:0".parse().unwrap()).await?;
        let link = UdpLampLink::bind(0, Duration::from_millis(50)).await?;
        let endpoint = LampEndpoint::new("l1", silent.local_addr()?.to_string());

        assert!(matches!(link.join(&endpoint).await, Err(LsfError::Timeout)));
        assert!(link.pending.lock().is_empty());
        Ok(())
    }
}
