//! Session: one BLE connection, message-ID sequencing and single-inflight
//! request/response pairing.
//!
//! `query_lock: tokio::sync::Mutex<()>` enforces single-inflight request
//! discipline: a caller that tries to send while another request is already
//! armed gets `Busy` back immediately rather than queuing behind it.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::warn;

use crate::error::Error;
use crate::frame::{self, Frame};
use crate::protocol::{Flags, Service};
use crate::transport::BoxedTransport;

/// One live BLE session. Cheap to clone (`Arc` internally); clones share the
/// same inflight guard so the single-inflight invariant holds across all
/// handles to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    transport: BoxedTransport,
    next_msg_id: AtomicU8,
    query_lock: Mutex<()>,
}

impl Session {
    pub fn new(transport: BoxedTransport) -> Self {
        Session {
            inner: Arc::new(Inner {
                transport,
                next_msg_id: AtomicU8::new(0),
                query_lock: Mutex::new(()),
            }),
        }
    }

    pub fn address(&self) -> &str {
        self.inner.transport.address()
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.transport.is_connected().await
    }

    pub async fn disconnect(&self) -> Result<(), Error> {
        self.inner.transport.disconnect().await
    }

    /// Send `payload` for `service` and wait up to `timeout` for the
    /// matching response frame. Returns `Busy` if another `send` is already
    /// in flight on this session.
    pub async fn send(
        &self,
        service: Service,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Frame, Error> {
        let _guard = self
            .inner
            .query_lock
            .try_lock()
            .map_err(|_| Error::Busy)?;

        let msg_id = self.inner.next_msg_id.fetch_add(1, Ordering::Relaxed);
        let frame = frame::encode(0, msg_id, service.to_u8(), 0, Flags::Ack, payload);

        let mut notifications = self.inner.transport.subscribe();
        self.inner.transport.write(&frame).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            let raw = match tokio::time::timeout(remaining, notifications.recv()).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(_)) => return Err(Error::Timeout),
                Err(_) => return Err(Error::Timeout),
            };
            let decoded = match frame::decode(&raw) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "dropping unparseable notification");
                    continue;
                }
            };
            if decoded.is_response() && decoded.msg_id == msg_id {
                return Ok(decoded);
            }
            warn!(
                msg_id = decoded.msg_id,
                expected = msg_id,
                "dropping non-matching notification"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::broadcast;

    /// An in-memory `Transport` double: every write is echoed back as a
    /// response frame with the same `msg_id`, after applying the sign bit to
    /// the service byte.
    struct LoopbackTransport {
        tx: broadcast::Sender<Vec<u8>>,
        written: StdMutex<Vec<Vec<u8>>>,
    }

    impl LoopbackTransport {
        fn new() -> Arc<Self> {
            let (tx, _) = broadcast::channel(16);
            Arc::new(LoopbackTransport {
                tx,
                written: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn write(&self, data: &[u8]) -> Result<(), Error> {
            self.written.lock().unwrap().push(data.to_vec());
            let mut response = data.to_vec();
            response[2] |= 0x80; // set response sign bit on the service byte
            let _ = self.tx.send(response);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
            self.tx.subscribe()
        }

        fn address(&self) -> &str {
            "loopback"
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn disconnect(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_returns_matching_response() {
        let transport = LoopbackTransport::new();
        let session = Session::new(transport);
        let frame = session
            .send(Service::GetDeviceModel, &[0x2F], Duration::from_millis(200))
            .await
            .unwrap();
        assert!(frame.is_response());
        assert_eq!(frame.payload, vec![0x2F]);
    }

    #[tokio::test]
    async fn concurrent_send_returns_busy() {
        struct NeverRespondsTransport {
            tx: broadcast::Sender<Vec<u8>>,
        }
        #[async_trait]
        impl Transport for NeverRespondsTransport {
            async fn write(&self, _data: &[u8]) -> Result<(), Error> {
                Ok(())
            }
            fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
                self.tx.subscribe()
            }
            fn address(&self) -> &str {
                "stuck"
            }
            async fn is_connected(&self) -> bool {
                true
            }
            async fn disconnect(&self) -> Result<(), Error> {
                Ok(())
            }
        }
        let (tx, _) = broadcast::channel(1);
        let session = Session::new(Arc::new(NeverRespondsTransport { tx }));

        let session_clone = session.clone();
        let first = tokio::spawn(async move {
            session_clone
                .send(Service::GetDeviceModel, &[], Duration::from_millis(500))
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = session
            .send(Service::GetDeviceModel, &[], Duration::from_millis(50))
            .await;
        assert!(matches!(second, Err(Error::Busy)));

        first.abort();
    }

    #[tokio::test]
    async fn timeout_when_no_response_arrives() {
        struct SilentTransport {
            tx: broadcast::Sender<Vec<u8>>,
        }
        #[async_trait]
        impl Transport for SilentTransport {
            async fn write(&self, _data: &[u8]) -> Result<(), Error> {
                Ok(())
            }
            fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
                self.tx.subscribe()
            }
            fn address(&self) -> &str {
                "silent"
            }
            async fn is_connected(&self) -> bool {
                true
            }
            async fn disconnect(&self) -> Result<(), Error> {
                Ok(())
            }
        }
        let (tx, _) = broadcast::channel(1);
        let session = Session::new(Arc::new(SilentTransport { tx }));
        let result = session
            .send(Service::GetDeviceModel, &[], Duration::from_millis(30))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }
}
