//! Token manager: resolve the current valid token via cache, storage, or
//! 256-value enumeration; periodic refresh.
//!
//! `Unknown -> Known -> Refreshing` state machine guarded by an `AtomicBool`
//! so at most one enumeration or refresh runs at a time; callers that arrive
//! mid-acquisition get the currently known token (if any) instead of racing
//! a second probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::Error;
use crate::protocol::Service;
use crate::session::Session;
use crate::token_store::TokenStore;

const ENUMERATION_PROBE_TIMEOUT: Duration = Duration::from_millis(300);
const PROBE_SERVICE: Service = Service::GetDeviceModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    Unknown,
    Known(u8),
    Refreshing,
}

pub struct TokenManager {
    session: Session,
    store: Arc<Mutex<TokenStore>>,
    state: Mutex<TokenState>,
    last_used: Mutex<Option<Instant>>,
    refresh_interval: Duration,
    acquiring: AtomicBool,
}

impl TokenManager {
    pub fn new(session: Session, store: Arc<Mutex<TokenStore>>, refresh_interval: Duration) -> Self {
        TokenManager {
            session,
            store,
            state: Mutex::new(TokenState::Unknown),
            last_used: Mutex::new(None),
            refresh_interval,
            acquiring: AtomicBool::new(false),
        }
    }

    /// Returns the current token if known and not due for refresh; otherwise
    /// looks it up in storage, then falls back to enumeration discovery.
    pub async fn ensure(&self) -> Result<u8, Error> {
        if let TokenState::Known(token) = *self.state.lock().await {
            if !self.due_for_refresh().await {
                return Ok(token);
            }
        }

        if let Some(token) = self.store.lock().await.get(self.session.address()) {
            debug!(token, "token loaded from storage");
            self.adopt(token, false).await?;
            return Ok(token);
        }

        self.refresh().await
    }

    /// Forces enumeration discovery, bypassing cache and storage.
    pub async fn refresh(&self) -> Result<u8, Error> {
        if self
            .acquiring
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Another acquisition is already running; fold into a no-op and
            // report the currently known token if any.
            if let TokenState::Known(token) = *self.state.lock().await {
                return Ok(token);
            }
            return Err(Error::TokenUnavailable);
        }

        *self.state.lock().await = TokenState::Refreshing;
        let result = self.enumerate().await;
        self.acquiring.store(false, Ordering::SeqCst);

        match result {
            Ok(token) => {
                self.adopt(token, true).await?;
                Ok(token)
            }
            Err(e) => {
                *self.state.lock().await = TokenState::Unknown;
                Err(e)
            }
        }
    }

    pub async fn set_manual(&self, token: u8, persist: bool) -> Result<(), Error> {
        self.adopt(token, persist).await
    }

    /// Clears the in-memory token only; persisted tokens survive.
    pub async fn invalidate(&self) {
        *self.state.lock().await = TokenState::Unknown;
    }

    pub async fn clear_storage(&self) -> Result<(), Error> {
        self.store.lock().await.clear()
    }

    async fn adopt(&self, token: u8, persist: bool) -> Result<(), Error> {
        *self.state.lock().await = TokenState::Known(token);
        *self.last_used.lock().await = Some(Instant::now());
        if persist {
            self.store.lock().await.put(self.session.address(), token)?;
        }
        Ok(())
    }

    async fn due_for_refresh(&self) -> bool {
        match *self.last_used.lock().await {
            Some(instant) => instant.elapsed() >= self.refresh_interval,
            None => true,
        }
    }

    /// Deterministic 0..=255 enumeration: send a probe carrying each
    /// candidate token as the payload, in order. The first candidate that
    /// yields a framed response (`service < 0`, non-empty payload) for this
    /// message wins.
    async fn enumerate(&self) -> Result<u8, Error> {
        for candidate in 0u16..=255 {
            let candidate = candidate as u8;
            let result = self
                .session
                .send(PROBE_SERVICE, &[candidate], ENUMERATION_PROBE_TIMEOUT)
                .await;
            match result {
                Ok(frame) if !frame.payload.is_empty() => {
                    info!(token = candidate, "token discovered by enumeration");
                    return Ok(candidate);
                }
                _ => continue,
            }
        }
        Err(Error::TokenUnavailable)
    }

    /// Background task body: refreshes on `refresh_interval` until cancelled.
    /// Spawned by the connection supervisor (C6), not by this type, so the
    /// caller controls its lifetime via the returned `JoinHandle`.
    pub async fn run_auto_refresh(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        loop {
            interval.tick().await;
            if let Err(e) = self.refresh().await {
                debug!(error = %e, "periodic token refresh failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::Arc as StdArc;
    use tokio::sync::broadcast;

    struct SingleTokenTransport {
        tx: broadcast::Sender<Vec<u8>>,
        accepted_token: u8,
    }

    #[async_trait]
    impl Transport for SingleTokenTransport {
        async fn write(&self, data: &[u8]) -> Result<(), Error> {
            // last byte of the encoded frame is the probe token payload
            let sent_token = *data.last().unwrap();
            let mut response = data.to_vec();
            response[2] |= 0x80;
            if sent_token != self.accepted_token {
                response.truncate(crate::frame::HEADER_LEN); // empty payload -> rejected
            }
            let _ = self.tx.send(response);
            Ok(())
        }

        fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
            self.tx.subscribe()
        }

        fn address(&self) -> &str {
            "AA:BB:CC:DD:EE:01"
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn disconnect(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ensure_discovers_and_persists_the_accepted_token() {
        let (tx, _) = broadcast::channel(256);
        let transport = StdArc::new(SingleTokenTransport {
            tx,
            accepted_token: 0x2A,
        });
        let session = Session::new(transport);
        let dir = std::env::temp_dir().join(format!("cp02-token-manager-test-{}", std::process::id()));
        let store = Arc::new(Mutex::new(TokenStore::open(dir.join("tokens.json")).unwrap()));
        let manager = TokenManager::new(session, store.clone(), Duration::from_secs(300));

        let token = manager.ensure().await.unwrap();
        assert_eq!(token, 0x2A);
        assert_eq!(store.lock().await.get("AA:BB:CC:DD:EE:01"), Some(0x2A));

        // second ensure() must not re-probe: cached state returns immediately.
        let token_again = manager.ensure().await.unwrap();
        assert_eq!(token_again, 0x2A);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn invalidate_then_ensure_reloads_from_storage_without_reprobing() {
        let (tx, _) = broadcast::channel(256);
        let transport = StdArc::new(SingleTokenTransport {
            tx,
            accepted_token: 0x07,
        });
        let session = Session::new(transport);
        let dir = std::env::temp_dir().join(format!("cp02-token-manager-test-inv-{}", std::process::id()));
        let store = Arc::new(Mutex::new(TokenStore::open(dir.join("tokens.json")).unwrap()));
        let manager = TokenManager::new(session, store, Duration::from_secs(300));

        let token = manager.ensure().await.unwrap();
        assert_eq!(token, 0x07);

        manager.invalidate().await;
        let token = manager.ensure().await.unwrap();
        assert_eq!(token, 0x07);

        std::fs::remove_dir_all(&dir).ok();
    }
}
