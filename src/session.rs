use crate::{
    probe::{RconSession, SharedRconSession},
    Endpoint, QueryErr, SocketConf,
};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;

/// Live RCON sessions keyed by endpoint, reused across polling cycles.
///
/// The map lock is held while a session is created, so concurrent callers
/// for the same endpoint always end up sharing one connection.
#[derive(Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<Endpoint, SharedRconSession>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached session for `endpoint` if it is connected and
    /// authenticated, otherwise replace it with a freshly connected one.
    ///
    /// A fresh session whose password was rejected is still cached and
    /// returned; its commands fail as unauthenticated until the next call
    /// replaces it.
    pub async fn get(
        &self,
        endpoint: &Endpoint,
        password: &str,
        socket_conf: &SocketConf,
    ) -> Result<SharedRconSession, QueryErr> {
        let mut sessions = self.sessions.lock().await;

        if let Some(existing) = sessions.get(endpoint) {
            let session = existing.lock().await;

            if session.is_connected() && session.is_authenticated() {
                return Ok(existing.clone());
            }
        }

        if let Some(stale) = sessions.remove(endpoint) {
            tracing::debug!("Discarding stale RCON session for {}", endpoint);
            stale.lock().await.close().await;
        }

        let mut session = RconSession::create(endpoint.clone(), password, *socket_conf);
        session.connect().await?;

        tracing::info!(
            "Opened RCON session for {} (authenticated: {})",
            endpoint,
            session.is_authenticated()
        );

        let session = Arc::new(Mutex::new(session));
        sessions.insert(endpoint.clone(), session.clone());

        Ok(session)
    }

    /// Drop the session for `endpoint` after a transport failure, closing its socket.
    pub async fn evict(&self, endpoint: &Endpoint) {
        let evicted = self.sessions.lock().await.remove(endpoint);

        if let Some(session) = evicted {
            tracing::debug!("Evicting RCON session for {}", endpoint);
            session.lock().await.close().await;
        }
    }

    /// Close every cached session.
    pub async fn close_all(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().await);

        for (_, session) in sessions {
            session.lock().await.close().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_connect_caches_nothing() {
        let cache = SessionCache::new();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let socket_conf = SocketConf {
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(500),
        };
        let result = cache
            .get(&Endpoint::create("127.0.0.1", port), "secret", &socket_conf)
            .await;

        assert!(result.is_err());
        assert!(cache.is_empty().await);
    }
}
