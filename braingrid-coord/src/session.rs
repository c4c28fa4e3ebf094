//! Client handle bound to one ensemble session.

use crate::ensemble::Ensemble;
use async_trait::async_trait;
use braingrid_core::{CoordResult, CoordinationClient, CreateMode, SessionId, Watcher};
use bytes::Bytes;
use std::sync::Arc;

/// A session on an [`Ensemble`], usable wherever a `CoordinationClient` is
/// expected. Cloning shares the session.
#[derive(Clone)]
pub struct EnsembleSession {
    ensemble: Arc<Ensemble>,
    id: SessionId,
}

impl EnsembleSession {
    pub(crate) fn new(ensemble: Arc<Ensemble>, id: SessionId) -> Self {
        Self { ensemble, id }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn ensemble(&self) -> &Arc<Ensemble> {
        &self.ensemble
    }

    pub fn is_alive(&self) -> bool {
        self.ensemble.is_session_alive(self.id)
    }
}

impl std::fmt::Debug for EnsembleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnsembleSession").field("id", &self.id).finish()
    }
}

#[async_trait]
impl CoordinationClient for EnsembleSession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    async fn create(&self, path: &str, data: Bytes, mode: CreateMode) -> CoordResult<String> {
        self.ensemble.simulate_latency().await;
        self.ensemble.create(self.id, path, data, mode)
    }

    async fn exists(&self, path: &str) -> CoordResult<bool> {
        self.ensemble.simulate_latency().await;
        self.ensemble.exists(self.id, path)
    }

    async fn get(&self, path: &str) -> CoordResult<Bytes> {
        self.ensemble.simulate_latency().await;
        self.ensemble.get(self.id, path)
    }

    async fn set(&self, path: &str, data: Bytes) -> CoordResult<()> {
        self.ensemble.simulate_latency().await;
        self.ensemble.set(self.id, path, data)
    }

    async fn delete(&self, path: &str) -> CoordResult<()> {
        self.ensemble.simulate_latency().await;
        self.ensemble.delete(self.id, path)
    }

    async fn children(&self, path: &str) -> CoordResult<Vec<String>> {
        self.ensemble.simulate_latency().await;
        self.ensemble.children(self.id, path)
    }

    async fn ensure_path(&self, path: &str) -> CoordResult<()> {
        self.ensemble.simulate_latency().await;
        self.ensemble.ensure_path(self.id, path)
    }

    fn watch(&self, path: &str) -> CoordResult<Watcher> {
        self.ensemble.watch(self.id, path)
    }

    async fn close(&self) -> CoordResult<()> {
        self.ensemble.check_session(self.id)?;
        self.ensemble.expire_session(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnsembleConfig;
    use braingrid_core::{CoordError, WatchKind};

    #[tokio::test]
    async fn test_session_round_trip() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let session = ensemble.connect();

        session.ensure_path("/c/System/Nodes").await.unwrap();
        session
            .create("/c/System/Nodes/a", Bytes::from("x"), CreateMode::Ephemeral)
            .await
            .unwrap();

        assert!(session.exists("/c/System/Nodes/a").await.unwrap());
        assert_eq!(
            session.children("/c/System/Nodes").await.unwrap(),
            vec!["a".to_string()]
        );

        session
            .set("/c/System/Nodes/a", Bytes::from("y"))
            .await
            .unwrap();
        assert_eq!(
            session.get("/c/System/Nodes/a").await.unwrap(),
            Bytes::from("y")
        );
    }

    #[tokio::test]
    async fn test_watch_sees_child_deletion() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let owner = ensemble.connect();
        let observer = ensemble.connect();

        owner.ensure_path("/n").await.unwrap();
        owner
            .create("/n/a", Bytes::new(), CreateMode::Ephemeral)
            .await
            .unwrap();

        let mut watcher = observer.watch("/n").unwrap();
        owner.close().await.unwrap();

        let event = watcher.recv().await.unwrap();
        assert_eq!(event.path, "/n/a");
        assert_eq!(event.kind, WatchKind::Deleted);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let session = ensemble.connect();
        session.close().await.unwrap();

        assert!(!session.is_alive());
        let err = session.exists("/").await.unwrap_err();
        assert!(matches!(err, CoordError::ConnectionClosed { .. }));
        assert!(session.watch("/").is_err());
    }
}
