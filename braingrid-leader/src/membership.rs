//! Node presence registration and cluster membership listing.

use crate::LeaderResult;
use braingrid_core::{
    ClusterPaths, CoordinationClient, CreateMode, MembershipDelta, MembershipSet, NodeIdentity,
};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

/// Owns this node's presence entry under the cluster nodes path.
#[derive(Debug, Clone)]
pub struct MembershipRegistrar {
    client: Arc<dyn CoordinationClient>,
    identity: NodeIdentity,
    paths: ClusterPaths,
    advertise_address: String,
}

impl MembershipRegistrar {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        identity: NodeIdentity,
        paths: ClusterPaths,
        advertise_address: impl Into<String>,
    ) -> Self {
        Self {
            client,
            identity,
            paths,
            advertise_address: advertise_address.into(),
        }
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Path of this node's presence entry.
    pub fn presence_path(&self) -> String {
        self.paths.node(self.identity.name())
    }

    /// Creates this node's ephemeral presence entry, or overwrites its data if
    /// the entry is already there. Safe to call repeatedly.
    pub async fn register_presence(&self) -> LeaderResult<()> {
        let path = self.presence_path();
        let data = Bytes::from(self.advertise_address.clone());

        match self
            .client
            .create(&path, data.clone(), CreateMode::Ephemeral)
            .await
        {
            Ok(_) => {
                info!(node = %self.identity, "Registered presence at {}", path);
                Ok(())
            }
            Err(e) if e.is_node_exists() => {
                debug!("Presence entry {} already exists, overwriting", path);
                match self.client.set(&path, data.clone()).await {
                    Ok(()) => Ok(()),
                    // The old entry expired between the create and the set.
                    Err(e) if e.is_no_node() => {
                        self.client
                            .create(&path, data, CreateMode::Ephemeral)
                            .await?;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of every node currently holding a presence entry.
    pub async fn list_members(&self) -> LeaderResult<MembershipSet> {
        let children = self.client.children(&self.paths.nodes()).await?;
        Ok(children.into_iter().collect())
    }

    /// Whether this node's own name is in `members`.
    pub fn is_registered_in(&self, members: &MembershipSet) -> bool {
        members.contains(self.identity.name())
    }

    /// Pure set difference between two membership snapshots.
    pub fn diff_membership(previous: &MembershipSet, current: &MembershipSet) -> MembershipDelta {
        MembershipDelta::between(previous, current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braingrid_coord::{Ensemble, EnsembleConfig};

    async fn registrar(ensemble: &Arc<Ensemble>, name: &str) -> MembershipRegistrar {
        let session = ensemble.connect();
        let identity = NodeIdentity::new(name, session.id());
        let paths = ClusterPaths::new("test");
        session.ensure_path(&paths.nodes()).await.unwrap();
        MembershipRegistrar::new(Arc::new(session), identity, paths, "10.0.0.1")
    }

    #[tokio::test]
    async fn test_register_twice_is_idempotent() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let registrar = registrar(&ensemble, "node-a").await;

        registrar.register_presence().await.unwrap();
        registrar.register_presence().await.unwrap();

        let members = registrar.list_members().await.unwrap();
        assert_eq!(members.len(), 1);
        assert!(registrar.is_registered_in(&members));

        let entry = ensemble.entry("/test/System/Nodes/node-a").unwrap();
        assert_eq!(entry.data, Bytes::from("10.0.0.1"));
        assert_eq!(entry.version, 1);
    }

    #[tokio::test]
    async fn test_list_members_and_diff() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let a = registrar(&ensemble, "node-a").await;
        let b = registrar(&ensemble, "node-b").await;

        a.register_presence().await.unwrap();
        let before = a.list_members().await.unwrap();

        b.register_presence().await.unwrap();
        let after = a.list_members().await.unwrap();

        let delta = MembershipRegistrar::diff_membership(&before, &after);
        assert!(delta.joined.contains("node-b"));
        assert!(delta.left.is_empty());
    }
}
