//! Hierarchical key layout shared by every node of a cluster.
//!
//! ```text
//! /<root>/System/Nodes/<hostname>      ephemeral presence entry
//! /<root>/System/Leader                ephemeral leader lock (LeaderRecord JSON)
//! /<root>/System/Election              election candidates (ephemeral sequential)
//! /<root>/System/Telemetry/<hostname>  ephemeral stats blob
//! /<root>/CLI/<connectionId>           ephemeral CLI mailbox
//! ```

use crate::{CoordError, CoordResult};

/// Path builder for one cluster root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPaths {
    root: String,
}

impl ClusterPaths {
    /// Creates the layout under `root`. Leading and trailing slashes are
    /// ignored, so `"braingrid"` and `"/braingrid/"` are equivalent.
    pub fn new(root: &str) -> Self {
        let trimmed = root.trim_matches('/');
        Self {
            root: format!("/{}", trimmed),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn system(&self) -> String {
        join(&self.root, "System")
    }

    pub fn nodes(&self) -> String {
        join(&self.system(), "Nodes")
    }

    pub fn node(&self, hostname: &str) -> String {
        join(&self.nodes(), hostname)
    }

    pub fn leader(&self) -> String {
        join(&self.system(), "Leader")
    }

    pub fn election(&self) -> String {
        join(&self.system(), "Election")
    }

    pub fn telemetry(&self) -> String {
        join(&self.system(), "Telemetry")
    }

    pub fn telemetry_node(&self, hostname: &str) -> String {
        join(&self.telemetry(), hostname)
    }

    pub fn cli(&self) -> String {
        join(&self.root, "CLI")
    }

    pub fn cli_connection(&self, connection_id: &str) -> String {
        join(&self.cli(), connection_id)
    }

    /// Persistent parents that must exist before any node can register.
    pub fn persistent_parents(&self) -> Vec<String> {
        vec![
            self.nodes(),
            self.election(),
            self.telemetry(),
            self.cli(),
        ]
    }
}

/// Joins a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{}", child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Returns the last component of a path.
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Returns the parent of a path, or `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Checks that `path` is absolute, has no empty components and no trailing
/// slash.
pub fn validate(path: &str) -> CoordResult<()> {
    let invalid = || CoordError::InvalidPath {
        path: path.to_string(),
    };

    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') || path.ends_with('/') {
        return Err(invalid());
    }
    if path[1..].split('/').any(|component| component.is_empty()) {
        return Err(invalid());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let paths = ClusterPaths::new("/braingrid/");

        assert_eq!(paths.root(), "/braingrid");
        assert_eq!(paths.node("sim-01"), "/braingrid/System/Nodes/sim-01");
        assert_eq!(paths.leader(), "/braingrid/System/Leader");
        assert_eq!(paths.election(), "/braingrid/System/Election");
        assert_eq!(
            paths.telemetry_node("sim-01"),
            "/braingrid/System/Telemetry/sim-01"
        );
        assert_eq!(paths.cli_connection("42"), "/braingrid/CLI/42");
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(parent("/a/b/c"), Some("/a/b"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        assert_eq!(join("/", "a"), "/a");
    }

    #[test]
    fn test_validate() {
        assert!(validate("/").is_ok());
        assert!(validate("/a/b").is_ok());
        assert!(validate("a/b").is_err());
        assert!(validate("/a/").is_err());
        assert!(validate("/a//b").is_err());
    }
}
