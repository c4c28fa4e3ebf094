//! Leader-side CLI mailbox server.

use super::handler::CommandRegistry;
use super::mailbox::Mailbox;
use super::parser::parse;
use crate::daemon::Daemon;
use crate::ServiceResult;
use async_trait::async_trait;
use braingrid_core::{ClusterPaths, CoordinationClient};
use braingrid_leader::Dependent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CliServerConfig {
    /// Delay between mailbox scans
    pub scan_interval: Duration,
}

impl Default for CliServerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_millis(200),
        }
    }
}

/// Answers CLI mailboxes while this node is leader.
pub struct CliServer {
    inner: Arc<Inner>,
    config: CliServerConfig,
    daemon: tokio::sync::Mutex<Option<Daemon>>,
}

struct Inner {
    client: Arc<dyn CoordinationClient>,
    paths: ClusterPaths,
    registry: CommandRegistry,
}

impl CliServer {
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        paths: ClusterPaths,
        registry: CommandRegistry,
        config: CliServerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                paths,
                registry,
            }),
            config,
            daemon: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn is_serving(&self) -> bool {
        self.daemon
            .lock()
            .await
            .as_ref()
            .map(Daemon::is_running)
            .unwrap_or(false)
    }

    /// Scans every mailbox once and answers pending requests.
    pub async fn serve_once(&self) -> ServiceResult<usize> {
        self.inner.serve_once().await
    }

    async fn start(&self) {
        let mut daemon = self.daemon.lock().await;
        if daemon.as_ref().map(Daemon::is_running).unwrap_or(false) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        *daemon = Some(Daemon::spawn("cli-server", self.config.scan_interval, move || {
            let inner = Arc::clone(&inner);
            async move {
                if let Err(e) = inner.serve_once().await {
                    warn!("CLI mailbox scan failed: {}", e);
                }
            }
        }));
        info!("CLI server started on {}", self.inner.paths.cli());
    }

    async fn stop(&self) {
        if let Some(daemon) = self.daemon.lock().await.take() {
            daemon.stop().await;
            info!("CLI server stopped");
        }
    }
}

impl Inner {
    async fn serve_once(&self) -> ServiceResult<usize> {
        let mut answered = 0;

        for connection in self.client.children(&self.paths.cli()).await? {
            let path = self.paths.cli_connection(&connection);
            let data = match self.client.get(&path).await {
                Ok(data) => data,
                // Client disconnected mid-scan.
                Err(e) if e.is_no_node() => continue,
                Err(e) => return Err(e.into()),
            };

            let command = match Mailbox::from_slice(&data) {
                Ok(Mailbox::Request { command }) => command,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Ignoring malformed mailbox {}: {}", connection, e);
                    continue;
                }
            };

            debug!("CLI {} -> {}", connection, command);
            let response = match self.execute(&command).await {
                Ok(output) => Mailbox::Response { ok: true, output },
                Err(e) => Mailbox::Response {
                    ok: false,
                    output: e.to_string(),
                },
            };

            match self.client.set(&path, response.to_bytes()?).await {
                Ok(()) => answered += 1,
                Err(e) if e.is_no_node() => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(answered)
    }

    async fn execute(&self, line: &str) -> ServiceResult<String> {
        let command = parse(line)?;
        self.registry.dispatch(&command).await
    }
}

#[async_trait]
impl Dependent for CliServer {
    fn name(&self) -> &str {
        "cli-server"
    }

    async fn transition_leader(&self) -> anyhow::Result<()> {
        self.start().await;
        Ok(())
    }

    async fn transition_follower(&self) -> anyhow::Result<()> {
        self.stop().await;
        Ok(())
    }

    async fn update_leader(&self) -> anyhow::Result<()> {
        self.start().await;
        Ok(())
    }

    async fn update_follower(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop().await;
        Ok(())
    }
}
