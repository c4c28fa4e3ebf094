use super::mailbox::Mailbox;
use crate::{ServiceError, ServiceResult};
use braingrid_core::{ClusterPaths, CoordinationClient, CreateMode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Response to one CLI command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliResponse {
    pub ok: bool,
    pub output: String,
}

/// One CLI session, backed by an ephemeral mailbox entry.
pub struct CliClient {
    client: Arc<dyn CoordinationClient>,
    connection_id: String,
    path: String,
    poll_interval: Duration,
    timeout: Duration,
}

impl CliClient {
    /// Opens a mailbox under the cluster CLI path.
    pub async fn connect(
        client: Arc<dyn CoordinationClient>,
        paths: &ClusterPaths,
    ) -> ServiceResult<Self> {
        let connection_id = Uuid::new_v4().to_string();
        let path = paths.cli_connection(&connection_id);

        client.ensure_path(&paths.cli()).await?;
        client
            .create(&path, Mailbox::Idle.to_bytes()?, CreateMode::Ephemeral)
            .await?;
        debug!("Opened CLI mailbox {}", path);

        Ok(Self {
            client,
            connection_id,
            path,
            poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Sends one command line and waits for the leader's response.
    pub async fn execute(&self, command: &str) -> ServiceResult<CliResponse> {
        let request = Mailbox::Request {
            command: command.to_string(),
        };
        self.client.set(&self.path, request.to_bytes()?).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let data = self.client.get(&self.path).await?;
            if let Mailbox::Response { ok, output } = Mailbox::from_slice(&data)? {
                self.client.set(&self.path, Mailbox::Idle.to_bytes()?).await?;
                return Ok(CliResponse { ok, output });
            }

            if Instant::now() >= deadline {
                return Err(ServiceError::Timeout {
                    connection: self.connection_id.clone(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Removes the mailbox.
    pub async fn close(self) -> ServiceResult<()> {
        match self.client.delete(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_no_node() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
