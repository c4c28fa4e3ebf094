//! Command dispatch and the built-in `BG` commands.

use super::parser::Command;
use crate::{ServiceError, ServiceResult};
use async_trait::async_trait;
use braingrid_leader::NodeHandle;
use std::sync::Arc;

/// Handles every command under one root.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The root this handler answers to, matched case-insensitively
    fn root(&self) -> &str;

    /// `(subcommand, description)` pairs shown by `<Root>.help`
    fn commands(&self) -> Vec<(&'static str, &'static str)>;

    async fn execute(&self, command: &Command) -> ServiceResult<String>;
}

/// Routes commands to the handler registered for their root.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: Vec<Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `BG` root for `node`.
    pub fn with_builtins(node: NodeHandle) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(BgCommands::new(node)));
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn roots(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.root().to_string()).collect()
    }

    pub async fn dispatch(&self, command: &Command) -> ServiceResult<String> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.root().eq_ignore_ascii_case(&command.root))
            .ok_or_else(|| ServiceError::UnknownRoot {
                root: command.root.clone(),
            })?;

        if command.subcommand == "help" {
            return Ok(help_text(handler.as_ref()));
        }
        handler.execute(command).await
    }
}

fn help_text(handler: &dyn CommandHandler) -> String {
    let mut lines = vec![format!("{} commands:", handler.root())];
    for (name, description) in handler.commands() {
        lines.push(format!("  {}.{:<12} {}", handler.root(), name, description));
    }
    lines.join("\n")
}

/// The `BG` root: node and cluster identity queries.
pub struct BgCommands {
    node: NodeHandle,
}

impl BgCommands {
    pub fn new(node: NodeHandle) -> Self {
        Self { node }
    }
}

#[async_trait]
impl CommandHandler for BgCommands {
    fn root(&self) -> &str {
        "BG"
    }

    fn commands(&self) -> Vec<(&'static str, &'static str)> {
        vec![
            ("whoami", "host name of the node serving this session"),
            ("whoisleader", "host name and address of the current leader"),
            ("listcluster", "nodes currently registered in the cluster"),
            ("help", "this list"),
        ]
    }

    async fn execute(&self, command: &Command) -> ServiceResult<String> {
        match command.subcommand.as_str() {
            "whoami" => Ok(self.node.hostname().to_string()),
            "whoisleader" => Ok(match self.node.leader_record().await? {
                Some(record) => record.to_string(),
                None => "no leader".to_string(),
            }),
            "listcluster" => {
                let members = self.node.list_members().await?;
                Ok(members.into_iter().collect::<Vec<_>>().join("\n"))
            }
            "help" => Ok(help_text(self)),
            other => Err(ServiceError::UnknownCommand {
                root: self.root().to_string(),
                command: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parser::parse;
    use braingrid_coord::{Ensemble, EnsembleConfig};
    use braingrid_leader::{ClusterNode, LeaderConfig};

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        fn root(&self) -> &str {
            "Echo"
        }

        fn commands(&self) -> Vec<(&'static str, &'static str)> {
            vec![("say", "echo the text argument")]
        }

        async fn execute(&self, command: &Command) -> ServiceResult<String> {
            Ok(command.required("text")?.to_string())
        }
    }

    async fn bootstrapped(ensemble: &Arc<Ensemble>) -> NodeHandle {
        let node = ClusterNode::new(
            Arc::new(ensemble.connect()),
            LeaderConfig::new("node-a")
                .with_cluster_root("test")
                .with_advertise_address("10.0.0.1"),
        )
        .unwrap();
        node.bootstrap().await.unwrap();
        node.handle()
    }

    #[tokio::test]
    async fn test_builtin_commands() {
        let ensemble = Ensemble::new(EnsembleConfig::default());
        let registry = CommandRegistry::with_builtins(bootstrapped(&ensemble).await);

        let run = |line: &'static str| {
            let registry = registry.clone();
            async move { registry.dispatch(&parse(line).unwrap()).await }
        };

        assert_eq!(run("BG.whoami").await.unwrap(), "node-a");
        assert_eq!(run("bg.WhoIsLeader").await.unwrap(), "node-a (10.0.0.1)");
        assert_eq!(run("BG.listcluster").await.unwrap(), "node-a");
        assert!(run("BG.help").await.unwrap().contains("BG.whoisleader"));
        assert!(matches!(
            run("BG.reboot").await,
            Err(ServiceError::UnknownCommand { .. })
        ));
        assert!(matches!(
            run("Nope.x").await,
            Err(ServiceError::UnknownRoot { .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_root() {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(Echo));

        let out = registry
            .dispatch(&parse("Echo.say text hello").unwrap())
            .await
            .unwrap();
        assert_eq!(out, "hello");

        let err = registry.dispatch(&parse("Echo.say").unwrap()).await;
        assert!(matches!(err, Err(ServiceError::MissingArgument { .. })));
        assert!(registry
            .dispatch(&parse("Echo.help").unwrap())
            .await
            .unwrap()
            .contains("Echo.say"));
    }
}
