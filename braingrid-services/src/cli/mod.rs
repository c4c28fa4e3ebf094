//! Cluster command-line interface over coordination mailboxes.
//!
//! A [`CliClient`] owns an ephemeral entry under `/<root>/CLI/` and writes
//! command lines of the form `Root.Subcommand key1 val1 key2 val2` into it.
//! The leader's [`CliServer`] scans those entries, runs each request through
//! a [`CommandRegistry`] and writes the response back into the same entry.

pub mod client;
pub mod handler;
pub mod mailbox;
pub mod parser;
pub mod server;

pub use client::{CliClient, CliResponse};
pub use handler::{BgCommands, CommandHandler, CommandRegistry};
pub use mailbox::Mailbox;
pub use parser::{parse, Command};
pub use server::{CliServer, CliServerConfig};
