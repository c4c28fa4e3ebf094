//! # Election Recipe
//!
//! FIFO leader election on top of ephemeral sequential entries.
//!
//! Each contender creates `<election>/n_<seq>` and waits until its candidate
//! is the lowest sequence number still present. Being elected only grants the
//! right to *attempt* leadership; the caller must still win the compare-and-
//! create on the leader lock, which is the actual exclusivity point.

use crate::paths::{basename, join};
use crate::{CoordError, CoordResult, CoordinationClient, CreateMode};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const CANDIDATE_PREFIX: &str = "n_";

/// Election primitive over one election path.
pub struct ElectionRecipe {
    client: Arc<dyn CoordinationClient>,
    path: String,
    poll_fallback: Duration,
}

/// Proof of having been elected. Release it once the elected work is done so
/// the next candidate in line may proceed.
#[derive(Debug)]
#[must_use = "an unreleased ticket blocks every other candidate until the session ends"]
pub struct ElectionTicket {
    client: Arc<dyn CoordinationClient>,
    candidate_path: String,
}

impl ElectionRecipe {
    pub fn new(client: Arc<dyn CoordinationClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
            poll_fallback: Duration::from_millis(500),
        }
    }

    /// Sets how long to wait for a watch event before re-listing candidates.
    pub fn with_poll_fallback(mut self, interval: Duration) -> Self {
        self.poll_fallback = interval;
        self
    }

    /// Joins the election and blocks until this contender is first in line.
    ///
    /// On any error the candidate entry is removed (best effort) so that a
    /// failed contender never blocks the queue.
    pub async fn run(&self, identifier: &str) -> CoordResult<ElectionTicket> {
        self.client.ensure_path(&self.path).await?;

        // Subscribe before creating the candidate so no deletion is missed.
        let mut watcher = self.client.watch(&self.path).ok();

        let candidate_path = self
            .client
            .create(
                &join(&self.path, CANDIDATE_PREFIX),
                Bytes::from(identifier.to_string()),
                CreateMode::EphemeralSequential,
            )
            .await?;
        let own = basename(&candidate_path).to_string();

        debug!("Joined election at {} as {}", self.path, own);

        loop {
            let position = match self.sorted_candidates().await {
                Ok(candidates) => candidates.iter().position(|c| *c == own),
                Err(e) => {
                    self.abandon(&candidate_path).await;
                    return Err(e);
                }
            };

            match position {
                Some(0) => {
                    debug!("Candidate {} is first in line", own);
                    return Ok(ElectionTicket {
                        client: Arc::clone(&self.client),
                        candidate_path,
                    });
                }
                Some(ahead) => {
                    debug!("Candidate {} waiting behind {} contender(s)", own, ahead);
                }
                None => {
                    // Our ephemeral candidate vanished: the session ended.
                    return Err(CoordError::NoNode {
                        path: candidate_path,
                    });
                }
            }

            let watch_closed = match watcher.as_mut() {
                Some(rx) => tokio::select! {
                    event = rx.recv() => event.is_none(),
                    _ = tokio::time::sleep(self.poll_fallback) => false,
                },
                None => {
                    tokio::time::sleep(self.poll_fallback).await;
                    false
                }
            };
            if watch_closed {
                watcher = None;
            }
        }
    }

    /// Identifiers of the current contenders, first in line first.
    pub async fn contenders(&self) -> CoordResult<Vec<String>> {
        let mut identifiers = Vec::new();
        for candidate in self.sorted_candidates().await? {
            match self.client.get(&join(&self.path, &candidate)).await {
                Ok(data) => identifiers.push(String::from_utf8_lossy(&data).into_owned()),
                // Withdrew between listing and reading.
                Err(e) if e.is_no_node() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(identifiers)
    }

    async fn sorted_candidates(&self) -> CoordResult<Vec<String>> {
        let mut candidates: Vec<String> = self
            .client
            .children(&self.path)
            .await?
            .into_iter()
            .filter(|name| name.starts_with(CANDIDATE_PREFIX))
            .collect();
        candidates.sort_by_key(|name| sequence_of(name));
        Ok(candidates)
    }

    async fn abandon(&self, candidate_path: &str) {
        if let Err(e) = self.client.delete(candidate_path).await {
            if !e.is_no_node() {
                warn!("Failed to withdraw candidate {}: {}", candidate_path, e);
            }
        }
    }
}

impl ElectionTicket {
    /// The candidate entry backing this ticket.
    pub fn candidate_path(&self) -> &str {
        &self.candidate_path
    }

    /// Withdraws the candidate, letting the next contender through.
    pub async fn release(self) -> CoordResult<()> {
        match self.client.delete(&self.candidate_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_no_node() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn sequence_of(candidate: &str) -> u64 {
    candidate
        .trim_start_matches(CANDIDATE_PREFIX)
        .parse()
        .unwrap_or(u64::MAX)
}
