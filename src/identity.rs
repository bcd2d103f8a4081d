//! Identity provider collaborator: caller token -> learner.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LearnerId(pub String);

impl LearnerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LearnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait IdentityProvider: Send + Sync {
    /// `None` for unknown tokens
    fn resolve(&self, token: &str) -> Option<LearnerId>;
}

/// Fixed token table from configuration. Only token digests are kept in memory.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    learners: HashMap<[u8; 32], LearnerId>,
}

impl StaticTokenProvider {
    pub fn new(callers: &BTreeMap<String, String>) -> Self {
        let learners = callers
            .iter()
            .filter(|(token, _)| !token.is_empty())
            .map(|(token, learner)| (digest(token), LearnerId(learner.clone())))
            .collect();
        Self { learners }
    }

    pub fn len(&self) -> usize {
        self.learners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.learners.is_empty()
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

impl IdentityProvider for StaticTokenProvider {
    fn resolve(&self, token: &str) -> Option<LearnerId> {
        if token.is_empty() {
            return None;
        }
        self.learners.get(&digest(token)).cloned()
    }
}
