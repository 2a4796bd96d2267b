/// Topic rotation module
///
/// Cycles through the configured search topics either in order or at random.

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    Sequential,
    Random,
}

impl FromStr for RotationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sequential" => Ok(RotationPolicy::Sequential),
            "random" => Ok(RotationPolicy::Random),
            other => Err(ConfigError::Invalid {
                key: "TOPIC_ROTATION",
                value: other.to_string(),
            }),
        }
    }
}

pub struct TopicRotator {
    topics: Vec<String>,
    cursor: usize,
    policy: RotationPolicy,
    rng: StdRng,
}

impl TopicRotator {
    pub fn new(topics: Vec<String>, policy: RotationPolicy) -> Result<Self, ConfigError> {
        Self::build(topics, policy, StdRng::from_os_rng())
    }

    pub fn with_seed(
        topics: Vec<String>,
        policy: RotationPolicy,
        seed: u64,
    ) -> Result<Self, ConfigError> {
        Self::build(topics, policy, StdRng::seed_from_u64(seed))
    }

    fn build(
        topics: Vec<String>,
        policy: RotationPolicy,
        rng: StdRng,
    ) -> Result<Self, ConfigError> {
        if topics.is_empty() {
            return Err(ConfigError::EmptyTopics);
        }
        Ok(Self {
            topics,
            cursor: 0,
            policy,
            rng,
        })
    }

    /// Pick the primary topic for this cycle
    pub fn next(&mut self) -> String {
        match self.policy {
            RotationPolicy::Sequential => {
                let topic = self.topics[self.cursor].clone();
                self.cursor = (self.cursor + 1) % self.topics.len();
                topic
            }
            RotationPolicy::Random => self
                .topics
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or_else(|| self.topics[0].clone()),
        }
    }

    /// Backup topics for a cycle, at most `min(3, len - 1)`, never one already attempted.
    ///
    /// Sequential mode walks circularly from the current cursor; random mode shuffles
    /// the untried topics.
    pub fn backups(&mut self, attempted: &[String]) -> Vec<String> {
        let max = 3.min(self.topics.len() - 1);
        let untried = |topic: &&String| !attempted.contains(topic);

        match self.policy {
            RotationPolicy::Sequential => (0..self.topics.len())
                .map(|i| &self.topics[(self.cursor + i) % self.topics.len()])
                .filter(untried)
                .take(max)
                .cloned()
                .collect(),
            RotationPolicy::Random => {
                let mut pool: Vec<String> =
                    self.topics.iter().filter(untried).cloned().collect();
                pool.shuffle(&mut self.rng);
                pool.truncate(max);
                pool
            }
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Restore a persisted cursor (wrapped into range)
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor % self.topics.len();
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }
}
