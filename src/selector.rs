/// Selection module
///
/// Anti-repetition filter cascade. Tiers, first non-empty result wins:
///
/// 1. primary topic, candidates from a fresh channel
/// 2. up to three backup topics, same filter
/// 3. relaxed pass over every candidate seen this cycle: fresh video and fresh
///    channel, then fresh video from a repeated channel, then (lenient only) anything
///
/// Strict mode reports `NoNewContent` instead of sending a repeated video.
/// Memories are only updated through [`Selector::register_delivery`], after a
/// confirmed send.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{ConfigError, SelectionError};
use crate::memory::{BoundedMemory, MemorySnapshot};
use crate::topics::TopicRotator;
use crate::youtube::{VideoCandidate, VideoSearch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatPolicy {
    /// Abstain rather than resend a recently sent video
    Strict,
    /// Fall back to any candidate when nothing new exists
    Lenient,
}

impl FromStr for RepeatPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(RepeatPolicy::Strict),
            "lenient" => Ok(RepeatPolicy::Lenient),
            other => Err(ConfigError::Invalid {
                key: "REPEAT_POLICY",
                value: other.to_string(),
            }),
        }
    }
}

/// Which tier produced the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTier {
    PrimaryTopic,
    BackupTopic,
    RelaxedFresh,
    RelaxedRepeatChannel,
    RepeatedVideo,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub candidate: VideoCandidate,
    pub tier: SelectionTier,
    pub attempted_topics: Vec<String>,
}

pub struct Selector {
    rotator: TopicRotator,
    sent_videos: BoundedMemory,
    sent_channels: BoundedMemory,
    repeat_policy: RepeatPolicy,
    max_results: usize,
    rng: StdRng,
}

impl Selector {
    pub fn new(
        rotator: TopicRotator,
        video_capacity: usize,
        channel_capacity: usize,
        repeat_policy: RepeatPolicy,
        max_results: usize,
    ) -> Self {
        Self::build(
            rotator,
            video_capacity,
            channel_capacity,
            repeat_policy,
            max_results,
            StdRng::from_os_rng(),
        )
    }

    pub fn with_seed(
        rotator: TopicRotator,
        video_capacity: usize,
        channel_capacity: usize,
        repeat_policy: RepeatPolicy,
        max_results: usize,
        seed: u64,
    ) -> Self {
        Self::build(
            rotator,
            video_capacity,
            channel_capacity,
            repeat_policy,
            max_results,
            StdRng::seed_from_u64(seed),
        )
    }

    fn build(
        rotator: TopicRotator,
        video_capacity: usize,
        channel_capacity: usize,
        repeat_policy: RepeatPolicy,
        max_results: usize,
        rng: StdRng,
    ) -> Self {
        Self {
            rotator,
            sent_videos: BoundedMemory::new(video_capacity),
            sent_channels: BoundedMemory::new(channel_capacity),
            repeat_policy,
            max_results,
            rng,
        }
    }

    /// Run the cascade for one cycle
    pub async fn select(&mut self, search: &dyn VideoSearch) -> Result<Selection, SelectionError> {
        let mut attempted: Vec<String> = Vec::new();
        let mut pool: Vec<VideoCandidate> = Vec::new();
        let mut pool_ids: HashSet<String> = HashSet::new();

        let primary = self.rotator.next();
        log::info!(
            "Primary topic: {} ({} configured, {:?} rotation)",
            primary,
            self.rotator.topics().len(),
            self.rotator.policy()
        );

        if let Some(candidate) = self
            .try_topic(search, &primary, &mut attempted, &mut pool, &mut pool_ids)
            .await
        {
            return Ok(Selection {
                candidate,
                tier: SelectionTier::PrimaryTopic,
                attempted_topics: attempted,
            });
        }

        for backup in self.rotator.backups(&attempted) {
            log::info!("No fresh channel for previous topics, trying backup topic: {}", backup);
            if let Some(candidate) = self
                .try_topic(search, &backup, &mut attempted, &mut pool, &mut pool_ids)
                .await
            {
                return Ok(Selection {
                    candidate,
                    tier: SelectionTier::BackupTopic,
                    attempted_topics: attempted,
                });
            }
        }

        if pool.is_empty() {
            log::warn!("No candidates found for topics {:?}", attempted);
            return Err(SelectionError::NoCandidates { attempted });
        }

        log::info!(
            "Last resort over {} pooled candidates from {:?}",
            pool.len(),
            attempted
        );
        match self.relaxed_pick(&pool) {
            Some((candidate, tier)) => Ok(Selection {
                candidate,
                tier,
                attempted_topics: attempted,
            }),
            None => Err(SelectionError::NoNewContent {
                attempted,
                pool_size: pool.len(),
            }),
        }
    }

    /// Search one topic, add results to the pool, and pick from fresh channels
    async fn try_topic(
        &mut self,
        search: &dyn VideoSearch,
        topic: &str,
        attempted: &mut Vec<String>,
        pool: &mut Vec<VideoCandidate>,
        pool_ids: &mut HashSet<String>,
    ) -> Option<VideoCandidate> {
        attempted.push(topic.to_string());

        let found = match search.search(topic, self.max_results).await {
            Ok(found) => found,
            Err(e) => {
                log::warn!("Search failed for topic '{}': {}", topic, e);
                Vec::new()
            }
        };

        for candidate in &found {
            if pool_ids.insert(candidate.id.clone()) {
                pool.push(candidate.clone());
            }
        }

        let fresh: Vec<&VideoCandidate> = found
            .iter()
            .filter(|v| !self.sent_channels.contains(&v.channel_id))
            .collect();

        let picked = fresh.choose(&mut self.rng).map(|v| (*v).clone());
        if let Some(video) = &picked {
            log::info!(
                "Selected \"{}\" from channel {} ({})",
                video.title,
                video.channel_title,
                video.channel_id
            );
        }
        picked
    }

    fn relaxed_pick(&mut self, pool: &[VideoCandidate]) -> Option<(VideoCandidate, SelectionTier)> {
        let unsent: Vec<&VideoCandidate> = pool
            .iter()
            .filter(|v| !self.sent_videos.contains(&v.id))
            .collect();
        let unsent_fresh: Vec<&VideoCandidate> = unsent
            .iter()
            .copied()
            .filter(|v| !self.sent_channels.contains(&v.channel_id))
            .collect();

        log::info!(
            "Pool: {} total, {} not sent recently, {} also from fresh channels",
            pool.len(),
            unsent.len(),
            unsent_fresh.len()
        );

        if let Some(video) = unsent_fresh.choose(&mut self.rng) {
            return Some(((*video).clone(), SelectionTier::RelaxedFresh));
        }
        if let Some(video) = unsent.choose(&mut self.rng) {
            log::warn!("Repeating channel {} for \"{}\"", video.channel_title, video.title);
            return Some(((*video).clone(), SelectionTier::RelaxedRepeatChannel));
        }

        match self.repeat_policy {
            RepeatPolicy::Lenient => {
                let video = pool.choose(&mut self.rng)?;
                log::warn!("Every candidate was sent recently, repeating \"{}\"", video.title);
                Some((video.clone(), SelectionTier::RepeatedVideo))
            }
            RepeatPolicy::Strict => {
                log::warn!("Every candidate was sent recently, abstaining (strict mode)");
                None
            }
        }
    }

    /// Remember a delivered video. Call only after a confirmed send.
    pub fn register_delivery(&mut self, candidate: &VideoCandidate) {
        self.sent_videos.push(candidate.id.clone());
        self.sent_channels.push(candidate.channel_id.clone());
    }

    pub fn sent_videos(&self) -> &BoundedMemory {
        &self.sent_videos
    }

    pub fn sent_channels(&self) -> &BoundedMemory {
        &self.sent_channels
    }

    pub fn repeat_policy(&self) -> RepeatPolicy {
        self.repeat_policy
    }

    pub fn rotator(&self) -> &TopicRotator {
        &self.rotator
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            sent_videos: self.sent_videos.clone(),
            sent_channels: self.sent_channels.clone(),
            topic_cursor: self.rotator.cursor(),
        }
    }

    pub fn restore(&mut self, snapshot: MemorySnapshot) {
        self.sent_videos = snapshot.sent_videos;
        self.sent_channels = snapshot.sent_channels;
        self.rotator.set_cursor(snapshot.topic_cursor);
    }
}
