/// YouTube search module
///
/// Queries the YouTube Data API v3 for recent short videos about a topic. A few query
/// variations are tried per topic to improve recall; failures of single variations are
/// skipped. Results are de-duplicated by id, filtered to a freshness window and sorted
/// newest first.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::SearchSettings;

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";

lazy_static! {
    /// CJK ideographs, kana and hangul
    static ref FOREIGN_SCRIPT: Regex =
        Regex::new(r"[\x{4e00}-\x{9fff}\x{3040}-\x{30ff}\x{ac00}-\x{d7af}]")
            .expect("static regex");
}

/// A searchable video, eligible for selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCandidate {
    pub id: String,
    pub channel_id: String,
    pub channel_title: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub topic: String,
}

/// Source of candidates for a topic
#[async_trait]
pub trait VideoSearch: Send + Sync {
    async fn search(&self, topic: &str, max_results: usize) -> Result<Vec<VideoCandidate>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    #[serde(default)]
    description: String,
    channel_id: String,
    #[serde(default)]
    channel_title: String,
    published_at: DateTime<Utc>,
}

pub struct YouTubeSearch {
    api_key: String,
    settings: SearchSettings,
    http_client: reqwest::Client,
}

impl YouTubeSearch {
    pub fn new(api_key: String, settings: SearchSettings) -> Self {
        Self {
            api_key,
            settings,
            http_client: reqwest::Client::new(),
        }
    }

    /// Query strings tried for a topic, most specific first
    pub fn query_variations(topic: &str, suffixes: &[String]) -> Vec<String> {
        let mut queries: Vec<String> = suffixes
            .iter()
            .map(|suffix| format!("{} {}", topic, suffix))
            .collect();
        queries.push(topic.to_string());
        queries
    }

    async fn run_query(&self, query: &str, max_results: usize) -> Result<Vec<SearchItem>> {
        let per_query = (max_results * 2).clamp(1, 20).to_string();

        let response = self
            .http_client
            .get(SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("videoDuration", "short"),
                ("maxResults", per_query.as_str()),
                ("order", "date"),
                ("regionCode", self.settings.region.as_str()),
                ("relevanceLanguage", self.settings.language.as_str()),
                ("safeSearch", "moderate"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("Failed to send YouTube search request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(anyhow::anyhow!(
                "YouTube API error (status {}): {}",
                status,
                error_text
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .context("Failed to parse YouTube search response")?;
        Ok(body.items)
    }
}

#[async_trait]
impl VideoSearch for YouTubeSearch {
    async fn search(&self, topic: &str, max_results: usize) -> Result<Vec<VideoCandidate>> {
        if self.api_key.is_empty() {
            log::error!("YOUTUBE_API_KEY is empty, search skipped");
            return Ok(Vec::new());
        }

        log::info!("Searching YouTube shorts for topic: {}", topic);

        let mut raw = Vec::new();
        for query in Self::query_variations(topic, &self.settings.query_suffixes) {
            match self.run_query(&query, max_results).await {
                Ok(items) => {
                    log::debug!("Query \"{}\" returned {} items", query, items.len());
                    raw.extend(items);
                    if raw.len() >= max_results {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Query \"{}\" failed, skipping: {}", query, e);
                }
            }
        }

        let candidates = raw
            .into_iter()
            .filter_map(|item| {
                let id = item.id.video_id?;
                Some(VideoCandidate {
                    url: format!("https://www.youtube.com/watch?v={}", id),
                    id,
                    channel_id: item.snippet.channel_id,
                    channel_title: item.snippet.channel_title,
                    title: item.snippet.title,
                    description: item.snippet.description,
                    published_at: item.snippet.published_at,
                    topic: topic.to_string(),
                })
            })
            .collect();

        let fresh = refine(candidates, Utc::now(), self.settings.freshness_days);
        log::info!("Found {} usable videos for topic: {}", fresh.len(), topic);
        Ok(fresh)
    }
}

/// De-duplicate by id, drop stale or foreign-script entries, newest first
pub fn refine(
    candidates: Vec<VideoCandidate>,
    now: DateTime<Utc>,
    freshness_days: i64,
) -> Vec<VideoCandidate> {
    let cutoff = ChronoDuration::try_days(freshness_days)
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let mut seen = HashSet::new();

    let mut kept: Vec<VideoCandidate> = candidates
        .into_iter()
        .filter(|video| seen.insert(video.id.clone()))
        .filter(|video| {
            if video.published_at < cutoff {
                log::debug!("Skipping stale video: {}", video.title);
                return false;
            }
            let text = format!("{} {} {}", video.title, video.description, video.channel_title);
            if FOREIGN_SCRIPT.is_match(&text) {
                log::debug!("Skipping foreign-script video: {}", video.title);
                return false;
            }
            true
        })
        .collect();

    kept.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, title: &str, age_days: i64, now: DateTime<Utc>) -> VideoCandidate {
        VideoCandidate {
            id: id.to_string(),
            channel_id: format!("ch-{}", id),
            channel_title: "Canal".to_string(),
            title: title.to_string(),
            description: String::new(),
            url: format!("https://www.youtube.com/watch?v={}", id),
            published_at: now - ChronoDuration::days(age_days),
            topic: "rust".to_string(),
        }
    }

    #[test]
    fn variations_end_with_bare_topic() {
        let suffixes = vec!["español".to_string(), "spanish".to_string()];
        assert_eq!(
            YouTubeSearch::query_variations("rust", &suffixes),
            vec!["rust español", "rust spanish", "rust"]
        );
    }

    #[test]
    fn refine_dedups_and_filters_stale() {
        let now = Utc::now();
        let videos = vec![
            video("a", "Tutorial de Rust", 1, now),
            video("a", "Tutorial de Rust", 1, now),
            video("b", "Rust viejo", 45, now),
            video("c", "Novedades", 0, now),
        ];

        let kept = refine(videos, now, 30);
        let ids: Vec<&str> = kept.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn refine_rejects_cjk_titles() {
        let now = Utc::now();
        let kept = refine(vec![video("x", "编程 教程", 1, now)], now, 30);
        assert!(kept.is_empty());
    }

    #[test]
    fn refine_tolerates_empty_input() {
        assert!(refine(Vec::new(), Utc::now(), 30).is_empty());
    }

    #[test]
    fn parses_search_payload() {
        let payload = r#"{
            "items": [
                {"id": {"videoId": "abc"}, "snippet": {
                    "title": "Hola", "description": "d", "channelId": "UC1",
                    "channelTitle": "Canal", "publishedAt": "2025-01-01T00:00:00Z"}},
                {"id": {"channelId": "UC2"}, "snippet": {
                    "title": "Canal", "channelId": "UC2",
                    "publishedAt": "2025-01-01T00:00:00Z"}}
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].id.video_id.as_deref(), Some("abc"));
        assert!(parsed.items[1].id.video_id.is_none());
    }
}
