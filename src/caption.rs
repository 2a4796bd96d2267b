/// Caption module
///
/// Captions are asked from Gemini and always fall back to a deterministic template,
/// so a caption problem never blocks a delivery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::youtube::VideoCandidate;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_DESCRIPTION_CHARS: usize = 300;

lazy_static! {
    static ref HASHTAG: Regex = Regex::new(r"#[\w-]+").expect("static regex");
    static ref BLANK_RUNS: Regex = Regex::new(r"[ \t]+").expect("static regex");
}

/// Produces the body text of a caption
#[async_trait]
pub trait CaptionWriter: Send + Sync {
    async fn write_caption(&self, candidate: &VideoCandidate) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeneratedCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeneratedCandidate {
    content: Content,
}

pub struct GeminiCaptioner {
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl GeminiCaptioner {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            http_client: reqwest::Client::new(),
        }
    }

    fn prompt(candidate: &VideoCandidate) -> String {
        format!(
            "Genera un resumen MUY BREVE en español (máximo 2 oraciones) para este video de YouTube.\n\
            Título: {}\n\
            Canal: {}\n\
            Tema: {}\n\
            Descripción: {}\n\
            El resumen debe explicar de qué trata el video de forma concisa y directa.",
            candidate.title,
            candidate.channel_title,
            candidate.topic,
            if candidate.description.trim().is_empty() {
                "Sin descripción"
            } else {
                candidate.description.as_str()
            }
        )
    }
}

#[async_trait]
impl CaptionWriter for GeminiCaptioner {
    async fn write_caption(&self, candidate: &VideoCandidate) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: Self::prompt(candidate),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.7,
                max_output_tokens: 200,
            },
        };

        let response = self
            .http_client
            .post(format!("{}/{}:generateContent", GEMINI_BASE, self.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .context("Failed to send caption request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error ({}): {}", status, body);
        }

        let response: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse caption response")?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default();

        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("Gemini returned an empty caption");
        }
        Ok(text.to_string())
    }
}

/// Caption built from an AI summary
pub fn ai_caption(candidate: &VideoCandidate, summary: &str) -> String {
    format!("🎬 *{}*\n\n{}", candidate.title.trim(), summary.trim())
}

/// Caption built only from the candidate's own metadata
pub fn fallback_caption(candidate: &VideoCandidate) -> String {
    let description = clean_description(&candidate.description);
    let body = if description.is_empty() {
        format!("📺 Video sobre {}", candidate.topic)
    } else {
        description
    };

    let mut caption = format!("🎬 *{}*\n", candidate.title.trim());
    if !candidate.channel_title.trim().is_empty() {
        caption.push_str(&format!("📺 {}\n", candidate.channel_title.trim()));
    }
    caption.push('\n');
    caption.push_str(&body);
    caption
}

/// Strip hashtags and squeeze whitespace, then cap the length
fn clean_description(raw: &str) -> String {
    let without_tags = HASHTAG.replace_all(raw, "");
    let lines: Vec<String> = without_tags
        .lines()
        .map(|line| BLANK_RUNS.replace_all(line.trim(), " ").into_owned())
        .filter(|line| !line.is_empty())
        .collect();
    let joined = lines.join("\n");

    if joined.chars().count() <= MAX_DESCRIPTION_CHARS {
        return joined;
    }
    let cut: String = joined.chars().take(MAX_DESCRIPTION_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// AI caption when available within `timeout`, template otherwise
pub async fn caption_for(
    writer: Option<&dyn CaptionWriter>,
    candidate: &VideoCandidate,
    timeout: Duration,
) -> String {
    let Some(writer) = writer else {
        return fallback_caption(candidate);
    };

    match tokio::time::timeout(timeout, writer.write_caption(candidate)).await {
        Ok(Ok(summary)) if !summary.trim().is_empty() => ai_caption(candidate, &summary),
        Ok(Ok(_)) => {
            log::warn!("AI caption was empty, using template");
            fallback_caption(candidate)
        }
        Ok(Err(e)) => {
            log::warn!("AI caption failed, using template: {:#}", e);
            fallback_caption(candidate)
        }
        Err(_) => {
            log::warn!("AI caption timed out after {:?}, using template", timeout);
            fallback_caption(candidate)
        }
    }
}
