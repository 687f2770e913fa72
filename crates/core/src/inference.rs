use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    error::{Result, SkipperError},
    format::format_comments_with_timestamps,
    provider::InferenceEndpoint,
    types::{AdSegment, TranscriptUnit},
};

static SUBTITLES_PROMPT: &str = r#"You are a data extraction robot. Read the video subtitles below and find the sponsored segment (a paid promotion, advertisement or product placement read by the creator).

OUTPUT: Return ONLY one raw JSON object, no markdown and no explanation:
{"start": <seconds>, "end": <seconds>}

RULES:
- "start" and "end" are numbers of seconds from the beginning of the video
- If there is no sponsored segment, return {"start": 0, "end": 0}

Subtitles:
---
"#;

static DANMAKU_PROMPT: &str = r#"You are an expert analyst of Bilibili danmaku (timed viewer comments). Each comment has a "time" (seconds into the video when it was sent) and a "content". Find the start and end of the sponsored segment.

KEY COMMENTS:
Viewers often mark an ad with a single comment that carries both ends of it, such as "我是四分三十五郎" or "谢谢你4分35狼".
- The "start" of the ad is the "time" of that comment.
- The "end" of the ad is the time written in its "content" ("四分三十五" or "4分35" means 275 seconds).
- If several key comments exist, use the earliest "time" as "start" and the latest time written in any content as "end".

FALLBACK:
Only if there is no key comment, combine separate comments: the earliest "time" of a comment mentioning the ad (e.g. "赞助", "恰饭", "广告") is "start", the latest time written in a comment's content (e.g. "五分二十") is "end".

OUTPUT: Return ONLY one raw JSON object, no markdown and no explanation:
{"start": <seconds>, "end": <seconds>}
If no ad is found, return {"start": 0, "end": 0}.

Danmaku:
---
"#;

// Also matches single-line fences such as ```json {"start":1,"end":2}```.
static FENCED_JSON_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?[ \t]*\r?\n?([\s\S]*?)\r?\n?[ \t]*```").unwrap());

static BRACED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[\s\S]*?\}").unwrap());

/// A remote service answering a single prompt with free text.
#[async_trait]
pub trait TextInference: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Chat-completions client for any of the supported providers.
pub struct ProviderClient {
    client: Client,
    endpoint: InferenceEndpoint,
}

impl ProviderClient {
    pub fn new(client: Client, endpoint: InferenceEndpoint) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl TextInference for ProviderClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(
            provider = self.endpoint.provider.name(),
            model = %self.endpoint.model,
            prompt_chars = prompt.len(),
            "calling inference endpoint"
        );

        let response = self
            .client
            .post(&self.endpoint.api_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&serde_json::json!({
                "model": self.endpoint.model,
                "messages": [
                    {
                        "role": "user",
                        "content": prompt,
                    },
                ],
                "temperature": 0.1,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SkipperError::inference(format!(
                "{} returned status {status}",
                self.endpoint.provider.name()
            )));
        }

        let response = response.json::<serde_json::Value>().await?;

        // Extract content from response - /v1/chat/completions format
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                SkipperError::inference(format!("Invalid API response structure: {response}"))
            })
    }
}

/// Builds the prompt for a transcript unit.
pub fn build_prompt(unit: &TranscriptUnit) -> Result<String> {
    Ok(match unit {
        TranscriptUnit::Transcript { text } => {
            format!("{SUBTITLES_PROMPT}{text}\n---\nJSON output only:")
        }
        TranscriptUnit::CommentSet { items } => {
            format!(
                "{DANMAKU_PROMPT}{}\n---\nJSON output only:",
                serde_json::to_string(items)?
            )
        }
    })
}

/// Finds the JSON object in a model answer.
///
/// A fenced code block wins; otherwise the last `{...}` in the text is taken,
/// since earlier ones tend to be echoes of the prompt's examples.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(fenced) = FENCED_JSON_REGEX
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| s.starts_with('{'))
    {
        return Some(fenced);
    }

    BRACED_REGEX.find_iter(text).last().map(|m| m.as_str())
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    start: f64,
    end: f64,
}

/// Extracts and normalizes the `{start, end}` answer.
pub fn parse_segment(text: &str) -> Result<AdSegment> {
    let json = extract_json(text)
        .ok_or_else(|| SkipperError::inference(format!("no JSON object in response: {text:?}")))?;

    let raw: RawSegment = serde_json::from_str(json)
        .map_err(|e| SkipperError::inference(format!("unparseable segment {json:?}: {e}")))?;

    AdSegment::from_inferred(raw.start, raw.end).ok_or_else(|| {
        SkipperError::inference(format!("invalid segment start={} end={}", raw.start, raw.end))
    })
}

pub struct SegmentInferencer {
    client: Arc<dyn TextInference>,
}

impl SegmentInferencer {
    pub fn new(client: Arc<dyn TextInference>) -> Self {
        Self { client }
    }

    pub async fn try_infer(&self, unit: &TranscriptUnit) -> Result<AdSegment> {
        if let TranscriptUnit::CommentSet { items } = unit {
            debug!(
                count = items.len(),
                "danmaku sent for inference:\n{}",
                format_comments_with_timestamps(items)
            );
        }

        let prompt = build_prompt(unit)?;
        let answer = self.client.complete(&prompt).await?;
        debug!(%answer, "inference answer");

        parse_segment(&answer)
    }

    /// Like [`Self::try_infer`], with every failure logged and mapped to `None`.
    pub async fn infer(&self, unit: &TranscriptUnit) -> Option<AdSegment> {
        match self.try_infer(unit).await {
            Ok(segment) => {
                info!(kind = unit.kind(), start = segment.start, end = segment.end, "inferred segment");
                Some(segment)
            }
            Err(e) => {
                warn!(kind = unit.kind(), "inference failed: {e}");
                None
            }
        }
    }
}
