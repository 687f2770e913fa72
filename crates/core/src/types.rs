use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fallback length of an ad whose end could not be inferred.
pub const DEFAULT_AD_DURATION: f64 = 60.0;

/// Public identifier of a video on its host platform (a `BV…` id on Bilibili).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Platform-internal content id required by the comment and subtitle endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(pub u64);

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one video element on a page, stable while it stays in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementId(pub Uuid);

impl ElementId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A timed viewer comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Emission time in seconds from the start of the video.
    pub time: f64,
    pub content: String,
}

impl Comment {
    pub fn new(time: f64, content: impl Into<String>) -> Self {
        Self {
            time,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptUnit {
    Transcript { text: String },
    CommentSet { items: Vec<Comment> },
}

impl TranscriptUnit {
    pub fn kind(&self) -> &'static str {
        match self {
            TranscriptUnit::Transcript { .. } => "subtitles",
            TranscriptUnit::CommentSet { .. } => "danmaku",
        }
    }
}

/// Inferred playback interval, in seconds.
///
/// `{0, 0}` is the "no ad detected" sentinel. Inferred and cached values pass
/// through [`AdSegment::from_inferred`], which enforces `end >= start >= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdSegment {
    pub start: f64,
    pub end: f64,
}

impl AdSegment {
    pub const NONE: AdSegment = AdSegment {
        start: 0.0,
        end: 0.0,
    };

    /// Normalizes a raw `{start, end}` pair coming from inference.
    ///
    /// A positive start with a zero end gets [`DEFAULT_AD_DURATION`] appended.
    /// Non-finite, negative or inverted pairs are rejected.
    pub fn from_inferred(start: f64, end: f64) -> Option<Self> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end < 0.0 {
            return None;
        }

        let end = if start > 0.0 && end == 0.0 {
            start + DEFAULT_AD_DURATION
        } else {
            end
        };

        (end >= start).then_some(Self { start, end })
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::NONE
    }

    /// Whether this segment should drive the scheduler at all.
    pub fn is_ad(&self) -> bool {
        self.start > 0.0 && self.end > self.start
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}
