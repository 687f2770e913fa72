//! Skipper Core Library
//!
//! Finds sponsored segments in Bilibili videos from their danmaku or
//! subtitles, caches the answer per video, and skips the segment during
//! playback unless the viewer declines.

pub mod cache;
pub mod error;
pub mod filter;
pub mod format;
pub mod inference;
pub mod pipeline;
pub mod provider;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod types;

// Re-export commonly used items at crate root
pub use cache::SegmentCache;
pub use error::{Result, SkipperError};
pub use filter::RelevanceFilter;
pub use format::{format_segment, format_timestamp};
pub use inference::{ProviderClient, SegmentInferencer, TextInference};
pub use pipeline::{
    Detection, Evaluation, NativeSkip, Orchestrator, PageContext, Pipeline, Platform,
    SessionOutcome, VideoElement,
};
pub use provider::{InferenceEndpoint, Provider};
pub use scheduler::{Player, PromptSurface, ScheduleConfig, SkipScheduler, SkipState};
pub use source::{BilibiliSource, TranscriptSource};
pub use store::{JsonFileStore, KvStore, MemoryStore, Settings};
pub use types::{AdSegment, Comment, ContentId, ElementId, TranscriptUnit, VideoId};
