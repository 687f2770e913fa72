use std::{
    collections::HashMap,
    sync::{
        Arc, LazyLock, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use regex::Regex;
use serde_json::Value;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    cache::SegmentCache,
    error::{Result, SkipperError},
    filter::RelevanceFilter,
    format::format_segment,
    inference::SegmentInferencer,
    scheduler::{
        Player, PromptSurface, ScheduleConfig, SchedulerCommand, SkipScheduler, SkipState,
    },
    source::TranscriptSource,
    store::Settings,
    types::{AdSegment, ContentId, ElementId, TranscriptUnit, VideoId},
};

pub static BVID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BV[a-zA-Z0-9_]{10}").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Ads are inferred from danmaku or subtitles and skipped by seeking.
    Bilibili,
    /// Ads are handled by the host's own skip control.
    YouTube,
}

impl Platform {
    pub fn from_url(url: &str) -> Self {
        if url.contains("youtube.com") || url.contains("youtu.be") {
            Platform::YouTube
        } else {
            Platform::Bilibili
        }
    }
}

/// Handles ads on platforms exposing a native skip control.
pub trait NativeSkip: Send + Sync {
    fn handle(&self, video: &VideoElement);
}

#[derive(Clone)]
pub struct VideoElement {
    pub id: ElementId,
    pub platform: Platform,
    pub player: Arc<dyn Player>,
    pub surface: Arc<dyn PromptSurface>,
}

/// What one evaluation tick sees of the page.
#[derive(Clone, Default)]
pub struct PageContext {
    pub url: String,
    /// State object the page was rendered with, if it exposes one.
    pub initial_state: Option<Value>,
    pub video: Option<VideoElement>,
}

impl PageContext {
    pub fn video_id(&self) -> Option<VideoId> {
        self.initial_state
            .as_ref()
            .and_then(|state| state["bvid"].as_str())
            .filter(|bvid| !bvid.is_empty())
            .map(VideoId::new)
            .or_else(|| video_id_from_url(&self.url))
    }

    pub fn content_id(&self) -> Option<ContentId> {
        let state = self.initial_state.as_ref()?;
        state["cidInfo"]["cid"]
            .as_u64()
            .or_else(|| state["videoData"]["cid"].as_u64())
            .map(ContentId)
    }
}

pub fn video_id_from_url(url: &str) -> Option<VideoId> {
    BVID_REGEX.find(url).map(|m| VideoId::new(m.as_str()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub segment: AdSegment,
    pub cached: bool,
    /// The signal sent for inference; `None` on a cache hit.
    pub signal: Option<TranscriptUnit>,
}

/// Cache → source → filter → inference → cache, for one video.
pub struct Pipeline {
    source: Arc<dyn TranscriptSource>,
    filter: RelevanceFilter,
    inferencer: SegmentInferencer,
    cache: SegmentCache,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn TranscriptSource>,
        filter: RelevanceFilter,
        inferencer: SegmentInferencer,
        cache: SegmentCache,
    ) -> Self {
        Self {
            source,
            filter,
            inferencer,
            cache,
        }
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    /// Finds the ad segment of `video_id`.
    ///
    /// With `use_cache` unset the cached value is neither read nor written.
    pub async fn detect(
        &self,
        video_id: &VideoId,
        known_cid: Option<ContentId>,
        use_cache: bool,
    ) -> Result<Detection> {
        if use_cache {
            if let Some(segment) = self.cache.get(video_id).await? {
                info!(%video_id, segment = %format_segment(&segment), "cache hit");
                return Ok(Detection {
                    segment,
                    cached: true,
                    signal: None,
                });
            }
            debug!(%video_id, "cache miss");
        }

        let signal = self.collect_signal(video_id, known_cid).await?;
        let segment = self
            .inferencer
            .infer(&signal)
            .await
            .ok_or_else(|| SkipperError::inference("no usable answer"))?;

        if use_cache {
            self.cache.put(video_id, segment).await;
        }

        Ok(Detection {
            segment,
            cached: false,
            signal: Some(signal),
        })
    }

    async fn collect_signal(
        &self,
        video_id: &VideoId,
        known_cid: Option<ContentId>,
    ) -> Result<TranscriptUnit> {
        let resolved = self.source.resolve(video_id, known_cid).await?;

        match resolved.unit {
            TranscriptUnit::CommentSet { items } => {
                let kept = self.filter.filter(&items);
                info!(%video_id, from = items.len(), to = kept.len(), "filtered danmaku");

                if !kept.is_empty() {
                    return Ok(TranscriptUnit::CommentSet { items: kept });
                }

                debug!(%video_id, "no relevant danmaku, falling back to subtitles");
                let text = self
                    .source
                    .transcript(video_id, resolved.content_id)
                    .await?;
                Ok(TranscriptUnit::Transcript { text })
            }
            unit => Ok(unit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Disabled,
    NoVideo,
    NativeSkip,
    NoVideoId,
    AlreadyAttached,
    Started,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub segment: Option<AdSegment>,
    /// Final scheduler state, `None` when nothing was scheduled.
    pub final_state: Option<SkipState>,
}

struct Session {
    token: u64,
    video_id: VideoId,
    commands: mpsc::UnboundedSender<SchedulerCommand>,
    task: Option<JoinHandle<SessionOutcome>>,
}

type Sessions = Arc<Mutex<HashMap<ElementId, Session>>>;

fn lock(
    sessions: &Mutex<HashMap<ElementId, Session>>,
) -> MutexGuard<'_, HashMap<ElementId, Session>> {
    sessions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Entry point of the evaluation ticks.
///
/// Each video element gets at most one session per video id; the session
/// runs the pipeline and then the skip scheduler on its own task. Sessions
/// are dropped when the orchestrator is disabled and when their element
/// leaves the document.
pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    schedule: ScheduleConfig,
    native_skip: Option<Arc<dyn NativeSkip>>,
    sessions: Sessions,
    next_token: AtomicU64,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<Pipeline>, schedule: ScheduleConfig) -> Self {
        Self {
            pipeline,
            schedule,
            native_skip: None,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    pub fn with_native_skip(mut self, native_skip: Arc<dyn NativeSkip>) -> Self {
        self.native_skip = Some(native_skip);
        self
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<ElementId, Session>> {
        lock(&self.sessions)
    }

    /// One evaluation tick. Must be called from within a tokio runtime.
    pub fn evaluate(&self, page: &PageContext, settings: &Settings) -> Evaluation {
        if !settings.enabled {
            self.detach_all();
            return Evaluation::Disabled;
        }

        let Some(video) = &page.video else {
            return Evaluation::NoVideo;
        };

        if video.platform == Platform::YouTube {
            if let Some(native_skip) = &self.native_skip {
                native_skip.handle(video);
            }
            return Evaluation::NativeSkip;
        }

        let Some(video_id) = page.video_id() else {
            debug!(element = %video.id, url = %page.url, "no video id on page");
            return Evaluation::NoVideoId;
        };

        let mut sessions = self.sessions();
        if let Some(previous) = sessions.get(&video.id) {
            if previous.video_id == video_id {
                return Evaluation::AlreadyAttached;
            }
            info!(element = %video.id, old = %previous.video_id, new = %video_id, "video changed on element");
            let _ = previous.commands.send(SchedulerCommand::Detach);
        }

        info!(element = %video.id, %video_id, "new video detected");
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(
            Arc::clone(&self.sessions),
            token,
            Arc::clone(&self.pipeline),
            self.schedule,
            video.clone(),
            video_id.clone(),
            page.content_id(),
            rx,
        ));

        sessions.insert(
            video.id,
            Session {
                token,
                video_id,
                commands,
                task: Some(task),
            },
        );
        Evaluation::Started
    }

    /// Forwards the viewer's "don't skip" to the element's scheduler.
    pub fn cancel_prompt(&self, element: ElementId) {
        if let Some(session) = self.sessions().get(&element) {
            let _ = session.commands.send(SchedulerCommand::CancelPrompt);
        }
    }

    /// Stops every session. A later enabled tick starts them afresh.
    pub fn detach_all(&self) {
        for (_, session) in self.sessions().drain() {
            let _ = session.commands.send(SchedulerCommand::Detach);
        }
    }

    /// Waits for the element's session. The in-progress marker stays in place
    /// while the element is still in the document.
    pub async fn join(&self, element: ElementId) -> Option<SessionOutcome> {
        let task = self.sessions().get_mut(&element)?.task.take()?;
        match task.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(%element, "session task failed: {e}");
                None
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    sessions: Sessions,
    token: u64,
    pipeline: Arc<Pipeline>,
    schedule: ScheduleConfig,
    video: VideoElement,
    video_id: VideoId,
    known_cid: Option<ContentId>,
    commands: mpsc::UnboundedReceiver<SchedulerCommand>,
) -> SessionOutcome {
    let element = video.id;
    let player = Arc::clone(&video.player);

    let outcome = drive_session(pipeline, schedule, video, video_id, known_cid, commands).await;

    if !player.is_connected() {
        let mut sessions = lock(&sessions);
        if sessions.get(&element).is_some_and(|s| s.token == token) {
            debug!(%element, "element left the document, dropping session");
            sessions.remove(&element);
        }
    }
    outcome
}

async fn drive_session(
    pipeline: Arc<Pipeline>,
    schedule: ScheduleConfig,
    video: VideoElement,
    video_id: VideoId,
    known_cid: Option<ContentId>,
    mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
) -> SessionOutcome {
    let segment = match pipeline.detect(&video_id, known_cid, true).await {
        Ok(detection) => detection.segment,
        Err(e) => {
            warn!(%video_id, "no automatic skip for this video: {e}");
            return SessionOutcome {
                segment: None,
                final_state: None,
            };
        }
    };

    if !segment.is_ad() {
        info!(%video_id, "no ad detected");
        return SessionOutcome {
            segment: Some(segment),
            final_state: None,
        };
    }

    // the element may have moved on while the pipeline ran
    while let Ok(command) = commands.try_recv() {
        if command == SchedulerCommand::Detach {
            debug!(%video_id, "detached before scheduling");
            return SessionOutcome {
                segment: Some(segment),
                final_state: None,
            };
        }
    }

    let final_state = match SkipScheduler::attach(video.player, video.surface, segment, schedule) {
        Some(scheduler) => Some(scheduler.run(commands).await),
        None => None,
    };

    SessionOutcome {
        segment: Some(segment),
        final_state,
    }
}
