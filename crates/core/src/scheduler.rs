//! Per-element skip state machine and the timer loop that drives it.
//!
//! [`SkipMachine`] is the pure part: it is fed playback positions and the
//! current instant and answers with the side effects to perform.
//! [`SkipScheduler`] owns one machine, samples the [`Player`] on its own
//! interval, arms the prompt countdown and listens for viewer commands.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval, sleep_until},
};
use tracing::{debug, info};

use crate::{
    error::SkipperError,
    format::format_timestamp,
    types::AdSegment,
};

/// The video element being controlled.
pub trait Player: Send + Sync {
    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    fn seek(&self, position: f64);

    /// Whether the element is still part of the document.
    fn is_connected(&self) -> bool;
}

/// Transient UI shown next to the player.
pub trait PromptSurface: Send + Sync {
    /// Announces the upcoming skip and offers a way to cancel it.
    fn show_prompt(&self, segment: &AdSegment);

    /// Replaces the prompt with a short-lived "ad skipped" notice. The notice
    /// expires on its own.
    fn show_skipped(&self, segment: &AdSegment);

    fn hide_prompt(&self);
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    /// Seconds before the segment start at which the prompt appears.
    pub prompt_lead: f64,
    pub countdown: Duration,
    pub sample_period: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            prompt_lead: 4.0,
            countdown: Duration::from_secs(3),
            sample_period: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipState {
    /// Waiting for the prompt window.
    Idle,
    /// Prompt on screen, skip fires at `deadline` unless cancelled.
    PromptPending { deadline: Instant },
    /// The prompt was shown and the viewer declined the skip. Terminal.
    PromptShown,
    /// Position was moved past the segment; waiting to observe its end.
    Skipped,
    /// Segment is over or the element went away. Terminal.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipAction {
    ShowPrompt,
    Seek(f64),
    ShowSkipped,
    HidePrompt,
}

pub struct SkipMachine {
    segment: AdSegment,
    config: ScheduleConfig,
    state: SkipState,
}

impl SkipMachine {
    /// Creates a machine for `segment` and evaluates the attach position.
    ///
    /// Returns `None` for segments that must not be scheduled (the sentinel).
    pub fn attach(
        segment: AdSegment,
        config: ScheduleConfig,
        position: f64,
        now: Instant,
    ) -> Option<(Self, Vec<SkipAction>)> {
        if !segment.is_ad() {
            return None;
        }

        let mut machine = Self {
            segment,
            config,
            state: SkipState::Idle,
        };
        let actions = machine.observe(position, now);
        Some((machine, actions))
    }

    pub fn state(&self) -> SkipState {
        self.state
    }

    pub fn segment(&self) -> &AdSegment {
        &self.segment
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            SkipState::PromptPending { deadline } => Some(deadline),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, SkipState::PromptShown | SkipState::Done)
    }

    fn prompt_time(&self) -> f64 {
        self.segment.start - self.config.prompt_lead
    }

    fn skip(&mut self) -> Vec<SkipAction> {
        self.state = SkipState::Skipped;
        vec![SkipAction::Seek(self.segment.end), SkipAction::ShowSkipped]
    }

    fn finish(&mut self) -> Vec<SkipAction> {
        self.state = SkipState::Done;
        vec![SkipAction::HidePrompt]
    }

    /// Feeds one position sample taken at `now`.
    pub fn observe(&mut self, position: f64, now: Instant) -> Vec<SkipAction> {
        match self.state {
            SkipState::Idle => {
                if position >= self.segment.end {
                    self.finish()
                } else if position >= self.segment.start {
                    // prompt never shown, correct right away
                    self.skip()
                } else if position >= self.prompt_time() {
                    self.state = SkipState::PromptPending {
                        deadline: now + self.config.countdown,
                    };
                    vec![SkipAction::ShowPrompt]
                } else {
                    Vec::new()
                }
            }
            SkipState::PromptPending { deadline } => {
                if position >= self.segment.end {
                    self.finish()
                } else if now >= deadline {
                    self.skip()
                } else {
                    Vec::new()
                }
            }
            SkipState::Skipped => {
                if position >= self.segment.end {
                    self.finish()
                } else {
                    Vec::new()
                }
            }
            SkipState::PromptShown | SkipState::Done => Vec::new(),
        }
    }

    /// Viewer declined the pending skip. Ignored outside the countdown.
    pub fn cancel(&mut self) -> Vec<SkipAction> {
        match self.state {
            SkipState::PromptPending { .. } => {
                self.state = SkipState::PromptShown;
                vec![SkipAction::HidePrompt]
            }
            _ => Vec::new(),
        }
    }

    /// The element left the document or another video took it over.
    pub fn detach(&mut self) -> Vec<SkipAction> {
        if self.is_terminal() {
            return Vec::new();
        }
        self.finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    CancelPrompt,
    Detach,
}

pub struct SkipScheduler {
    player: Arc<dyn Player>,
    surface: Arc<dyn PromptSurface>,
    machine: SkipMachine,
}

impl SkipScheduler {
    /// Attaches to `player`, applying any immediate action (a mid-ad attach
    /// seeks right here).
    pub fn attach(
        player: Arc<dyn Player>,
        surface: Arc<dyn PromptSurface>,
        segment: AdSegment,
        config: ScheduleConfig,
    ) -> Option<Self> {
        let position = player.current_time();
        let (machine, actions) = SkipMachine::attach(segment, config, position, Instant::now())?;

        info!(
            start = %format_timestamp(segment.start),
            end = %format_timestamp(segment.end),
            position,
            "attaching skip scheduler"
        );

        let scheduler = Self {
            player,
            surface,
            machine,
        };
        scheduler.apply(actions);
        Some(scheduler)
    }

    pub fn state(&self) -> SkipState {
        self.machine.state()
    }

    /// Samples the player until the segment reaches a terminal state.
    ///
    /// A closed command channel counts as a detach.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SchedulerCommand>,
    ) -> SkipState {
        let mut ticker = interval(self.machine.config.sample_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.machine.is_terminal() {
            let deadline = self.machine.deadline();

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(SchedulerCommand::CancelPrompt) => {
                        let actions = self.machine.cancel();
                        if !actions.is_empty() {
                            info!("ad skip cancelled by viewer");
                        }
                        self.apply(actions);
                    }
                    Some(SchedulerCommand::Detach) | None => {
                        debug!("scheduler detached");
                        let actions = self.machine.detach();
                        self.apply(actions);
                    }
                },
                _ = countdown(deadline) => self.sample(),
                _ = ticker.tick() => self.sample(),
            }
        }

        debug!(state = ?self.machine.state(), "scheduler finished");
        self.machine.state()
    }

    fn sample(&mut self) {
        if !self.player.is_connected() {
            let err = SkipperError::ScheduleRace {
                reason: format!("video element removed while {:?}", self.machine.state()),
            };
            debug!("tearing down: {err}");
            let actions = self.machine.detach();
            self.apply(actions);
            return;
        }

        let position = self.player.current_time();
        let actions = self.machine.observe(position, Instant::now());
        self.apply(actions);
    }

    fn apply(&self, actions: Vec<SkipAction>) {
        let segment = *self.machine.segment();
        for action in actions {
            match action {
                SkipAction::ShowPrompt => {
                    info!(start = %format_timestamp(segment.start), "ad ahead, prompting viewer");
                    self.surface.show_prompt(&segment);
                }
                SkipAction::Seek(position) => {
                    info!(
                        from = self.player.current_time(),
                        to = position,
                        "skipping ad"
                    );
                    self.player.seek(position);
                }
                SkipAction::ShowSkipped => self.surface.show_skipped(&segment),
                SkipAction::HidePrompt => self.surface.hide_prompt(),
            }
        }
    }
}

async fn countdown(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
