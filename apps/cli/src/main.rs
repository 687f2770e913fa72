use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use skipper_core::{
    BilibiliSource, ElementId, Evaluation, InferenceEndpoint, JsonFileStore, KvStore,
    Orchestrator, PageContext, Pipeline, Platform, Provider, ProviderClient, RelevanceFilter,
    Player, ScheduleConfig, SegmentCache, SegmentInferencer, SessionOutcome, Settings, SkipState,
    TranscriptUnit, VideoElement, VideoId, format_segment, format_timestamp,
    format::format_comments_with_timestamps, pipeline::video_id_from_url,
    source::default_client, store::default_store_path,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::player::{SimulatedPlayer, TerminalSurface};

mod player;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", secs / 60.0, secs % 60.0)
    }
}

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Gemini,
    Openai,
    Grok,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Gemini => Provider::Gemini,
            CliProvider::Openai => Provider::Openai,
            CliProvider::Grok => Provider::Grok,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Parser)]
#[command(name = "skipper")]
#[command(about = "Detect and skip sponsored segments in Bilibili videos")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path of the persistent store (cache and settings)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Infer the ad segment of a video
    Detect {
        /// Video URL or BV id
        video: String,

        #[command(flatten)]
        inference: InferenceArgs,

        /// Re-run inference even if the segment is cached
        #[arg(short, long)]
        force: bool,
    },
    /// Simulate playback and skip the ad when it comes up
    Watch {
        /// Video URL or BV id
        video: String,

        #[command(flatten)]
        inference: InferenceArgs,

        /// Playback position to start from, in seconds
        #[arg(long, default_value_t = 0.0)]
        from: f64,
    },
    /// Turn automatic skipping on or off
    Toggle { state: Switch },
    /// Show whether automatic skipping is enabled
    Status,
}

#[derive(Args)]
struct InferenceArgs {
    /// AI provider for ad detection
    #[arg(short, long, default_value = "gemini")]
    provider: CliProvider,

    /// Override the provider's chat completions URL
    #[arg(long)]
    api_url: Option<String>,

    /// Override the provider's model
    #[arg(long)]
    model: Option<String>,

    /// Base URL of the Bilibili API
    #[arg(long, default_value = BilibiliSource::API_BASE)]
    api_base: String,

    /// Extra danmaku keyword marking a comment as ad-related (repeatable)
    #[arg(long = "keyword")]
    keywords: Vec<String>,
}

fn create_spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn parse_video(input: &str) -> Result<VideoId> {
    video_id_from_url(input).with_context(|| format!("no BV id found in {input:?}"))
}

/// Page URL for `input`; bare BV ids get the canonical video page.
fn page_url(input: &str) -> Result<String> {
    if input.contains("://") {
        return Ok(input.to_string());
    }
    Ok(format!("{}/video/{}", BilibiliSource::BASE_URL, parse_video(input)?))
}

fn build_pipeline(args: InferenceArgs, store: Arc<dyn KvStore>) -> Result<Pipeline> {
    let provider: Provider = args.provider.into();
    let endpoint = InferenceEndpoint::from_env(provider, args.api_url, args.model)?;
    let client = default_client()?;

    let source = BilibiliSource::new(client.clone()).with_api_base(args.api_base);
    let inferencer = SegmentInferencer::new(Arc::new(ProviderClient::new(client, endpoint)));

    Ok(Pipeline::new(
        Arc::new(source),
        RelevanceFilter::new().with_keywords(args.keywords),
        inferencer,
        SegmentCache::new(store),
    ))
}

fn print_header(subtitle: &str) {
    println!(
        "\n{}  {}\n",
        style("skipper").cyan().bold(),
        style(subtitle).dim()
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let store_path = cli.store.unwrap_or_else(default_store_path);
    let store: Arc<dyn KvStore> = Arc::new(JsonFileStore::new(&store_path));

    let result = match cli.command {
        Command::Detect {
            video,
            inference,
            force,
        } => detect(&video, inference, force, store, cli.verbose).await,
        Command::Watch {
            video,
            inference,
            from,
        } => watch(&video, inference, from, store).await,
        Command::Toggle { state } => {
            let settings = Settings {
                enabled: matches!(state, Switch::On),
            };
            settings.save(store.as_ref()).await?;
            print_status(settings);
            Ok(())
        }
        Command::Status => {
            let settings = Settings::load(store.as_ref()).await?;
            print_status(settings);
            println!("  store: {}", style(store_path.display()).dim());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

fn print_status(settings: Settings) {
    let state = if settings.enabled {
        style("enabled").green().bold()
    } else {
        style("disabled").red().bold()
    };
    println!("{} Automatic skipping {}", style("●").cyan(), state);
}

async fn detect(
    input: &str,
    inference: InferenceArgs,
    force: bool,
    store: Arc<dyn KvStore>,
    verbose: bool,
) -> Result<()> {
    let video_id = parse_video(input)?;
    let pipeline = build_pipeline(inference, store)?;

    print_header("Ad Detector");

    let started = Instant::now();
    let spinner = create_spinner(&format!("Analyzing {video_id}..."))?;
    let detection = match pipeline.detect(&video_id, None, !force).await {
        Ok(detection) => detection,
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    let origin = match &detection.signal {
        None => "(cached)".to_string(),
        Some(unit) => format!("from {} [{}]", unit.kind(), format_duration(started.elapsed())),
    };
    spinner.finish_with_message(format!(
        "{} Analyzed {} {}",
        style("✓").green().bold(),
        style(&video_id).bold(),
        style(origin).dim()
    ));

    if verbose && let Some(TranscriptUnit::CommentSet { items }) = &detection.signal {
        println!("{}", style("─".repeat(60)).dim());
        println!("{}", style(format_comments_with_timestamps(items)).dim());
    }

    println!("{}", style("─".repeat(60)).dim());
    if detection.segment.is_ad() {
        println!(
            "{} Ad segment: {}",
            style("▶").yellow().bold(),
            style(format_segment(&detection.segment)).bold()
        );
    } else {
        println!("{} No ad detected", style("✓").green().bold());
    }

    Ok(())
}

async fn watch(
    input: &str,
    inference: InferenceArgs,
    from: f64,
    store: Arc<dyn KvStore>,
) -> Result<()> {
    let url = page_url(input)?;
    let settings = Settings::load(store.as_ref()).await?;
    let pipeline = Arc::new(build_pipeline(inference, store)?);

    print_header("Playback");

    let progress = create_spinner("starting...")?;
    let player = Arc::new(SimulatedPlayer::starting_at(from));
    let video = VideoElement {
        id: ElementId::new(),
        platform: Platform::from_url(&url),
        player: player.clone(),
        surface: Arc::new(TerminalSurface::new(progress.clone())),
    };
    let element = video.id;
    let page = PageContext {
        url,
        initial_state: None,
        video: Some(video),
    };

    let orchestrator = Arc::new(Orchestrator::new(pipeline, ScheduleConfig::default()));
    match orchestrator.evaluate(&page, &settings) {
        Evaluation::Started => {}
        Evaluation::Disabled => {
            progress.finish_and_clear();
            print_status(settings);
            return Ok(());
        }
        Evaluation::NativeSkip => {
            progress.finish_and_clear();
            println!(
                "{} Ads on this platform are skipped by its own player",
                style("●").cyan()
            );
            return Ok(());
        }
        other => {
            progress.finish_and_clear();
            anyhow::bail!("nothing to watch ({other:?})");
        }
    }

    let keys = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                debug!("enter pressed");
                orchestrator.cancel_prompt(element);
            }
        })
    };

    let session = orchestrator.join(element);
    tokio::pin!(session);
    let mut clock = tokio::time::interval(Duration::from_millis(500));

    let outcome = loop {
        tokio::select! {
            outcome = &mut session => break outcome,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.detach_all();
            }
            _ = clock.tick() => {
                progress.set_message(format!("playing {}", format_timestamp(player.current_time())));
            }
        }
    };

    keys.abort();
    progress.finish_and_clear();
    report(outcome);
    Ok(())
}

fn report(outcome: Option<SessionOutcome>) {
    let Some(outcome) = outcome else {
        println!("{} Session ended unexpectedly", style("✗").red().bold());
        return;
    };

    match (outcome.segment, outcome.final_state) {
        (None, _) => println!(
            "{} Could not detect an ad, no automatic skip",
            style("✗").red().bold()
        ),
        (Some(segment), None) if !segment.is_ad() => {
            println!("{} No ad detected", style("✓").green().bold())
        }
        (Some(segment), None) => println!(
            "{} Stopped before {}",
            style("●").cyan(),
            format_segment(&segment)
        ),
        (Some(segment), Some(state)) => {
            let summary = match state {
                SkipState::PromptShown => "kept watching",
                _ => "done",
            };
            println!(
                "{} {} {}",
                style("●").cyan(),
                format_segment(&segment),
                style(summary).dim()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_gets_canonical_page() -> Result<()> {
        let url = page_url("BV1GJ411x7h7")?;
        assert_eq!(url, "https://www.bilibili.com/video/BV1GJ411x7h7");
        assert_eq!(Platform::from_url(&url), Platform::Bilibili);
        Ok(())
    }

    #[test]
    fn urls_pass_through() -> Result<()> {
        let url = page_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ")?;
        assert_eq!(Platform::from_url(&url), Platform::YouTube);
        assert!(page_url("not a video").is_err());
        Ok(())
    }
}
