//! Top-level scan: wires config, store, session and pipeline together.

use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use shotscan_core::{
    CapturePipeline, Classifier, DeadStore, Identifier, IdentifierGenerator, IdentifierSpace,
    NoProgress, PipelineError, PipelineSettings, ProgressSink, RunStats, ScanConfig, Session,
    SessionConfig, SessionController, ShutdownSignal,
};
use tracing::{debug, error, info, warn};

use crate::app::{config_manager, progress::BarProgress, terminal};
use crate::cli::{Args, Backend};

pub(crate) async fn run_scan(args: Args) -> Result<()> {
    let resolved = config_manager::resolve_config(&args)?;
    let config = resolved.config;

    let level = terminal::resolve_default_log_level(args.quiet, args.verbose, &config.log_level);
    terminal::init_tracing(&level, config.log_file.as_deref())?;

    debug!(?args, "CLI arguments parsed");
    if let Some(path) = &resolved.source {
        info!(path = %path.display(), "Loaded config file");
    }

    let result = scan(&args, &config).await;
    if let Err(error) = &result {
        error!(error = %format!("{error:#}"), "Scan aborted");
    }
    result.map(|_| ())
}

async fn scan(args: &Args, config: &ScanConfig) -> Result<RunStats> {
    if config.delay_below_recommended() {
        warn!(
            delay_secs = config.delay.as_secs_f64(),
            "Delay is below the recommended minimum of 0.5s; the origin may throttle or block requests"
        );
    }

    let space = config.identifier_space()?;
    let classifier = config.classifier()?;
    let ids = identifiers(space, args.start_at.as_deref())?;
    let take = usize::try_from(config.max_attempts).unwrap_or(usize::MAX);

    let dead_list = config.dead_list_path();
    let mut store = DeadStore::load(&dead_list, &space).with_context(|| {
        format!("Failed to load dead-identifier record '{}'", dead_list.display())
    })?;

    info!(
        base_url = %config.base_url,
        output_dir = %config.output_dir.display(),
        dead_list = %dead_list.display(),
        known_dead = store.len(),
        max_attempts = config.max_attempts,
        start = ids.position(),
        "Starting scan"
    );

    let session = acquire_session(args.backend, &config.session_config())
        .await
        .context("Failed to start session")?;
    let mut controller = SessionController::new(session);

    let shutdown = ShutdownSignal::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current identifier");
            signal.trigger();
        }
    });

    let use_bar = terminal::should_use_progress_bar(
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let bar = use_bar.then(|| BarProgress::new(config.max_attempts));

    let outcome = {
        let mut no_progress = NoProgress;
        let mut bar_progress = bar;
        let progress: &mut dyn ProgressSink = match bar_progress.as_mut() {
            Some(bar) => bar,
            None => &mut no_progress,
        };
        let outcome = run_pipeline(
            &mut controller,
            &mut store,
            &classifier,
            config,
            ids.take(take),
            &shutdown,
            progress,
        )
        .await;
        if let Some(bar) = &bar_progress {
            bar.finish();
        }
        outcome
    };

    controller.release().await;
    let stats = outcome?;

    info!(
        attempted = stats.attempted,
        persisted = stats.persisted,
        skipped = stats.skipped,
        errors = stats.fetch_errors,
        discarded = stats.discarded,
        marked_dead = stats.marked_dead,
        interrupted = stats.interrupted,
        "Scan complete"
    );
    Ok(stats)
}

async fn run_pipeline<S, I>(
    controller: &mut SessionController<S>,
    store: &mut DeadStore,
    classifier: &Classifier,
    config: &ScanConfig,
    ids: I,
    shutdown: &ShutdownSignal,
    progress: &mut dyn ProgressSink,
) -> Result<RunStats, PipelineError>
where
    S: Session,
    I: IntoIterator<Item = Identifier>,
{
    let mut pipeline =
        CapturePipeline::new(controller, store, classifier, PipelineSettings::from(config))?;
    Ok(pipeline.run(ids, shutdown, progress).await)
}

fn identifiers(space: IdentifierSpace, start_at: Option<&str>) -> Result<IdentifierGenerator> {
    let Some(raw) = start_at else {
        return Ok(space.iter());
    };
    let id = space
        .parse(raw)
        .with_context(|| format!("Invalid --start-at identifier '{raw}'"))?;
    Ok(IdentifierGenerator::starting_at(space, space.index_of(&id)))
}

async fn acquire_session(backend: Backend, config: &SessionConfig) -> Result<Box<dyn Session>> {
    match backend {
        Backend::Http => Ok(Box::new(shotscan_core::HttpSession::connect(config)?)),
        #[cfg(feature = "browser")]
        Backend::Browser => Ok(Box::new(
            shotscan_core::session::BrowserSession::launch(config).await?,
        )),
        #[cfg(not(feature = "browser"))]
        Backend::Browser => {
            let _ = config;
            anyhow::bail!("The browser backend is not available; rebuild with `--features browser`")
        }
    }
}
