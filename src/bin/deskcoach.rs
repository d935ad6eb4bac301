//! DeskCoach CLI - daemon entry point and service control
//!
//! Commands:
//! - run: run the monitoring daemon in the foreground
//! - calibrate: capture a neutral-posture baseline
//! - start / stop / restart: manage the background daemon
//! - status: show the live snapshot and service state
//! - events: tail the event log
//! - purge: delete recorded events (and the baseline with --all)

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::unbounded;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use deskcoach::baseline::BaselineStore;
use deskcoach::calibration::{CalibrationOptions, CalibrationRoutine};
use deskcoach::camera::CameraSession;
use deskcoach::config::{Config, ConfigStore, PerfMode, PerformanceConfig, SensitivityPreset, StateConfig};
use deskcoach::estimator::{self, NullEstimator};
use deskcoach::event_log::{self, EventKind, EventLog};
use deskcoach::notify::{CommandDndProbe, CommandNotifier, DndProbe, DryRunNotifier, NoDndProbe, NotificationSink};
use deskcoach::policy::NotificationPolicy;
use deskcoach::pose_loop::PoseLoop;
use deskcoach::state_machine::PostureStateMachine;
use deskcoach::status_bus::{
    build_status_snapshot, read_calibration_progress, read_status, take_user_action,
    write_user_action, SnapshotPublisher,
};
use deskcoach::storage::StoragePaths;
use deskcoach::supervisor::{DaemonLaunchOptions, ServiceManager};
use deskcoach::types::{Channel, Clock, UserAction};
use deskcoach::COACH_VERSION;

/// DeskCoach - local, privacy-preserving posture coach
#[derive(Parser)]
#[command(name = "deskcoach")]
#[command(version = COACH_VERSION)]
#[command(about = "Posture monitoring daemon with sustained-condition nudges", long_about = None)]
struct Cli {
    /// Storage root (overrides the STORAGE_ROOT environment variable)
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum PresetArg {
    Sensitive,
    Standard,
    Conservative,
}

impl From<PresetArg> for SensitivityPreset {
    fn from(preset: PresetArg) -> Self {
        match preset {
            PresetArg::Sensitive => SensitivityPreset::Sensitive,
            PresetArg::Standard => SensitivityPreset::Standard,
            PresetArg::Conservative => SensitivityPreset::Conservative,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PerfModeArg {
    Lightweight,
    Quality,
    Performance,
}

impl From<PerfModeArg> for PerfMode {
    fn from(mode: PerfModeArg) -> Self {
        match mode {
            PerfModeArg::Lightweight => PerfMode::Lightweight,
            PerfModeArg::Quality => PerfMode::Quality,
            PerfModeArg::Performance => PerfMode::Performance,
        }
    }
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    Done,
    Snooze,
    Dismiss,
}

impl From<ActionArg> for UserAction {
    fn from(action: ActionArg) -> Self {
        match action {
            ActionArg::Done => UserAction::Done,
            ActionArg::Snooze => UserAction::Snooze,
            ActionArg::Dismiss => UserAction::Dismiss,
        }
    }
}

#[derive(clap::Args, Clone)]
struct RunArgs {
    /// Target frames per second (4-15)
    #[arg(long)]
    fps: Option<f64>,

    /// Camera device index
    #[arg(long)]
    camera: Option<u32>,

    /// Sensitivity preset
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,

    /// Log per-channel window diagnostics
    #[arg(long)]
    diagnostics: bool,

    /// Log frame-time and FPS profile periodically
    #[arg(long)]
    perf_profile: bool,

    /// Performance mode
    #[arg(long, value_enum)]
    perf_mode: Option<PerfModeArg>,

    /// Log decisions but suppress notification side effects
    #[arg(long)]
    dry_run: bool,

    /// Skip the OS DND query (treat DND as always off)
    #[arg(long)]
    no_dnd_check: bool,

    /// Enable or disable cooldown/snooze/dedupe gating
    #[arg(long, value_enum, default_value = "on")]
    cooldowns: Toggle,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring daemon in the foreground
    Run(RunArgs),

    /// Capture a neutral-posture baseline
    Calibrate {
        /// Capture duration in seconds (15-45)
        #[arg(long, default_value = "25")]
        duration: f64,

        /// Camera device index
        #[arg(long)]
        camera: Option<u32>,

        /// Sampling rate during capture
        #[arg(long, default_value = "8")]
        fps: f64,

        /// Run calibration as a detached background process
        #[arg(long)]
        background: bool,

        /// Cancel a running calibration instead of starting one
        #[arg(long)]
        cancel: bool,
    },

    /// Start the daemon in the background
    Start(RunArgs),

    /// Stop the background daemon
    Stop,

    /// Restart the daemon with its last-known configuration
    Restart,

    /// Show daemon, calibration, and posture status
    Status {
        /// Print the raw status JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent event log entries
    Events {
        /// Number of entries to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },

    /// Show the tail of the captured daemon log
    Logs {
        /// Number of lines to show
        #[arg(long, default_value = "50")]
        lines: usize,
    },

    /// Respond to the current nudge (done, snooze, or dismiss)
    Action {
        #[arg(value_enum)]
        action: ActionArg,
    },

    /// Delete recorded events; --all also removes the baseline
    Purge {
        #[arg(long)]
        all: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let paths = StoragePaths::resolve(cli.storage_root.as_deref());

    match cli.command {
        Commands::Run(args) => run_daemon(&paths, &args),
        Commands::Calibrate {
            duration,
            camera,
            fps,
            background,
            cancel,
        } => {
            if cancel {
                let supervisor = ServiceManager::new(paths);
                supervisor.stop_calibration()?;
                println!("calibration stopped");
                return Ok(());
            }
            if background {
                let supervisor = ServiceManager::new(paths);
                let pid = supervisor.start_calibration(duration)?;
                println!("calibration running (pid {pid}); watch calibration_status.json");
                return Ok(());
            }
            run_calibration(&paths, duration, camera, fps)
        }
        Commands::Start(args) => {
            let supervisor = ServiceManager::new(paths);
            let pid = supervisor.start_daemon(&launch_options(&args))?;
            println!("daemon running (pid {pid})");
            Ok(())
        }
        Commands::Stop => {
            let supervisor = ServiceManager::new(paths);
            supervisor.stop_daemon()?;
            println!("daemon stopped");
            Ok(())
        }
        Commands::Restart => {
            let supervisor = ServiceManager::new(paths);
            let pid = supervisor.restart_daemon()?;
            println!("daemon running (pid {pid})");
            Ok(())
        }
        Commands::Status { json } => show_status(&paths, json),
        Commands::Events { limit } => {
            for record in event_log::read_recent(&paths.events(), limit) {
                println!(
                    "{} {:?} [{}] {}",
                    record.timestamp, record.event_kind, record.state, record.reason
                );
            }
            Ok(())
        }
        Commands::Logs { lines } => {
            let supervisor = ServiceManager::new(paths);
            println!("{}", supervisor.daemon_log_tail(lines));
            Ok(())
        }
        Commands::Action { action } => {
            let action: UserAction = action.into();
            write_user_action(&paths.action_file(), action, Clock::new().now())?;
            println!("{} recorded; the daemon applies it within a second", action.as_str());
            Ok(())
        }
        Commands::Purge { all } => {
            event_log::purge(&paths.events())?;
            println!("event log purged");
            if all {
                BaselineStore::new(paths.baseline()).delete()?;
                println!("baseline removed");
            }
            Ok(())
        }
    }
}

fn launch_options(args: &RunArgs) -> DaemonLaunchOptions {
    DaemonLaunchOptions {
        fps: args.fps,
        camera: args.camera,
        preset: args.preset.map(|p| {
            let preset: SensitivityPreset = p.into();
            preset.as_str().to_string()
        }),
        perf_mode: args.perf_mode.map(|m| {
            match m {
                PerfModeArg::Lightweight => "lightweight",
                PerfModeArg::Quality => "quality",
                PerfModeArg::Performance => "performance",
            }
            .to_string()
        }),
        diagnostics: args.diagnostics,
        perf_profile: args.perf_profile,
        dry_run: args.dry_run,
        no_dnd_check: args.no_dnd_check,
        cooldowns_off: args.cooldowns == Toggle::Off,
    }
}

/// Apply CLI overrides on top of the loaded configuration.
fn effective_config(base: Config, args: &RunArgs) -> Result<Config> {
    let mut config = base;
    if let Some(mode) = args.perf_mode {
        config.performance = PerformanceConfig::from_mode(mode.into());
    }
    if let Some(fps) = args.fps {
        if !(4.0..=15.0).contains(&fps) {
            bail!("--fps {fps} outside the supported 4-15 range");
        }
        config.performance.target_fps = fps;
        config.performance.min_fps = config.performance.min_fps.min(fps);
        config.performance.max_fps = config.performance.max_fps.max(fps);
    }
    if let Some(camera) = args.camera {
        config.camera_index = camera;
    }
    if let Some(preset) = args.preset {
        config.state = StateConfig::from_preset(preset.into());
    }
    if args.perf_profile {
        config.performance.enable_profiling = true;
    }
    config.validate()?;
    Ok(config)
}

fn run_daemon(paths: &StoragePaths, args: &RunArgs) -> Result<()> {
    paths
        .ensure()
        .with_context(|| format!("cannot create storage root {}", paths.root().display()))?;

    let config = effective_config(ConfigStore::new(paths.config()).load(), args)?;
    let clock = Clock::new();
    let now = clock.now();
    let instance_id = uuid::Uuid::new_v4().to_string();

    let baseline = BaselineStore::new(paths.baseline())
        .load()
        .unwrap_or_else(|err| {
            log::warn!("baseline unreadable ({err}); running uncalibrated");
            None
        });
    if baseline.is_none() {
        log::warn!("no calibration baseline; detection paused until `deskcoach calibrate` runs");
    }
    let machine = baseline
        .as_ref()
        .map(|b| PostureStateMachine::new(b, config.state.clone(), now));

    let source = CameraSession::open(
        config.camera_index,
        config.performance.camera_width,
        config.performance.camera_height,
    )
    .context("camera open failed")?;

    let estimator = estimator::default_backend().unwrap_or_else(|| {
        log::warn!("no landmark backend in this build; posture state will stay paused");
        Box::new(NullEstimator)
    });

    let (event_log, log_writer) = EventLog::open(paths.events());
    let sink: Box<dyn NotificationSink> = if args.dry_run {
        Box::new(DryRunNotifier::default())
    } else {
        Box::new(CommandNotifier::new("DeskCoach"))
    };
    let dnd: Box<dyn DndProbe> = if args.no_dnd_check {
        Box::new(NoDndProbe)
    } else {
        Box::new(CommandDndProbe::new())
    };
    let mut policy = NotificationPolicy::new(
        config.nudge.clone(),
        baseline.as_ref().map(|b| b.lateral).unwrap_or(0.0),
        sink,
        dnd,
        event_log.clone(),
        args.cooldowns == Toggle::On,
    );

    let (transitions_tx, transitions_rx) = unbounded();
    let (config_tx, config_rx) = unbounded();
    let mut pose_loop = PoseLoop::new(
        &config,
        Box::new(source),
        estimator,
        machine,
        transitions_tx,
        now,
    );
    pose_loop.watch_config(config_rx);
    let pipeline = pose_loop.snapshot_handle();

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    let loop_thread = {
        let shutdown = Arc::clone(&shutdown);
        let loop_clock = clock.clone();
        std::thread::Builder::new()
            .name("pose-loop".into())
            .spawn(move || pose_loop.run(shutdown, loop_clock))
            .context("failed to spawn pose loop")?
    };

    let preset = config.state.preset.as_str().to_string();
    let mut status_publisher = SnapshotPublisher::live_status(paths.status());
    let mut last_diagnostics = 0.0_f64;
    let mut last_config_check = now;
    let mut config_mtime = file_mtime(&paths.config());

    log::info!(
        "deskcoach {COACH_VERSION} running (preset {preset}, {} FPS target)",
        config.performance.target_fps
    );

    while !shutdown.load(Ordering::Relaxed) {
        let now = clock.now();

        while let Ok(event) = transitions_rx.try_recv() {
            event_log.append(
                EventKind::StateExited,
                event.from_state.as_str(),
                &event.reason,
                serde_json::json!({ "time_in_state_sec": event.time_in_previous_state }),
            );
            event_log.append(
                EventKind::StateEntered,
                event.to_state.as_str(),
                &event.reason,
                serde_json::to_value(&event.metrics).unwrap_or_default(),
            );
            if args.diagnostics {
                log::info!(
                    "transition {} -> {}: {}",
                    event.from_state.as_str(),
                    event.to_state.as_str(),
                    event.reason
                );
            }
            policy.on_transition(&event, event.ts);
        }

        // Actions dropped by the UI or `deskcoach action` reach the
        // policy here.
        if let Some(request) = take_user_action(&paths.action_file()) {
            log::info!("user action: {}", request.action.as_str());
            policy.on_user_action(request.action, now);
        }

        policy.service_queue(now);

        // Hot reload: pick up edits to config.json and push them to the
        // policy and the state machine.
        if now - last_config_check >= 5.0 {
            last_config_check = now;
            let mtime = file_mtime(&paths.config());
            if mtime != config_mtime {
                config_mtime = mtime;
                let reloaded = ConfigStore::new(paths.config()).load();
                log::info!("configuration reloaded from {}", paths.config().display());
                policy.set_config(reloaded.nudge.clone());
                let _ = config_tx.send(reloaded.state.clone());
            }
        }

        let snapshot = pipeline.read().clone();
        let backoff = (
            policy.backoff_extra(Channel::Neck, now),
            policy.backoff_extra(Channel::Torso, now),
            policy.backoff_extra(Channel::Lateral, now),
        );
        let status = build_status_snapshot(
            &snapshot,
            &policy.status(now),
            &preset,
            &instance_id,
            backoff,
            now,
        );
        status_publisher.publish(&status, now, false);

        if args.diagnostics && now - last_diagnostics >= 2.0 {
            last_diagnostics = now;
            if let Some(diag) = &snapshot.diagnostics {
                log::info!(
                    "windows: neck {:.0}%/{:.0}s gap {:.1}s | torso {:.0}%/{:.0}s | lateral {:.0}%/{:.0}s",
                    diag.neck.stats.above_fraction * 100.0,
                    diag.neck.stats.cumulative_above_sec,
                    diag.neck.stats.max_gap_sec,
                    diag.torso.stats.above_fraction * 100.0,
                    diag.torso.stats.cumulative_above_sec,
                    diag.lateral.stats.above_fraction * 100.0,
                    diag.lateral.stats.cumulative_above_sec,
                );
            }
        }

        std::thread::sleep(Duration::from_millis(250));
    }

    log::info!("shutting down");
    let _ = loop_thread.join();
    event_log.close();
    log_writer.join();
    Ok(())
}

fn file_mtime(path: &std::path::Path) -> Option<std::time::SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn run_calibration(
    paths: &StoragePaths,
    duration: f64,
    camera: Option<u32>,
    fps: f64,
) -> Result<()> {
    paths.ensure()?;
    let config = ConfigStore::new(paths.config()).load();

    // Single-instance guard; released on exit even for errors.
    let _lock = deskcoach::supervisor::CalibrationLock::acquire(paths.calibration_lock())?;

    let duration = duration.clamp(15.0, 45.0);
    let camera_index = camera.unwrap_or(config.camera_index);

    let mut source = CameraSession::open(
        camera_index,
        config.performance.camera_width,
        config.performance.camera_height,
    )
    .context("camera open failed")?;
    let mut estimator = estimator::default_backend().unwrap_or_else(|| {
        log::warn!("no landmark backend in this build; calibration will not accept samples");
        Box::new(NullEstimator)
    });

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::Relaxed);
        })
        .context("failed to install signal handler")?;
    }

    let store = BaselineStore::new(paths.baseline());
    let mut publisher = SnapshotPublisher::calibration(paths.calibration_status());
    let routine = CalibrationRoutine::new(CalibrationOptions {
        duration_sec: duration,
        target_fps: fps,
        prep_sec: 3.0,
    });

    println!("Calibrating for {duration:.0}s: sit upright, look at the camera, hold still.");
    let baseline = routine.run(
        &mut source,
        estimator.as_mut(),
        &store,
        &cancel,
        &mut |progress, force| {
            publisher.publish(progress, progress.ts_unix, force);
        },
    )?;

    println!("Calibration complete ({} samples):", baseline.sample_count);
    println!("  neck     {:>7.2} deg", baseline.neck_deg);
    println!("  torso    {:>7.2} deg", baseline.torso_deg);
    println!("  lateral  {:>7.3}", baseline.lateral);
    println!("  shoulder {:>7.3}", baseline.shoulder_width_proxy);
    Ok(())
}

fn show_status(paths: &StoragePaths, json: bool) -> Result<()> {
    let supervisor = ServiceManager::new(paths.clone());
    match supervisor.daemon_status() {
        Some(record) => println!("daemon: running (pid {}, since {})", record.pid, record.started_at),
        None => println!("daemon: not running"),
    }
    if let Some(record) = supervisor.calibration_status() {
        println!("calibration: running (pid {})", record.pid);
    }

    let now = Clock::new().now();
    if let Some(progress) = read_calibration_progress(&paths.calibration_status(), Some(now)) {
        println!(
            "calibration progress: {:?} {:.0}% ({} samples)",
            progress.phase,
            progress.progress * 100.0,
            progress.samples_captured
        );
    }

    match read_status(&paths.status(), now) {
        Some(status) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            println!(
                "state: {} ({:.0}s), confidence {:.2}, {:.1} fps (target {:.0})",
                status.state.as_str(),
                status.time_in_state_sec,
                status.confidence,
                status.fps,
                status.target_fps
            );
            if let Some(metrics) = &status.metrics {
                println!(
                    "metrics: neck {:.1} deg, torso {:.1} deg, lateral {:.3}",
                    metrics.neck_deg, metrics.torso_deg, metrics.lateral
                );
            }
            if let Some(thresholds) = &status.thresholds {
                println!(
                    "thresholds: neck {:.1} deg, torso {:.1} deg, lateral {:.3}",
                    thresholds.neck_abs_deg, thresholds.torso_abs_deg, thresholds.lateral_abs
                );
            }
            let policy = &status.policy;
            println!(
                "policy: cooldown {:.0}s, snooze {:.0}s, backoff {:.0}s, queued {}",
                policy.cooldown_sec_left,
                policy.snooze_sec_left,
                policy.backoff_sec_left,
                policy.dnd_queue_depth
            );
        }
        None => println!("posture status: unknown (daemon not publishing)"),
    }
    Ok(())
}
