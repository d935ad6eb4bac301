//! Process supervisor
//!
//! Coordinates at most one background daemon and at most one calibration
//! process. Each is tracked by a JSON pidfile holding the pid, start time,
//! and command line; a pidfile whose process is gone (or no longer looks
//! like this executable) is reclaimed transparently. Stop is graceful
//! termination with a five second window, then force kill.

use crate::error::CoachError;
use crate::storage::{atomic_write_json, StoragePaths, STORAGE_ROOT_ENV};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, Signal, System};

/// Seconds to wait for graceful termination before force-killing
const STOP_TIMEOUT_SEC: f64 = 5.0;
/// Pause between stop and start during a restart
const RESTART_DELAY_MS: u64 = 300;

/// Contents of `daemon.pid` / `calibration.lock`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidfileRecord {
    pub pid: u32,
    pub started_at: String,
    pub cmdline: Vec<String>,
}

/// Launch configuration persisted to `daemon.meta.json` so restart can
/// reuse the last-known flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonLaunchOptions {
    pub fps: Option<f64>,
    pub camera: Option<u32>,
    pub preset: Option<String>,
    pub perf_mode: Option<String>,
    pub diagnostics: bool,
    pub perf_profile: bool,
    pub dry_run: bool,
    pub no_dnd_check: bool,
    pub cooldowns_off: bool,
}

impl DaemonLaunchOptions {
    /// CLI arguments equivalent to these options
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if let Some(fps) = self.fps {
            args.push("--fps".to_string());
            args.push(format!("{fps}"));
        }
        if let Some(camera) = self.camera {
            args.push("--camera".to_string());
            args.push(format!("{camera}"));
        }
        if let Some(preset) = &self.preset {
            args.push("--preset".to_string());
            args.push(preset.clone());
        }
        if let Some(mode) = &self.perf_mode {
            args.push("--perf-mode".to_string());
            args.push(mode.clone());
        }
        if self.diagnostics {
            args.push("--diagnostics".to_string());
        }
        if self.perf_profile {
            args.push("--perf-profile".to_string());
        }
        if self.dry_run {
            args.push("--dry-run".to_string());
        }
        if self.no_dnd_check {
            args.push("--no-dnd-check".to_string());
        }
        if self.cooldowns_off {
            args.push("--cooldowns".to_string());
            args.push("off".to_string());
        }
        args
    }
}

/// Metadata written next to the pidfile at start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonMeta {
    pub started_at: String,
    pub cmdline: Vec<String>,
    pub options: DaemonLaunchOptions,
}

/// Supervises the daemon and calibration child processes.
pub struct ServiceManager {
    paths: StoragePaths,
}

impl ServiceManager {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    /// Live daemon record, reclaiming a stale pidfile on the way.
    pub fn daemon_status(&self) -> Option<PidfileRecord> {
        self.live_record(&self.paths.daemon_pidfile())
    }

    /// Live calibration record, reclaiming a stale lockfile on the way.
    pub fn calibration_status(&self) -> Option<PidfileRecord> {
        self.live_record(&self.paths.calibration_lock())
    }

    /// Start the background daemon. Idempotent: when one is already
    /// running its PID is returned unchanged.
    pub fn start_daemon(&self, options: &DaemonLaunchOptions) -> Result<u32, CoachError> {
        if let Some(record) = self.daemon_status() {
            log::info!("daemon already running (pid {})", record.pid);
            return Ok(record.pid);
        }

        self.paths.ensure()?;
        let exe = std::env::current_exe()?;
        let args = options.to_args();
        let log_file = fs::File::create(self.paths.daemon_log())?;
        let err_file = log_file.try_clone()?;

        let child = Command::new(&exe)
            .args(&args)
            .env(STORAGE_ROOT_ENV, self.paths.root())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(err_file))
            .spawn()
            .map_err(|err| CoachError::SupervisorError(format!("spawn failed: {err}")))?;

        let pid = child.id();
        let started_at = Utc::now().to_rfc3339();
        let mut cmdline = vec![exe.to_string_lossy().to_string()];
        cmdline.extend(args);

        atomic_write_json(
            &self.paths.daemon_pidfile(),
            &PidfileRecord {
                pid,
                started_at: started_at.clone(),
                cmdline: cmdline.clone(),
            },
        )?;
        atomic_write_json(
            &self.paths.daemon_meta(),
            &DaemonMeta {
                started_at,
                cmdline,
                options: options.clone(),
            },
        )?;

        log::info!("daemon started (pid {pid})");
        Ok(pid)
    }

    /// Stop the daemon: graceful signal, 5 s wait, force kill. Stopping a
    /// non-running daemon is a no-op success.
    pub fn stop_daemon(&self) -> Result<(), CoachError> {
        self.stop_process(&self.paths.daemon_pidfile(), "daemon")
    }

    /// Stop a running calibration child, if any.
    pub fn stop_calibration(&self) -> Result<(), CoachError> {
        self.stop_process(&self.paths.calibration_lock(), "calibration")
    }

    /// Restart with the last-known configuration from the meta file.
    pub fn restart_daemon(&self) -> Result<u32, CoachError> {
        let options = self.last_options().unwrap_or_default();
        self.stop_daemon()?;
        std::thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
        self.start_daemon(&options)
    }

    /// Spawn calibration as a detached child. The child acquires the
    /// calibration lock itself, so a concurrent run fails fast there.
    pub fn start_calibration(&self, duration_sec: f64) -> Result<u32, CoachError> {
        if let Some(record) = self.calibration_status() {
            return Err(CoachError::CalibrationInProgress(record.pid));
        }
        self.paths.ensure()?;
        let exe = std::env::current_exe()?;
        let child = Command::new(&exe)
            .args(["calibrate", "--duration", &format!("{duration_sec}")])
            .env(STORAGE_ROOT_ENV, self.paths.root())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| CoachError::SupervisorError(format!("spawn failed: {err}")))?;
        Ok(child.id())
    }

    /// Tail of the captured daemon stdout/stderr
    pub fn daemon_log_tail(&self, lines: usize) -> String {
        match fs::read_to_string(self.paths.daemon_log()) {
            Ok(contents) => {
                let all: Vec<&str> = contents.lines().collect();
                let start = all.len().saturating_sub(lines);
                all[start..].join("\n")
            }
            Err(_) => "no daemon log available".to_string(),
        }
    }

    pub fn last_options(&self) -> Option<DaemonLaunchOptions> {
        let contents = fs::read_to_string(self.paths.daemon_meta()).ok()?;
        let meta: DaemonMeta = serde_json::from_str(&contents).ok()?;
        Some(meta.options)
    }

    fn live_record(&self, pidfile: &Path) -> Option<PidfileRecord> {
        let record = read_pidfile(pidfile)?;
        if process_alive(record.pid) {
            Some(record)
        } else {
            // Stale: the process is gone or is not ours anymore.
            let _ = fs::remove_file(pidfile);
            None
        }
    }

    fn stop_process(&self, pidfile: &Path, label: &str) -> Result<(), CoachError> {
        let record = match self.live_record(pidfile) {
            Some(record) => record,
            None => {
                log::info!("{label} not running");
                return Ok(());
            }
        };

        log::info!("stopping {label} (pid {})", record.pid);
        let mut system = process_table();
        let pid = Pid::from_u32(record.pid);

        if let Some(process) = system.process(pid) {
            // Graceful first; fall back to a hard kill when the platform
            // has no termination signal.
            if process.kill_with(Signal::Term).is_none() {
                process.kill();
            }
        }

        let deadline = std::time::Instant::now() + Duration::from_secs_f64(STOP_TIMEOUT_SEC);
        loop {
            std::thread::sleep(Duration::from_millis(100));
            system.refresh_processes();
            if system.process(pid).is_none() {
                break;
            }
            if std::time::Instant::now() >= deadline {
                log::warn!("{label} did not exit in {STOP_TIMEOUT_SEC}s; force killing");
                if let Some(process) = system.process(pid) {
                    process.kill();
                }
                std::thread::sleep(Duration::from_millis(200));
                break;
            }
        }

        let _ = fs::remove_file(pidfile);
        log::info!("{label} stopped");
        Ok(())
    }
}

/// In-process guard for the calibration single-instance lock.
///
/// Acquired by the process actually running the routine; released on drop.
pub struct CalibrationLock {
    path: std::path::PathBuf,
}

impl CalibrationLock {
    pub fn acquire(path: impl Into<std::path::PathBuf>) -> Result<Self, CoachError> {
        let path = path.into();
        if let Some(record) = read_pidfile(&path) {
            if process_alive(record.pid) {
                return Err(CoachError::CalibrationInProgress(record.pid));
            }
            // Stale lock from a dead process: reclaim.
            let _ = fs::remove_file(&path);
        }
        atomic_write_json(
            &path,
            &PidfileRecord {
                pid: std::process::id(),
                started_at: Utc::now().to_rfc3339(),
                cmdline: std::env::args().collect(),
            },
        )?;
        Ok(Self { path })
    }
}

impl Drop for CalibrationLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_pidfile(path: &Path) -> Option<PidfileRecord> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn process_table() -> System {
    System::new_with_specifics(
        RefreshKind::new().with_processes(ProcessRefreshKind::new()),
    )
}

/// Whether `pid` names a live process that plausibly belongs to us.
fn process_alive(pid: u32) -> bool {
    let system = process_table();
    match system.process(Pid::from_u32(pid)) {
        Some(process) => {
            let name = process.name().to_ascii_lowercase();
            // Where the name is checkable, require it to look like this
            // executable; an unrelated process that recycled the PID does
            // not count.
            name.is_empty() || name.contains("deskcoach")
        }
        None => false,
    }
}
