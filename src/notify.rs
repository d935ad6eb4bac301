//! Notification sink and DND probe capabilities
//!
//! The policy talks to the OS through two small interfaces so the real
//! notifier can be swapped for a dry-run recorder: `NotificationSink`
//! delivers a nudge with optional action labels (never blocking on user
//! interaction) and `DndProbe` answers whether Do Not Disturb is active.
//! Action callbacks, where the platform supports them, arrive
//! asynchronously through the action drop file and are fed back to the
//! policy as user-action events.

use crate::error::CoachError;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Delivers nudges to the user.
pub trait NotificationSink: Send {
    /// Post a notification with optional action labels. Returns as soon
    /// as delivery is handed off; must never wait for the user to
    /// interact. Responses to the actions arrive asynchronously as
    /// user-action events.
    fn notify(&mut self, title: &str, message: &str, actions: &[&str])
        -> Result<(), CoachError>;
}

/// Answers whether the OS Do Not Disturb / Focus mode is active.
pub trait DndProbe: Send {
    fn is_dnd_active(&mut self) -> bool;
}

/// Real OS notifier: fire-and-forget child process.
///
/// Uses `notify-send` on Linux and `terminal-notifier` (falling back to
/// `osascript`) on macOS. The child is spawned detached; its exit status is
/// never awaited, so a slow notification daemon cannot stall the sampler.
pub struct CommandNotifier {
    app_name: String,
}

impl CommandNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    fn spawn(&self, mut command: Command) -> Result<(), CoachError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_| ())
            .map_err(|err| CoachError::NotificationError(err.to_string()))
    }
}

impl NotificationSink for CommandNotifier {
    #[cfg(target_os = "macos")]
    fn notify(&mut self, title: &str, message: &str, actions: &[&str]) -> Result<(), CoachError> {
        let mut command = Command::new("terminal-notifier");
        command
            .arg("-title")
            .arg(title)
            .arg("-message")
            .arg(message)
            .arg("-group")
            .arg(&self.app_name);
        if !actions.is_empty() {
            command.arg("-actions").arg(actions.join(","));
        }
        if self.spawn(command).is_ok() {
            return Ok(());
        }
        // osascript fallback has no action buttons
        let script = format!(
            "display notification \"{}\" with title \"{}\"",
            message.replace('"', "'"),
            title.replace('"', "'")
        );
        let mut fallback = Command::new("osascript");
        fallback.arg("-e").arg(script);
        self.spawn(fallback)
    }

    #[cfg(not(target_os = "macos"))]
    fn notify(&mut self, title: &str, message: &str, actions: &[&str]) -> Result<(), CoachError> {
        let mut command = Command::new("notify-send");
        command
            .arg("--app-name")
            .arg(&self.app_name)
            .arg(title)
            .arg(message);
        for action in actions {
            command.arg(format!("--action={action}"));
        }
        self.spawn(command)
    }
}

/// Dry-run sink: records what would have been posted and logs it.
#[derive(Default)]
pub struct DryRunNotifier {
    pub posted: Vec<(String, String)>,
}

impl NotificationSink for DryRunNotifier {
    fn notify(&mut self, title: &str, message: &str, actions: &[&str]) -> Result<(), CoachError> {
        log::info!("dry-run nudge: {title}: {message} (actions: {})", actions.join("/"));
        self.posted.push((title.to_string(), message.to_string()));
        Ok(())
    }
}

/// Queries the OS DND state via a platform command.
///
/// Any failure is treated as "DND off" and logged once, so a broken probe
/// degrades to delivering nudges rather than silently swallowing them.
pub struct CommandDndProbe {
    warned: bool,
}

impl Default for CommandDndProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDndProbe {
    pub fn new() -> Self {
        Self { warned: false }
    }

    #[cfg(target_os = "macos")]
    fn query(&self) -> Result<bool, CoachError> {
        let output = Command::new("defaults")
            .args(["read", "com.apple.notificationcenterui", "doNotDisturb"])
            .output()
            .map_err(|err| CoachError::NotificationError(err.to_string()))?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "1")
    }

    #[cfg(not(target_os = "macos"))]
    fn query(&self) -> Result<bool, CoachError> {
        let output = Command::new("gsettings")
            .args([
                "get",
                "org.gnome.desktop.notifications",
                "show-banners",
            ])
            .output()
            .map_err(|err| CoachError::NotificationError(err.to_string()))?;
        // show-banners false means DND is on
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "false")
    }
}

impl DndProbe for CommandDndProbe {
    fn is_dnd_active(&mut self) -> bool {
        match self.query() {
            Ok(active) => active,
            Err(err) => {
                if !self.warned {
                    log::warn!("DND query failed ({err}); assuming DND off");
                    self.warned = true;
                }
                false
            }
        }
    }
}

/// Probe that always reports DND off; used with `--no-dnd-check`.
pub struct NoDndProbe;

impl DndProbe for NoDndProbe {
    fn is_dnd_active(&mut self) -> bool {
        false
    }
}

/// Test probe backed by a shared flag.
pub struct SharedFlagDndProbe {
    flag: Arc<AtomicBool>,
}

impl SharedFlagDndProbe {
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        Self { flag }
    }
}

impl DndProbe for SharedFlagDndProbe {
    fn is_dnd_active(&mut self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_records_without_side_effects() {
        let mut sink = DryRunNotifier::default();
        sink.notify(
            "Posture Check: Slouching",
            "Neck 19.5° > 16.4°",
            &["Done", "Snooze", "Dismiss"],
        )
        .unwrap();
        assert_eq!(sink.posted.len(), 1);
        assert_eq!(sink.posted[0].0, "Posture Check: Slouching");
    }

    #[test]
    fn test_no_dnd_probe_is_always_off() {
        assert!(!NoDndProbe.is_dnd_active());
    }

    #[test]
    fn test_shared_flag_probe_follows_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut probe = SharedFlagDndProbe::new(Arc::clone(&flag));
        assert!(!probe.is_dnd_active());
        flag.store(true, Ordering::Relaxed);
        assert!(probe.is_dnd_active());
    }
}
