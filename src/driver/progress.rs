//! Spinner drawn on stderr while an external tool is silent.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::time::Instant;

use crate::config::{ProgressSettings, SpinnerStyle};

use super::command::truncate;

const BRAILLE_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", " "];
const ASCII_FRAMES: &[&str] = &["|", "/", "-", "\\", " "];

/// Longest message shown next to the spinner.
const MAX_MESSAGE_CHARS: usize = 72;

/// Frames for a style; the last entry is drawn once finished.
const fn frames(style: SpinnerStyle) -> &'static [&'static str] {
    match style {
        SpinnerStyle::Braille => BRAILLE_FRAMES,
        SpinnerStyle::Ascii => ASCII_FRAMES,
    }
}

/// A spinner that appears after `idle` of silence and disappears on the
/// next sign of activity.
pub struct IdleSpinner {
    settings: ProgressSettings,
    message: String,
    started: Instant,
    last_activity: Instant,
    bar: Option<ProgressBar>,
}

impl IdleSpinner {
    /// Creates a hidden spinner; the idle clock starts now.
    #[must_use]
    pub fn new(settings: ProgressSettings, message: &str) -> Self {
        let now = Instant::now();
        Self {
            settings,
            message: truncate(message, MAX_MESSAGE_CHARS),
            started: now,
            last_activity: now,
            bar: None,
        }
    }

    /// Returns true while the spinner is drawn.
    #[must_use]
    pub const fn is_visible(&self) -> bool {
        self.bar.is_some()
    }

    /// Waits out the idle period and shows the spinner. Never resolves while
    /// disabled or already visible.
    pub async fn wait(&mut self) {
        if !self.settings.enabled || self.bar.is_some() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep_until(self.last_activity + self.settings.idle).await;
        self.show();
    }

    /// Hides the spinner and restarts the idle clock.
    pub fn activity(&mut self) {
        self.clear();
        self.last_activity = Instant::now();
    }

    fn show(&mut self) {
        let style = ProgressStyle::with_template("{spinner} {msg}  {elapsed}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(frames(self.settings.style));
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr())
            .with_style(style)
            .with_message(self.message.clone())
            .with_elapsed(self.started.elapsed());
        bar.enable_steady_tick(self.settings.interval);
        self.bar = Some(bar);
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl std::fmt::Debug for IdleSpinner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleSpinner")
            .field("message", &self.message)
            .field("visible", &self.is_visible())
            .finish_non_exhaustive()
    }
}

impl Drop for IdleSpinner {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings(enabled: bool) -> ProgressSettings {
        ProgressSettings {
            enabled,
            idle: Duration::from_millis(50),
            style: SpinnerStyle::Braille,
            interval: ProgressSettings::MIN_INTERVAL,
        }
    }

    #[tokio::test]
    async fn test_spinner_appears_after_silence() {
        let started = Instant::now();
        let mut spinner = IdleSpinner::new(settings(true), "gcloud builds submit");
        assert!(!spinner.is_visible());

        spinner.wait().await;
        assert!(spinner.is_visible());
        assert!(started.elapsed() >= Duration::from_millis(50));

        spinner.activity();
        assert!(!spinner.is_visible());
    }

    #[tokio::test]
    async fn test_visible_spinner_does_not_wake_again() {
        let mut spinner = IdleSpinner::new(settings(true), "docker push");
        spinner.wait().await;
        let again = tokio::time::timeout(Duration::from_millis(100), spinner.wait()).await;
        assert!(again.is_err());
        assert!(spinner.is_visible());
    }

    #[tokio::test]
    async fn test_disabled_spinner_never_shows() {
        let mut spinner = IdleSpinner::new(settings(false), "firebase deploy");
        let waited = tokio::time::timeout(Duration::from_millis(150), spinner.wait()).await;
        assert!(waited.is_err());
        assert!(!spinner.is_visible());
    }

    #[test]
    fn test_long_messages_are_shortened() {
        let spinner = IdleSpinner::new(settings(true), &"x".repeat(100));
        assert_eq!(spinner.message.chars().count(), MAX_MESSAGE_CHARS + 1);
        assert!(spinner.message.ends_with('…'));
        assert_eq!(frames(SpinnerStyle::Ascii)[0], "|");
    }
}
