//! Stage spinners using indicatif

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Spinner shown while one pipeline stage runs
pub struct StageSpinner {
    bar: ProgressBar,
    started: Instant,
}

impl StageSpinner {
    /// Start a spinner; hidden when `quiet` is set
    pub fn start(message: &str, quiet: bool) -> Self {
        let bar = ProgressBar::new_spinner();
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) = ProgressStyle::default_spinner().template("    {spinner:.cyan} {msg} {elapsed:.dim}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ "));
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// Stop with a success line including the elapsed time
    pub fn succeed(self, message: &str) {
        let elapsed = self.started.elapsed().as_secs_f64();
        self.bar
            .finish_with_message(format!("✅ {} ({:.1}s)", message, elapsed));
    }

    /// Stop with a warning line
    pub fn warn(self, message: &str) {
        self.bar.finish_with_message(format!("⚠️  {}", message));
    }

    /// Remove the spinner without a message (used on error)
    pub fn abandon(self) {
        self.bar.finish_and_clear();
    }
}
