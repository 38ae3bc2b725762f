//! Progress display for interactive runs.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Set to any non-empty value to hide spinners.
pub const QUIET_ENV: &str = "COVER_BOOST_QUIET";

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ";

pub fn is_quiet_mode() -> bool {
    std::env::var_os(QUIET_ENV).is_some_and(|v| !v.is_empty())
}

pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();

    if is_quiet_mode() {
        spinner.set_draw_target(ProgressDrawTarget::hidden());
        return spinner;
    }

    match ProgressStyle::default_spinner().template("{spinner:.green} {msg} ({elapsed})") {
        Ok(style) => spinner.set_style(style.tick_chars(SPINNER_CHARS)),
        Err(e) => tracing::debug!(error = %e, "Falling back to default spinner style"),
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 3600 {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
