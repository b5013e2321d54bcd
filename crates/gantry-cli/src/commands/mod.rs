pub mod completions;
pub mod doctor;
pub mod run;
pub mod validate;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STAGE_FAILURE: u8 = 3;
pub const EXIT_CANCELLED: u8 = 130;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn spin_skip(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("- {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "succeeded" => Style::new().green().apply_to(status).to_string(),
        "running" => Style::new().cyan().bold().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        "skipped" => Style::new().dim().apply_to(status).to_string(),
        "cancelled" => Style::new().yellow().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}
