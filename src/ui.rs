//! Terminal feedback for interactive runs

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub enum StyleType {
    Success,
    Count,
    Error,
    Subtle,
}

/// Applies a consistent style to a string.
pub fn style_text(text: &str, style_type: StyleType) -> String {
    let styled = match style_type {
        StyleType::Success => style(text).green().bold(),
        StyleType::Count => style(text).bold(),
        StyleType::Error => style(text).red(),
        StyleType::Subtle => style(text).dim(),
    };
    styled.to_string()
}

/// A ticking spinner on stderr.
pub fn new_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        spinner.set_style(template);
    }
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// One-line summary of a finished run.
pub fn summary_line(written: usize, fetched: usize, kept: usize, destination: &str) -> String {
    format!(
        "{} {} price directives written to {} {}",
        style_text("✔", StyleType::Success),
        style_text(&written.to_string(), StyleType::Count),
        destination,
        style_text(
            &format!("({fetched} fetched, {kept} kept from database)"),
            StyleType::Subtle
        ),
    )
}
