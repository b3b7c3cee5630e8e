use colored::Colorize;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

use crate::report::{GenerationSummary, Stage};

pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

pub fn print_summary(summary: &GenerationSummary, out: &Path, bytes: u64) {
    println!("\n=== REPORT ===");
    println!("{}  {}", "[SAVED]".green().bold(), out.display());
    println!("{}  {}", "[SIZE]".cyan().bold(), format_size(bytes, DECIMAL));
    println!(
        "{}  {} section(s), {} test(s), {} completion call(s)",
        "[CONTENT]".cyan().bold(),
        summary.sections,
        summary.tests,
        summary.completion_calls
    );
    println!(
        "{}  {} token(s) in {} paragraph(s), {} rebuilt across runs",
        "[FILLED]".cyan().bold(),
        summary.substitution.replacements,
        summary.substitution.paragraphs_touched,
        summary.substitution.paragraphs_rebuilt
    );
    if summary.stages.contains(&Stage::ParagraphsSkipped) {
        println!("{}  no section bullets supplied; no section paragraphs generated", "[NOTE]".yellow().bold());
    }
    if let Some(dir) = &summary.exchanges_dir {
        println!("{}  {}", "[EXCHANGES]".dimmed(), dir.display());
    }
    println!();
}

pub fn print_session(id: &str) {
    println!("{}  {}", "[SESSION]".magenta().bold(), id);
}

pub fn print_waiting(message: &str) {
    println!("{}  {}", "[WAITING]".yellow().bold(), message);
}
