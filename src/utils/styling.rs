//! Terminal styling for the run banner, settings card and step headers

use console::{style, Emoji};
use std::path::Path;

use crate::config::PipelineConfig;
use crate::pipeline::stages::PipelineInputs;

pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "[*] ");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌍 ", ">> ");
pub static THERMOMETER: Emoji<'_, '_> = Emoji("🌡️  ", "");
pub static FOLDER: Emoji<'_, '_> = Emoji("📂 ", "");
pub static LOCK: Emoji<'_, '_> = Emoji("🔒 ", "");
pub static PIN: Emoji<'_, '_> = Emoji("📍 ", "");

pub fn print_banner(version: &str) {
    println!();
    println!(
        "    {}{}",
        GLOBE,
        style("climalink").cyan().bold()
    );
    println!(
        "    {}",
        style("Climate anomalies linked to survey clusters").dim()
    );
    println!("    {}", style(format!("v{}", version)).dim());
    println!("    {}", style("━".repeat(50)).dim());
    println!();
}

/// Print the inputs and key settings of a run
pub fn print_run_card(inputs: &PipelineInputs, config: &PipelineConfig) {
    let line = "─".repeat(54);
    println!("    ┌{}┐", line);
    println!("    │ {:<53}│", style("Run settings").cyan().bold());
    println!("    ├{}┤", line);
    println!("    │  {}Climate:  {:<40}│", THERMOMETER, truncate_path(&inputs.climate, 40));
    if let Some(clusters) = &inputs.clusters {
        println!("    │  {}Clusters: {:<40}│", PIN, truncate_path(clusters, 40));
    }
    println!(
        "    │  {}Public:   {:<40}│",
        FOLDER,
        truncate_path(&config.export.public_dir, 40)
    );
    println!(
        "    │  {}Local:    {:<40}│",
        LOCK,
        truncate_path(&config.export.local_dir, 40)
    );
    println!("    ├{}┤", line);
    println!(
        "    │  Baseline {}-{}, rolling {} months, {}° map cells{:<6}│",
        style(config.baseline.start_year).yellow(),
        style(config.baseline.end_year).yellow(),
        style(config.temporal.rolling_window).yellow(),
        style(config.spatial.resolution).yellow(),
        ""
    );
    println!(
        "    │  Min group size {}, exposure measure {}{:<13}│",
        style(config.export.min_group_size).yellow(),
        style(config.linkage.measure).yellow(),
        ""
    );
    println!("    └{}┘", line);
    println!();
}

pub fn print_step_header(step_num: u8, title: &str) {
    println!();
    println!(
        "    {} {} {}",
        style(format!("STEP {}", step_num)).cyan().bold(),
        style("│").dim(),
        style(title).white().bold()
    );
    println!("    {}", style("─".repeat(50)).dim());
}

pub fn print_info(message: &str) {
    println!("    {} {}", INFO, message);
}

pub fn print_completion(public_dir: &Path) {
    println!();
    println!(
        "    {}{} {}",
        GLOBE,
        style("Linkage complete. Public artifacts in").green().bold(),
        style(public_dir.display()).cyan()
    );
    println!();
}

fn truncate_path(path: &Path, max_len: usize) -> String {
    truncate_string(&path.display().to_string(), max_len)
}

fn truncate_string(s: &str, max_len: usize) -> String {
    let count = s.chars().count();
    if count <= max_len {
        s.to_string()
    } else {
        let tail: String = s.chars().skip(count - max_len + 3).collect();
        format!("...{}", tail)
    }
}
