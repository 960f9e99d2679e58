//! climalink: climate and survey linkage CLI
//!
//! Runs the climate stage, the optional survey stage and the export gate,
//! printing a summary of what was written.

use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;

use climalink::cli::{Cli, Commands};
use climalink::config::PipelineConfig;
use climalink::logging::init_logging;
use climalink::pipeline::linkage::ExclusionReason;
use climalink::pipeline::stages::{run_pipeline_with, ClimateSummary, StageObserver, Step, SurveyStage};
use climalink::report::gate::ExportManifest;
use climalink::report::RunSummary;
use climalink::utils::progress::StageSpinner;
use climalink::utils::styling::{
    print_banner, print_completion, print_info, print_run_card, print_step_header,
};

/// Step headers and spinners on the terminal
struct TerminalProgress {
    quiet: bool,
    step: u8,
    spinner: Option<StageSpinner>,
}

impl TerminalProgress {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            step: 0,
            spinner: None,
        }
    }
}

impl StageObserver for TerminalProgress {
    fn step_started(&mut self, step: Step) {
        self.step += 1;
        let (title, message) = match step {
            Step::Climate => ("Climate baseline and anomalies", "Ingesting grid and computing anomalies..."),
            Step::Survey => ("Cluster linkage and aggregation", "Linking clusters to grid cells..."),
            Step::Export => ("De-identified export", "Checking and writing public tables..."),
        };
        if !self.quiet {
            print_step_header(self.step, title);
        }
        self.spinner = Some(StageSpinner::start(message, self.quiet));
    }

    fn climate_finished(&mut self, summary: &ClimateSummary) {
        let Some(spinner) = self.spinner.take() else {
            return;
        };
        if summary.insufficient_baseline > 0 {
            spinner.warn(&format!(
                "Climate tables ready, {} location-months without a baseline",
                summary.insufficient_baseline
            ));
        } else {
            spinner.succeed("Climate tables ready");
        }
    }

    fn survey_finished(&mut self, stage: &SurveyStage) {
        if let Some(spinner) = self.spinner.take() {
            spinner.succeed(&format!("{} clusters linked", stage.summary.clusters_linked));
        }
        if self.quiet {
            return;
        }
        for (reason, count) in stage.linkage.exclusion_counts() {
            let label = match reason {
                ExclusionReason::OutOfDomain => "clusters outside grid coverage",
                _ => "exposures excluded",
            };
            print_info(&format!("{} {} ({})", style(count).yellow().bold(), label, reason));
        }
    }

    fn export_finished(&mut self, manifest: &ExportManifest) {
        if let Some(spinner) = self.spinner.take() {
            spinner.succeed(&format!("{} public tables passed the export gate", manifest.tables.len()));
        }
    }

    fn step_failed(&mut self, _step: Step) {
        if let Some(spinner) = self.spinner.take() {
            spinner.abandon();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.quiet { "warn" } else { "info" })?;

    if let Some(command) = &cli.command {
        return match command {
            Commands::InitConfig { output } => {
                let json = serde_json::to_string_pretty(&PipelineConfig::with_default_panels())?;
                fs::write(output, json)
                    .with_context(|| format!("Failed to write config file: {}", output.display()))?;
                println!("Wrote default configuration to {}", output.display());
                Ok(())
            }
        };
    }

    let inputs = cli.inputs().ok_or_else(|| {
        anyhow::anyhow!("Climate extract is required. Use --climate to specify a file.")
    })?;
    let config = cli.resolve_config()?;

    if !cli.quiet {
        print_banner(env!("CARGO_PKG_VERSION"));
        print_run_card(&inputs, &config);
    }

    let mut progress = TerminalProgress::new(cli.quiet);
    let report = run_pipeline_with(&inputs, &config, &mut progress)?;

    if !cli.quiet {
        RunSummary::new(report.climate, report.survey, &report.manifest).display();
        print_completion(&config.export.public_dir);
    }

    Ok(())
}
