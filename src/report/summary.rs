//! Run summary table

use comfy_table::{presets::UTF8_FULL_CONDENSED, Attribute, Cell, Color, Table};
use console::style;

use crate::pipeline::stages::{ClimateSummary, SurveySummary};
use crate::report::gate::ExportManifest;

/// Counts shown at the end of a run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub climate: ClimateSummary,
    pub survey: Option<SurveySummary>,
    /// (table, rows) of every public artifact
    pub public_tables: Vec<(String, usize)>,
}

impl RunSummary {
    pub fn new(climate: ClimateSummary, survey: Option<SurveySummary>, manifest: &ExportManifest) -> Self {
        Self {
            climate,
            survey,
            public_tables: manifest.tables.iter().map(|t| (t.name.clone(), t.rows)).collect(),
        }
    }

    fn count_cell(value: usize, warn_if_nonzero: bool) -> Cell {
        let color = if warn_if_nonzero && value > 0 {
            Color::Yellow
        } else {
            Color::White
        };
        Cell::new(value).fg(color)
    }

    /// Build the metric table
    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_header(vec![
            Cell::new("Metric").add_attribute(Attribute::Bold),
            Cell::new("Value").add_attribute(Attribute::Bold),
        ]);

        table.add_row(vec![Cell::new("🌐 Grid locations"), Cell::new(self.climate.locations)]);
        table.add_row(vec![Cell::new("📅 Months"), Cell::new(self.climate.months)]);
        table.add_row(vec![
            Cell::new("⚠️  Undefined baselines"),
            Self::count_cell(self.climate.insufficient_baseline, true),
        ]);
        table.add_row(vec![
            Cell::new("💾 Climate cache"),
            Cell::new(if self.climate.cache_hit { "hit" } else { "computed" }),
        ]);

        if let Some(survey) = &self.survey {
            table.add_row(vec![Cell::new("📍 Clusters linked"), Cell::new(survey.clusters_linked)]);
            table.add_row(vec![
                Cell::new("🚫 Clusters outside study countries"),
                Self::count_cell(survey.clusters_filtered, false),
            ]);
            table.add_row(vec![Cell::new("🧒 Children read"), Cell::new(survey.children_read)]);
            table.add_row(vec![Cell::new("🔗 Exposures"), Cell::new(survey.exposures)]);
            table.add_row(vec![
                Cell::new("📝 Exclusions"),
                Self::count_cell(survey.exclusions, true),
            ]);
            table.add_row(vec![
                Cell::new("🔒 Suppressed rows"),
                Self::count_cell(survey.suppressed_rows, true),
            ]);
        }

        table.add_row(vec![
            Cell::new("✅ Public tables"),
            Cell::new(self.public_tables.len())
                .fg(Color::Green)
                .add_attribute(Attribute::Bold),
        ]);
        table
    }

    pub fn display(&self) {
        println!();
        println!(
            "    {} {}",
            style("📋").cyan(),
            style("RUN SUMMARY").white().bold()
        );
        println!("    {}", style("─".repeat(50)).dim());
        println!();

        for line in self.table().to_string().lines() {
            println!("    {}", line);
        }

        if !self.public_tables.is_empty() {
            println!();
            for (name, rows) in &self.public_tables {
                println!(
                    "      {} {} {}",
                    style("•").dim(),
                    name,
                    style(format!("({} rows)", rows)).dim()
                );
            }
        }
    }
}
