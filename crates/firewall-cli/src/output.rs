//! Output formatting

use clap::ValueEnum;
use firewall_dataplane::RunReport;
use tabled::{Table, Tabled};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Tabled)]
struct Row {
    #[tabled(rename = "Metric")]
    metric: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

impl Row {
    fn new(metric: &'static str, value: impl ToString) -> Self {
        Self { metric, value: value.to_string() }
    }
}

fn rows(report: &RunReport) -> Vec<Row> {
    let mut rows = vec![
        Row::new("mode", report.mode),
        Row::new("count", report.total_processed),
        Row::new("time (ms)", report.elapsed_ms),
        Row::new("pkts / ms", format!("{:.2}", report.throughput_per_ms())),
        Row::new("admitted", report.admitted),
        Row::new("histogram total", report.histogram_total),
    ];
    if let Some(stats) = &report.pipeline {
        rows.push(Row::new("dispatched", stats.dispatched));
        rows.push(Row::new("dropped", report.dropped));
        rows.push(Row::new("abandoned", report.abandoned));
        rows.push(Row::new("cache hit rate", format!("{:.3}", stats.cache_hit_rate())));
    }
    rows
}

impl OutputFormat {
    pub fn render(&self, report: &RunReport) -> String {
        match self {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Table => Table::new(rows(report)).to_string(),
        }
    }

    pub fn print(&self, report: &RunReport) {
        println!("{}", self.render(report));
    }
}
