pub mod waterfall;

use crate::engine::Presenter;
use crate::error::EngineError;
use crate::signals::MetricResult;
use crate::signals::catalog::with_thousands;

/// Prints each signal's row as it resolves and redraws the waterfall once
/// the run completes. Holds no state beyond the last snapshot it was handed.
pub struct ConsolePresenter {
    graph_width: usize,
    results: Vec<MetricResult>,
}

impl ConsolePresenter {
    pub fn new(graph_width: usize) -> Self {
        Self {
            graph_width,
            results: Vec::new(),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn on_metric_resolved(&mut self, results: &[MetricResult], total: f64) {
        // A suppressed resolution leaves the sequence unchanged; only new
        // arrivals get a row.
        if results.len() > self.results.len() {
            if let Some(last) = results.last() {
                println!(
                    "  {:<13}  {:<58}  {:>8}   running total {}",
                    last.name,
                    last.formatted,
                    format_delta(last.delta),
                    format_total(total)
                );
            }
        }
        self.results = results.to_vec();
    }

    fn on_metric_failed(&mut self, name: &'static str, error: &EngineError) {
        println!("  {name:<13}  (failed: {error})");
    }

    fn on_run_complete(&mut self) {
        let chart = waterfall::layout(&self.results);
        if !chart.segments.is_empty() {
            println!();
            print!("{}", waterfall::render(&chart, self.graph_width));
        }
    }
}

/// Signed, two-decimal rendering of a delta; gains carry an explicit `+`.
pub fn format_delta(delta: f64) -> String {
    let sign = if delta < 0.0 { "" } else { "+" };
    format!("{sign}{delta:.2}")
}

/// One-decimal total with thousands separators.
pub fn format_total(total: f64) -> String {
    with_thousands(&format!("{total:.1}"))
}
