//! Terminal and JSON rendering of backtest results.

use crate::backtest::BacktestResult;
use crate::error::Result;
use colored::Colorize;
use tabled::builder::Builder;
use tabled::settings::Style;

/// Pretty-printer for a finished run.
pub struct ResultFormatter<'a> {
    result: &'a BacktestResult,
}

impl<'a> ResultFormatter<'a> {
    pub fn new(result: &'a BacktestResult) -> Self {
        Self { result }
    }

    /// Print the full report to stdout.
    pub fn print_report(&self) {
        println!();
        println!("{}", "=== Backtest Report ===".bold());
        println!(
            "experiment {}  config {}",
            self.result.experiment_id.to_string().dimmed(),
            self.result.config_hash[..12].to_string().dimmed()
        );
        println!(
            "{} funds, {} to {}, {} / {}",
            self.result.config.fund_pool.len(),
            self.result.config.start_date,
            self.result.config.end_date,
            self.result.config.method,
            self.result.config.rebalance_frequency
        );

        self.print_performance();
        self.print_weights();
        self.print_risk();
        if !self.result.trades.is_empty() {
            println!();
            println!("{}", "Trades".bold());
            println!("{}", self.render_trades());
        }
    }

    fn print_performance(&self) {
        if self.result.performance.is_empty() {
            println!("{}", "no performance metrics available".yellow());
            return;
        }
        println!();
        println!("{}", "Performance".bold());
        for (name, value) in self.result.performance.iter() {
            let rendered = format!("{:>10.2}", value);
            let colored_value = if *value > 0.0 {
                rendered.green()
            } else if *value < 0.0 {
                rendered.red()
            } else {
                rendered.normal()
            };
            println!("  {:<22} {}", name, colored_value);
        }
    }

    fn print_weights(&self) {
        if self.result.weights.is_empty() {
            return;
        }
        println!();
        println!("{}", "Final target weights".bold());
        for (code, weight) in &self.result.weights {
            println!("  {:<12} {:>7.2}%", code, weight * 100.0);
        }
    }

    fn print_risk(&self) {
        let Some(risk) = &self.result.risk else {
            return;
        };
        println!();
        println!("{}", "Risk".bold());
        if let Some(var) = risk.var_95 {
            println!("  {:<22} {:>9.2}%", "var_95 (1d)", var * 100.0);
        }
        if let Some(cvar) = risk.cvar_95 {
            println!("  {:<22} {:>9.2}%", "cvar_95 (1d)", cvar * 100.0);
        }
        if let Some(tail) = risk.tail_risk {
            println!("  {:<22} {:>10.2}", "tail_risk", tail);
        }
        for (code, contribution) in &risk.risk_contribution {
            println!("  {:<22} {:>9.2}%", format!("rc {}", code), contribution);
        }
    }

    /// The trade log as a rounded-border table.
    pub fn render_trades(&self) -> String {
        let mut builder = Builder::default();
        builder.push_record(["Date", "Fund", "Side", "Units", "Price", "Cost"]);
        for trade in &self.result.trades {
            builder.push_record([
                trade.date.to_string(),
                trade.code.clone(),
                if trade.is_buy() { "BUY" } else { "SELL" }.to_string(),
                format!("{:.2}", trade.units.abs()),
                format!("{:.4}", trade.price),
                format!("{:.2}", trade.cost),
            ]);
        }
        builder.build().with(Style::rounded()).to_string()
    }

    /// The full result as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self.result)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestEngine, SimulationConfig};
    use crate::types::NavRecord;
    use chrono::{Datelike, Duration, NaiveDate};

    fn completed_result() -> BacktestResult {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let mut dates = Vec::new();
        let mut cur = start;
        while cur <= end {
            if cur.weekday().num_days_from_monday() < 5 {
                dates.push(cur);
            }
            cur += Duration::days(1);
        }

        let config = SimulationConfig {
            fund_pool: vec!["A".to_string(), "B".to_string()],
            start_date: start,
            end_date: end,
            ..SimulationConfig::default()
        };
        let mut engine = BacktestEngine::new(config).unwrap();
        for (code, amp, freq) in [("A", 0.008, 0.7), ("B", 0.003, 1.9)] {
            let mut nav = 1.0;
            let records: Vec<NavRecord> = dates
                .iter()
                .enumerate()
                .map(|(i, d)| {
                    nav *= 1.0 + 0.0003 + amp * ((i as f64) * freq).sin();
                    NavRecord::new(*d, nav, nav)
                })
                .collect();
            engine.add_nav_series(code, records);
        }
        engine.set_calendar(dates);
        engine.run().unwrap()
    }

    #[test]
    fn test_trade_table_renders() {
        let result = completed_result();
        let formatter = ResultFormatter::new(&result);
        let table = formatter.render_trades();

        assert!(table.contains("Fund"));
        assert!(table.contains("BUY"));
    }

    #[test]
    fn test_json_export_round_trips() {
        let result = completed_result();
        let json = ResultFormatter::new(&result).to_json().unwrap();

        assert!(json.contains("performance"));
        assert!(json.contains("nav_curve"));
        let parsed: BacktestResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.config_hash, result.config_hash);
    }
}
