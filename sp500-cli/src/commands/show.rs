//! `sp500 show` — print the stored snapshot.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use sp500_core::Snapshot;
use sp500_sync::content_digest;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Emit the snapshot as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct StockRow {
    #[tabled(rename = "ticker")]
    ticker: String,
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "market cap")]
    market_cap: String,
}

impl ShowArgs {
    pub fn run(self) -> Result<()> {
        let components = super::load_components()?;
        let store = components.pipeline.store().clone();
        let snapshot = match super::block_on(async move { store.read().await })? {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_not_found() => {
                bail!("no snapshot stored yet; run `sp500 sync` first")
            }
            Err(err) => return Err(err).context("failed to read snapshot"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&snapshot).context("failed to serialize snapshot")?
            );
            return Ok(());
        }

        print_snapshot(&snapshot, &components.backend);
        Ok(())
    }
}

fn print_snapshot(snapshot: &Snapshot, backend: &str) {
    println!(
        "S&P 500 snapshot | as of {} | {} | digest {}",
        snapshot.as_of.to_string().bold(),
        backend,
        &content_digest(&snapshot.content)[..12],
    );

    if snapshot.stocks.is_empty() {
        println!("{}", snapshot.content);
        return;
    }

    let rows: Vec<StockRow> = snapshot
        .stocks
        .iter()
        .map(|stock| StockRow {
            ticker: stock.ticker.clone(),
            name: stock.name.clone(),
            market_cap: format_market_cap(stock.market_cap),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn format_market_cap(value: f64) -> String {
    const UNITS: [(f64, &str); 3] = [(1.0e12, "T"), (1.0e9, "B"), (1.0e6, "M")];
    UNITS
        .iter()
        .find(|(scale, _)| value.abs() >= *scale)
        .map(|(scale, suffix)| format!("{:.2}{suffix}", value / scale))
        .unwrap_or_else(|| format!("{value:.0}"))
}
