//! `sp500 subscribe` / `sp500 subscribers` — manage the subscriber set.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct SubscribeArgs {
    /// Address to notify when the listing changes.
    pub email: String,
}

#[derive(Args, Debug)]
pub struct SubscribersArgs {
    /// Emit a JSON array.
    #[arg(long)]
    pub json: bool,
}

impl SubscribeArgs {
    pub fn run(self) -> Result<()> {
        let components = super::load_components()?;
        let registry = components.pipeline.subscribers().clone();
        let email = self.email;
        let added = super::block_on(async { registry.add(&email).await })?
            .with_context(|| format!("could not subscribe '{}'", email.trim()))?;

        if added {
            println!("{} subscribed {}", "✓".green(), email.trim());
        } else {
            println!("{} {} is already subscribed", "·".yellow(), email.trim());
        }
        Ok(())
    }
}

impl SubscribersArgs {
    pub fn run(self) -> Result<()> {
        let components = super::load_components()?;
        let registry = components.pipeline.subscribers().clone();
        let members = super::block_on(async move { registry.list().await })?
            .context("failed to list subscribers")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&members).context("failed to serialize subscribers")?
            );
            return Ok(());
        }

        if members.is_empty() {
            println!("No subscribers yet.");
            return Ok(());
        }
        for email in &members {
            println!("{email}");
        }
        println!("{}", format!("{} subscriber(s)", members.len()).bright_black());
        Ok(())
    }
}
