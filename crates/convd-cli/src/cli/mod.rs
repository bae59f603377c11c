//! Operator CLI over the convd task and credit store.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use convd_core::config::ConvdConfig;
use convd_core::task_db::TaskDb;

use commands::{run_balance, run_grant, run_purge, run_status};

/// Top-level CLI for convd.
#[derive(Debug, Parser)]
#[command(name = "convd")]
#[command(about = "convd: conversion job dispatcher (tasks, credits, entitlements)", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Show stored tasks, newest first.
    Status {
        /// Only tasks of this user.
        #[arg(long, value_name = "USER")]
        owner: Option<i64>,
    },

    /// Show a user's credit balance (applies a pending daily reset).
    Balance {
        /// User identifier.
        user: i64,
    },

    /// Grant or extend an unlimited plan.
    Grant {
        /// User identifier.
        user: i64,
        /// Length of the grant in days.
        #[arg(long, default_value = "30", value_name = "N")]
        days: u64,
    },

    /// Delete tasks whose retention has expired.
    Purge,
}

impl CliCommand {
    pub async fn run_from_args(cfg: ConvdConfig) -> Result<()> {
        let cli = Cli::parse();
        tracing::debug!("loaded config: {:?}", cfg);
        let db = TaskDb::open_default()
            .await?
            .with_task_ttl(cfg.task_ttl_secs);

        match cli.command {
            CliCommand::Status { owner } => run_status(&db, owner).await?,
            CliCommand::Balance { user } => run_balance(&db, &cfg, user).await?,
            CliCommand::Grant { user, days } => run_grant(&db, &cfg, user, days).await?,
            CliCommand::Purge => run_purge(&db).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
