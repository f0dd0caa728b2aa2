// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Run a propagation over a fixture-seeded in-memory store.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use propagation_core::application::{PropagationRunner, RolePropagationService};
use propagation_core::domain::events::PropagationEvent;
use propagation_core::domain::propagation_config::PropagationConfigManifest;
use propagation_core::domain::task_result::{CompletionStatus, MessageKind, TaskResult};
use propagation_core::infrastructure::fixture::{Fixture, SeededStore};
use propagation_core::infrastructure::request_queue::InMemoryRequestQueue;
use propagation_core::infrastructure::EventBus;

#[derive(Args)]
pub struct RunCommand {
    /// YAML fixture with roles, identities and pending events
    #[arg(long, value_name = "FILE")]
    pub fixture: PathBuf,

    /// Override the configured partition count
    #[arg(long)]
    pub max_partitions: Option<usize>,

    /// Print the master task result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(command: RunCommand, config_override: Option<PathBuf>) -> Result<()> {
    let mut config = PropagationConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    if let Some(max_partitions) = command.max_partitions {
        config.spec.max_partitions = max_partitions;
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    let fixture = Fixture::from_yaml_file(&command.fixture)
        .with_context(|| format!("Failed to load fixture {:?}", command.fixture))?;
    let store = fixture
        .seed(&config.spec)
        .await
        .context("Failed to seed the in-memory store")?;

    let bus = EventBus::with_default_capacity();
    let mut receiver = bus.subscribe();
    let service = RolePropagationService::new(store.dependencies(), config.spec.clone())
        .with_event_bus(bus.clone());
    let runner = PropagationRunner::new(
        Arc::new(service),
        Arc::new(InMemoryRequestQueue::new()),
        Arc::new(store.results.clone()),
    );

    let handle = runner.start().await.context("Failed to start propagation")?;

    let terminator = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; terminating role propagation");
            terminator.terminate();
        }
    });

    let result = runner
        .run_to_completion(&handle)
        .await
        .context("Role propagation failed")?;

    let mut observed = 0;
    while let Ok(event) = receiver.try_recv() {
        debug!(?event, "Propagation event");
        if let PropagationEvent::RunFinished { status, .. } = event {
            info!(?status, "Run finished");
        }
        observed += 1;
    }
    debug!(events = observed, "Drained propagation events");

    if command.json {
        let rendered = serde_json::to_string_pretty(&result).context("Failed to render result")?;
        println!("{}", rendered);
        return Ok(());
    }

    print_summary(&result, &store);
    Ok(())
}

fn print_summary(result: &TaskResult, store: &SeededStore) {
    println!();
    println!(
        "{} {}",
        "Role propagation:".bold(),
        format_status(result.completion_status)
    );
    if result.terminated {
        println!("  {}", "Run was terminated".yellow());
    }
    println!();

    let stats = &result.stats;
    println!("{}", "Events:".bold());
    println!("  Total: {}", stats.events_total);
    println!("  Attempted: {}", stats.event_tally);
    println!("  Succeeded: {}", stats.events_succeeded);
    println!("  Failed: {}", stats.events_failed);
    println!("  Pruned: {}", stats.events_pruned);
    println!("  Pending: {}", stats.events_pending);
    println!();

    if !result.event_details.is_empty() {
        println!("{}", "Processed events:".bold());
        for details in &result.event_details {
            println!(
                "  {} [{:?}] to process: {}, succeeded: {}, failed: {}, skipped: {}",
                details.role_name.bold(),
                details.status,
                details.identities_to_process,
                details.identities_succeeded,
                details.identities_failed,
                details.identities_skipped
            );
        }
        println!();
    }

    if !result.messages.is_empty() {
        println!("{}", "Messages:".bold());
        for message in &result.messages {
            let text = match message.kind {
                MessageKind::Info => message.text.normal(),
                MessageKind::Warn => message.text.yellow(),
                MessageKind::Error => message.text.red(),
            };
            println!("  {}", text);
        }
        println!();
    }

    let remaining = store.events.list_all();
    if !remaining.is_empty() {
        println!("{}", "Events left for the next run:".bold());
        for event in remaining {
            println!(
                "  {} [{:?}] failed: {}, skipped: {}, attempts: {}",
                event.role_name,
                event.status,
                event.failed_identity_ids.len(),
                event.skipped_identity_ids.len(),
                event.failed_attempts
            );
        }
    }
}

fn format_status(status: Option<CompletionStatus>) -> colored::ColoredString {
    match status {
        Some(CompletionStatus::Success) => "success".green(),
        Some(CompletionStatus::Warning) => "warning".yellow(),
        Some(CompletionStatus::Error) => "error".red(),
        Some(CompletionStatus::Terminated) => "terminated".red(),
        None => "incomplete".dimmed(),
    }
}
