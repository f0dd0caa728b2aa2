// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use propagation_core::domain::propagation_config::PropagationConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the resolved manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./propagator-config.yaml)
        #[arg(short, long, default_value = "./propagator-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = PropagationConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. PROPAGATOR_CONFIG_PATH: {}",
            std::env::var("PROPAGATOR_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./propagator-config.yaml");
        println!("  4. ~/.propagator/config.yaml");
        println!("  5. /etc/propagator/config.yaml");
        println!();
    }

    if yaml {
        let rendered = serde_yaml::to_string(&config).context("Failed to render configuration")?;
        print!("{}", rendered);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let spec = &config.spec;
    println!("{}", "Partitioning:".bold());
    println!("  Max partitions: {}", spec.max_partitions);
    println!("  Compression level: {}", spec.compression_level);
    println!();

    println!("{}", "Limits:".bold());
    if spec.duration_minutes > 0 {
        println!("  Duration: {} minutes", spec.duration_minutes);
    } else {
        println!("  Duration: {}", "(unlimited)".dimmed());
    }
    println!("  Max failed attempts: {}", spec.max_failed_attempts);
    println!("  Max failure threshold: {}%", spec.max_failure_threshold);
    println!();

    println!("{}", "Provisioning:".bold());
    println!(
        "  Workflow: {}",
        spec.workflow.as_deref().unwrap_or("(built-in provisioning)")
    );
    println!(
        "  Identity refresh: {}",
        if spec.is_identity_refresh_enabled() { "enabled" } else { "disabled" }
    );
    for policy in &spec.policies {
        println!("    - {}", policy);
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = PropagationConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    PropagationConfigManifest::default()
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_generated_config_validates() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("propagator-config.yaml");

        generate(output.clone()).await.unwrap();
        validate(Some(output.clone())).await.unwrap();

        let manifest = PropagationConfigManifest::from_yaml_file(&output).unwrap();
        assert_eq!(manifest.metadata.name, "role-propagation");
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            "apiVersion: propagation/v1\nkind: PropagationTask\nmetadata: { name: x }\nspec: { max_partitions: 0 }\n",
        )
        .unwrap();

        assert!(validate(Some(path)).await.is_err());
    }
}
