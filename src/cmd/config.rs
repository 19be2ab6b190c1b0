//! Configuration view and validation commands: `brain config`.

use anyhow::Result;

use super::super::ConfigCommands;
use brain::config::{BrainConfig, BrainToml};

fn print_toml(toml: &BrainToml) {
    println!("[sync]");
    println!("  debounce_ms = {}", toml.sync.debounce_ms);
    println!("  max_rearms = {}", toml.sync.max_rearms);
    println!("  stability_window_ms = {}", toml.sync.stability_window_ms);
    println!("  stability_max_wait_ms = {}", toml.sync.stability_max_wait_ms);
    println!("  stability_poll_ms = {}", toml.sync.stability_poll_ms);
    println!("  stability_jitter_ms = {}", toml.sync.stability_jitter_ms);
    println!("  result_snapshot_chars = {}", toml.sync.result_snapshot_chars);
    println!();

    let limits = &toml.workflow.retry_limits;
    println!("[workflow]");
    println!("  auto_deploy = {}", toml.workflow.auto_deploy);
    println!(
        "  retry_limits = review {} / lint {} / test {} / commit {} / deploy {}",
        limits.review, limits.lint, limits.test, limits.commit, limits.deploy
    );
    println!();

    println!("[signals]");
    println!("  lookback_lines = {}", toml.signals.lookback_lines);
    println!();

    println!("[rounds]");
    println!("  init_marker = \"{}\"", toml.rounds.init_marker);
    println!("  init_round_policy = {:?}", toml.rounds.init_round_policy);
    println!("  review_origin = \"{}\"", toml.rounds.review_origin);
    println!("  mutating_tools = {}", toml.rounds.mutating_tools.join(", "));
    println!();

    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  json = {}", toml.logging.json);
    if let Some(dir) = &toml.logging.dir {
        println!("  dir = \"{}\"", dir.display());
    }
    println!();
}

pub fn cmd_config(config: &BrainConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Brain Configuration");
            println!("===================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No brain.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  db_path = \"{}\"", config.db_path().display());
            println!("  debounce_ms = {}", config.toml.debounce_ms());
            println!("  log_level = \"{}\"", config.log_level());
            println!("  log_json = {}", config.toml.log_json());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No brain.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("brain.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            BrainToml::default().save(config_path)?;

            println!("Created brain.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [sync] debounce and stability timings");
            println!("  - [workflow.retry_limits] per-stage retry budgets");
            println!("  - [rounds] init_round_policy, mutating_tools");
            println!();
        }
    }

    Ok(())
}
