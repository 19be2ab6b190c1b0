//! Offline inspection commands: `brain signal`, `brain segment`, `brain instruction`.
//!
//! These run the engine's pure pieces against files so reviewer replies and
//! message logs can be checked without a live host.

use anyhow::{Context, Result};
use std::io::Read;
use std::path::Path;

use brain::config::BrainConfig;
use brain::rounds::segment;
use brain::signals::{InstructionContext, render_instruction};
use brain::util::{one_line, truncate_chars};
use brain::workflow::{StateContext, WorkflowState, allowed_signals};
use brain_common::StoredMessage;

fn parse_state(state: &str) -> Result<WorkflowState> {
    state.parse().map_err(anyhow::Error::msg)
}

pub fn cmd_signal(config: &BrainConfig, state: &str, file: Option<&Path>) -> Result<()> {
    let state = parse_state(state)?;
    let reply = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reply from {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read reply from stdin")?;
            buf
        }
    };

    let allowed = allowed_signals(state);
    let Some(parsed) = config.toml.parser().parse(&reply, allowed) else {
        let tokens: Vec<&str> = allowed.iter().map(|s| s.as_str()).collect();
        anyhow::bail!(
            "No signal found for state {} (allowed: {})",
            state,
            if tokens.is_empty() {
                "none".to_string()
            } else {
                tokens.join(", ")
            }
        );
    };

    println!("signal: {}", parsed.signal);
    if let Some(detail) = &parsed.detail {
        println!("detail: {}", detail);
    }
    let transition = config.toml.machine().apply(
        state,
        &StateContext::default(),
        parsed.signal,
        parsed.detail.as_deref(),
    )?;
    println!("transition: {} -> {}", transition.from, transition.to);
    Ok(())
}

pub fn cmd_segment(config: &BrainConfig, file: &Path, json: bool) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read messages from {}", file.display()))?;
    let messages: Vec<StoredMessage> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse messages in {}", file.display()))?;

    let rounds = segment(&messages, &config.toml.classifier());
    if json {
        println!("{}", serde_json::to_string_pretty(&rounds)?);
        return Ok(());
    }

    if rounds.is_empty() {
        println!("No rounds.");
        return Ok(());
    }
    for round in &rounds {
        let mut tags = Vec::new();
        if round.has_code_changes {
            tags.push("code changes");
        }
        if round.from_review {
            tags.push("from review");
        }
        println!(
            "Round {} ({} message(s)){}",
            round.round_number,
            round.message_ids.len(),
            if tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", tags.join(", "))
            }
        );
        println!("  user:  {}", truncate_chars(&one_line(&round.user_input), 100));
        if let Some(reply) = round.last_reply() {
            println!("  agent: {}", truncate_chars(&one_line(reply), 100));
        }
    }
    Ok(())
}

pub fn cmd_instruction(
    config: &BrainConfig,
    state: &str,
    retries: u32,
    working_dir: Option<&str>,
) -> Result<()> {
    let state = parse_state(state)?;
    let mut context = StateContext::default();
    if let Some(stage) = state.stage() {
        context.retries.set(stage, retries);
    }
    let limits = config.toml.workflow.retry_limits;
    let working_dir = working_dir
        .map(str::to_string)
        .unwrap_or_else(|| config.project_dir.display().to_string());

    let prompt = render_instruction(&InstructionContext {
        state,
        context: &context,
        limits: &limits,
        working_dir: Some(&working_dir),
        rounds: &[],
    });
    println!("{}", prompt);
    Ok(())
}
