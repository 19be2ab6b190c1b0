//! Ledger inspection commands: `brain status` and `brain recover`.

use anyhow::{Context, Result};

use brain::config::BrainConfig;
use brain::ledger::{BrainSession, DbHandle, INTERRUPTED_NOTE, LedgerDb};
use brain::util::{one_line, truncate_chars};
use brain::workflow::Stage;

fn open_db(config: &BrainConfig) -> Result<Option<DbHandle>> {
    let path = config.db_path();
    if !path.exists() {
        return Ok(None);
    }
    let db = LedgerDb::new(&path)
        .with_context(|| format!("Failed to open ledger at {}", path.display()))?;
    Ok(Some(DbHandle::new(db)))
}

fn retries_line(session: &BrainSession) -> String {
    let retries = &session.context.retries;
    [Stage::Review, Stage::Lint, Stage::Test, Stage::Commit, Stage::Deploy]
        .iter()
        .map(|stage| format!("{}={}", stage, retries.get(*stage)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub async fn cmd_status(config: &BrainConfig, session_id: Option<&str>) -> Result<()> {
    let Some(db) = open_db(config)? else {
        println!("No brain database at {}", config.db_path().display());
        return Ok(());
    };

    match session_id {
        Some(id) => {
            let owned = id.to_string();
            let detail = db
                .call(move |db| db.session_detail(&owned))
                .await?
                .with_context(|| format!("Brain session {} not found", id))?;
            let session = &detail.session;

            println!();
            println!("Brain Session {}", session.id);
            println!("==============={}", "=".repeat(session.id.len() + 1));
            println!();
            println!("Main session:   {}", session.main_session_id);
            println!("Review session: {}", session.review_session_id);
            println!("Status:         {}", session.status.as_str());
            println!("State:          {}", session.state);
            println!("Retries:        {}", retries_line(session));
            if let Some(signal) = session.context.last_signal {
                println!("Last signal:    {}", signal);
            }
            if session.context.failed_completion {
                println!("Completion:     failed (retry budget exhausted)");
            }
            println!();

            println!("Rounds ({}):", detail.rounds.len());
            for round in &detail.rounds {
                let mut tags = Vec::new();
                if round.has_code_changes {
                    tags.push("code");
                }
                if round.from_review {
                    tags.push("review");
                }
                println!(
                    "  #{:<3} [{}] {}",
                    round.round_number,
                    tags.join(","),
                    truncate_chars(&one_line(&round.user_input), 80)
                );
            }
            println!();

            println!("Executions ({}):", detail.executions.len());
            for exec in &detail.executions {
                println!(
                    "  {}  {:<9} rounds={:?} progress={}",
                    exec.id,
                    exec.status.as_str(),
                    exec.rounds_reviewed,
                    exec.progress_log.len()
                );
                if let Some(result) = &exec.result {
                    println!("      {}", truncate_chars(&one_line(result), 100));
                }
            }
            println!();
        }
        None => {
            let sessions = db.call(|db| db.list_brain_sessions()).await?;
            if sessions.is_empty() {
                println!("No brain sessions.");
                return Ok(());
            }
            println!(
                "{:<36}  {:<10}  {:<11}  {:<20}  RETRIES",
                "ID", "STATUS", "STATE", "MAIN SESSION"
            );
            for session in &sessions {
                println!(
                    "{:<36}  {:<10}  {:<11}  {:<20}  {}",
                    session.id,
                    session.status.as_str(),
                    session.state.as_str(),
                    truncate_chars(&session.main_session_id, 20),
                    retries_line(session)
                );
            }
        }
    }

    Ok(())
}

pub async fn cmd_recover(config: &BrainConfig) -> Result<()> {
    let path = config.db_path();
    let db = DbHandle::new(
        LedgerDb::new(&path)
            .with_context(|| format!("Failed to open ledger at {}", path.display()))?,
    );
    let swept = db
        .call(|db| db.fail_running_executions(INTERRUPTED_NOTE))
        .await?;
    tracing::info!(swept, db = %path.display(), "Recovery sweep finished");
    println!("Recovered {} interrupted execution(s).", swept);
    Ok(())
}
