//! Configuration for the Brain engine.
//!
//! Settings are read from `.brain/brain.toml` (or `--config`). Every field
//! has a default, so an empty or missing file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [sync]
//! debounce_ms = 5000
//! max_rearms = 12
//! stability_window_ms = 1500
//! stability_max_wait_ms = 10000
//! stability_poll_ms = 300
//! stability_jitter_ms = 100
//! result_snapshot_chars = 4000
//!
//! [workflow]
//! auto_deploy = false
//!
//! [workflow.retry_limits]
//! review = 5
//! lint = 3
//! test = 3
//! commit = 2
//! deploy = 2
//!
//! [signals]
//! lookback_lines = 5
//!
//! [rounds]
//! init_marker = "#InitPrompt-"
//! init_round_policy = "always"   # or "first_only"
//! review_origin = "brain-review"
//! mutating_tools = ["Edit", "MultiEdit", "Write", "NotebookEdit", "Bash", "apply_patch", "shell"]
//!
//! [storage]
//! db_path = ".brain/brain.db"
//!
//! [logging]
//! level = "info"
//! json = false
//! # dir = ".brain/logs"
//! ```
//!
//! Environment overrides: `BRAIN_DB_PATH`, `BRAIN_DEBOUNCE_MS`, `BRAIN_LOG_JSON`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::{OrchestratorSettings, StabilitySettings};
use crate::rounds::{
    DEFAULT_INIT_MARKER, DEFAULT_MUTATING_TOOLS, DEFAULT_REVIEW_ORIGIN, InitRoundPolicy,
    MessageClassifier,
};
use crate::signals::{DEFAULT_LOOKBACK_LINES, SignalParser};
use crate::util::expand_home;
use crate::workflow::{RetryLimits, WorkflowMachine};

pub const CONFIG_DIR: &str = ".brain";
pub const CONFIG_FILE: &str = "brain.toml";

/// Debounce and stability timings of the sync orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSection {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Re-arms allowed while the session still reports thinking.
    #[serde(default = "default_max_rearms")]
    pub max_rearms: u32,
    #[serde(default = "default_stability_window_ms")]
    pub stability_window_ms: u64,
    /// Hard ceiling on the message-store stability wait.
    #[serde(default = "default_stability_max_wait_ms")]
    pub stability_max_wait_ms: u64,
    #[serde(default = "default_stability_poll_ms")]
    pub stability_poll_ms: u64,
    #[serde(default = "default_stability_jitter_ms")]
    pub stability_jitter_ms: u64,
    /// Reviewer reply characters kept as an execution's result.
    #[serde(default = "default_result_snapshot_chars")]
    pub result_snapshot_chars: usize,
}

fn default_debounce_ms() -> u64 {
    5000
}

fn default_max_rearms() -> u32 {
    12
}

fn default_stability_window_ms() -> u64 {
    1500
}

fn default_stability_max_wait_ms() -> u64 {
    10_000
}

fn default_stability_poll_ms() -> u64 {
    300
}

fn default_stability_jitter_ms() -> u64 {
    100
}

fn default_result_snapshot_chars() -> usize {
    4000
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_rearms: default_max_rearms(),
            stability_window_ms: default_stability_window_ms(),
            stability_max_wait_ms: default_stability_max_wait_ms(),
            stability_poll_ms: default_stability_poll_ms(),
            stability_jitter_ms: default_stability_jitter_ms(),
            result_snapshot_chars: default_result_snapshot_chars(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSection {
    /// Route a successful commit to the deploy stage.
    #[serde(default)]
    pub auto_deploy: bool,
    #[serde(default)]
    pub retry_limits: RetryLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsSection {
    /// Trailing non-empty lines scanned for a `SIGNAL:` marker.
    #[serde(default = "default_lookback_lines")]
    pub lookback_lines: usize,
}

fn default_lookback_lines() -> usize {
    DEFAULT_LOOKBACK_LINES
}

impl Default for SignalsSection {
    fn default() -> Self {
        Self {
            lookback_lines: default_lookback_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundsSection {
    #[serde(default = "default_init_marker")]
    pub init_marker: String,
    #[serde(default)]
    pub init_round_policy: InitRoundPolicy,
    #[serde(default = "default_review_origin")]
    pub review_origin: String,
    #[serde(default = "default_mutating_tools")]
    pub mutating_tools: Vec<String>,
}

fn default_init_marker() -> String {
    DEFAULT_INIT_MARKER.to_string()
}

fn default_review_origin() -> String {
    DEFAULT_REVIEW_ORIGIN.to_string()
}

fn default_mutating_tools() -> Vec<String> {
    DEFAULT_MUTATING_TOOLS.iter().map(|t| t.to_string()).collect()
}

impl Default for RoundsSection {
    fn default() -> Self {
        Self {
            init_marker: default_init_marker(),
            init_round_policy: InitRoundPolicy::default(),
            review_origin: default_review_origin(),
            mutating_tools: default_mutating_tools(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    /// SQLite file, relative to the project directory unless absolute.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("brain.db")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Directory for daily-rolling log files. Logs go to stderr when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

/// Parsed `brain.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrainToml {
    #[serde(default)]
    pub sync: SyncSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub signals: SignalsSection,
    #[serde(default)]
    pub rounds: RoundsSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl BrainToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse brain.toml")
    }

    /// Load from `<brain_dir>/brain.toml`, or defaults if the file is missing.
    pub fn load_or_default(brain_dir: &Path) -> Result<Self> {
        let config_path = brain_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize brain.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Database path, with `BRAIN_DB_PATH` taking precedence over the file.
    pub fn db_path(&self) -> PathBuf {
        std::env::var("BRAIN_DB_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| self.storage.db_path.clone())
    }

    /// Debounce delay, with `BRAIN_DEBOUNCE_MS` taking precedence.
    pub fn debounce_ms(&self) -> u64 {
        std::env::var("BRAIN_DEBOUNCE_MS")
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.sync.debounce_ms)
    }

    /// JSON log output, with `BRAIN_LOG_JSON` taking precedence.
    pub fn log_json(&self) -> bool {
        if let Ok(env_val) = std::env::var("BRAIN_LOG_JSON") {
            return matches!(env_val.trim(), "1" | "true" | "yes");
        }
        self.logging.json
    }

    pub fn machine(&self) -> WorkflowMachine {
        WorkflowMachine::new(self.workflow.retry_limits, self.workflow.auto_deploy)
    }

    pub fn classifier(&self) -> MessageClassifier {
        MessageClassifier::new(
            self.rounds.mutating_tools.clone(),
            self.rounds.review_origin.clone(),
        )
    }

    pub fn parser(&self) -> SignalParser {
        SignalParser::new(self.signals.lookback_lines)
    }

    /// Resolved settings for the sync orchestrator.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            debounce: Duration::from_millis(self.debounce_ms()),
            max_rearms: self.sync.max_rearms,
            stability: StabilitySettings {
                window: Duration::from_millis(self.sync.stability_window_ms),
                max_wait: Duration::from_millis(self.sync.stability_max_wait_ms),
                poll: Duration::from_millis(self.sync.stability_poll_ms),
                jitter: Duration::from_millis(self.sync.stability_jitter_ms),
            },
            result_snapshot_chars: self.sync.result_snapshot_chars,
            init_round_policy: self.rounds.init_round_policy,
            init_marker: self.rounds.init_marker.clone(),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let limits = &self.workflow.retry_limits;
        for (stage, limit) in [
            ("review", limits.review),
            ("lint", limits.lint),
            ("test", limits.test),
            ("commit", limits.commit),
            ("deploy", limits.deploy),
        ] {
            if limit == 0 {
                warnings.push(format!(
                    "retry_limits.{} is 0: the first failure forces the workflow past the stage",
                    stage
                ));
            }
        }

        if self.sync.stability_window_ms > self.sync.stability_max_wait_ms {
            warnings.push(format!(
                "stability_window_ms ({}) exceeds stability_max_wait_ms ({}): the store will never be seen as stable",
                self.sync.stability_window_ms, self.sync.stability_max_wait_ms
            ));
        }
        if self.sync.stability_poll_ms == 0 {
            warnings.push("stability_poll_ms is 0: polling will spin".to_string());
        }
        if self.signals.lookback_lines == 0 {
            warnings.push("signals.lookback_lines is 0: treated as 1".to_string());
        }
        if self.rounds.mutating_tools.is_empty() {
            warnings.push(
                "rounds.mutating_tools is empty: no round will ever count as a code change"
                    .to_string(),
            );
        }
        if self.rounds.review_origin.trim().is_empty() {
            warnings.push(
                "rounds.review_origin is empty: reviewer relays cannot be told apart".to_string(),
            );
        }
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            warnings.push(format!("Invalid logging.level '{}'", self.logging.level));
        }

        warnings
    }
}

/// Runtime configuration: the parsed file plus CLI overrides.
#[derive(Debug, Clone)]
pub struct BrainConfig {
    pub project_dir: PathBuf,
    /// Where `brain.toml` lives (or would live).
    pub config_path: PathBuf,
    pub toml: BrainToml,
    pub verbose: bool,
    cli_db_path: Option<PathBuf>,
}

impl BrainConfig {
    /// Load from `<project_dir>/.brain/brain.toml`.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        Self::with_cli_args(project_dir, None, None, false)
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        config_path: Option<PathBuf>,
        db_path: Option<PathBuf>,
        verbose: bool,
    ) -> Result<Self> {
        let config_path =
            config_path.unwrap_or_else(|| project_dir.join(CONFIG_DIR).join(CONFIG_FILE));
        let toml = if config_path.exists() {
            BrainToml::load(&config_path)?
        } else {
            BrainToml::default()
        };
        Ok(Self {
            project_dir,
            config_path,
            toml,
            verbose,
            cli_db_path: db_path,
        })
    }

    /// Database path (CLI → env → file), resolved against the project dir.
    pub fn db_path(&self) -> PathBuf {
        let path = expand_home(
            &self
                .cli_db_path
                .clone()
                .unwrap_or_else(|| self.toml.db_path()),
        );
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    /// Log directory, resolved against the project dir.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml.logging.dir.as_ref().map(|dir| {
            let dir = expand_home(dir);
            if dir.is_absolute() {
                dir
            } else {
                self.project_dir.join(dir)
            }
        })
    }

    /// Effective log level: `-v` forces debug.
    pub fn log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.toml.logging.level.clone()
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = BrainToml::parse("").unwrap();
        assert_eq!(config.sync.debounce_ms, 5000);
        assert_eq!(config.sync.stability_max_wait_ms, 10_000);
        assert_eq!(config.workflow.retry_limits, RetryLimits::default());
        assert!(!config.workflow.auto_deploy);
        assert_eq!(config.signals.lookback_lines, 5);
        assert_eq!(config.rounds.init_marker, "#InitPrompt-");
        assert_eq!(config.rounds.init_round_policy, InitRoundPolicy::Always);
        assert_eq!(config.storage.db_path, PathBuf::from(".brain/brain.db"));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = BrainToml::parse(
            r#"
            [sync]
            debounce_ms = 250

            [workflow]
            auto_deploy = true

            [workflow.retry_limits]
            lint = 1

            [rounds]
            init_round_policy = "first_only"
            mutating_tools = ["Edit"]

            [logging]
            json = true
            dir = "logs"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.debounce_ms, 250);
        assert_eq!(config.sync.max_rearms, 12);
        assert!(config.workflow.auto_deploy);
        assert_eq!(config.workflow.retry_limits.lint, 1);
        assert_eq!(config.workflow.retry_limits.review, 5);
        assert_eq!(config.rounds.init_round_policy, InitRoundPolicy::FirstOnly);
        assert!(config.classifier().is_mutating_tool("edit"));
        assert!(!config.classifier().is_mutating_tool("Bash"));
        assert!(config.logging.json);
        assert_eq!(config.logging.dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(BrainToml::parse("[sync\ndebounce_ms = ").is_err());
        assert!(BrainToml::parse("[sync]\ndebounce_ms = \"soon\"").is_err());
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut config = BrainToml::default();
        config.workflow.retry_limits.test = 0;
        config.sync.stability_window_ms = 20_000;
        config.signals.lookback_lines = 0;
        config.logging.level = "brain=loudest".to_string();
        let warnings = config.validate();
        assert!(warnings.iter().any(|w| w.contains("retry_limits.test")));
        assert!(warnings.iter().any(|w| w.contains("stability_window_ms")));
        assert!(warnings.iter().any(|w| w.contains("lookback_lines")));
        assert!(warnings.iter().any(|w| w.contains("logging.level")));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = BrainToml::default();
        config.sync.debounce_ms = 42;
        config.rounds.init_round_policy = InitRoundPolicy::FirstOnly;
        config.save(&path).unwrap();

        let loaded = BrainToml::load(&path).unwrap();
        assert_eq!(loaded.sync.debounce_ms, 42);
        assert_eq!(loaded.rounds.init_round_policy, InitRoundPolicy::FirstOnly);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = BrainToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.sync.debounce_ms, 5000);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let config = BrainToml::default();

        // SAFETY: serialized by ENV_MUTEX
        unsafe {
            std::env::set_var("BRAIN_DB_PATH", "/tmp/other.db");
            std::env::set_var("BRAIN_DEBOUNCE_MS", "10");
            std::env::set_var("BRAIN_LOG_JSON", "true");
        }
        assert_eq!(config.db_path(), PathBuf::from("/tmp/other.db"));
        assert_eq!(config.debounce_ms(), 10);
        assert!(config.log_json());
        assert_eq!(
            config.orchestrator_settings().debounce,
            Duration::from_millis(10)
        );

        unsafe {
            std::env::remove_var("BRAIN_DB_PATH");
            std::env::remove_var("BRAIN_DEBOUNCE_MS");
            std::env::remove_var("BRAIN_LOG_JSON");
        }
        assert_eq!(config.db_path(), PathBuf::from(".brain/brain.db"));
        assert_eq!(config.debounce_ms(), 5000);
        assert!(!config.log_json());
    }

    #[test]
    fn test_brain_config_resolves_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        let brain_dir = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&brain_dir).unwrap();
        std::fs::write(
            brain_dir.join(CONFIG_FILE),
            "[storage]\ndb_path = \"data/x.db\"\n[logging]\ndir = \"logs\"\n",
        )
        .unwrap();

        let config = BrainConfig::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(config.db_path(), dir.path().join("data/x.db"));
        assert_eq!(config.log_dir(), Some(dir.path().join("logs")));
        assert_eq!(config.log_level(), "info");

        let cli = BrainConfig::with_cli_args(
            dir.path().to_path_buf(),
            None,
            Some(PathBuf::from("/abs/cli.db")),
            true,
        )
        .unwrap();
        assert_eq!(cli.db_path(), PathBuf::from("/abs/cli.db"));
        assert_eq!(cli.log_level(), "debug");
    }
}
