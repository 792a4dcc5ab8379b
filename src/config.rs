//! Repository configuration (`.llp.toml`).
//!
//! Typed config for the orchestrator: mainline branch name, worker pool
//! sizing and timeouts, merge/git-lock retry policy, and overlap detection
//! mode. Missing fields use sensible defaults; a missing file loads as
//! all-defaults (never an error).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level `llp` repository configuration, parsed from `.llp.toml`.
#[derive(Clone, Debug, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LlpConfig {
    /// Repository-level settings.
    #[serde(default)]
    pub repo: RepoConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Merge/git-lock settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Overlap detector settings.
    #[serde(default)]
    pub overlap: OverlapConfig,

    /// Agent subprocess command templates.
    #[serde(default)]
    pub agent: AgentConfig,
}

// ---------------------------------------------------------------------------
// RepoConfig
// ---------------------------------------------------------------------------

/// Repository-level settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// The mainline branch name (default: `"main"`).
    #[serde(default = "default_branch")]
    pub branch: String,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            branch: default_branch(),
        }
    }
}

fn default_branch() -> String {
    "main".to_owned()
}

// ---------------------------------------------------------------------------
// WorkersConfig
// ---------------------------------------------------------------------------

/// Worker pool sizing and timeouts.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkersConfig {
    /// Number of concurrent worker threads (default: 3).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Per-issue pipeline timeout in seconds (default: 3600).
    #[serde(default = "default_issue_timeout_secs")]
    pub issue_timeout_secs: u64,

    /// Per-action timeout in seconds, within a single FSM/agent invocation
    /// (default: 600).
    #[serde(default = "default_action_timeout_secs")]
    pub action_timeout_secs: u64,

    /// Bounded number of continuation retries for context-exhausted agent
    /// invocations (default: 3).
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
}

impl WorkersConfig {
    /// [`Self::issue_timeout_secs`] as a [`Duration`].
    #[must_use]
    pub const fn issue_timeout(&self) -> Duration {
        Duration::from_secs(self.issue_timeout_secs)
    }

    /// [`Self::action_timeout_secs`] as a [`Duration`].
    #[must_use]
    pub const fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            issue_timeout_secs: default_issue_timeout_secs(),
            action_timeout_secs: default_action_timeout_secs(),
            max_continuations: default_max_continuations(),
        }
    }
}

const fn default_max_workers() -> usize {
    3
}
const fn default_issue_timeout_secs() -> u64 {
    3600
}
const fn default_action_timeout_secs() -> u64 {
    600
}
const fn default_max_continuations() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge/git-lock retry policy.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Maximum git-lock retry attempts for transient failures (default: 5).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in milliseconds (default: 200).
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 10_000).
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter fraction applied to each computed delay, in `[0.0, 1.0]`
    /// (default: 0.3).
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Per-tick cap on merges drained from the merge queue, to avoid
    /// starving dispatch (default: 4).
    #[serde(default = "default_merges_per_tick")]
    pub merges_per_tick: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            merges_per_tick: default_merges_per_tick(),
        }
    }
}

const fn default_max_retries() -> u32 {
    5
}
const fn default_base_delay_ms() -> u64 {
    200
}
const fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_jitter() -> f64 {
    0.3
}
const fn default_merges_per_tick() -> usize {
    4
}

// ---------------------------------------------------------------------------
// OverlapConfig
// ---------------------------------------------------------------------------

/// Overlap detector settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlapConfig {
    /// Whether overlap detection is active at all (default: false).
    #[serde(default)]
    pub enabled: bool,

    /// When an overlap is detected: `true` dispatches anyway and only
    /// warns; `false` requeues the issue with demotion (default: false).
    #[serde(default)]
    pub warn_only: bool,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warn_only: false,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Command templates for the "ready" (validate) and "manage"
/// (fix/implement/improve) agent subprocesses. Both are run via `sh -c`
/// with `LLP_ISSUE_TARGET`/`LLP_ACTION`/`LLP_CONTINUATION_OF` in the
/// environment; see [`crate::worker::ShellAgentInvoker`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Command run to validate an issue is ready to work (default: a
    /// `claude` CLI invocation of the `/ready` slash command).
    #[serde(default = "default_ready_command")]
    pub ready_command: String,

    /// Command run to fix/implement/improve an issue (default: a `claude`
    /// CLI invocation of the `/manage` slash command).
    #[serde(default = "default_manage_command")]
    pub manage_command: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            ready_command: default_ready_command(),
            manage_command: default_manage_command(),
        }
    }
}

fn default_ready_command() -> String {
    r#"claude -p "/ready $LLP_ISSUE_TARGET" --output-format text"#.to_owned()
}

fn default_manage_command() -> String {
    r#"claude -p "/manage $LLP_ACTION $LLP_ISSUE_TARGET" --output-format text"#.to_owned()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading an `llp` configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded, if available.
    pub path: Option<std::path::PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl LlpConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse
    /// errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = LlpConfig::load(Path::new("/nonexistent/.llp.toml")).unwrap();
        assert_eq!(cfg, LlpConfig::default());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LlpConfig::default();
        assert_eq!(cfg.repo.branch, "main");
        assert_eq!(cfg.workers.max_workers, 3);
        assert_eq!(cfg.merge.max_retries, 5);
        assert!(!cfg.overlap.enabled);
        assert!(cfg.agent.ready_command.contains("/ready"));
        assert!(cfg.agent.manage_command.contains("/manage"));
    }

    #[test]
    fn parse_overrides_specific_fields() {
        let toml_str = r#"
            [repo]
            branch = "trunk"

            [workers]
            max_workers = 8

            [overlap]
            enabled = true
            warn_only = true
        "#;
        let cfg = LlpConfig::parse(toml_str).unwrap();
        assert_eq!(cfg.repo.branch, "trunk");
        assert_eq!(cfg.workers.max_workers, 8);
        // unspecified fields still take defaults
        assert_eq!(cfg.workers.issue_timeout_secs, 3600);
        assert!(cfg.overlap.enabled);
        assert!(cfg.overlap.warn_only);
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let toml_str = r#"
            [repo]
            branch = "main"
            typo_field = true
        "#;
        let err = LlpConfig::parse(toml_str).unwrap_err();
        assert!(err.message.contains("typo_field") || err.message.contains("unknown"));
    }

    #[test]
    fn parse_invalid_toml_reports_line() {
        let toml_str = "not valid [[[ toml";
        let err = LlpConfig::parse(toml_str).unwrap_err();
        assert!(err.message.contains("line"));
    }

    #[test]
    fn issue_timeout_duration_conversion() {
        let cfg = WorkersConfig {
            issue_timeout_secs: 120,
            ..WorkersConfig::default()
        };
        assert_eq!(cfg.issue_timeout(), Duration::from_secs(120));
    }
}
