use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub log_directory: PathBuf,
    /// Directory scanned for external action plugins at startup.
    pub plugin_dir: Option<PathBuf>,
    pub policy_path: PathBuf,
    pub ledger: LedgerConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    /// Optional webhook endpoint for job-update notifications.
    pub notify_webhook_url: Option<String>,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            log_directory: PathBuf::from(env_or("LOG_DIRECTORY", "logs")),
            plugin_dir: env_opt("PLUGIN_DIR").map(PathBuf::from),
            policy_path: PathBuf::from(env_or("POLICY_PATH", "config/policy.yaml")),
            ledger: LedgerConfig::from_env(),
            scheduler: SchedulerConfig::from_env(),
            api: ApiConfig::from_env(),
            notify_webhook_url: env_opt("NOTIFY_WEBHOOK_URL"),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  logs:      dir={}", self.log_directory.display());
        tracing::info!(
            "  plugins:   dir={}",
            self.plugin_dir
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(builtin only)".to_string())
        );
        tracing::info!("  policies:  path={}", self.policy_path.display());
        tracing::info!("  ledger:    db={}", self.ledger.db_path.display());
        tracing::info!(
            "  scheduler: interval={}s, workers={}",
            self.scheduler.evaluation_interval_secs,
            self.scheduler.worker_count
        );
        tracing::info!("  api:       {}:{}", self.api.host, self.api.port);
    }
}

// ── Ledger ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    /// Override for the schema init script; the bundled script is used when unset.
    pub init_file_path: Option<PathBuf>,
}

impl LedgerConfig {
    fn from_env() -> Self {
        Self {
            db_path: PathBuf::from(env_or("DB_PATH", "data/ledger.sqlite")),
            init_file_path: env_opt("INIT_FILE_PATH").map(PathBuf::from),
        }
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Tick resolution of the scheduling clock, in seconds.
    pub evaluation_interval_secs: u64,
    /// Size of the job execution worker pool.
    pub worker_count: usize,
}

impl SchedulerConfig {
    fn from_env() -> Self {
        Self {
            evaluation_interval_secs: env_u64("POLICY_EVALUATION_INTERVAL", 60),
            worker_count: env_u64("WORKER_COUNT", 4) as usize,
        }
    }
}

// ── API (external dashboard feed) ─────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl ApiConfig {
    fn from_env() -> Self {
        Self {
            host: env_or("API_HOST", "0.0.0.0"),
            port: env_u16("API_PORT", 5000),
        }
    }
}
