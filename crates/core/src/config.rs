use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub locks: LockConfig,
    pub approval: ApprovalConfig,
    pub sequence: SequenceConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Lease timing for the lock manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LockConfig {
    /// Lifetime of a lease; a holder that crashes frees the key after this long.
    pub lease_ttl_ms: u64,
    /// Pause between acquisition attempts while waiting on a busy key.
    pub retry_interval_ms: u64,
    /// Wait budget used by command handlers that do not pass their own.
    pub default_timeout_ms: u64,
}

impl LockConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { lease_ttl_ms: 30_000, retry_interval_ms: 25, default_timeout_ms: 5_000 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApprovalConfig {
    pub min_rejection_comment_chars: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { min_rejection_comment_chars: 10 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SequenceConfig {
    pub code_width: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self { code_width: 4 }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub lease_ttl_ms: Option<u64>,
    pub lock_timeout_ms: Option<u64>,
    pub min_rejection_comment_chars: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://concord.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            locks: LockConfig::default(),
            approval: ApprovalConfig::default(),
            sequence: SequenceConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("concord.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(locks) = patch.locks {
            if let Some(lease_ttl_ms) = locks.lease_ttl_ms {
                self.locks.lease_ttl_ms = lease_ttl_ms;
            }
            if let Some(retry_interval_ms) = locks.retry_interval_ms {
                self.locks.retry_interval_ms = retry_interval_ms;
            }
            if let Some(default_timeout_ms) = locks.default_timeout_ms {
                self.locks.default_timeout_ms = default_timeout_ms;
            }
        }

        if let Some(approval) = patch.approval {
            if let Some(min_chars) = approval.min_rejection_comment_chars {
                self.approval.min_rejection_comment_chars = min_chars;
            }
        }

        if let Some(sequence) = patch.sequence {
            if let Some(code_width) = sequence.code_width {
                self.sequence.code_width = code_width;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCORD_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCORD_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("CONCORD_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCORD_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("CONCORD_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCORD_LOCKS_LEASE_TTL_MS") {
            self.locks.lease_ttl_ms = parse_env("CONCORD_LOCKS_LEASE_TTL_MS", &value)?;
        }
        if let Some(value) = read_env("CONCORD_LOCKS_RETRY_INTERVAL_MS") {
            self.locks.retry_interval_ms = parse_env("CONCORD_LOCKS_RETRY_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("CONCORD_LOCKS_DEFAULT_TIMEOUT_MS") {
            self.locks.default_timeout_ms =
                parse_env("CONCORD_LOCKS_DEFAULT_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("CONCORD_APPROVAL_MIN_REJECTION_COMMENT_CHARS") {
            self.approval.min_rejection_comment_chars =
                parse_env("CONCORD_APPROVAL_MIN_REJECTION_COMMENT_CHARS", &value)?;
        }

        if let Some(value) = read_env("CONCORD_SEQUENCE_CODE_WIDTH") {
            self.sequence.code_width = parse_env("CONCORD_SEQUENCE_CODE_WIDTH", &value)?;
        }

        let log_level =
            read_env("CONCORD_LOGGING_LEVEL").or_else(|| read_env("CONCORD_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCORD_LOGGING_FORMAT").or_else(|| read_env("CONCORD_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(lease_ttl_ms) = overrides.lease_ttl_ms {
            self.locks.lease_ttl_ms = lease_ttl_ms;
        }
        if let Some(lock_timeout_ms) = overrides.lock_timeout_ms {
            self.locks.default_timeout_ms = lock_timeout_ms;
        }
        if let Some(min_chars) = overrides.min_rejection_comment_chars {
            self.approval.min_rejection_comment_chars = min_chars;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_locks(&self.locks)?;
        validate_approval(&self.approval)?;
        validate_sequence(&self.sequence)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concord.toml"), PathBuf::from("config/concord.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_locks(locks: &LockConfig) -> Result<(), ConfigError> {
    if locks.lease_ttl_ms < 100 {
        return Err(ConfigError::Validation(
            "locks.lease_ttl_ms must be at least 100 so holders can finish their critical section"
                .to_string(),
        ));
    }

    if locks.retry_interval_ms == 0 || locks.retry_interval_ms >= locks.lease_ttl_ms {
        return Err(ConfigError::Validation(
            "locks.retry_interval_ms must be greater than zero and below locks.lease_ttl_ms"
                .to_string(),
        ));
    }

    if locks.default_timeout_ms > 600_000 {
        return Err(ConfigError::Validation(
            "locks.default_timeout_ms must be in range 0..=600000 (0 fails fast)".to_string(),
        ));
    }

    Ok(())
}

fn validate_approval(approval: &ApprovalConfig) -> Result<(), ConfigError> {
    if approval.min_rejection_comment_chars == 0 {
        return Err(ConfigError::Validation(
            "approval.min_rejection_comment_chars must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_sequence(sequence: &SequenceConfig) -> Result<(), ConfigError> {
    if sequence.code_width == 0 || sequence.code_width > 12 {
        return Err(ConfigError::Validation(
            "sequence.code_width must be in range 1..=12".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    locks: Option<LocksPatch>,
    approval: Option<ApprovalPatch>,
    sequence: Option<SequencePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LocksPatch {
    lease_ttl_ms: Option<u64>,
    retry_interval_ms: Option<u64>,
    default_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    min_rejection_comment_chars: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct SequencePatch {
    code_width: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.locks.lease_ttl_ms == 30_000, "default lease ttl should be 30s")?;
        ensure(config.approval.min_rejection_comment_chars == 10, "default comment minimum")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "default format compact")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_CONCORD_DB_PATH", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concord.toml");
            fs::write(
                &path,
                r#"
[database]
url = "${TEST_CONCORD_DB_PATH}"

[locks]
lease_ttl_ms = 2000
retry_interval_ms = 10
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://interpolated.db",
                "database url should be interpolated from environment",
            )?;
            ensure(config.locks.lease_ttl_ms == 2000, "lease ttl should come from the file")?;
            ensure(config.locks.retry_interval_ms == 10, "retry interval should come from file")?;
            Ok(())
        })();

        clear_vars(&["TEST_CONCORD_DB_PATH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCORD_LOG_LEVEL", "warn");
        env::set_var("CONCORD_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["CONCORD_LOG_LEVEL", "CONCORD_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCORD_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("CONCORD_LOCKS_LEASE_TTL_MS", "4000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("concord.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[locks]
lease_ttl_ms = 1000
default_timeout_ms = 750

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.locks.lease_ttl_ms == 4000, "env lease ttl should win over file")?;
            ensure(config.locks.default_timeout_ms == 750, "file timeout should win over default")?;
            Ok(())
        })();

        clear_vars(&["CONCORD_DATABASE_URL", "CONCORD_LOCKS_LEASE_TTL_MS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCORD_LOCKS_LEASE_TTL_MS", "1000");
        env::set_var("CONCORD_LOCKS_RETRY_INTERVAL_MS", "1000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("locks.retry_interval_ms")
            );
            ensure(has_message, "validation failure should mention locks.retry_interval_ms")
        })();

        clear_vars(&["CONCORD_LOCKS_LEASE_TTL_MS", "CONCORD_LOCKS_RETRY_INTERVAL_MS"]);
        result
    }

    #[test]
    fn malformed_numeric_env_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("CONCORD_SEQUENCE_CODE_WIDTH", "wide");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env parse failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "CONCORD_SEQUENCE_CODE_WIDTH"
                ),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["CONCORD_SEQUENCE_CODE_WIDTH"]);
        result
    }
}
