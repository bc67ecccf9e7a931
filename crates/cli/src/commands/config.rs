use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use concord_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    run_with(LoadOptions::default())
}

pub fn run_with(options: LoadOptions) -> String {
    let config_file_path = options.config_path.clone().or_else(detect_config_path);
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    let config_file_doc = match load_config_file_doc(config_file_path.as_deref()) {
        Ok(doc) => doc,
        Err(error) => {
            lines.push(format!("! could not attribute file sources: {error:#}"));
            None
        }
    };

    let fields: [(&str, String, &[&str]); 10] = [
        ("database.url", config.database.url.clone(), &["CONCORD_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CONCORD_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CONCORD_DATABASE_TIMEOUT_SECS"],
        ),
        (
            "locks.lease_ttl_ms",
            config.locks.lease_ttl_ms.to_string(),
            &["CONCORD_LOCKS_LEASE_TTL_MS"],
        ),
        (
            "locks.retry_interval_ms",
            config.locks.retry_interval_ms.to_string(),
            &["CONCORD_LOCKS_RETRY_INTERVAL_MS"],
        ),
        (
            "locks.default_timeout_ms",
            config.locks.default_timeout_ms.to_string(),
            &["CONCORD_LOCKS_DEFAULT_TIMEOUT_MS"],
        ),
        (
            "approval.min_rejection_comment_chars",
            config.approval.min_rejection_comment_chars.to_string(),
            &["CONCORD_APPROVAL_MIN_REJECTION_COMMENT_CHARS"],
        ),
        (
            "sequence.code_width",
            config.sequence.code_width.to_string(),
            &["CONCORD_SEQUENCE_CODE_WIDTH"],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["CONCORD_LOGGING_LEVEL", "CONCORD_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["CONCORD_LOGGING_FORMAT", "CONCORD_LOG_FORMAT"],
        ),
    ];

    for (key_path, value, env_keys) in fields {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    ["concord.toml", "config/concord.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> anyhow::Result<Option<Value>> {
    let Some(path) = path else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let doc = raw.parse::<Value>().with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(doc))
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, field_source};

    #[test]
    fn file_source_is_reported_for_nested_keys() {
        let doc: Value = "[locks]\nlease_ttl_ms = 1000\n".parse().expect("toml");

        assert!(contains_path(&doc, "locks.lease_ttl_ms"));
        assert!(!contains_path(&doc, "locks.retry_interval_ms"));
        assert_eq!(
            field_source("locks.lease_ttl_ms", &["CONCORD_TEST_UNSET_KEY"], Some(&doc), None),
            "file (config file)"
        );
        assert_eq!(field_source("sequence.code_width", &[], Some(&doc), None), "default");
    }
}
