//! Layered configuration.
//!
//! Values are merged in order, later sources winning:
//!
//! 1. built-in defaults,
//! 2. a TOML, YAML or JSON file (an explicit path, otherwise `config.toml` in
//!    the platform configuration directory if it exists),
//! 3. environment variables prefixed with `FLEETSCAN_`, with nested keys
//!    separated by `__` (e.g. `FLEETSCAN_SCAN__CONCURRENCY=10`).

pub mod error;
mod models;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use std::path::{Path, PathBuf};

pub use crate::models::{
    BroadcastConfig, CacheConfig, Config, HistoryConfig, LogConfig, MetadataConfig, ScanConfig, ServerConfig,
};

const ENV_PREFIX: &str = "FLEETSCAN_";

/// `config.toml` inside the platform configuration directory.
pub fn default_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "fleetscan").map(|dirs| dirs.config_dir().join("config.toml"))
}

fn figment(path: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(Config::default()));
    let file = match path {
        Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
        Some(path) => Some(path.to_path_buf()),
        None => default_path().filter(|path| path.is_file()),
    };
    if let Some(file) = file {
        tracing::debug!(path = %file.display(), "Loading configuration file");
        let extension = file.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
        figment = match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file_exact(&file)),
            Some("yaml" | "yml") => figment.merge(Yaml::file_exact(&file)),
            Some("json") => figment.merge(Json::file_exact(&file)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(file)),
        };
    }
    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Load and validate the configuration.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let config: Config = figment(path)?.extract().or_raise(|| ErrorKind::Load)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;
    use std::time::Duration;

    /// Points the platform configuration directory inside the jail so a real
    /// `config.toml` on the host can't leak into the defaults.
    fn isolate(jail: &mut Jail) {
        let home = jail.directory().display().to_string();
        jail.set_env("XDG_CONFIG_HOME", &home);
        jail.set_env("HOME", &home);
    }

    #[test]
    fn test_defaults() {
        Jail::expect_with(|jail| {
            isolate(jail);
            let config = load(None).unwrap();
            assert_eq!(config, Config::default());
            assert_eq!(config.server.bind.to_string(), "127.0.0.1:8080");
            assert_eq!(config.scan.unit_timeout(), Duration::from_secs(5));
            assert_eq!(config.scan.deadline(), Duration::from_secs(300));
            assert_eq!(config.history.path, None);
            Ok(())
        });
    }

    #[rstest]
    #[case("fleetscan.toml", "[scan]\nconcurrency = 8\n[history]\npath = \"history.db\"\n")]
    #[case("fleetscan.yaml", "scan:\n  concurrency: 8\nhistory:\n  path: history.db\n")]
    #[case("fleetscan.json", r#"{"scan": {"concurrency": 8}, "history": {"path": "history.db"}}"#)]
    fn test_file_formats(#[case] name: &str, #[case] contents: &str) {
        Jail::expect_with(|jail| {
            isolate(jail);
            jail.create_file(name, contents)?;
            let config = load(Some(Path::new(name))).unwrap();
            assert_eq!(config.scan.concurrency, 8);
            // Untouched keys keep their defaults.
            assert_eq!(config.scan.unit_timeout_secs, 5);
            assert_eq!(config.history.path, Some(PathBuf::from("history.db")));
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            isolate(jail);
            jail.create_file("fleetscan.toml", "[cache]\nttl_secs = 30\n[log]\nfilter = \"debug\"\n")?;
            jail.set_env("FLEETSCAN_CACHE__TTL_SECS", "60");
            jail.set_env("FLEETSCAN_SERVER__BIND", "0.0.0.0:9000");
            let config = load(Some(Path::new("fleetscan.toml"))).unwrap();
            assert_eq!(config.cache.ttl(), Duration::from_secs(60));
            assert_eq!(config.server.bind.port(), 9000);
            assert_eq!(config.log.filter, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_missing_and_unsupported_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load(Some(&missing)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(path) if path == &missing));

        let ini = dir.path().join("fleetscan.ini");
        std::fs::write(&ini, "concurrency=1").unwrap();
        let err = load(Some(&ini)).unwrap_err();
        assert!(matches!(&*err, ErrorKind::UnsupportedFormat(_)));
    }

    #[rstest]
    #[case("FLEETSCAN_SCAN__CONCURRENCY", "scan.concurrency")]
    #[case("FLEETSCAN_BROADCAST__UPDATE_INTERVAL_SECS", "broadcast.update_interval_secs")]
    #[case("FLEETSCAN_BROADCAST__HEARTBEAT_INTERVAL_SECS", "broadcast.heartbeat_interval_secs")]
    fn test_zero_values_are_rejected(#[case] variable: &str, #[case] field: &str) {
        Jail::expect_with(|jail| {
            isolate(jail);
            jail.set_env(variable, "0");
            let err = load(None).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Invalid(name) if *name == field));
            Ok(())
        });
    }

    #[test]
    fn test_wrong_type_fails_to_load() {
        Jail::expect_with(|jail| {
            isolate(jail);
            jail.set_env("FLEETSCAN_SCAN__CONCURRENCY", "lots");
            let err = load(None).unwrap_err();
            assert!(matches!(&*err, ErrorKind::Load));
            Ok(())
        });
    }
}
