//! Configuration loading for the gigapi server: a TOML file overlaid by
//! environment variables (`.` → `_`, uppercased, prefixed `GIGAPI_`), plus
//! the `clap` CLI surface for the server binary. Mirrors
//! `http-gateway/src/config.rs`'s `from_env` pattern.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

/// Recognized configuration keys (§6). Every field has a default so a
/// table can be created with no config file at all.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem root for all tables.
    pub root: PathBuf,
    /// Base unit `T` for the per-level merge timeouts.
    pub merge_timeout_s: f64,
    /// Flush ticker period, seconds.
    pub save_timeout_s: f64,
    /// Disables the background merge loop entirely.
    pub no_merges: bool,
    /// If false, `/gigapi/create` is rejected unless the table root is an
    /// `s3://` URL.
    pub allow_save_to_hd: bool,
    /// Opaque token for admin endpoints.
    pub secret: String,
    pub port: u16,
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("./data"),
            merge_timeout_s: 1.0,
            save_timeout_s: 1.0,
            no_merges: false,
            allow_save_to_hd: true,
            secret: String::new(),
            port: 7971,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Config {
    /// Loads `path` (if it exists) as TOML, then applies environment
    /// overrides. A missing file is not an error: defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?
            }
            _ => Config::default(),
        };
        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    /// Applies `GIGAPI_<FIELD>` environment overrides over an already
    /// file-or-default-loaded config, `.` in a nested key replaced by `_`
    /// and uppercased (there are no nested keys today, but the replacement
    /// rule is kept uniform with the rest of the config surface per §6).
    fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        const PREFIX: &str = "GIGAPI_";
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(PREFIX) else {
                continue;
            };
            let field = field.to_lowercase().replace('.', "_");
            match field.as_str() {
                "root" => self.root = PathBuf::from(value),
                "merge_timeout_s" => {
                    if let Ok(v) = value.parse() {
                        self.merge_timeout_s = v;
                    }
                }
                "save_timeout_s" => {
                    if let Ok(v) = value.parse() {
                        self.save_timeout_s = v;
                    }
                }
                "no_merges" => {
                    if let Ok(v) = value.parse() {
                        self.no_merges = v;
                    }
                }
                "allow_save_to_hd" => {
                    if let Ok(v) = value.parse() {
                        self.allow_save_to_hd = v;
                    }
                }
                "secret" => self.secret = value,
                "port" => {
                    if let Ok(v) = value.parse() {
                        self.port = v;
                    }
                }
                "host" => self.host = value,
                _ => {}
            }
        }
    }

    pub fn listen_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI flags for the `gigapi-server` binary, following the teacher's
/// `analytics-srv`/`telemetry-ingestion-srv` `clap::Parser` pattern.
#[derive(Parser, Debug)]
#[clap(name = "gigapi-server")]
#[clap(about = "gigapi columnar ingest server", version, author)]
pub struct Cli {
    /// Path to a TOML config file; missing file falls back to defaults.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Overrides `config.host:config.port` when set.
    #[clap(long)]
    pub listen_endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_no_file_given() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.port, 7971);
        assert!(config.allow_save_to_hd);
    }

    #[test]
    fn loads_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gigapi.toml");
        std::fs::write(&path, "port = 9999\nno_merges = true\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9999);
        assert!(config.no_merges);
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gigapi.toml");
        std::fs::write(&path, "port = 9999\n").unwrap();
        let mut config = Config::load(Some(&path)).unwrap();
        config.apply_env_overrides(std::iter::once(("GIGAPI_PORT".to_string(), "1234".to_string())));
        assert_eq!(config.port, 1234);
    }

    #[test]
    fn unknown_env_keys_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(std::iter::once(("GIGAPI_NOT_A_FIELD".to_string(), "x".to_string())));
        assert_eq!(config, Config::default());
    }
}
