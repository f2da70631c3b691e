//! Configuration system: TOML file + env var overrides + defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierKind;
use crate::core::errors::{QcError, Result};
use crate::core::paths::{is_within, resolve_absolute_path};

/// Checkpoint file name used when none is configured.
pub const DEFAULT_STATE_FILE: &str = "qcrawl-state.json";

/// Files classified between two periodic checkpoints.
pub const DEFAULT_SAVE_EVERY: usize = 50_000;

/// Full qcrawl configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub checkpoint: CheckpointConfig,
    pub classifier: ClassifierConfig,
    pub quarantine: QuarantineConfig,
    pub logging: LoggingConfig,
    pub progress: ProgressConfig,
}

/// What to crawl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct CrawlConfig {
    pub root: Option<PathBuf>,
    pub excluded_paths: Vec<PathBuf>,
    pub follow_symlinks: bool,
}

/// Where and how often the path tree is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckpointConfig {
    pub path: PathBuf,
    pub save_every: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Worker threads computing fingerprints. 1 classifies inline.
    pub parallelism: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Without a destination, selected files are listed and left in place.
    pub destination_root: Option<PathBuf>,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_log: PathBuf,
    pub fallback_log: Option<PathBuf>,
}

/// Console progress rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProgressConfig {
    pub throttle_ms: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_FILE),
            save_every: DEFAULT_SAVE_EVERY,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Signature,
            parallelism: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_log: home_dir()
                .join(".local")
                .join("share")
                .join("qcrawl")
                .join("activity.jsonl"),
            fallback_log: None,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self { throttle_ms: 250 }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[QC-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        home_dir().join(".config").join("qcrawl").join("config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|e| QcError::io(&path_buf, e))?;
            toml::from_str(&raw)?
        } else if path.is_some() {
            return Err(QcError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over canonical JSON, stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // crawl
        if let Some(raw) = lookup("QC_CRAWL_ROOT") {
            self.crawl.root = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("QC_CRAWL_EXCLUDED_PATHS") {
            self.crawl.excluded_paths = env::split_paths(&raw).collect();
        }
        if let Some(raw) = lookup("QC_CRAWL_FOLLOW_SYMLINKS") {
            self.crawl.follow_symlinks = parse_env_bool("QC_CRAWL_FOLLOW_SYMLINKS", &raw)?;
        }

        // checkpoint
        if let Some(raw) = lookup("QC_CHECKPOINT_PATH") {
            self.checkpoint.path = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("QC_CHECKPOINT_SAVE_EVERY") {
            self.checkpoint.save_every = parse_env_usize("QC_CHECKPOINT_SAVE_EVERY", &raw)?;
        }

        // classifier
        if let Some(raw) = lookup("QC_CLASSIFIER_KIND") {
            self.classifier.kind = parse_env_kind("QC_CLASSIFIER_KIND", &raw)?;
        }
        if let Some(raw) = lookup("QC_CLASSIFIER_PARALLELISM") {
            self.classifier.parallelism = parse_env_usize("QC_CLASSIFIER_PARALLELISM", &raw)?;
        }

        // quarantine
        if let Some(raw) = lookup("QC_QUARANTINE_DESTINATION_ROOT") {
            self.quarantine.destination_root = Some(PathBuf::from(raw));
        }

        // logging
        if let Some(raw) = lookup("QC_LOGGING_ENABLED") {
            self.logging.enabled = parse_env_bool("QC_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("QC_LOGGING_JSONL_LOG") {
            self.logging.jsonl_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("QC_LOGGING_FALLBACK_LOG") {
            self.logging.fallback_log = Some(PathBuf::from(raw));
        }

        // progress
        if let Some(raw) = lookup("QC_PROGRESS_THROTTLE_MS") {
            self.progress.throttle_ms = parse_env_u64("QC_PROGRESS_THROTTLE_MS", &raw)?;
        }

        Ok(())
    }

    /// Check the effective configuration. Called again by the CLI after
    /// flags are merged.
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.save_every == 0 {
            return Err(QcError::InvalidConfig {
                details: "checkpoint.save_every must be >= 1".to_string(),
            });
        }
        if self.classifier.parallelism == 0 {
            return Err(QcError::InvalidConfig {
                details: "classifier.parallelism must be >= 1".to_string(),
            });
        }
        if self.progress.throttle_ms == 0 {
            return Err(QcError::InvalidConfig {
                details: "progress.throttle_ms must be >= 1".to_string(),
            });
        }

        if let (Some(root), Some(destination)) =
            (&self.crawl.root, &self.quarantine.destination_root)
        {
            let root = resolve_absolute_path(root);
            let destination = resolve_absolute_path(destination);
            if is_within(&root, &destination) {
                return Err(QcError::InvalidConfig {
                    details: format!(
                        "quarantine.destination_root {} must not equal or contain crawl.root {}",
                        destination.display(),
                        root.display()
                    ),
                });
            }
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_u64(name: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|error| QcError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim().parse::<usize>().map_err(|error| QcError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim().parse::<bool>().map_err(|error| QcError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_kind(name: &str, raw: &str) -> Result<ClassifierKind> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "signature" => Ok(ClassifierKind::Signature),
        "digest" => Ok(ClassifierKind::Digest),
        other => Err(QcError::ConfigParse {
            context: "env",
            details: format!("{name}={other:?}: expected \"signature\" or \"digest\""),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{ClassifierKind, Config, QcError};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    fn apply(cfg: &mut Config, pairs: &[(&str, &str)]) -> super::Result<()> {
        let vars = vars(pairs);
        cfg.apply_env_overrides_from(|name| vars.get(name).cloned())
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.checkpoint.save_every, 50_000);
        assert_eq!(cfg.classifier.kind, ClassifierKind::Signature);
        assert_eq!(cfg.checkpoint.path, PathBuf::from("qcrawl-state.json"));
    }

    #[test]
    fn zero_save_every_rejected() {
        let mut cfg = Config::default();
        cfg.checkpoint.save_every = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("save_every"));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let mut cfg = Config::default();
        cfg.classifier.parallelism = 0;
        assert!(matches!(
            cfg.validate(),
            Err(QcError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn destination_containing_root_rejected() {
        let mut cfg = Config::default();
        cfg.crawl.root = Some(PathBuf::from("/data/share"));
        cfg.quarantine.destination_root = Some(PathBuf::from("/data"));
        assert!(cfg.validate().is_err());

        cfg.quarantine.destination_root = Some(PathBuf::from("/data/share/"));
        assert!(cfg.validate().is_err());

        cfg.quarantine.destination_root = Some(PathBuf::from("/data/share/quarantine"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        apply(
            &mut cfg,
            &[
                ("QC_CLASSIFIER_KIND", "Digest"),
                ("QC_CHECKPOINT_SAVE_EVERY", "10"),
                ("QC_QUARANTINE_DESTINATION_ROOT", "/q"),
                ("QC_LOGGING_ENABLED", "false"),
            ],
        )
        .unwrap();
        assert_eq!(cfg.classifier.kind, ClassifierKind::Digest);
        assert_eq!(cfg.checkpoint.save_every, 10);
        assert_eq!(cfg.quarantine.destination_root, Some(PathBuf::from("/q")));
        assert!(!cfg.logging.enabled);
    }

    #[test]
    fn env_invalid_number_rejected() {
        let mut cfg = Config::default();
        let err = apply(&mut cfg, &[("QC_CLASSIFIER_PARALLELISM", "many")]).unwrap_err();
        assert!(matches!(err, QcError::ConfigParse { context: "env", .. }));
    }

    #[test]
    fn env_invalid_kind_rejected() {
        let mut cfg = Config::default();
        assert!(apply(&mut cfg, &[("QC_CLASSIFIER_KIND", "md5")]).is_err());
    }

    #[test]
    fn toml_sections_parse() {
        let cfg: Config = toml::from_str(
            r#"
            [crawl]
            root = "/srv/files"
            excluded_paths = ["/srv/files/tmp"]

            [classifier]
            kind = "digest"
            parallelism = 4

            [progress]
            throttle_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(cfg.crawl.root, Some(PathBuf::from("/srv/files")));
        assert_eq!(cfg.classifier.kind, ClassifierKind::Digest);
        assert_eq!(cfg.classifier.parallelism, 4);
        assert_eq!(cfg.progress.throttle_ms, 100);
        assert_eq!(cfg.checkpoint.save_every, 50_000);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let err = Config::load(Some(Path::new("/nonexistent/qcrawl/config.toml"))).unwrap_err();
        assert!(matches!(err, QcError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[checkpoint]\nsave_every = 7\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.checkpoint.save_every, 7);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let before = cfg.stable_hash().unwrap();
        assert_eq!(before, cfg.stable_hash().unwrap());

        let mut changed = cfg.clone();
        changed.classifier.kind = ClassifierKind::Digest;
        assert_ne!(before, changed.stable_hash().unwrap());
    }
}
