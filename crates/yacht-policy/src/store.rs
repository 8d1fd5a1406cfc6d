//! Shared, hot-swappable policy state.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use yacht_core::PolicyConfig;

use crate::error::PolicyError;
use crate::ruleset::Ruleset;

/// What one decision (or batch of decisions) is evaluated against.
///
/// Captured once per submitted command so a concurrent reload or mooring
/// toggle never splits a batch across two policies.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub ruleset: Arc<Ruleset>,
    pub moored: bool,
}

/// Result of a successful reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub version: u64,
    pub tables: usize,
}

/// Process-wide policy: the current ruleset and the mooring flag.
///
/// Readers never block writers. A ruleset is swapped in whole or not at all.
pub struct PolicyStore {
    ruleset: ArcSwap<Ruleset>,
    moored: AtomicBool,
    next_version: AtomicU64,
    source: Option<PathBuf>,
}

impl PolicyStore {
    /// Build a store from an already loaded policy. `source` is the file to
    /// re-read on reload, if the policy came from one.
    pub fn new(config: &PolicyConfig, source: Option<PathBuf>) -> Result<Self, PolicyError> {
        let ruleset = Ruleset::from_config(config, 1)?;
        Ok(Self {
            ruleset: ArcSwap::from_pointee(ruleset),
            moored: AtomicBool::new(config.mooring),
            next_version: AtomicU64::new(2),
            source,
        })
    }

    /// Load the policy file and build a store that reloads from it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let config = PolicyConfig::from_file(path)?;
        Self::new(&config, Some(path.to_path_buf()))
    }

    pub fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            ruleset: self.ruleset.load_full(),
            moored: self.moored.load(Ordering::Acquire),
        }
    }

    pub fn ruleset(&self) -> Arc<Ruleset> {
        self.ruleset.load_full()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Re-read the policy file and swap it in. On any error the current
    /// ruleset stays in force. The mooring flag is left alone.
    pub fn reload(&self) -> Result<ReloadSummary, PolicyError> {
        let path = self.source.as_ref().ok_or(PolicyError::NoSource)?;
        let config = PolicyConfig::from_file(path).inspect_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Policy reload rejected; keeping current ruleset");
        })?;
        self.replace(&config)
    }

    /// Swap in a ruleset built from `config`.
    pub fn replace(&self, config: &PolicyConfig) -> Result<ReloadSummary, PolicyError> {
        let version = self.next_version.fetch_add(1, Ordering::AcqRel);
        let ruleset = Ruleset::from_config(config, version)?;
        let summary = ReloadSummary {
            version,
            tables: ruleset.len(),
        };
        self.ruleset.store(Arc::new(ruleset));
        tracing::info!(version, tables = summary.tables, "Policy ruleset swapped");
        Ok(summary)
    }

    pub fn is_moored(&self) -> bool {
        self.moored.load(Ordering::Acquire)
    }

    /// Set the mooring flag, returning the previous value.
    pub fn set_moored(&self, moored: bool) -> bool {
        let previous = self.moored.swap(moored, Ordering::AcqRel);
        if previous != moored {
            tracing::info!(moored, "Mooring flag changed");
        }
        previous
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("version", &self.ruleset.load().version())
            .field("moored", &self.is_moored())
            .field("source", &self.source)
            .finish()
    }
}
