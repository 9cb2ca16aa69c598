//! Root-keyed supervisor registry
//!
//! Hosts open and close project roots; the registry owns one supervisor per
//! canonicalized root and is the single place supervisors are created and
//! disposed.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::config::SupervisorConfig;
use crate::supervisor::ProcessSupervisor;
use crate::{Error, Result};

/// Registry of supervisors, keyed by canonical project root
pub struct SupervisorRegistry {
    config: SupervisorConfig,
    by_root: RwLock<HashMap<PathBuf, ProcessSupervisor>>,
}

impl SupervisorRegistry {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            by_root: RwLock::new(HashMap::new()),
        }
    }

    /// Validate a root and canonicalize it, resolving symlinks so two
    /// spellings of the same directory share one supervisor
    fn canonicalize_root(root: &Path) -> Result<PathBuf> {
        let canonical = root.canonicalize().map_err(|_| {
            Error::InvalidRoot(format!("Invalid or non-existent root: {:?}", root))
        })?;

        if !canonical.is_dir() {
            return Err(Error::InvalidRoot(format!(
                "Root is not a directory: {:?}",
                root
            )));
        }

        Ok(canonical)
    }

    /// The supervisor for the given root, created on first use
    pub fn for_root(&self, root: &Path) -> Result<ProcessSupervisor> {
        let canonical = Self::canonicalize_root(root)?;

        if let Some(supervisor) = self.by_root.read().get(&canonical) {
            return Ok(supervisor.clone());
        }

        let mut map = self.by_root.write();
        let supervisor = match map.entry(canonical) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                tracing::info!("Creating supervisor for {:?}", entry.key());
                let supervisor =
                    ProcessSupervisor::new(entry.key().clone(), self.config.clone());
                entry.insert(supervisor).clone()
            }
        };

        Ok(supervisor)
    }

    /// Dispose and remove the supervisor for a root, if one exists.
    /// Returns whether a supervisor was removed.
    pub fn dispose_root(&self, root: &Path) -> bool {
        let Ok(canonical) = Self::canonicalize_root(root) else {
            return false;
        };

        if let Some(supervisor) = self.by_root.write().remove(&canonical) {
            supervisor.dispose();
            true
        } else {
            false
        }
    }

    /// Dispose every supervisor in the registry
    pub fn dispose_all(&self) {
        for (_, supervisor) in self.by_root.write().drain() {
            supervisor.dispose();
        }
    }

    /// Number of roots currently tracked
    pub fn len(&self) -> usize {
        self.by_root.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_root.read().is_empty()
    }
}
