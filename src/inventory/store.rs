//! Inventory persistence

use super::Inventory;
use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Inventory file name inside the working directory
pub const NODES_FILE_NAME: &str = "nodes.yml";

/// Reads and writes the inventory file of one working directory.
///
/// There is no locking; only one command may run against a working
/// directory at a time.
#[derive(Debug, Clone)]
pub struct InventoryStore {
    /// Path to the inventory file
    path: PathBuf,
}

impl InventoryStore {
    /// Create a store for the given working directory
    pub fn new(working_dir: &Path) -> Self {
        Self {
            path: working_dir.join(NODES_FILE_NAME),
        }
    }

    /// Get the inventory file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the inventory, creating an empty file if none exists
    pub fn load(&self) -> Result<Inventory> {
        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            write_private(&self.path, b"")?;
            tracing::debug!("Created empty inventory at {}", self.path.display());
            return Ok(Inventory::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Inventory::new());
        }

        let inventory: Inventory = serde_yaml::from_str(&content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Persist the complete inventory, replacing the file atomically
    pub fn save(&self, inventory: &Inventory) -> Result<()> {
        inventory.validate()?;
        let content = serde_yaml::to_string(inventory)?;

        let tmp = self.path.with_extension("yml.tmp");
        write_private(&tmp, content.as_bytes())?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(
            "Saved {} node(s) to {}",
            inventory.len(),
            self.path.display()
        );
        Ok(())
    }
}

fn write_private(path: &Path, content: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    Ok(())
}
