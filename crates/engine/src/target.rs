//! Target identity and persisted configuration
//!
//! A target is a directory holding replicated snapshots plus a
//! `snapsync.config` file. The file is the single source of truth for the
//! target's UUID, policy pair and flags: nothing survives a process restart
//! outside of it.

use crate::policy::SyncPolicy;
use serde::{Deserialize, Serialize};
use snapsync_core::{Driver, Error, Result, SnapshotRecord, SnapshotStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CONFIG_FILE: &str = "snapsync.config";

fn default_true() -> bool {
    true
}

/// Persisted policy section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PolicyConfig {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    options: Vec<String>,
}

/// On-disk target configuration (`snapsync.config`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetConfig {
    uuid: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_true")]
    autoclean: bool,
    policy: PolicyConfig,
}

/// A replication target rooted at a directory
pub struct Target {
    dir: PathBuf,
    uuid: String,
    sync_policy: SyncPolicy,
    cleanup_policy: Option<SyncPolicy>,
    enabled: bool,
    autoclean: bool,
    store: SnapshotStore,
    driver: Arc<dyn Driver>,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("dir", &self.dir)
            .field("uuid", &self.uuid)
            .field("sync_policy", &self.sync_policy)
            .field("cleanup_policy", &self.cleanup_policy)
            .field("enabled", &self.enabled)
            .field("autoclean", &self.autoclean)
            .finish_non_exhaustive()
    }
}

impl Target {
    /// Open the target rooted at `dir`, initializing it when allowed
    ///
    /// An absent, empty or UUID-invalid config file means the directory was
    /// never initialized. With `create_if_needed` a fresh v4 UUID is minted
    /// and the default configuration persisted; otherwise
    /// [`Error::NeedsInitialization`] is returned.
    pub fn open(dir: &Path, driver: Arc<dyn Driver>, create_if_needed: bool) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::NeedsInitialization(dir.to_path_buf()));
        }
        match Self::load(dir, Arc::clone(&driver)) {
            Err(Error::NeedsInitialization(_)) if create_if_needed => {
                Self::initialize(dir, driver)
            }
            other => other,
        }
    }

    fn load(dir: &Path, driver: Arc<dyn Driver>) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let raw = match std::fs::read_to_string(&config_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NeedsInitialization(dir.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Err(Error::NeedsInitialization(dir.to_path_buf()));
        }

        let config: TargetConfig = toml::from_str(&raw).map_err(|e| {
            Error::InvalidConfiguration(format!("{}: {}", config_path.display(), e))
        })?;
        if config.uuid.len() != 36 {
            // Same treatment as an absent file: the identity was never
            // properly minted, so the target can be reinitialized
            return Err(Error::NeedsInitialization(dir.to_path_buf()));
        }

        let (sync_policy, cleanup_policy) =
            SyncPolicy::parse(&config.policy.kind, &config.policy.options)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            uuid: config.uuid,
            sync_policy,
            cleanup_policy,
            enabled: config.enabled,
            autoclean: config.autoclean,
            store: SnapshotStore::new(dir),
            driver,
        })
    }

    fn initialize(dir: &Path, driver: Arc<dyn Driver>) -> Result<Self> {
        let uuid = uuid::Uuid::new_v4().to_string();
        tracing::info!("initializing target {} with uuid {}", dir.display(), uuid);
        let (sync_policy, cleanup_policy) = SyncPolicy::parse("default", &[])?;
        let target = Self {
            dir: dir.to_path_buf(),
            uuid,
            sync_policy,
            cleanup_policy,
            enabled: true,
            autoclean: true,
            store: SnapshotStore::new(dir),
            driver,
        };
        target.write_config()?;
        Ok(target)
    }

    /// Persist the current configuration
    pub fn write_config(&self) -> Result<()> {
        let config = TargetConfig {
            uuid: self.uuid.clone(),
            enabled: self.enabled,
            autoclean: self.autoclean,
            policy: PolicyConfig {
                kind: self.sync_policy.kind().to_string(),
                options: self.sync_policy.to_config(),
            },
        };
        let raw = toml::to_string_pretty(&config)
            .map_err(|e| Error::InvalidConfiguration(e.to_string()))?;
        std::fs::write(self.config_path(), raw)?;
        Ok(())
    }

    /// Validate and persist a new policy pair
    pub fn change_policy(&mut self, kind: &str, options: &[String]) -> Result<()> {
        let (sync_policy, cleanup_policy) = SyncPolicy::parse(kind, options)?;
        self.sync_policy = sync_policy;
        self.cleanup_policy = cleanup_policy;
        self.write_config()
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn sync_policy(&self) -> &SyncPolicy {
        &self.sync_policy
    }

    /// The cleanup policy, when the sync policy has a cleanup counterpart
    pub fn cleanup_policy(&self) -> Option<&SyncPolicy> {
        self.cleanup_policy.as_ref()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn autoclean(&self) -> bool {
        self.autoclean
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Human-readable identification used in log lines
    pub fn description(&self) -> String {
        format!("local:{}", self.dir.display())
    }

    pub fn each_snapshot(&self) -> Result<Vec<SnapshotRecord>> {
        self.store.each_snapshot()
    }

    /// Delete one replicated snapshot
    ///
    /// The backing subvolume goes first. If the driver fails there, the
    /// metadata directory is left in place so the deletion can be retried,
    /// and the failure is reported through the return value.
    pub fn delete(&self, snapshot: &SnapshotRecord, dry_run: bool) -> Result<()> {
        if dry_run {
            tracing::info!(
                "would remove snapshot {} from {}",
                snapshot.num(),
                self.description()
            );
            return Ok(());
        }
        tracing::info!(
            "removing snapshot {} from {}",
            snapshot.num(),
            self.description()
        );
        self.driver.delete_subvolume(&snapshot.subvolume_dir())?;
        std::fs::remove_dir_all(snapshot.snapshot_dir())?;
        Ok(())
    }

    /// Delete every snapshot, then the config file and the directory itself
    pub fn destroy(self, dry_run: bool) -> Result<()> {
        for raw in self.store.each_snapshot_raw()? {
            match raw {
                snapsync_core::RawSnapshot::Valid(snapshot) => {
                    if let Err(e) = self.delete(&snapshot, dry_run) {
                        tracing::warn!(
                            "could not remove snapshot {}: {}",
                            snapshot.num(),
                            e
                        );
                    }
                }
                snapsync_core::RawSnapshot::Invalid { path, .. } => {
                    if dry_run {
                        tracing::info!("would remove invalid entry {}", path.display());
                    } else if let Err(e) = remove_entry(self.driver.as_ref(), &path) {
                        tracing::warn!("could not remove {}: {}", path.display(), e);
                    }
                }
            }
        }
        if dry_run {
            tracing::info!("would remove target {}", self.dir.display());
            return Ok(());
        }
        std::fs::remove_file(self.config_path())?;
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

/// Best-effort removal of a broken snapshot entry: subvolume first when one
/// exists, then the directory
pub(crate) fn remove_entry(driver: &dyn Driver, path: &Path) -> Result<()> {
    let subvolume = path.join("snapshot");
    if subvolume.is_dir() {
        driver.delete_subvolume(&subvolume)?;
    }
    std::fs::remove_dir_all(path)?;
    Ok(())
}
