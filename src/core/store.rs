//! Persistence hooks called by the execution paths.
//!
//! `execute` claims the host through [`RecordStore::begin_run`] as it enters
//! `pending` and saves it again after the terminal state. Lifecycle actions
//! save the application after each action.

use crate::application::ManagedApplication;
use crate::config::{self, ConfigEntity, MergeResult};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::paths;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

const CLAIM_WAIT: Duration = Duration::from_secs(2);
const CLAIM_POLL: Duration = Duration::from_millis(25);

pub trait RecordStore: Send + Sync {
    /// Persist `host` as it enters `pending`, unless the stored copy is
    /// already `pending` and `force` is off. Returns whether the run was
    /// claimed. The check and the write happen as one step.
    fn begin_run(&self, host: &Host, _force: bool) -> Result<bool> {
        self.save_host(host).map(|()| true)
    }

    fn save_host(&self, host: &Host) -> Result<()>;
    fn save_application(&self, application: &ManagedApplication) -> Result<()>;
}

impl<S: RecordStore + ?Sized> RecordStore for Arc<S> {
    fn begin_run(&self, host: &Host, force: bool) -> Result<bool> {
        (**self).begin_run(host, force)
    }

    fn save_host(&self, host: &Host) -> Result<()> {
        (**self).save_host(host)
    }

    fn save_application(&self, application: &ManagedApplication) -> Result<()> {
        (**self).save_application(application)
    }
}

/// Records as JSON files under a config root.
#[derive(Debug, Clone)]
pub struct JsonStore {
    root: PathBuf,
}

impl JsonStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `$DATACENTER_HOME` or the per-user config directory.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(crate::paths::root()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load<T: ConfigEntity>(&self, id: &str) -> Result<T> {
        config::load(&self.root, id)
    }

    pub fn list<T: ConfigEntity>(&self) -> Result<Vec<T>> {
        config::list(&self.root)
    }

    pub fn exists<T: ConfigEntity>(&self, id: &str) -> bool {
        config::exists::<T>(&self.root, id)
    }

    pub fn save<T: ConfigEntity>(&self, entity: &T) -> Result<()> {
        config::save(&self.root, entity)
    }

    pub fn create<T: ConfigEntity>(&self, json_spec: &str) -> Result<T> {
        config::create(&self.root, json_spec)
    }

    pub fn merge<T: ConfigEntity>(&self, id: &str, json_spec: &str) -> Result<MergeResult> {
        config::merge::<T>(&self.root, id, json_spec)
    }

    pub fn delete<T: ConfigEntity>(&self, id: &str) -> Result<()> {
        config::delete::<T>(&self.root, id)
    }
}

/// Marker file held while a host's stored state is checked and claimed.
/// Other processes wait on it; it is removed on drop.
struct ClaimLock {
    path: PathBuf,
}

impl ClaimLock {
    fn acquire(root: &Path, host_id: &str) -> Result<Self> {
        let dir = paths::entity_dir(root, Host::dir_name());
        fs::create_dir_all(&dir)
            .map_err(|e| Error::internal_io(e.to_string(), Some("create directory".to_string())))?;
        let path = dir.join(format!("{}.lock", host_id));

        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= CLAIM_WAIT {
                        return Err(Error::host_busy(host_id).with_hint(format!(
                            "Remove {} if no other datacenter process is running",
                            path.display()
                        )));
                    }
                    thread::sleep(CLAIM_POLL);
                }
                Err(e) => {
                    return Err(Error::internal_io(
                        e.to_string(),
                        Some(format!("lock {}", path.display())),
                    ))
                }
            }
        }
    }
}

impl Drop for ClaimLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("Failed to release {}: {}", self.path.display(), err);
        }
    }
}

impl RecordStore for JsonStore {
    fn begin_run(&self, host: &Host, force: bool) -> Result<bool> {
        config::validate_id(&host.id)?;
        let _lock = ClaimLock::acquire(&self.root, &host.id)?;

        if !force && self.exists::<Host>(&host.id) {
            let stored: Host = self.load(&host.id)?;
            if stored.is_busy() {
                log::debug!("Host '{}' is already pending on disk", host.id);
                return Ok(false);
            }
        }

        self.save(host)?;
        Ok(true)
    }

    fn save_host(&self, host: &Host) -> Result<()> {
        self.save(host)
    }

    fn save_application(&self, application: &ManagedApplication) -> Result<()> {
        self.save(application)
    }
}

/// Keeps every saved snapshot in order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    hosts: Mutex<Vec<Host>>,
    applications: Mutex<Vec<ManagedApplication>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host_snapshots(&self) -> Vec<Host> {
        lock(&self.hosts).clone()
    }

    pub fn application_snapshots(&self) -> Vec<ManagedApplication> {
        lock(&self.applications).clone()
    }
}

impl RecordStore for MemoryStore {
    /// Refuses when the latest snapshot of the same host is `pending`.
    fn begin_run(&self, host: &Host, force: bool) -> Result<bool> {
        let mut hosts = lock(&self.hosts);
        let in_flight = hosts
            .iter()
            .rev()
            .find(|h| h.id == host.id)
            .is_some_and(Host::is_busy);
        if in_flight && !force {
            return Ok(false);
        }
        hosts.push(host.clone());
        Ok(true)
    }

    fn save_host(&self, host: &Host) -> Result<()> {
        lock(&self.hosts).push(host.clone());
        Ok(())
    }

    fn save_application(&self, application: &ManagedApplication) -> Result<()> {
        lock(&self.applications).push(application.clone());
        Ok(())
    }
}

/// Discards saves. For one-off runs against records that live elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl RecordStore for NullStore {
    fn save_host(&self, _host: &Host) -> Result<()> {
        Ok(())
    }

    fn save_application(&self, _application: &ManagedApplication) -> Result<()> {
        Ok(())
    }
}
