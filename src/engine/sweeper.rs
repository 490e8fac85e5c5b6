use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::transient::TransientCache;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::models::{is_object_id, ResourceUri, TestObject};
use crate::store::TestObjectStore;
use crate::utils::time::{format_utc, next_anchor, parse_anchor};
use crate::utils::{Clock, SecurePathResolver};

/// Schedule of the daily sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSchedule {
    pub anchor: NaiveTime,
    pub startup_delay: Duration,
    pub lifetime: Duration,
}

impl SweepSchedule {
    /// `None` when the configured lifetime disables sweeping.
    pub fn from_config(config: &IngestConfig) -> Result<Option<Self>, String> {
        config.validate()?;
        if !config.sweeper_enabled() {
            return Ok(None);
        }
        Ok(Some(Self {
            anchor: parse_anchor(&config.sweep_anchor)?,
            startup_delay: Duration::minutes(config.sweep_startup_delay_minutes as i64),
            lifetime: Duration::minutes(config.uploaded_lifetime_expiration_minutes),
        }))
    }

    /// First anchor occurrence once the startup delay has passed.
    pub fn first_run(&self, started: DateTime<Utc>) -> DateTime<Utc> {
        next_anchor(started + self.startup_delay, self.anchor)
    }
}

/// Handle to the background sweep task.
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the task and wait until it has exited. A running sweep is
    /// allowed to finish first.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            log::warn!("Sweeper task ended abnormally: {}", e);
        }
    }
}

/// Start the daily sweep. Runs never overlap.
pub fn spawn_sweeper(
    store: Arc<dyn TestObjectStore>,
    testdata: SecurePathResolver,
    transient: TransientCache,
    clock: Arc<dyn Clock>,
    schedule: SweepSchedule,
) -> SweeperHandle {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    let task = tokio::spawn(async move {
        let mut next_run = schedule.first_run(clock.now());
        log::info!("First test data sweep scheduled at {}", format_utc(next_run));

        loop {
            let wait = (next_run - clock.now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancelled.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            sweep_once(
                store.as_ref(),
                &testdata,
                &transient,
                clock.now(),
                schedule.lifetime,
            )
            .await;
            next_run += Duration::days(1);
        }
        log::debug!("Sweeper stopped");
    });

    SweeperHandle { token, task }
}

/// Reclaim the data of every temporary object older than `lifetime`.
///
/// Object directories below the test data root that belong to neither a
/// stored object nor a live transient one are reclaimed too, once they are
/// older than `lifetime`.
///
/// Returns the number of removed directories. A directory that is already
/// gone counts as removed. Failures are logged and skipped.
pub async fn sweep_once(
    store: &dyn TestObjectStore,
    testdata: &SecurePathResolver,
    transient: &TransientCache,
    now: DateTime<Utc>,
    lifetime: Duration,
) -> usize {
    if lifetime <= Duration::zero() {
        return 0;
    }
    let Some(cutoff) = now.checked_sub_signed(lifetime) else {
        return 0;
    };

    let expired = match store.get_temporary_created_before(cutoff).await {
        Ok(objects) => objects,
        Err(e) => {
            log::warn!("Sweep could not list expired test objects: {}", e);
            return 0;
        }
    };

    let mut removed = 0;
    for object in &expired {
        removed += reclaim_object(store, testdata, object).await;
    }
    removed += reclaim_orphans(store, testdata, transient, cutoff).await;

    log::info!("{} items were cleaned", removed);
    removed
}

async fn reclaim_object(
    store: &dyn TestObjectStore,
    testdata: &SecurePathResolver,
    object: &TestObject,
) -> usize {
    let id = object.id().unwrap_or_default();
    let mut removed = 0;
    let mut complete = true;

    for resource in &object.resources {
        let ResourceUri::File(path) = &resource.uri else {
            continue;
        };
        let target = match testdata.confine(path) {
            Ok(target) if target != testdata.root() => target,
            _ => {
                log::warn!(
                    "Not removing {:?} of {}: outside of the test data directory",
                    path,
                    id
                );
                complete = false;
                continue;
            }
        };
        match remove_resource_dir(&target) {
            Ok(()) => {
                removed += 1;
                remove_if_empty(target.parent(), testdata.root());
            }
            Err(e) => {
                log::warn!("Failed to remove {:?} of {}: {}", path, id, e);
                complete = false;
            }
        }
    }

    if complete {
        match store.delete(id).await {
            Ok(()) | Err(IngestError::NotFound { .. }) => {}
            Err(e) => log::warn!("Failed to delete expired test object {}: {}", id, e),
        }
    }
    removed
}

/// Remove `<testdata>/<id>` directories left behind by objects that were
/// never stored, e.g. ad hoc objects that expired unused.
async fn reclaim_orphans(
    store: &dyn TestObjectStore,
    testdata: &SecurePathResolver,
    transient: &TransientCache,
    cutoff: DateTime<Utc>,
) -> usize {
    let entries = match fs::read_dir(testdata.root()) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Sweep could not read {:?}: {}", testdata.root(), e);
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if !is_object_id(&name) || !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from);
        if !matches!(modified, Ok(modified) if modified <= cutoff) {
            continue;
        }
        if transient.contains(&name) {
            continue;
        }
        match store.exists(&name).await {
            Ok(false) => {}
            Ok(true) => continue,
            Err(e) => {
                log::warn!("Sweep could not look up {}: {}", name, e);
                continue;
            }
        }

        match remove_resource_dir(&entry.path()) {
            Ok(()) => {
                log::debug!("Removed orphaned test data {}", name);
                removed += 1;
            }
            Err(e) => log::warn!("Failed to remove orphaned test data {}: {}", name, e),
        }
    }
    removed
}

fn remove_resource_dir(path: &Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Remove the per-object directory once its last resource is gone.
fn remove_if_empty(dir: Option<&Path>, root: &Path) {
    let Some(dir) = dir else { return };
    if dir == root || !dir.starts_with(root) {
        return;
    }
    let empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    if empty {
        let _ = fs::remove_dir(dir);
    }
}
