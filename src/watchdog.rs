use crate::state::GROUPS_FILE;
use anyhow::{Context, Result};
use notify::{
    event::{CreateKind, ModifyKind},
    Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc,
    },
    thread,
    time::Duration,
};
use tracing::{debug, warn};

pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Watches the instances directory and calls back after out-of-band changes.
///
/// The worker thread stops once the watchdog is dropped.
pub struct Watchdog {
    suppressed: Arc<AtomicUsize>,
    _watcher: RecommendedWatcher,
}

impl Watchdog {
    pub fn start<F>(directory: &Path, callback: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let suppressed = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel::<Event>();

        let filter_flag = suppressed.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant(&event, filter_flag.load(Ordering::SeqCst) > 0) {
                    let _ = tx.send(event);
                }
            }
            Err(err) => warn!("watch error: {err}"),
        })
        .context("create directory watcher")?;
        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", directory.display()))?;

        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    debug!("{:?} {:?}", event.kind, event.paths);
                    thread::sleep(DEBOUNCE);
                    let extra = rx.try_iter().count();
                    if extra > 0 {
                        debug!("coalesced {extra} more events");
                    }
                    callback();
                }
                debug!("watchdog thread stopped");
            })
            .context("spawn watchdog thread")?;
        debug!("watchdog started on {}", directory.display());

        Ok(Self {
            suppressed,
            _watcher: watcher,
        })
    }

    /// Ignores directory-created events until the guard is dropped.
    /// Deletions and moves stay tracked.
    pub fn suppress_dir_created(&self) -> SuppressGuard {
        SuppressGuard::new(self.suppressed.clone())
    }
}

pub struct SuppressGuard {
    counter: Arc<AtomicUsize>,
}

impl SuppressGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for SuppressGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Directory creation (unless suppressed), removals and renames. Writes of
/// the groups index are never relevant.
pub fn is_relevant(event: &Event, suppress_created: bool) -> bool {
    if !event.paths.is_empty() && event.paths.iter().all(|path| is_index_file(path)) {
        return false;
    }
    match event.kind {
        EventKind::Create(CreateKind::Folder) => !suppress_created,
        EventKind::Create(CreateKind::Any) => {
            !suppress_created && event.paths.iter().any(|path| path.is_dir())
        }
        EventKind::Remove(_) => true,
        EventKind::Modify(ModifyKind::Name(_)) => true,
        _ => false,
    }
}

fn is_index_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(GROUPS_FILE))
        .unwrap_or(false)
}
