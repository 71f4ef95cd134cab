use crate::config::{StorageSettings, WatchSettings};
use crate::error::Result;
use crate::node::{NodeId, NodeTree};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// A debounced change to a tracked file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// The kind of file change detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Net effect of `self` followed by `next` on the same path.
    /// `None` means the path came and went within one quiet period.
    fn then(self, next: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::*;
        match (self, next) {
            (Created, Deleted) => None,
            (Created, _) => Some(Created),
            (Deleted, Created) => Some(Modified),
            (_, next) => Some(next),
        }
    }
}

/// Watches opened directories and files for changes made outside the tree.
/// Debounced events arrive on `event_rx`; feed them to
/// [`NodeTree::apply_change`] on the thread that owns the tree.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    _thread: std::thread::JoinHandle<()>,
    pub event_rx: mpsc::Receiver<WatcherEvent>,
}

impl FileWatcher {
    pub fn start(paths: &[PathBuf], storage: &StorageSettings, watch: &WatchSettings) -> Result<Self> {
        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let (event_tx, event_rx) = mpsc::channel::<WatcherEvent>();

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = notify_tx.send(res);
            },
            Config::default(),
        )?;

        for path in paths {
            if !path.exists() {
                log::warn!("Not watching missing path {}", path.display());
                continue;
            }
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher.watch(path, mode)?;
            log::debug!("Watching {}", path.display());
        }

        let mut debouncer = Debouncer::new(Tracked::new(storage));
        let quiet = Duration::from_millis(watch.debounce_ms);
        let thread = std::thread::spawn(move || loop {
            match notify_rx.recv_timeout(quiet) {
                Ok(Ok(event)) => debouncer.record(event),
                Ok(Err(e)) => log::warn!("File watcher error: {e}"),
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if debouncer.is_quiet(quiet) {
                        for change in debouncer.drain() {
                            if event_tx.send(change).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        });

        Ok(FileWatcher {
            _watcher: watcher,
            _thread: thread,
            event_rx,
        })
    }
}

/// Folds raw notify events into one net change per path, in the order
/// paths were first touched.
struct Debouncer {
    tracked: Tracked,
    order: Vec<PathBuf>,
    pending: HashMap<PathBuf, Option<ChangeKind>>,
    last_event: Instant,
}

impl Debouncer {
    fn new(tracked: Tracked) -> Self {
        Debouncer {
            tracked,
            order: Vec::new(),
            pending: HashMap::new(),
            last_event: Instant::now(),
        }
    }

    fn record(&mut self, event: Event) {
        self.last_event = Instant::now();
        let changes: Vec<(PathBuf, ChangeKind)> = match event.kind {
            EventKind::Create(_) => tag(event.paths, ChangeKind::Created),
            // A rename is the old name vanishing and the new one appearing
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                paths
                    .next()
                    .map(|from| (from, ChangeKind::Deleted))
                    .into_iter()
                    .chain(paths.map(|to| (to, ChangeKind::Created)))
                    .collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                tag(event.paths, ChangeKind::Deleted)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                tag(event.paths, ChangeKind::Created)
            }
            EventKind::Modify(_) => tag(event.paths, ChangeKind::Modified),
            EventKind::Remove(_) => tag(event.paths, ChangeKind::Deleted),
            _ => Vec::new(),
        };
        for (path, kind) in changes {
            if self.tracked.matches(&path, kind) {
                self.push(path, kind);
            }
        }
    }

    fn push(&mut self, path: PathBuf, kind: ChangeKind) {
        match self.pending.get_mut(&path) {
            Some(slot) => {
                *slot = match *slot {
                    Some(previous) => previous.then(kind),
                    None => Some(kind),
                };
            }
            None => {
                self.order.push(path.clone());
                self.pending.insert(path, Some(kind));
            }
        }
    }

    fn is_quiet(&self, quiet: Duration) -> bool {
        !self.order.is_empty() && self.last_event.elapsed() >= quiet
    }

    fn drain(&mut self) -> Vec<WatcherEvent> {
        let mut pending = std::mem::take(&mut self.pending);
        self.order
            .drain(..)
            .filter_map(|path| {
                let kind = pending.remove(&path)??;
                Some(WatcherEvent { path, kind })
            })
            .collect()
    }
}

fn tag(paths: Vec<PathBuf>, kind: ChangeKind) -> Vec<(PathBuf, ChangeKind)> {
    paths.into_iter().map(|p| (p, kind)).collect()
}

/// Paths worth reporting: files the storage can open, and directories
/// (a directory appearing or vanishing changes its parent's listing).
struct Tracked {
    extensions: Vec<String>,
}

impl Tracked {
    fn new(storage: &StorageSettings) -> Self {
        Tracked {
            extensions: storage
                .data_extensions
                .iter()
                .chain(&storage.archive_extensions)
                .map(|e| e.to_ascii_lowercase())
                .collect(),
        }
    }

    fn matches(&self, path: &Path, kind: ChangeKind) -> bool {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.contains(&ext.to_ascii_lowercase()),
            // Directory contents changing show up on the files themselves
            None => match kind {
                ChangeKind::Created => path.is_dir(),
                ChangeKind::Deleted => true,
                ChangeKind::Modified => false,
            },
        }
    }
}

impl NodeTree {
    /// Refresh whatever node a file change affects: the file's own node
    /// when it was modified, its directory when it appeared or vanished.
    /// Returns the refreshed node, if any was open.
    pub fn apply_change(&mut self, change: &WatcherEvent) -> Result<Option<NodeId>> {
        let target = match change.kind {
            ChangeKind::Modified => self.container_for_path(&change.path),
            ChangeKind::Created | ChangeKind::Deleted => change
                .path
                .parent()
                .and_then(|dir| self.container_for_path(dir)),
        };
        match target {
            Some(node) if self.capabilities(node).refresh => {
                self.refresh(node)?;
                Ok(Some(node))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::test_support::*;
    use crate::storage::{FsStorage, Storage};
    use crate::value::{Compound, NodeValue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tracked_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        let tracked = Tracked::new(&StorageSettings::default());
        assert!(tracked.matches(Path::new("/w/level.json"), ChangeKind::Modified));
        assert!(tracked.matches(Path::new("/w/r.0.0.JSONL"), ChangeKind::Created));
        assert!(!tracked.matches(Path::new("/w/notes.txt"), ChangeKind::Created));
        assert!(tracked.matches(tmp.path(), ChangeKind::Created));
        assert!(!tracked.matches(tmp.path(), ChangeKind::Modified));
        assert!(tracked.matches(Path::new("/w/gone"), ChangeKind::Deleted));
    }

    fn raw(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, p| event.add_path(PathBuf::from(*p)))
    }

    #[test]
    fn test_debouncer_folds_changes_per_path() {
        use notify::event::{CreateKind, DataChange, RemoveKind};

        let mut debouncer = Debouncer::new(Tracked::new(&StorageSettings::default()));
        let modify = || EventKind::Modify(ModifyKind::Data(DataChange::Content));
        debouncer.record(raw(modify(), &["/w/a.json"]));
        debouncer.record(raw(EventKind::Create(CreateKind::File), &["/w/b.json"]));
        debouncer.record(raw(modify(), &["/w/b.json", "/w/a.json"]));
        debouncer.record(raw(EventKind::Create(CreateKind::File), &["/w/tmp.json"]));
        debouncer.record(raw(EventKind::Remove(RemoveKind::File), &["/w/tmp.json"]));
        debouncer.record(raw(EventKind::Remove(RemoveKind::File), &["/w/c.json"]));
        debouncer.record(raw(EventKind::Create(CreateKind::File), &["/w/c.json"]));
        debouncer.record(raw(modify(), &["/w/notes.txt"]));

        assert!(debouncer.is_quiet(Duration::ZERO));
        let changes: Vec<(String, ChangeKind)> = debouncer
            .drain()
            .into_iter()
            .map(|e| (e.path.display().to_string(), e.kind))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("/w/a.json".to_string(), ChangeKind::Modified),
                ("/w/b.json".to_string(), ChangeKind::Created),
                ("/w/c.json".to_string(), ChangeKind::Modified),
            ]
        );
        assert!(!debouncer.is_quiet(Duration::ZERO));
    }

    #[test]
    fn test_debouncer_splits_renames() {
        let mut debouncer = Debouncer::new(Tracked::new(&StorageSettings::default()));
        debouncer.record(raw(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/old.json", "/w/new.json"],
        ));
        assert_eq!(
            debouncer.drain(),
            vec![
                WatcherEvent {
                    path: PathBuf::from("/w/old.json"),
                    kind: ChangeKind::Deleted,
                },
                WatcherEvent {
                    path: PathBuf::from("/w/new.json"),
                    kind: ChangeKind::Created,
                },
            ]
        );
    }

    #[test]
    fn test_apply_created_and_deleted() {
        let (tmp, mut tree, world) = setup_world();
        tree.expand(world).unwrap();
        let world_dir = tmp.path().join("world");

        let created = world_dir.join("new.json");
        std::fs::write(&created, "{}").unwrap();
        let refreshed = tree
            .apply_change(&WatcherEvent {
                path: created,
                kind: ChangeKind::Created,
            })
            .unwrap();
        assert_eq!(refreshed, Some(world));
        assert_eq!(names(&tree, world), vec!["region", "level.json", "new.json"]);

        let deleted = world_dir.join("level.json");
        std::fs::remove_file(&deleted).unwrap();
        tree.apply_change(&WatcherEvent {
            path: deleted,
            kind: ChangeKind::Deleted,
        })
        .unwrap();
        assert_eq!(names(&tree, world), vec!["region", "new.json"]);
    }

    #[test]
    fn test_apply_modified_refreshes_file() {
        let (tmp, mut tree, _world) = setup_world();
        let level = tree.find_by_path("world/level.json").unwrap().unwrap();
        tree.expand(level).unwrap();

        let path = tmp.path().join("world").join("level.json");
        FsStorage::new()
            .write_file(&path, &Compound::new().with("hp", NodeValue::Int(1)))
            .unwrap();
        let refreshed = tree
            .apply_change(&WatcherEvent {
                path,
                kind: ChangeKind::Modified,
            })
            .unwrap();

        assert_eq!(refreshed, Some(level));
        assert_eq!(names(&tree, level), vec!["hp"]);
        let hp = child_named(&tree, level, "hp");
        assert_eq!(tree.value(hp), Some(&NodeValue::Int(1)));
    }

    #[test]
    fn test_apply_change_outside_tree_is_ignored() {
        let (tmp, mut tree, _world) = setup_world();
        let other = tmp.path().join("elsewhere").join("x.json");
        let refreshed = tree
            .apply_change(&WatcherEvent {
                path: other,
                kind: ChangeKind::Modified,
            })
            .unwrap();
        assert_eq!(refreshed, None);
    }

    #[test]
    fn test_start_watching_opened_paths() {
        let (tmp, _tree, _world) = setup_world();
        let watcher = FileWatcher::start(
            &[tmp.path().join("world"), tmp.path().join("missing")],
            &StorageSettings::default(),
            &WatchSettings::default(),
        );
        assert!(watcher.is_ok());
    }
}
