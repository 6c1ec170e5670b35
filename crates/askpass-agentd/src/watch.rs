//! Directory watch feeding the scheduler.
//!
//! Translates inotify events (through `notify`) on the ask-password
//! directory into [`WatchEvent`]s. Events are coalesced: once the raw event
//! queue runs dry after at least one [`WatchEvent::Created`], a single
//! [`WatchEvent::Settled`] is emitted, so a burst of new files or the
//! start-up enumeration spawns at most one prompt.
//!
//! The parent directory is watched as well, so the ask-password directory
//! may be created (or recreated) after the agent starts.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use askpass_agent_core::{RequestFile, WatchEvent};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

/// Errors that can occur when setting up the directory watch.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The watcher could not be created or attached.
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// Existing request files could not be listed.
    #[error("failed to list {path}: {source}")]
    Enumerate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Neither the directory nor its parent exist.
    #[error("{0} does not exist and its parent cannot be watched")]
    Missing(PathBuf),
}

/// How a single path changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Appeared,
    Vanished,
}

/// Classify a raw event into per-path changes.
fn classify(event: &Event) -> Vec<(Change, &Path)> {
    let paths = event.paths.iter().map(PathBuf::as_path);
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            paths.map(|p| (Change::Appeared, p)).collect()
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            paths.map(|p| (Change::Vanished, p)).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first() {
                changes.push((Change::Vanished, from.as_path()));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((Change::Appeared, to.as_path()));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .map(|p| {
                let change = if p.exists() {
                    Change::Appeared
                } else {
                    Change::Vanished
                };
                (change, p)
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Whether `path` names a request entry directly inside `directory`.
fn is_request_path(path: &Path, directory: &Path) -> bool {
    path.parent() == Some(directory)
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(RequestFile::is_request_name)
}

fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_file())
}

/// List the request files currently in `directory`, sorted by name.
fn enumerate(directory: &Path) -> Result<Vec<RequestFile>, WatchError> {
    let to_error = |source: io::Error| WatchError::Enumerate {
        path: directory.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(directory).map_err(to_error)? {
        let entry = entry.map_err(to_error)?;
        let is_file = entry.file_type().is_ok_and(|t| t.is_file());
        let name = entry.file_name();
        if is_file && name.to_str().is_some_and(RequestFile::is_request_name) {
            files.push(RequestFile::new(entry.path()));
        }
    }
    files.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(files)
}

/// Watches the ask-password directory.
pub struct DirectoryWatch {
    watcher: RecommendedWatcher,
    raw: mpsc::UnboundedReceiver<notify::Result<Event>>,
    directory: PathBuf,
    attached: bool,
    pending: VecDeque<WatchEvent<RequestFile>>,
    unsettled: bool,
}

impl DirectoryWatch {
    /// Start watching `directory`.
    ///
    /// Request files already present are reported first, followed by
    /// [`WatchEvent::Settled`].
    pub fn start(directory: impl Into<PathBuf>) -> Result<Self, WatchError> {
        let directory = directory.into();
        let (tx, raw) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )
        .map_err(|source| WatchError::Watch {
            path: directory.clone(),
            source,
        })?;

        let mut watch = Self {
            watcher,
            raw,
            directory,
            attached: false,
            pending: VecDeque::new(),
            unsettled: false,
        };

        let parent_watched = match watch.directory.parent() {
            Some(parent) if parent.is_dir() => {
                match watch.watcher.watch(parent, RecursiveMode::NonRecursive) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(path = %parent.display(), error = %e, "Cannot watch parent directory");
                        false
                    }
                }
            }
            _ => false,
        };

        if watch.directory.is_dir() {
            watch.attach()?;
        } else if parent_watched {
            info!(path = %watch.directory.display(), "Waiting for ask-password directory to appear");
        } else {
            return Err(WatchError::Missing(watch.directory));
        }

        Ok(watch)
    }

    /// The watched directory.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Next event, or `None` once the underlying watcher is gone.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<WatchEvent<RequestFile>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, WatchEvent::Created(_)) {
                    self.unsettled = true;
                }
                return Some(event);
            }

            match self.raw.try_recv() {
                Ok(raw) => self.translate(raw),
                Err(TryRecvError::Empty) if self.unsettled => {
                    self.unsettled = false;
                    return Some(WatchEvent::Settled);
                }
                Err(TryRecvError::Empty) => {
                    let raw = self.raw.recv().await?;
                    self.translate(raw);
                }
                Err(TryRecvError::Disconnected) => {
                    if std::mem::take(&mut self.unsettled) {
                        return Some(WatchEvent::Settled);
                    }
                    return None;
                }
            }
        }
    }

    /// Watch the directory itself and queue its current contents.
    fn attach(&mut self) -> Result<(), WatchError> {
        self.watcher
            .watch(&self.directory, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Watch {
                path: self.directory.clone(),
                source,
            })?;
        self.attached = true;

        let existing = enumerate(&self.directory)?;
        info!(
            path = %self.directory.display(),
            existing = existing.len(),
            "Watching ask-password directory"
        );
        self.pending
            .extend(existing.into_iter().map(WatchEvent::Created));
        Ok(())
    }

    fn translate(&mut self, raw: notify::Result<Event>) {
        let event = match raw {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Directory watch error");
                return;
            }
        };

        let mut directory_appeared = false;
        for (change, path) in classify(&event) {
            if path == self.directory {
                match change {
                    Change::Appeared => directory_appeared = !self.attached,
                    Change::Vanished => {
                        info!(path = %path.display(), "Ask-password directory removed");
                        self.attached = false;
                    }
                }
                continue;
            }
            if !is_request_path(path, &self.directory) {
                continue;
            }
            match change {
                Change::Appeared if is_regular_file(path) => {
                    self.pending
                        .push_back(WatchEvent::Created(RequestFile::new(path)));
                }
                Change::Appeared => debug!(path = %path.display(), "Ignoring non-regular entry"),
                Change::Vanished => {
                    self.pending
                        .push_back(WatchEvent::Deleted(RequestFile::new(path)));
                }
            }
        }

        if directory_appeared && self.directory.is_dir() {
            if let Err(e) = self.attach() {
                warn!(error = %e, "Failed to attach to ask-password directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, RemoveKind};
    use std::time::Duration;
    use tempfile::tempdir;

    async fn next(watch: &mut DirectoryWatch) -> WatchEvent<RequestFile> {
        tokio::time::timeout(Duration::from_secs(10), watch.recv())
            .await
            .expect("timed out waiting for watch event")
            .expect("watch ended")
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn classify_create_and_remove() {
        let created = event(EventKind::Create(CreateKind::File), &["/d/ask.1"]);
        assert_eq!(
            classify(&created),
            vec![(Change::Appeared, Path::new("/d/ask.1"))]
        );

        let removed = event(EventKind::Remove(RemoveKind::File), &["/d/ask.1"]);
        assert_eq!(
            classify(&removed),
            vec![(Change::Vanished, Path::new("/d/ask.1"))]
        );
    }

    #[test]
    fn classify_renames() {
        let to = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/d/ask.1"],
        );
        assert_eq!(classify(&to), vec![(Change::Appeared, Path::new("/d/ask.1"))]);

        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/d/ask.1"],
        );
        assert_eq!(
            classify(&from),
            vec![(Change::Vanished, Path::new("/d/ask.1"))]
        );

        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/d/.tmp", "/d/ask.1"],
        );
        assert_eq!(
            classify(&both),
            vec![
                (Change::Vanished, Path::new("/d/.tmp")),
                (Change::Appeared, Path::new("/d/ask.1"))
            ]
        );
    }

    #[test]
    fn classify_ignores_content_changes() {
        let modified = event(
            EventKind::Modify(ModifyKind::Data(notify::event::DataChange::Content)),
            &["/d/ask.1"],
        );
        assert!(classify(&modified).is_empty());
        assert!(classify(&event(EventKind::Any, &["/d/ask.1"])).is_empty());
    }

    #[test]
    fn request_paths_must_be_direct_children() {
        let dir = Path::new("/run/ask-password");
        assert!(is_request_path(Path::new("/run/ask-password/ask.x"), dir));
        assert!(!is_request_path(Path::new("/run/ask-password/sck.x"), dir));
        assert!(!is_request_path(Path::new("/run/ask-password/sub/ask.x"), dir));
        assert!(!is_request_path(Path::new("/run/other/ask.x"), dir));
    }

    #[test]
    fn enumerate_lists_regular_request_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ask.b"), "").unwrap();
        fs::write(dir.path().join("ask.a"), "").unwrap();
        fs::write(dir.path().join("sck.a"), "").unwrap();
        fs::create_dir(dir.path().join("ask.dir")).unwrap();

        let files = enumerate(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                RequestFile::new(dir.path().join("ask.a")),
                RequestFile::new(dir.path().join("ask.b"))
            ]
        );
    }

    #[tokio::test]
    async fn existing_files_are_reported_then_settled() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ask.1"), "").unwrap();
        fs::write(dir.path().join("ask.2"), "").unwrap();

        let mut watch = DirectoryWatch::start(dir.path()).unwrap();
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Created(RequestFile::new(dir.path().join("ask.1")))
        );
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Created(RequestFile::new(dir.path().join("ask.2")))
        );
        assert_eq!(next(&mut watch).await, WatchEvent::Settled);
    }

    #[tokio::test]
    async fn new_and_removed_files_are_reported() {
        let dir = tempdir().unwrap();
        let mut watch = DirectoryWatch::start(dir.path()).unwrap();
        let path = dir.path().join("ask.new");

        fs::write(dir.path().join("unrelated"), "").unwrap();
        fs::write(&path, "").unwrap();
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Created(RequestFile::new(&path))
        );
        assert_eq!(next(&mut watch).await, WatchEvent::Settled);

        fs::remove_file(&path).unwrap();
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Deleted(RequestFile::new(&path))
        );
    }

    #[tokio::test]
    async fn renamed_into_place_is_created() {
        let dir = tempdir().unwrap();
        let mut watch = DirectoryWatch::start(dir.path()).unwrap();
        let tmp = dir.path().join(".tmp-ask");
        let path = dir.path().join("ask.renamed");

        fs::write(&tmp, "").unwrap();
        fs::rename(&tmp, &path).unwrap();
        assert_eq!(
            next(&mut watch).await,
            WatchEvent::Created(RequestFile::new(&path))
        );
    }

    #[tokio::test]
    async fn directory_created_later_is_picked_up() {
        let parent = tempdir().unwrap();
        let directory = parent.path().join("ask-password");
        let mut watch = DirectoryWatch::start(&directory).unwrap();

        fs::create_dir(&directory).unwrap();
        fs::write(directory.join("ask.late"), "").unwrap();

        let mut seen = Vec::new();
        loop {
            match next(&mut watch).await {
                WatchEvent::Settled => break,
                event => seen.push(event),
            }
        }
        assert!(seen.contains(&WatchEvent::Created(RequestFile::new(
            directory.join("ask.late")
        ))));
    }

    #[test]
    fn missing_parent_is_an_error() {
        let result = DirectoryWatch::start("/nonexistent/askpass/ask-password");
        assert!(matches!(result, Err(WatchError::Missing(_))));
    }
}
