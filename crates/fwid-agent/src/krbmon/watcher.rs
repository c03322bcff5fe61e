//! Directory watch loop shared by the credential monitors
//!
//! The parent directory of the target file is watched instead of the file
//! itself, since Kerberos tools and editors replace files by rename.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fwid_core::error::MonitorError;
use fwid_core::traits::EventSource;

/// Reads, validates and parses one watched file
pub trait SnapshotLoader: Send + Sync + 'static {
    /// Parsed file contents, compared to detect real changes
    type Snapshot: PartialEq + Send + Sync + 'static;

    /// Event emitted for a changed snapshot
    type Update: From<Arc<Self::Snapshot>> + Send + 'static;

    /// Name used in log messages
    fn name(&self) -> &'static str;

    /// Resolve the file to watch. Called once when the monitor starts.
    fn path(&self) -> Result<PathBuf, MonitorError>;

    /// Parse the complete file contents
    fn parse(&self, data: &[u8]) -> Result<Self::Snapshot, String>;
}

/// Monitor emitting an update whenever the parsed contents of a file change
pub struct FileMonitor<L: SnapshotLoader> {
    loader: Option<L>,
    updates_tx: Option<mpsc::Sender<L::Update>>,
    updates: mpsc::Receiver<L::Update>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<L: SnapshotLoader> FileMonitor<L> {
    /// Create a monitor; nothing is watched until [`EventSource::start`]
    pub fn new(loader: L) -> Self {
        let (updates_tx, updates) = mpsc::channel(1);
        Self {
            loader: Some(loader),
            updates_tx: Some(updates_tx),
            updates,
            cancel: CancellationToken::new(),
            task: None,
        }
    }
}

#[async_trait]
impl<L: SnapshotLoader> EventSource for FileMonitor<L> {
    type Event = L::Update;

    async fn start(&mut self) -> Result<(), MonitorError> {
        let (Some(loader), Some(updates_tx)) = (self.loader.take(), self.updates_tx.take()) else {
            return Err(MonitorError::AlreadyStarted);
        };

        let path = absolute(loader.path()?)?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => {
                return Err(MonitorError::Watch {
                    path,
                    reason: "file has no parent directory".to_string(),
                })
            }
        };

        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = fs_tx.send(res);
        })
        .map_err(|e| MonitorError::Watch {
            path: dir.clone(),
            reason: e.to_string(),
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| MonitorError::Watch {
                path: dir.clone(),
                reason: e.to_string(),
            })?;

        tracing::debug!("{} watching {:?}", loader.name(), path);

        let watch = WatchLoop {
            loader,
            path,
            last: None,
            updates_tx,
            cancel: self.cancel.clone(),
        };
        self.task = Some(tokio::spawn(watch.run(watcher, fs_rx)));
        Ok(())
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        self.updates_tx = None;
        while self.updates.recv().await.is_some() {}
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn events(&mut self) -> &mut mpsc::Receiver<L::Update> {
        &mut self.updates
    }
}

fn absolute(path: PathBuf) -> Result<PathBuf, MonitorError> {
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

struct WatchLoop<L: SnapshotLoader> {
    loader: L,
    path: PathBuf,
    last: Option<Arc<L::Snapshot>>,
    updates_tx: mpsc::Sender<L::Update>,
    cancel: CancellationToken,
}

impl<L: SnapshotLoader> WatchLoop<L> {
    async fn run(
        mut self,
        _watcher: RecommendedWatcher,
        mut fs_rx: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    ) {
        // Pick up a file that already exists
        if !self.handle_file_event().await {
            return;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                event = fs_rx.recv() => match event {
                    Some(Ok(event)) => {
                        if !self.is_target_event(&event) {
                            continue;
                        }
                        tracing::debug!(
                            "{} handling file event {:?} on {:?}",
                            self.loader.name(),
                            event.kind,
                            self.path
                        );
                        if !self.handle_file_event().await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!("{} watcher error: {}", self.loader.name(), e);
                    }
                    None => {
                        tracing::error!("{} watcher closed unexpectedly", self.loader.name());
                        break;
                    }
                },
            }
        }

        tracing::debug!("{} stopped", self.loader.name());
    }

    fn is_target_event(&self, event: &notify::Event) -> bool {
        let relevant = match event.kind {
            EventKind::Access(notify::event::AccessKind::Close(
                notify::event::AccessMode::Write,
            )) => true,
            EventKind::Access(_) | EventKind::Remove(_) => false,
            _ => true,
        };
        relevant && event.paths.iter().any(|p| p == &self.path)
    }

    /// Read and parse the file, emitting an update if it changed.
    ///
    /// Returns `false` when the monitor is shutting down.
    async fn handle_file_event(&mut self) -> bool {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::NotFound {
                    tracing::debug!("{} file {:?} does not exist", self.loader.name(), self.path);
                } else {
                    tracing::error!(
                        "{} could not read {:?}: {}",
                        self.loader.name(),
                        self.path,
                        e
                    );
                }
                return true;
            }
        };

        let snapshot = match self.loader.parse(&data) {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                tracing::error!(
                    "{} ignoring invalid {:?}: {}",
                    self.loader.name(),
                    self.path,
                    reason
                );
                return true;
            }
        };

        if self.last.as_deref() == Some(&snapshot) {
            return true;
        }

        let snapshot = Arc::new(snapshot);
        self.last = Some(Arc::clone(&snapshot));

        tokio::select! {
            result = self.updates_tx.send(L::Update::from(snapshot)) => result.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }
}
