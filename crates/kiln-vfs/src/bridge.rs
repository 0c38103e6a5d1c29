use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;
use kiln_core::{ContentRoot, FilePath};

use crate::change::FileChange;
use crate::watch::{FileWatcher, WatchEvent};

/// Receiver of file changes mapped onto [`FilePath`]s.
///
/// Called from the bridge thread. Implementations must not block for long.
pub trait ChangeSink: Send + Sync {
    /// `old` and `new` are equal for creations, modifications and deletions; they differ for
    /// moves. A side outside the watched root is `None`.
    fn on_file_change(&self, old: Option<&FilePath>, new: Option<&FilePath>);

    /// The watcher lost events; everything derived from the watched tree is suspect.
    fn on_rescan(&self) {}
}

impl<S: ?Sized + ChangeSink> ChangeSink for Arc<S> {
    fn on_file_change(&self, old: Option<&FilePath>, new: Option<&FilePath>) {
        self.as_ref().on_file_change(old, new)
    }

    fn on_rescan(&self) {
        self.as_ref().on_rescan()
    }
}

/// Delivers every notification to `.0`, then to `.1`, so one watcher can feed consumers that
/// depend on each other's state.
impl<A: ChangeSink, B: ChangeSink> ChangeSink for (A, B) {
    fn on_file_change(&self, old: Option<&FilePath>, new: Option<&FilePath>) {
        self.0.on_file_change(old, new);
        self.1.on_file_change(old, new);
    }

    fn on_rescan(&self) {
        self.0.on_rescan();
        self.1.on_rescan();
    }
}

/// Forwards watcher events for one [`ContentRoot`] to a [`ChangeSink`] on a dedicated thread.
///
/// The bridge owns the watcher. Dropping the bridge stops the thread and joins it.
pub struct ChangeBridge {
    root: ContentRoot,
    events: Arc<AtomicU64>,
    stop_tx: channel::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ChangeBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBridge")
            .field("root", &self.root.root())
            .field("events", &self.events_processed())
            .finish()
    }
}

impl ChangeBridge {
    /// Watches `root` recursively and starts forwarding.
    pub fn spawn<W, S>(mut watcher: W, root: ContentRoot, sink: S) -> io::Result<Self>
    where
        W: FileWatcher + 'static,
        S: ChangeSink + 'static,
    {
        watcher.watch_root(root.root())?;

        let events = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        let thread_root = root.clone();
        let thread_events = Arc::clone(&events);
        let thread = std::thread::Builder::new()
            .name("kiln-change-bridge".to_owned())
            .spawn(move || run(watcher, thread_root, sink, thread_events, stop_rx))?;

        Ok(Self {
            root,
            events,
            stop_tx,
            thread: Some(thread),
        })
    }

    pub fn root(&self) -> &ContentRoot {
        &self.root
    }

    /// Number of changes and rescans delivered so far, including changes outside the root.
    pub fn events_processed(&self) -> u64 {
        self.events.load(Ordering::Acquire)
    }

    /// Polls until at least `count` events were processed. Returns `false` on timeout.
    pub fn wait_for_events(&self, count: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.events_processed() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

impl Drop for ChangeBridge {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::debug!(target = "kiln.vfs", "change bridge thread panicked");
            }
        }
    }
}

fn run<W: FileWatcher, S: ChangeSink>(
    watcher: W,
    root: ContentRoot,
    sink: S,
    events: Arc<AtomicU64>,
    stop_rx: channel::Receiver<()>,
) {
    let rx = watcher.receiver().clone();
    loop {
        channel::select! {
            recv(stop_rx) -> _ => break,
            recv(rx) -> msg => {
                let Ok(msg) = msg else {
                    break;
                };
                match msg {
                    Ok(WatchEvent::Changes { changes }) => {
                        for change in &changes {
                            dispatch(&root, &sink, change);
                            events.fetch_add(1, Ordering::Release);
                        }
                    }
                    Ok(WatchEvent::Rescan) => {
                        tracing::debug!(
                            target = "kiln.vfs",
                            root = %root.root().display(),
                            "watcher requested rescan"
                        );
                        sink.on_rescan();
                        events.fetch_add(1, Ordering::Release);
                    }
                    Err(err) => {
                        tracing::debug!(
                            target = "kiln.vfs",
                            root = %root.root().display(),
                            error = %err,
                            "file watcher error"
                        );
                    }
                }
            },
        }
    }
    drop(watcher);
}

fn dispatch<S: ChangeSink>(root: &ContentRoot, sink: &S, change: &FileChange) {
    let (old, new) = match change {
        FileChange::Moved { from, to } => (root.to_file_path(from), root.to_file_path(to)),
        FileChange::Created { path }
        | FileChange::Modified { path }
        | FileChange::Deleted { path } => {
            let mapped = root.to_file_path(path);
            (mapped.clone(), mapped)
        }
    };
    if old.is_some() || new.is_some() {
        sink.on_file_change(old.as_ref(), new.as_ref());
    }
}
