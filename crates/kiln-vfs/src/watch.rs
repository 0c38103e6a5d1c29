//! Watcher abstraction for the source and cooked trees.
//!
//! The metadata cache and the dependency database only see [`FileWatcher`] and the
//! [`WatchEvent`] it delivers; which backend produced the events is invisible to them.
//! [`ManualFileWatcher`] is the deterministic backend used by tests. [`NotifyFileWatcher`]
//! wraps the OS watcher and is compiled only with the `watch-notify` feature.
//!
//! Renames reported in two halves are joined into one [`FileChange::Moved`] before they leave
//! the backend. When a backend loses events (a full queue, or the OS telling us it dropped
//! some) it sends [`WatchEvent::Rescan`] and every consumer rebuilds from disk.
//!
//! The notify queues default to 4096 raw and 1024 normalized entries. Override them with
//! `KILN_WATCH_NOTIFY_RAW_QUEUE_CAPACITY` and `KILN_WATCH_NOTIFY_EVENTS_QUEUE_CAPACITY`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crossbeam_channel as channel;

use crate::change::FileChange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changes { changes: Vec<FileChange> },
    /// Events were lost. Anything derived from the watched tree must be rebuilt.
    Rescan,
}

impl WatchEvent {
    pub fn changes(&self) -> &[FileChange] {
        match self {
            WatchEvent::Changes { changes } => changes,
            WatchEvent::Rescan => &[],
        }
    }

    /// Paths named by the event, both ends of a move included.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.changes().iter().flat_map(FileChange::paths)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchMode {
    Recursive,
    NonRecursive,
}

impl WatchMode {
    /// A recursive registration is never narrowed by a later non-recursive one.
    fn merge(existing: Option<WatchMode>, requested: WatchMode) -> WatchMode {
        match existing {
            Some(WatchMode::Recursive) => WatchMode::Recursive,
            _ => requested,
        }
    }
}

/// Item type of a watcher's stream. Backend failures travel alongside events.
pub type WatchMessage = io::Result<WatchEvent>;

/// Source of change notifications for a set of directories.
///
/// Delivery is advisory. Events may arrive merged, repeated or late, so a consumer re-reads the
/// file system instead of trusting the event payload.
pub trait FileWatcher: Send {
    fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()>;

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()>;

    fn watch_root(&mut self, root: &Path) -> io::Result<()> {
        self.watch_path(root, WatchMode::Recursive)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage>;

    /// Takes everything queued right now. Stops at the first backend error.
    fn poll(&mut self) -> io::Result<Vec<WatchEvent>> {
        self.receiver().try_iter().collect()
    }
}

impl<W: ?Sized + FileWatcher> FileWatcher for Box<W> {
    fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()> {
        (**self).watch_path(path, mode)
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        (**self).unwatch_path(path)
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        (**self).receiver()
    }
}

const MANUAL_QUEUE_CAPACITY: usize = 1024;

/// In-memory watcher. Tests inject events instead of waiting on the OS.
///
/// Once the watcher has been handed to a [`crate::ChangeBridge`], keep a
/// [`ManualFileWatcherHandle`] around to keep injecting. A full queue rejects injection with
/// `WouldBlock`.
#[derive(Debug)]
pub struct ManualFileWatcher {
    injector: ManualFileWatcherHandle,
    rx: channel::Receiver<WatchMessage>,
    registered: HashMap<PathBuf, WatchMode>,
}

#[derive(Debug, Clone)]
pub struct ManualFileWatcherHandle {
    tx: channel::Sender<WatchMessage>,
}

impl ManualFileWatcherHandle {
    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.inject(Ok(event))
    }

    pub fn push_change(&self, change: FileChange) -> io::Result<()> {
        self.push(WatchEvent::Changes {
            changes: vec![change],
        })
    }

    pub fn push_error(&self, error: io::Error) -> io::Result<()> {
        self.inject(Err(error))
    }

    fn inject(&self, message: WatchMessage) -> io::Result<()> {
        self.tx.try_send(message).map_err(|err| {
            let kind = if err.is_full() {
                io::ErrorKind::WouldBlock
            } else {
                io::ErrorKind::BrokenPipe
            };
            io::Error::new(kind, format!("manual watcher rejected event: {err}"))
        })
    }
}

impl Default for ManualFileWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualFileWatcher {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(MANUAL_QUEUE_CAPACITY);
        Self {
            injector: ManualFileWatcherHandle { tx },
            rx,
            registered: HashMap::new(),
        }
    }

    pub fn handle(&self) -> ManualFileWatcherHandle {
        self.injector.clone()
    }

    pub fn push(&self, event: WatchEvent) -> io::Result<()> {
        self.injector.push(event)
    }

    /// Registered paths in path order.
    pub fn watched_paths(&self) -> Vec<(PathBuf, WatchMode)> {
        let mut registered: Vec<_> = self
            .registered
            .iter()
            .map(|(path, mode)| (path.clone(), *mode))
            .collect();
        registered.sort_by(|(a, _), (b, _)| a.cmp(b));
        registered
    }
}

impl FileWatcher for ManualFileWatcher {
    fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()> {
        let mode = WatchMode::merge(self.registered.get(path).copied(), mode);
        self.registered.insert(path.to_path_buf(), mode);
        Ok(())
    }

    fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
        self.registered.remove(path);
        Ok(())
    }

    fn receiver(&self) -> &channel::Receiver<WatchMessage> {
        &self.rx
    }
}

#[cfg(any(test, feature = "watch-notify"))]
mod notify_impl {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use notify::event::{Flag, ModifyKind, RenameMode};
    use notify::EventKind;

    /// Whether the backend is telling us it lost events rather than describing a change.
    fn signals_lost_events(event: &notify::Event) -> bool {
        if event.attrs.flag() == Some(Flag::Rescan) {
            return true;
        }
        event.paths.is_empty() && event.kind == EventKind::Other
    }

    /// Maps raw notify events onto [`FileChange`]s.
    ///
    /// A rename "from" half is parked until its "to" half shows up. Halves that wait longer than
    /// [`EventNormalizer::MAX_AGE`], or that overflow [`EventNormalizer::MAX_PENDING_RENAMES`],
    /// are reported as deletions.
    #[derive(Debug, Default)]
    pub struct EventNormalizer {
        parked: VecDeque<(Instant, PathBuf)>,
    }

    impl EventNormalizer {
        pub const MAX_AGE: Duration = Duration::from_secs(2);
        pub const MAX_PENDING_RENAMES: usize = 512;

        pub fn new() -> Self {
            Self::default()
        }

        pub fn push(&mut self, event: notify::Event, now: Instant) -> Vec<FileChange> {
            let mut changes = Vec::new();
            let paths = event.paths;
            match event.kind {
                EventKind::Create(_) => {
                    changes.extend(paths.into_iter().map(|path| FileChange::Created { path }))
                }
                EventKind::Remove(_) => {
                    changes.extend(paths.into_iter().map(|path| FileChange::Deleted { path }))
                }
                EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                    let mut halves = paths.into_iter();
                    while let Some(from) = halves.next() {
                        changes.push(match halves.next() {
                            Some(to) => FileChange::Moved { from, to },
                            None => FileChange::Modified { path: from },
                        });
                    }
                }
                EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                    self.parked.extend(paths.into_iter().map(|path| (now, path)));
                }
                EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                    for to in paths {
                        changes.push(match self.parked.pop_front() {
                            Some((_, from)) => FileChange::Moved { from, to },
                            None => FileChange::Created { path: to },
                        });
                    }
                }
                _ => changes.extend(paths.into_iter().map(|path| FileChange::Modified { path })),
            }
            let mut expired = self.expire(now);
            expired.append(&mut changes);
            expired
        }

        /// Reports parked rename halves that have aged out.
        pub fn flush(&mut self, now: Instant) -> Vec<FileChange> {
            self.expire(now)
        }

        /// Reports every parked rename half as deleted, regardless of age.
        pub fn flush_all_pending_renames_as_deleted(&mut self) -> Vec<FileChange> {
            self.parked
                .drain(..)
                .map(|(_, path)| FileChange::Deleted { path })
                .collect()
        }

        fn next_deadline(&self) -> Option<Instant> {
            self.parked.front().map(|(parked_at, _)| *parked_at + Self::MAX_AGE)
        }

        fn expire(&mut self, now: Instant) -> Vec<FileChange> {
            let mut expired = Vec::new();
            while let Some((parked_at, _)) = self.parked.front() {
                let too_old = now.saturating_duration_since(*parked_at) > Self::MAX_AGE;
                let too_many = self.parked.len() > Self::MAX_PENDING_RENAMES;
                if !too_old && !too_many {
                    break;
                }
                if let Some((_, path)) = self.parked.pop_front() {
                    expired.push(FileChange::Deleted { path });
                }
            }
            expired
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(not(feature = "watch-notify"), allow(dead_code))]
    struct QueueSizes {
        raw: usize,
        events: usize,
    }

    impl QueueSizes {
        const MAX: usize = 1_000_000;

        #[cfg(feature = "watch-notify")]
        const DEFAULT: QueueSizes = QueueSizes {
            raw: 4096,
            events: 1024,
        };

        #[cfg(feature = "watch-notify")]
        fn from_env() -> io::Result<Self> {
            let read = |var: &str, default: usize| -> io::Result<usize> {
                match std::env::var(var) {
                    Ok(raw) => Ok(Self::parse(var, &raw)?.unwrap_or(default)),
                    Err(std::env::VarError::NotPresent) => Ok(default),
                    Err(err) => Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("{var} is not valid unicode: {err}"),
                    )),
                }
            };
            Ok(Self {
                raw: read("KILN_WATCH_NOTIFY_RAW_QUEUE_CAPACITY", Self::DEFAULT.raw)?,
                events: read(
                    "KILN_WATCH_NOTIFY_EVENTS_QUEUE_CAPACITY",
                    Self::DEFAULT.events,
                )?,
            })
        }

        /// Empty and `0` mean "use the default". Larger values are capped at [`Self::MAX`].
        fn parse(var: &str, raw: &str) -> io::Result<Option<usize>> {
            match raw.trim() {
                "" | "0" => Ok(None),
                value => value
                    .parse::<usize>()
                    .map(|size| Some(size.clamp(1, Self::MAX)))
                    .map_err(|err| {
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("{var}={value:?} is not a queue size: {err}"),
                        )
                    }),
            }
        }
    }

    /// Shared flag raised whenever an event had to be dropped.
    #[derive(Debug, Clone, Default)]
    struct Overflow(Arc<AtomicBool>);

    impl Overflow {
        fn raise(&self) {
            self.0.store(true, Ordering::Release);
        }

        fn clear(&self) {
            self.0.store(false, Ordering::Release);
        }

        fn is_raised(&self) -> bool {
            self.0.load(Ordering::Acquire)
        }

        /// Queues `message`, raising the flag instead of blocking when the queue is full.
        fn offer<T>(&self, tx: &channel::Sender<T>, message: T) {
            if let Err(channel::TrySendError::Full(_)) = tx.try_send(message) {
                self.raise();
            }
        }
    }

    const RESCAN_RETRY: Duration = Duration::from_millis(50);
    const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

    /// Body of the drain thread between the notify callback and the consumer.
    struct DrainLoop {
        raw_rx: channel::Receiver<notify::Result<notify::Event>>,
        events_tx: channel::Sender<WatchMessage>,
        stop_rx: channel::Receiver<()>,
        overflow: Overflow,
        normalizer: EventNormalizer,
    }

    enum Flow {
        Continue,
        Stop,
    }

    enum Wake {
        Stop,
        Raw(notify::Result<notify::Event>),
        Tick,
    }

    impl DrainLoop {
        fn new(
            raw_rx: channel::Receiver<notify::Result<notify::Event>>,
            events_tx: channel::Sender<WatchMessage>,
            stop_rx: channel::Receiver<()>,
            overflow: Overflow,
        ) -> Self {
            Self {
                raw_rx,
                events_tx,
                stop_rx,
                overflow,
                normalizer: EventNormalizer::new(),
            }
        }

        fn run(mut self) {
            loop {
                if let Flow::Stop = self.recover_from_overflow() {
                    return;
                }
                let wakeup = channel::after(self.next_wakeup());
                let woke = channel::select! {
                    recv(self.stop_rx) -> _ => Wake::Stop,
                    recv(self.raw_rx) -> message => match message {
                        Ok(res) => Wake::Raw(res),
                        Err(_) => Wake::Stop,
                    },
                    recv(wakeup) -> _ => Wake::Tick,
                };
                let flow = match woke {
                    Wake::Stop => self.shutdown(),
                    Wake::Raw(Ok(event)) => self.handle_event(event),
                    Wake::Raw(Err(err)) => self.handle_error(err),
                    Wake::Tick => {
                        let expired = self.normalizer.flush(Instant::now());
                        self.emit(expired)
                    }
                };
                if let Flow::Stop = flow {
                    return;
                }
            }
        }

        fn next_wakeup(&self) -> Duration {
            if self.overflow.is_raised() {
                return RESCAN_RETRY;
            }
            self.normalizer
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
                .unwrap_or(IDLE_WAKEUP)
        }

        /// Drops everything queued and asks consumers to rescan. Retries while the consumer
        /// queue is full.
        fn recover_from_overflow(&mut self) -> Flow {
            if !self.overflow.is_raised() {
                return Flow::Continue;
            }
            self.normalizer = EventNormalizer::new();
            self.raw_rx.try_iter().for_each(drop);
            match self.events_tx.try_send(Ok(WatchEvent::Rescan)) {
                Ok(()) => {
                    self.overflow.clear();
                    Flow::Continue
                }
                Err(channel::TrySendError::Full(_)) => Flow::Continue,
                Err(channel::TrySendError::Disconnected(_)) => Flow::Stop,
            }
        }

        fn handle_event(&mut self, event: notify::Event) -> Flow {
            if signals_lost_events(&event) {
                self.overflow.raise();
                return Flow::Continue;
            }
            let changes = self.normalizer.push(event, Instant::now());
            self.emit(changes)
        }

        fn handle_error(&mut self, err: notify::Error) -> Flow {
            self.overflow.raise();
            match self.events_tx.try_send(Err(io::Error::other(err))) {
                Err(channel::TrySendError::Disconnected(_)) => Flow::Stop,
                _ => Flow::Continue,
            }
        }

        /// Parked rename halves become deletions so they are not lost with the thread.
        fn shutdown(&mut self) -> Flow {
            let parked = self.normalizer.flush_all_pending_renames_as_deleted();
            let _ = self.emit(parked);
            Flow::Stop
        }

        fn emit(&self, changes: Vec<FileChange>) -> Flow {
            if changes.is_empty() {
                return Flow::Continue;
            }
            match self.events_tx.try_send(Ok(WatchEvent::Changes { changes })) {
                Ok(()) => Flow::Continue,
                Err(channel::TrySendError::Full(_)) => {
                    self.overflow.raise();
                    Flow::Continue
                }
                Err(channel::TrySendError::Disconnected(_)) => Flow::Stop,
            }
        }
    }

    /// OS-backed watcher built on `notify::recommended_watcher`.
    #[cfg(feature = "watch-notify")]
    pub struct NotifyFileWatcher {
        inner: notify::RecommendedWatcher,
        events_rx: channel::Receiver<WatchMessage>,
        stop_tx: channel::Sender<()>,
        drain: Option<std::thread::JoinHandle<()>>,
        registered: HashMap<PathBuf, WatchMode>,
    }

    #[cfg(feature = "watch-notify")]
    impl NotifyFileWatcher {
        /// Uses the queue sizes from the environment, or the defaults.
        pub fn new() -> io::Result<Self> {
            let sizes = QueueSizes::from_env()?;
            Self::with_capacities(sizes.raw, sizes.events)
        }

        pub fn with_capacities(raw: usize, events: usize) -> io::Result<Self> {
            let (raw_tx, raw_rx) = channel::bounded(raw);
            let (events_tx, events_rx) = channel::bounded(events);
            let (stop_tx, stop_rx) = channel::bounded(0);
            let overflow = Overflow::default();

            let callback_overflow = overflow.clone();
            let inner = notify::recommended_watcher(move |res| {
                callback_overflow.offer(&raw_tx, res);
            })
            .map_err(io::Error::other)?;

            let drain = DrainLoop::new(raw_rx, events_tx, stop_rx, overflow);
            let drain = std::thread::Builder::new()
                .name("kiln-notify-drain".to_owned())
                .spawn(move || drain.run())?;

            Ok(Self {
                inner,
                events_rx,
                stop_tx,
                drain: Some(drain),
                registered: HashMap::new(),
            })
        }
    }

    #[cfg(feature = "watch-notify")]
    impl Drop for NotifyFileWatcher {
        fn drop(&mut self) {
            let _ = self.stop_tx.send(());
            if let Some(drain) = self.drain.take() {
                if drain.join().is_err() {
                    tracing::debug!(target = "kiln.vfs", "notify drain thread panicked");
                }
            }
        }
    }

    #[cfg(feature = "watch-notify")]
    impl FileWatcher for NotifyFileWatcher {
        fn watch_path(&mut self, path: &Path, mode: WatchMode) -> io::Result<()> {
            use notify::{RecursiveMode, Watcher};

            let existing = self.registered.get(path).copied();
            let mode = WatchMode::merge(existing, mode);
            if existing == Some(mode) {
                return Ok(());
            }
            if existing.is_some() {
                // Widening a non-recursive registration.
                self.inner.unwatch(path).map_err(io::Error::other)?;
            }
            let recursive = match mode {
                WatchMode::Recursive => RecursiveMode::Recursive,
                WatchMode::NonRecursive => RecursiveMode::NonRecursive,
            };
            self.inner.watch(path, recursive).map_err(io::Error::other)?;
            self.registered.insert(path.to_path_buf(), mode);
            Ok(())
        }

        fn unwatch_path(&mut self, path: &Path) -> io::Result<()> {
            use notify::Watcher;

            if self.registered.remove(path).is_some() {
                self.inner.unwatch(path).map_err(io::Error::other)?;
            }
            Ok(())
        }

        fn receiver(&self) -> &channel::Receiver<WatchMessage> {
            &self.events_rx
        }
    }

}

#[cfg(feature = "watch-notify")]
pub use notify_impl::{EventNormalizer, NotifyFileWatcher};
