// src/watch/source.rs

//! Kernel-event source abstraction.
//!
//! Watched directories are registered with an opaque [`WatchToken`] (a
//! stable slab index plus a generation counter) and every delivered event
//! carries that token back. The loop validates the generation before
//! touching the slab, so a token that outlives its watch record (events
//! already queued when the record was removed) is harmless.
//!
//! Control-plane wakeups (`Shutdown`, `Reload`) travel on the same channel
//! as filesystem events: signal handlers only ever push a control event,
//! never touch daemon state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::Result;

bitflags! {
    /// Directory-granular change classes delivered with a vnode event.
    ///
    /// Attribute-only changes are deliberately absent: they never warrant a
    /// scan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VnodeFlags: u32 {
        /// Children added, removed or renamed, or directory data written.
        const WRITE  = 0b0001;
        /// The watched directory itself was renamed.
        const RENAME = 0b0010;
        /// The watched directory itself was deleted.
        const DELETE = 0b0100;
        /// The watched directory grew.
        const EXTEND = 0b1000;
    }
}

/// Opaque registration token: stable slab index + generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchToken {
    pub index: usize,
    pub generation: u64,
}

/// Control-plane wakeups raised by the signal listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    Shutdown,
    Reload,
}

/// One event handed to the loop by [`VnodeEventSource::next_batch`].
#[derive(Debug)]
pub enum SourceEvent {
    /// A change on a registered directory.
    Vnode { token: WatchToken, flags: VnodeFlags },
    /// The backend reported an error; `path` identifies the watch when the
    /// backend knows it.
    WatchError {
        path: Option<PathBuf>,
        message: String,
    },
    Shutdown,
    Reload,
}

/// Capability owned by the event loop: registration plus a bounded wait for
/// the next batch of events.
///
/// Abstract so the loop can be driven by a scripted in-memory source in
/// tests.
#[async_trait(?Send)]
pub trait VnodeEventSource {
    /// Subscribe `path` to directory-granular change events, tagging future
    /// deliveries with `token`.
    fn register(&mut self, path: &Path, token: WatchToken) -> Result<()>;

    /// Drop the subscription for `path`. Events already in flight may still
    /// surface; their stale tokens are filtered by the caller.
    fn unregister(&mut self, path: &Path);

    /// Wait for events. `timeout` of `None` blocks indefinitely; an elapsed
    /// timeout yields an empty batch. At most `max_events` are returned.
    async fn next_batch(
        &mut self,
        timeout: Option<Duration>,
        max_events: usize,
    ) -> Vec<SourceEvent>;
}

/// Raw traffic on the internal channel, before token resolution.
enum RawEvent {
    Fs(notify::Event),
    Failure(notify::Error),
    Control(ControlEvent),
}

/// Cloneable handle for raising control events from signal tasks.
#[derive(Clone)]
pub struct ControlSender {
    tx: mpsc::UnboundedSender<RawEvent>,
}

impl ControlSender {
    pub fn send(&self, event: ControlEvent) {
        // A closed channel means the loop already exited; nothing to wake.
        let _ = self.tx.send(RawEvent::Control(event));
    }
}

/// `notify`-backed event source: one non-recursive watch per registered
/// directory, all feeding a single channel.
pub struct NotifyEventSource {
    watcher: RecommendedWatcher,
    tokens: HashMap<PathBuf, WatchToken>,
    tx: mpsc::UnboundedSender<RawEvent>,
    rx: mpsc::UnboundedReceiver<RawEvent>,
}

impl NotifyEventSource {
    pub fn new() -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel::<RawEvent>();

        // Closure called synchronously by notify whenever an event arrives.
        let callback_tx = tx.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let raw = match res {
                    Ok(event) => RawEvent::Fs(event),
                    Err(err) => RawEvent::Failure(err),
                };
                if callback_tx.send(raw).is_err() {
                    // We can't log via tracing from the notify thread once
                    // the receiver is gone; fall back to stderr.
                    eprintln!("plexmon: event loop gone, dropping filesystem event");
                }
            },
            notify::Config::default(),
        )?;

        Ok(Self {
            watcher,
            tokens: HashMap::new(),
            tx,
            rx,
        })
    }

    /// Handle for the signal listeners.
    pub fn control_sender(&self) -> ControlSender {
        ControlSender {
            tx: self.tx.clone(),
        }
    }

    fn push_raw(&self, raw: RawEvent, out: &mut Vec<SourceEvent>) {
        match raw {
            RawEvent::Fs(event) => self.translate(event, out),
            RawEvent::Failure(err) => {
                let path = err.paths.first().cloned();
                out.push(SourceEvent::WatchError {
                    path,
                    message: err.to_string(),
                });
            }
            RawEvent::Control(ControlEvent::Shutdown) => out.push(SourceEvent::Shutdown),
            RawEvent::Control(ControlEvent::Reload) => out.push(SourceEvent::Reload),
        }
    }

    /// Resolve a raw notify event to the watched directory it concerns.
    ///
    /// An event path that is itself registered is a self event (rename or
    /// delete of the watched directory); a path whose parent is registered
    /// is a content event on that parent. Anything else belongs to a watch
    /// that has already been removed.
    fn translate(&self, event: notify::Event, out: &mut Vec<SourceEvent>) {
        for path in &event.paths {
            if let Some(&token) = self.tokens.get(path.as_path()) {
                let flags = self_event_flags(&event.kind);
                out.push(SourceEvent::Vnode { token, flags });
                continue;
            }

            let parent_token = path
                .parent()
                .and_then(|parent| self.tokens.get(parent).copied());
            match parent_token {
                Some(token) => {
                    let flags = child_event_flags(&event.kind);
                    out.push(SourceEvent::Vnode { token, flags });
                }
                None => {
                    debug!(path = %path.display(), "event for unwatched path, ignoring");
                }
            }
        }
    }
}

#[async_trait(?Send)]
impl VnodeEventSource for NotifyEventSource {
    fn register(&mut self, path: &Path, token: WatchToken) -> Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        self.tokens.insert(path.to_path_buf(), token);
        Ok(())
    }

    fn unregister(&mut self, path: &Path) {
        // The backend may already have dropped the watch (deleted
        // directory); that is not an error worth surfacing.
        let _ = self.watcher.unwatch(path);
        self.tokens.remove(path);
    }

    async fn next_batch(
        &mut self,
        timeout: Option<Duration>,
        max_events: usize,
    ) -> Vec<SourceEvent> {
        let mut out = Vec::new();

        let first = match timeout {
            Some(duration) => match tokio::time::timeout(duration, self.rx.recv()).await {
                Ok(received) => received,
                Err(_elapsed) => return out,
            },
            None => self.rx.recv().await,
        };

        let Some(first) = first else {
            // All senders gone: the process is tearing down.
            out.push(SourceEvent::Shutdown);
            return out;
        };
        self.push_raw(first, &mut out);

        // Drain whatever else is already queued, up to the batch cap.
        while out.len() < max_events {
            match self.rx.try_recv() {
                Ok(raw) => self.push_raw(raw, &mut out),
                Err(_) => break,
            }
        }

        out
    }
}

/// Flags for an event whose path is the watched directory itself.
fn self_event_flags(kind: &EventKind) -> VnodeFlags {
    match kind {
        EventKind::Remove(_) => VnodeFlags::DELETE,
        EventKind::Modify(ModifyKind::Name(_)) => VnodeFlags::RENAME,
        EventKind::Modify(ModifyKind::Data(_)) => VnodeFlags::WRITE | VnodeFlags::EXTEND,
        EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => VnodeFlags::empty(),
        _ => VnodeFlags::WRITE,
    }
}

/// Flags for an event on an immediate child of the watched directory.
///
/// At directory granularity every create/remove/rename/write below the
/// watch is a content write on the watch itself.
fn child_event_flags(kind: &EventKind) -> VnodeFlags {
    match kind {
        EventKind::Access(_) | EventKind::Modify(ModifyKind::Metadata(_)) => VnodeFlags::empty(),
        _ => VnodeFlags::WRITE,
    }
}
