// src/watch/mod.rs

pub mod queue;
pub mod source;
pub mod watcher;

pub use queue::PathQueue;
pub use source::{
    ControlEvent, ControlSender, NotifyEventSource, SourceEvent, VnodeEventSource, VnodeFlags,
    WatchToken,
};
pub use watcher::{
    scan_new_directories, watch_tree, WatchRecord, WatchSet, MAX_PATH_BYTES, MAX_WATCHED_DIRS,
};
