use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Metadata,
    Progress,
    Retry,
    Build,
    End,
    Error,
    Close,
}

/// Point-in-time counters for one chunk (or the aggregate).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub bytes: u64,
    pub percentage: f64,
    /// Bytes per second over the last report window.
    pub speed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: ProgressEntry,
    pub details: Vec<ProgressEntry>,
}

/// Session facts, emitted once after the probe settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub size: Option<u64>,
    /// Planned length of each chunk, in id order.
    pub chunks: Vec<u64>,
    pub is_resume: bool,
    /// Per-chunk completion percentage at session start.
    pub progress: Vec<f64>,
    pub final_address: String,
    pub parallel: bool,
    pub resumable: bool,
    pub headers: HashMap<String, String>,
    pub saved_file_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryInfo {
    pub chunk_id: u32,
    pub attempt: u32,
    pub error: String,
}

#[derive(Debug, Clone)]
pub enum Event {
    Metadata(Metadata),
    Progress(ProgressSnapshot),
    Retry(RetryInfo),
    Build { percentage: f64 },
    End,
    Error(DownloadError),
    Close,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Metadata(_) => EventKind::Metadata,
            Event::Progress(_) => EventKind::Progress,
            Event::Retry(_) => EventKind::Retry,
            Event::Build { .. } => EventKind::Build,
            Event::End => EventKind::End,
            Event::Error(_) => EventKind::Error,
            Event::Close => EventKind::Close,
        }
    }
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

/// Observer registry. Callbacks run on the thread that emits.
#[derive(Default)]
pub struct Listeners {
    slots: Mutex<Vec<(EventKind, Callback)>>,
}

impl Listeners {
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        if let Ok(mut slots) = self.slots.lock() {
            slots.push((kind, Box::new(callback)));
        }
    }

    pub fn has(&self, kind: EventKind) -> bool {
        self.slots
            .lock()
            .map(|slots| slots.iter().any(|(k, _)| *k == kind))
            .unwrap_or(false)
    }

    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        if let Ok(slots) = self.slots.lock() {
            for (k, callback) in slots.iter() {
                if *k == kind {
                    callback(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn listeners_filter_by_kind() {
        let listeners = Listeners::default();
        let ends = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ends);
        listeners.on(EventKind::End, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&closes);
        listeners.on(EventKind::Close, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(listeners.has(EventKind::End));
        assert!(!listeners.has(EventKind::Progress));

        listeners.emit(&Event::End);
        listeners.emit(&Event::End);
        listeners.emit(&Event::Close);

        assert_eq!(ends.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
