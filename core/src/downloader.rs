use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::assemble::assemble_chunks;
use crate::chunk::{plan_chunks, ChunkRange};
use crate::config::DownloadConfig;
use crate::dest::resolve_destination;
use crate::error::{DownloadError, DownloadResult};
use crate::events::{Event, EventKind, Listeners, Metadata, RetryInfo};
use crate::net::{NetClient, ReqwestNetClient};
use crate::progress::Reporter;
use crate::resolver::resolve_redirects;
use crate::scan::{chunk_path, part_path, scan_resume};

const STOP_NONE: u8 = 0;
const STOP_DESTROYED: u8 = 1;
const STOP_FAILED: u8 = 2;

const STREAM_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Fresh,
    Started,
    Ranging,
    Single,
    Downloading,
    Assembling,
    Done,
    Destroyed,
}

struct Shared {
    state: SessionState,
    metadata: Option<Metadata>,
    failure: Option<DownloadError>,
    ended: bool,
}

struct Inner {
    url: String,
    dest: PathBuf,
    config: DownloadConfig,
    net: Arc<dyn NetClient>,
    listeners: Listeners,
    shared: Mutex<Shared>,
    cond: Condvar,
    started: AtomicBool,
    stop: AtomicU8,
    close_emitted: AtomicBool,
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst) != STOP_NONE
    }

    fn emit(&self, event: Event) {
        // close is the final observable signal
        if self.close_emitted.load(Ordering::SeqCst) {
            return;
        }
        self.listeners.emit(&event);
    }

    fn set_state(&self, state: SessionState) {
        let mut shared = self.shared();
        if matches!(shared.state, SessionState::Done | SessionState::Destroyed) {
            return;
        }
        shared.state = state;
        self.cond.notify_all();
    }

    /// Terminal transition. Emits `error` (when given) and then `close`,
    /// exactly once across every path that can end the session.
    fn shutdown(&self, failure: Option<DownloadError>, terminal: SessionState) {
        let stop_code = if failure.is_some() {
            STOP_FAILED
        } else {
            STOP_DESTROYED
        };
        let _ = self
            .stop
            .compare_exchange(STOP_NONE, stop_code, Ordering::SeqCst, Ordering::SeqCst);
        if self.close_emitted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(err) = &failure {
            self.listeners.emit(&Event::Error(err.clone()));
        }
        self.listeners.emit(&Event::Close);
        let mut shared = self.shared();
        if failure.is_some() {
            shared.failure = failure;
        }
        shared.state = terminal;
        self.cond.notify_all();
    }
}

/// Resumable multi-connection download session for one `(url, dest)` pair.
pub struct Downloader {
    inner: Arc<Inner>,
}

impl Downloader {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>) -> DownloadResult<Self> {
        Self::with_config(url, dest, DownloadConfig::default())
    }

    pub fn with_config(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        config: DownloadConfig,
    ) -> DownloadResult<Self> {
        let net = Arc::new(ReqwestNetClient::new()?);
        Ok(Self::with_client(url, dest, config, net))
    }

    pub fn with_client(
        url: impl Into<String>,
        dest: impl Into<PathBuf>,
        config: DownloadConfig,
        net: Arc<dyn NetClient>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                dest: dest.into(),
                config,
                net,
                listeners: Listeners::default(),
                shared: Mutex::new(Shared {
                    state: SessionState::Fresh,
                    metadata: None,
                    failure: None,
                    ended: false,
                }),
                cond: Condvar::new(),
                started: AtomicBool::new(false),
                stop: AtomicU8::new(STOP_NONE),
                close_emitted: AtomicBool::new(false),
            }),
        }
    }

    /// Register an observer. Callbacks run on session threads; register
    /// before `start()` to observe the earliest events.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.listeners.on(kind, callback);
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared().state
    }

    /// Launch the session. Idempotent; a destroyed session stays down.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.inner.stopped() {
            return;
        }
        {
            let mut shared = self.inner.shared();
            if shared.state == SessionState::Fresh {
                shared.state = SessionState::Started;
            }
        }
        let inner = Arc::clone(&self.inner);
        thread::spawn(move || {
            if let Err(err) = run_session(&inner) {
                inner.shutdown(Some(err), SessionState::Destroyed);
            }
        });
    }

    /// Global kill switch. Workers stand down at their next suspension
    /// point; completed chunk files stay on disk for a later resume.
    pub fn destroy(&self) {
        self.inner
            .stop
            .store(STOP_DESTROYED, Ordering::SeqCst);
        self.inner.shutdown(None, SessionState::Destroyed);
    }

    /// Block until the session closes. `Ok(true)` when `end` fired,
    /// `Ok(false)` on a silent or destroyed exit, the recorded error
    /// otherwise.
    pub fn wait(&self) -> DownloadResult<bool> {
        self.start();
        let mut shared = self.inner.shared();
        loop {
            if let Some(err) = &shared.failure {
                return Err(err.clone());
            }
            if matches!(shared.state, SessionState::Done | SessionState::Destroyed) {
                return Ok(shared.ended);
            }
            shared = match self.inner.cond.wait(shared) {
                Ok(guard) => guard,
                Err(err) => err.into_inner(),
            };
        }
    }

    /// Block until the session facts are known.
    pub fn metadata(&self) -> DownloadResult<Metadata> {
        self.start();
        let mut shared = self.inner.shared();
        loop {
            if let Some(metadata) = &shared.metadata {
                return Ok(metadata.clone());
            }
            if let Some(err) = &shared.failure {
                return Err(err.clone());
            }
            if matches!(shared.state, SessionState::Done | SessionState::Destroyed) {
                return Err(DownloadError::Destroyed);
            }
            shared = match self.inner.cond.wait(shared) {
                Ok(guard) => guard,
                Err(err) => err.into_inner(),
            };
        }
    }
}

fn run_session(inner: &Arc<Inner>) -> DownloadResult<()> {
    let config = &inner.config;

    let dest = match resolve_destination(&inner.dest, &inner.url, config.exist_behavior)? {
        Some(dest) => dest,
        None => {
            debug!(dest = %inner.dest.display(), "destination occupied, ending silently");
            inner.shutdown(None, SessionState::Destroyed);
            return Ok(());
        }
    };

    let (final_url, probe) = if config.follow_redirect {
        let resolved = resolve_redirects(inner.net.as_ref(), &inner.url, &config.http)?;
        (resolved.final_url, resolved.probe)
    } else {
        let probe = inner.net.head(&inner.url, &config.http)?;
        if probe.status != 200 && probe.status != 206 {
            return Err(DownloadError::BadStatus {
                url: inner.url.clone(),
                status: probe.status,
            });
        }
        (inner.url.clone(), Some(probe))
    };
    if inner.stopped() {
        return Ok(());
    }

    let content_length = probe.as_ref().and_then(|p| p.content_length);
    let accept_ranges = probe.as_ref().map(|p| p.accept_ranges).unwrap_or(false);
    let headers = probe.map(|p| p.headers).unwrap_or_default();
    debug!(url = %final_url, ?content_length, accept_ranges, "probe settled");

    let connections = config.connections.max(1);
    let parallel = connections != 1 && content_length.is_some() && accept_ranges;
    let interval = Duration::from_millis(config.report_interval_ms);

    if parallel {
        inner.set_state(SessionState::Ranging);
        let size = content_length.unwrap_or(0);
        let plan = plan_chunks(size, connections, &config.chunk_size);
        let scan = scan_resume(&dest, &plan)?;
        let lens: Vec<u64> = plan.iter().map(ChunkRange::size).collect();
        let reporter = Arc::new(Reporter::new(&lens, size, interval));
        for id in &scan.completed {
            reporter.credit_resumed(*id);
        }

        publish_metadata(
            inner,
            Metadata {
                size: Some(size),
                chunks: lens,
                is_resume: scan.is_resume(),
                progress: reporter
                    .snapshot()
                    .details
                    .iter()
                    .map(|d| d.percentage)
                    .collect(),
                final_address: final_url.clone(),
                parallel: true,
                resumable: true,
                headers,
                saved_file_path: dest.clone(),
            },
        );

        let total_chunks = plan.len() as u32;
        if !scan.pending.is_empty() {
            inner.set_state(SessionState::Downloading);
            run_pool(inner, &dest, &final_url, &plan, scan.pending, &reporter)?;
        }
        finish(inner, &dest, total_chunks)
    } else {
        inner.set_state(SessionState::Single);
        publish_metadata(
            inner,
            Metadata {
                size: content_length,
                chunks: content_length.into_iter().collect(),
                is_resume: false,
                progress: vec![0.0],
                final_address: final_url.clone(),
                parallel: false,
                resumable: false,
                headers,
                saved_file_path: dest.clone(),
            },
        );

        let expected = content_length.unwrap_or(0);
        let reporter = Arc::new(Reporter::new(&[expected], expected, interval));
        inner.set_state(SessionState::Downloading);
        download_chunk(inner, &dest, &final_url, 0, None, &reporter)?;
        finish(inner, &dest, 1)
    }
}

fn publish_metadata(inner: &Inner, metadata: Metadata) {
    {
        let mut shared = inner.shared();
        shared.metadata = Some(metadata.clone());
    }
    inner.cond.notify_all();
    if inner.listeners.has(EventKind::Metadata) {
        inner.emit(Event::Metadata(metadata));
    }
}

/// Bounded worker pool over the pending chunk ids. The job list is
/// drained LIFO; a worker that finishes a chunk immediately takes the
/// next one, so at most `connections` chunks are in flight at any moment.
fn run_pool(
    inner: &Arc<Inner>,
    dest: &Path,
    url: &str,
    plan: &[ChunkRange],
    pending: Vec<u32>,
    reporter: &Arc<Reporter>,
) -> DownloadResult<()> {
    let worker_count = usize::min(inner.config.connections.max(1) as usize, pending.len());
    let jobs = Arc::new(Mutex::new(pending));
    let failure: Arc<Mutex<Option<DownloadError>>> = Arc::new(Mutex::new(None));
    let plan: Arc<Vec<ChunkRange>> = Arc::new(plan.to_vec());

    let mut handles = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let inner = Arc::clone(inner);
        let jobs = Arc::clone(&jobs);
        let failure = Arc::clone(&failure);
        let plan = Arc::clone(&plan);
        let reporter = Arc::clone(reporter);
        let dest = dest.to_path_buf();
        let url = url.to_string();

        handles.push(thread::spawn(move || loop {
            if inner.stopped() {
                return;
            }
            let id = {
                let Ok(mut jobs) = jobs.lock() else {
                    return;
                };
                match jobs.pop() {
                    Some(id) => id,
                    None => return,
                }
            };
            let Some(range) = plan.get(id as usize).copied() else {
                return;
            };
            if let Err(err) = download_chunk(&inner, &dest, &url, id, Some(range), &reporter) {
                let _ = inner.stop.compare_exchange(
                    STOP_NONE,
                    STOP_FAILED,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                if let Ok(mut failure) = failure.lock() {
                    failure.get_or_insert(err);
                }
                return;
            }
        }));
    }
    for handle in handles {
        let _ = handle.join();
    }

    if let Ok(mut failure) = failure.lock() {
        if let Some(err) = failure.take() {
            return Err(err);
        }
    }
    Ok(())
}

enum AttemptOutcome {
    Completed,
    Aborted,
}

/// Per-chunk retry loop. Every attempt re-requests the full range; sleeps
/// grow linearly with the attempt number. Exhaustion is promoted to a
/// fatal error by the caller.
fn download_chunk(
    inner: &Inner,
    dest: &Path,
    url: &str,
    id: u32,
    range: Option<ChunkRange>,
    reporter: &Reporter,
) -> DownloadResult<()> {
    let config = &inner.config;
    for attempt in 0..=config.max_retry {
        if inner.stopped() {
            return Ok(());
        }
        match run_attempt(inner, dest, url, id, range, reporter) {
            Ok(AttemptOutcome::Completed) => {
                if let Some(snapshot) = reporter.flush_chunk(id) {
                    inner.emit(Event::Progress(snapshot));
                }
                return Ok(());
            }
            Ok(AttemptOutcome::Aborted) => return Ok(()),
            Err(err) => {
                if inner.stopped() {
                    return Ok(());
                }
                warn!(chunk = id, attempt = attempt + 1, error = %err, "chunk attempt failed");
                if attempt < config.max_retry {
                    inner.emit(Event::Retry(RetryInfo {
                        chunk_id: id,
                        attempt: attempt + 1,
                        error: err.to_string(),
                    }));
                    thread::sleep(backoff_delay(config, attempt));
                }
            }
        }
    }
    let (lo, hi) = match range {
        Some(range) => (range.lo, range.hi),
        None => (0, 0),
    };
    Err(DownloadError::Exhausted { chunk: id, lo, hi })
}

/// Sleep before the retry following failed attempt number `attempt`
/// (0-based): `retry_delay + retry_backoff * attempt`.
pub(crate) fn backoff_delay(config: &DownloadConfig, attempt: u32) -> Duration {
    Duration::from_millis(config.retry_delay_ms + config.retry_backoff_ms * u64::from(attempt))
}

fn run_attempt(
    inner: &Inner,
    dest: &Path,
    url: &str,
    id: u32,
    range: Option<ChunkRange>,
    reporter: &Reporter,
) -> DownloadResult<AttemptOutcome> {
    reporter.reset(id);
    let part = part_path(dest, id);
    let mut file =
        File::create(&part).map_err(|err| DownloadError::Filesystem(err.to_string()))?;

    let resp = inner
        .net
        .get(url, &inner.config.http, range.map(|r| (r.lo, r.hi)))?;

    if resp.status != 200 && resp.status != 206 {
        return Err(DownloadError::BadStatus {
            url: url.to_string(),
            status: resp.status,
        });
    }
    if let (Some(chunk), Some(len)) = (range, resp.content_length) {
        if len != chunk.size() {
            return Err(DownloadError::LengthMismatch {
                chunk: id,
                expected: chunk.size(),
                actual: len,
            });
        }
    }
    if range.is_some() && resp.status != 206 {
        return Err(DownloadError::RangeNotHonored {
            chunk: id,
            status: resp.status,
        });
    }
    if range.is_none() {
        if let Some(len) = resp.content_length {
            reporter.set_expected(id, len);
        }
    }

    let mut body = resp.body;
    let mut buffer = vec![0u8; STREAM_BUFFER];
    loop {
        if inner.stopped() {
            return Ok(AttemptOutcome::Aborted);
        }
        let read = body
            .read(&mut buffer)
            .map_err(|err| DownloadError::Network(err.to_string()))?;
        if read == 0 {
            break;
        }
        file.write_all(&buffer[..read])
            .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
        if let Some(snapshot) = reporter.add(id, read as u64) {
            inner.emit(Event::Progress(snapshot));
        }
    }
    file.flush()
        .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
    drop(file);

    // a short body must not masquerade as a completed chunk
    if let Some(chunk) = range {
        let written = fs::metadata(&part).map(|meta| meta.len()).unwrap_or(0);
        if written != chunk.size() {
            return Err(DownloadError::LengthMismatch {
                chunk: id,
                expected: chunk.size(),
                actual: written,
            });
        }
    }

    fs::rename(&part, chunk_path(dest, id))
        .map_err(|err| DownloadError::Filesystem(err.to_string()))?;
    Ok(AttemptOutcome::Completed)
}

fn finish(inner: &Arc<Inner>, dest: &Path, total_chunks: u32) -> DownloadResult<()> {
    if inner.stopped() {
        return Ok(());
    }
    inner.set_state(SessionState::Assembling);
    assemble_chunks(dest, total_chunks, |percentage| {
        inner.emit(Event::Build { percentage });
    })?;
    if inner.stopped() {
        return Ok(());
    }
    {
        let mut shared = inner.shared();
        shared.ended = true;
    }
    inner.emit(Event::End);
    inner.shutdown(None, SessionState::Done);
    Ok(())
}
