//! Background image download worker.
//!
//! One worker thread per transfer. The worker streams the remote image to a
//! local file in fixed-size chunks and publishes immutable
//! [`TransferSnapshot`] values to the owning page over an mpsc channel; it
//! never touches UI state itself. Cancellation is cooperative: an explicit
//! [`CancelToken`] (and, equivalently, a closed progress channel) is checked
//! once per chunk, so a chunk already in flight completes before the worker
//! stops. Every non-success exit removes the partial file.

use crate::engine_config::{self, BootMode};
use crate::errors::SetupError;
use log::{error, info};
use reqwest::blocking::Client;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Transfers are read and written in 256 KiB chunks; progress reporting and
/// cancellation both happen at chunk granularity.
pub const CHUNK_SIZE: usize = 256 * 1024;

const USER_AGENT: &str = "nest-setup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Terminal states are final; the worker publishes nothing after one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::InProgress)
    }
}

/// Read-only view of a transfer, published by the worker thread and consumed
/// by the page. Only the latest snapshot matters to the display.
#[derive(Debug, Clone)]
pub struct TransferSnapshot {
    pub bytes_downloaded: u64,
    pub total_bytes: Option<u64>,
    pub started_at: Instant,
    pub speed_bytes_per_sec: u64,
    pub status: TransferStatus,
    /// Short operator-facing message, set only when `status == Failed`.
    pub last_error: Option<String>,
}

impl TransferSnapshot {
    /// Whole-percent progress, `None` when the remote did not report a size.
    pub fn percent(&self) -> Option<u8> {
        match self.total_bytes {
            Some(total) if total > 0 => Some((self.bytes_downloaded * 100 / total) as u8),
            _ => None,
        }
    }
}

/// Cancellation token shared between the page and its worker. The page sets
/// it; the worker polls it once per chunk.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    /// Must already exist; the worker does not create directories.
    pub dest_dir: PathBuf,
    /// Where the answer file goes once the image is verified.
    pub answers_path: PathBuf,
    /// Grace period before the first snapshot so the page gets one render
    /// pass to mount its progress widgets.
    pub initial_delay: Duration,
    pub timeout_secs: u64,
}

impl DownloadRequest {
    pub fn new(url: String, dest_dir: PathBuf, answers_path: PathBuf) -> Self {
        Self {
            url,
            dest_dir,
            answers_path,
            initial_delay: Duration::from_millis(500),
            timeout_secs: 3600,
        }
    }
}

/// Delivered on the completion channel only after the image is on disk and
/// the answer file has been written.
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub path: PathBuf,
    pub mode: BootMode,
}

pub struct DownloadHandle {
    cancel: CancelToken,
    thread: JoinHandle<()>,
}

impl DownloadHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) {
        let _ = self.thread.join();
    }
}

/// Start a transfer on its own thread.
///
/// Progress snapshots arrive on `progress_tx`; `completion_tx` fires once,
/// and only for a fully successful transfer. Failure and cancellation are
/// visible as the final snapshot's status.
pub fn spawn(
    request: DownloadRequest,
    progress_tx: Sender<TransferSnapshot>,
    completion_tx: Sender<DownloadedImage>,
) -> DownloadHandle {
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let thread = thread::spawn(move || run(request, worker_cancel, progress_tx, completion_tx));
    DownloadHandle { cancel, thread }
}

/// Outermost worker boundary: whatever happens inside the transfer is
/// converted to a terminal snapshot here. The thread never unwinds into the
/// process.
fn run(
    request: DownloadRequest,
    cancel: CancelToken,
    progress_tx: Sender<TransferSnapshot>,
    completion_tx: Sender<DownloadedImage>,
) {
    let mut session = TransferSession::new(cancel, progress_tx);
    match transfer(&request, &mut session) {
        Ok(Some(image)) => {
            info!(
                "Downloaded {} ({} bytes), answers written to {}",
                image.path.display(),
                session.bytes_downloaded,
                request.answers_path.display()
            );
            session.publish_terminal(TransferStatus::Completed, None);
            let _ = completion_tx.send(image);
        }
        Ok(None) => {
            info!("Download of {} cancelled, partial file removed", request.url);
            session.publish_terminal(TransferStatus::Cancelled, None);
        }
        Err(err) => {
            error!("Download of {} failed: {:?}", request.url, err);
            session.publish_terminal(TransferStatus::Failed, Some(err.to_string()));
        }
    }
}

/// Worker-side transfer bookkeeping; owns the progress channel and the
/// cancellation checks.
struct TransferSession {
    cancel: CancelToken,
    progress_tx: Sender<TransferSnapshot>,
    started_at: Instant,
    bytes_downloaded: u64,
    total_bytes: Option<u64>,
    sink_gone: bool,
}

impl TransferSession {
    fn new(cancel: CancelToken, progress_tx: Sender<TransferSnapshot>) -> Self {
        Self {
            cancel,
            progress_tx,
            started_at: Instant::now(),
            bytes_downloaded: 0,
            total_bytes: None,
            sink_gone: false,
        }
    }

    fn snapshot(&self, status: TransferStatus, last_error: Option<String>) -> TransferSnapshot {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            (self.bytes_downloaded as f64 / elapsed) as u64
        } else {
            0
        };
        TransferSnapshot {
            bytes_downloaded: self.bytes_downloaded,
            total_bytes: self.total_bytes,
            started_at: self.started_at,
            speed_bytes_per_sec: speed,
            status,
            last_error,
        }
    }

    /// Returns false when the receiving page is gone, which counts as
    /// cancellation.
    fn publish_progress(&mut self) -> bool {
        if self
            .progress_tx
            .send(self.snapshot(TransferStatus::InProgress, None))
            .is_err()
        {
            self.sink_gone = true;
        }
        !self.sink_gone
    }

    fn publish_terminal(&self, status: TransferStatus, last_error: Option<String>) {
        let _ = self.progress_tx.send(self.snapshot(status, last_error));
    }

    fn cancelled(&self) -> bool {
        self.sink_gone || self.cancel.is_cancelled()
    }
}

enum BodyEnd {
    Complete,
    Cancelled,
}

/// Run one transfer end to end. `Ok(Some(_))` means the image is on disk and
/// the answer file written; `Ok(None)` means cancelled. The partial file is
/// removed on cancellation and on every error path.
fn transfer(
    request: &DownloadRequest,
    session: &mut TransferSession,
) -> Result<Option<DownloadedImage>, SetupError> {
    let target = target_path(&request.url, &request.dest_dir)?;

    match fetch_to_file(request, &target, session) {
        Ok(BodyEnd::Complete) => match finish(&target, &request.answers_path) {
            Ok(image) => Ok(Some(image)),
            Err(err) => {
                let _ = fs::remove_file(&target);
                Err(err)
            }
        },
        Ok(BodyEnd::Cancelled) => {
            let _ = fs::remove_file(&target);
            Ok(None)
        }
        Err(err) => {
            let _ = fs::remove_file(&target);
            Err(err)
        }
    }
}

/// Derive the local file path from the URL's final path segment.
pub fn target_path(url: &str, dest_dir: &Path) -> Result<PathBuf, SetupError> {
    let parsed = url::Url::parse(url).map_err(|err| SetupError::InvalidUrl(err.to_string()))?;
    let name = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SetupError::InvalidUrl(format!("no file name in {}", url)))?;
    Ok(dest_dir.join(name))
}

fn fetch_to_file(
    request: &DownloadRequest,
    target: &Path,
    session: &mut TransferSession,
) -> Result<BodyEnd, SetupError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(request.timeout_secs))
        .build()
        .map_err(|err| SetupError::Connection(err.to_string()))?;

    // The destination is created before the request goes out; every failure
    // below shares the same cleanup in `transfer`.
    let mut dest = File::create(target)?;

    let response = client
        .get(&request.url)
        .send()
        .map_err(|err| SetupError::Connection(err.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(SetupError::Http(status.as_u16()));
    }
    session.total_bytes = response.content_length();

    if !request.initial_delay.is_zero() {
        thread::sleep(request.initial_delay);
    }

    let end = copy_body(response, &mut dest, session)?;
    dest.flush()?;
    Ok(end)
}

fn copy_body(
    mut body: impl Read,
    dest: &mut File,
    session: &mut TransferSession,
) -> Result<BodyEnd, SetupError> {
    let mut chunk = vec![0u8; CHUNK_SIZE];
    loop {
        let read =
            read_chunk(&mut body, &mut chunk).map_err(|err| SetupError::Connection(err.to_string()))?;
        if read == 0 {
            return Ok(BodyEnd::Complete);
        }
        dest.write_all(&chunk[..read])?;
        session.bytes_downloaded += read as u64;

        // Cooperative cancellation point: once per chunk, never mid-chunk.
        if session.cancelled() {
            return Ok(BodyEnd::Cancelled);
        }
        if !session.publish_progress() {
            return Ok(BodyEnd::Cancelled);
        }
    }
}

/// Read until `chunk` is full or the body ends. Filling the whole chunk
/// keeps the cadence at one snapshot per 256 KiB no matter how the transport
/// fragments the stream.
fn read_chunk(body: &mut impl Read, chunk: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        match body.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn finish(target: &Path, answers_path: &Path) -> Result<DownloadedImage, SetupError> {
    let mode = engine_config::classify_image(target)?;
    engine_config::write_answers(answers_path, &mode)?;
    Ok(DownloadedImage {
        path: target.to_path_buf(),
        mode,
    })
}

/// Human-readable byte count, scaled through B, KB, MB, GB.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}

/// Human-readable transfer rate, scaled through B/s, KB/s, MB/s, GB/s.
pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use std::io::Cursor;
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn ova_body(len: usize) -> Vec<u8> {
        let mut body = vec![0x1f, 0x8b, 0x08];
        body.resize(len, 0xab);
        body
    }

    fn test_request(url: String, dest_dir: PathBuf, answers_path: PathBuf) -> DownloadRequest {
        DownloadRequest {
            initial_delay: Duration::ZERO,
            timeout_secs: 5,
            ..DownloadRequest::new(url, dest_dir, answers_path)
        }
    }

    #[test]
    fn percent_floors_and_handles_missing_total() {
        let mut snapshot = TransferSnapshot {
            bytes_downloaded: 262144,
            total_bytes: Some(1048576),
            started_at: Instant::now(),
            speed_bytes_per_sec: 0,
            status: TransferStatus::InProgress,
            last_error: None,
        };
        assert_eq!(snapshot.percent(), Some(25));
        snapshot.bytes_downloaded = 1048575;
        assert_eq!(snapshot.percent(), Some(99));
        snapshot.total_bytes = None;
        assert_eq!(snapshot.percent(), None);
        snapshot.total_bytes = Some(0);
        assert_eq!(snapshot.percent(), None);
    }

    #[test]
    fn rate_scales_through_every_unit() {
        assert_eq!(format_rate(512), "512.00 B/s");
        assert_eq!(format_rate(2048), "2.00 KB/s");
        assert_eq!(format_rate(5 * 1024 * 1024), "5.00 MB/s");
        assert_eq!(format_rate(3 * 1024 * 1024 * 1024), "3.00 GB/s");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }

    #[test]
    fn target_path_uses_final_url_segment() {
        let dir = Path::new("/downloads");
        let path = target_path("http://example.org/images/engine.ova", dir).unwrap();
        assert_eq!(path, Path::new("/downloads/engine.ova"));
        assert!(target_path("http://example.org/", dir).is_err());
        assert!(target_path("not a url", dir).is_err());
    }

    #[test]
    fn chunk_cadence_is_one_snapshot_per_256k() {
        let dir = tempdir().unwrap();
        let dest_path = dir.path().join("engine.ova");
        let mut dest = File::create(&dest_path).unwrap();

        let (tx, rx) = mpsc::channel();
        let mut session = TransferSession::new(CancelToken::new(), tx);
        session.total_bytes = Some(1048576);

        let end = copy_body(Cursor::new(ova_body(1048576)), &mut dest, &mut session).unwrap();
        assert!(matches!(end, BodyEnd::Complete));
        assert_eq!(session.bytes_downloaded, 1048576);

        let percents: Vec<_> = rx.try_iter().filter_map(|s| s.percent()).collect();
        assert_eq!(percents, vec![25, 50, 75, 100]);
    }

    /// Cancels itself after the first chunk has been served, so the
    /// per-chunk cancellation check fires deterministically.
    struct CancellingReader {
        inner: Cursor<Vec<u8>>,
        cancel: CancelToken,
        after: u64,
        served: u64,
    }

    impl Read for CancellingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.served += n as u64;
            if self.served >= self.after {
                self.cancel.cancel();
            }
            Ok(n)
        }
    }

    #[test]
    fn cancellation_stops_after_the_chunk_in_flight() {
        let dir = tempdir().unwrap();
        let mut dest = File::create(dir.path().join("engine.ova")).unwrap();

        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let mut session = TransferSession::new(cancel.clone(), tx);
        let body = CancellingReader {
            inner: Cursor::new(ova_body(1048576)),
            cancel,
            after: CHUNK_SIZE as u64,
            served: 0,
        };

        let end = copy_body(body, &mut dest, &mut session).unwrap();
        assert!(matches!(end, BodyEnd::Cancelled));
        // The chunk in flight completed; nothing was published after it.
        assert_eq!(session.bytes_downloaded, CHUNK_SIZE as u64);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn dropped_progress_receiver_counts_as_cancellation() {
        let dir = tempdir().unwrap();
        let mut dest = File::create(dir.path().join("engine.ova")).unwrap();

        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut session = TransferSession::new(CancelToken::new(), tx);

        let end = copy_body(Cursor::new(ova_body(1048576)), &mut dest, &mut session).unwrap();
        assert!(matches!(end, BodyEnd::Cancelled));
        assert_eq!(session.bytes_downloaded, CHUNK_SIZE as u64);
    }

    #[test]
    fn full_transfer_writes_image_and_answers() {
        let server = MockServer::start();
        let body = ova_body(1048576);
        server.mock(|when, then| {
            when.method(GET).path("/engine.ova");
            then.status(200).body(&body);
        });

        let downloads = tempdir().unwrap();
        let answers = downloads.path().join("answers.conf");
        let request = test_request(
            server.url("/engine.ova"),
            downloads.path().to_path_buf(),
            answers.clone(),
        );

        let (progress_tx, progress_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        spawn(request, progress_tx, completion_tx).join();

        let snapshots: Vec<_> = progress_rx.try_iter().collect();
        let progress_percents: Vec<_> = snapshots
            .iter()
            .filter(|s| s.status == TransferStatus::InProgress)
            .filter_map(|s| s.percent())
            .collect();
        assert_eq!(progress_percents, vec![25, 50, 75, 100]);
        assert_eq!(snapshots.last().unwrap().status, TransferStatus::Completed);

        let image = completion_rx.try_recv().expect("completion must fire once");
        assert!(completion_rx.try_recv().is_err());
        let expected = downloads.path().join("engine.ova");
        assert_eq!(image.path, expected);
        assert_eq!(fs::read(&expected).unwrap(), body);

        let written = fs::read_to_string(&answers).unwrap();
        assert!(written.contains("OVEHOSTED_VM/vmBoot=str:disk"));
        assert!(written.contains(&format!("OVEHOSTED_VM/ovfArchive=str:{}", expected.display())));
    }

    #[test]
    fn http_error_leaves_no_file_behind() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/engine.ova");
            then.status(404);
        });

        let downloads = tempdir().unwrap();
        let request = test_request(
            server.url("/engine.ova"),
            downloads.path().to_path_buf(),
            downloads.path().join("answers.conf"),
        );

        let (progress_tx, progress_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        spawn(request, progress_tx, completion_tx).join();

        let last = progress_rx.try_iter().last().unwrap();
        assert_eq!(last.status, TransferStatus::Failed);
        assert!(last.last_error.as_deref().unwrap().contains("404"));
        assert!(!downloads.path().join("engine.ova").exists());
        assert!(completion_rx.try_recv().is_err());
    }

    #[test]
    fn connection_error_is_a_failure_not_a_panic() {
        // Nothing listens on this port.
        let downloads = tempdir().unwrap();
        let request = test_request(
            "http://127.0.0.1:1/engine.ova".to_string(),
            downloads.path().to_path_buf(),
            downloads.path().join("answers.conf"),
        );

        let (progress_tx, progress_rx) = mpsc::channel();
        let (completion_tx, _completion_rx) = mpsc::channel::<DownloadedImage>();
        spawn(request, progress_tx, completion_tx).join();

        let last = progress_rx.try_iter().last().unwrap();
        assert_eq!(last.status, TransferStatus::Failed);
        assert!(!downloads.path().join("engine.ova").exists());
    }

    #[test]
    fn cancelled_transfer_deletes_partial_and_skips_answers() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/engine.ova");
            then.status(200)
                .body(ova_body(1048576))
                .delay(Duration::from_millis(100));
        });

        let downloads = tempdir().unwrap();
        let answers = downloads.path().join("answers.conf");
        let request = test_request(
            server.url("/engine.ova"),
            downloads.path().to_path_buf(),
            answers.clone(),
        );

        let (progress_tx, progress_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        let handle = spawn(request, progress_tx, completion_tx);
        handle.cancel();
        handle.join();

        let last = progress_rx.try_iter().last().unwrap();
        assert_eq!(last.status, TransferStatus::Cancelled);
        assert!(!downloads.path().join("engine.ova").exists());
        assert!(!answers.exists());
        assert!(completion_rx.try_recv().is_err());
    }

    #[test]
    fn unrecognized_download_is_failed_and_removed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/engine.img");
            then.status(200).body(b"neither ova nor iso");
        });

        let downloads = tempdir().unwrap();
        let answers = downloads.path().join("answers.conf");
        let request = test_request(
            server.url("/engine.img"),
            downloads.path().to_path_buf(),
            answers.clone(),
        );

        let (progress_tx, progress_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        spawn(request, progress_tx, completion_tx).join();

        let last = progress_rx.try_iter().last().unwrap();
        assert_eq!(last.status, TransferStatus::Failed);
        assert!(!downloads.path().join("engine.img").exists());
        assert!(!answers.exists());
        assert!(completion_rx.try_recv().is_err());
    }
}
