//! Host side of the filesystem-namespace IPC channel with a running container.
//!
//! Each group gets a directory `ipc/<group>/`. The container writes
//! `request-<uuid>.json`, the host answers with `response-<uuid>.json`
//! (temp file + rename), and the container streams chunks by appending to
//! `stream.jsonl`, finishing with `stream.done`. Every frame on disk is a
//! [`SignedEnvelope`] — unsigned or tampered frames are deleted and counted
//! as rejections, never acted on.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use notify::{Config, Event, EventKind, RecommendedWatcher, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use corvus_protocol::{open, seal, IpcRequest, IpcResponse, StreamDone, StreamFrame};

/// Debounce window after a filesystem notification before draining.
const DEBOUNCE_MS: u64 = 100;
/// Fallback poll interval for the request directory, in case notify misses an event.
const REQUEST_POLL_FALLBACK_SECS: u64 = 30;
/// Fallback poll interval while tailing `stream.jsonl`.
const STREAM_POLL_FALLBACK_MS: u64 = 100;
/// A stream with no new frame and no `stream.done` for this long is abandoned.
const STREAM_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Host-side handle to one group's IPC namespace.
pub struct IpcChannel {
    dir: PathBuf,
    secret: Vec<u8>,
    rejections: AtomicU64,
}

impl IpcChannel {
    pub fn new(dir: impl Into<PathBuf>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            dir: dir.into(),
            secret: secret.into(),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames rejected so far for failing HMAC verification.
    pub fn rejection_count(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Spawn the request watcher: emits each valid `IpcRequest` on `tx` and
    /// deletes the request file once it has been read (success or rejection).
    pub fn spawn_request_watcher(
        self: Arc<Self>,
        tx: mpsc::Sender<IpcRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
                warn!(dir = %self.dir.display(), error = %e, "ipc: failed to create namespace directory");
                return;
            }

            let (notify_tx, mut notify_rx) = mpsc::channel::<()>(16);
            let _watcher = match build_watcher(&self.dir, notify_tx) {
                Ok(w) => Some(w),
                Err(e) => {
                    warn!(error = %e, "ipc: request watcher setup failed, falling back to polling only");
                    None
                }
            };

            loop {
                tokio::select! {
                    _ = notify_rx.recv() => {
                        tokio::time::sleep(std::time::Duration::from_millis(DEBOUNCE_MS)).await;
                        while notify_rx.try_recv().is_ok() {}
                        self.drain_requests(&tx).await;
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_secs(REQUEST_POLL_FALLBACK_SECS)) => {
                        self.drain_requests(&tx).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!(dir = %self.dir.display(), "ipc: request watcher shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Read and remove every pending `request-*.json` file, forwarding parsed
    /// requests on `tx`. Files that fail HMAC verification are deleted and
    /// counted as a rejection; the payload is never acted on.
    async fn drain_requests(&self, tx: &mpsc::Sender<IpcRequest>) {
        let dir = self.dir.clone();
        let entries = match tokio::task::spawn_blocking(move || list_request_files(&dir)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                debug!(error = %e, "ipc: failed to list request directory");
                return;
            }
            Err(e) => {
                warn!(error = %e, "ipc: request listing task panicked");
                return;
            }
        };

        for path in entries {
            match self.read_and_verify_request(&path).await {
                Ok(req) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    if tx.send(req).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ipc: request frame rejected");
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    let _ = tokio::fs::remove_file(&path).await;
                }
            }
        }
    }

    async fn read_and_verify_request(&self, path: &Path) -> Result<IpcRequest, String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
        let envelope: corvus_protocol::SignedEnvelope =
            serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        open(&self.secret, &envelope).map_err(|e| e.to_string())
    }

    /// Write `response` atomically: seal it, write to a temp file, then
    /// rename into place so a partial write is never observed by the container.
    pub async fn write_response(&self, response: &IpcResponse) -> io::Result<()> {
        let envelope = seal(&self.secret, response)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let body = serde_json::to_vec(&envelope)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let final_path = self.dir.join(format!("response-{}.json", response.id));
        let tmp_path = self.dir.join(format!("response-{}.json.tmp", response.id));
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Tail `stream.jsonl`, emitting each verified [`StreamFrame`] on `tx`,
    /// until `stream.done` appears, the timeout elapses with no new frame, or
    /// shutdown fires. Returns the parsed [`StreamDone`] if the stream ended
    /// normally.
    pub async fn tail_stream(
        &self,
        tx: mpsc::Sender<StreamFrame>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<StreamDone> {
        let stream_path = self.dir.join("stream.jsonl");
        let done_path = self.dir.join("stream.done");
        let mut offset: u64 = 0;
        let mut last_progress = tokio::time::Instant::now();

        loop {
            if let Some(done) = self.check_done(&done_path).await {
                return Some(done);
            }

            tokio::select! {
                result = self.read_new_lines(&stream_path, offset) => {
                    match result {
                        Ok((lines, new_offset)) if new_offset > offset => {
                            offset = new_offset;
                            last_progress = tokio::time::Instant::now();
                            for line in lines {
                                if let Some(frame) = self.parse_stream_line(&line) {
                                    if tx.send(frame).await.is_err() {
                                        return None;
                                    }
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "ipc: stream tail read error"),
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(STREAM_POLL_FALLBACK_MS)).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return None;
                    }
                }
            }

            if last_progress.elapsed().as_secs() >= STREAM_HEARTBEAT_TIMEOUT_SECS {
                warn!(dir = %self.dir.display(), "ipc: stream heartbeat timeout, abandoning tail");
                return None;
            }
        }
    }

    async fn check_done(&self, done_path: &Path) -> Option<StreamDone> {
        let bytes = tokio::fs::read(done_path).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    fn parse_stream_line(&self, line: &str) -> Option<StreamFrame> {
        let envelope: corvus_protocol::SignedEnvelope = serde_json::from_str(line).ok()?;
        match open(&self.secret, &envelope) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(error = %e, "ipc: stream frame rejected");
                self.rejections.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn read_new_lines(&self, path: &Path, offset: u64) -> io::Result<(Vec<String>, u64)> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || read_new_lines_blocking(&path, offset))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

fn build_watcher(dir: &Path, tx: mpsc::Sender<()>) -> notify::Result<RecommendedWatcher> {
    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    let _ = tx.try_send(());
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(dir, notify::RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn list_request_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("request-") && name.ends_with(".json") {
            out.push(entry.path());
        }
    }
    out.sort();
    Ok(out)
}

fn read_new_lines_blocking(path: &Path, offset: u64) -> io::Result<(Vec<String>, u64)> {
    use std::io::{BufRead, Seek, SeekFrom};

    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), offset)),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len <= offset {
        return Ok((Vec::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let reader = io::BufReader::new(&file);
    let mut lines = Vec::new();
    let mut consumed: u64 = 0;
    for line in reader.lines() {
        let line = line?;
        consumed += line.len() as u64 + 1;
        if !line.trim().is_empty() {
            lines.push(line);
        }
    }
    Ok((lines, offset + consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let nonce = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let dir = std::env::temp_dir().join(format!("corvus-ipc-test-{label}-{nonce}"));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn write_response_is_readable_after_rename() {
        let dir = scratch_dir("write-response");
        let channel = IpcChannel::new(dir.clone(), b"test-secret".to_vec());

        let resp = IpcResponse::ok("req-1", serde_json::json!({"answer": 42}));
        channel.write_response(&resp).await.unwrap();

        let path = dir.join("response-req-1.json");
        assert!(path.exists());
        assert!(!dir.join("response-req-1.json.tmp").exists());

        let bytes = tokio::fs::read(&path).await.unwrap();
        let envelope: corvus_protocol::SignedEnvelope = serde_json::from_slice(&bytes).unwrap();
        let opened: IpcResponse = open(b"test-secret", &envelope).unwrap();
        assert_eq!(opened.id, "req-1");
        assert!(opened.ok);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn drain_requests_forwards_valid_and_counts_tampered() {
        let dir = scratch_dir("drain");
        let channel = Arc::new(IpcChannel::new(dir.clone(), b"shared-secret".to_vec()));

        let good = IpcRequest { id: "a".into(), op: "chat.run".into(), params: None };
        let envelope = seal(b"shared-secret", &good).unwrap();
        tokio::fs::write(
            dir.join("request-a.json"),
            serde_json::to_vec(&envelope).unwrap(),
        )
        .await
        .unwrap();

        let mut tampered = seal(b"shared-secret", &good).unwrap();
        tampered.payload["op"] = serde_json::json!("chat.delete_everything");
        tokio::fs::write(
            dir.join("request-b.json"),
            serde_json::to_vec(&tampered).unwrap(),
        )
        .await
        .unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        channel.drain_requests(&tx).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id, "a");
        assert!(rx.try_recv().is_err());
        assert_eq!(channel.rejection_count(), 1);
        assert!(!dir.join("request-a.json").exists());
        assert!(!dir.join("request-b.json").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn tail_stream_emits_frames_then_stops_on_done() {
        let dir = scratch_dir("tail");
        let channel = IpcChannel::new(dir.clone(), b"tail-secret".to_vec());

        let frame = StreamFrame { index: 0, text: "hello".into(), ts: 0 };
        let envelope = seal(b"tail-secret", &frame).unwrap();
        let mut line = serde_json::to_string(&envelope).unwrap();
        line.push('\n');
        tokio::fs::write(dir.join("stream.jsonl"), line).await.unwrap();

        let done = StreamDone { total_chunks: 1, completed_at: 0 };
        tokio::fs::write(
            dir.join("stream.done"),
            serde_json::to_vec(&done).unwrap(),
        )
        .await
        .unwrap();

        let (tx, _rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = channel.tail_stream(tx, shutdown_rx).await;
        assert_eq!(result.unwrap().total_chunks, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
