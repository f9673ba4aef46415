//! Exposes the DOS machine as a [`libunftp`] [`StorageBackend`](libunftp::storage::StorageBackend).
//!
//! Every operation routes through [`crate::shell::ShellDriver`] (directory
//! listing, mkdir/rmdir/unlink/rename, open) or [`crate::xmodem`] (the actual
//! file payload once a transfer command has put the device into XMODEM mode).
//! The serial channel and listing cache are process-wide singletons
//! ([`SharedState`]); each FTP connection gets its own [`SerialPathIo`]
//! holding an `Arc` to that shared state plus its own allocation hint and
//! open-transfer state.

mod dirlist;
mod vpath;

pub use dirlist::{DirEntry, ListingCache};
pub use vpath::VPath;

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Local, NaiveDate, TimeZone};
use futures::stream;
use libunftp::auth::DefaultUser;
use libunftp::storage::{self, Fileinfo, Metadata, StorageBackend};
use tokio::io::AsyncRead;
use tokio::sync::Mutex;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::serial::SerialChannel;
use crate::shell::ShellDriver;
use crate::xmodem::{XmodemReceiver, XmodemSender};

/// Command templates substituted with `{filename}` / `{size}` when opening a
/// transfer. See [`substitute`].
#[derive(Debug, Clone)]
pub struct Templates {
    pub send: String,
    pub size: String,
    pub receive: String,
}

/// The literal tail the shell driver waits for once an `ftrans`-family
/// command has told the device to switch into XMODEM mode.
const XFER_READY_TAIL: &[u8] = b" ... ";

/// Process-wide state shared by every connection's [`SerialPathIo`].
pub struct SharedState {
    channel: Arc<SerialChannel>,
    cache: Mutex<ListingCache>,
    templates: Templates,
    /// Serializes every operation that drives the shell or XMODEM over
    /// `channel` — the serial link is a single physical resource and two
    /// connections writing to it concurrently would interleave byte-for-byte
    /// on the wire. An `Arc` so the guard can outlive a single `async fn`
    /// call (see `get`, which hands it to the caller-held `AsyncRead`).
    io_lock: Arc<Mutex<()>>,
}

impl SharedState {
    pub fn new(channel: Arc<SerialChannel>, templates: Templates) -> Arc<Self> {
        Arc::new(Self {
            channel,
            cache: Mutex::new(ListingCache::new()),
            templates,
            io_lock: Arc::new(Mutex::new(())),
        })
    }
}

/// Metadata for a DOS file, directory, or one of the two synthetic levels
/// (root, drive root).
#[derive(Debug, Clone)]
pub struct DosMetadata {
    size: u64,
    is_dir: bool,
    modified: SystemTime,
}

impl Metadata for DosMetadata {
    fn len(&self) -> u64 {
        self.size
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn is_file(&self) -> bool {
        !self.is_dir
    }

    fn is_symlink(&self) -> bool {
        false
    }

    fn modified(&self) -> storage::Result<SystemTime> {
        Ok(self.modified)
    }

    fn gid(&self) -> u32 {
        0
    }

    fn uid(&self) -> u32 {
        0
    }
}

fn synthetic_metadata(is_dir: bool) -> DosMetadata {
    DosMetadata {
        size: 0,
        is_dir,
        modified: UNIX_EPOCH,
    }
}

fn entry_metadata(entry: &DirEntry) -> DosMetadata {
    DosMetadata {
        size: entry.size,
        is_dir: entry.is_dir,
        modified: date_to_system_time(entry.date),
    }
}

/// DOS `DIR` dates carry no time of day, so midnight is treated as local
/// time (matching how the device's own clock reports them) rather than UTC.
fn date_to_system_time(date: NaiveDate) -> SystemTime {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is always a valid time");
    let local = Local
        .from_local_datetime(&midnight)
        .single()
        .unwrap_or_else(|| Local.from_utc_datetime(&midnight));
    let secs = local.timestamp();
    if secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-secs) as u64)
    }
}

/// Errors produced by the path-IO layer before translation to
/// [`libunftp::storage::Error`] at the trait boundary.
#[derive(Debug)]
pub enum PathIoError {
    NotFound,
    NotADirectory,
    UnsupportedMode(String),
}

impl std::fmt::Display for PathIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathIoError::NotFound => write!(f, "no such file or directory"),
            PathIoError::NotADirectory => write!(f, "not a directory"),
            PathIoError::UnsupportedMode(m) => write!(f, "unsupported open mode: {m}"),
        }
    }
}

impl std::error::Error for PathIoError {}

impl From<PathIoError> for storage::Error {
    fn from(err: PathIoError) -> Self {
        let kind = match err {
            PathIoError::NotFound => storage::ErrorKind::PermanentFileNotAvailable,
            PathIoError::NotADirectory => storage::ErrorKind::PermanentDirectoryNotAvailable,
            PathIoError::UnsupportedMode(_) => storage::ErrorKind::CommandNotImplemented,
        };
        storage::Error::new(kind, err)
    }
}

/// Substitute `{filename}` and `{size}` in `template`, leaving any other text
/// (including stray braces) untouched.
fn substitute(template: &str, filename: &str, size: Option<u64>) -> String {
    let mut out = template.replace("{filename}", filename);
    if let Some(size) = size {
        out = out.replace("{size}", &size.to_string());
    }
    out
}

/// Per-connection facade over the shared serial channel and listing cache.
pub struct SerialPathIo {
    shared: Arc<SharedState>,
    alloc_hint: StdMutex<Option<u64>>,
}

impl Debug for SerialPathIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPathIo").finish_non_exhaustive()
    }
}

impl SerialPathIo {
    pub fn new(shared: Arc<SharedState>) -> Self {
        Self {
            shared,
            alloc_hint: StdMutex::new(None),
        }
    }

    /// Records the `ALLO <n>` hint for the next write-open. A malformed or
    /// absent `n` clears it.
    pub fn set_allocation_hint(&self, n: Option<u64>) {
        *self.alloc_hint.lock().unwrap() = n;
    }

    fn take_allocation_hint(&self) -> Option<u64> {
        self.alloc_hint.lock().unwrap().take()
    }

    /// List the directory `dos_dir_arg` denotes, consulting and populating
    /// the shared cache. Returns `None` if the device reports the directory
    /// or drive doesn't exist.
    async fn dir(&self, dos_dir_arg: &str) -> Option<Vec<DirEntry>> {
        {
            let cache = self.shared.cache.lock().await;
            if let Some(entries) = cache.get(dos_dir_arg) {
                return Some(entries.to_vec());
            }
        }

        // Hold the channel lock across the command and the cache insert so
        // the cache is only ever mutated while the wire itself is ours.
        let _guard = self.shared.io_lock.lock().await;
        let driver = ShellDriver::new(self.shared.channel.clone());
        let command = format!("dir {dos_dir_arg}").into_bytes();
        let captured = driver.run(&command, crate::shell::PROMPT_TAIL).await;
        let text = String::from_utf8_lossy(&captured);
        let parsed = dirlist::parse_listing(&text);

        if let Some(entries) = &parsed {
            let mut cache = self.shared.cache.lock().await;
            cache.insert(dos_dir_arg.to_string(), entries.clone());
        }
        parsed
    }

    async fn invalidate(&self, dos_dir_arg: &str) {
        self.shared.cache.lock().await.invalidate(dos_dir_arg);
    }

    async fn run_command(&self, command: &str) {
        let _guard = self.shared.io_lock.lock().await;
        let driver = ShellDriver::new(self.shared.channel.clone());
        driver.run(command.as_bytes(), crate::shell::PROMPT_TAIL).await;
    }

    async fn exists(&self, p: &VPath) -> bool {
        if p.is_root() {
            return true;
        }
        if p.depth() == 1 {
            let letter = p.drive().unwrap_or_default().to_string();
            return self.scan_drives().await.into_iter().any(|d| d == letter);
        }
        let parent = p.parent();
        match self.dir(&parent.to_dos_dir_arg()).await {
            Some(entries) => entries.iter().any(|e| Some(e.name.as_str()) == p.name()),
            None => false,
        }
    }

    /// Probe drive letters `c` through `z` in order, stopping at the first
    /// one whose listing is absent. Every letter before that point is
    /// present.
    async fn scan_drives(&self) -> Vec<String> {
        let mut present = Vec::new();
        for letter in 'c'..='z' {
            let drive = VPath::parse(&format!("/{letter}"));
            if self.dir(&drive.drive_arg()).await.is_none() {
                break;
            }
            present.push(letter.to_string());
        }
        present
    }

    async fn lookup(&self, p: &VPath) -> Result<DirEntry, PathIoError> {
        let parent = p.parent();
        let entries = self.dir(&parent.to_dos_dir_arg()).await.ok_or(PathIoError::NotFound)?;
        entries
            .into_iter()
            .find(|e| Some(e.name.as_str()) == p.name())
            .ok_or(PathIoError::NotFound)
    }

    /// `true` for root and drive roots (always directories); otherwise look
    /// up the entry in its parent's listing and return its flag. Fails
    /// explicitly rather than falling through when the entry is absent.
    async fn is_dir(&self, p: &VPath) -> Result<bool, PathIoError> {
        if p.depth() < 2 {
            return Ok(true);
        }
        Ok(self.lookup(p).await?.is_dir)
    }
}

fn vpath_from(path: &Path) -> VPath {
    VPath::parse(&path.to_string_lossy())
}

#[async_trait]
impl StorageBackend<DefaultUser> for SerialPathIo {
    type Metadata = DosMetadata;

    async fn metadata<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, path: P) -> storage::Result<Self::Metadata> {
        let p = vpath_from(path.as_ref());
        if p.depth() < 2 {
            return Ok(synthetic_metadata(true));
        }
        let entry = self.lookup(&p).await?;
        Ok(entry_metadata(&entry))
    }

    async fn list<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, path: P) -> storage::Result<Vec<Fileinfo<PathBuf, Self::Metadata>>> {
        let p = vpath_from(path.as_ref());

        if p.is_root() {
            let out = self
                .scan_drives()
                .await
                .into_iter()
                .map(|letter| Fileinfo {
                    path: PathBuf::from(format!("/{letter}")),
                    metadata: synthetic_metadata(true),
                })
                .collect();
            return Ok(out);
        }

        let entries = self.dir(&p.to_dos_dir_arg()).await.ok_or(PathIoError::NotFound)?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let child = p.join(&e.name);
                Fileinfo {
                    path: PathBuf::from(child.to_virtual()),
                    metadata: entry_metadata(&e),
                }
            })
            .collect())
    }

    async fn get<P: AsRef<Path> + Send + Debug>(
        &self,
        _user: &DefaultUser,
        path: P,
        _start_pos: u64,
    ) -> storage::Result<Box<dyn AsyncRead + Send + Sync + Unpin>> {
        let p = vpath_from(path.as_ref());
        let entry = self.lookup(&p).await?;

        // Held across the whole download, not just this call: the stream
        // this function returns is polled by the caller long after we
        // return, and the wire must stay ours until the transfer is done.
        let guard = self.shared.io_lock.clone().lock_owned().await;

        let command = substitute(&self.shared.templates.send, &p.to_dos(), None);
        self.run_command_wait_ready_locked(&command).await;

        let receiver = XmodemReceiver::start(self.shared.channel.clone(), entry.size).await;

        let stream = stream::unfold((receiver, guard), |(mut receiver, guard)| async move {
            let chunk = receiver.read().await;
            if chunk.is_empty() {
                None
            } else {
                Some((Ok::<_, io::Error>(Bytes::from(chunk)), (receiver, guard)))
            }
        });

        Ok(Box::new(StreamReader::new(stream)))
    }

    async fn put<P: AsRef<Path> + Send + Debug, R: AsyncRead + Send + Sync + Unpin + 'static>(
        &self,
        _user: &DefaultUser,
        mut input: R,
        path: P,
        _start_pos: u64,
    ) -> storage::Result<u64> {
        let p = vpath_from(path.as_ref());
        self.invalidate(&p.parent().to_dos_dir_arg()).await;

        let hint = self.take_allocation_hint();
        let command = match hint {
            Some(n) => {
                let filename = substitute(&self.shared.templates.receive, &p.to_dos(), None);
                let size = substitute(&self.shared.templates.size, &p.to_dos(), Some(n));
                format!("{filename} {size}")
            }
            None => substitute(&self.shared.templates.receive, &p.to_dos(), None),
        };

        // Held for the whole upload: one write-open, one XMODEM send.
        let _guard = self.shared.io_lock.lock().await;
        self.run_command_wait_ready_locked(&command).await;
        // The device answers the write-open with its own initiating NAK,
        // exactly like the read side does for a download. Left unconsumed,
        // it sits in the queue and gets misread as the first block's ACK.
        self.shared.channel.read_until(&[crate::xmodem::NAK], None).await;

        let mut sender = XmodemSender::new(self.shared.channel.clone());
        let mut buf = vec![0u8; 4096];
        let mut total: u64 = 0;
        loop {
            use tokio::io::AsyncReadExt;
            let n = input.read(&mut buf).await.map_err(storage::Error::from)?;
            if n == 0 {
                break;
            }
            sender.write(&buf[..n]).await;
            total += n as u64;
        }
        sender.close().await;
        Ok(total)
    }

    async fn del<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, path: P) -> storage::Result<()> {
        let p = vpath_from(path.as_ref());
        if p.depth() < 2 {
            return Err(PathIoError::NotADirectory.into());
        }
        self.invalidate(&p.parent().to_dos_dir_arg()).await;
        self.run_command(&format!("del {}", p.to_dos())).await;
        Ok(())
    }

    async fn mkd<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, path: P) -> storage::Result<()> {
        let p = vpath_from(path.as_ref());

        // Walk up from `p` until we hit an ancestor that already exists;
        // everything below that point needs to be created. The existence
        // check on that final ancestor populates (and therefore staled-out
        // once we create under it) the cache entry for its own listing, so
        // that's the one cache entry we know needs evicting below.
        let mut missing = Vec::new();
        let mut cursor = p.clone();
        loop {
            if self.exists(&cursor).await {
                break;
            }
            missing.push(cursor.clone());
            if cursor.is_root() || cursor.is_drive_root() {
                break;
            }
            cursor = cursor.parent();
        }
        missing.reverse();

        for ancestor in &missing {
            self.run_command(&format!("md {}", ancestor.to_dos())).await;
        }
        self.invalidate(&cursor.to_dos_dir_arg()).await;
        Ok(())
    }

    async fn rename<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, from: P, to: P) -> storage::Result<()> {
        let src = vpath_from(from.as_ref());
        let dst = vpath_from(to.as_ref());
        if src.depth() < 2 {
            return Err(PathIoError::NotADirectory.into());
        }

        self.invalidate(&src.to_dos_dir_arg()).await;
        self.invalidate(&src.parent().to_dos_dir_arg()).await;

        let dst_name = dst.name().unwrap_or_default();
        self.run_command(&format!("ren {} {}", src.to_dos(), dst_name)).await;
        Ok(())
    }

    async fn rmd<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, path: P) -> storage::Result<()> {
        let p = vpath_from(path.as_ref());
        if p.depth() < 2 {
            return Err(PathIoError::NotADirectory.into());
        }
        self.invalidate(&p.parent().to_dos_dir_arg()).await;
        self.invalidate(&p.to_dos_dir_arg()).await;
        self.run_command(&format!("rd {}", p.to_dos())).await;
        Ok(())
    }

    async fn cwd<P: AsRef<Path> + Send + Debug>(&self, _user: &DefaultUser, path: P) -> storage::Result<()> {
        let p = vpath_from(path.as_ref());
        if !self.exists(&p).await {
            return Err(PathIoError::NotFound.into());
        }
        if self.is_dir(&p).await? {
            Ok(())
        } else {
            Err(PathIoError::NotADirectory.into())
        }
    }
}

impl SerialPathIo {
    /// Run a transfer-initiating command and wait for the device's readiness
    /// tail before handing control to the XMODEM engine. Callers must already
    /// hold `shared.io_lock` — this only drives the shell, it doesn't lock.
    async fn run_command_wait_ready_locked(&self, command: &str) {
        let driver = ShellDriver::new(self.shared.channel.clone());
        let captured = driver.run(command.as_bytes(), XFER_READY_TAIL).await;
        debug!("transfer command ready, {} bytes of preamble captured", captured.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::PROMPT_TAIL;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    #[test]
    fn substitutes_known_placeholders_only() {
        let out = substitute("f {filename} {size} {bogus}", "c:\\x.txt", Some(10));
        assert_eq!(out, "f c:\\x.txt 10 {bogus}");
    }

    #[test]
    fn substitute_without_size_leaves_placeholder() {
        let out = substitute("f {filename}", "c:\\x.txt", None);
        assert_eq!(out, "f c:\\x.txt");
    }

    fn sample_templates() -> Templates {
        Templates {
            send: "f /s {filename}".to_string(),
            size: "{size}".to_string(),
            receive: "f {filename}".to_string(),
        }
    }

    /// Scripted DOS shell for facade-level tests: echoes every byte, and once
    /// a full command line arrives, records it and answers with whatever
    /// `respond` returns (plus the usual prompt tail). Full command lines are
    /// recorded in arrival order so tests can assert on command ordering and
    /// on how many times a given command actually reached the device (as
    /// opposed to being served from cache).
    fn spawn_command_responder<F>(mut far: UnixStream, seen: Arc<StdMutex<Vec<String>>>, mut respond: F)
    where
        F: FnMut(&str) -> Vec<u8> + Send + 'static,
    {
        far.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        std::thread::spawn(move || {
            let mut typed: Vec<u8> = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                match far.read(&mut byte) {
                    Ok(0) => return,
                    Ok(_) => {}
                    Err(_) => continue,
                }
                let b = byte[0];
                if b == 0x08 {
                    typed.clear();
                    continue;
                }
                if b == b'\r' {
                    let cmd = String::from_utf8_lossy(&typed).to_string();
                    seen.lock().unwrap().push(cmd.clone());
                    far.write_all(b"\n").unwrap();
                    std::thread::sleep(Duration::from_millis(20));
                    let mut out = respond(&cmd);
                    out.extend_from_slice(PROMPT_TAIL);
                    far.write_all(&out).unwrap();
                    typed.clear();
                    continue;
                }
                typed.push(b);
                far.write_all(&[b]).unwrap();
            }
        });
    }

    #[tokio::test]
    async fn mkd_creates_missing_ancestors_in_order_and_evicts_the_populated_cache_entry() {
        let (near, far) = UnixStream::pair().unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        spawn_command_responder(far, seen.clone(), |cmd| match cmd {
            "dir c:\\new" => b"File not found".to_vec(),
            "dir c:\\" => b"ok".to_vec(),
            "dir c:" => b"ok".to_vec(),
            "dir d:" => b"Invalid drive specification".to_vec(),
            _ => Vec::new(),
        });

        let channel = Arc::new(SerialChannel::from_io(near, "test"));
        let shared = SharedState::new(channel, sample_templates());
        let io = SerialPathIo::new(shared);

        io.mkd(&DefaultUser, PathBuf::from("/c/new/deep"))
            .await
            .unwrap();

        {
            let commands = seen.lock().unwrap();
            let new_idx = commands.iter().position(|c| c == "md c:\\new").expect("md c:\\new issued");
            let deep_idx = commands
                .iter()
                .position(|c| c == "md c:\\new\\deep")
                .expect("md c:\\new\\deep issued");
            assert!(new_idx < deep_idx, "ancestor must be created before descendant");
            assert_eq!(commands.iter().filter(|c| c.as_str() == "dir c:\\").count(), 1);
        }

        // The `c:\` listing was populated as a side effect of probing whether
        // `new` existed, then went stale the moment `new` was created under
        // it — mkd must have evicted it so this re-query reaches the device.
        let relisted = io.dir("c:\\").await;
        assert!(relisted.is_some());
        assert_eq!(seen.lock().unwrap().iter().filter(|c| c.as_str() == "dir c:\\").count(), 2);

        // The drive-presence probe (`dir c:`) is a distinct cache key and was
        // never touched by the eviction, so it stays a cache hit.
        assert!(io.exists(&VPath::parse("/c")).await);
        assert_eq!(seen.lock().unwrap().iter().filter(|c| c.as_str() == "dir c:").count(), 1);
    }

    #[tokio::test]
    async fn renames_a_file_directly_under_a_drive_root() {
        let (near, far) = UnixStream::pair().unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        spawn_command_responder(far, seen.clone(), |_| Vec::new());

        let channel = Arc::new(SerialChannel::from_io(near, "test"));
        let shared = SharedState::new(channel, sample_templates());
        let io = SerialPathIo::new(shared);

        io.rename(&DefaultUser, PathBuf::from("/c/a.txt"), PathBuf::from("/c/b.txt"))
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["ren c:\\a.txt b.txt".to_string()]);
    }

    #[tokio::test]
    async fn rejects_rename_of_a_drive_root_itself() {
        let (near, _far) = UnixStream::pair().unwrap();
        let channel = Arc::new(SerialChannel::from_io(near, "test"));
        let shared = SharedState::new(channel, sample_templates());
        let io = SerialPathIo::new(shared);

        let result = io.rename(&DefaultUser, PathBuf::from("/c"), PathBuf::from("/d")).await;
        assert!(result.is_err(), "renaming a drive root itself must be rejected");
    }

    fn read_exact_retry(stream: &mut UnixStream, buf: &mut [u8]) -> std::io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)),
                Ok(n) => filled += n,
                Err(e) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// A device that answers the `f ...` transfer-open command with the
    /// literal XMODEM-ready tail followed by its own initiating `NAK` (as a
    /// real write-open does), then switches to acking every XMODEM frame and
    /// the closing `EOT`.
    fn spawn_upload_device(mut far: UnixStream, commands: Arc<StdMutex<Vec<String>>>, frame_count: Arc<StdMutex<usize>>) {
        far.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        std::thread::spawn(move || {
            let mut typed: Vec<u8> = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                match far.read(&mut byte) {
                    Ok(0) => return,
                    Ok(_) => {}
                    Err(_) => continue,
                }
                let b = byte[0];
                if b == 0x08 {
                    typed.clear();
                    continue;
                }
                if b == b'\r' {
                    commands.lock().unwrap().push(String::from_utf8_lossy(&typed).to_string());
                    far.write_all(b"\n").unwrap();
                    std::thread::sleep(Duration::from_millis(20));
                    far.write_all(XFER_READY_TAIL).unwrap();
                    far.write_all(&[crate::xmodem::NAK]).unwrap();
                    break;
                }
                typed.push(b);
                far.write_all(&[b]).unwrap();
            }

            loop {
                let mut mode = [0u8; 1];
                if read_exact_retry(&mut far, &mut mode).is_err() {
                    return;
                }
                if mode[0] == crate::xmodem::EOT {
                    let _ = far.write_all(&[crate::xmodem::ACK]);
                    return;
                }
                let mut rest = [0u8; 2 + 128 + 1];
                if read_exact_retry(&mut far, &mut rest).is_err() {
                    return;
                }
                *frame_count.lock().unwrap() += 1;
                let _ = far.write_all(&[crate::xmodem::ACK]);
            }
        });
    }

    #[tokio::test]
    async fn put_with_allocation_hint_appends_the_size_template_and_streams_the_payload() {
        use tokio::io::AsyncWriteExt;

        let (near, far) = UnixStream::pair().unwrap();
        let commands = Arc::new(StdMutex::new(Vec::new()));
        let frame_count = Arc::new(StdMutex::new(0usize));
        spawn_upload_device(far, commands.clone(), frame_count.clone());

        let channel = Arc::new(SerialChannel::from_io(near, "test"));
        let shared = SharedState::new(channel, sample_templates());
        let io = SerialPathIo::new(shared);
        io.set_allocation_hint(Some(300));

        let payload = vec![9u8; 300];
        let (mut writer, reader) = tokio::io::duplex(4096);
        let feeder = tokio::spawn(async move {
            writer.write_all(&payload).await.unwrap();
            drop(writer);
        });

        let written = io.put(&DefaultUser, reader, PathBuf::from("/c/up.bin"), 0).await.unwrap();
        feeder.await.unwrap();

        assert_eq!(written, 300);
        assert_eq!(*commands.lock().unwrap(), vec!["f c:\\up.bin 300".to_string()]);
        // 300 bytes -> two full blocks plus the padded trailing block on close.
        assert_eq!(*frame_count.lock().unwrap(), 3);

        // The allocation hint is consumed by the open it was set for.
        assert!(io.take_allocation_hint().is_none());
    }
}
