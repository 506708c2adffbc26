//! File-backed audit storage
//!
//! Layout: one directory of segments. The active segment is named after the
//! UTC date it was opened, `audit_YYYYMMDD.log`; rotation renames it with a
//! millisecond timestamp suffix, `audit_YYYYMMDD.log.YYYYMMDDTHHMMSSmmm`.
//! Each record is one JSON line. Segments may be gzip streams, recognised
//! by their magic bytes rather than their name.
//!
//! Reads load every candidate segment into memory. A segment whose name
//! shows it cannot overlap the requested window is skipped.

use super::{AuditStorage, closed_error};
use crate::audit::chain::{ChainLinker, ChainReport, verify_chain};
use crate::audit::config::AuditConfig;
use crate::audit::event::AuditEvent;
use crate::audit::export::{ExportFormat, export_events};
use crate::audit::query::{AuditQuery, AuditQueryResult};
use crate::audit::stats::AuditStats;
use crate::error::{Result, VigilError};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

const SEGMENT_PREFIX: &str = "audit_";
const SEGMENT_EXT: &str = ".log";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ROTATION_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

/// Directory of append-only NDJSON segments
pub struct FileStorage {
    dir: PathBuf,
    compression: bool,
    max_segment_size: u64,
    inner: Mutex<Inner>,
    closed: AtomicBool,
}

struct Inner {
    active: Option<ActiveSegment>,
    chain: ChainLinker,
    /// Records written since the last flush
    dirty: bool,
}

struct ActiveSegment {
    path: PathBuf,
    writer: SegmentWriter,
    /// Uncompressed bytes in the segment
    written: u64,
}

enum SegmentWriter {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl SegmentWriter {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            SegmentWriter::Plain(w) => w.write_all(buf),
            SegmentWriter::Gzip(w) => w.write_all(buf),
        }
    }

    /// Push buffered bytes to the OS and sync them
    ///
    /// A gzip segment gets a sync flush, so everything written so far is
    /// readable even before the stream is finished.
    fn flush(&mut self) -> io::Result<()> {
        let file = match self {
            SegmentWriter::Plain(w) => {
                w.flush()?;
                w.get_ref()
            }
            SegmentWriter::Gzip(w) => {
                w.flush()?;
                let inner = w.get_mut();
                inner.flush()?;
                inner.get_ref()
            }
        };
        file.sync_data()
    }

    /// Complete the segment, writing the gzip trailer if any
    fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            SegmentWriter::Plain(w) => w,
            SegmentWriter::Gzip(w) => w.finish()?,
        };
        inner.flush()?;
        inner.get_ref().sync_data()
    }
}

/// What a segment's file name says about it
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentInfo {
    path: PathBuf,
    /// UTC date the segment was opened
    opened: NaiveDate,
    /// When it was rotated; `None` for an active-named segment
    rotated: Option<DateTime<Utc>>,
    /// Disambiguates rotations within the same millisecond
    sequence: u32,
}

impl SegmentInfo {
    fn parse(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let rest = name.strip_prefix(SEGMENT_PREFIX)?;
        let (date, rest) = rest.split_at_checked(8)?;
        let opened = NaiveDate::parse_from_str(date, "%Y%m%d").ok()?;
        let rest = rest.strip_prefix(SEGMENT_EXT)?;

        if rest.is_empty() {
            return Some(Self {
                path,
                opened,
                rotated: None,
                sequence: 0,
            });
        }

        let suffix = rest.strip_prefix('.')?;
        let (stamp, sequence) = match suffix.split_once('-') {
            Some((stamp, seq)) => (stamp, seq.parse().ok()?),
            None => (suffix, 0),
        };
        let rotated = Some(parse_rotation_stamp(stamp)?);
        Some(Self {
            path,
            opened,
            rotated,
            sequence,
        })
    }

    /// Storage order: by open date, rotated before still-active, then by
    /// rotation time
    fn sort_key(&self) -> (NaiveDate, DateTime<Utc>, u32) {
        (
            self.opened,
            self.rotated.unwrap_or(DateTime::<Utc>::MAX_UTC),
            self.sequence,
        )
    }

    /// Whether the segment could hold events inside the window
    ///
    /// Events may be stamped shortly before the segment opened, so the lower
    /// bound is one day early.
    fn may_overlap(&self, query: &AuditQuery) -> bool {
        let lower = self
            .opened
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc() - ChronoDuration::days(1));
        let starts_after_window = match (lower, query.end_time) {
            (Some(lower), Some(end)) => lower > end,
            _ => false,
        };
        let ends_before_window = match (self.rotated, query.start_time) {
            (Some(rotated), Some(start)) => rotated < start,
            _ => false,
        };
        !starts_after_window && !ends_before_window
    }
}

fn parse_rotation_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let (seconds, millis) = stamp.split_at_checked(15)?;
    let base = NaiveDateTime::parse_from_str(seconds, "%Y%m%dT%H%M%S").ok()?;
    let millis: i64 = if millis.is_empty() { 0 } else { millis.parse().ok()? };
    Some(base.and_utc() + ChronoDuration::milliseconds(millis))
}

fn active_name(date: NaiveDate) -> String {
    format!("{SEGMENT_PREFIX}{}{SEGMENT_EXT}", date.format("%Y%m%d"))
}

fn is_gzip(path: &Path) -> io::Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = File::open(path)?;
    match file.read_exact(&mut magic) {
        Ok(()) => Ok(magic == GZIP_MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode one segment, keeping every complete record
///
/// A gzip stream cut short (crash, or the active segment before `finish`)
/// yields what was decoded up to the cut; unparsable lines are skipped.
fn read_segment(path: &Path) -> Result<Vec<AuditEvent>> {
    Ok(decode_segment(path, fs::read(path)?))
}

fn decode_segment(path: &Path, raw: Vec<u8>) -> Vec<AuditEvent> {
    let text = if raw.starts_with(&GZIP_MAGIC) {
        let mut decoded = Vec::new();
        if let Err(e) = MultiGzDecoder::new(raw.as_slice()).read_to_end(&mut decoded) {
            debug!(path = %path.display(), error = %e, "Gzip segment ends early");
        }
        decoded
    } else {
        raw
    };

    let mut events = Vec::new();
    for (line_no, line) in text.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<AuditEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(
                path = %path.display(),
                line = line_no + 1,
                error = %e,
                "Skipping unreadable audit record"
            ),
        }
    }
    events
}

/// Whether a plain file is empty or its last record is complete
fn ends_with_newline(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn open_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
}

impl FileStorage {
    /// Open (or create) the storage directory
    ///
    /// Segments left active by an earlier run are sealed by renaming them,
    /// except today's plain segment when compression is off and its last
    /// record is complete, which is appended to. The chain resumes from the last stored record.
    pub fn open(config: &AuditConfig) -> Result<Self> {
        let dir = config.storage_path.clone();
        fs::create_dir_all(&dir).map_err(|e| {
            VigilError::StorageUnavailable(format!(
                "failed to create storage directory {}: {e}",
                dir.display()
            ))
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))?;
        }

        let storage = Self {
            dir,
            compression: config.compression,
            max_segment_size: config.max_segment_size_bytes.max(1),
            inner: Mutex::new(Inner {
                active: None,
                chain: ChainLinker::new(config.hash_chain),
                dirty: false,
            }),
            closed: AtomicBool::new(false),
        };

        {
            let mut inner = storage.inner.lock();
            storage.seal_stale_segments()?;
            let last_hash = storage.last_stored_hash()?;
            inner.chain.resume(last_hash);
            inner.active = Some(storage.open_active()?);
        }

        info!(
            path = %storage.dir.display(),
            compression = storage.compression,
            hash_chain = config.hash_chain,
            max_segment_size = storage.max_segment_size,
            "File audit storage opened"
        );
        Ok(storage)
    }

    /// Storage directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Path of the segment currently written to
    pub fn active_segment(&self) -> Option<PathBuf> {
        self.inner.lock().active.as_ref().map(|a| a.path.clone())
    }

    /// All segments in storage order
    pub fn segments(&self) -> Result<Vec<PathBuf>> {
        Ok(self.list_segments()?.into_iter().map(|s| s.path).collect())
    }

    fn list_segments(&self) -> Result<Vec<SegmentInfo>> {
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(info) = SegmentInfo::parse(entry.path()) {
                segments.push(info);
            }
        }
        segments.sort_by_key(SegmentInfo::sort_key);
        Ok(segments)
    }

    /// Rename active-named segments the current process does not own
    fn seal_stale_segments(&self) -> Result<()> {
        let today = active_name(Utc::now().date_naive());
        for segment in self.list_segments()? {
            if segment.rotated.is_some() {
                continue;
            }
            let is_today = segment.path.file_name().and_then(|n| n.to_str()) == Some(&today);
            if is_today
                && !self.compression
                && !is_gzip(&segment.path)?
                && ends_with_newline(&segment.path)?
            {
                continue;
            }
            let modified = fs::metadata(&segment.path)?
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            let target = self.rotated_path(&segment.path, modified);
            fs::rename(&segment.path, &target)?;
            debug!(
                from = %segment.path.display(),
                to = %target.display(),
                "Sealed segment left by a previous run"
            );
        }
        Ok(())
    }

    fn last_stored_hash(&self) -> Result<Option<String>> {
        for segment in self.list_segments()?.iter().rev() {
            if let Some(last) = read_segment(&segment.path)?.pop() {
                return Ok(last.hash);
            }
        }
        Ok(None)
    }

    fn open_active(&self) -> Result<ActiveSegment> {
        let path = self.dir.join(active_name(Utc::now().date_naive()));
        let file = open_options().open(&path).map_err(|e| {
            VigilError::StorageUnavailable(format!("failed to open {}: {e}", path.display()))
        })?;
        let written = file.metadata()?.len();

        let writer = if self.compression {
            SegmentWriter::Gzip(GzEncoder::new(BufWriter::new(file), Compression::default()))
        } else {
            SegmentWriter::Plain(BufWriter::new(file))
        };

        debug!(path = %path.display(), written = written, "Opened audit segment");
        Ok(ActiveSegment {
            path,
            writer,
            written,
        })
    }

    /// `<segment>.<stamp>`, with `-N` appended until the name is free
    fn rotated_path(&self, path: &Path, at: DateTime<Utc>) -> PathBuf {
        let base = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string())
            .unwrap_or_default();
        let stamp = at.format(ROTATION_FORMAT).to_string();

        let mut candidate = self.dir.join(format!("{base}.{stamp}"));
        let mut sequence = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{base}.{stamp}-{sequence}"));
            sequence += 1;
        }
        candidate
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(closed_error())
        } else {
            Ok(())
        }
    }

    fn flush_locked(inner: &mut Inner) -> Result<()> {
        if !inner.dirty {
            return Ok(());
        }
        if let Some(active) = inner.active.as_mut() {
            active.writer.flush()?;
        }
        inner.dirty = false;
        Ok(())
    }

    /// Seal the active segment and open a fresh one
    ///
    /// A new active segment is opened even when sealing fails. If the rename
    /// did not happen, that reopens the same file for append and its size
    /// triggers the next rotation attempt.
    fn rotate_locked(&self, inner: &mut Inner) -> Result<()> {
        let mut outcome = Ok(());
        if let Some(active) = inner.active.take() {
            if let Err(e) = active.writer.finish() {
                warn!(
                    segment = %active.path.display(),
                    error = %e,
                    "Failed to finish audit segment"
                );
                outcome = Err(e.into());
            }
            let target = self.rotated_path(&active.path, Utc::now());
            match fs::rename(&active.path, &target) {
                Ok(()) => info!(
                    segment = %target.display(),
                    bytes = active.written,
                    "Audit segment rotated"
                ),
                Err(e) => {
                    warn!(
                        segment = %active.path.display(),
                        error = %e,
                        "Failed to seal audit segment"
                    );
                    if outcome.is_ok() {
                        outcome = Err(e.into());
                    }
                }
            }
        }
        inner.dirty = false;
        inner.active = Some(self.open_active()?);
        outcome
    }

    /// Flush, then load every segment that may overlap `window`
    fn load(&self, window: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let handles = self.open_candidates(window)?;
        let mut events = Vec::new();
        for (path, mut file) in handles {
            let mut raw = Vec::new();
            file.read_to_end(&mut raw)?;
            events.extend(decode_segment(&path, raw));
        }
        Ok(events)
    }

    /// Flush and open the candidate segments under the lock
    ///
    /// An open handle keeps reading the same file if a later rotation renames
    /// it or cleanup removes it, so decoding needs no lock.
    fn open_candidates(&self, window: &AuditQuery) -> Result<Vec<(PathBuf, File)>> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;
        Self::flush_locked(&mut inner)?;

        let mut handles = Vec::new();
        for segment in self.list_segments()? {
            if !segment.may_overlap(window) {
                debug!(path = %segment.path.display(), "Skipping segment outside window");
                continue;
            }
            let file = File::open(&segment.path)?;
            handles.push((segment.path, file));
        }
        Ok(handles)
    }

    fn disk_usage(&self) -> Result<u64> {
        let mut total = 0;
        for segment in self.list_segments()? {
            total += fs::metadata(&segment.path)?.len();
        }
        Ok(total)
    }
}

#[async_trait]
impl AuditStorage for FileStorage {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn store(&self, mut event: AuditEvent) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;

        let hash = inner.chain.seal(&mut event)?;
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        // A failed reopen during rotation leaves no active segment
        if inner.active.is_none() {
            inner.active = Some(self.open_active()?);
        }
        let active = inner.active.as_mut().ok_or_else(closed_error)?;
        active.writer.write_all(&line)?;
        active.written += line.len() as u64;
        let full = active.written >= self.max_segment_size;

        inner.chain.commit(hash);
        inner.dirty = true;

        // The record is written; a failed rotation is retried on a later store
        if full {
            if let Err(e) = self.rotate_locked(&mut inner) {
                warn!(error = %e, "Size-triggered rotation failed");
            }
        }
        Ok(())
    }

    // Reads and writes use blocking std::fs on the calling task. Appends are
    // buffered and reads only hold the lock while opening files.
    async fn query(&self, query: &AuditQuery) -> Result<AuditQueryResult> {
        let events = self.load(query)?;
        Ok(query.apply(events))
    }

    async fn export(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        format: ExportFormat,
    ) -> Result<Vec<u8>> {
        let window = AuditQuery::new().between(start, end);
        let events: Vec<AuditEvent> = self
            .load(&window)?
            .into_iter()
            .filter(|e| window.in_window(&e.timestamp))
            .collect();
        export_events(&events, format)
    }

    async fn stats(&self) -> Result<AuditStats> {
        let events = self.load(&AuditQuery::new())?;
        Ok(AuditStats::from_events(&events, self.disk_usage()?))
    }

    async fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;
        Self::flush_locked(&mut inner)
    }

    async fn rotate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_open()?;
        self.rotate_locked(&mut inner)
    }

    /// Removes rotated segments whose rotation time is before `cutoff`;
    /// the active segment is never removed
    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let _inner = self.inner.lock();
        self.ensure_open()?;

        let mut removed = 0;
        for segment in self.list_segments()? {
            let Some(rotated) = segment.rotated else {
                continue;
            };
            if rotated >= cutoff {
                continue;
            }
            match fs::remove_file(&segment.path) {
                Ok(()) => {
                    removed += 1;
                    debug!(path = %segment.path.display(), "Removed expired audit segment");
                }
                Err(e) => error!(
                    path = %segment.path.display(),
                    error = %e,
                    "Failed to remove expired audit segment"
                ),
            }
        }

        info!(removed = removed, cutoff = %cutoff, "Audit cleanup finished");
        Ok(removed)
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.dirty = false;
        if let Some(active) = inner.active.take() {
            active.writer.finish()?;
        }
        info!(path = %self.dir.display(), "File audit storage closed");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn verify_chain(&self) -> Result<ChainReport> {
        let events = self.load(&AuditQuery::new())?;
        let linked = self.inner.lock().chain.is_linked();
        Ok(verify_chain(&events, linked))
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Some(active) = self.inner.get_mut().active.take() {
            if let Err(e) = active.writer.finish() {
                error!(error = %e, "Failed to finish audit segment on drop");
            }
        }
    }
}
