//! Durable append-only topic log
//!
//! Entry format: [MAGIC][OFFSET][LEN][PAYLOAD][CRC32]
//!
//! - MAGIC is `NLG1`; OFFSET (u64), LEN (u32) and CRC32 (u32) are little-endian
//! - the checksum covers OFFSET, LEN and PAYLOAD
//!
//! The consumer's committed position is kept in a sidecar file next to the
//! log. A reopened channel resumes delivery there, so anything received but
//! not committed before a crash is delivered again. A torn entry at the tail
//! of the log (crash mid-append) is truncated on open.

use super::{Message, MessageChannel};
use crate::common::{crc32, Error, Result, SyncPolicy};
use async_trait::async_trait;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

const LOG_MAGIC: [u8; 4] = *b"NLG1";
const LOG_FILE: &str = "topic.log";
const COMMIT_FILE: &str = "topic.commit";
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;
const INTERVAL_SYNC: Duration = Duration::from_secs(1);

struct LogWriter {
    writer: BufWriter<File>,
    next_offset: u64,
    last_sync: Instant,
}

struct LogReader {
    reader: BufReader<File>,
    next_offset: u64,
}

pub struct LogChannel {
    dir: PathBuf,
    sync_policy: SyncPolicy,
    writer: Mutex<LogWriter>,
    reader: tokio::sync::Mutex<LogReader>,
    // Number of entries readable on disk.
    published: watch::Sender<u64>,
    committed: Mutex<u64>,
}

impl LogChannel {
    /// Open or create the log under `dir`.
    pub fn open(dir: impl AsRef<Path>, sync_policy: SyncPolicy) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let log_path = dir.join(LOG_FILE);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&log_path)?;

        let mut committed = read_commit(&dir.join(COMMIT_FILE))?;
        let scan = scan_log(&log_path, committed)?;

        let file_len = file.metadata()?.len();
        if scan.valid_end < file_len {
            tracing::warn!(
                path = %log_path.display(),
                valid_end = scan.valid_end,
                file_len,
                "Truncating torn tail of topic log"
            );
            file.set_len(scan.valid_end)?;
            file.sync_all()?;
        }

        if committed > scan.entries {
            tracing::warn!(
                committed,
                entries = scan.entries,
                "Committed offset is past the end of the log, clamping"
            );
            committed = scan.entries;
        }

        let mut reader = BufReader::new(File::open(&log_path)?);
        reader.seek(SeekFrom::Start(scan.resume_pos))?;

        tracing::info!(
            path = %log_path.display(),
            entries = scan.entries,
            committed,
            "Topic log opened"
        );

        let (published, _) = watch::channel(scan.entries);

        Ok(Self {
            dir,
            sync_policy,
            writer: Mutex::new(LogWriter {
                writer: BufWriter::new(file),
                next_offset: scan.entries,
                last_sync: Instant::now(),
            }),
            reader: tokio::sync::Mutex::new(LogReader {
                reader,
                next_offset: committed,
            }),
            published,
            committed: Mutex::new(committed),
        })
    }

    /// Number of entries in the log.
    pub fn len(&self) -> u64 {
        *self.published.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next offset the consumer will resume from after a restart.
    pub fn committed(&self) -> Result<u64> {
        self.committed
            .lock()
            .map(|c| *c)
            .map_err(|_| Error::Internal("commit lock poisoned".into()))
    }

    fn append(&self, payload: &[u8]) -> Result<u64> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::Invalid(format!(
                "payload of {} bytes exceeds {} byte limit",
                payload.len(),
                MAX_PAYLOAD
            )));
        }

        let mut log = self
            .writer
            .lock()
            .map_err(|_| Error::Internal("log writer lock poisoned".into()))?;
        let offset = log.next_offset;

        write_entry(&mut log.writer, offset, payload)?;
        log.writer.flush()?;
        match self.sync_policy {
            SyncPolicy::Always => log.writer.get_ref().sync_data()?,
            SyncPolicy::Interval => {
                if log.last_sync.elapsed() >= INTERVAL_SYNC {
                    log.writer.get_ref().sync_data()?;
                    log.last_sync = Instant::now();
                }
            }
            SyncPolicy::Never => {}
        }

        log.next_offset += 1;
        self.published.send_replace(log.next_offset);
        Ok(offset)
    }

    fn write_commit(&self, next: u64) -> Result<()> {
        let path = self.dir.join(COMMIT_FILE);
        let tmp = path.with_extension("tmp");

        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&next.to_le_bytes());
        buf.extend_from_slice(&crc32(&next.to_le_bytes()).to_le_bytes());

        {
            let mut file = File::create(&tmp)?;
            file.write_all(&buf)?;
            if self.sync_policy == SyncPolicy::Always {
                file.sync_all()?;
            }
        }
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[async_trait]
impl MessageChannel for LogChannel {
    async fn publish(&self, payload: Vec<u8>) -> Result<u64> {
        self.append(&payload)
    }

    async fn receive(&self) -> Result<Message> {
        let mut log = self.reader.lock().await;
        let mut published = self.published.subscribe();

        loop {
            let available = *published.borrow_and_update();
            if log.next_offset < available {
                let (offset, payload) = read_entry(&mut log.reader)?
                    .ok_or_else(|| Error::Log("unexpected end of topic log".into()))?;
                if offset != log.next_offset {
                    return Err(Error::Log(format!(
                        "expected offset {}, found {}",
                        log.next_offset, offset
                    )));
                }
                log.next_offset += 1;
                return Ok(Message { offset, payload });
            }

            published
                .changed()
                .await
                .map_err(|_| Error::Unavailable("topic log closed".into()))?;
        }
    }

    async fn commit(&self, offset: u64) -> Result<()> {
        let next = offset + 1;
        let mut committed = self
            .committed
            .lock()
            .map_err(|_| Error::Internal("commit lock poisoned".into()))?;
        if next <= *committed {
            return Ok(());
        }
        self.write_commit(next)?;
        *committed = next;
        Ok(())
    }
}

struct LogScan {
    entries: u64,
    valid_end: u64,
    // Byte position of the first entry at or after the committed offset.
    resume_pos: u64,
}

fn scan_log(path: &Path, committed: u64) -> Result<LogScan> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut entries = 0u64;
    let mut valid_end = 0u64;
    let mut resume_pos = None;

    loop {
        if entries == committed {
            resume_pos = Some(valid_end);
        }
        match read_entry(&mut reader) {
            Ok(Some((offset, _))) if offset == entries => {
                entries += 1;
                valid_end = reader.stream_position()?;
            }
            Ok(Some((offset, _))) => {
                tracing::warn!(expected = entries, found = offset, "Out-of-sequence log entry");
                break;
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Topic log scan stopped at corrupted entry: {}", e);
                break;
            }
        }
    }

    Ok(LogScan {
        entries,
        valid_end,
        resume_pos: resume_pos.unwrap_or(valid_end),
    })
}

fn read_commit(path: &Path) -> Result<u64> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    if bytes.len() != 12 {
        return Err(Error::Corrupted(format!(
            "commit file has {} bytes, expected 12",
            bytes.len()
        )));
    }

    let mut next = [0u8; 8];
    next.copy_from_slice(&bytes[..8]);
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&bytes[8..]);
    if crc32(&next) != u32::from_le_bytes(stored) {
        return Err(Error::Corrupted("commit file checksum mismatch".into()));
    }
    Ok(u64::from_le_bytes(next))
}

fn write_entry<W: Write>(writer: &mut W, offset: u64, payload: &[u8]) -> Result<()> {
    let offset_bytes = offset.to_le_bytes();
    let len_bytes = (payload.len() as u32).to_le_bytes();

    let mut checksum_data = Vec::with_capacity(12 + payload.len());
    checksum_data.extend_from_slice(&offset_bytes);
    checksum_data.extend_from_slice(&len_bytes);
    checksum_data.extend_from_slice(payload);

    writer.write_all(&LOG_MAGIC)?;
    writer.write_all(&offset_bytes)?;
    writer.write_all(&len_bytes)?;
    writer.write_all(payload)?;
    writer.write_all(&crc32(&checksum_data).to_le_bytes())?;
    Ok(())
}

/// Read one entry. `Ok(None)` at a clean end of file.
fn read_entry<R: Read>(reader: &mut R) -> Result<Option<(u64, Vec<u8>)>> {
    let mut magic = [0u8; 4];
    match reader.read_exact(&mut magic) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    if magic != LOG_MAGIC {
        return Err(Error::Log("Invalid log magic".into()));
    }

    let mut offset_bytes = [0u8; 8];
    reader.read_exact(&mut offset_bytes)?;
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_PAYLOAD {
        return Err(Error::Log(format!("entry length {} exceeds limit", len)));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;

    let mut checksum_data = Vec::with_capacity(12 + len);
    checksum_data.extend_from_slice(&offset_bytes);
    checksum_data.extend_from_slice(&len_bytes);
    checksum_data.extend_from_slice(&payload);
    if crc32(&checksum_data) != u32::from_le_bytes(checksum_bytes) {
        return Err(Error::Log("Checksum mismatch".into()));
    }

    Ok(Some((u64::from_le_bytes(offset_bytes), payload)))
}
