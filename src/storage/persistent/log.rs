//! Append-only file log of evaluation records.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::record::{EvalId, EvaluationRecord};
use crate::storage::{EvalLog, StorageError};

use super::codec;

/// One persisted log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFrame {
    /// Monotonically increasing sequence number within one file.
    pub sequence: u64,
    /// When the frame was appended.
    pub timestamp: DateTime<Utc>,
    /// The persisted record.
    pub record: EvaluationRecord,
}

/// Outcome of a [`FileEvalLog::repair`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairStats {
    /// Frames carried over to the repaired file.
    pub kept: u64,
    /// Frames dropped as malformed.
    pub dropped: u64,
}

struct LogWriter {
    file: BufWriter<File>,
    next_sequence: u64,
}

/// File-backed implementation of [`EvalLog`].
///
/// Appends are flushed per frame; with `sync_on_write` they are also fsynced,
/// trading throughput for at-most-one-frame loss on a crash.
pub struct FileEvalLog {
    path: PathBuf,
    sync_on_write: bool,
    writer: Mutex<LogWriter>,
}

impl FileEvalLog {
    /// Opens or creates a log file.
    ///
    /// An existing file is scanned to find the last sequence number so new
    /// appends continue the numbering.
    ///
    /// # Errors
    /// `StorageError::Io` on filesystem failures, `StorageError::Codec` if an
    /// existing file has a foreign header.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        let next_sequence = if exists {
            let (frames, _) = scan(&path)?;
            frames.last().map_or(1, |f| f.sequence + 1)
        } else {
            let mut file = File::create(&path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            1
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            sync_on_write,
            writer: Mutex::new(LogWriter {
                file: BufWriter::new(file),
                next_sequence,
            }),
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every decodable frame of a log file, in append order.
    ///
    /// Replay stops at the first corrupt frame: a partially recovered
    /// history is still a usable seed, and the bad tail is reported through
    /// the operator log rather than an error.
    pub fn frames(path: impl AsRef<Path>) -> Result<Vec<LogFrame>, StorageError> {
        let (frames, clean) = scan(path.as_ref())?;
        if !clean {
            warn!(
                path = %path.as_ref().display(),
                recovered = frames.len(),
                "evaluation log truncated at first corrupt frame"
            );
        }
        Ok(frames)
    }

    /// Rewrites `src` into `dst`, dropping malformed frames.
    ///
    /// A frame is malformed if it fails to decode (the corrupt tail) or if
    /// its record's internal layout does not validate. Kept frames are
    /// renumbered from 1; timestamps are preserved.
    ///
    /// # Errors
    /// `StorageError::Io` on filesystem failures reading `src` or writing
    /// `dst`.
    pub fn repair(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<RepairStats, StorageError> {
        let (frames, clean) = scan(src.as_ref())?;
        let scanned = frames.len() as u64;
        let truncated = u64::from(!clean);

        let kept: Vec<LogFrame> = frames
            .into_iter()
            .filter(|frame| frame.record.response().validate().is_ok())
            .collect();
        let kept_count = kept.len() as u64;
        write_frames(dst.as_ref(), kept)?;

        Ok(RepairStats {
            kept: kept_count,
            dropped: scanned - kept_count + truncated,
        })
    }

    /// Concatenates several logs into `dst`, renumbering frames from 1.
    ///
    /// Sources are read with the same truncate-at-corruption rule as
    /// [`frames`](Self::frames).
    ///
    /// # Errors
    /// `StorageError::Io` on filesystem failures.
    pub fn concat(
        sources: &[impl AsRef<Path>],
        dst: impl AsRef<Path>,
    ) -> Result<u64, StorageError> {
        let mut all = Vec::new();
        for src in sources {
            all.extend(Self::frames(src)?);
        }
        let count = all.len() as u64;
        write_frames(dst.as_ref(), all)?;
        Ok(count)
    }
}

impl EvalLog for FileEvalLog {
    fn append(&self, record: &EvaluationRecord) -> Result<(), StorageError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StorageError::Backend("poisoned log writer lock".to_string()))?;

        let frame = LogFrame {
            sequence: writer.next_sequence,
            timestamp: Utc::now(),
            record: record.clone(),
        };
        let encoded = codec::encode_frame(&frame)?;
        writer.file.write_all(&encoded)?;
        writer.file.flush()?;
        if self.sync_on_write {
            writer.file.get_ref().sync_all()?;
        }
        writer.next_sequence += 1;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<EvaluationRecord>, StorageError> {
        let frames = Self::frames(&self.path)?;
        let mut records = Vec::with_capacity(frames.len());
        for frame in frames {
            if let Err(e) = frame.record.response().validate() {
                warn!(sequence = frame.sequence, error = %e, "skipping malformed log record");
                continue;
            }
            let eval_id = match frame.record.eval_id() {
                // Run-local ids belong to the run that wrote them.
                #[allow(clippy::cast_possible_wrap)]
                EvalId::RunLocal(n) => EvalId::Restored(-(n as i64)),
                other => other,
            };
            records.push(frame.record.with_eval_id(eval_id));
        }
        Ok(records)
    }

    fn flush(&self) -> Result<(), StorageError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| StorageError::Backend("poisoned log writer lock".to_string()))?;
        writer.file.flush()?;
        writer.file.get_ref().sync_all()?;
        Ok(())
    }
}

/// Reads frames until the stream ends or a frame fails to decode.
///
/// Returns the frames plus whether the file was read to a clean end.
fn scan(path: &Path) -> Result<(Vec<LogFrame>, bool), StorageError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut frames = Vec::new();
    loop {
        match codec::decode_frame::<LogFrame>(&mut reader) {
            Ok(Some(frame)) => frames.push(frame),
            Ok(None) => return Ok((frames, true)),
            Err(_) => return Ok((frames, false)),
        }
    }
}

fn write_frames(path: &Path, frames: Vec<LogFrame>) -> Result<(), StorageError> {
    let mut file = BufWriter::new(File::create(path)?);
    codec::write_header(&mut file)?;
    for (i, mut frame) in frames.into_iter().enumerate() {
        frame.sequence = i as u64 + 1;
        file.write_all(&codec::encode_frame(&frame)?)?;
    }
    file.flush()?;
    file.get_ref().sync_all()?;
    Ok(())
}
