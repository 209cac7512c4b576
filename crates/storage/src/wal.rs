// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL event write-ahead log with group commit.
//!
//! Every durable fact enters the system through this log before any worker
//! acts on it, which is what makes queue jobs and the message timeline
//! survive a crash (snapshot + replay). Writes are buffered and flushed in
//! batches with a single fsync.
//!
//! Each entry is one line of JSON: `{"seq":N,"event":{...}}\n`

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;
use wf_core::Event;

/// Group-commit window.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Buffered entries that force a flush regardless of the interval.
const FLUSH_THRESHOLD: usize = 100;

/// Errors from WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct LineRef<'a> {
    seq: u64,
    event: &'a Event,
}

#[derive(Deserialize)]
struct Line {
    seq: u64,
    event: Event,
}

/// A single WAL entry with its sequence number.
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub seq: u64,
    pub event: Event,
}

/// Result of scanning a WAL file front to back.
struct Scan {
    /// `(seq, raw line, byte offset of the line start)` for every valid entry.
    entries: Vec<(u64, String, u64)>,
    /// True if the scan stopped at an unparseable line before EOF.
    corrupt: bool,
}

fn scan_file(file: &File) -> Result<Scan, WalError> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut entries = Vec::new();
    let mut corrupt = false;
    let mut offset = 0u64;
    let mut line = String::new();

    loop {
        line.clear();
        let n = match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                corrupt = true;
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if !trimmed.is_empty() {
            match serde_json::from_str::<Line>(trimmed) {
                Ok(record) => entries.push((record.seq, trimmed.to_string(), offset)),
                Err(_) => {
                    corrupt = true;
                    break;
                }
            }
        }
        offset += n as u64;
    }

    Ok(Scan { entries, corrupt })
}

/// JSONL WAL for durable event storage.
///
/// Tracks two cursors: `write_seq` (highest sequence handed out) and
/// `processed_seq` (highest sequence the engine has consumed; persisted via
/// snapshots, not here).
pub struct Wal {
    file: File,
    path: PathBuf,
    write_seq: u64,
    processed_seq: u64,
    /// Serialized lines awaiting the next group commit.
    buffer: Vec<Vec<u8>>,
    last_flush: Instant,
    /// Byte offset of the next unprocessed entry.
    read_offset: u64,
}

impl Wal {
    /// Open or create a WAL.
    ///
    /// `processed_seq` comes from the snapshot (0 without one). A corrupt
    /// tail is rotated to `.bak` and the valid prefix is preserved, so one
    /// torn write never loses the whole log.
    pub fn open(path: &Path, processed_seq: u64) -> Result<Self, WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = Self::open_file(path)?;
        let mut scan = scan_file(&file)?;

        if scan.corrupt {
            let bak = crate::snapshot::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak.display(),
                valid_entries = scan.entries.len(),
                "corrupt WAL tail, rotating and keeping the valid prefix",
            );
            drop(file);
            std::fs::rename(path, &bak)?;

            let mut clean = File::create(path)?;
            for (_, raw, _) in &scan.entries {
                clean.write_all(raw.as_bytes())?;
                clean.write_all(b"\n")?;
            }
            clean.sync_all()?;
            drop(clean);

            file = Self::open_file(path)?;
            scan = scan_file(&file)?;
        }

        let write_seq = scan.entries.iter().map(|(s, _, _)| *s).max().unwrap_or(0);
        let read_offset = scan
            .entries
            .iter()
            .find(|(s, _, _)| *s > processed_seq)
            .map(|(_, _, off)| *off)
            .unwrap_or_else(|| Self::end_offset(&scan));

        Ok(Self {
            file,
            path: path.to_owned(),
            write_seq,
            processed_seq,
            buffer: Vec::new(),
            last_flush: Instant::now(),
            read_offset,
        })
    }

    fn open_file(path: &Path) -> Result<File, io::Error> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
    }

    fn end_offset(scan: &Scan) -> u64 {
        scan.entries
            .last()
            .map(|(_, raw, off)| off + raw.len() as u64 + 1)
            .unwrap_or(0)
    }

    /// Append an event to the write buffer.
    ///
    /// Returns the assigned sequence number. Not durable until `flush()`.
    pub fn append(&mut self, event: &Event) -> Result<u64, WalError> {
        self.write_seq += 1;
        let seq = self.write_seq;
        self.buffer.push(serde_json::to_vec(&LineRef { seq, event })?);
        Ok(seq)
    }

    /// Whether the group-commit window has elapsed or the buffer is full.
    pub fn needs_flush(&self) -> bool {
        !self.buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL || self.buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Flush buffered entries with a single fsync. This is the durability point.
    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        for mut bytes in self.buffer.drain(..) {
            bytes.push(b'\n');
            self.file.write_all(&bytes)?;
        }
        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Next entry after the processed cursor, flushing pending writes first.
    pub fn next_unprocessed(&mut self) -> Result<Option<WalEntry>, WalError> {
        self.flush()?;

        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(self.read_offset))?;

        let mut line = String::new();
        let n = match reader.read_line(&mut line) {
            Ok(0) => return Ok(None),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::InvalidData => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            self.read_offset += n as u64;
            return Ok(None);
        }

        match serde_json::from_str::<Line>(trimmed) {
            Ok(record) => {
                self.read_offset += n as u64;
                Ok(Some(WalEntry {
                    seq: record.seq,
                    event: record.event,
                }))
            }
            Err(e) => {
                warn!(offset = self.read_offset, error = %e, "corrupt WAL entry, skipping");
                self.read_offset += n as u64;
                Ok(None)
            }
        }
    }

    /// Advance the processed cursor (persisted by the next snapshot).
    pub fn mark_processed(&mut self, seq: u64) {
        self.processed_seq = seq;
    }

    pub fn processed_seq(&self) -> u64 {
        self.processed_seq
    }

    pub fn write_seq(&self) -> u64 {
        self.write_seq
    }

    /// All entries with `seq > after`, for snapshot replay at boot.
    pub fn entries_after(&mut self, after: u64) -> Result<Vec<WalEntry>, WalError> {
        self.flush()?;
        let scan = scan_file(&self.file)?;
        let mut entries = Vec::new();
        for (seq, raw, _) in scan.entries {
            if seq > after {
                let record: Line = serde_json::from_str(&raw)?;
                entries.push(WalEntry {
                    seq,
                    event: record.event,
                });
            }
        }
        Ok(entries)
    }

    /// Drop entries before `seq` (called after a durable snapshot).
    ///
    /// Rewrites the log through a temp file and an atomic rename.
    pub fn truncate_before(&mut self, seq: u64) -> Result<(), WalError> {
        self.flush()?;

        let scan = scan_file(&self.file)?;
        let tmp = self.path.with_extension("tmp");
        let mut offset = 0u64;
        let mut read_offset = None;
        {
            let mut out = File::create(&tmp)?;
            for (entry_seq, raw, _) in &scan.entries {
                if *entry_seq < seq {
                    continue;
                }
                if *entry_seq > self.processed_seq && read_offset.is_none() {
                    read_offset = Some(offset);
                }
                out.write_all(raw.as_bytes())?;
                out.write_all(b"\n")?;
                offset += raw.len() as u64 + 1;
            }
            out.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;

        self.file = Self::open_file(&self.path)?;
        self.read_offset = read_offset.unwrap_or(offset);
        Ok(())
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
