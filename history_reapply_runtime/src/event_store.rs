//! Append-only history log, one file per run.
//!
//! Storage format: length-prefixed protobuf frames.
//!   [4-byte LE length][ProtoLogRecord bytes][4-byte LE length][...]...
//!
//! A record is either a history event or a dedup resource. A batch holds
//! the events of one operation followed by the dedup resources it
//! recorded, and is written with a single fsync, so a resource is durable
//! exactly when the signal it guards is.
//!
//! Rules:
//!   - Strict append only: no mutation, no deletion, no reordering
//!   - fsync after every batch
//!   - event_id strictly contiguous (validated on append)

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use prost::Message;

use history_reapply::HistoryEvent;

use crate::error::{io_error, RuntimeError};
use crate::proto_bridge::{history_to_proto, proto_to_history};
use crate::proto_types::{DedupResourceRecord, LogRecordKind, ProtoLogRecord};

/// Upper bound on a single frame.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Everything a log holds, in log order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogContents {
    pub events: Vec<HistoryEvent>,
    pub dedup_resources: Vec<String>,
}

pub struct EventStore {
    path: PathBuf,
    last_event_id: i64,
}

impl EventStore {
    /// Open or create a log. Reads existing frames to find the last event id.
    pub fn open(path: &Path) -> Result<Self, RuntimeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let last_event_id = if path.exists() {
            Self::read_from_file(path)?
                .events
                .last()
                .map(|e| e.event_id)
                .unwrap_or(0)
        } else {
            0
        };

        Ok(Self {
            path: path.to_path_buf(),
            last_event_id,
        })
    }

    /// Append events in order. All ids are validated before anything is
    /// written, so a rejected batch leaves the log unchanged.
    pub fn append_events(&mut self, events: &[HistoryEvent]) -> Result<(), RuntimeError> {
        self.append_batch(events, &[])
    }

    pub fn append_event(&mut self, event: &HistoryEvent) -> Result<(), RuntimeError> {
        self.append_events(std::slice::from_ref(event))
    }

    /// Append events and the dedup resources recorded with them as one
    /// fsynced batch.
    pub fn append_batch(
        &mut self,
        events: &[HistoryEvent],
        dedup_resources: &[String],
    ) -> Result<(), RuntimeError> {
        if events.is_empty() && dedup_resources.is_empty() {
            return Ok(());
        }
        let mut expected = self.last_event_id + 1;
        for event in events {
            if event.event_id != expected {
                return Err(RuntimeError::SequenceViolation {
                    expected,
                    got: event.event_id,
                });
            }
            expected += 1;
        }

        let records = events
            .iter()
            .map(|event| LogRecordKind::Event(history_to_proto(event)))
            .chain(dedup_resources.iter().map(|resource_id| {
                LogRecordKind::DedupResource(DedupResourceRecord {
                    resource_id: resource_id.clone(),
                })
            }));

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_error(&self.path, e))?;

        {
            let mut writer = BufWriter::new(&mut file);
            for record in records {
                let buf = ProtoLogRecord {
                    record: Some(record),
                }
                .encode_to_vec();
                let len = buf.len() as u32;
                writer
                    .write_all(&len.to_le_bytes())
                    .and_then(|_| writer.write_all(&buf))
                    .map_err(|e| io_error(&self.path, e))?;
            }
            writer.flush().map_err(|e| io_error(&self.path, e))?;
        }
        file.sync_all().map_err(|e| io_error(&self.path, e))?;

        self.last_event_id = expected - 1;
        Ok(())
    }

    /// Load every record in log order.
    pub fn load(&self) -> Result<LogContents, RuntimeError> {
        if !self.path.exists() {
            return Ok(LogContents::default());
        }
        Self::read_from_file(&self.path)
    }

    pub fn load_all_events(&self) -> Result<Vec<HistoryEvent>, RuntimeError> {
        Ok(self.load()?.events)
    }

    /// Events after `event_id`, for replaying on top of a snapshot.
    pub fn load_events_after(&self, event_id: i64) -> Result<Vec<HistoryEvent>, RuntimeError> {
        let mut events = self.load_all_events()?;
        events.retain(|e| e.event_id > event_id);
        Ok(events)
    }

    pub fn last_event_id(&self) -> i64 {
        self.last_event_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_from_file(path: &Path) -> Result<LogContents, RuntimeError> {
        let corrupt = |reason: String| RuntimeError::CorruptLog {
            path: path.display().to_string(),
            reason,
        };

        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let mut reader = BufReader::new(file);
        let mut contents = LogContents::default();
        let mut frames = 0usize;
        let mut len_buf = [0u8; 4];

        loop {
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(io_error(path, e)),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len == 0 || len > MAX_FRAME_LEN {
                return Err(corrupt(format!("invalid frame length {len}")));
            }

            let mut frame = vec![0u8; len];
            reader
                .read_exact(&mut frame)
                .map_err(|e| corrupt(format!("truncated frame after record {frames}: {e}")))?;

            let record = ProtoLogRecord::decode(frame.as_slice())
                .map_err(|e| corrupt(format!("protobuf decode error: {e}")))?;
            match record.record {
                Some(LogRecordKind::Event(proto)) => contents.events.push(proto_to_history(&proto)?),
                Some(LogRecordKind::DedupResource(r)) => contents.dedup_resources.push(r.resource_id),
                None => return Err(corrupt(format!("empty record {frames}"))),
            }
            frames += 1;
        }

        Ok(contents)
    }
}
