//! JSONL-based record store.
//!
//! The log directory holds one `<task>.jsonl` file per logical task. Every
//! write is a single appended line; a later line for the same attempt
//! supersedes an earlier one until a terminal version has been read, after
//! which the attempt is frozen.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use super::traits::{RecordStore, ensure_terminal};
use crate::domain::RunRecord;
use crate::error::{EvalLoopError, Result};

const EXTENSION: &str = "jsonl";

/// JSONL record store rooted at a log directory.
pub struct JsonlRecordStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for JsonlRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlRecordStore")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl JsonlRecordStore {
    /// Open the store, creating the log directory if needed.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)
            .map_err(|e| EvalLoopError::Storage(format!("{}: {}", base_path.display(), e)))?;
        Ok(Self {
            base_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the file path holding a logical task's attempts.
    fn task_path(&self, logical_task_id: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", encode_file_stem(logical_task_id), EXTENSION))
    }

    /// Append one line, repairing a torn final line first.
    fn append_line(&self, path: &Path, record: &RunRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).read(true).open(path)?;
        if !ends_with_newline(&mut file)? {
            line.insert(0, '\n');
        }
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }
}

impl RecordStore for JsonlRecordStore {
    fn append(&self, record: &RunRecord) -> Result<()> {
        let _guard = self.write_lock.lock().map_err(|e| EvalLoopError::Storage(e.to_string()))?;
        let path = self.task_path(&record.logical_task_id);

        if read_task_file(&path)?
            .iter()
            .any(|r| r.attempt_id == record.attempt_id)
        {
            return Err(EvalLoopError::Storage(format!(
                "duplicate attempt id: {}",
                record.attempt_id
            )));
        }

        self.append_line(&path, record)?;
        debug!("Appended attempt {} for {}", record.attempt_id, record.logical_task_id);
        Ok(())
    }

    fn finish(&self, record: &RunRecord) -> Result<()> {
        ensure_terminal(record)?;
        let _guard = self.write_lock.lock().map_err(|e| EvalLoopError::Storage(e.to_string()))?;
        let path = self.task_path(&record.logical_task_id);

        let existing = read_task_file(&path)?
            .into_iter()
            .find(|r| r.attempt_id == record.attempt_id)
            .ok_or_else(|| EvalLoopError::AttemptNotFound(record.attempt_id.clone()))?;
        if existing.status.is_terminal() {
            return Err(EvalLoopError::AttemptFinalized(record.attempt_id.clone()));
        }

        self.append_line(&path, record)?;
        debug!(
            "Finished attempt {} for {} as {}",
            record.attempt_id, record.logical_task_id, record.status
        );
        Ok(())
    }

    fn scan(&self, visit: &mut dyn FnMut(RunRecord) -> Result<()>) -> Result<()> {
        let entries = fs::read_dir(&self.base_path)
            .map_err(|e| EvalLoopError::Storage(format!("{}: {}", self.base_path.display(), e)))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(EXTENSION) {
                paths.push(path);
            }
        }
        paths.sort();

        // One task file in memory at a time.
        for path in paths {
            for record in read_task_file(&path)? {
                visit(record)?;
            }
        }
        Ok(())
    }
}

/// Read a task file, collapsing versions to one record per attempt.
fn read_task_file(path: &Path) -> Result<Vec<RunRecord>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EvalLoopError::Storage(format!("{}: {}", path.display(), e))),
    };

    let mut records: Vec<RunRecord> = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: RunRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) if e.is_eof() => {
                warn!("Skipping torn record at {}:{}", path.display(), index + 1);
                continue;
            }
            Err(e) => {
                return Err(EvalLoopError::Storage(format!(
                    "corrupt record at {}:{}: {}",
                    path.display(),
                    index + 1,
                    e
                )));
            }
        };

        match records.iter_mut().find(|r| r.attempt_id == record.attempt_id) {
            Some(existing) if existing.status.is_terminal() => {
                warn!(
                    "Ignoring write to finalized attempt {} at {}:{}",
                    record.attempt_id,
                    path.display(),
                    index + 1
                );
            }
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }
    Ok(records)
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    let len = file.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Map a logical task id to a portable file stem.
///
/// ASCII alphanumerics, `-` and `_` pass through; every other byte becomes
/// `%xx` so ids like `mmlu/abstract.algebra` stay one flat file.
pub(crate) fn encode_file_stem(logical_task_id: &str) -> String {
    let mut stem = String::with_capacity(logical_task_id.len());
    for byte in logical_task_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            stem.push(byte as char);
        } else {
            stem.push('%');
            stem.push_str(&hex::encode([byte]));
        }
    }
    stem
}
