//! Storage layer for evalloop - the run record store.
//!
//! Every component receives an explicit store handle; there is no
//! process-wide default log directory.
//!
//! Backends:
//! - `JsonlRecordStore`: one JSONL file per logical task in a log directory
//! - `SqliteRecordStore`: a single SQLite database
//! - `MemoryRecordStore`: in-process, for embedding and tests

mod jsonl;
mod memory;
mod sqlite;
mod traits;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub use jsonl::JsonlRecordStore;
pub(crate) use jsonl::encode_file_stem;
pub use memory::MemoryRecordStore;
pub use sqlite::SqliteRecordStore;
pub use traits::{RecordStore, find_attempt};

use crate::error::{EvalLoopError, Result};

/// File name of the SQLite database inside a log directory.
pub const SQLITE_FILE: &str = "runs.db";

/// Which backend to open for a log directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Jsonl,
    Sqlite,
}

impl FromStr for Backend {
    type Err = EvalLoopError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" => Ok(Backend::Jsonl),
            "sqlite" => Ok(Backend::Sqlite),
            other => Err(EvalLoopError::InvalidConfig(format!("unknown storage backend: {}", other))),
        }
    }
}

/// Open the record store for a log directory.
pub fn open_store(backend: Backend, log_dir: impl AsRef<Path>) -> Result<Arc<dyn RecordStore>> {
    let log_dir = log_dir.as_ref();
    Ok(match backend {
        Backend::Jsonl => Arc::new(JsonlRecordStore::open(log_dir)?),
        Backend::Sqlite => Arc::new(SqliteRecordStore::open(log_dir.join(SQLITE_FILE))?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunRecord;
    use tempfile::TempDir;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("jsonl".parse::<Backend>().unwrap(), Backend::Jsonl);
        assert_eq!("sqlite".parse::<Backend>().unwrap(), Backend::Sqlite);
        assert!("redis".parse::<Backend>().is_err());
    }

    #[test]
    fn test_open_store_backends() {
        let temp = TempDir::new().unwrap();
        for backend in [Backend::Jsonl, Backend::Sqlite] {
            let dir = temp.path().join(format!("{:?}", backend));
            let store = open_store(backend, &dir).unwrap();
            store.append(&RunRecord::start("t")).unwrap();
            assert_eq!(store.list_all().unwrap().len(), 1);
        }
        assert!(temp.path().join("Sqlite").join(SQLITE_FILE).exists());
    }
}
