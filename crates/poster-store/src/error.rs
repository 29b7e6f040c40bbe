/// Failures from the document store and the state façade over it.
///
/// Reads and writes are separate variants so callers can tell whether
/// anything may have been persisted.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store read failed ({op}): {detail}")]
    Read { op: &'static str, detail: String },

    #[error("store write failed ({op}): {detail}")]
    Write { op: &'static str, detail: String },

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// `map_err` adapter for a failed read.
    pub fn read<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> Self {
        move |e| Self::Read {
            op,
            detail: e.to_string(),
        }
    }

    /// `map_err` adapter for a failed write.
    pub fn write<E: std::fmt::Display>(op: &'static str) -> impl FnOnce(E) -> Self {
        move |e| Self::Write {
            op,
            detail: e.to_string(),
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
