use thiserror::Error;

pub type Result<T> = std::result::Result<T, StowageError>;

#[derive(Debug, Error)]
pub enum StowageError {
    /// Invalid request or environment; the operator has to act before retrying.
    #[error("{0}")]
    User(String),

    #[error("changing the passphrase is not supported by repair")]
    PassphraseChangeUnsupported,

    #[error("database file does not exist: {0}")]
    DatabaseNotFound(String),

    /// The local database cannot be trusted to drive remote mutations.
    #[error("{0}")]
    DataLossGuard(String),

    #[error("internal consistency check failed: {0}")]
    InternalConsistency(String),

    #[error(
        "repair not possible, missing {count} blocks for volume {volume} \
         (needed by filesets: {}).\nIf you want to continue working with the database, \
         you can use the \"list-broken-files\" and \"purge-broken-files\" commands to purge \
         the missing data from the database and the remote storage.",
        filesets.join(", ")
    )]
    MissingBlocks {
        count: usize,
        volume: String,
        filesets: Vec<String>,
    },

    #[error("remote volume not found: '{0}'")]
    VolumeNotFound(String),

    #[error("invalid volume format: {0}")]
    InvalidFormat(String),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation interrupted")]
    Interrupted,

    #[error("{0}")]
    Other(String),
}

impl StowageError {
    /// Errors that must unwind the whole run instead of being recorded
    /// against a single remote volume.
    pub fn aborts_run(&self) -> bool {
        matches!(
            self,
            StowageError::Interrupted
                | StowageError::DataLossGuard(_)
                | StowageError::MissingBlocks { .. }
                | StowageError::PassphraseChangeUnsupported
                | StowageError::DatabaseNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_blocks_message_names_recovery_commands() {
        let err = StowageError::MissingBlocks {
            count: 2,
            volume: "stowage-b00.dblock".into(),
            filesets: vec!["stowage-20240101T000000Z.dlist".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("missing 2 blocks"));
        assert!(msg.contains("stowage-20240101T000000Z.dlist"));
        assert!(msg.contains("purge-broken-files"));
    }

    #[test]
    fn per_item_errors_do_not_abort() {
        assert!(!StowageError::InternalConsistency("x".into()).aborts_run());
        assert!(!StowageError::VolumeNotFound("x".into()).aborts_run());
        assert!(StowageError::Interrupted.aborts_run());
    }
}
