use stowage_types::{ContentHasher, HashAlgorithm};
use tracing::debug;

use crate::blocklist;
use crate::compress::Compression;
use crate::config::{IndexFilePolicy, StowageConfig, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
use crate::db::{LocalDatabase, StoredOptions};
use crate::error::{Result, StowageError};

/// Effective engine parameters: config merged with what the database fixes.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub block_size: u32,
    pub hasher: ContentHasher,
    pub compression: Compression,
    pub index_policy: IndexFilePolicy,
    pub prefix: String,
    pub fetch_concurrency: usize,
    pub max_in_flight_uploads: usize,
}

impl EngineOptions {
    /// Options for a run with no database to consult.
    pub fn from_config(config: &StowageConfig) -> Result<Self> {
        let algorithm = configured_hash_algorithm(config)?.unwrap_or_default();
        let block_size = config.blocks.block_size.unwrap_or(DEFAULT_BLOCK_SIZE);
        Self::build(config, block_size, algorithm)
    }

    /// Reconcile the config with the options stored in `db`.
    ///
    /// Stored values win over unset config values. An explicit config value
    /// that differs from the stored one is refused. Values the database does
    /// not hold yet are written into it.
    pub fn resolve(config: &StowageConfig, db: &mut LocalDatabase) -> Result<Self> {
        let configured_algorithm = configured_hash_algorithm(config)?;
        let stored = db.stored_options().clone();

        let block_size = reconcile(
            "block size",
            config.blocks.block_size,
            stored.block_size,
            DEFAULT_BLOCK_SIZE,
        )?;
        let algorithm = reconcile(
            "hash algorithm",
            configured_algorithm,
            stored.hash_algorithm,
            HashAlgorithm::default(),
        )?;

        let updated = StoredOptions {
            block_size: Some(block_size),
            hash_algorithm: Some(algorithm),
        };
        if updated != stored {
            debug!(block_size, %algorithm, "recording options in database");
            db.set_stored_options(updated);
        }

        Self::build(config, block_size, algorithm)
    }

    fn build(config: &StowageConfig, block_size: u32, algorithm: HashAlgorithm) -> Result<Self> {
        verify_parameters(block_size, algorithm)?;
        Ok(Self {
            block_size,
            hasher: ContentHasher::new(algorithm),
            compression: Compression::from_config(&config.compression),
            index_policy: config.index_file_policy,
            prefix: config.repository.prefix.clone(),
            fetch_concurrency: config.repair.fetch_concurrency.max(1),
            max_in_flight_uploads: config.repair.max_in_flight_uploads.max(1),
        })
    }

    pub fn digest_size(&self) -> usize {
        self.hasher.digest_size()
    }

    pub fn hashes_per_blocklist(&self) -> usize {
        blocklist::hashes_per_blocklist(self.block_size, self.digest_size())
    }
}

fn configured_hash_algorithm(config: &StowageConfig) -> Result<Option<HashAlgorithm>> {
    config
        .blocks
        .hash_algorithm
        .as_deref()
        .map(str::parse::<HashAlgorithm>)
        .transpose()
}

fn reconcile<T>(what: &str, configured: Option<T>, stored: Option<T>, default: T) -> Result<T>
where
    T: PartialEq + Copy + std::fmt::Display,
{
    match (configured, stored) {
        (Some(c), Some(s)) if c != s => Err(StowageError::User(format!(
            "the {what} of the existing database is {s}, but {c} is configured; \
             changing the {what} is not supported"
        ))),
        (Some(c), _) => Ok(c),
        (None, Some(s)) => Ok(s),
        (None, None) => Ok(default),
    }
}

/// Block size must hold at least two hashes and stay within the codec limit.
pub fn verify_parameters(block_size: u32, algorithm: HashAlgorithm) -> Result<()> {
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
        return Err(StowageError::User(format!(
            "block size {block_size} is outside {MIN_BLOCK_SIZE}..={MAX_BLOCK_SIZE}"
        )));
    }
    if (block_size as usize) < 2 * algorithm.digest_size() {
        return Err(StowageError::User(format!(
            "block size {block_size} is too small for {algorithm}"
        )));
    }
    Ok(())
}
