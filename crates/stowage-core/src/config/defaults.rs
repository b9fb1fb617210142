use super::types::CompressionAlgorithm;

pub(super) fn default_prefix() -> String {
    "stowage".to_string()
}

pub(super) fn default_algorithm() -> CompressionAlgorithm {
    CompressionAlgorithm::Zstd
}

pub(super) fn default_zstd_level() -> i32 {
    3
}

pub(super) fn default_fetch_concurrency() -> usize {
    4
}

pub(super) fn default_max_in_flight_uploads() -> usize {
    4
}

/// Block size used when neither the config nor the database names one.
pub const DEFAULT_BLOCK_SIZE: u32 = 100 * 1024; // 100 KiB

pub const MIN_BLOCK_SIZE: u32 = 1024;

/// Upper bound keeps single blocks inside the decompression limit.
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;
