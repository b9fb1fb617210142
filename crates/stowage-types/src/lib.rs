pub mod digest;
pub mod error;
pub mod hash;

pub use digest::Digest;
pub use hash::{ContentHasher, HashAlgorithm};
