pub mod backend;
pub mod blocklist;
pub mod check;
pub mod commands;
pub mod compress;
pub mod config;
pub mod db;
pub mod filter;
pub mod options;
pub mod storage;
pub mod volume;

pub use stowage_types::error;

#[cfg(test)]
mod tests;
#[cfg(test)]
mod testutil;
