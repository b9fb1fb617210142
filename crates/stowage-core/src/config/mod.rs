mod defaults;
mod resolve;
mod types;
mod util;

pub use self::defaults::{DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use self::resolve::{
    default_config_search_paths, load_config, minimal_config_template, resolve_config_path,
    ConfigSource,
};
pub use self::types::*;
pub use self::util::expand_tilde;
