//! Configuration module for taskfiles.
//!
//! Settings come from `TASKS_*` environment variables.

mod settings;

pub use settings::{
    parse_flag, Settings, ENV_CACHE_DIR, ENV_DEBUG, ENV_KEEP_PREFIX, ENV_LOAD_PLUGINS,
    ENV_LOCAL_TASKS, ENV_LOGLEVEL, ENV_PLUGIN_DIR, ENV_ROOT, PLUGINS_DIR_NAME,
};
