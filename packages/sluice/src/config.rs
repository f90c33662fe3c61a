//! Process-wide configuration, read once from the environment.

use std::{
    env,
    str::FromStr,
    sync::OnceLock,
    thread,
};


/// Environment variable for [`Config::buffer_size`].
pub const BUFFER_SIZE_VAR: &str = "SLUICE_BUFFER_SIZE";
/// Environment variable for [`Config::io_worker_threads`].
pub const IO_THREADS_VAR: &str = "SLUICE_IO_THREADS";
/// Environment variable for [`Config::io_thread_name`].
pub const IO_THREAD_NAME_VAR: &str = "SLUICE_IO_THREAD_NAME";

const DEFAULT_BUFFER_SIZE: usize = 128;
const MIN_BUFFER_SIZE: usize = 16;
const DEFAULT_IO_THREAD_NAME: &str = "sluice-io";

static CONFIG: OnceLock<Config> = OnceLock::new();


/// Tunables of the execution core
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Config {
    /// Number of items prefetched by consumers that batch their requests.
    pub buffer_size: usize,
    /// Worker thread count of the shared runtime behind [`schedulers::io`][1].
    ///
    /// [1]: crate::scheduler::schedulers::io
    pub io_worker_threads: usize,
    /// Thread name of the shared runtime's workers.
    pub io_thread_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            buffer_size: DEFAULT_BUFFER_SIZE,
            io_worker_threads: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            io_thread_name: DEFAULT_IO_THREAD_NAME.to_owned(),
        }
    }
}

impl Config {
    /// Build from the environment, falling back to defaults for unset or invalid values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    // build from an arbitrary key lookup.
    fn from_lookup<L: Fn(&str) -> Option<String>>(lookup: L) -> Self {
        let mut config = Config::default();
        if let Some(n) = parse::<usize>(&lookup, BUFFER_SIZE_VAR) {
            config.buffer_size = n.max(MIN_BUFFER_SIZE);
        }
        if let Some(n) = parse::<usize>(&lookup, IO_THREADS_VAR) {
            if n > 0 {
                config.io_worker_threads = n;
            } else {
                warn!(var = IO_THREADS_VAR, "worker thread count must be positive, using default");
            }
        }
        if let Some(name) = lookup(IO_THREAD_NAME_VAR).filter(|s| !s.is_empty()) {
            config.io_thread_name = name;
        }
        config
    }
}

// parse a variable, warning about and ignoring unparseable values.
fn parse<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!(var = key, value = %raw, "invalid configuration value, using default");
            None
        }
    }
}

/// The process-wide configuration, read from the environment on first use.
pub fn config() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}
