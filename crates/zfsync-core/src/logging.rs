//! Logger bootstrap shared by zfsync binaries.

use env_logger::{Builder, Env};

/// Environment variable holding an `env_logger` filter (e.g. `zfsync_zfs=debug`).
pub const LOG_ENV: &str = "ZFSYNC_LOG";

/// Install the global logger, falling back to `default_level` when `ZFSYNC_LOG` is unset.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(default_level: &str) {
    let env = Env::default().filter_or(LOG_ENV, default_level);
    let _ = Builder::from_env(env)
        .format_timestamp_secs()
        .format_target(false)
        .try_init();
}
