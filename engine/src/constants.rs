//! Application-wide constants and default values

/// Event bus configuration
pub mod events {
    use std::time::Duration;

    /// How long a broadcast waits on one subscriber before dropping it
    pub const DELIVERY_TIMEOUT: Duration = Duration::from_millis(500);

    /// Buffered messages per subscriber before deliveries start to block.
    /// A subscriber that never reads is dropped by the first broadcast that
    /// finds this buffer full.
    pub const SUBSCRIBER_CAPACITY: usize = 64;
}

/// Program lifecycle defaults
pub mod program {
    /// Automatic restarts allowed before a program is marked fatal
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Seconds a process must survive in `starting` to count as running
    pub const DEFAULT_START_SECS: f64 = 1.0;

    /// Seconds to wait in `backoff` before respawning
    pub const DEFAULT_BACKOFF_SECS: f64 = 1.0;

    /// Seconds between SIGTERM and SIGKILL
    pub const DEFAULT_STOP_TIMEOUT_SECS: f64 = 10.0;

    /// Exit code recorded when the OS refused to launch the program
    pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

    /// Grace added on top of a program's stop timeout when replacing it
    pub const REPLACE_WAIT_SLACK_SECS: f64 = 2.0;

    /// Bounded wait for the reaper after SIGKILL
    pub const KILL_WAIT_SECS: f64 = 5.0;
}

/// Daemon defaults
pub mod daemon {
    /// Name of the desired-state file inside the config directory
    pub const PROGRAMS_FILE: &str = "programs.yml";

    /// Config directory name under the user's home
    pub const DEFAULT_CONFIG_DIR_NAME: &str = ".suv";

    /// REST listen address
    pub const DEFAULT_REST_ADDR: &str = "127.0.0.1:11313";

    pub const DEFAULT_LOG_LEVEL: &str = "info";
}
