use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often due posts are scanned for.
    pub scan_interval: Duration,
    /// Most posts claimed per scan.
    pub scan_batch: u32,
    /// Concurrent publish jobs.
    pub workers: usize,
    /// Publish calls per target before a transient failure becomes final.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// How often expiring platform tokens are refreshed.
    pub refresh_interval: Duration,
    /// Tokens expiring within this window are refreshed ahead of time.
    pub refresh_window: chrono::Duration,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(60),
            scan_batch: 100,
            workers: 8,
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(600),
            refresh_window: chrono::Duration::minutes(5),
            shutdown_grace: Duration::from_secs(30),
        }
    }
}
