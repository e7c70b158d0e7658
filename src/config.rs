//! Configuration for the replica client.
//!
//! This module provides the [`Config`] struct together with the reconnect
//! and resync policies it carries.

use std::time::Duration;

/// Default public WebSocket endpoint
pub const DEFAULT_ENDPOINT: &str = "wss://api.hitbtc.com/api/2/ws";

/// API credentials used for the `login` request
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
}

impl Credentials {
    /// Create credentials from an API key and its secret
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Get the API key
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Get the secret key
    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for reconnection behavior
///
/// Reconnection never gives up; the delay between dial attempts grows from
/// `initial_delay` by `multiplier` until it reaches `max_delay`.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Create a new reconnect config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// A fixed delay between attempts
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Set the initial delay
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Calculate delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial = self.initial_delay.as_millis() as f64;
        let max = self.max_delay.as_millis() as f64;
        let delay = initial * self.multiplier.powi(attempt.min(64) as i32);
        Duration::from_millis(delay.min(max) as u64)
    }
}

/// When a symbol with a sequence gap is considered stuck
///
/// A stuck symbol gets a fresh snapshot requested for it.
#[derive(Debug, Clone)]
pub struct ResyncPolicy {
    /// How long a gap may stay open before a snapshot is requested
    pub stale_after: Duration,
    /// How many diffs may wait for a missing predecessor
    pub max_pending: usize,
}

impl Default for ResyncPolicy {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(5),
            max_pending: 1000,
        }
    }
}

/// Configuration for the replica client
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use hitbtc_replica::config::{Config, Credentials, ReconnectConfig};
///
/// let config = Config::new()
///     .with_credentials(Credentials::new("key", "secret"))
///     .with_max_book_depth(20)
///     .with_reconnect(ReconnectConfig::fixed(Duration::from_secs(5)));
///
/// assert_eq!(config.max_book_depth(), 20);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    endpoint: String,
    credentials: Option<Credentials>,
    max_book_depth: usize,
    workers: usize,
    book_workers: usize,
    inbound_capacity: usize,
    diff_capacity: usize,
    outbound_capacity: usize,
    reconnect: ReconnectConfig,
    resync: ResyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Create a configuration with default settings and no credentials
    pub fn new() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials: None,
            max_book_depth: 10,
            workers: 1,
            book_workers: 2,
            inbound_capacity: 200,
            diff_capacity: 100,
            outbound_capacity: 256,
            reconnect: ReconnectConfig::default(),
            resync: ResyncPolicy::default(),
        }
    }

    /// Set the WebSocket endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set credentials; a `login` is sent on every connect
    #[must_use]
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the number of price levels kept per side
    #[must_use]
    pub fn with_max_book_depth(mut self, depth: usize) -> Self {
        self.max_book_depth = depth;
        self
    }

    /// Set the number of classifier workers
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the number of diff-merging workers
    #[must_use]
    pub fn with_book_workers(mut self, workers: usize) -> Self {
        self.book_workers = workers;
        self
    }

    /// Set the capacities of the inbound, diff and outbound queues
    #[must_use]
    pub fn with_queue_capacities(mut self, inbound: usize, diffs: usize, outbound: usize) -> Self {
        self.inbound_capacity = inbound;
        self.diff_capacity = diffs;
        self.outbound_capacity = outbound;
        self
    }

    /// Set reconnect behavior
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Set the resync policy for stuck sequence gaps
    #[must_use]
    pub fn with_resync(mut self, resync: ResyncPolicy) -> Self {
        self.resync = resync;
        self
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Get the credentials
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Get the per-side depth bound
    pub fn max_book_depth(&self) -> usize {
        self.max_book_depth
    }

    /// Get the classifier worker count
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Get the book worker count
    pub fn book_workers(&self) -> usize {
        self.book_workers
    }

    /// Get the inbound queue capacity
    pub fn inbound_capacity(&self) -> usize {
        self.inbound_capacity
    }

    /// Get the diff queue capacity
    pub fn diff_capacity(&self) -> usize {
        self.diff_capacity
    }

    /// Get the outbound queue capacity
    pub fn outbound_capacity(&self) -> usize {
        self.outbound_capacity
    }

    /// Get the reconnect configuration
    pub fn reconnect(&self) -> &ReconnectConfig {
        &self.reconnect
    }

    /// Get the resync policy
    pub fn resync(&self) -> &ResyncPolicy {
        &self.resync
    }

    /// Check that the settings can run a replica
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_book_depth == 0 {
            return Err(crate::Error::Config("max_book_depth must be positive".into()));
        }
        if self.workers == 0 || self.book_workers == 0 {
            return Err(crate::Error::Config("worker counts must be positive".into()));
        }
        if self.inbound_capacity == 0 || self.diff_capacity == 0 || self.outbound_capacity == 0 {
            return Err(crate::Error::Config("queue capacities must be positive".into()));
        }
        let reconnect = &self.reconnect;
        if reconnect.initial_delay.is_zero() || reconnect.max_delay < reconnect.initial_delay {
            return Err(crate::Error::Config(
                "reconnect delays must be positive with max_delay >= initial_delay".into(),
            ));
        }
        if reconnect.multiplier.is_nan() || reconnect.multiplier < 1.0 {
            return Err(crate::Error::Config("reconnect multiplier must be at least 1.0".into()));
        }
        if self.resync.max_pending == 0 || self.resync.stale_after.is_zero() {
            return Err(crate::Error::Config("resync limits must be positive".into()));
        }
        Ok(())
    }
}
