//! Builder for configuring dispatchers

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::pipeline::Shared;
use super::pool::{DEFAULT_WORKER_THREADS, WorkerPool};
use super::{Dispatcher, singleton};
use crate::cache::disk::DEFAULT_DISK_BUDGET;
use crate::cache::image::DEFAULT_IMAGE_BUDGET;
use crate::cache::{DiskCache, ImageCache, NoCache, ResponseStore};
use crate::delivery::{Delivery, SerialDelivery};
use crate::identity::{self, DEFAULT_APP_NAME, IdentityProvider, SystemIdentity};
use crate::transport::{ReqwestTransport, Transport};
use crate::Result;

/// Default timeout applied by the built-in transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a dispatcher is created from.
///
/// ```rust
/// # use courier::DispatcherConfig;
/// let config = DispatcherConfig::new()
///     .app_name("Shop")
///     .disk_cache_budget(50 * 1024 * 1024)
///     .worker_threads(2);
/// assert_eq!(config.worker_threads, 2);
/// ```
#[derive(Clone)]
pub struct DispatcherConfig {
    /// Application name at the start of the user agent. Default: `"Courier"`.
    pub app_name: String,
    /// Source of version and device descriptors. Default: [`SystemIdentity`].
    pub identity: Arc<dyn IdentityProvider>,
    /// Response cache directory. Default: `<system cache dir>/courier/responses`.
    pub cache_dir: PathBuf,
    /// Response cache size in bytes. Default: 300 MiB.
    pub disk_cache_budget: u64,
    /// Decoded image cache size in bytes. Default: 64 MiB.
    pub image_cache_budget: u64,
    /// Worker pool size. Default: 4.
    pub worker_threads: usize,
    /// Timeout for the built-in transport. Default: 30 s.
    pub request_timeout: Duration,
    /// Replaces the built-in reqwest transport.
    pub transport: Option<Arc<dyn Transport>>,
    /// Where callbacks run. Default: [`SerialDelivery`].
    pub delivery: Option<Arc<dyn Delivery>>,
    /// Replaces the disk cache.
    pub response_store: Option<Arc<dyn ResponseStore>>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            identity: Arc::new(SystemIdentity::new()),
            cache_dir: default_cache_dir(),
            disk_cache_budget: DEFAULT_DISK_BUDGET,
            image_cache_budget: DEFAULT_IMAGE_BUDGET,
            worker_threads: DEFAULT_WORKER_THREADS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: None,
            delivery: None,
            response_store: None,
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    pub fn identity(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.identity = Arc::new(provider);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn disk_cache_budget(mut self, bytes: u64) -> Self {
        self.disk_cache_budget = bytes;
        self
    }

    pub fn image_cache_budget(mut self, bytes: u64) -> Self {
        self.image_cache_budget = bytes;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for DispatcherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherConfig")
            .field("app_name", &self.app_name)
            .field("cache_dir", &self.cache_dir)
            .field("disk_cache_budget", &self.disk_cache_budget)
            .field("image_cache_budget", &self.image_cache_budget)
            .field("worker_threads", &self.worker_threads)
            .field("request_timeout", &self.request_timeout)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_delivery", &self.delivery.is_some())
            .field("custom_store", &self.response_store.is_some())
            .finish_non_exhaustive()
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("courier")
        .join("responses")
}

/// Builder for configuring dispatchers.
///
/// [`load`](Self::load) installs the process-wide dispatcher used by
/// [`Courier`](crate::Courier); [`build`](Self::build) creates an
/// independent one.
#[derive(Debug, Clone, Default)]
pub struct CourierBuilder {
    config: DispatcherConfig,
}

impl CourierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Application name used in the user agent.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    /// Provider of the version and device descriptors in the user agent.
    pub fn identity(mut self, provider: impl IdentityProvider + 'static) -> Self {
        self.config.identity = Arc::new(provider);
        self
    }

    /// Directory for the persistent response cache.
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    /// Byte budget of the persistent response cache.
    pub fn disk_cache_budget(mut self, bytes: u64) -> Self {
        self.config.disk_cache_budget = bytes;
        self
    }

    /// Byte budget of the decoded image cache.
    pub fn image_cache_budget(mut self, bytes: u64) -> Self {
        self.config.image_cache_budget = bytes;
        self
    }

    /// Number of worker threads.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    /// Timeout for the built-in transport.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Use a custom transport.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.config.transport = Some(Arc::new(transport));
        self
    }

    /// Run callbacks through a custom delivery.
    pub fn delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.config.delivery = Some(delivery);
        self
    }

    /// Store responses somewhere other than the disk cache.
    pub fn response_store(mut self, store: Arc<dyn ResponseStore>) -> Self {
        self.config.response_store = Some(store);
        self
    }

    /// Keep nothing between requests.
    pub fn disable_response_cache(self) -> Self {
        self.response_store(Arc::new(NoCache))
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Create an independent dispatcher.
    ///
    /// Fails if any component cannot be created as configured.
    pub fn build(self) -> Result<Dispatcher> {
        assemble(self.config, false)
    }

    /// Install the process-wide dispatcher, or return the one already
    /// installed (this builder is then ignored).
    ///
    /// Unlike [`build`](Self::build), an unusable cache directory or a zero
    /// thread count degrade instead of failing.
    pub fn load(self) -> Result<Arc<Dispatcher>> {
        singleton::load_with(self)
    }

    pub(crate) fn into_config(self) -> DispatcherConfig {
        self.config
    }
}

/// Create a dispatcher. `lenient` degrades recoverable misconfiguration.
pub(crate) fn assemble(config: DispatcherConfig, lenient: bool) -> Result<Dispatcher> {
    let threads = if lenient && config.worker_threads == 0 {
        warn!("worker_threads is 0, using 1");
        1
    } else {
        config.worker_threads
    };
    let pool = WorkerPool::new(threads)?;

    let cache: Arc<dyn ResponseStore> = match config.response_store {
        Some(store) => store,
        None => match DiskCache::open(&config.cache_dir, config.disk_cache_budget) {
            Ok(disk) => Arc::new(disk),
            Err(e) if lenient => {
                warn!(
                    dir = %config.cache_dir.display(),
                    error = %e,
                    "response cache unavailable, continuing without it"
                );
                Arc::new(NoCache)
            }
            Err(e) => return Err(e),
        },
    };

    let transport: Arc<dyn Transport> = match config.transport {
        Some(transport) => transport,
        None => Arc::new(ReqwestTransport::new(config.request_timeout)?),
    };
    let delivery = config
        .delivery
        .unwrap_or_else(|| Arc::new(SerialDelivery::new()));

    let (app_version, user_agent) = identity::resolve(config.identity.as_ref(), &config.app_name);
    info!(
        user_agent = %user_agent,
        workers = threads,
        disk_budget = config.disk_cache_budget,
        image_budget = config.image_cache_budget,
        "dispatcher ready"
    );

    let shared = Shared {
        cache,
        images: ImageCache::new(config.image_cache_budget),
        transport,
        delivery,
        user_agent,
        app_version,
        workers: pool.handle().clone(),
    };
    Ok(Dispatcher::from_parts(Arc::new(shared), pool))
}
