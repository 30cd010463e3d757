//! Request dispatcher.
//!
//! A [`Dispatcher`] owns the response cache, the decoded image cache, the
//! transport and a pool of worker threads. Requests are scheduled onto the
//! workers without blocking the caller; each one completes exactly once,
//! through exactly one of its two callbacks, on the configured
//! [`Delivery`](crate::delivery::Delivery).
//!
//! Most applications use the process-wide instance through [`Courier`].
//! [`CourierBuilder::build`] creates independent dispatchers.

mod builder;
mod pipeline;
mod pool;
mod singleton;

pub use builder::{CourierBuilder, DEFAULT_REQUEST_TIMEOUT, DispatcherConfig};
pub use pool::DEFAULT_WORKER_THREADS;
pub use singleton::{Courier, LoadState};

use std::sync::Arc;

use image::DynamicImage;
use reqwest::Method;

use self::pipeline::Shared;
use self::pool::WorkerPool;
use crate::cache::{ImageCache, ResponseStore};
use crate::multipart::MultipartForm;
use crate::parser::ResponseParser;
use crate::request::FireRequest;
use crate::resource::{Resource, SharedParser};
use crate::{CourierError, Params, Result};

/// Coordinates requests across the caches, the transport and the workers.
pub struct Dispatcher {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl Dispatcher {
    fn from_parts(shared: Arc<Shared>, pool: WorkerPool) -> Self {
        Self { shared, pool }
    }

    /// Fire a request at `resource`.
    ///
    /// `params` are sent as the query string for `GET` and as a form body
    /// for every other method. The parsed result goes to `on_success`; any
    /// transport, server or parse failure goes to `on_error`.
    ///
    /// The skeleton path is used as is; see
    /// [`fire_templated`](Self::fire_templated) to fill its placeholders.
    pub fn fire<T, S, E>(
        &self,
        method: Method,
        resource: &Resource<T>,
        params: Option<&Params>,
        on_success: S,
        on_error: E,
    ) where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        self.fire_templated(method, resource, None, params, on_success, on_error);
    }

    /// [`fire`](Self::fire) with the skeleton path filled from `placeholders`.
    pub fn fire_templated<T, S, E>(
        &self,
        method: Method,
        resource: &Resource<T>,
        placeholders: Option<&Params>,
        params: Option<&Params>,
        on_success: S,
        on_error: E,
    ) where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        let request = resource.request(method, placeholders, params);
        self.submit(request, Arc::clone(resource.parser()), on_success, on_error);
    }

    /// Fire a prepared request, parsing the response with `parser`.
    pub fn submit<T, S, E>(
        &self,
        request: FireRequest,
        parser: SharedParser<T>,
        on_success: S,
        on_error: E,
    ) where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(async move {
            let outcome = pipeline::execute(&shared, &request, parser.as_ref()).await;
            deliver(&shared, outcome, on_success, on_error);
        });
    }

    /// Fire a multipart request at `resource`, with `placeholders` filling
    /// its skeleton path.
    ///
    /// The body is built before anything is scheduled; a file that cannot
    /// be read is reported to `on_error` as [`CourierError::Multipart`].
    pub fn fire_multipart<T, S, E>(
        &self,
        method: Method,
        resource: &Resource<T>,
        placeholders: Option<&Params>,
        form: MultipartForm,
        on_success: S,
        on_error: E,
    ) where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        match form.build() {
            Ok(body) => {
                let request = FireRequest::multipart(method, resource.url(placeholders), body);
                self.submit(request, Arc::clone(resource.parser()), on_success, on_error);
            }
            Err(e) => {
                tracing::warn!(url = %resource.url(placeholders), error = %e, "multipart body not built");
                deliver::<T, S, E>(&self.shared, Err(e), on_success, on_error);
            }
        }
    }

    /// Perform a request on the current task and return its parsed result.
    ///
    /// Callbacks and the delivery are bypassed; the caches are not.
    pub async fn fetch<T: Send + 'static>(
        &self,
        request: FireRequest,
        parser: &dyn ResponseParser<Output = T>,
    ) -> Result<T> {
        pipeline::execute(&self.shared, &request, parser).await
    }

    /// Fetch an image, scaled down to fit the given bounds.
    ///
    /// Served from the image cache when possible. Concurrent fetches of the
    /// same URL and bounds share one download and decode.
    pub fn fetch_image<S, E>(
        &self,
        url: impl Into<String>,
        max_width: Option<u32>,
        max_height: Option<u32>,
        on_success: S,
        on_error: E,
    ) where
        S: FnOnce(Arc<DynamicImage>) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        let url = url.into();
        let shared = Arc::clone(&self.shared);
        self.pool.spawn(async move {
            let outcome = pipeline::load_image(&shared, &url, max_width, max_height).await;
            deliver(&shared, outcome, on_success, on_error);
        });
    }

    /// Async form of [`fetch_image`](Self::fetch_image).
    pub async fn image(
        &self,
        url: &str,
        max_width: Option<u32>,
        max_height: Option<u32>,
    ) -> Result<Arc<DynamicImage>> {
        pipeline::load_image(&self.shared, url, max_width, max_height).await
    }

    /// User agent sent with default headers.
    pub fn user_agent(&self) -> &str {
        &self.shared.user_agent
    }

    /// Application version the user agent was built from.
    pub fn app_version(&self) -> &str {
        &self.shared.app_version
    }

    pub fn response_store(&self) -> &Arc<dyn ResponseStore> {
        &self.shared.cache
    }

    pub fn image_cache(&self) -> &ImageCache {
        &self.shared.images
    }

    pub fn worker_threads(&self) -> usize {
        self.pool.threads()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("user_agent", &self.shared.user_agent)
            .field("workers", &self.pool.threads())
            .finish_non_exhaustive()
    }
}

fn deliver<T, S, E>(shared: &Shared, outcome: Result<T>, on_success: S, on_error: E)
where
    T: Send + 'static,
    S: FnOnce(T) + Send + 'static,
    E: FnOnce(CourierError) + Send + 'static,
{
    shared.delivery.post(Box::new(move || match outcome {
        Ok(value) => on_success(value),
        Err(e) => on_error(e),
    }));
}
