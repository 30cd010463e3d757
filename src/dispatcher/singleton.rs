//! The process-wide dispatcher.
//!
//! `Unloaded → Loading → Loaded`, with `Loaded` terminal for the life of
//! the process. The whole check-and-create sequence runs under one lock,
//! so concurrent first loaders converge on a single instance.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::DynamicImage;
use reqwest::Method;
use tracing::{debug, warn};

use super::builder::{self, CourierBuilder};
use super::Dispatcher;
use crate::identity::DEFAULT_USER_AGENT;
use crate::multipart::MultipartForm;
use crate::request::FireRequest;
use crate::resource::{Resource, SharedParser};
use crate::{CourierError, Params, Result};

enum Slot {
    Unloaded,
    Loading,
    Loaded(Arc<Dispatcher>),
}

static SLOT: Mutex<Slot> = Mutex::new(Slot::Unloaded);

/// Observable state of the process-wide dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    /// A previous load panicked part-way; the next load starts over.
    Loading,
    Loaded,
}

fn slot() -> MutexGuard<'static, Slot> {
    SLOT.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn load_with(builder: CourierBuilder) -> Result<Arc<Dispatcher>> {
    let mut slot = slot();
    match &*slot {
        Slot::Loaded(dispatcher) => {
            debug!("dispatcher already loaded");
            return Ok(Arc::clone(dispatcher));
        }
        Slot::Loading => warn!("previous load did not finish, loading again"),
        Slot::Unloaded => {}
    }

    *slot = Slot::Loading;
    match builder::assemble(builder.into_config(), true) {
        Ok(dispatcher) => {
            let dispatcher = Arc::new(dispatcher);
            *slot = Slot::Loaded(Arc::clone(&dispatcher));
            Ok(dispatcher)
        }
        Err(e) => {
            *slot = Slot::Unloaded;
            Err(e)
        }
    }
}

/// Entry point to the process-wide dispatcher.
///
/// ```rust,no_run
/// use courier::{Courier, Method, Resource};
///
/// # fn main() -> courier::Result<()> {
/// Courier::builder().app_name("Shop").load()?;
///
/// let status = Resource::text("https://api.example.com/status");
/// Courier::fire(
///     Method::GET,
///     &status,
///     None,
///     |body| println!("{body}"),
///     |err| eprintln!("{err}"),
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct Courier;

impl Courier {
    pub fn builder() -> CourierBuilder {
        CourierBuilder::new()
    }

    /// Load with the default configuration. Idempotent.
    pub fn load() -> Result<Arc<Dispatcher>> {
        Self::builder().load()
    }

    /// The loaded dispatcher, or [`CourierError::NotLoaded`].
    pub fn instance() -> Result<Arc<Dispatcher>> {
        match &*slot() {
            Slot::Loaded(dispatcher) => Ok(Arc::clone(dispatcher)),
            _ => Err(CourierError::NotLoaded),
        }
    }

    pub fn state() -> LoadState {
        match &*slot() {
            Slot::Unloaded => LoadState::Unloaded,
            Slot::Loading => LoadState::Loading,
            Slot::Loaded(_) => LoadState::Loaded,
        }
    }

    pub fn is_loaded() -> bool {
        Self::state() == LoadState::Loaded
    }

    /// [`Dispatcher::fire`] on the loaded dispatcher.
    ///
    /// Before [`load`](Self::load) this returns
    /// [`CourierError::NotLoaded`] and neither callback runs.
    pub fn fire<T, S, E>(
        method: Method,
        resource: &Resource<T>,
        params: Option<&Params>,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        Self::instance()?.fire(method, resource, params, on_success, on_error);
        Ok(())
    }

    /// [`Dispatcher::fire_templated`] on the loaded dispatcher.
    pub fn fire_templated<T, S, E>(
        method: Method,
        resource: &Resource<T>,
        placeholders: Option<&Params>,
        params: Option<&Params>,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        Self::instance()?.fire_templated(
            method,
            resource,
            placeholders,
            params,
            on_success,
            on_error,
        );
        Ok(())
    }

    /// [`Dispatcher::submit`] on the loaded dispatcher.
    pub fn submit<T, S, E>(
        request: FireRequest,
        parser: SharedParser<T>,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        Self::instance()?.submit(request, parser, on_success, on_error);
        Ok(())
    }

    /// [`Dispatcher::fire_multipart`] on the loaded dispatcher.
    pub fn fire_multipart<T, S, E>(
        method: Method,
        resource: &Resource<T>,
        placeholders: Option<&Params>,
        form: MultipartForm,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        T: Send + 'static,
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        Self::instance()?.fire_multipart(method, resource, placeholders, form, on_success, on_error);
        Ok(())
    }

    /// [`Dispatcher::fetch_image`] on the loaded dispatcher.
    pub fn fetch_image<S, E>(
        url: impl Into<String>,
        max_width: Option<u32>,
        max_height: Option<u32>,
        on_success: S,
        on_error: E,
    ) -> Result<()>
    where
        S: FnOnce(Arc<DynamicImage>) + Send + 'static,
        E: FnOnce(CourierError) + Send + 'static,
    {
        Self::instance()?.fetch_image(url, max_width, max_height, on_success, on_error);
        Ok(())
    }

    /// User agent of the loaded dispatcher, or the built-in default.
    pub fn user_agent() -> String {
        match &*slot() {
            Slot::Loaded(dispatcher) => dispatcher.user_agent().to_string(),
            _ => DEFAULT_USER_AGENT.to_string(),
        }
    }
}
