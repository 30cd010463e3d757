//! Behaviour of the process-wide dispatcher before `load`.
//!
//! Nothing in this binary loads the dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use courier::identity::DEFAULT_USER_AGENT;
use courier::{Courier, CourierError, LoadState, Method, MultipartForm, Resource};

#[test]
fn state_starts_unloaded() {
    assert_eq!(Courier::state(), LoadState::Unloaded);
    assert!(!Courier::is_loaded());
    assert_eq!(Courier::instance().unwrap_err(), CourierError::NotLoaded);
}

#[test]
fn fire_before_load_fails_without_callbacks() {
    let called = Arc::new(AtomicBool::new(false));
    let (ok, err) = (called.clone(), called.clone());
    let resource = Resource::text("http://127.0.0.1:1/status");

    let outcome = Courier::fire(
        Method::GET,
        &resource,
        None,
        move |_| ok.store(true, Ordering::SeqCst),
        move |_| err.store(true, Ordering::SeqCst),
    );

    assert_eq!(outcome.unwrap_err(), CourierError::NotLoaded);
    assert!(!called.load(Ordering::SeqCst));
}

#[test]
fn multipart_and_images_before_load_fail() {
    let resource = Resource::text("http://127.0.0.1:1/upload");
    let form = MultipartForm::new().text("name", "x");
    let err = Courier::fire_multipart(Method::POST, &resource, None, form, |_| {}, |_| {});
    assert_eq!(err.unwrap_err(), CourierError::NotLoaded);

    let err = Courier::fetch_image("http://127.0.0.1:1/a.png", None, None, |_| {}, |_| {});
    assert_eq!(err.unwrap_err(), CourierError::NotLoaded);
}

#[test]
fn user_agent_falls_back_to_default() {
    assert_eq!(Courier::user_agent(), DEFAULT_USER_AGENT);
}

#[test]
fn not_loaded_is_its_own_kind() {
    assert_eq!(CourierError::NotLoaded.kind(), courier::ErrorKind::NotLoaded);
}
