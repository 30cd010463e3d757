//! Loading the process-wide dispatcher.
//!
//! One test only: the dispatcher is process-global and every test in this
//! binary would share it.

use std::sync::{Arc, Barrier, mpsc};
use std::time::Duration;

use courier::{Courier, LoadState, Method, Resource};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn concurrent_first_loads_converge_on_one_instance() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(Courier::state(), LoadState::Unloaded);

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let barrier = barrier.clone();
            let cache_dir = dir.path().to_path_buf();
            std::thread::spawn(move || {
                barrier.wait();
                Courier::builder()
                    .app_name(format!("Racer{i}"))
                    .cache_dir(cache_dir)
                    .worker_threads(1)
                    .load()
                    .unwrap()
            })
        })
        .collect();
    let loaded: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for dispatcher in &loaded[1..] {
        assert!(Arc::ptr_eq(&loaded[0], dispatcher));
    }
    assert_eq!(Courier::state(), LoadState::Loaded);
    assert!(Arc::ptr_eq(&Courier::instance().unwrap(), &loaded[0]));

    let user_agent = Courier::user_agent();
    assert!(user_agent.starts_with("Racer"), "{user_agent}");
    assert_eq!(user_agent, loaded[0].user_agent());

    // later loads ignore their configuration
    let again = Courier::builder().app_name("Latecomer").load().unwrap();
    assert!(Arc::ptr_eq(&again, &loaded[0]));
    assert_eq!(Courier::user_agent(), user_agent);
    assert!(Arc::ptr_eq(&Courier::load().unwrap(), &loaded[0]));

    // and the loaded instance serves requests
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let _guard = runtime.enter();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_string("up"))
            .mount(&server)
            .await;
        server
    });
    let resource = Resource::text(format!("{}/status", server.uri()));
    let (tx, rx) = mpsc::channel();
    let tx_err = tx.clone();
    Courier::fire(
        Method::GET,
        &resource,
        None,
        move |body| tx.send(Ok(body)).unwrap(),
        move |e| tx_err.send(Err(e)).unwrap(),
    )
    .unwrap();
    let body = rx.recv_timeout(Duration::from_secs(10)).unwrap().unwrap();
    assert_eq!(body, "up");
}
