//! Multipart uploads as seen by the server.

use std::sync::mpsc;
use std::time::Duration;

use courier::cache::{CacheKey, ResponseStore};
use courier::{CourierBuilder, FireRequest, Method, MultipartForm, Params, Resource, TextParser};
use wiremock::matchers::{header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Split a multipart body into `(headers, content)` per part.
fn parts(body: &[u8], boundary: &str) -> Vec<(String, Vec<u8>)> {
    let delimiter = format!("--{boundary}");
    let text = body.to_vec();
    let mut out = Vec::new();
    let mut rest = &text[..];
    while let Some(start) = find(rest, delimiter.as_bytes()) {
        rest = &rest[start + delimiter.len()..];
        if rest.starts_with(b"--") {
            break;
        }
        rest = &rest[2..]; // CRLF after the delimiter
        let headers_end = find(rest, b"\r\n\r\n").unwrap();
        let headers = String::from_utf8(rest[..headers_end].to_vec()).unwrap();
        let content_start = headers_end + 4;
        let next = find(&rest[content_start..], delimiter.as_bytes()).unwrap();
        // drop the CRLF that precedes the next delimiter
        let content = rest[content_start..content_start + next - 2].to_vec();
        out.push((headers, content));
        rest = &rest[content_start + next..];
    }
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upload_carries_file_and_string_parts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/42/avatar"))
        .and(header_regex("content-type", "^multipart/form-data; boundary=.+$"))
        .respond_with(ResponseTemplate::new(201).set_body_string("stored"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("me.png");
    let file_bytes: Vec<u8> = (0..=255u8).collect();
    std::fs::write(&file, &file_bytes).unwrap();

    let dispatcher = CourierBuilder::new()
        .cache_dir(dir.path().join("cache"))
        .worker_threads(1)
        .build()
        .unwrap();
    let resource = Resource::text(server.uri()).skeleton_path("/users/{{ id }}/avatar");
    let form = MultipartForm::from_parts(
        [("avatar", (file.clone(), "image/png"))],
        Some(&Params::from([("name", "x")])),
    );

    let (tx, rx) = mpsc::channel();
    let tx_err = tx.clone();
    dispatcher.fire_multipart(
        Method::POST,
        &resource,
        Some(&Params::from([("id", "42")])),
        form,
        move |body| tx.send(Ok(body)).unwrap(),
        move |e| tx_err.send(Err(e)).unwrap(),
    );
    let reply = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(10)))
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(reply, "stored");

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    let content_type = request.headers.get("content-type").unwrap().to_str().unwrap();
    let boundary = content_type.split("boundary=").nth(1).unwrap();
    let parts = parts(&request.body, boundary);

    let avatars: Vec<_> = parts
        .iter()
        .filter(|(headers, _)| headers.contains("name=\"avatar\""))
        .collect();
    assert_eq!(avatars.len(), 1);
    assert!(avatars[0].0.contains("filename=\"me.png\""));
    assert!(avatars[0].0.contains("Content-Type: image/png"));
    assert_eq!(avatars[0].1, file_bytes);

    let names: Vec<_> = parts
        .iter()
        .filter(|(headers, _)| headers.contains("name=\"name\""))
        .collect();
    assert_eq!(names.len(), 1);
    assert_eq!(names[0].1, b"x");
}

#[tokio::test]
async fn multipart_requests_are_never_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("ok")
                .insert_header("cache-control", "max-age=600"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dispatcher = CourierBuilder::new()
        .cache_dir(dir.path())
        .worker_threads(1)
        .build()
        .unwrap();
    let url = format!("{}/upload", server.uri());
    for _ in 0..2 {
        let body = MultipartForm::new()
            .file_bytes("doc", "a.txt", "text/plain", &b"hello"[..])
            .build()
            .unwrap();
        let request = FireRequest::multipart(Method::POST, url.clone(), body);
        let text = dispatcher
            .fetch(request, &TextParser::new())
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }
    let key = CacheKey::new(Method::POST, url);
    assert!(dispatcher.response_store().get(&key).unwrap().is_none());
}
