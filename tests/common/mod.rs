//! Common test utilities for shua end-to-end tests

#![allow(dead_code)]

use shua::{Config, Event};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Deterministic, distinguishable body for segment `index`
pub fn segment_body(index: usize) -> Vec<u8> {
    format!("segment {index:03}|").repeat(64).into_bytes()
}

/// Concatenated bodies of the given segments
pub fn expected_bytes(indices: &[usize]) -> Vec<u8> {
    indices.iter().flat_map(|&i| segment_body(i)).collect()
}

/// Serve `/seg/<i>.ts` for every index, finishing in reverse order
///
/// Earlier segments get longer delays so completion order differs from
/// list order. Returns the segment URLs in list order.
pub async fn mount_segments(server: &MockServer, count: usize) -> Vec<String> {
    for i in 0..count {
        let delay = Duration::from_millis(((count - i) * 15) as u64);
        Mock::given(method("GET"))
            .and(path(format!("/seg/{i}.ts")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(segment_body(i))
                    .set_delay(delay),
            )
            .mount(server)
            .await;
    }
    segment_urls(server, count)
}

pub fn segment_urls(server: &MockServer, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("{}/seg/{i}.ts", server.uri()))
        .collect()
}

/// Make one segment fail with `status` on every request
pub async fn mount_failing(server: &MockServer, index: usize, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/seg/{index}.ts")))
        .respond_with(ResponseTemplate::new(status))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Config writing chunks into `<dir>/chunks`
pub fn e2e_config(dir: &Path) -> Config {
    Config {
        threads: 3,
        retries: 1,
        timeout: Duration::from_secs(5),
        output: dir.join("chunks"),
        ..Config::default()
    }
}

/// Drain everything currently buffered in an event receiver
pub fn drain_events(events: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}
