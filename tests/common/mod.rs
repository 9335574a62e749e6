//! Shared fixtures: an in-process HTTP range server with fault injection
//! and a small ZIP writer.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Compression;
use flate2::write::DeflateEncoder;
use otaslice::RetryPolicy;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Retry policy with the default attempt budget but no real waiting.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        delay: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        ..RetryPolicy::default()
    }
}

/// Deterministic, non-repeating-looking test bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 7) ^ (i >> 13)) as u8)
        .collect()
}

struct ServerState {
    data: Vec<u8>,
    accept_ranges: bool,
    range_requests: AtomicUsize,
    fail_next: AtomicUsize,
    truncate_next: AtomicUsize,
    fail_from: AtomicU64,
    delays: Mutex<HashMap<u64, Duration>>,
}

impl ServerState {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub struct RangeServer {
    pub url: String,
    state: Arc<ServerState>,
    handle: JoinHandle<()>,
}

impl RangeServer {
    pub async fn start(data: Vec<u8>) -> Self {
        Self::spawn(data, true).await
    }

    /// Server that answers HEAD without `Accept-Ranges: bytes`.
    pub async fn without_ranges(data: Vec<u8>) -> Self {
        Self::spawn(data, false).await
    }

    async fn spawn(data: Vec<u8>, accept_ranges: bool) -> Self {
        let state = Arc::new(ServerState {
            data,
            accept_ranges,
            range_requests: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            truncate_next: AtomicUsize::new(0),
            fail_from: AtomicU64::new(u64::MAX),
            delays: Mutex::new(HashMap::new()),
        });

        let app = Router::new()
            .route("/ota.zip", get(serve_range).head(serve_head))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/ota.zip"),
            state,
            handle,
        }
    }

    /// Ranged GETs received so far.
    pub fn range_requests(&self) -> usize {
        self.state.range_requests.load(Ordering::SeqCst)
    }

    /// Answer the next `n` ranged GETs with 500.
    pub fn fail_next(&self, n: usize) {
        self.state.fail_next.store(n, Ordering::SeqCst);
    }

    /// Send only half the requested bytes for the next `n` ranged GETs.
    pub fn truncate_next(&self, n: usize) {
        self.state.truncate_next.store(n, Ordering::SeqCst);
    }

    /// Answer every ranged GET starting at or after `offset` with 500.
    pub fn fail_from(&self, offset: u64) {
        self.state.fail_from.store(offset, Ordering::SeqCst);
    }

    /// Hold back the response for the range starting at `offset`.
    pub fn delay_window(&self, offset: u64, delay: Duration) {
        self.state.delays.lock().unwrap().insert(offset, delay);
    }
}

impl Drop for RangeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn parse_range(value: &str) -> Option<(u64, u64)> {
    let (start, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

async fn serve_head(State(state): State<Arc<ServerState>>) -> Response {
    let mut resp = Response::new(Body::empty());
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(state.data.len()));
    if state.accept_ranges {
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    resp
}

async fn serve_range(State(state): State<Arc<ServerState>>, headers: HeaderMap) -> Response {
    let Some((start, end)) = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range)
    else {
        return (StatusCode::OK, state.data.clone()).into_response();
    };
    state.range_requests.fetch_add(1, Ordering::SeqCst);

    let delay = state.delays.lock().unwrap().get(&start).copied();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    if ServerState::take(&state.fail_next) || start >= state.fail_from.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let len = state.data.len() as u64;
    if start >= len || end < start {
        return StatusCode::RANGE_NOT_SATISFIABLE.into_response();
    }
    let end = end.min(len - 1);
    let mut body = state.data[start as usize..=end as usize].to_vec();
    if ServerState::take(&state.truncate_next) {
        body.truncate(body.len() / 2);
    }

    (
        StatusCode::PARTIAL_CONTENT,
        [(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))],
        body,
    )
        .into_response()
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Stored,
    Deflate,
}

/// Minimal ZIP writer for fixtures.
#[derive(Default)]
pub struct ZipBuilder {
    entries: Vec<FixtureEntry>,
}

struct FixtureEntry {
    name: String,
    data: Vec<u8>,
    method: Method,
    crc: Option<u32>,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, data: &[u8], method: Method, crc: Option<u32>) -> Self {
        self.entries.push(FixtureEntry {
            name: name.to_string(),
            data: data.to_vec(),
            method,
            crc,
        });
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, Method::Stored, None)
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> Self {
        self.push(name, data, Method::Deflate, None)
    }

    /// Stored entry whose recorded CRC-32 does not match its data.
    pub fn stored_corrupt(self, name: &str, data: &[u8]) -> Self {
        let crc = crc32fast::hash(data) ^ 0x0000_0100;
        self.push(name, data, Method::Stored, Some(crc))
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for FixtureEntry {
            name,
            data,
            method,
            crc,
        } in &self.entries
        {
            let crc = crc.unwrap_or_else(|| crc32fast::hash(data));
            let (code, body) = match method {
                Method::Stored => (0u16, data.clone()),
                Method::Deflate => {
                    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
                    encoder.write_all(data).unwrap();
                    (8u16, encoder.finish().unwrap())
                }
            };
            let offset = out.len() as u32;

            out.write_u32::<LittleEndian>(0x0403_4b50).unwrap();
            out.write_u16::<LittleEndian>(20).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(code).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.write_u16::<LittleEndian>(0x21).unwrap();
            out.write_u32::<LittleEndian>(crc).unwrap();
            out.write_u32::<LittleEndian>(body.len() as u32).unwrap();
            out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
            out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
            out.write_u16::<LittleEndian>(0).unwrap();
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(&body);

            central.write_u32::<LittleEndian>(0x0201_4b50).unwrap();
            central.write_u16::<LittleEndian>(20).unwrap();
            central.write_u16::<LittleEndian>(20).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(code).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0x21).unwrap();
            central.write_u32::<LittleEndian>(crc).unwrap();
            central.write_u32::<LittleEndian>(body.len() as u32).unwrap();
            central.write_u32::<LittleEndian>(data.len() as u32).unwrap();
            central.write_u16::<LittleEndian>(name.len() as u16).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u16::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(0).unwrap();
            central.write_u32::<LittleEndian>(offset).unwrap();
            central.extend_from_slice(name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        out.extend_from_slice(&central);

        out.write_u32::<LittleEndian>(0x0605_4b50).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.write_u16::<LittleEndian>(self.entries.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(self.entries.len() as u16).unwrap();
        out.write_u32::<LittleEndian>(central.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(cd_offset).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out
    }
}

/// Version 2 update payload with an opaque manifest and signature.
pub fn payload(manifest_len: usize, tail: &[u8]) -> Vec<u8> {
    let mut out = b"CrAU".to_vec();
    out.write_u64::<byteorder::BigEndian>(2).unwrap();
    out.write_u64::<byteorder::BigEndian>(manifest_len as u64).unwrap();
    out.write_u32::<byteorder::BigEndian>(16).unwrap();
    out.extend(std::iter::repeat_n(0xAB, manifest_len + 16));
    out.extend_from_slice(tail);
    out
}
