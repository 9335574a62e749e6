mod common;

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use common::{RangeServer, ZipBuilder, fast_policy, pattern};
use otaslice::io::ProgressFn;
use otaslice::{ChunkedFetcher, Error, ErrorKind, RemoteFile, ZipArchive};

const CHUNK: u64 = 64 * 1024;

async fn open_archive(server: &RangeServer) -> ZipArchive<RemoteFile> {
    let file = RemoteFile::open(server.url.as_str(), fast_policy())
        .await
        .unwrap();
    ZipArchive::open(file).await.unwrap()
}

#[tokio::test]
async fn test_out_of_order_chunks_are_reassembled() {
    let image = pattern(5 * CHUNK as usize + 123);
    let zip = ZipBuilder::new()
        .stored("META-INF/com/android/metadata", b"ota-type=AB\n")
        .stored("IMAGES/boot.img", &image)
        .build();
    let server = RangeServer::start(zip).await;
    let mut archive = open_archive(&server).await;

    let entry = archive.find(|e| e.name == "IMAGES/boot.img").unwrap();
    let data_offset = archive.data_offset(&entry).await.unwrap();
    // First window finishes last.
    server.delay_window(data_offset, Duration::from_millis(300));

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("boot.img");
    let reported = Arc::new(AtomicU64::new(0));
    let progress: ProgressFn = {
        let reported = reported.clone();
        Arc::new(move |done: u64, _total: u64| reported.store(done, Ordering::SeqCst))
    };

    let fetcher = ChunkedFetcher::new(4).with_chunk_size(CHUNK);
    let source = archive.source().source().unwrap();
    let written = fetcher
        .fetch_entry(source, &entry, data_offset, &dest, Some(progress))
        .await
        .unwrap();

    assert_eq!(written, image.len() as u64);
    assert!(std::fs::read(&dest).unwrap() == image);
    assert_eq!(reported.load(Ordering::SeqCst), image.len() as u64);
}

#[tokio::test]
async fn test_retried_windows_keep_output_and_progress_exact() {
    let image = pattern(6 * CHUNK as usize + 999);
    let zip = ZipBuilder::new().stored("IMAGES/vendor_boot.img", &image).build();
    let server = RangeServer::start(zip).await;
    let mut archive = open_archive(&server).await;

    let entry = archive.find(|e| e.name == "IMAGES/vendor_boot.img").unwrap();
    let data_offset = archive.data_offset(&entry).await.unwrap();
    let before = server.range_requests();
    server.fail_next(2);

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("vendor_boot.img");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let progress: ProgressFn = {
        let seen = seen.clone();
        Arc::new(move |done: u64, _total: u64| seen.lock().unwrap().push(done))
    };

    let fetcher = ChunkedFetcher::new(4).with_chunk_size(CHUNK);
    let source = archive.source().source().unwrap();
    let written = fetcher
        .fetch_entry(source, &entry, data_offset, &dest, Some(progress))
        .await
        .unwrap();

    assert_eq!(written, entry.size);
    assert!(std::fs::read(&dest).unwrap() == image);
    // 7 windows plus the 2 failed attempts.
    assert_eq!(server.range_requests() - before, 9);

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 7);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(seen.last().copied(), Some(entry.size));
}

#[tokio::test]
async fn test_failed_window_removes_output() {
    let image = pattern(4 * CHUNK as usize);
    let zip = ZipBuilder::new().stored("boot.img", &image).build();
    let server = RangeServer::start(zip).await;
    let mut archive = open_archive(&server).await;

    let entry = archive.find(|e| e.name == "boot.img").unwrap();
    let data_offset = archive.data_offset(&entry).await.unwrap();
    server.fail_from(data_offset + 2 * CHUNK);

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("out").join("boot.img");
    let fetcher = ChunkedFetcher::new(2).with_chunk_size(CHUNK);
    let source = archive.source().source().unwrap();
    let err = fetcher
        .fetch_entry(source, &entry, data_offset, &dest, None)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Extraction);
    match &err {
        Error::Extraction { entry, window, source } => {
            assert_eq!(entry, "boot.img");
            assert!(window.start >= data_offset + 2 * CHUNK);
            assert_eq!(source.kind(), ErrorKind::Connectivity);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_compressed_entry_streams_sequentially() {
    let image = pattern(3 * CHUNK as usize);
    let zip = ZipBuilder::new().deflated("boot.img", &image).build();
    let server = RangeServer::start(zip).await;
    let mut archive = open_archive(&server).await;

    let entry = archive.find(|e| e.name == "boot.img").unwrap();
    assert!(!entry.is_stored());
    let data_offset = archive.data_offset(&entry).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("boot.img");
    let fetcher = ChunkedFetcher::new(4).with_chunk_size(CHUNK);
    let source = archive.source().source().unwrap();
    let written = fetcher
        .fetch_entry(source, &entry, data_offset, &dest, None)
        .await
        .unwrap();

    assert_eq!(written, image.len() as u64);
    assert!(std::fs::read(&dest).unwrap() == image);
}

#[tokio::test]
async fn test_empty_stored_entry() {
    let zip = ZipBuilder::new().stored("empty.img", b"").build();
    let server = RangeServer::start(zip).await;
    let mut archive = open_archive(&server).await;

    let entry = archive.find(|e| e.name == "empty.img").unwrap();
    let data_offset = archive.data_offset(&entry).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("empty.img");

    let source = archive.source().source().unwrap();
    let written = ChunkedFetcher::default()
        .fetch_entry(source, &entry, data_offset, &dest, None)
        .await
        .unwrap();
    assert_eq!(written, 0);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 0);
}
