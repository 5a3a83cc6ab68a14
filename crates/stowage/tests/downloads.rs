//! Download batch, resume and sizing tests.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stowage::net::{RangeSpec, Url};
use stowage::*;
use stowage_test_utils::{ContentFixture, MockTransport, RecordingHost};

// ============================================================================
// Helper Functions
// ============================================================================

fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn engine_with(fixture: &ContentFixture, config: EngineConfig) -> (Engine, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let engine = fixture.engine(config, transport.clone(), Arc::new(RecordingHost::new()));
    (engine, transport)
}

fn remote_info(fixture: &ContentFixture, name: &str, len: usize) -> (DownloadInfo, String) {
    let url = ContentFixture::remote_url(name);
    let info = DownloadInfo::new(Url::parse(&url).unwrap(), fixture.downloads.join(name))
        .with_size(len as u64)
        .with_hash("c0ffee");
    (info, url)
}

fn run_single(engine: &mut Engine, info: DownloadInfo) -> OperationOutcome {
    let batch = engine.download(vec![info]);
    engine.block_on(batch.completion()).unwrap()
}

// ============================================================================
// Batches
// ============================================================================

#[test]
fn test_partial_failure_retries_only_failed_subset() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());

    let mut infos = Vec::new();
    let mut urls = Vec::new();
    for i in 0..5 {
        let (info, url) = remote_info(&fixture, &format!("pack{i}_c0ffee"), 300 + i * 10);
        transport.insert(url.clone(), body(300 + i * 10));
        infos.push(info);
        urls.push(url);
    }
    transport.fail(urls[1].clone(), 1);
    transport.fail(urls[3].clone(), 1);

    let batch = engine.download(infos);
    let outcome = engine.block_on(batch.completion()).unwrap();
    assert_eq!(outcome.status, OperationStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("2 of 5 downloads failed"));
    assert_eq!(batch.get().succeeded().len(), 3);
    assert_eq!(batch.get().failed().len(), 2);
    assert_eq!(batch.progress(), 1.0);

    let retry = engine.retry_download(&batch);
    let outcome = engine.block_on(retry.completion()).unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(retry.get().succeeded().len(), 5);
    assert!(retry.get().failed().is_empty());
    assert_eq!(retry.get().total_bytes(), batch.get().total_bytes());

    for (i, url) in urls.iter().enumerate() {
        let expected = if i == 1 || i == 3 { 2 } else { 1 };
        assert_eq!(transport.fetch_count(url), expected, "{url}");
        let path = fixture.downloads.join(format!("pack{i}_c0ffee"));
        assert_eq!(fs::read(path).unwrap(), body(300 + i * 10));
    }
}

#[test]
fn test_batch_with_concurrency_limit_completes() {
    let fixture = ContentFixture::new();
    let config = fixture.config().with_max_concurrent_downloads(2);
    let (mut engine, transport) = engine_with(&fixture, config);

    let infos: Vec<_> = (0..6)
        .map(|i| {
            let (info, url) = remote_info(&fixture, &format!("chunk{i}"), 64);
            transport.insert(url, body(64));
            info
        })
        .collect();

    let batch = engine.download(infos);
    let outcome = engine.block_on(batch.completion()).unwrap();
    assert!(outcome.is_success());
    assert_eq!(transport.remote_requests().len(), 6);
    assert_eq!(batch.get().downloaded_bytes(), 6 * 64);
}

#[test]
fn test_empty_batch_succeeds() {
    let fixture = ContentFixture::new();
    let (mut engine, _) = engine_with(&fixture, fixture.config());

    let batch = engine.download(Vec::new());
    let outcome = engine.block_on(batch.completion()).unwrap();
    assert!(outcome.is_success());
    assert_eq!(batch.progress(), 1.0);
}

#[test]
fn test_batch_progress_is_monotonic() {
    let fixture = ContentFixture::new();
    let config = fixture.config().with_max_concurrent_downloads(1);
    let (mut engine, transport) = engine_with(&fixture, config);

    let infos: Vec<_> = (0..8)
        .map(|i| {
            let (info, url) = remote_info(&fixture, &format!("part{i}"), 1_000 + i * 100);
            transport.insert(url, body(1_000 + i * 100));
            info
        })
        .collect();
    let batch = engine.download(infos);

    let mut samples = vec![batch.progress()];
    for _ in 0..5_000 {
        if batch.is_done() {
            break;
        }
        engine.tick();
        samples.push(batch.progress());
        thread::sleep(Duration::from_millis(1));
    }
    assert!(batch.is_done());
    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{samples:?}");
    assert_eq!(*samples.last().unwrap(), 1.0);
}

// ============================================================================
// Resume
// ============================================================================

#[test]
fn test_hash_named_download_resumes_from_local_length() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());

    let full = body(5_000);
    let (info, url) = remote_info(&fixture, "level_c0ffee", 5_000);
    transport.insert(url.clone(), full.clone());
    fs::write(&info.path, &full[..1_000]).unwrap();
    let path = info.path.clone();

    let outcome = run_single(&mut engine, info);
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let requests = transport.requests_for(&url);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].range, Some(RangeSpec::from_start(1_000)));
    assert_eq!(requests[0].bytes, 4_000);
    assert_eq!(fs::read(path).unwrap(), full);
}

#[test]
fn test_raw_file_download_restarts_from_zero() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());

    let full = body(5_000);
    let (info, url) = remote_info(&fixture, "config.json", 5_000);
    let info = info.raw(true);
    transport.insert(url.clone(), full.clone());
    fs::write(&info.path, &full[..1_000]).unwrap();
    let path = info.path.clone();

    let outcome = run_single(&mut engine, info);
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let requests = transport.requests_for(&url);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].range, None);
    assert_eq!(requests[0].bytes, 5_000);
    assert_eq!(fs::read(path).unwrap(), full);
}

#[test]
fn test_ignored_range_falls_back_to_full_transfer() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());
    transport.ignore_ranges(true);

    let full = body(5_000);
    let (info, url) = remote_info(&fixture, "music_c0ffee", 5_000);
    transport.insert(url.clone(), full.clone());
    fs::write(&info.path, &full[..1_000]).unwrap();
    let path = info.path.clone();

    let outcome = run_single(&mut engine, info);
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let requests = transport.requests_for(&url);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].range, None);
    assert_eq!(requests[1].bytes, 5_000);
    assert_eq!(fs::read(path).unwrap(), full);
}

#[test]
fn test_complete_file_is_not_fetched_again() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());

    let full = body(2_048);
    let (info, url) = remote_info(&fixture, "done_c0ffee", 2_048);
    transport.insert(url.clone(), full.clone());
    fs::write(&info.path, &full).unwrap();

    let outcome = run_single(&mut engine, info);
    assert!(outcome.is_success());
    assert_eq!(transport.fetch_count(&url), 0);
}

#[test]
fn test_oversized_partial_is_discarded() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());

    let full = body(1_000);
    let (info, url) = remote_info(&fixture, "stale_c0ffee", 1_000);
    transport.insert(url.clone(), full.clone());
    fs::write(&info.path, body(1_500)).unwrap();
    let path = info.path.clone();

    let outcome = run_single(&mut engine, info);
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(transport.requests_for(&url)[0].range, None);
    assert_eq!(fs::read(path).unwrap(), full);
}

#[test]
fn test_short_body_is_a_size_mismatch() {
    let fixture = ContentFixture::new();
    let (mut engine, transport) = engine_with(&fixture, fixture.config());

    let (info, url) = remote_info(&fixture, "short_c0ffee", 1_000);
    transport.insert(url, body(600));

    let outcome = run_single(&mut engine, info);
    assert_eq!(outcome.status, OperationStatus::Failed);
    assert!(outcome.error.unwrap().contains("size mismatch"));
}

// ============================================================================
// Sizing and unpacking
// ============================================================================

struct Catalogued {
    fixture: ContentFixture,
    engine: Engine,
    transport: Arc<MockTransport>,
    remote: BundleInfo,
    remote_bytes: Vec<u8>,
}

fn catalogued() -> Catalogued {
    let fixture = ContentFixture::new();
    let config = fixture.config();
    let (local, local_bytes) = ContentFixture::bundle("local", "1111aaaa", b"local archive", &config);
    let (remote, remote_bytes) = ContentFixture::bundle("remote", "2222bbbb", &body(3_000), &config);
    let (extra, extra_bytes) = ContentFixture::bundle("extra", "3333cccc", &body(500), &config);
    fixture.install_build_in(
        10,
        &[
            (local.build_in(), local_bytes),
            (remote.clone(), remote_bytes.clone()),
            (extra.clone(), extra_bytes.clone()),
        ],
    );

    let (mut engine, transport) = engine_with(&fixture, config);
    transport.insert(ContentFixture::remote_url(&remote.save_name()), remote_bytes.clone());
    transport.insert(ContentFixture::remote_url(&extra.save_name()), extra_bytes);

    let init = engine.init_manifest();
    assert!(engine.block_on(init.completion()).unwrap().is_success());
    Catalogued {
        fixture,
        engine,
        transport,
        remote,
        remote_bytes,
    }
}

#[test]
fn test_download_size_subtracts_resumable_bytes() {
    let catalogued = catalogued();
    let Catalogued {
        fixture,
        mut engine,
        transport,
        remote,
        remote_bytes,
    } = catalogued;

    let partial: PathBuf = fixture.downloads.join(remote.save_name());
    fs::write(&partial, &remote_bytes[..100]).unwrap();

    let size = engine.download_size(Some(vec!["remote".to_string(), "local".to_string()]));
    assert!(engine.block_on(size.completion()).unwrap().is_success());
    assert_eq!(size.get().download_size(), remote.size - 100);
    assert_eq!(size.get().infos().len(), 1);

    let batch = size.get().into_download();
    let batch = engine.submit(batch);
    assert!(engine.block_on(batch.completion()).unwrap().is_success());
    assert_eq!(fs::read(&partial).unwrap(), remote_bytes);
    assert!(matches!(
        engine.locate("remote").unwrap(),
        BundleLocation::Downloaded(_)
    ));

    let url = ContentFixture::remote_url(&remote.save_name());
    assert_eq!(transport.requests_for(&url)[0].range, Some(RangeSpec::from_start(100)));
}

#[test]
fn test_download_size_of_whole_catalog() {
    let catalogued = catalogued();
    let Catalogued { mut engine, .. } = catalogued;

    let size = engine.download_size(None);
    assert!(engine.block_on(size.completion()).unwrap().is_success());
    let names: Vec<_> = size
        .get()
        .infos()
        .iter()
        .filter_map(|info| info.bundle.clone())
        .collect();
    assert_eq!(names, vec!["extra".to_string(), "remote".to_string()]);
}

#[test]
fn test_download_size_rejects_unknown_bundle() {
    let catalogued = catalogued();
    let Catalogued { mut engine, .. } = catalogued;

    let size = engine.download_size(Some(vec!["nope".to_string()]));
    let outcome = engine.block_on(size.completion()).unwrap();
    assert_eq!(outcome.status, OperationStatus::Failed);
    assert!(outcome.error.unwrap().contains("nope"));
}

#[test]
fn test_unpack_copies_encrypted_build_in_archives() {
    let fixture = ContentFixture::new();
    let config = fixture.config().with_encryption(true);
    let (art, art_bytes) = ContentFixture::bundle("art", "89abcdef01234567", b"encrypted art", &config);
    let art = art.build_in().with_assets(["art/tree.png"]);
    assert_ne!(&art_bytes[16..], b"encrypted art");
    fixture.install_build_in(5, &[(art.clone(), art_bytes.clone())]);

    let (mut engine, transport) = engine_with(&fixture, config);
    let init = engine.init_manifest();
    assert!(engine.block_on(init.completion()).unwrap().is_success());

    // Build-in under encryption is not memoized until unpacked.
    assert!(matches!(engine.locate("art").unwrap(), BundleLocation::BuildIn(_)));
    assert!(!engine.resolver().is_cached("art"));

    let unpack = engine.unpack_build_in().unwrap();
    assert!(engine.block_on(unpack.completion()).unwrap().is_success());
    assert!(engine.resolver().is_cached("art"));
    assert_eq!(
        fs::read(fixture.downloads.join(art.save_name())).unwrap(),
        art_bytes
    );
    assert!(transport.remote_requests().is_empty());

    let id = engine.load(LoadableKind::Bundle, "art").unwrap();
    let archive = engine.loadable(id).unwrap().payload().object().unwrap().clone();
    let archive = archive.downcast_ref::<RawArchive>().unwrap();
    assert_eq!(archive.bytes, b"encrypted art");

    let again = engine.unpack_build_in().unwrap();
    assert!(engine.block_on(again.completion()).unwrap().is_success());
    assert!(again.get().succeeded().is_empty());
}
