// Optional end-to-end tests against a real SSH server.
// Enable with SSHFERRY_RUN_SSH_TESTS=1 plus:
//   SSHFERRY_TEST_HOST, SSHFERRY_TEST_PORT (default 22), SSHFERRY_TEST_USER,
//   SSHFERRY_TEST_KEY (private key path), SSHFERRY_TEST_ROOT (remote sandbox dir)
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use sshferry::engine::parallel::{ParallelConfig, ParallelSftpEngine, Preset};
use sshferry::engine::{SftpEngine, plan_transfer};
use sshferry::site::{AuthMethod, SiteConfig};

fn test_site() -> Option<SiteConfig> {
    if std::env::var("SSHFERRY_RUN_SSH_TESTS").unwrap_or_default() != "1" {
        eprintln!("Skipping ssh e2e test (set SSHFERRY_RUN_SSH_TESTS=1 to enable)");
        return None;
    }
    let host = std::env::var("SSHFERRY_TEST_HOST").expect("SSHFERRY_TEST_HOST required");
    let user = std::env::var("SSHFERRY_TEST_USER").expect("SSHFERRY_TEST_USER required");
    let key = std::env::var("SSHFERRY_TEST_KEY").expect("SSHFERRY_TEST_KEY required");
    let root = std::env::var("SSHFERRY_TEST_ROOT").expect("SSHFERRY_TEST_ROOT required");
    let port = std::env::var("SSHFERRY_TEST_PORT").ok().and_then(|p| p.parse().ok()).unwrap_or(22);

    let mut site = SiteConfig::new("e2e", host, user);
    site.port = port;
    site.auth_method = AuthMethod::Key;
    site.key_path = Some(key);
    site.remote_root = root;
    Some(site)
}

fn local_file_with(tag: &str, data: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sshferry-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(tag);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(data).unwrap();
    path
}

fn pseudo_random_bytes(len: usize) -> Vec<u8> {
    // xorshift; deterministic content is fine, byte variety is what matters
    let mut state = 0x243F6A8885A308D3u64;
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

#[test]
fn upload_then_download_round_trips_bytes() {
    let Some(site) = test_site() else { return };
    let data = pseudo_random_bytes(300 * 1024);
    let local = local_file_with("roundtrip.bin", &data);
    let remote = format!("{}/sshferry_e2e_roundtrip.bin", site.remote_root.trim_end_matches('/'));

    let mut engine = SftpEngine::new(site);
    engine.connect().unwrap();
    engine.upload_file(&local, &remote, None, None, 0).unwrap();

    let back = local.with_extension("back");
    engine.download_file(&remote, &back, None, None, 0).unwrap();
    assert_eq!(std::fs::read(&back).unwrap(), data);

    engine.remove_file(&remote).unwrap();
}

#[test]
fn resume_upload_transfers_only_the_tail() {
    let Some(site) = test_site() else { return };
    let data = pseudo_random_bytes(10_000);
    let local = local_file_with("resume.bin", &data);
    let remote = format!("{}/sshferry_e2e_resume.bin", site.remote_root.trim_end_matches('/'));

    let mut engine = SftpEngine::new(site);
    engine.connect().unwrap();

    // seed the remote with the first 6_000 bytes
    let head = local_file_with("resume-head.bin", &data[..6_000]);
    engine.upload_file(&head, &remote, None, None, 0).unwrap();
    assert_eq!(engine.stat(&remote).unwrap().size, 6_000);

    // pre-check picks resume at 6_000, upload appends exactly 4_000 bytes
    let existing = engine.stat(&remote).ok().map(|e| e.size);
    match plan_transfer(10_000, existing) {
        sshferry::engine::TransferPlan::Resume(offset) => {
            assert_eq!(offset, 6_000);
            engine.upload_file(&local, &remote, None, None, offset).unwrap();
        }
        other => panic!("expected resume, got {:?}", other),
    }
    assert_eq!(engine.stat(&remote).unwrap().size, 10_000);

    let back = local.with_extension("back");
    engine.download_file(&remote, &back, None, None, 0).unwrap();
    assert_eq!(std::fs::read(&back).unwrap(), data);

    engine.remove_file(&remote).unwrap();
}

#[test]
fn parallel_upload_is_byte_for_byte_correct() {
    let Some(site) = test_site() else { return };
    let data = pseudo_random_bytes(5 * 1024 * 1024);
    let local = local_file_with("parallel.bin", &data);
    let remote = format!("{}/sshferry_e2e_parallel.bin", site.remote_root.trim_end_matches('/'));

    let mut config = ParallelConfig::from_preset(Preset::Low);
    config.workers = 2;
    config.chunk_size = 1024 * 1024;
    config.warmup_delay = Duration::ZERO;
    let engine = ParallelSftpEngine::with_config(site.clone(), Preset::Low, config);
    engine.upload_file(&local, &remote, None, None).unwrap();

    let mut single = SftpEngine::new(site);
    single.connect().unwrap();
    assert_eq!(single.stat(&remote).unwrap().size, data.len() as u64);
    let back = local.with_extension("back");
    single.download_file(&remote, &back, None, None, 0).unwrap();
    assert_eq!(std::fs::read(&back).unwrap(), data);

    single.remove_file(&remote).unwrap();
}

#[test]
fn recursive_delete_clears_subtree() {
    let Some(site) = test_site() else { return };
    let root = site.remote_root.trim_end_matches('/').to_string();
    let dir = format!("{}/sshferry_e2e_tree", root);
    let nested = format!("{}/nested", dir);

    let mut engine = SftpEngine::new(site);
    engine.connect().unwrap();
    let _ = engine.mkdir(&dir);
    let _ = engine.mkdir(&nested);
    let payload = local_file_with("tree.bin", b"payload");
    engine.upload_file(&payload, &format!("{}/f.bin", nested), None, None, 0).unwrap();

    engine.remove_dir_recursive(&dir).unwrap();
    assert!(!engine.check_path_readable(&dir));
}
