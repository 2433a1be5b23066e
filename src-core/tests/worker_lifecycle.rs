//! Drives real worker processes: the built-in loopback worker from this
//! package's binary, and small shell scripts that misbehave on purpose.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use local_translate_lib::models::{
    models_for_family, ArtifactSource, DownloadError, DownloadMarker, ManagerOptions, ModelCache,
    ModelFamily, ModelManager, ModelStatus, RemoteBody, RemoteFile,
};
use local_translate_lib::worker::WorkerCommand;
use local_translate_lib::{speech, translation, CommandError};

struct Offline;

impl ArtifactSource for Offline {
    fn list_files<'a>(
        &'a self,
        _repo_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<RemoteFile>, DownloadError>> {
        async { Err(DownloadError::Source("offline".into())) }.boxed()
    }

    fn open<'a>(
        &'a self,
        _repo_id: &'a str,
        _file: &'a RemoteFile,
        _offset: u64,
    ) -> BoxFuture<'a, Result<RemoteBody, DownloadError>> {
        async { Err(DownloadError::Source("offline".into())) }.boxed()
    }
}

fn builtin_worker(family: ModelFamily) -> WorkerCommand {
    WorkerCommand {
        program: PathBuf::from(env!("CARGO_BIN_EXE_local-translate")),
        args: vec!["worker".into(), "--family".into(), family.as_str().into()],
        env: vec![("RUST_LOG".into(), "debug".into())],
    }
}

fn manager_with(
    root: &Path,
    family: ModelFamily,
    command: WorkerCommand,
    request_timeout: Duration,
    recycle: bool,
) -> ModelManager {
    ModelManager::new(ManagerOptions {
        family,
        catalog: models_for_family(family),
        cache: ModelCache::new(root),
        source: Arc::new(Offline),
        worker_command: command,
        request_timeout,
        load_timeout: Duration::from_secs(30),
        shutdown_grace: Duration::from_secs(2),
        recycle_after_request: recycle,
    })
}

fn manager(root: &Path, family: ModelFamily) -> ModelManager {
    manager_with(root, family, builtin_worker(family), Duration::from_secs(30), false)
}

/// Lay out a complete cached model without downloading anything.
fn install(root: &Path, id: &str) {
    let cache = ModelCache::new(root);
    let dir = cache.model_dir(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.json"), "{}").unwrap();
    std::fs::write(dir.join("model.safetensors"), b"weights").unwrap();
    cache
        .write_marker(
            id,
            &DownloadMarker::new("test/repo", vec!["config.json".into(), "model.safetensors".into()]),
        )
        .unwrap();
}

fn process_exists(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn wait_for_status(manager: &ModelManager, id: &str, expected: ModelStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = manager.status(id).unwrap().status;
        if status == expected {
            return;
        }
        assert!(
            Instant::now() < deadline,
            "'{}' stuck in {} waiting for {}",
            id,
            status,
            expected
        );
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn script_worker(dir: &Path, body: &str) -> WorkerCommand {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("worker.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    WorkerCommand {
        program: path,
        args: Vec::new(),
        env: Vec::new(),
    }
}

#[test]
fn load_reaches_ready_and_translates() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let m = manager(dir.path(), ModelFamily::Translation);

    let snapshot = m.load("4b").unwrap();

    assert_eq!(snapshot.status, ModelStatus::Ready);
    assert_eq!(m.current_model_id().as_deref(), Some("4b"));
    let translated = translation::translate(&m, "  Good morning ", "en", "es").unwrap();
    assert_eq!(translated, "Good morning");
}

#[test]
fn loading_a_ready_model_spawns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let m = manager(dir.path(), ModelFamily::Translation);

    m.load("4b").unwrap();
    let pid = m.worker_pid().unwrap();
    let snapshot = m.load("4b").unwrap();

    assert_eq!(snapshot.status, ModelStatus::Ready);
    assert_eq!(m.worker_pid(), Some(pid));
}

#[test]
fn switching_keeps_one_worker_per_family() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    install(dir.path(), "4b-8bit");
    let m = manager(dir.path(), ModelFamily::Translation);

    m.load("4b").unwrap();
    let first = m.worker_pid().unwrap();
    m.switch("4b-8bit").unwrap();
    let second = m.worker_pid().unwrap();

    assert_ne!(first, second);
    assert!(!process_exists(first), "previous worker {} still alive", first);
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::Downloaded);
    assert_eq!(m.status("4b-8bit").unwrap().status, ModelStatus::Ready);
    assert_eq!(m.current_model_id().as_deref(), Some("4b-8bit"));

    assert!(matches!(m.switch("27b"), Err(CommandError::NotDownloaded(_))));
    assert_eq!(m.worker_pid(), Some(second));
}

#[test]
fn external_kill_is_reported_and_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let m = manager(dir.path(), ModelFamily::Translation);
    m.load("4b").unwrap();
    let pid = m.worker_pid().unwrap();

    // SAFETY: pid belongs to a child we spawned.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };

    wait_for_status(&m, "4b", ModelStatus::Error);
    let snapshot = m.status("4b").unwrap();
    assert!(snapshot
        .error
        .unwrap()
        .contains("worker process exited unexpectedly"));
    assert_eq!(m.current_model_id(), None);
    assert!(matches!(
        translation::translate(&m, "hi", "en", "fr"),
        Err(CommandError::NoModelLoaded)
    ));

    let snapshot = m.load("4b").unwrap();
    assert_eq!(snapshot.status, ModelStatus::Ready);
    assert_eq!(snapshot.error, None);
    assert_ne!(m.worker_pid(), Some(pid));
}

#[test]
fn malformed_output_tears_the_worker_down() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let worker = script_worker(
        dir.path(),
        r#"read line
echo '{"id":1,"status":"ok","result":null}'
read line
echo 'this is not json'
exec sleep 30
"#,
    );
    let m = manager_with(
        dir.path(),
        ModelFamily::Translation,
        worker,
        Duration::from_secs(10),
        false,
    );

    m.load("4b").unwrap();
    let err = translation::translate(&m, "hi", "en", "fr").unwrap_err();

    assert!(matches!(err, CommandError::ProtocolViolation(_)), "{:?}", err);
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::Error);
    assert_eq!(m.worker_pid(), None);
    assert!(matches!(
        translation::translate(&m, "hi", "en", "fr"),
        Err(CommandError::NoModelLoaded)
    ));
}

#[test]
fn garbage_from_an_idle_worker_tears_it_down() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let worker = script_worker(
        dir.path(),
        r#"read line
echo '{"id":1,"status":"ok","result":null}'
sleep 0.5
echo 'this is not json'
exec sleep 30
"#,
    );
    let m = manager_with(
        dir.path(),
        ModelFamily::Translation,
        worker,
        Duration::from_secs(10),
        false,
    );

    m.load("4b").unwrap();
    let pid = m.worker_pid().unwrap();

    wait_for_status(&m, "4b", ModelStatus::Error);
    let snapshot = m.status("4b").unwrap();
    assert!(
        snapshot.error.as_deref().unwrap().contains("protocol violation"),
        "{:?}",
        snapshot
    );
    assert_eq!(m.current_model_id(), None);
    assert_eq!(m.worker_pid(), None);
    assert!(!process_exists(pid), "worker {} still alive", pid);
    assert!(matches!(
        translation::translate(&m, "hi", "en", "fr"),
        Err(CommandError::NoModelLoaded)
    ));
}

#[test]
fn fatal_response_tears_the_worker_down() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let worker = script_worker(
        dir.path(),
        r#"read line
echo '{"id":1,"status":"ok","result":null}'
read line
echo '{"id":2,"status":"fatal","message":"metal device lost"}'
exec sleep 30
"#,
    );
    let m = manager_with(
        dir.path(),
        ModelFamily::Translation,
        worker,
        Duration::from_secs(10),
        false,
    );

    m.load("4b").unwrap();
    let pid = m.worker_pid().unwrap();
    let err = translation::translate(&m, "hi", "en", "fr").unwrap_err();

    assert!(
        matches!(err, CommandError::WorkerCrashed(ref msg) if msg.contains("metal device lost")),
        "{:?}",
        err
    );
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::Error);
    assert_eq!(m.worker_pid(), None);
    assert!(!process_exists(pid));
    assert!(matches!(
        translation::translate(&m, "hi", "en", "fr"),
        Err(CommandError::NoModelLoaded)
    ));
}

#[test]
fn concurrent_loads_queue_on_one_worker() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let spawns = dir.path().join("spawns");
    let worker = script_worker(
        dir.path(),
        &format!(
            r#"echo started >> '{}'
read line
sleep 0.5
echo '{{"id":1,"status":"ok","result":null}}'
exec sleep 30
"#,
            spawns.display()
        ),
    );
    let m = manager_with(
        dir.path(),
        ModelFamily::Translation,
        worker,
        Duration::from_secs(10),
        false,
    );

    let (first, second) = std::thread::scope(|s| {
        let first = s.spawn(|| m.load("4b"));
        // Status queries do not wait behind the load.
        wait_for_status(&m, "4b", ModelStatus::Loading);
        let second = s.spawn(|| m.load("4b"));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert_eq!(first.unwrap().status, ModelStatus::Ready);
    assert_eq!(second.unwrap().status, ModelStatus::Ready);
    assert_eq!(std::fs::read_to_string(&spawns).unwrap().lines().count(), 1);
    assert!(m.worker_pid().is_some());
}

#[test]
fn dead_worker_with_missing_marker_is_not_downloaded() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let m = manager(dir.path(), ModelFamily::Translation);
    m.load("4b").unwrap();
    let pid = m.worker_pid().unwrap();

    // SAFETY: pid belongs to a child we spawned.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    std::thread::sleep(Duration::from_millis(300));
    ModelCache::new(dir.path()).clear_marker("4b").unwrap();

    assert!(matches!(m.load("4b"), Err(CommandError::NotDownloaded(_))));
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::NotDownloaded);
    assert_eq!(m.worker_pid(), None);
}

#[test]
fn unanswered_request_times_out_and_kills_worker() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let worker = script_worker(
        dir.path(),
        r#"read line
echo '{"id":1,"status":"ok","result":null}'
read line
exec sleep 30
"#,
    );
    let m = manager_with(
        dir.path(),
        ModelFamily::Translation,
        worker,
        Duration::from_secs(1),
        false,
    );

    m.load("4b").unwrap();
    let err = translation::translate(&m, "hi", "en", "fr").unwrap_err();

    assert!(matches!(err, CommandError::WorkerCrashed(_)), "{:?}", err);
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::Error);
    assert_eq!(m.worker_pid(), None);
}

#[test]
fn failed_load_leaves_model_in_error() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let worker = script_worker(
        dir.path(),
        r#"read line
echo '{"id":1,"status":"error","message":"out of memory"}'
"#,
    );
    let m = manager_with(
        dir.path(),
        ModelFamily::Translation,
        worker,
        Duration::from_secs(10),
        false,
    );

    let err = m.load("4b").unwrap_err();

    assert!(matches!(err, CommandError::LoadFailed(ref msg) if msg.contains("out of memory")));
    let snapshot = m.status("4b").unwrap();
    assert_eq!(snapshot.status, ModelStatus::Error);
    assert_eq!(m.worker_pid(), None);
}

#[test]
fn unsupported_tts_language_never_reaches_a_worker() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "qwen3-tts-0.6b");
    let m = manager(dir.path(), ModelFamily::Tts);

    let err = speech::synthesize(&m, "hello", "xx").unwrap_err();

    assert_eq!(err, CommandError::UnsupportedLanguage("xx".into()));
    assert_eq!(m.worker_pid(), None);
    assert_eq!(
        m.status("qwen3-tts-0.6b").unwrap().status,
        ModelStatus::Downloaded
    );
}

#[test]
fn synthesis_returns_wav_and_keeps_worker_on_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "qwen3-tts-0.6b");
    let m = manager(dir.path(), ModelFamily::Tts);
    m.load("qwen3-tts-0.6b").unwrap();
    let pid = m.worker_pid().unwrap();

    let audio = speech::synthesize(&m, "hello", "en").unwrap();
    let wav = BASE64.decode(audio).unwrap();
    assert_eq!(&wav[..4], b"RIFF");

    let err = speech::synthesize(&m, "   ", "en").unwrap_err();
    assert_eq!(err, CommandError::RequestFailed("Text is empty".into()));
    assert_eq!(m.worker_pid(), Some(pid));
    assert_eq!(m.status("qwen3-tts-0.6b").unwrap().status, ModelStatus::Ready);
}

#[test]
fn recycled_tts_worker_is_replaced_after_each_synthesis() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "qwen3-tts-0.6b");
    let m = manager_with(
        dir.path(),
        ModelFamily::Tts,
        builtin_worker(ModelFamily::Tts),
        Duration::from_secs(30),
        true,
    );
    m.load("qwen3-tts-0.6b").unwrap();
    let before = m.worker_pid().unwrap();

    speech::synthesize(&m, "hallo", "de").unwrap();

    let after = m.worker_pid().unwrap();
    assert_ne!(before, after);
    assert!(!process_exists(before));
    assert_eq!(m.status("qwen3-tts-0.6b").unwrap().status, ModelStatus::Ready);
}

#[test]
fn unload_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    install(dir.path(), "4b");
    let m = manager(dir.path(), ModelFamily::Translation);
    m.load("4b").unwrap();
    let pid = m.worker_pid().unwrap();

    assert!(matches!(m.delete("4b"), Err(CommandError::Busy(_))));

    assert_eq!(m.unload().as_deref(), Some("4b"));
    assert!(!process_exists(pid));
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::Downloaded);

    m.delete("4b").unwrap();
    assert_eq!(m.status("4b").unwrap().status, ModelStatus::NotDownloaded);
    assert!(!ModelCache::new(dir.path()).model_dir("4b").exists());
}
