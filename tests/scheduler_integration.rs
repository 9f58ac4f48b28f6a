use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sshferry::events::{Event, EventBus};
use sshferry::metrics::MetricsCollector;
use sshferry::scheduler::TaskScheduler;
use sshferry::site::SiteConfig;
use sshferry::task::{EngineKind, Task, TaskKind, TaskStatus};

fn scheduler_with_events() -> (TaskScheduler, Arc<EventBus>) {
    let mut site = SiteConfig::new("it", "localhost", "user");
    site.remote_root = "/tmp".into();
    let events = Arc::new(EventBus::new());
    let dir = std::env::temp_dir().join(format!("sshferry-it-sched-{}-{:p}", std::process::id(), &site));
    let scheduler =
        TaskScheduler::new(site, events.clone(), MetricsCollector::new(dir.join("metrics.json")));
    (scheduler, events)
}

#[test]
fn add_emits_task_added_and_is_queryable() {
    let (scheduler, events) = scheduler_with_events();
    let added = Arc::new(AtomicUsize::new(0));
    let counter = added.clone();
    events.subscribe(move |event| {
        if matches!(event, Event::TaskAdded(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let id = scheduler.add_task(Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10));
    assert_eq!(added.load(Ordering::SeqCst), 1);
    let task = scheduler.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(scheduler.all_tasks().len(), 1);
}

#[test]
fn cancel_pending_task_reaches_terminal_and_emits_finished() {
    let (scheduler, events) = scheduler_with_events();
    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    events.subscribe(move |event| {
        if matches!(event, Event::TaskFinished(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let id = scheduler.add_task(Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10));
    assert!(scheduler.cancel_task(&id));
    assert_eq!(scheduler.get_task(&id).unwrap().status, TaskStatus::Canceled);
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    // wait_for returns immediately on terminal tasks
    let task = scheduler.wait_for(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Canceled);
}

#[test]
fn control_ops_reject_wrong_states() {
    let (scheduler, _) = scheduler_with_events();
    let id = scheduler.add_task(Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10));
    // pending tasks cannot be paused or resumed, and are not restartable
    assert!(!scheduler.pause_task(&id));
    assert!(!scheduler.resume_task(&id));
    assert!(!scheduler.restart_task(&id));
    // unknown ids are uniformly rejected
    assert!(!scheduler.cancel_task("nope"));
    assert!(!scheduler.pause_task("nope"));
}

#[test]
fn canceled_task_can_be_restarted_and_requeued() {
    let (scheduler, _) = scheduler_with_events();
    let id = scheduler.add_task(Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10));
    scheduler.cancel_task(&id);
    assert!(scheduler.restart_task(&id));
    let task = scheduler.get_task(&id).unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.bytes_done, 0);
    assert!(task.end_time.is_none());
}

#[test]
fn clear_finished_only_touches_terminal_tasks() {
    let (scheduler, _) = scheduler_with_events();
    let keep = scheduler.add_task(Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10));
    let drop_id = scheduler.add_task(Task::new(TaskKind::Upload, EngineKind::Sftp, "c", "d", 10));
    scheduler.cancel_task(&drop_id);
    assert_eq!(scheduler.clear_finished(), 1);
    assert!(scheduler.get_task(&keep).is_some());
    assert!(scheduler.get_task(&drop_id).is_none());
}

#[test]
fn factories_pick_engine_by_size_threshold() {
    let small = TaskScheduler::create_upload_task("/l/small.bin", "/r/small.bin", 10_000);
    assert_eq!(small.engine, EngineKind::Sftp);
    assert_eq!(small.kind, TaskKind::Upload);

    let large = TaskScheduler::create_upload_task("/l/big.bin", "/r/big.bin", 200 * 1024 * 1024);
    assert_eq!(large.engine, EngineKind::Parallel);

    let folder = TaskScheduler::create_folder_upload_task("/l/dir", "/r/dir");
    assert_eq!(folder.engine, EngineKind::Sftp);
    assert_eq!(folder.kind, TaskKind::FolderUpload);

    let delete = TaskScheduler::create_delete_task("/r/x");
    assert_eq!(delete.kind, TaskKind::Delete);
    assert_eq!(delete.src, "/r/x");
}

#[test]
fn start_stop_are_idempotent_and_clean() {
    let (scheduler, _) = scheduler_with_events();
    scheduler.start();
    scheduler.start();
    scheduler.stop();
    scheduler.stop();
}
