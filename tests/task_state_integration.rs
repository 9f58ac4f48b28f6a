use sshferry::task::{EngineKind, Task, TaskKind, TaskStatus};

const ALL: [TaskStatus; 7] = [
    TaskStatus::Pending,
    TaskStatus::Running,
    TaskStatus::Paused,
    TaskStatus::Done,
    TaskStatus::Failed,
    TaskStatus::Canceled,
    TaskStatus::Skipped,
];

#[test]
fn transition_table_matches_design() {
    let legal: &[(TaskStatus, TaskStatus)] = &[
        (TaskStatus::Pending, TaskStatus::Running),
        (TaskStatus::Pending, TaskStatus::Canceled),
        (TaskStatus::Running, TaskStatus::Done),
        (TaskStatus::Running, TaskStatus::Failed),
        (TaskStatus::Running, TaskStatus::Paused),
        (TaskStatus::Running, TaskStatus::Canceled),
        (TaskStatus::Running, TaskStatus::Skipped),
        (TaskStatus::Paused, TaskStatus::Running),
        (TaskStatus::Paused, TaskStatus::Canceled),
        (TaskStatus::Paused, TaskStatus::Pending),
    ];
    for from in ALL {
        for to in ALL {
            let expected = legal.contains(&(from, to));
            assert_eq!(from.can_transition(to), expected, "{from} -> {to}");
        }
    }
}

#[test]
fn every_recorded_transition_in_legal_set() {
    // walk a realistic lifecycle and assert each hop is legal
    let path = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Running,
        TaskStatus::Failed,
    ];
    for pair in path.windows(2) {
        assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
    }
}

#[test]
fn restart_reopens_terminal_task() {
    let mut task = Task::new(TaskKind::Download, EngineKind::Parallel, "/r/f", "/l/f", 1000);
    task.status = TaskStatus::Failed;
    task.bytes_done = 42;
    task.error_message = Some("remote disconnect".into());
    task.reset_for_restart();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.bytes_done, 0);
    assert!(task.error_message.is_none());
}

#[test]
fn bytes_done_never_exceeds_total_invariant_holds_on_fresh_tasks() {
    let task = Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10);
    assert!(task.bytes_done <= task.bytes_total);
    assert_eq!(task.progress_percent(), 0.0);
}
