use std::sync::Mutex;

use crate::site::RemoteEntry;
use crate::task::Task;

/// Connection lifecycle as seen by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Broadcast topics. Task events carry a snapshot of the task taken under the
/// scheduler lock, so subscribers never observe a half-updated task.
#[derive(Debug, Clone)]
pub enum Event {
    TaskAdded(Task),
    TaskUpdated(Task),
    TaskFinished(Task),
    ConnectionStateChanged(ConnectionState),
    RemoteDirLoaded { path: String, entries: Vec<RemoteEntry> },
    RemoteDirFailed { path: String, error: String },
    LogMessage(String),
}

type Subscriber = Box<dyn Fn(&Event) + Send + Sync>;

/// 发布/订阅总线：同步分发，发布者线程直接依次调用各订阅者（订阅者不得
/// 阻塞）；每个事件对每个订阅者至多送达一次。
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribers.lock().expect("event bus lock poisoned").push(Box::new(f));
    }

    pub fn emit(&self, event: Event) {
        let subs = self.subscribers.lock().expect("event bus lock poisoned");
        for sub in subs.iter() {
            sub(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{EngineKind, TaskKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn each_subscriber_sees_event_once() {
        let bus = EventBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = first.clone();
        bus.subscribe(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        let s = second.clone();
        bus.subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::LogMessage("hello".into()));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn task_events_carry_snapshots() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| {
            if let Event::TaskUpdated(task) = event {
                sink.lock().unwrap().push(task.bytes_done);
            }
        });
        let mut task = Task::new(TaskKind::Upload, EngineKind::Sftp, "a", "b", 10);
        task.bytes_done = 3;
        bus.emit(Event::TaskUpdated(task.clone()));
        task.bytes_done = 7;
        bus.emit(Event::TaskUpdated(task));
        assert_eq!(*seen.lock().unwrap(), vec![3, 7]);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(Event::ConnectionStateChanged(ConnectionState::Connected));
    }

    #[test]
    fn directory_topics_carry_path_context() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| {
            let label = match event {
                Event::RemoteDirLoaded { path, entries } => format!("ok:{}:{}", path, entries.len()),
                Event::RemoteDirFailed { path, error } => format!("err:{}:{}", path, error),
                _ => return,
            };
            sink.lock().unwrap().push(label);
        });
        bus.emit(Event::RemoteDirLoaded { path: "/data".into(), entries: Vec::new() });
        bus.emit(Event::RemoteDirFailed { path: "/etc".into(), error: "outside sandbox".into() });
        assert_eq!(*seen.lock().unwrap(), vec!["ok:/data:0", "err:/etc:outside sandbox"]);
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Connected.as_str(), "connected");
        assert_eq!(ConnectionState::Disconnected.as_str(), "disconnected");
        assert_eq!(ConnectionState::Failed.as_str(), "failed");
    }
}
