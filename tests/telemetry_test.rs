//! Integration tests for telemetry initialization, span helpers and the
//! locker's log lines.

use std::io;
use std::sync::{Arc, Mutex};

use worklock::error::Result;
use worklock::locker::{Jitter, LockerConfig};
use worklock::scheduler::Scheduler;
use worklock::store::MemoryStore;
use worklock::telemetry::{TelemetryConfig, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process, so a second
    // init in the same binary returns Err; either outcome is acceptable.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "worklock-test".to_string(),
        default_filter: "debug".to_string(),
    };
    if let Ok(guard) = init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn lease_instruments_accept_measurements() {
    use opentelemetry::KeyValue;
    use worklock::telemetry::metrics;

    metrics::lease_decisions().add(1, &[KeyValue::new("status", "is new")]);
    metrics::lease_heartbeats().add(1, &[KeyValue::new("result", "ok")]);
    metrics::lease_finalized().add(1, &[KeyValue::new("outcome", "done")]);
    metrics::item_duration_ms().record(12.5, &[KeyValue::new("outcome", "done")]);
}

/// In-memory sink for the fmt layer.
#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Capture {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Event messages, without the span context in front of them.
    fn messages(&self) -> Vec<String> {
        self.lines()
            .iter()
            .map(|line| match line.rsplit_once(": ") {
                Some((_, message)) => message.to_string(),
                None => line.clone(),
            })
            .collect()
    }
}

/// Run `f` with an info-level fmt subscriber writing into a fresh capture.
fn capture_logs(f: impl FnOnce()) -> Capture {
    let capture = Capture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    capture
}

fn config(log_step: Option<usize>) -> LockerConfig {
    LockerConfig::default()
        .log_step(log_step)
        .jitter(Jitter::none())
}

fn run(store: &MemoryStore, log_step: Option<usize>) -> Vec<&'static str> {
    let scheduler = Scheduler::new(store.clone(), config(log_step)) << vec!["a", "b"] << vec!["c"];
    scheduler.into_iter().collect::<Result<_>>().unwrap()
}

#[test]
fn decisions_and_completions_are_logged_per_item() {
    let store = MemoryStore::new();

    let first = capture_logs(|| assert_eq!(run(&store, Some(1)), vec!["a", "b", "c"]));
    assert_eq!(
        first.messages(),
        vec![
            "'a' is new, starting",
            "'a' done",
            "'b' is new, starting",
            "'b' done",
            "'c' is new, starting",
            "'c' done",
        ]
    );

    let second = capture_logs(|| assert!(run(&store, Some(1)).is_empty()));
    assert_eq!(
        second.messages(),
        vec![
            "'a' already done, skipping",
            "'b' already done, skipping",
            "'c' already done, skipping",
        ]
    );
}

#[test]
fn item_span_carries_the_decision() {
    let store = MemoryStore::new();
    let logs = capture_logs(|| {
        run(&store, Some(1));
    });

    let line = &logs.lines()[0];
    assert!(line.contains("lease.item"), "{line}");
    assert!(line.contains(r#"lease.key="a""#), "{line}");
    assert!(line.contains(r#"lease.status="is new""#), "{line}");
    assert!(line.contains(r#"lease.action="starting""#), "{line}");
}

#[test]
fn log_step_gates_decision_and_done_lines() {
    let store = MemoryStore::new();
    let every_other = capture_logs(|| {
        let scheduler =
            Scheduler::new(store.clone(), config(Some(2))) << vec!["a", "b", "c"];
        assert_eq!(scheduler.into_iter().count(), 3);
    });
    assert_eq!(
        every_other.messages(),
        vec![
            "'a' is new, starting",
            "'a' done",
            "'c' is new, starting",
            "'c' done",
        ]
    );

    let silent = capture_logs(|| {
        let scheduler = Scheduler::new(MemoryStore::new(), config(None)) << vec!["x", "y"];
        assert_eq!(scheduler.into_iter().count(), 2);
    });
    assert!(silent.lines().is_empty());
}
