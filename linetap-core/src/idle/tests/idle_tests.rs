use crate::idle::{IdleMonitor, IdlePhase, LineSink};
use crate::line::LogLine;
use crate::metrics::Metrics;
use crate::writer::WriterError;
use pretty_assertions::assert_eq;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::sleep;

#[derive(Default)]
struct Recorder {
    lines: Mutex<Vec<String>>,
}

impl Recorder {
    fn markers(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl LineSink for Recorder {
    fn write_marker(&self, line: &LogLine) -> Result<(), WriterError> {
        self.lines
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(line.as_bytes()).into_owned());
        Ok(())
    }
}

fn monitor() -> (Arc<IdleMonitor>, Arc<Recorder>, Arc<Metrics>) {
    let sink = Arc::new(Recorder::default());
    let metrics = Arc::new(Metrics::new());
    let monitor = IdleMonitor::new(sink.clone(), metrics.clone(), Handle::current());
    (monitor, sink, metrics)
}

#[tokio::test(flavor = "multi_thread")]
async fn fires_exactly_once_per_idle_period() {
    let (monitor, sink, metrics) = monitor();
    monitor.arm(Duration::from_millis(50));
    assert_eq!(monitor.phase(), IdlePhase::Armed);

    sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.markers(), vec!["[IDLE for 0s]\n".to_string()]);
    assert_eq!(monitor.phase(), IdlePhase::Fired);

    let snap = metrics.snapshot();
    assert_eq!(snap.idle_alerts_total, 1);
    assert!(snap.idle_active);
    assert_eq!(snap.idle_threshold_seconds, 0.05);
}

#[tokio::test(flavor = "multi_thread")]
async fn activity_before_the_deadline_suppresses_the_marker() {
    let (monitor, sink, _) = monitor();
    monitor.arm(Duration::from_millis(150));

    for _ in 0..6 {
        sleep(Duration::from_millis(50)).await;
        monitor.poke();
    }
    assert!(sink.markers().is_empty());

    sleep(Duration::from_millis(400)).await;
    assert_eq!(sink.markers().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn poke_after_firing_rearms_and_clears_the_gauge() {
    let (monitor, sink, metrics) = monitor();
    monitor.arm(Duration::from_millis(40));
    sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.markers().len(), 1);

    monitor.poke();
    assert_eq!(monitor.phase(), IdlePhase::Armed);
    assert!(!metrics.snapshot().idle_active);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.markers().len(), 2);
    assert_eq!(metrics.snapshot().idle_alerts_total, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn changing_the_threshold_remeasures_from_now() {
    let (monitor, sink, _) = monitor();
    monitor.arm(Duration::from_millis(100));
    sleep(Duration::from_millis(60)).await;

    monitor.arm(Duration::from_millis(200));
    sleep(Duration::from_millis(120)).await;
    assert!(sink.markers().is_empty());

    sleep(Duration::from_millis(300)).await;
    assert_eq!(sink.markers().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_threshold_disables() {
    let (monitor, sink, metrics) = monitor();
    monitor.arm(Duration::from_millis(30));
    monitor.arm(Duration::ZERO);
    assert_eq!(monitor.phase(), IdlePhase::Disabled);

    monitor.poke();
    sleep(Duration::from_millis(150)).await;
    assert!(sink.markers().is_empty());
    assert_eq!(metrics.snapshot().idle_threshold_seconds, 0.0);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_cancels_the_pending_timer() {
    let (monitor, sink, _) = monitor();
    monitor.arm(Duration::from_millis(30));
    monitor.stop();

    sleep(Duration::from_millis(150)).await;
    assert!(sink.markers().is_empty());
    assert_eq!(monitor.phase(), IdlePhase::Disabled);
}

#[tokio::test(flavor = "multi_thread")]
async fn marker_reports_whole_seconds_since_activity() {
    let (monitor, sink, _) = monitor();
    monitor.arm(Duration::from_millis(1100));
    sleep(Duration::from_millis(1500)).await;
    assert_eq!(sink.markers(), vec!["[IDLE for 1s]\n".to_string()]);
}
