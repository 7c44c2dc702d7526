//! Cycles run through the application layer: probe engine, reporter and
//! scheduler together.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::time::Duration;

use pretty_assertions::assert_eq;
use support::{App, HOST, START};
use transit::{Job, Scheduler};
use transit_common::{Clock, Signal};
use transit_probe::{FailureReason, correlation::SEND_EPOCH_HEADER};

fn key(name: &str) -> String {
    format!("email.delivery.{name}")
}

#[tokio::test]
async fn test_delivered_cycle_reports_success_and_latency() {
    let app = App::builder().delivered_after(37.0).build();
    let mut shutdown = app.subscribe();

    let report = app.transit.run_once(&mut shutdown).await;

    assert!(report.is_delivered());
    assert_eq!(
        app.values(),
        vec![(key("success"), 1.0), (key("time"), 37.0)]
    );

    let measurements = app.sink.measurements();
    assert!(measurements.iter().all(|m| m.host == HOST));
    assert_eq!(
        measurements[1].tags,
        vec![("source".to_string(), "authoritative".to_string())]
    );
    #[allow(clippy::cast_possible_truncation)]
    let finished = report.finished_at.floor() as i64;
    assert!(measurements.iter().all(|m| m.clock == Some(finished)));
}

#[tokio::test]
async fn test_unauthorized_send_is_retried_once() {
    let app = App::builder()
        .statuses(&[401, 202])
        .delivered_after(12.0)
        .build();
    let mut shutdown = app.subscribe();

    let report = app.transit.run_once(&mut shutdown).await;

    assert!(report.is_delivered());
    assert_eq!(app.sender.submissions().len(), 2);
    assert_eq!(
        app.values(),
        vec![(key("success"), 1.0), (key("time"), 12.0)]
    );
}

#[tokio::test]
async fn test_timeout_reports_failure() {
    let app = App::builder().timeout(Duration::from_secs(10)).build();
    let mut shutdown = app.subscribe();

    let report = app.transit.run_once(&mut shutdown).await;

    assert_eq!(report.outcome.failure_reason(), Some(FailureReason::Timeout));
    assert!(app.clock.now() - START >= 10.0);
    assert_eq!(
        app.values(),
        vec![(key("success"), 0.0), (key("time"), -1.0)]
    );
    assert_eq!(
        app.sink.measurements()[1].tags,
        vec![("reason".to_string(), "timeout".to_string())]
    );
}

#[tokio::test]
async fn test_rejected_send_reports_failure_without_polling() {
    let app = App::builder().statuses(&[400]).build();
    let mut shutdown = app.subscribe();

    let report = app.transit.run_once(&mut shutdown).await;

    assert_eq!(
        report.outcome.failure_reason(),
        Some(FailureReason::SendFailed)
    );
    assert_eq!(app.mailbox.searches(), 0);
    assert_eq!(
        app.values(),
        vec![(key("success"), 0.0), (key("time"), -1.0)]
    );
}

#[tokio::test]
async fn test_estimated_latency_is_reported_and_tagged() {
    let app = App::builder().delivered_after(3.0).build();
    app.mailbox.strip_header(SEND_EPOCH_HEADER);
    let mut shutdown = app.subscribe();

    let report = app.transit.run_once(&mut shutdown).await;

    let latency = report.outcome.latency().unwrap();
    assert!(latency.is_estimated());

    let measurements = app.sink.measurements();
    assert_eq!(measurements.len(), 2);
    assert!((measurements[0].value - 1.0).abs() < f64::EPSILON);
    assert_eq!(
        measurements[1].tags,
        vec![("source".to_string(), "estimated".to_string())]
    );
}

#[tokio::test]
async fn test_sink_outage_does_not_fail_the_cycle() {
    let app = App::builder().delivered_after(5.0).build();
    app.sink.set_failing(true);
    let mut shutdown = app.subscribe();

    let report = app.transit.run_once(&mut shutdown).await;

    assert!(report.is_delivered());
    assert!(app.sink.batches().is_empty());
}

#[tokio::test]
async fn test_interrupted_cycle_stops_the_schedule() {
    let app = App::builder().build();
    let mut shutdown = app.subscribe();
    app.shutdown.send(Signal::Shutdown).unwrap();

    let flow = app.transit.tick(&mut shutdown).await;

    assert!(flow.is_break());
    assert_eq!(
        app.values(),
        vec![(key("success"), 0.0), (key("time"), -1.0)]
    );
    assert_eq!(
        app.sink.measurements()[1].tags,
        vec![("reason".to_string(), "interrupted".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_serialized_cycles_until_shutdown() {
    let app = App::builder()
        .delivered_after(20.0)
        .interval(Duration::from_secs(60))
        .build();
    let receiver = app.subscribe();
    let shutdown = app.shutdown.clone();

    let stop = tokio::spawn(async move {
        // Ticks at 0, 60 and 120 fall before this.
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.send(Signal::Shutdown).ok();
    });

    let cycles = Scheduler::new(app.transit.interval())
        .run(&app.transit, receiver)
        .await;
    stop.await.unwrap();

    assert_eq!(cycles, 3);
    assert_eq!(app.sink.batches().len(), 3);
    assert_eq!(app.sender.submissions().len(), 3);
    assert!(app.sink.batches().iter().all(|batch| batch.len() == 2));
}

#[tokio::test]
async fn test_single_run_reports_and_closes_the_sink() {
    let app = App::builder().delivered_after(12.0).build();
    let sink = app.sink.clone();

    let report = app.transit.run_single().await.unwrap();

    assert!(report.is_delivered());
    assert_eq!(sink.batches().len(), 1);
    assert!(sink.is_closed());
}

#[tokio::test]
async fn test_close_releases_the_sink() {
    let app = App::builder().build();
    assert!(!app.sink.is_closed());

    app.transit.close().await;

    assert!(app.sink.is_closed());
}
