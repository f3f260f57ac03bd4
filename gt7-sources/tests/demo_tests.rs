//! Integration tests for the mock source and session wiring

use gt7_core::{SourceCallbacks, TelemetrySource};
use gt7_sources::{MockSource, MockTelemetryGenerator, Scenario, TelemetrySession};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn seeded_source() -> (Box<MockSource>, Arc<MockTelemetryGenerator>) {
    let generator = Arc::new(MockTelemetryGenerator::with_seed(42));
    (Box::new(MockSource::new(generator.clone())), generator)
}

#[tokio::test]
async fn test_mock_source_name_and_initial_state() {
    let (source, generator) = seeded_source();
    assert_eq!(source.name(), "mock");
    assert!(!source.is_connected());
    assert!(!generator.is_running());
}

#[tokio::test]
async fn test_mock_source_delivers_snapshots_after_connect() {
    let (source, generator) = seeded_source();
    let received = Arc::new(AtomicUsize::new(0));
    let status = Arc::new(AtomicBool::new(false));

    let (r, s) = (received.clone(), status.clone());
    let callbacks = SourceCallbacks::new(
        move |snap| {
            if snap.is_some() {
                r.fetch_add(1, Ordering::SeqCst);
            }
        },
        move |up| s.store(up, Ordering::SeqCst),
    );

    source.connect("ignored", callbacks).await.expect("mock connect should succeed");
    assert!(source.is_connected());
    assert!(status.load(Ordering::SeqCst), "status callback should report connected");
    assert!(generator.is_running());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(received.load(Ordering::SeqCst) >= 2, "expected several ticks");

    source.disconnect().await;
    assert!(!source.is_connected());
    assert!(!status.load(Ordering::SeqCst));
    assert!(!generator.is_running());
    assert_eq!(generator.subscriber_count(), 0);

    // Nothing delivered after disconnect resolves
    let after = received.load(Ordering::SeqCst);
    generator.step();
    assert_eq!(received.load(Ordering::SeqCst), after);
}

#[tokio::test]
async fn test_disconnect_during_delivery_drops_pending_snapshot() {
    let generator = Arc::new(MockTelemetryGenerator::with_seed(7));
    // A slow subscriber ahead of the source holds step() mid-delivery
    generator.subscribe(|_| std::thread::sleep(Duration::from_millis(300)));
    let source = MockSource::new(generator.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callbacks = SourceCallbacks::new(move |snap| sink.lock().push(snap.is_some()), |_| {});
    source.connect("ignored", callbacks).await.unwrap();
    generator.stop();

    let stepping = {
        let generator = generator.clone();
        std::thread::spawn(move || generator.step())
    };
    std::thread::sleep(Duration::from_millis(100));
    source.disconnect().await;
    let at_disconnect = events.lock().clone();
    stepping.join().unwrap();

    // Only the clearing None, both when disconnect resolves and afterwards
    assert_eq!(at_disconnect, vec![false]);
    assert_eq!(*events.lock(), vec![false]);
}

#[tokio::test]
async fn test_mock_source_disconnect_is_idempotent() {
    let (source, _generator) = seeded_source();
    source.disconnect().await;
    source.connect("", SourceCallbacks::noop()).await.unwrap();
    source.disconnect().await;
    source.disconnect().await;
    assert!(!source.is_connected());
}

#[tokio::test]
async fn test_disconnect_clears_consumer_state() {
    let (source, _generator) = seeded_source();
    let cleared = Arc::new(AtomicBool::new(false));
    let c = cleared.clone();
    let callbacks = SourceCallbacks::new(
        move |snap| {
            if snap.is_none() {
                c.store(true, Ordering::SeqCst);
            }
        },
        |_| {},
    );

    source.connect("demo", callbacks).await.unwrap();
    source.disconnect().await;
    assert!(cleared.load(Ordering::SeqCst), "disconnect should send a clearing None");
}

#[tokio::test]
async fn test_session_tracks_laps_from_mock() {
    let (source, generator) = seeded_source();
    let session = TelemetrySession::new();

    session.switch_source(source, "demo").await.unwrap();
    assert!(session.is_connected());

    generator.update_values(|t| t.current_lap = 1);
    let snap = session.latest_snapshot().expect("snapshot after update");
    assert_eq!(snap.current_lap, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        session.race_state().current_lap_elapsed_ms > 100.0,
        "lap clock should run while on track"
    );

    generator.update_values(|t| {
        t.current_lap = 2;
        t.fuel_percentage = 70.0;
        t.last_lap_time = 95_000;
    });

    let state = session.race_state();
    assert_eq!(state.completed_laps.len(), 1);
    assert!((state.completed_laps[0].fuel_used_percent - 5.5).abs() < 1e-9);
    assert_eq!(state.completed_laps[0].lap_time_ms, 95_000);
    assert!(state.current_lap_elapsed_ms < 150.0);

    session.close().await;
    assert!(!session.is_connected());
    assert!(session.latest_snapshot().is_none());
    assert!(session.race_state().completed_laps.is_empty());
}

#[tokio::test]
async fn test_session_pit_stop_scenario_offsets_fuel() {
    let (source, generator) = seeded_source();
    let session = TelemetrySession::new();
    session.switch_source(source, "demo").await.unwrap();
    generator.update_values(|t| t.current_lap = 1);

    // Pit stop drops fuel to 15.5% and then refuels in 1.5 point steps
    generator.run_scenario(Scenario::PitStop);
    for _ in 0..80 {
        generator.step();
    }
    generator.update_values(|t| {
        t.current_lap = 2;
        t.fuel_percentage = 44.0;
    });

    // Only the last refuel step is remembered: (75.5 + 1.5) - 44.0
    let state = session.race_state();
    assert_eq!(state.completed_laps.len(), 1);
    assert!((state.completed_laps[0].fuel_used_percent - 33.0).abs() < 1e-9);

    session.close().await;
}

#[tokio::test]
async fn test_switch_source_disconnects_previous() {
    let (first, first_gen) = seeded_source();
    let (second, second_gen) = seeded_source();
    let session = TelemetrySession::new();

    session.switch_source(first, "demo").await.unwrap();
    assert_eq!(first_gen.subscriber_count(), 1);

    session.switch_source(second, "demo").await.unwrap();
    assert_eq!(first_gen.subscriber_count(), 0);
    assert!(!first_gen.is_running());
    assert_eq!(second_gen.subscriber_count(), 1);

    first_gen.update_values(|t| t.current_lap = 4);
    assert_ne!(
        session.latest_snapshot().map(|s| s.current_lap),
        Some(4),
        "old source must not reach the session"
    );

    session.close().await;
}
