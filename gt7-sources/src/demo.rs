//! Demo source that generates synthetic GT7 telemetry
//!
//! `MockTelemetryGenerator` holds one mutable snapshot, perturbs it ten times
//! per second, and pushes a copy to every subscriber. Scripted scenarios
//! (race start, pit stop, ...) take over the snapshot for a few seconds and
//! suppress the random drift while they play.

use async_trait::async_trait;
use gt7_core::cars::image_url;
use gt7_core::model::{CarInfo, SimulatorFlags, TelemetrySnapshot, Vector3};
use gt7_core::{SourceCallbacks, TelemetrySource, TransportError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Update period of the generator
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Ticks a scenario keeps random variations suppressed (10 s)
pub const SCENARIO_SUPPRESS_TICKS: u32 = 100;

fn default_car_info() -> CarInfo {
    let name = "Mazda RX-7 GT-X (FC) '90";
    CarInfo {
        car_id: 374,
        name: name.to_string(),
        maker_id: 21,
        maker_name: "Mazda".to_string(),
        image_url: image_url("Mazda", name),
    }
}

/// Starting point of the generator: parked on track in neutral, lap 1 of 5
pub fn default_snapshot() -> TelemetrySnapshot {
    TelemetrySnapshot {
        body_height: 0.4,
        gas_level: 40.0,
        gas_capacity: 65.0,
        turbo_boost: 1.0,
        oil_pressure: 6.5,
        water_temp: 90.0,
        oil_temp: 85.0,
        tire_temp_fl: 60.0,
        tire_temp_fr: 60.0,
        tire_temp_rl: 60.0,
        tire_temp_rr: 60.0,
        flags: SimulatorFlags::CAR_ON_TRACK,
        current_gear: 0,
        suggested_gear: 15,
        clutch_engagement: 1.0,
        transmission_top_speed: 260.0,
        gear_ratios: vec![3.76, 2.16, 1.41, 1.0, 0.76, 0.61],
        best_lap_time: 92_500,
        last_lap_time: 94_300,
        current_lap: 1,
        total_laps: 5,
        current_position: 8,
        total_positions: 16,
        fuel_percentage: 75.5,
        fuel_capacity: 65.0,
        current_fuel: 49.075,
        fuel_consumption_lap: 2.1,
        rpm_flashing: 7000.0,
        rpm_hit: 8000.0,
        car_id: 374,
        car_info: Some(default_car_info()),
        ..Default::default()
    }
}

/// Scripted driving sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    RaceStart,
    Cornering,
    PitStop,
    HardBraking,
    HighSpeed,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::RaceStart,
        Scenario::Cornering,
        Scenario::PitStop,
        Scenario::HardBraking,
        Scenario::HighSpeed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::RaceStart => "race_start",
            Scenario::Cornering => "cornering",
            Scenario::PitStop => "pit_stop",
            Scenario::HardBraking => "hard_braking",
            Scenario::HighSpeed => "high_speed",
        }
    }

    /// Steps are numbered from 1; the sequence runs while `step < step_limit`
    fn step_limit(&self) -> u32 {
        match self {
            Scenario::RaceStart => 30,
            Scenario::Cornering => 50,
            Scenario::PitStop => 80,
            Scenario::HardBraking => 40,
            Scenario::HighSpeed => 50,
        }
    }

    fn setup(&self, t: &mut TelemetrySnapshot) {
        match self {
            Scenario::RaceStart => {
                t.engine_rpm = 6500.0;
                t.current_gear = 1;
                t.throttle = 255;
                t.brake = 0;
                t.speed_mps = 0.0;
            }
            Scenario::Cornering => {
                t.speed_mps = 25.0;
                t.engine_rpm = 5000.0;
                t.current_gear = 3;
                t.throttle = 50;
                t.brake = 80;
                t.rotation = Vector3::new(0.0, 0.3, 0.05);
                t.tire_temp_fl = 85.0;
                t.tire_temp_fr = 70.0;
                t.tire_temp_rl = 90.0;
                t.tire_temp_rr = 75.0;
            }
            Scenario::PitStop => {
                t.speed_mps = 20.0;
                t.engine_rpm = 3000.0;
                t.current_gear = 2;
                t.throttle = 50;
                t.brake = 0;
                t.fuel_percentage = 15.5;
                t.current_fuel = 10.075;
            }
            Scenario::HardBraking => {
                t.speed_mps = 60.0;
                t.engine_rpm = 7000.0;
                t.current_gear = 5;
                t.throttle = 255;
                t.brake = 0;
            }
            Scenario::HighSpeed => {
                t.speed_mps = 45.0;
                t.engine_rpm = 5500.0;
                t.current_gear = 4;
                t.throttle = 255;
                t.brake = 0;
            }
        }
    }

    fn apply_step(&self, step: u32, t: &mut TelemetrySnapshot, rng: &mut StdRng) {
        match self {
            Scenario::RaceStart => {
                t.speed_mps += 1.5;
                t.engine_rpm = (t.engine_rpm + 50.0).min(t.rpm_hit);
                if step == 15 {
                    t.current_gear = 2;
                    t.engine_rpm -= 2000.0;
                } else if step == 25 {
                    t.current_gear = 3;
                    t.engine_rpm -= 2000.0;
                }
            }
            Scenario::Cornering => {
                if step < 15 {
                    // Entry: trail off the brake
                    t.brake = t.brake.saturating_sub(5);
                    t.throttle = t.throttle.saturating_add(5).min(80);
                    t.rotation.y = (t.rotation.y + 0.01).min(0.5);
                } else if step < 30 {
                    // Apex
                    t.brake = 0;
                    t.throttle = 100;
                    t.rotation.y = 0.5;
                } else {
                    t.throttle = t.throttle.saturating_add(15);
                    t.rotation.y = (t.rotation.y - 0.02).max(0.0);
                    if step == 40 {
                        t.current_gear = 4;
                        t.engine_rpm -= 1500.0;
                    }
                }
            }
            Scenario::PitStop => {
                if step < 20 {
                    t.speed_mps = (t.speed_mps - 1.0).max(0.0);
                    t.engine_rpm = (t.engine_rpm - 100.0).max(1000.0);
                    t.throttle = t.throttle.saturating_sub(5);
                    t.brake = t.brake.saturating_add(10).min(150);
                } else if step < 25 {
                    t.speed_mps = 0.0;
                    t.engine_rpm = 1000.0;
                    t.current_gear = 0;
                    t.throttle = 0;
                    t.brake = 255;
                } else if step < 65 {
                    t.brake = 255;
                    if step % 2 == 0 {
                        t.fuel_percentage = (t.fuel_percentage + 1.5).min(100.0);
                        t.current_fuel = (t.fuel_percentage / 100.0) as f32 * t.fuel_capacity;
                    }
                } else {
                    t.current_gear = 1;
                    t.throttle = t.throttle.saturating_add(10).min(100);
                    t.brake = 0;
                    t.speed_mps += 0.5;
                    t.engine_rpm = (t.engine_rpm + 100.0).min(3000.0);
                }
            }
            Scenario::HardBraking => {
                if step == 1 {
                    t.throttle = 0;
                    t.brake = 255;
                }
                t.speed_mps = (t.speed_mps - 1.5).max(5.0);
                match step {
                    10 => {
                        t.current_gear = 4;
                        t.engine_rpm = 6500.0;
                    }
                    20 => {
                        t.current_gear = 3;
                        t.engine_rpm = 7000.0;
                    }
                    30 => {
                        t.current_gear = 2;
                        t.engine_rpm = 6000.0;
                    }
                    _ => {}
                }
                if step > 1 {
                    t.engine_rpm = (t.engine_rpm - 50.0).max(2000.0);
                }
                t.tire_temp_fl += 0.2;
                t.tire_temp_fr += 0.2;
            }
            Scenario::HighSpeed => {
                if step < 30 {
                    t.speed_mps = (t.speed_mps + 0.8).min(70.0);
                    t.engine_rpm = (t.engine_rpm + 50.0).min(t.rpm_flashing);
                    if step == 10 {
                        t.current_gear = 5;
                        t.engine_rpm -= 1500.0;
                    } else if step == 25 {
                        t.current_gear = 6;
                        t.engine_rpm -= 1500.0;
                    }
                } else {
                    t.speed_mps = 70.0;
                    t.engine_rpm = 7000.0;
                    if step % 2 == 0 {
                        t.engine_rpm += rng.gen_range(-50.0..50.0);
                    }
                }
            }
        }
    }

    fn finish(&self, t: &mut TelemetrySnapshot) {
        if *self == Scenario::Cornering {
            t.rotation = Vector3::default();
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scenario::ALL
            .into_iter()
            .find(|scenario| scenario.name() == s)
            .ok_or_else(|| format!("unknown scenario: {}", s))
    }
}

/// Handle returned by [`MockTelemetryGenerator::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(TelemetrySnapshot) + Send + Sync>;

struct ActiveScenario {
    scenario: Scenario,
    step: u32,
}

struct GeneratorState {
    telemetry: TelemetrySnapshot,
    rng: StdRng,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
    scenario: Option<ActiveScenario>,
    suppress_ticks: u32,
}

impl GeneratorState {
    /// Small random drift so the data looks live
    fn apply_variations(&mut self) {
        let t = &mut self.telemetry;
        if t.current_gear > 0 && t.is_on_track() {
            let mut rpm_delta: f32 = self.rng.gen_range(-50.0..50.0);
            if t.throttle > 0 {
                rpm_delta += t.throttle as f32 * 0.5;
            }
            if t.brake > 0 {
                rpm_delta -= t.brake as f32 * 0.5;
            }
            t.engine_rpm = (t.engine_rpm + rpm_delta).min(t.rpm_hit).max(1200.0);

            if t.throttle > 0 {
                t.speed_mps += t.throttle_ratio() * 0.2;
            }
            if t.brake > 0 {
                t.speed_mps = (t.speed_mps - t.brake_ratio() * 0.4).max(0.0);
            }

            if t.speed_mps > 10.0 && t.rpm_hit > 0.0 {
                // Burn more at high revs
                let fuel_delta = (t.engine_rpm / t.rpm_hit) as f64 * 0.001;
                t.fuel_percentage = (t.fuel_percentage - fuel_delta).max(0.0);
                t.current_fuel = (t.fuel_percentage / 100.0) as f32 * t.fuel_capacity;
            }

            if t.speed_mps > 30.0 {
                let change: f32 = self.rng.gen_range(-0.2..0.5);
                t.tire_temp_fl += change;
                t.tire_temp_fr += change;
                t.tire_temp_rl += change;
                t.tire_temp_rr += change;
            }
        }

        for temp in [
            &mut t.tire_temp_fl,
            &mut t.tire_temp_fr,
            &mut t.tire_temp_rl,
            &mut t.tire_temp_rr,
        ] {
            *temp = temp.clamp(30.0, 110.0);
        }
    }

    fn advance_scenario(&mut self) {
        let Some(active) = self.scenario.as_mut() else {
            return;
        };
        active.step += 1;
        let scenario = active.scenario;
        if active.step < scenario.step_limit() {
            scenario.apply_step(active.step, &mut self.telemetry, &mut self.rng);
        } else {
            scenario.finish(&mut self.telemetry);
            self.scenario = None;
            debug!(scenario = scenario.name(), "scenario sequence finished");
        }
    }

    fn tick(&mut self) {
        self.advance_scenario();
        if self.suppress_ticks > 0 {
            self.suppress_ticks -= 1;
        } else {
            self.apply_variations();
        }
        self.telemetry.packet_id = self.telemetry.packet_id.wrapping_add(1);
    }

    fn fanout(&self) -> (TelemetrySnapshot, Vec<Subscriber>) {
        let subscribers = self.subscribers.iter().map(|(_, s)| s.clone()).collect();
        (self.telemetry.clone(), subscribers)
    }
}

/// Generator of synthetic GT7 telemetry
///
/// Cheap to share behind an `Arc`. Subscribers are called outside the
/// internal lock, so they may call back into the generator.
pub struct MockTelemetryGenerator {
    state: Mutex<GeneratorState>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl MockTelemetryGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Generator with a reproducible random sequence
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(GeneratorState {
                telemetry: default_snapshot(),
                rng,
                subscribers: Vec::new(),
                next_subscription: 0,
                scenario: None,
                suppress_ticks: 0,
            }),
            task: Mutex::new(None),
        }
    }

    /// Register a callback for every published snapshot
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(TelemetrySnapshot) + Send + Sync + 'static,
    {
        let mut state = self.state.lock();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.subscribers.push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subscribers.retain(|(sid, _)| *sid != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.state.lock().telemetry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Whether random variations are currently suppressed by a scenario
    pub fn scenario_running(&self) -> bool {
        self.state.lock().suppress_ticks > 0
    }

    /// Start publishing every [`TICK_INTERVAL`]. No-op if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let generator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => generator.step(),
                }
            }
        });

        info!("mock telemetry generator started");
        *task = Some((cancel, handle));
    }

    /// Stop publishing and end any scenario
    pub fn stop(&self) {
        if let Some((cancel, _handle)) = self.task.lock().take() {
            cancel.cancel();
            info!("mock telemetry generator stopped");
        }
        let mut state = self.state.lock();
        state.scenario = None;
        state.suppress_ticks = 0;
    }

    /// Advance by one tick and publish. Drives the generator without a timer.
    pub fn step(&self) {
        let (snapshot, subscribers) = {
            let mut state = self.state.lock();
            state.tick();
            state.fanout()
        };
        notify(snapshot, &subscribers);
    }

    /// Apply one round of random drift without publishing
    pub fn apply_variations(&self) {
        self.state.lock().apply_variations();
    }

    /// Patch the snapshot and publish it
    pub fn update_values<F>(&self, patch: F)
    where
        F: FnOnce(&mut TelemetrySnapshot),
    {
        let (snapshot, subscribers) = {
            let mut state = self.state.lock();
            patch(&mut state.telemetry);
            state.fanout()
        };
        notify(snapshot, &subscribers);
    }

    /// Back to the default snapshot, then publish
    pub fn reset(&self) {
        let (snapshot, subscribers) = {
            let mut state = self.state.lock();
            state.telemetry = default_snapshot();
            state.scenario = None;
            state.suppress_ticks = 0;
            state.fanout()
        };
        notify(snapshot, &subscribers);
    }

    /// Start a scripted sequence, replacing any running one.
    ///
    /// The first step is applied and published immediately; later steps are
    /// applied one per tick.
    pub fn run_scenario(&self, scenario: Scenario) {
        info!(scenario = scenario.name(), "running scenario");
        let (snapshot, subscribers) = {
            let mut state = self.state.lock();
            let state = &mut *state;
            scenario.setup(&mut state.telemetry);
            scenario.apply_step(1, &mut state.telemetry, &mut state.rng);
            state.scenario = Some(ActiveScenario { scenario, step: 1 });
            state.suppress_ticks = SCENARIO_SUPPRESS_TICKS;
            state.fanout()
        };
        notify(snapshot, &subscribers);
    }
}

impl Default for MockTelemetryGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockTelemetryGenerator {
    fn drop(&mut self) {
        if let Some((cancel, _)) = self.task.get_mut().take() {
            cancel.cancel();
        }
    }
}

fn notify(snapshot: TelemetrySnapshot, subscribers: &[Subscriber]) {
    for subscriber in subscribers {
        subscriber(snapshot.clone());
    }
}

/// Callbacks shared between the subscription and `disconnect`. Delivery
/// happens under the lock, so once the slot is emptied nothing more arrives.
type CallbackSlot = Arc<Mutex<Option<SourceCallbacks>>>;

/// [`TelemetrySource`] backed by a [`MockTelemetryGenerator`]
///
/// The connect address is ignored.
pub struct MockSource {
    generator: Arc<MockTelemetryGenerator>,
    connection: Mutex<Option<(SubscriptionId, CallbackSlot)>>,
    connected: AtomicBool,
}

impl MockSource {
    pub fn new(generator: Arc<MockTelemetryGenerator>) -> Self {
        Self {
            generator,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn generator(&self) -> &Arc<MockTelemetryGenerator> {
        &self.generator
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new(Arc::new(MockTelemetryGenerator::new()))
    }
}

#[async_trait]
impl TelemetrySource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        _address: &str,
        callbacks: SourceCallbacks,
    ) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            self.disconnect().await;
        }

        let slot: CallbackSlot = Arc::new(Mutex::new(Some(callbacks.clone())));
        let forward = slot.clone();
        let id = self.generator.subscribe(move |snapshot| {
            if let Some(callbacks) = forward.lock().as_ref() {
                callbacks.snapshot(Some(snapshot));
            }
        });
        *self.connection.lock() = Some((id, slot));
        self.connected.store(true, Ordering::SeqCst);

        callbacks.status(true);
        self.generator.start();
        Ok(())
    }

    async fn disconnect(&self) {
        let connection = self.connection.lock().take();
        self.connected.store(false, Ordering::SeqCst);
        if let Some((id, slot)) = connection {
            self.generator.unsubscribe(id);
            if self.generator.subscriber_count() == 0 {
                self.generator.stop();
            }
            // Waits out a delivery already in progress
            let callbacks = slot.lock().take();
            if let Some(callbacks) = callbacks {
                callbacks.status(false);
                callbacks.snapshot(None);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
