//! Telemetry sources for GT7 Telemetry

pub mod demo;
pub mod session;
pub mod websocket;

pub use demo::{MockSource, MockTelemetryGenerator, Scenario, SubscriptionId};
pub use session::TelemetrySession;
pub use websocket::WebSocketConnection;
