//! Output: backends, verified device selection, and health monitoring

pub mod backend;
pub mod cpal_backend;
pub mod health_monitor;
pub mod manager;
pub mod session;
pub mod verify;

pub use backend::{DeviceInfo, OutputBackend, OutputStream};
pub use cpal_backend::CpalBackend;
pub use health_monitor::{HealthMonitor, HealthVerdict};
pub use manager::{OutputManager, ProbeResult, SessionProbe, VerifiedOutput};
pub use session::{FlowReport, OutputSession};
