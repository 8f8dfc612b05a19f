//! Kill escalation: SIGTERM to the launcher script, a bounded wait for the
//! process group to drain, then SIGKILL.

pub mod controller;
pub mod escalation;
pub mod platform;

pub use controller::{group_alive, process_alive, KillController, KillOutcome};
pub use escalation::{EscalationOutcome, EscalationPolicy, EscalationStep, KillEscalation};
pub use platform::{KillFlag, KillPlatform};
