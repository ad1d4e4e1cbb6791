//! Common infrastructure for the demo backend.
//!
//! - **clock**: injectable time source (system or manually advanced)
//! - **errors**: error injection framework
//! - **rng**: seeded random number generator

pub mod clock;
pub mod errors;
pub mod rng;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ErrorConfig, ErrorScenario};
pub use rng::DemoRng;
