// ABOUTME: Clock synchronization building blocks
// ABOUTME: Monotonic clock, windowed regression tracker and delay-locked loop

/// Monotonic microsecond clock
pub mod clock;
/// Second-order delay-locked loop for rate smoothing
pub mod dll;
/// Windowed online linear regression
pub mod regress;

pub use clock::MonotonicClock;
pub use dll::Dll;
pub use regress::Regression;
