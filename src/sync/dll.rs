// ABOUTME: Delay-locked loop used to smooth playback rate corrections
// ABOUTME: Turns a timing error in microseconds into a rate correction factor

use std::f64::consts::PI;

/// Narrowest loop bandwidth
pub const BW_MIN: f64 = 0.016;
/// Widest loop bandwidth
pub const BW_MAX: f64 = 0.128;

/// Second-order delay-locked loop
///
/// `update` returns a correction factor around 1.0. With the bandwidth unset
/// all coefficients are zero and the loop always returns exactly 1.0.
#[derive(Debug, Clone, Default)]
pub struct Dll {
    bw: f64,
    z1: f64,
    z2: f64,
    z3: f64,
    w0: f64,
    w1: f64,
    w2: f64,
}

impl Dll {
    /// Create an idle loop
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the filter state, keeping the bandwidth
    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
        self.z3 = 0.0;
    }

    /// Configured bandwidth
    pub fn bandwidth(&self) -> f64 {
        self.bw
    }

    /// Set the bandwidth for a loop updated every `period` samples at `rate`
    pub fn set_bw(&mut self, bw: f64, period: u32, rate: u32) {
        let w = 2.0 * PI * bw * period as f64 / rate.max(1) as f64;
        self.w0 = 1.0 - (-20.0 * w).exp();
        self.w1 = w * 1.5 / period.max(1) as f64;
        self.w2 = w / 1.5;
        self.bw = bw;
    }

    /// Feed one error sample, returning the correction factor
    pub fn update(&mut self, err: f64) -> f64 {
        self.z1 += self.w0 * (self.w1 * err - self.z1);
        self.z2 += self.w0 * (self.z1 - self.z2);
        self.z3 += self.w2 * self.z2;
        1.0 - (self.z2 + self.z3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_loop_is_neutral() {
        let mut dll = Dll::new();
        assert_eq!(dll.update(500.0), 1.0);
    }

    #[test]
    fn test_zero_error_is_neutral() {
        let mut dll = Dll::new();
        dll.set_bw(BW_MIN, 1000, 48000);
        for _ in 0..100 {
            assert_eq!(dll.update(0.0), 1.0);
        }
    }

    #[test]
    fn test_positive_error_slows_correction() {
        let mut dll = Dll::new();
        dll.set_bw(BW_MIN, 1000, 48000);

        let mut corr = 1.0;
        for _ in 0..50 {
            corr = dll.update(100.0);
        }
        assert!(corr < 1.0);
        assert!(corr > 0.9);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut dll = Dll::new();
        dll.set_bw(BW_MAX, 1000, 48000);
        dll.update(1000.0);
        dll.reset();
        assert_eq!(dll.update(0.0), 1.0);
        assert_eq!(dll.bandwidth(), BW_MAX);
    }
}
