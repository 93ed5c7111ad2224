// ABOUTME: Windowed online linear regression tracker
// ABOUTME: Fits y = a*x + b with exponential forgetting over the last few samples

/// Default number of samples the tracker effectively remembers
pub const DEFAULT_WINDOW: u32 = 5;

/// Online least-squares fit of `y = a·x + b`
///
/// The tracker keeps running means, variance and covariance. Each update is
/// weighted by `α`: 1 for the first sample, `1/n` while fewer than `window`
/// samples have been seen, and `1/window` afterwards. Older samples fade out
/// exponentially, which lets the fit follow slow drift.
///
/// Receivers keep two of these: ring offset → sender time, and sender time →
/// local time.
#[derive(Debug, Clone)]
pub struct Regression {
    mean_x: f64,
    mean_y: f64,
    var_x: f64,
    cov_xy: f64,
    n: u32,
    window: u32,
}

impl Regression {
    /// Create an empty tracker with the given window (at least 1)
    pub fn new(window: u32) -> Self {
        Self {
            mean_x: 0.0,
            mean_y: 0.0,
            var_x: 0.0,
            cov_xy: 0.0,
            n: 0,
            window: window.max(1),
        }
    }

    /// Forget all samples
    pub fn reset(&mut self) {
        *self = Self::new(self.window);
    }

    /// Number of samples seen (saturates)
    pub fn samples(&self) -> u32 {
        self.n
    }

    /// Add one `(x, y)` observation
    pub fn update(&mut self, x: f64, y: f64) {
        self.n = self.n.saturating_add(1);
        let alpha = if self.n < self.window {
            1.0 / self.n as f64
        } else {
            1.0 / self.window as f64
        };

        let dx = x - self.mean_x;
        let dy = y - self.mean_y;

        self.var_x += ((1.0 - alpha) * dx * dx - self.var_x) * alpha;
        self.cov_xy += ((1.0 - alpha) * dx * dy - self.cov_xy) * alpha;
        self.mean_x += dx * alpha;
        self.mean_y += dy * alpha;
    }

    /// Current `(a, b)`, or `None` until the x values have any spread
    pub fn fit(&self) -> Option<(f64, f64)> {
        if self.n == 0 || self.var_x <= 0.0 {
            return None;
        }
        let a = self.cov_xy / self.var_x;
        let b = self.mean_y - a * self.mean_x;
        (a.is_finite() && b.is_finite()).then_some((a, b))
    }

    /// Predict `y` for `x`
    pub fn calc_y(&self, x: f64) -> Option<f64> {
        self.fit().map(|(a, b)| a * x + b)
    }

    /// Invert the fit: the `x` that maps to `y`
    pub fn calc_x(&self, y: f64) -> Option<f64> {
        match self.fit() {
            Some((a, b)) if a != 0.0 => Some((y - b) / a),
            _ => None,
        }
    }
}

impl Default for Regression {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
