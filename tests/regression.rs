use rand::{Rng, SeedableRng};
use sendspin::sync::dll::BW_MIN;
use sendspin::sync::{Dll, Regression};

#[test]
fn test_exact_line_converges() {
    let mut reg = Regression::new(5);
    for i in 0..50 {
        let x = i as f64 * 10.0;
        reg.update(x, 2.0 * x + 3.0);
    }
    let (a, b) = reg.fit().unwrap();
    assert!((a - 2.0).abs() < 1e-9, "a = {}", a);
    assert!((b - 3.0).abs() < 1e-6, "b = {}", b);
    assert!((reg.calc_y(100.0).unwrap() - 203.0).abs() < 1e-6);
    assert!((reg.calc_x(203.0).unwrap() - 100.0).abs() < 1e-6);
}

#[test]
fn test_bounded_noise_converges() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut reg = Regression::new(5);
    for i in 0..500 {
        let x = i as f64 * 1000.0;
        let noise: f64 = rng.random_range(-50.0..50.0);
        reg.update(x, 2.0 * x + 3.0 + noise);
    }
    let (a, b) = reg.fit().unwrap();
    assert!((a - 2.0).abs() < 0.05, "a = {}", a);
    // far from the origin the intercept absorbs slope error, so check the line
    let x = 499_000.0;
    let predicted = reg.calc_y(x).unwrap();
    assert!((predicted - (2.0 * x + 3.0)).abs() < 200.0, "b = {}, y = {}", b, predicted);
}

#[test]
fn test_clock_offset_and_drift() {
    // Remote clock runs 100 ppm fast and started 1 s later
    let mut reg = Regression::new(5);
    for i in 0..40 {
        let local = i as f64 * 200_000.0;
        let remote = (local - 1_000_000.0) * 1.0001;
        reg.update(remote, local);
    }
    let local = reg.calc_y((5_000_000.0 - 1_000_000.0) * 1.0001).unwrap();
    assert!((local - 5_000_000.0).abs() < 1.0, "local = {}", local);
}

#[test]
fn test_dll_tracks_constant_error() {
    let mut dll = Dll::new();
    dll.set_bw(BW_MIN, 1000, 48000);
    let mut corr = 1.0;
    for _ in 0..200 {
        corr = dll.update(100.0);
    }
    assert!(corr.is_finite());
    assert!(corr != 1.0);
}
