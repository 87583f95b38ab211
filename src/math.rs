use num_complex::Complex64;
use std::f64::consts::PI;

pub const J: Complex64 = Complex64 { re: 0.0, im: 1.0 };

/// Computes the infinity norm: `max(abs(a))`
pub fn norm_inf(a: &[f64]) -> f64 {
    let mut max = f64::NEG_INFINITY;
    a.iter().for_each(|v| {
        let absvi = v.abs();
        if absvi > max {
            max = absvi
        }
    });
    max
}

/// Returns the 2-norm (Euclidean) of `a`.
pub fn norm(a: &[f64]) -> f64 {
    a.iter().map(|v| v * v).sum::<f64>().sqrt()
}

pub fn to_degrees(rad: f64) -> f64 {
    rad * 180.0 / PI
}

/// Complex voltage from magnitude and angle (radians).
pub fn polar(v: f64, angle: f64) -> Complex64 {
    Complex64::from_polar(v, angle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn norms() {
        let a = [3.0, -4.0];
        assert_eq!(norm(&a), 5.0);
        assert_eq!(norm_inf(&a), 4.0);
        assert_eq!(norm_inf(&[]), f64::NEG_INFINITY);
    }
}
