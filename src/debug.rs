use crate::math::{polar, to_degrees};
use crate::network::Network;
use num_complex::Complex64;
use pretty_dtoa::{dtoa, FmtFloatConfig};

const FLOAT_CONFIG: FmtFloatConfig = FmtFloatConfig::default()
    .add_point_zero(false)
    .max_significant_digits(9);

pub fn format_f64(f: f64) -> String {
    dtoa(f, FLOAT_CONFIG)
}

pub fn format_f64_vec(v: &[f64]) -> String {
    let a: Vec<String> = v.iter().map(|f| dtoa(*f, FLOAT_CONFIG)).collect();
    format!("[{}]", a.join(", "))
}

pub fn format_complex(z: &Complex64) -> String {
    format!(
        "{}{}j{}",
        dtoa(z.re, FLOAT_CONFIG),
        if z.im.signum() < 0.0 { "-" } else { "+" },
        dtoa(z.im.abs(), FLOAT_CONFIG)
    )
}

/// Formats a voltage magnitude and angle (radians) as `v∠deg°`.
pub fn format_polar(v: f64, angle: f64) -> String {
    format!(
        "{}\u{2220}{}\u{00B0}",
        dtoa(v, FLOAT_CONFIG),
        dtoa(to_degrees(angle), FLOAT_CONFIG)
    )
}

pub fn format_polar_vec(v: &[Complex64]) -> String {
    let a: Vec<String> = v.iter().map(|z| format_polar(z.norm(), z.arg())).collect();
    format!("[{}]", a.join(", "))
}

/// Bus voltages of a network as complex values.
pub fn bus_voltages(network: &Network) -> Vec<Complex64> {
    network.buses.iter().map(|b| polar(b.v, b.angle)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting() {
        assert_eq!(format_f64_vec(&[1.0, -0.25]), "[1, -0.25]");
        assert_eq!(format_complex(&Complex64::new(2.0, -1.5)), "2-j1.5");
        assert_eq!(format_polar(1.0, 0.0), "1\u{2220}0\u{00B0}");
    }
}
