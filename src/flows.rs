use crate::network::Branch;
use num_complex::Complex64;

/// Electrical parameters of a closed branch, shared by every flow term of
/// that branch.
///
/// With `y = 1/|z|` and `ksi = atan2(r, x)` the side flows are:
///
/// ```txt
/// theta1 = ksi - a1 - ph1 + ph2
/// p1 = r1 v1 (g1 r1 v1 + y r1 v1 sin(ksi) - y v2 sin(theta1))
/// q1 = r1 v1 (-b1 r1 v1 + y r1 v1 cos(ksi) - y v2 cos(theta1))
///
/// theta2 = ksi + a1 + ph1 - ph2
/// p2 = v2 (g2 v2 - y r1 v1 sin(theta2) + y v2 sin(ksi))
/// q2 = v2 (-b2 v2 - y r1 v1 cos(theta2) + y v2 cos(ksi))
/// ```
#[derive(Clone, Copy, Debug)]
pub struct BranchParameters {
    pub y: f64,
    pub ksi: f64,
    pub g1: f64,
    pub b1: f64,
    pub g2: f64,
    pub b2: f64,
    pub a1: f64,
}

impl BranchParameters {
    pub fn new(branch: &Branch) -> Self {
        let z = Complex64::new(branch.r, branch.x);
        Self {
            y: 1.0 / z.norm(),
            ksi: branch.r.atan2(branch.x),
            g1: branch.g1,
            b1: branch.b1,
            g2: branch.g2,
            b2: branch.b2,
            a1: branch.a1,
        }
    }

    pub fn theta1(&self, ph1: f64, ph2: f64) -> f64 {
        self.ksi - self.a1 - ph1 + ph2
    }

    pub fn theta2(&self, ph1: f64, ph2: f64) -> f64 {
        self.ksi + self.a1 + ph1 - ph2
    }

    pub fn p1(&self, v1: f64, ph1: f64, v2: f64, ph2: f64, r1: f64) -> f64 {
        let theta = self.theta1(ph1, ph2);
        r1 * v1 * (self.g1 * r1 * v1 + self.y * r1 * v1 * self.ksi.sin() - self.y * v2 * theta.sin())
    }

    pub fn q1(&self, v1: f64, ph1: f64, v2: f64, ph2: f64, r1: f64) -> f64 {
        let theta = self.theta1(ph1, ph2);
        r1 * v1 * (-self.b1 * r1 * v1 + self.y * r1 * v1 * self.ksi.cos() - self.y * v2 * theta.cos())
    }

    pub fn p2(&self, v1: f64, ph1: f64, v2: f64, ph2: f64, r1: f64) -> f64 {
        let theta = self.theta2(ph1, ph2);
        v2 * (self.g2 * v2 - self.y * r1 * v1 * theta.sin() + self.y * v2 * self.ksi.sin())
    }

    pub fn q2(&self, v1: f64, ph1: f64, v2: f64, ph2: f64, r1: f64) -> f64 {
        let theta = self.theta2(ph1, ph2);
        v2 * (-self.b2 * v2 - self.y * r1 * v1 * theta.cos() + self.y * v2 * self.ksi.cos())
    }

    /// Returns `(p1, q1, p2, q2)`.
    pub fn flows(&self, v1: f64, ph1: f64, v2: f64, ph2: f64, r1: f64) -> (f64, f64, f64, f64) {
        (
            self.p1(v1, ph1, v2, ph2, r1),
            self.q1(v1, ph1, v2, ph2, r1),
            self.p2(v1, ph1, v2, ph2, r1),
            self.q2(v1, ph1, v2, ph2, r1),
        )
    }
}
