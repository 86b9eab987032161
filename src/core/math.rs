//! Lie-group primitives for SO(3) and SE(3).
//!
//! Twists are ordered `(ω, v)`: rotational part first, translational part
//! second. All maps use the small-angle Taylor expansions below machine
//! thresholds so that interpolation near the identity stays finite.

use nalgebra::{Matrix3, Matrix6, Vector3, Vector6};

/// Angle below which Taylor expansions replace the closed forms.
const SMALL_ANGLE: f64 = 1e-9;

/// Skew-symmetric (hat) matrix of a 3-vector.
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// SO(3) exponential map: axis-angle vector to rotation matrix (Rodrigues).
pub fn so3_exp(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = omega.norm_squared();
    let theta = theta_sq.sqrt();
    let hat = skew(omega);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() + hat + 0.5 * hat * hat;
    }

    let a = theta.sin() / theta;
    let b = (1.0 - theta.cos()) / theta_sq;
    Matrix3::identity() + a * hat + b * hat * hat
}

/// SO(3) logarithm map: rotation matrix to axis-angle vector.
pub fn so3_log(rot: &Matrix3<f64>) -> Vector3<f64> {
    // trace(R) = 1 + 2 cos(theta)
    let cos_theta = ((rot.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();

    let axis = Vector3::new(
        rot[(2, 1)] - rot[(1, 2)],
        rot[(0, 2)] - rot[(2, 0)],
        rot[(1, 0)] - rot[(0, 1)],
    );

    if theta < SMALL_ANGLE {
        // theta / (2 sin(theta)) -> 1/2 + theta^2 / 12
        return (0.5 + theta * theta / 12.0) * axis;
    }

    if (std::f64::consts::PI - theta) < 1e-6 {
        // Near pi the antisymmetric part vanishes; recover the axis from the
        // dominant diagonal of R + I.
        let rr = rot + Matrix3::identity();
        let col = if rr[(0, 0)] >= rr[(1, 1)] && rr[(0, 0)] >= rr[(2, 2)] {
            rr.column(0).into_owned()
        } else if rr[(1, 1)] >= rr[(2, 2)] {
            rr.column(1).into_owned()
        } else {
            rr.column(2).into_owned()
        };
        let axis_unit = col / col.norm();
        // Sign fixed by the antisymmetric part where it is nonzero.
        let sign = if axis.dot(&axis_unit) < 0.0 { -1.0 } else { 1.0 };
        return sign * theta * axis_unit;
    }

    (theta / (2.0 * theta.sin())) * axis
}

/// Left Jacobian of SO(3).
pub fn so3_left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = omega.norm_squared();
    let theta = theta_sq.sqrt();
    let hat = skew(omega);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() + 0.5 * hat + hat * hat / 6.0;
    }

    let a = (1.0 - theta.cos()) / theta_sq;
    let b = (theta - theta.sin()) / (theta_sq * theta);
    Matrix3::identity() + a * hat + b * hat * hat
}

/// Inverse left Jacobian of SO(3).
pub fn so3_inv_left_jacobian(omega: &Vector3<f64>) -> Matrix3<f64> {
    let theta_sq = omega.norm_squared();
    let theta = theta_sq.sqrt();
    let hat = skew(omega);

    if theta < SMALL_ANGLE {
        return Matrix3::identity() - 0.5 * hat + hat * hat / 12.0;
    }

    let half = theta * 0.5;
    let cot = half / half.tan();
    let b = (1.0 - cot) / theta_sq;
    Matrix3::identity() - 0.5 * hat + b * hat * hat
}

/// SE(3) exponential map. Input twist `(ω, v)`, output `(R, t)`.
pub fn se3_exp(xi: &Vector6<f64>) -> (Matrix3<f64>, Vector3<f64>) {
    let omega = xi.fixed_rows::<3>(0).into_owned();
    let v = xi.fixed_rows::<3>(3).into_owned();
    let rot = so3_exp(&omega);
    let t = so3_left_jacobian(&omega) * v;
    (rot, t)
}

/// SE(3) logarithm map. Input `(R, t)`, output twist `(ω, v)`.
pub fn se3_log(rot: &Matrix3<f64>, t: &Vector3<f64>) -> Vector6<f64> {
    let omega = so3_log(rot);
    let v = so3_inv_left_jacobian(&omega) * t;
    let mut xi = Vector6::zeros();
    xi.fixed_rows_mut::<3>(0).copy_from(&omega);
    xi.fixed_rows_mut::<3>(3).copy_from(&v);
    xi
}

/// Adjoint of an se(3) element (the "curly hat"):
/// `ad(ξ) = [[ω^, 0], [v^, ω^]]` for `ξ = (ω, v)`.
pub fn se3_adjoint(xi: &Vector6<f64>) -> Matrix6<f64> {
    let omega_hat = skew(&xi.fixed_rows::<3>(0).into_owned());
    let v_hat = skew(&xi.fixed_rows::<3>(3).into_owned());
    let mut ad = Matrix6::zeros();
    ad.fixed_view_mut::<3, 3>(0, 0).copy_from(&omega_hat);
    ad.fixed_view_mut::<3, 3>(3, 3).copy_from(&omega_hat);
    ad.fixed_view_mut::<3, 3>(3, 0).copy_from(&v_hat);
    ad
}

/// Second-order approximation of the inverse left Jacobian of SE(3):
/// `J⁻¹(ξ) ≈ I − ½ ad(ξ) + 1/12 ad(ξ)²`.
///
/// Accurate for the small inter-knot motions the trajectory model produces;
/// the knot differences are recomputed every operating-point update so the
/// argument never grows large.
pub fn se3_approx_inv_left_jacobian(xi: &Vector6<f64>) -> Matrix6<f64> {
    let ad = se3_adjoint(xi);
    Matrix6::identity() - 0.5 * ad + (ad * ad) / 12.0
}
