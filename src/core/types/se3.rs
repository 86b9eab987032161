//! Rigid-body transforms on SE(3).

use nalgebra::{Matrix3, Vector3, Vector6};

use crate::core::math::{se3_exp, se3_log};

/// Body-frame velocity `(ω, v)`: angular part first, linear part second.
pub type Twist = Vector6<f64>;

/// A rigid transform, stored as rotation matrix plus translation.
///
/// Manifold updates are left-multiplicative:
///
/// ```text
/// T ⊞ ξ = exp(ξ∧) · T
/// T₂ ⊟ T₁ = log(T₂ · T₁⁻¹)
/// ```
///
/// so that `(T₁ ⊞ (T₂ ⊟ T₁)) == T₂` holds exactly. This is the convention
/// the Gaussian-process interpolation relies on: the interpolated pose is
/// `pose_k ⊞ δ` with `δ` linear in the knot difference multipliers.
#[derive(Debug, Clone, PartialEq)]
pub struct Se3 {
    rotation: Matrix3<f64>,
    translation: Vector3<f64>,
}

impl Se3 {
    /// Identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Build from rotation matrix and translation. The rotation is trusted
    /// to be orthonormal.
    pub fn from_parts(rotation: Matrix3<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Exponential of a twist.
    pub fn exp(xi: &Vector6<f64>) -> Self {
        let (rotation, translation) = se3_exp(xi);
        Self {
            rotation,
            translation,
        }
    }

    /// Logarithm of this transform.
    pub fn log(&self) -> Vector6<f64> {
        se3_log(&self.rotation, &self.translation)
    }

    #[inline]
    pub fn rotation(&self) -> &Matrix3<f64> {
        &self.rotation
    }

    #[inline]
    pub fn translation(&self) -> &Vector3<f64> {
        &self.translation
    }

    /// Composition `self · other`.
    pub fn compose(&self, other: &Se3) -> Se3 {
        Se3 {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// Inverse transform.
    pub fn inverse(&self) -> Se3 {
        let rot_t = self.rotation.transpose();
        Se3 {
            translation: -(rot_t * self.translation),
            rotation: rot_t,
        }
    }

    /// Map a point from the local frame into the parent frame.
    #[inline]
    pub fn transform(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Map a point from the parent frame into the local frame.
    #[inline]
    pub fn inverse_transform(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.transpose() * (p - self.translation)
    }

    /// Left-multiplicative manifold update: `self ← exp(ξ∧) · self`.
    pub fn manifold_plus(&mut self, xi: &Vector6<f64>) {
        let delta = Se3::exp(xi);
        *self = delta.compose(self);
    }

    /// Manifold difference `log(self · other⁻¹)`.
    pub fn manifold_minus(&self, other: &Se3) -> Vector6<f64> {
        self.compose(&other.inverse()).log()
    }

    /// Whether the two transforms differ by a tangent-space norm below `tol`.
    pub fn is_near(&self, other: &Se3, tol: f64) -> bool {
        self.manifold_minus(other).norm() < tol
    }

    /// The 12 pose-storage floats, row-major `[R | t]`. This is the layout
    /// the trajectory file dump uses.
    pub fn storage(&self) -> [f64; 12] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[(0, 0)],
            r[(0, 1)],
            r[(0, 2)],
            t.x,
            r[(1, 0)],
            r[(1, 1)],
            r[(1, 2)],
            t.y,
            r[(2, 0)],
            r[(2, 1)],
            r[(2, 2)],
            t.z,
        ]
    }
}

impl Default for Se3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample() -> Se3 {
        Se3::exp(&Vector6::new(0.2, -0.1, 0.3, 1.0, -2.0, 0.5))
    }

    #[test]
    fn test_identity_transform() {
        let t = Se3::identity();
        let p = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(t.transform(&p), p);
    }

    #[test]
    fn test_compose_inverse_roundtrip() {
        let t = sample();
        let back = t.compose(&t.inverse());
        assert_relative_eq!(back.rotation(), &Matrix3::identity(), epsilon = 1e-10);
        assert_relative_eq!(back.translation(), &Vector3::zeros(), epsilon = 1e-10);
    }

    #[test]
    fn test_transform_roundtrip() {
        let t = sample();
        let p = Vector3::new(-0.5, 4.0, 1.5);
        assert_relative_eq!(t.inverse_transform(&t.transform(&p)), p, epsilon = 1e-10);
    }

    #[test]
    fn test_manifold_plus_minus_consistency() {
        // (T1 ⊞ (T2 ⊟ T1)) == T2 under the left convention.
        let t1 = sample();
        let t2 = Se3::exp(&Vector6::new(-0.1, 0.25, 0.05, 0.5, 0.5, -1.0));
        let xi = t2.manifold_minus(&t1);
        let mut recovered = t1.clone();
        recovered.manifold_plus(&xi);
        assert!(recovered.is_near(&t2, 1e-9));
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let xi = Vector6::new(0.1, 0.2, -0.3, 2.0, 0.0, -1.0);
        assert_relative_eq!(Se3::exp(&xi).log(), xi, epsilon = 1e-10);
    }

    #[test]
    fn test_is_near_tolerance() {
        let t = sample();
        let mut nudged = t.clone();
        nudged.manifold_plus(&Vector6::new(0.0, 0.0, 0.0, 1e-6, 0.0, 0.0));
        assert!(t.is_near(&nudged, 1e-4));
        assert!(!t.is_near(&nudged, 1e-8));
    }

    #[test]
    fn test_storage_layout() {
        let t = Se3::from_parts(Matrix3::identity(), Vector3::new(1.0, 2.0, 3.0));
        let s = t.storage();
        assert_relative_eq!(s[3], 1.0);
        assert_relative_eq!(s[7], 2.0);
        assert_relative_eq!(s[11], 3.0);
        assert_relative_eq!(s[0], 1.0);
        assert_relative_eq!(s[5], 1.0);
        assert_relative_eq!(s[10], 1.0);
    }
}
