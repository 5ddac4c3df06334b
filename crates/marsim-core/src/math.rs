//! Small value types for global world parameters.

use std::fmt;
use std::ops::{Add, Mul, Sub};

/// A three-component vector in world coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vector3 {
    /// The zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Construct from components.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean length.
    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// True if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vector3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vector3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Solver-wide world parameters.
///
/// Written through pending updates and applied as a whole at a tick
/// boundary, so a physics step never sees a half-applied parameter set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldParameters {
    /// Error reduction parameter, in `[0, 1]`.
    pub erp: f64,
    /// Constraint force mixing, `>= 0`.
    pub cfm: f64,
    /// Per-axis environment scale factors, each `> 0`.
    pub scale: Vector3,
}

impl Default for WorldParameters {
    fn default() -> Self {
        Self {
            erp: 0.1,
            cfm: 1e-10,
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl WorldParameters {
    /// Check value ranges. Returns a description of the first violation.
    pub fn validate(&self) -> Result<(), String> {
        if !self.erp.is_finite() || !(0.0..=1.0).contains(&self.erp) {
            return Err(format!("erp must be in [0, 1], got {}", self.erp));
        }
        if !self.cfm.is_finite() || self.cfm < 0.0 {
            return Err(format!("cfm must be finite and >= 0, got {}", self.cfm));
        }
        let s = self.scale;
        if !s.is_finite() || s.x <= 0.0 || s.y <= 0.0 || s.z <= 0.0 {
            return Err(format!("scale components must be finite and > 0, got {s}"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_arithmetic() {
        let a = Vector3::new(1.0, 2.0, 3.0);
        let b = Vector3::new(0.5, 0.5, 0.5);
        assert_eq!(a + b, Vector3::new(1.5, 2.5, 3.5));
        assert_eq!(a - b, Vector3::new(0.5, 1.5, 2.5));
        assert_eq!(b * 2.0, Vector3::new(1.0, 1.0, 1.0));
        assert!((Vector3::new(3.0, 4.0, 0.0).length() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn default_world_parameters_are_valid() {
        assert!(WorldParameters::default().validate().is_ok());
    }

    #[test]
    fn world_parameter_ranges_enforced() {
        let bad_erp = WorldParameters {
            erp: 1.5,
            ..Default::default()
        };
        assert!(bad_erp.validate().is_err());

        let bad_cfm = WorldParameters {
            cfm: -1.0,
            ..Default::default()
        };
        assert!(bad_cfm.validate().is_err());

        let bad_scale = WorldParameters {
            scale: Vector3::new(1.0, 0.0, 1.0),
            ..Default::default()
        };
        assert!(bad_scale.validate().is_err());
    }
}
