//! Positions, orientations and distance

use serde::{Deserialize, Serialize};

/// A point in the shared local tangent-plane frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Attitude as a unit quaternion, stored exactly as the client sent it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quat {
    pub const IDENTITY: Quat = Quat {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Euclidean distance between two points
pub fn distance(a: &Vec3, b: &Vec3) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Inclusive radius check: a point exactly on the boundary is within range
pub fn within_radius(a: &Vec3, b: &Vec3, radius: f64) -> bool {
    distance(a, b) <= radius
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 4.0, 12.0);
        assert_eq!(distance(&a, &b), 13.0);
        assert_eq!(distance(&b, &a), 13.0);
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = Vec3::new(-12.5, 200.0, 7.25);
        assert_eq!(distance(&p, &p), 0.0);
    }

    #[test]
    fn boundary_is_inclusive() {
        let a = Vec3::new(0.0, 200.0, 0.0);
        let on_edge = Vec3::new(500.0, 200.0, 0.0);
        let beyond = Vec3::new(500.001, 200.0, 0.0);
        assert!(within_radius(&a, &on_edge, 500.0));
        assert!(!within_radius(&a, &beyond, 500.0));
    }

    #[test]
    fn default_quaternion_is_identity() {
        assert_eq!(Quat::default(), Quat::IDENTITY);
    }
}
