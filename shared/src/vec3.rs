//! Position and orientation values as reported by clients.
//! The relay never integrates these; it only validates and forwards them.

#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize, PartialEq, ts_rs::TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Vector length
    pub fn length(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Shorthand constructor
pub fn vec3(x: f64, y: f64, z: f64) -> Vec3 {
    Vec3::new(x, y, z)
}

/// Euler rotation in radians.
///
/// The browser engine serializes its Euler type with underscore-prefixed
/// fields (`_x`, `_y`, `_z`). That is the wire form in both directions;
/// plain `x`/`y`/`z` are also accepted on input.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize, PartialEq, ts_rs::TS)]
#[ts(export, export_to = "../../client/src/shared/generated/")]
pub struct Rotation {
    #[serde(rename = "_x", alias = "x")]
    pub x: f64,
    #[serde(rename = "_y", alias = "y")]
    pub y: f64,
    #[serde(rename = "_z", alias = "z")]
    pub z: f64,
}

impl Rotation {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Rotation about the vertical axis only
    pub fn yaw(y: f64) -> Self {
        Self { x: 0.0, y, z: 0.0 }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}
