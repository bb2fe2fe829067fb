//! Local and absolute item transforms.
//!
//! A transform is applied as translate, then rotate, then scale. Rotation is
//! in radians and, with the y axis pointing down, positive angles turn
//! clockwise on screen (kurbo's convention).

use kurbo::{Affine, Point, Vec2};

/// Placement of an item relative to its parent frame (or the board, for
/// top-level items).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Origin of the item, which is also the center of its rectangle.
    pub position: Point,
    /// Draw-order hint. Not composed with the parent.
    pub z: f64,
    /// Scale factors, independent of the item's size.
    pub scale: Vec2,
    /// Rotation angle in radians.
    pub rotation: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Point::ORIGIN,
        z: 0.0,
        scale: Vec2::new(1.0, 1.0),
        rotation: 0.0,
    };

    pub fn new(position: Point, z: f64) -> Self {
        Self {
            position,
            z,
            ..Self::IDENTITY
        }
    }

    /// The frame this transform establishes for its children.
    pub fn affine(&self) -> Affine {
        Affine::translate(self.position.to_vec2())
            * Affine::rotate(self.rotation)
            * Affine::scale_non_uniform(self.scale.x, self.scale.y)
    }

    /// Compose a child's local transform onto this (absolute) frame.
    pub fn then(&self, local: &Transform) -> Transform {
        Transform {
            position: self.affine() * local.position,
            z: local.z,
            scale: Vec2::new(self.scale.x * local.scale.x, self.scale.y * local.scale.y),
            rotation: self.rotation + local.rotation,
        }
    }

    /// Express an absolute transform in this frame.
    ///
    /// Inverse of [`Transform::then`]. Returns `None` when this frame has a
    /// zero scale component and cannot be inverted.
    pub fn relative(&self, absolute: &Transform) -> Option<Transform> {
        if !self.is_invertible() {
            return None;
        }
        Some(Transform {
            position: self.affine().inverse() * absolute.position,
            z: absolute.z,
            scale: Vec2::new(absolute.scale.x / self.scale.x, absolute.scale.y / self.scale.y),
            rotation: absolute.rotation - self.rotation,
        })
    }

    pub fn is_invertible(&self) -> bool {
        self.scale.x != 0.0 && self.scale.y != 0.0 && self.scale.is_finite()
    }

    /// Component-wise comparison within `tolerance`.
    pub fn approx_eq(&self, other: &Transform, tolerance: f64) -> bool {
        (self.position - other.position).hypot() <= tolerance
            && (self.z - other.z).abs() <= tolerance
            && (self.scale - other.scale).hypot() <= tolerance
            && (self.rotation - other.rotation).abs() <= tolerance
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
