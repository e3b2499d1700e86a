//! Combined box + sphere bounds, the unit every culling test works on.

use glam::Vec3;

/// Axis-aligned box and bounding sphere sharing one origin.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoxSphereBounds {
    /// Center of both the box and the sphere.
    pub origin: Vec3,
    /// Half size of the box along each axis.
    pub box_extent: Vec3,
    /// Radius of the enclosing sphere.
    pub sphere_radius: f32,
}

impl BoxSphereBounds {
    /// Creates bounds from a box; the sphere encloses the box exactly.
    #[must_use]
    pub fn new(origin: Vec3, box_extent: Vec3) -> Self {
        Self {
            origin,
            box_extent,
            sphere_radius: box_extent.length(),
        }
    }

    /// Creates bounds from explicit min/max corners.
    #[must_use]
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self::new((min + max) * 0.5, (max - min) * 0.5)
    }

    /// Minimum corner of the box.
    #[inline]
    #[must_use]
    pub fn min(&self) -> Vec3 {
        self.origin - self.box_extent
    }

    /// Maximum corner of the box.
    #[inline]
    #[must_use]
    pub fn max(&self) -> Vec3 {
        self.origin + self.box_extent
    }

    /// Grows the box and the sphere by `amount` in every direction.
    #[must_use]
    pub fn expand_by(&self, amount: f32) -> Self {
        if amount == 0.0 {
            return *self;
        }
        Self {
            origin: self.origin,
            box_extent: self.box_extent + Vec3::splat(amount),
            sphere_radius: self.sphere_radius + amount,
        }
    }

    /// The eight box corners, X-major: `(min.x, min.y, min.z)`, `(min.x, min.y, max.z)`, ...
    ///
    /// This is the vertex order the shared cube index list expects.
    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        let (min, max) = (self.min(), self.max());
        [
            Vec3::new(min.x, min.y, min.z),
            Vec3::new(min.x, min.y, max.z),
            Vec3::new(min.x, max.y, min.z),
            Vec3::new(min.x, max.y, max.z),
            Vec3::new(max.x, min.y, min.z),
            Vec3::new(max.x, min.y, max.z),
            Vec3::new(max.x, max.y, min.z),
            Vec3::new(max.x, max.y, max.z),
        ]
    }

    /// Squared distance from `point` to the bounds origin.
    #[inline]
    #[must_use]
    pub fn distance_squared_to(&self, point: Vec3) -> f32 {
        self.origin.distance_squared(point)
    }
}
