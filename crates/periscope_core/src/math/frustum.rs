//! Planes and view frustums.
//!
//! Planes follow the `n·p + d` convention with normals pointing into the
//! frustum, so a positive distance means "inside".

use glam::{Mat4, Vec3, Vec4};

use super::BoxSphereBounds;

/// A plane in 3D space (`n·p + d = 0`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    /// Unit normal, pointing to the inside half-space.
    pub normal: Vec3,
    /// Offset from the origin along the normal.
    pub d: f32,
}

impl Plane {
    /// Creates a plane from raw coefficients and normalizes it.
    #[must_use]
    pub fn from_coefficients(v: Vec4) -> Self {
        let normal = v.truncate();
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                d: v.w / len,
            }
        } else {
            Self { normal, d: v.w }
        }
    }

    /// Creates a plane through `point` facing `normal`.
    #[must_use]
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            d: -normal.dot(point),
        }
    }

    /// Signed distance from `point` to the plane.
    #[inline]
    #[must_use]
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Projection radius of a box with half size `extent` onto the plane normal.
    #[inline]
    #[must_use]
    pub fn box_push_out(&self, extent: Vec3) -> f32 {
        self.normal.abs().dot(extent)
    }

    /// True when the whole box lies strictly on the inside of the plane.
    #[must_use]
    pub fn box_fully_inside(&self, origin: Vec3, extent: Vec3) -> bool {
        self.distance(origin) > self.box_push_out(extent)
    }
}

/// Six-plane convex view volume.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Left plane index.
    pub const LEFT: usize = 0;
    /// Right plane index.
    pub const RIGHT: usize = 1;
    /// Bottom plane index.
    pub const BOTTOM: usize = 2;
    /// Top plane index.
    pub const TOP: usize = 3;
    /// Near plane index.
    pub const NEAR: usize = 4;
    /// Far plane index.
    pub const FAR: usize = 5;

    /// Extracts frustum planes from a view-projection matrix with `[0, 1]` depth.
    #[must_use]
    pub fn from_view_projection(m: &Mat4) -> Self {
        let (r0, r1, r2, r3) = (m.row(0), m.row(1), m.row(2), m.row(3));
        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = Plane::from_coefficients(r3 + r0);
        planes[Self::RIGHT] = Plane::from_coefficients(r3 - r0);
        planes[Self::BOTTOM] = Plane::from_coefficients(r3 + r1);
        planes[Self::TOP] = Plane::from_coefficients(r3 - r1);
        planes[Self::NEAR] = Plane::from_coefficients(r2);
        planes[Self::FAR] = Plane::from_coefficients(r3 - r2);
        Self { planes }
    }

    /// Right-handed perspective frustum looking from `origin` along `forward`.
    #[must_use]
    pub fn perspective(
        origin: Vec3,
        forward: Vec3,
        up: Vec3,
        fov_y_radians: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let view = Mat4::look_to_rh(origin, forward, up);
        let proj = Mat4::perspective_rh(fov_y_radians, aspect, near, far);
        Self::from_view_projection(&(proj * view))
    }

    /// The near clipping plane.
    #[inline]
    #[must_use]
    pub fn near_plane(&self) -> Plane {
        self.planes[Self::NEAR]
    }

    /// Tests if a sphere intersects the frustum.
    #[must_use]
    pub fn intersect_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes.iter().all(|p| p.distance(center) >= -radius)
    }

    /// Tests if an axis-aligned box intersects the frustum.
    #[must_use]
    pub fn intersect_box(&self, origin: Vec3, extent: Vec3) -> bool {
        self.planes
            .iter()
            .all(|p| p.distance(origin) >= -p.box_push_out(extent))
    }

    /// Sphere test first, then the tighter box test.
    #[must_use]
    pub fn intersect_bounds(&self, bounds: &BoxSphereBounds) -> bool {
        self.intersect_sphere(bounds.origin, bounds.sphere_radius)
            && self.intersect_box(bounds.origin, bounds.box_extent)
    }

    /// True when `point` is inside every plane.
    #[must_use]
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes.iter().all(|p| p.distance(point) >= 0.0)
    }
}
