//! Instance entries of the final ray tracing scene, and their GPU layout.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::scene::{PrimitiveIndex, RayTracingGeometryHandle};

/// Render-state bits stored in the instancing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InstanceFlags {
    /// Every segment is opaque.
    pub opaque: bool,
    /// Any segment casts shadows.
    pub casts_shadow: bool,
    /// Any segment is a decal.
    pub decal: bool,
    /// Any segment is two-sided.
    pub two_sided: bool,
}

impl InstanceFlags {
    /// Packs `opaque=0, shadow=1, decal=2, two_sided=3`.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        (self.opaque as u8)
            | (self.casts_shadow as u8) << 1
            | (self.decal as u8) << 2
            | (self.two_sided as u8) << 3
    }
}

/// One geometry placed one or more times in the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneInstanceEntry {
    /// Geometry shared by every transform.
    pub geometry: RayTracingGeometryHandle,
    /// One world transform per occurrence.
    pub transforms: Vec<Mat4>,
    /// Shader user index per occurrence.
    pub user_indices: Vec<u32>,
    /// Scene primitive per occurrence.
    pub primitives: Vec<PrimitiveIndex>,
    /// Ray types the instance answers to; zero means never hit.
    pub instance_mask: u8,
    /// Render state.
    pub flags: InstanceFlags,
    /// Instancing key; zero for dynamic entries.
    pub key: u64,
}

impl SceneInstanceEntry {
    /// Entry with its first occurrence.
    #[must_use]
    pub fn new(
        geometry: RayTracingGeometryHandle,
        transform: Mat4,
        user_index: u32,
        primitive: PrimitiveIndex,
        instance_mask: u8,
        flags: InstanceFlags,
    ) -> Self {
        Self {
            geometry,
            transforms: vec![transform],
            user_indices: vec![user_index],
            primitives: vec![primitive],
            instance_mask,
            flags,
            key: 0,
        }
    }

    /// Adds another occurrence.
    pub fn push_occurrence(&mut self, transform: Mat4, user_index: u32, primitive: PrimitiveIndex) {
        self.transforms.push(transform);
        self.user_indices.push(user_index);
        self.primitives.push(primitive);
    }

    /// Number of occurrences.
    #[inline]
    #[must_use]
    pub fn num_transforms(&self) -> usize {
        self.transforms.len()
    }

    /// Flattens every occurrence into GPU instance descriptors.
    pub fn write_descriptors(&self, out: &mut Vec<InstanceDescriptor>) {
        out.extend(
            self.transforms
                .iter()
                .zip(&self.user_indices)
                .map(|(transform, &user_index)| {
                    InstanceDescriptor::new(transform, user_index, self.instance_mask, self.flags)
                }),
        );
    }
}

/// Top-level instance as uploaded to the GPU (64 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct InstanceDescriptor {
    /// Row-major 3x4 object to world.
    pub transform: [[f32; 4]; 3],
    /// Shader user index.
    pub user_index: u32,
    /// Instance mask in the low byte, flag bits in the next.
    pub mask_and_flags: u32,
    /// Reserved for the geometry address, written by the backend.
    pub geometry_slot: [u32; 2],
}

impl InstanceDescriptor {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Descriptor for one occurrence.
    #[must_use]
    pub fn new(transform: &Mat4, user_index: u32, mask: u8, flags: InstanceFlags) -> Self {
        let rows = transform.transpose();
        Self {
            transform: [
                rows.x_axis.to_array(),
                rows.y_axis.to_array(),
                rows.z_axis.to_array(),
            ],
            user_index,
            mask_and_flags: u32::from(mask) | u32::from(flags.bits()) << 8,
            geometry_slot: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    #[test]
    fn test_flag_bits() {
        let flags = InstanceFlags {
            opaque: true,
            decal: true,
            ..InstanceFlags::default()
        };
        assert_eq!(flags.bits(), 0b0101);
    }

    #[test]
    fn test_descriptor_layout() {
        assert_eq!(InstanceDescriptor::SIZE, 64);
        let transform = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let d = InstanceDescriptor::new(&transform, 5, 0xff, InstanceFlags::default());
        assert_eq!(d.transform[0][3], 1.0);
        assert_eq!(d.transform[1][3], 2.0);
        assert_eq!(d.transform[2][3], 3.0);
        assert_eq!(d.mask_and_flags, 0xff);
        assert_eq!(bytemuck::bytes_of(&d).len(), 64);
    }

    #[test]
    fn test_occurrences_flatten() {
        let mut entry = SceneInstanceEntry::new(
            RayTracingGeometryHandle(1),
            Mat4::IDENTITY,
            0,
            0,
            1,
            InstanceFlags::default(),
        );
        entry.push_occurrence(Mat4::IDENTITY, 1, 4);
        let mut out = Vec::new();
        entry.write_descriptors(&mut out);
        assert_eq!(entry.num_transforms(), 2);
        assert_eq!(out.iter().map(|d| d.user_index).collect::<Vec<_>>(), vec![0, 1]);
    }
}
