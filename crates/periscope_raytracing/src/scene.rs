//! # Ray Tracing Scene Description
//!
//! What the renderer hands the assembler each frame: primitives with their
//! ray tracing LODs, the cached draw commands those LODs point at, and the
//! views the scene is gathered for.
//!
//! ```text
//! ScenePrimitive ──► lods[i] ──► draw_commands[j] ──► CachedDrawCommand
//!                                   (None = filtered)     (scene table)
//! ```

use std::collections::HashSet;

use glam::{Mat4, Vec3};
use periscope_core::BoxSphereBounds;

/// Instance mask bit added to every instance that casts shadows.
pub const RAY_TRACING_MASK_SHADOW: u8 = 1 << 7;

/// Index of a primitive in [`RayTracingScene::primitives`].
pub type PrimitiveIndex = u32;

/// Handle to a ray tracing geometry (bottom-level structure).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RayTracingGeometryHandle(pub u64);

impl RayTracingGeometryHandle {
    /// Names no geometry.
    pub const INVALID: Self = Self(0);

    /// True for anything but [`Self::INVALID`].
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for RayTracingGeometryHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Build state of a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeometryBuildState {
    /// Built and usable.
    #[default]
    Ready,
    /// Still compiling; must be force-built before the scene build.
    Compiling,
}

/// A ray tracing draw command cached for a primitive LOD segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CachedDrawCommand {
    /// Hash of the material and shader bindings.
    pub state_hash: u64,
    /// Ray types the segment answers to.
    pub instance_mask: u8,
    /// Filtered for this frame (material hidden, not yet loaded).
    pub filtered: bool,
    /// Segment has no any-hit shading.
    pub opaque: bool,
    /// Segment casts shadows.
    pub casts_shadow: bool,
    /// Segment is a decal.
    pub decal: bool,
    /// Segment disables backface culling.
    pub two_sided: bool,
}

/// One ray tracing LOD of a primitive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RayTracingLod {
    /// Geometry used at this LOD.
    pub geometry: RayTracingGeometryHandle,
    /// Build state of that geometry.
    pub build_state: GeometryBuildState,
    /// Indices into [`RayTracingScene::commands`], `None` for a segment
    /// without a cached command.
    pub draw_commands: Vec<Option<u32>>,
    /// Screen size at or above which this LOD is used.
    pub screen_size: f32,
}

/// Primitive state bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PrimitiveFlags(pub u8);

impl PrimitiveFlags {
    /// Has any ray tracing representation.
    pub const RAY_TRACING_CAPABLE: Self = Self(1 << 0);
    /// Visible to rays this frame.
    pub const VISIBLE_IN_RAY_TRACING: Self = Self(1 << 1);
    /// Geometry is generated per frame.
    pub const DYNAMIC: Self = Self(1 << 2);
    /// Hidden from scene capture views.
    pub const HIDDEN_IN_SCENE_CAPTURE: Self = Self(1 << 3);

    /// Static primitive that rays can see.
    pub const STATIC_VISIBLE: Self =
        Self(Self::RAY_TRACING_CAPABLE.0 | Self::VISIBLE_IN_RAY_TRACING.0);

    /// True when every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union.
    #[inline]
    #[must_use]
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// A primitive as the ray tracing gatherer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenePrimitive {
    /// Stable id used by view hidden and show-only lists.
    pub id: u32,
    /// World bounds.
    pub bounds: BoxSphereBounds,
    /// Local to world.
    pub transform: Mat4,
    /// State bits.
    pub flags: PrimitiveFlags,
    /// Ray tracing LODs, finest first.
    pub lods: Vec<RayTracingLod>,
    /// First LOD with resident geometry.
    pub min_lod: u8,
    /// Value handed to shaders for this instance.
    pub user_index: u32,
}

impl ScenePrimitive {
    /// Static, visible primitive with one LOD.
    #[must_use]
    pub fn new(id: u32, bounds: BoxSphereBounds, lod: RayTracingLod) -> Self {
        Self {
            id,
            bounds,
            transform: Mat4::from_translation(bounds.origin),
            flags: PrimitiveFlags::STATIC_VISIBLE,
            lods: vec![lod],
            min_lod: 0,
            user_index: id,
        }
    }
}

/// Primitives plus the cached command table their LODs index.
#[derive(Debug, Clone, Default)]
pub struct RayTracingScene {
    /// All primitives; [`PrimitiveIndex`] is a position here.
    pub primitives: Vec<ScenePrimitive>,
    /// Cached draw commands shared by every primitive.
    pub commands: Vec<CachedDrawCommand>,
}

impl RayTracingScene {
    /// Empty scene.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a cached command and returns its table index.
    pub fn add_command(&mut self, command: CachedDrawCommand) -> u32 {
        self.commands.push(command);
        (self.commands.len() - 1) as u32
    }

    /// Appends a primitive and returns its index.
    pub fn add_primitive(&mut self, primitive: ScenePrimitive) -> PrimitiveIndex {
        self.primitives.push(primitive);
        (self.primitives.len() - 1) as PrimitiveIndex
    }

    /// Primitive by index.
    #[inline]
    #[must_use]
    pub fn primitive(&self, index: PrimitiveIndex) -> Option<&ScenePrimitive> {
        self.primitives.get(index as usize)
    }

    /// Cached command by table index.
    #[inline]
    #[must_use]
    pub fn command(&self, index: u32) -> Option<&CachedDrawCommand> {
        self.commands.get(index as usize)
    }

    /// Number of primitives.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    /// True without primitives.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }
}

/// A view the scene is gathered for.
#[derive(Debug, Clone, PartialEq)]
pub struct RayTracingView {
    /// Eye position.
    pub origin: Vec3,
    /// Normalized view direction.
    pub direction: Vec3,
    /// `0.5 / tan(fov / 2)`, projects a world radius to screen units.
    pub screen_multiple: f32,
    /// Per-view LOD scale.
    pub lod_scale: f32,
    /// Per-view forced LOD, overriding the config.
    pub force_lod: Option<u8>,
    /// Primitive ids hidden in this view.
    pub hidden: HashSet<u32>,
    /// When set, only these primitive ids are shown.
    pub show_only: Option<HashSet<u32>>,
    /// View renders a scene capture.
    pub is_scene_capture: bool,
}

impl RayTracingView {
    /// View with a vertical field of view in radians.
    #[must_use]
    pub fn new(origin: Vec3, direction: Vec3, fov_y: f32) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
            screen_multiple: 0.5 / (fov_y * 0.5).tan(),
            lod_scale: 1.0,
            force_lod: None,
            hidden: HashSet::new(),
            show_only: None,
            is_scene_capture: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = PrimitiveFlags::STATIC_VISIBLE.with(PrimitiveFlags::DYNAMIC);
        assert!(flags.contains(PrimitiveFlags::RAY_TRACING_CAPABLE));
        assert!(flags.contains(PrimitiveFlags::DYNAMIC));
        assert!(!flags.contains(PrimitiveFlags::HIDDEN_IN_SCENE_CAPTURE));
    }

    #[test]
    fn test_screen_multiple_for_90_degrees() {
        let view = RayTracingView::new(Vec3::ZERO, Vec3::Z, std::f32::consts::FRAC_PI_2);
        assert!((view.screen_multiple - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_scene_indices() {
        let mut scene = RayTracingScene::new();
        let cmd = scene.add_command(CachedDrawCommand::default());
        let lod = RayTracingLod {
            geometry: RayTracingGeometryHandle(1),
            draw_commands: vec![Some(cmd)],
            ..RayTracingLod::default()
        };
        let index = scene.add_primitive(ScenePrimitive::new(
            9,
            BoxSphereBounds::new(Vec3::ZERO, Vec3::ONE),
            lod,
        ));
        assert_eq!(index, 0);
        assert_eq!(scene.primitive(0).map(|p| p.id), Some(9));
        assert!(scene.command(1).is_none());
        assert!(!RayTracingGeometryHandle::INVALID.is_valid());
    }
}
