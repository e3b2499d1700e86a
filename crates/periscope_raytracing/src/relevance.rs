//! # Relevance Filter
//!
//! Decides per primitive and view whether the primitive enters this
//! frame's ray tracing scene, and by which path.
//!
//! ```text
//! capable? ─► visible in RT? ─► hidden / show-only / capture ─► dynamic? ─► cone cull ─► static
//!    │              │                      │                       │            │
//!   Skip           Skip                   Skip                  Dynamic       Skip
//! ```
//!
//! A primitive relevant to several views is gathered once, for the first
//! view that accepts it.

use periscope_core::FrameArena;

use crate::config::RelevanceCullingConfig;
use crate::scene::{
    PrimitiveFlags, PrimitiveIndex, RayTracingGeometryHandle, RayTracingScene, RayTracingView,
    ScenePrimitive,
};

/// Why a primitive was left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No ray tracing representation.
    NotCapable,
    /// Hidden from rays.
    NotVisible,
    /// On the view's hidden list or off its show-only list.
    HiddenInView,
    /// Hidden from scene captures and the view is one.
    HiddenInCapture,
    /// Behind, far and small.
    ConeCulled,
}

/// Outcome of [`RayTracingRelevanceFilter::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relevance {
    /// Not in the scene for this view.
    Skip(SkipReason),
    /// Cached commands, goes through LOD resolution and deduplication.
    Static,
    /// Gathered per frame, bypasses deduplication.
    Dynamic,
}

/// A static primitive accepted for this frame. The filter fills the first
/// two fields; the LOD resolver fills the rest in place.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RelevantPrimitive {
    /// Scene index.
    pub primitive: PrimitiveIndex,
    /// View that accepted the primitive.
    pub view: usize,
    /// Selected LOD, `None` when the primitive has no usable LOD.
    pub lod: Option<usize>,
    /// Geometry of the selected LOD.
    pub geometry: RayTracingGeometryHandle,
    /// Cached commands found for the LOD.
    pub num_commands: u32,
    /// Mask of every found command, part of the instancing key.
    pub key_mask: u8,
    /// Mask of the unfiltered commands; zero means do not render.
    pub instance_mask: u8,
    /// Every command is opaque.
    pub opaque: bool,
    /// Any command casts shadows.
    pub casts_shadow: bool,
    /// Any command is a decal.
    pub decal: bool,
    /// Any command is two-sided.
    pub two_sided: bool,
    /// 40-bit hash of geometry and command state.
    pub structural_hash: u64,
    /// Geometry is still compiling.
    pub needs_forced_build: bool,
    /// Left out after LOD resolution (excluded decal).
    pub excluded: bool,
}

impl RelevantPrimitive {
    /// Unresolved entry.
    #[must_use]
    pub fn new(primitive: PrimitiveIndex, view: usize) -> Self {
        Self {
            primitive,
            view,
            ..Self::default()
        }
    }

    /// True when the entry can become an instance.
    #[inline]
    #[must_use]
    pub fn is_instanceable(&self) -> bool {
        self.geometry.is_valid() && self.num_commands > 0 && !self.excluded
    }
}

/// A dynamic primitive waiting for its gatherer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicPrimitive {
    /// Scene index.
    pub primitive: PrimitiveIndex,
    /// View that accepted the primitive.
    pub view: usize,
}

/// Counters of one filter pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelevanceStats {
    /// Primitives looked at.
    pub considered: u32,
    /// Primitives skipped by every view.
    pub skipped: u32,
    /// Skipped primitives that at least one view cone culled.
    pub cone_culled: u32,
    /// Static primitives accepted.
    pub static_relevant: u32,
    /// Dynamic primitives accepted.
    pub dynamic_relevant: u32,
}

/// Applies the per-view rules and cone culling.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayTracingRelevanceFilter {
    culling: RelevanceCullingConfig,
}

impl RayTracingRelevanceFilter {
    /// Filter with the given cone culling settings.
    #[must_use]
    pub const fn new(culling: RelevanceCullingConfig) -> Self {
        Self { culling }
    }

    /// Classifies one primitive for one view.
    #[must_use]
    pub fn classify(&self, primitive: &ScenePrimitive, view: &RayTracingView) -> Relevance {
        let flags = primitive.flags;
        if !flags.contains(PrimitiveFlags::RAY_TRACING_CAPABLE) {
            return Relevance::Skip(SkipReason::NotCapable);
        }
        if !flags.contains(PrimitiveFlags::VISIBLE_IN_RAY_TRACING) {
            return Relevance::Skip(SkipReason::NotVisible);
        }
        if view.hidden.contains(&primitive.id)
            || view
                .show_only
                .as_ref()
                .is_some_and(|show| !show.contains(&primitive.id))
        {
            return Relevance::Skip(SkipReason::HiddenInView);
        }
        if view.is_scene_capture && flags.contains(PrimitiveFlags::HIDDEN_IN_SCENE_CAPTURE) {
            return Relevance::Skip(SkipReason::HiddenInCapture);
        }
        if flags.contains(PrimitiveFlags::DYNAMIC) {
            return Relevance::Dynamic;
        }
        if self.is_cone_culled(primitive, view) {
            return Relevance::Skip(SkipReason::ConeCulled);
        }
        Relevance::Static
    }

    /// Behind the view, farther than the radius and smaller than the
    /// angle threshold. Always false when culling is disabled.
    #[must_use]
    pub fn is_cone_culled(&self, primitive: &ScenePrimitive, view: &RayTracingView) -> bool {
        if !self.culling.enabled {
            return false;
        }
        let to_primitive = primitive.bounds.origin - view.origin;
        let distance = to_primitive.length();
        let radius = primitive.bounds.sphere_radius;

        let behind = to_primitive.dot(view.direction) < 0.0;
        let far = distance - radius > self.culling.radius;
        if !(behind && far) {
            return false;
        }
        let angular_size = 2.0 * (radius / distance.max(f32::EPSILON)).atan();
        angular_size.to_degrees() < self.culling.angle_threshold_degrees
    }

    /// Sorts every primitive of `scene` into `relevant` (static) or
    /// `dynamic`, in scene order.
    pub fn filter(
        &self,
        scene: &RayTracingScene,
        views: &[RayTracingView],
        relevant: &mut FrameArena<RelevantPrimitive>,
        dynamic: &mut Vec<DynamicPrimitive>,
    ) -> RelevanceStats {
        let mut stats = RelevanceStats::default();
        for (index, primitive) in scene.primitives.iter().enumerate() {
            let index = index as PrimitiveIndex;
            stats.considered += 1;

            let mut cone_culled = false;
            let accepted = views.iter().enumerate().find_map(|(view_index, view)| {
                match self.classify(primitive, view) {
                    Relevance::Skip(reason) => {
                        cone_culled |= reason == SkipReason::ConeCulled;
                        None
                    }
                    relevance => Some((view_index, relevance)),
                }
            });

            match accepted {
                Some((view, Relevance::Static)) => {
                    relevant.push(RelevantPrimitive::new(index, view));
                    stats.static_relevant += 1;
                }
                Some((view, _)) => {
                    dynamic.push(DynamicPrimitive {
                        primitive: index,
                        view,
                    });
                    stats.dynamic_relevant += 1;
                }
                None => {
                    stats.skipped += 1;
                    stats.cone_culled += u32::from(cone_culled);
                }
            }
        }
        tracing::trace!(
            considered = stats.considered,
            static_relevant = stats.static_relevant,
            dynamic_relevant = stats.dynamic_relevant,
            skipped = stats.skipped,
            "ray tracing relevance filtered"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use glam::Vec3;
    use periscope_core::BoxSphereBounds;

    use super::*;
    use crate::scene::RayTracingLod;

    fn primitive(id: u32, origin: Vec3, radius: f32) -> ScenePrimitive {
        ScenePrimitive::new(
            id,
            BoxSphereBounds::new(origin, Vec3::splat(radius / 3.0_f32.sqrt())),
            RayTracingLod::default(),
        )
    }

    fn view() -> RayTracingView {
        RayTracingView::new(Vec3::ZERO, Vec3::Z, std::f32::consts::FRAC_PI_2)
    }

    fn culling() -> RayTracingRelevanceFilter {
        RayTracingRelevanceFilter::new(RelevanceCullingConfig {
            enabled: true,
            radius: 100.0,
            angle_threshold_degrees: 2.0,
        })
    }

    #[test]
    fn test_reject_order() {
        let filter = RayTracingRelevanceFilter::default();
        let view = view();

        let mut p = primitive(1, Vec3::Z * 10.0, 1.0);
        p.flags = PrimitiveFlags::VISIBLE_IN_RAY_TRACING;
        assert_eq!(filter.classify(&p, &view), Relevance::Skip(SkipReason::NotCapable));

        p.flags = PrimitiveFlags::RAY_TRACING_CAPABLE;
        assert_eq!(filter.classify(&p, &view), Relevance::Skip(SkipReason::NotVisible));

        p.flags = PrimitiveFlags::STATIC_VISIBLE;
        assert_eq!(filter.classify(&p, &view), Relevance::Static);

        p.flags = p.flags.with(PrimitiveFlags::DYNAMIC);
        assert_eq!(filter.classify(&p, &view), Relevance::Dynamic);
    }

    #[test]
    fn test_view_lists_and_capture() {
        let filter = RayTracingRelevanceFilter::default();
        let p = primitive(7, Vec3::Z * 10.0, 1.0);

        let mut hidden = view();
        hidden.hidden.insert(7);
        assert_eq!(filter.classify(&p, &hidden), Relevance::Skip(SkipReason::HiddenInView));

        let mut show_only = view();
        show_only.show_only = Some(HashSet::from([8]));
        assert_eq!(filter.classify(&p, &show_only), Relevance::Skip(SkipReason::HiddenInView));
        show_only.show_only = Some(HashSet::from([7]));
        assert_eq!(filter.classify(&p, &show_only), Relevance::Static);

        let mut capture = view();
        capture.is_scene_capture = true;
        assert_eq!(filter.classify(&p, &capture), Relevance::Static);
        let mut hidden_in_capture = p.clone();
        hidden_in_capture.flags = p.flags.with(PrimitiveFlags::HIDDEN_IN_SCENE_CAPTURE);
        assert_eq!(
            filter.classify(&hidden_in_capture, &capture),
            Relevance::Skip(SkipReason::HiddenInCapture)
        );
    }

    #[test]
    fn test_cone_culling_needs_all_three_conditions() {
        let filter = culling();
        let view = view();

        // Behind, far, tiny.
        assert!(filter.is_cone_culled(&primitive(1, Vec3::Z * -1000.0, 1.0), &view));
        // In front.
        assert!(!filter.is_cone_culled(&primitive(2, Vec3::Z * 1000.0, 1.0), &view));
        // Behind but near.
        assert!(!filter.is_cone_culled(&primitive(3, Vec3::Z * -50.0, 1.0), &view));
        // Behind and far but large.
        assert!(!filter.is_cone_culled(&primitive(4, Vec3::Z * -1000.0, 100.0), &view));
        // Disabled by default.
        assert!(!RayTracingRelevanceFilter::default()
            .is_cone_culled(&primitive(1, Vec3::Z * -1000.0, 1.0), &view));
    }

    #[test]
    fn test_dynamic_exempt_from_cone_culling() {
        let filter = culling();
        let mut p = primitive(1, Vec3::Z * -1000.0, 1.0);
        p.flags = p.flags.with(PrimitiveFlags::DYNAMIC);
        assert_eq!(filter.classify(&p, &view()), Relevance::Dynamic);
    }

    #[test]
    fn test_filter_takes_first_accepting_view() {
        let mut scene = RayTracingScene::new();
        scene.add_primitive(primitive(1, Vec3::Z * 10.0, 1.0));
        let mut dynamic = primitive(2, Vec3::Z * 10.0, 1.0);
        dynamic.flags = dynamic.flags.with(PrimitiveFlags::DYNAMIC);
        scene.add_primitive(dynamic);
        scene.add_primitive(primitive(3, Vec3::Z * -1000.0, 1.0));

        let mut first = view();
        first.hidden.insert(1);
        let views = [first, view()];

        let mut relevant = FrameArena::default();
        let mut dynamic = Vec::new();
        let stats = culling().filter(&scene, &views, &mut relevant, &mut dynamic);

        assert_eq!(relevant.as_slice(), &[RelevantPrimitive::new(0, 1)]);
        assert_eq!(dynamic, vec![DynamicPrimitive { primitive: 1, view: 0 }]);
        assert_eq!(
            stats,
            RelevanceStats {
                considered: 3,
                skipped: 1,
                cone_culled: 1,
                static_relevant: 1,
                dynamic_relevant: 1,
            }
        );
    }
}
