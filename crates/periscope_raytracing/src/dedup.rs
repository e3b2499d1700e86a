//! # Instance Deduplicator
//!
//! Merges static primitives that share geometry and render state into one
//! instance entry with many transforms (auto-instancing).
//!
//! ```text
//!  63      56 55     48 47      40 39                                 0
//! ┌──────────┬─────────┬──────────┬────────────────────────────────────┐
//! │  unused  │  flags  │ key mask │ structural hash (SipHash-1-3, 40b) │
//! └──────────┴─────────┴──────────┴────────────────────────────────────┘
//! ```
//!
//! Runs on one thread after the LOD join; its output order is the order in
//! which keys first appear in the relevant list.

use std::collections::{HashMap, HashSet};

use crate::instance::{InstanceFlags, SceneInstanceEntry};
use crate::lod::STRUCTURAL_HASH_BITS;
use crate::relevance::RelevantPrimitive;
use crate::scene::{RayTracingGeometryHandle, RayTracingScene};

/// Builds the instancing key of a resolved primitive.
#[inline]
#[must_use]
pub fn instance_key(structural_hash: u64, key_mask: u8, flags: InstanceFlags) -> u64 {
    let hash = structural_hash & ((1 << STRUCTURAL_HASH_BITS) - 1);
    hash | u64::from(key_mask) << STRUCTURAL_HASH_BITS | u64::from(flags.bits()) << 48
}

/// Counters of one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupStats {
    /// Relevant primitives looked at.
    pub considered: u32,
    /// Skipped for missing geometry, commands, or exclusion.
    pub skipped: u32,
    /// Occurrences merged into an existing entry.
    pub merged: u32,
    /// Entries produced.
    pub entries: u32,
}

/// Output of [`InstanceDeduplicator::deduplicate`].
#[derive(Debug, Clone, Default)]
pub struct DedupOutput {
    /// Instance entries in first-occurrence order.
    pub instances: Vec<SceneInstanceEntry>,
    /// Geometry to build before the scene, each listed once.
    pub forced_build: Vec<RayTracingGeometryHandle>,
    /// Counters.
    pub stats: DedupStats,
}

/// Keyed merge of resolved primitives. The key map is kept between frames
/// to reuse its allocation.
#[derive(Debug, Default)]
pub struct InstanceDeduplicator {
    entries_by_key: HashMap<u64, usize>,
}

impl InstanceDeduplicator {
    /// Empty deduplicator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns resolved primitives into instance entries. With
    /// `auto_instancing` off every primitive gets its own entry.
    pub fn deduplicate(
        &mut self,
        scene: &RayTracingScene,
        relevant: &[RelevantPrimitive],
        auto_instancing: bool,
    ) -> DedupOutput {
        self.entries_by_key.clear();
        let mut output = DedupOutput::default();
        let mut forced = HashSet::new();

        for entry in relevant {
            output.stats.considered += 1;
            let Some(primitive) = scene.primitive(entry.primitive) else {
                output.stats.skipped += 1;
                continue;
            };
            if !entry.is_instanceable() {
                output.stats.skipped += 1;
                continue;
            }
            if entry.needs_forced_build && forced.insert(entry.geometry) {
                output.forced_build.push(entry.geometry);
            }

            let flags = InstanceFlags {
                opaque: entry.opaque,
                casts_shadow: entry.casts_shadow,
                decal: entry.decal,
                two_sided: entry.two_sided,
            };
            let key = instance_key(entry.structural_hash, entry.key_mask, flags);

            if auto_instancing {
                if let Some(&slot) = self.entries_by_key.get(&key) {
                    let existing = &mut output.instances[slot];
                    existing.push_occurrence(primitive.transform, primitive.user_index, entry.primitive);
                    if existing.instance_mask == 0 {
                        existing.instance_mask = entry.instance_mask;
                    }
                    output.stats.merged += 1;
                    continue;
                }
                self.entries_by_key.insert(key, output.instances.len());
            }

            let mut instance = SceneInstanceEntry::new(
                entry.geometry,
                primitive.transform,
                primitive.user_index,
                entry.primitive,
                entry.instance_mask,
                flags,
            );
            instance.key = key;
            output.instances.push(instance);
        }

        output.stats.entries = output.instances.len() as u32;
        tracing::trace!(
            considered = output.stats.considered,
            entries = output.stats.entries,
            merged = output.stats.merged,
            "ray tracing instances deduplicated"
        );
        output
    }
}
