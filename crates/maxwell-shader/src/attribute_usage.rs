//! Which generic attributes a stage reads and writes, and how adjacent stages agree on them.
//!
//! Merges never mutate their inputs: each returns the folded value and the caller decides which
//! stage keeps it.

use std::collections::BTreeSet;

use crate::attribute::USER_ATTRIBUTES_COUNT;
use crate::features::FeatureFlags;

/// Per-patch attributes are placed after the 16 regular locations so the two never overlap.
pub const PER_PATCH_LOCATION_BASE: u32 = USER_ATTRIBUTES_COUNT;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeUsage {
    /// Bit `n` set when generic input location `n` is read.
    pub used_input_attributes: u32,
    /// Bit `n` set when generic output location `n` is written, or read by the next stage.
    pub used_output_attributes: u32,
    pub used_input_attributes_per_patch: BTreeSet<u32>,
    pub used_output_attributes_per_patch: BTreeSet<u32>,
    pub next_used_input_attributes_per_patch: BTreeSet<u32>,
    /// Locations a passthrough geometry shader forwards without writing them.
    pub passthrough_attributes: u32,
    /// Four bits per location: the components read of each input.
    input_components: u64,
    next_input_components: u64,
}

impl AttributeUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input_user_attribute(&mut self, location: u32, component: u32) {
        if location >= USER_ATTRIBUTES_COUNT {
            return;
        }
        self.used_input_attributes |= 1 << location;
        self.input_components |= 1u64 << (location * 4 + (component & 3));
    }

    pub fn set_input_user_attribute_per_patch(&mut self, index: u32) {
        self.used_input_attributes_per_patch.insert(index);
    }

    pub fn set_output_user_attribute(&mut self, location: u32) {
        if location >= USER_ATTRIBUTES_COUNT {
            return;
        }
        self.used_output_attributes |= 1 << location;
    }

    pub fn set_output_user_attribute_per_patch(&mut self, index: u32) {
        self.used_output_attributes_per_patch.insert(index);
    }

    /// Components of input `location` that this stage reads (`x` in bit 0).
    pub fn input_components(&self, location: u32) -> u8 {
        ((self.input_components >> (location * 4)) & 0xf) as u8
    }

    /// Components of output `location` that the next stage reads.
    pub fn next_input_components(&self, location: u32) -> u8 {
        ((self.next_input_components >> (location * 4)) & 0xf) as u8
    }

    pub fn per_patch_attribute_location(index: u32) -> u32 {
        PER_PATCH_LOCATION_BASE + index
    }

    /// Folds the consumer stage's reads into this producer's outputs.
    pub fn merge_from_next_stage(&self, gp_passthrough: bool, next: &AttributeUsage) -> Self {
        let mut merged = self.merge_output_user_attributes(
            gp_passthrough,
            next.used_input_attributes,
            next.used_input_attributes_per_patch.iter().copied(),
        );
        merged.next_input_components = next.input_components;
        merged.next_used_input_attributes_per_patch = next.used_input_attributes_per_patch.clone();
        merged
    }

    /// Makes outputs in `mask` part of this stage's interface.
    ///
    /// A passthrough geometry shader cannot write extra outputs, so the missing locations are
    /// forwarded from its inputs instead.
    pub fn merge_output_user_attributes(
        &self,
        gp_passthrough: bool,
        mask: u32,
        per_patch: impl IntoIterator<Item = u32>,
    ) -> Self {
        let mut merged = self.clone();
        if gp_passthrough {
            merged.passthrough_attributes = mask & !self.used_output_attributes;
        } else {
            merged.used_output_attributes |= mask;
        }
        merged.used_output_attributes_per_patch.extend(per_patch);
        merged
    }

    /// Union of two stages fused into one program.
    pub fn inherit_from(&self, other: &AttributeUsage) -> Self {
        let mut merged = self.clone();
        merged.used_input_attributes |= other.used_input_attributes;
        merged.used_output_attributes |= other.used_output_attributes;
        merged.input_components |= other.input_components;
        merged
            .used_input_attributes_per_patch
            .extend(other.used_input_attributes_per_patch.iter().copied());
        merged
            .used_output_attributes_per_patch
            .extend(other.used_output_attributes_per_patch.iter().copied());
        merged
    }
}

/// Output interface of a stage, in the form the compute emulation record layout depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoUsage {
    features: FeatureFlags,
    pub clip_distances_written: u8,
    pub user_defined_map: u32,
}

impl IoUsage {
    pub fn new(features: FeatureFlags, clip_distances_written: u8, user_defined_map: u32) -> Self {
        Self {
            features: features.io_layout_bits(),
            clip_distances_written,
            user_defined_map,
        }
    }

    pub fn uses_rt_layer(&self) -> bool {
        self.features.contains(FeatureFlags::RT_LAYER)
    }

    pub fn uses_viewport_index(&self) -> bool {
        self.features.contains(FeatureFlags::VIEWPORT_INDEX)
    }

    pub fn uses_point_size(&self) -> bool {
        self.features.contains(FeatureFlags::POINT_SIZE)
    }

    pub fn combine(&self, other: &IoUsage) -> Self {
        Self {
            features: self.features | other.features,
            clip_distances_written: self.clip_distances_written | other.clip_distances_written,
            user_defined_map: self.user_defined_map | other.user_defined_map,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn next_stage_reads_become_outputs() {
        let mut vertex = AttributeUsage::new();
        vertex.set_output_user_attribute(0);

        let mut fragment = AttributeUsage::new();
        fragment.set_input_user_attribute(0, 0);
        fragment.set_input_user_attribute(3, 2);

        let merged = vertex.merge_from_next_stage(false, &fragment);
        assert_eq!(merged.used_output_attributes, 0b1001);
        assert_eq!(merged.next_input_components(3), 0b0100);
        assert_eq!(vertex.used_output_attributes, 0b0001);
    }

    #[test]
    fn passthrough_forwards_unwritten_locations() {
        let mut geometry = AttributeUsage::new();
        geometry.set_output_user_attribute(1);

        let merged = geometry.merge_output_user_attributes(true, 0b0110, []);
        assert_eq!(merged.passthrough_attributes, 0b0100);
        assert_eq!(merged.used_output_attributes, 0b0010);
    }

    #[test]
    fn io_usage_only_keeps_layout_features() {
        let usage = IoUsage::new(FeatureFlags::RT_LAYER | FeatureFlags::LOCAL_MEMORY, 0b11, 0b101);
        let other = IoUsage::new(FeatureFlags::POINT_SIZE, 0b100, 0b10);
        let combined = usage.combine(&other);
        assert!(combined.uses_rt_layer());
        assert!(combined.uses_point_size());
        assert!(!combined.uses_viewport_index());
        assert_eq!(combined.clip_distances_written, 0b111);
        assert_eq!(combined.user_defined_map, 0b111);
        assert_eq!(usage, IoUsage::new(FeatureFlags::RT_LAYER, 0b11, 0b101));
    }
}
