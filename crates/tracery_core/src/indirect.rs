//! Raw GPU argument layouts.
//!
//! Both structs are written verbatim into GPU buffers, so field order and
//! size are part of the contract with the backend.

use bytemuck::{Pod, Zeroable};

/// Indexed indirect draw arguments.
///
/// Read by the GPU when the draw executes, so a prior compute pass can rewrite
/// `instance_count` without a CPU round trip.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Indices per instance (index count of sub-mesh 0).
    pub index_count_per_instance: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index in the index buffer.
    pub start_index_location: u32,
    /// Vertex offset added to each index.
    pub base_vertex_location: i32,
    /// First instance ID.
    pub start_instance_location: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
    /// Byte offset of `instance_count`.
    pub const INSTANCE_COUNT_OFFSET: u64 = 4;

    /// Creates arguments drawing `instance_count` copies of a mesh.
    #[must_use]
    pub const fn new(index_count_per_instance: u32, instance_count: u32) -> Self {
        Self {
            index_count_per_instance,
            instance_count,
            start_index_location: 0,
            base_vertex_location: 0,
            start_instance_location: 0,
        }
    }

    /// Decodes arguments from raw buffer bytes.
    ///
    /// Returns `None` when fewer than `SIZE` bytes are available.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..Self::SIZE)
            .map(bytemuck::pod_read_unaligned::<Self>)
    }
}

/// Instance range for indirect acceleration-structure entries.
///
/// Raw 8-byte layout: word 0 is the start-instance index, word 1 the
/// instance count. Word 1 is what an append/compaction pass overwrites.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct InstanceRangeArgs {
    /// First instance read from the instance buffer.
    pub start_instance: u32,
    /// Number of instances to add.
    pub instance_count: u32,
}

impl InstanceRangeArgs {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
    /// Byte offset of `instance_count`.
    pub const INSTANCE_COUNT_OFFSET: u64 = 4;

    /// Creates a range starting at instance 0.
    #[must_use]
    pub const fn whole(instance_count: u32) -> Self {
        Self {
            start_instance: 0,
            instance_count,
        }
    }

    /// Decodes a range from raw buffer bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..Self::SIZE)
            .map(bytemuck::pod_read_unaligned::<Self>)
    }

    /// Number of instances the range resolves to when bounded by `max_count`.
    #[must_use]
    pub fn resolved_count(&self, max_count: u32) -> u32 {
        self.instance_count
            .min(max_count.saturating_sub(self.start_instance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(InstanceRangeArgs::SIZE, 8);
    }

    #[test]
    fn test_range_words() {
        let range = InstanceRangeArgs::whole(32_768);
        let bytes = bytemuck::bytes_of(&range);
        assert_eq!(&bytes[0..4], &0u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &32_768u32.to_le_bytes());
    }

    #[test]
    fn test_resolved_count_is_bounded() {
        assert_eq!(InstanceRangeArgs::whole(10).resolved_count(100), 10);
        assert_eq!(InstanceRangeArgs::whole(500).resolved_count(100), 100);
        let offset = InstanceRangeArgs { start_instance: 90, instance_count: 50 };
        assert_eq!(offset.resolved_count(100), 10);
        let past_end = InstanceRangeArgs { start_instance: 200, instance_count: 5 };
        assert_eq!(past_end.resolved_count(100), 0);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(DrawIndexedIndirectArgs::from_bytes(&[0u8; 12]).is_none());
        let args = DrawIndexedIndirectArgs::new(960, 7);
        let decoded = DrawIndexedIndirectArgs::from_bytes(bytemuck::bytes_of(&args));
        assert_eq!(decoded, Some(args));
    }
}
