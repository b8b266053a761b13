//! Resource handles for GPU objects
//!
//! Every GPU allocation (render targets, shadow maps, meshes, material
//! textures) is owned by exactly one structure and addressed through a
//! generational slot-map key. Releasing the owner releases the slot, so stale
//! handles can never alias a newer resource.

use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Handle to a texture or render target owned by a device
    pub struct TextureKey;

    /// Handle to an uploaded mesh owned by a device
    pub struct MeshKey;
}

/// Slot-map backed table the devices use to store their resources
pub type ResourceTable<K, T> = SlotMap<K, T>;

/// Counts of live and historical allocations in a resource table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationStats {
    /// Resources currently alive
    pub live: usize,
    /// Total allocations over the table's lifetime
    pub allocated: usize,
    /// Total releases over the table's lifetime
    pub released: usize,
}

impl AllocationStats {
    pub(crate) fn record_allocation(&mut self) {
        self.allocated += 1;
        self.live += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.released += 1;
        self.live = self.live.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handles_do_not_alias() {
        let mut table: ResourceTable<TextureKey, u32> = ResourceTable::with_key();
        let first = table.insert(1);
        table.remove(first);
        let second = table.insert(2);

        assert!(table.get(first).is_none());
        assert_eq!(table.get(second), Some(&2));
    }

    #[test]
    fn test_allocation_stats() {
        let mut stats = AllocationStats::default();
        stats.record_allocation();
        stats.record_allocation();
        stats.record_release();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.released, 1);
    }
}
