//! Offset table for transient buffers

use std::collections::HashMap;

use super::BufferId;

/// Layout of one per-execution device region
///
/// Maps each transient buffer to a byte offset inside a region of
/// [`MemoryModel::device_memory_block_size`] bytes. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryModel {
    size: usize,
    offsets: HashMap<BufferId, usize>,
}

impl MemoryModel {
    pub(crate) fn new(size: usize, offsets: HashMap<BufferId, usize>) -> Self {
        Self { size, offsets }
    }

    /// Bytes needed for one region
    pub fn device_memory_block_size(&self) -> usize {
        self.size
    }

    /// Offset of `id` inside the region, `None` if the model does not hold it
    pub fn offset_for_buffer(&self, id: BufferId) -> Option<usize> {
        self.offsets.get(&id).copied()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.offsets.contains_key(&id)
    }

    /// Number of buffers placed
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Buffer ids in ascending order
    pub fn buffer_ids(&self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = self.offsets.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let mut offsets = HashMap::new();
        offsets.insert(BufferId(3), 64);
        offsets.insert(BufferId(1), 0);
        let model = MemoryModel::new(128, offsets);

        assert_eq!(model.device_memory_block_size(), 128);
        assert_eq!(model.offset_for_buffer(BufferId(3)), Some(64));
        assert_eq!(model.offset_for_buffer(BufferId(2)), None);
        assert_eq!(model.buffer_ids(), vec![BufferId(1), BufferId(3)]);
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn test_empty_model() {
        let model = MemoryModel::default();
        assert!(model.is_empty());
        assert_eq!(model.device_memory_block_size(), 0);
    }
}
