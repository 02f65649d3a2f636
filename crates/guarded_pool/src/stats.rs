/// Running statistics for a pool.
///
/// `allocations` and `deallocations` are lifetime totals and never reset; `most_objects` is a
/// high-water mark of `objects_in_use`. None of the counters move when an operation returns an
/// error.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    /// Bytes in each client object.
    pub object_size: usize,

    /// Bytes in each page, including the page link, headers, pads and alignment filler.
    pub page_size: usize,

    /// Blocks currently on the free list.
    pub free_objects: u32,

    /// Blocks currently in client hands.
    pub objects_in_use: u32,

    /// Pages currently owned by the pool.
    pub pages_in_use: u32,

    /// Most blocks in client hands at any one time.
    pub most_objects: u32,

    /// Total successful allocations over the pool's lifetime.
    pub allocations: u32,

    /// Total successful deallocations over the pool's lifetime.
    pub deallocations: u32,
}

impl PoolStats {
    /// Records a successful allocation and refreshes the high-water mark.
    pub(crate) fn on_allocate(&mut self) {
        self.objects_in_use += 1;
        self.allocations += 1;
        self.most_objects = self.most_objects.max(self.objects_in_use);
    }

    /// Records a successful deallocation.
    pub(crate) fn on_free(&mut self) {
        self.objects_in_use -= 1;
        self.deallocations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_water_mark_tracks_the_peak() {
        let mut stats = PoolStats::default();

        stats.on_allocate();
        stats.on_allocate();
        assert_eq!(stats.most_objects, 2);

        stats.on_free();
        assert_eq!(stats.objects_in_use, 1);
        assert_eq!(stats.most_objects, 2);

        stats.on_allocate();
        assert_eq!(stats.most_objects, 2);

        stats.on_allocate();
        assert_eq!(stats.most_objects, 3);
    }

    #[test]
    fn lifetime_totals_only_grow() {
        let mut stats = PoolStats::default();

        for _ in 0..5 {
            stats.on_allocate();
        }
        for _ in 0..5 {
            stats.on_free();
        }

        assert_eq!(stats.allocations, 5);
        assert_eq!(stats.deallocations, 5);
        assert_eq!(stats.objects_in_use, 0);
    }
}
