//! Tree configuration.
//!
//! Page geometry is owned by the external allocator; the constants here bound
//! what the on-page format can address. `TreeConfig` carries the per-tree
//! tuning knobs with defaults suitable for ordinary workloads.

/// Default page size handed out by [`MemAllocator::new`](crate::MemAllocator::new).
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page the format supports: header plus two fence blocks plus a
/// couple of entries.
pub const MIN_PAGE_SIZE: usize = 128;

/// On-page offsets are u16; 32 KiB is the largest power-of-two page size
/// they can address.
pub const MAX_PAGE_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Adopt foster children into their parents on the way back up from a
    /// write. Disabling this leaves foster chains in place until an outer
    /// engine drives adoption itself; reads and scans work either way.
    pub adopt_on_write: bool,

    /// A leaf is considered underfull when its live entry bytes drop below
    /// `usable_space / underfull_divisor`, triggering merge or rebalance on
    /// delete. The default marks leaves below a quarter full.
    pub underfull_divisor: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            adopt_on_write: true,
            underfull_divisor: 4,
        }
    }
}
