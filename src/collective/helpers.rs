use std::ops::Range;

/// Integer ceiling of log2(n). Returns 0 for n <= 1.
pub(crate) fn ceil_log2(n: u32) -> u32 {
    if n <= 1 {
        return 0;
    }
    // For n > 1: ceil(log2(n)) = 32 - (n-1).leading_zeros()
    u32::BITS - (n - 1).leading_zeros()
}

/// Shape of the recursive-doubling tree over `nproc` ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TreeShape {
    /// ceil(log2(nproc)): number of contraction levels.
    pub log2nproc: u32,
    /// Half of the smallest power of two >= nproc. Zero when nproc == 1.
    pub midpoint: u32,
}

pub(crate) fn compute_tree(nproc: u32) -> TreeShape {
    let log2nproc = ceil_log2(nproc);
    let midpoint = if nproc <= 1 { 0 } else { (1u32 << log2nproc) / 2 };
    TreeShape {
        log2nproc,
        midpoint,
    }
}

/// Byte range covering `nelems` elements starting at element `offset`.
#[inline]
pub(crate) fn byte_range(offset: usize, nelems: usize, type_size: usize) -> Range<usize> {
    offset * type_size..(offset + nelems) * type_size
}
