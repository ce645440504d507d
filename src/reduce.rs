//! Combine functions for scan-family collectives.
//!
//! A collective never interprets element bytes itself. Scans fold received
//! data through a caller-supplied [`ReduceFn`]; [`reduce_fn`] builds one of the
//! usual element-wise combines for a [`DataType`].

use crate::types::{DataType, ReduceOp};
use std::sync::Arc;

/// Associative combine: fold `nelems` elements of `src` into `dst`.
///
/// Both slices hold exactly `nelems` elements.
pub type ReduceFn = Arc<dyn Fn(&mut [u8], &[u8], usize) + Send + Sync>;

/// Trait for types that support the four reduction operations.
trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

/// Read a value from a little-endian byte slice (alignment-safe).
trait LeBytes: Sized {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {
        $(
            impl LeBytes for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Self::from_le_bytes(raw)
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_bytes!(i8, i32, i64, u8, u32, u64, f32, f64);

fn reduce_slice_typed<T: Reducible + LeBytes>(
    dst: &mut [u8],
    src: &[u8],
    nelems: usize,
    op: ReduceOp,
) {
    for (d, s) in dst
        .chunks_exact_mut(T::SIZE)
        .zip(src.chunks_exact(T::SIZE))
        .take(nelems)
    {
        let a = T::read_le(d);
        let b = T::read_le(s);
        T::reduce(a, b, op).write_le(d);
    }
}

/// Element-wise combine on byte slices interpreted as `dtype` elements.
pub(crate) fn reduce_slice(dst: &mut [u8], src: &[u8], nelems: usize, dtype: DataType, op: ReduceOp) {
    match dtype {
        DataType::F32 => reduce_slice_typed::<f32>(dst, src, nelems, op),
        DataType::F64 => reduce_slice_typed::<f64>(dst, src, nelems, op),
        DataType::I8 => reduce_slice_typed::<i8>(dst, src, nelems, op),
        DataType::I32 => reduce_slice_typed::<i32>(dst, src, nelems, op),
        DataType::I64 => reduce_slice_typed::<i64>(dst, src, nelems, op),
        DataType::U8 => reduce_slice_typed::<u8>(dst, src, nelems, op),
        DataType::U32 => reduce_slice_typed::<u32>(dst, src, nelems, op),
        DataType::U64 => reduce_slice_typed::<u64>(dst, src, nelems, op),
    }
}

/// Build a [`ReduceFn`] applying `op` to `dtype` elements.
pub fn reduce_fn(dtype: DataType, op: ReduceOp) -> ReduceFn {
    Arc::new(move |dst: &mut [u8], src: &[u8], nelems: usize| {
        reduce_slice(dst, src, nelems, dtype, op)
    })
}
