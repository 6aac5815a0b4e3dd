//! Element trait and type tag mapping.
//!
//! This module provides the [`Element`] trait, a sealed trait that maps Rust
//! primitive types to the tags carried by every payload that crosses a worker
//! mailbox. The receiving side checks the tag before it touches the data, so a
//! worker that posts an `f64` buffer can never be handed `i64` bytes.
//!
//! # Supported Types
//!
//! | Rust Type | Tag Value |
//! |-----------|-----------|
//! | `f32`     | 0         |
//! | `f64`     | 1         |
//! | `i32`     | 2         |
//! | `i64`     | 3         |
//! | `u8`      | 4         |
//! | `u32`     | 5         |
//! | `u64`     | 6         |

use crate::ReduceOp;

/// Seals [`Element`] against outside implementations.
mod sealed {
    pub trait Sealed {}
}

/// Tag identifying the element type of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatatypeTag {
    /// 32-bit floating point
    F32,
    /// 64-bit floating point
    F64,
    /// 32-bit signed integer
    I32,
    /// 64-bit signed integer
    I64,
    /// 8-bit unsigned integer
    U8,
    /// 32-bit unsigned integer
    U32,
    /// 64-bit unsigned integer
    U64,
}

/// Trait for types that can be moved through worker group collectives.
///
/// This is a **sealed trait**: it cannot be implemented outside this crate.
/// Supported types: [`f32`], [`f64`], [`i32`], [`i64`], [`u8`], [`u32`], [`u64`].
///
/// # Example
///
/// ```
/// use ferromv::launch;
///
/// let out = launch(2, |group| {
///     let mut data = vec![0u64; 4];
///     if group.is_coordinator() {
///         data.fill(7);
///     }
///     group.broadcast(&mut data, 0)?;
///     Ok(data)
/// })
/// .unwrap();
/// assert_eq!(out[1], vec![7, 7, 7, 7]);
/// ```
pub trait Element: sealed::Sealed + Copy + Send + Default + std::fmt::Debug + 'static {
    /// The datatype tag attached to payloads of this type.
    const TAG: DatatypeTag;

    /// Combine two values under a reduction operation.
    fn combine(self, other: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_float_element {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Element for $ty {
            const TAG: DatatypeTag = $tag;

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => self + other,
                    ReduceOp::Max => self.max(other),
                    ReduceOp::Min => self.min(other),
                    ReduceOp::Prod => self * other,
                }
            }
        }
    };
}

macro_rules! impl_int_element {
    ($ty:ty, $tag:expr) => {
        impl sealed::Sealed for $ty {}
        impl Element for $ty {
            const TAG: DatatypeTag = $tag;

            fn combine(self, other: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => self.wrapping_add(other),
                    ReduceOp::Max => Ord::max(self, other),
                    ReduceOp::Min => Ord::min(self, other),
                    ReduceOp::Prod => self.wrapping_mul(other),
                }
            }
        }
    };
}

impl_float_element!(f32, DatatypeTag::F32);
impl_float_element!(f64, DatatypeTag::F64);
impl_int_element!(i32, DatatypeTag::I32);
impl_int_element!(i64, DatatypeTag::I64);
impl_int_element!(u8, DatatypeTag::U8);
impl_int_element!(u32, DatatypeTag::U32);
impl_int_element!(u64, DatatypeTag::U64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_tags_are_distinct() {
        let tags = [
            f32::TAG,
            f64::TAG,
            i32::TAG,
            i64::TAG,
            u8::TAG,
            u32::TAG,
            u64::TAG,
        ];
        for (i, tag) in tags.iter().enumerate() {
            assert!(!tags[..i].contains(tag), "Tag {tag:?} is shared");
        }
    }

    #[test]
    fn trait_is_implemented() {
        fn assert_element<T: Element>() {}
        assert_element::<f32>();
        assert_element::<f64>();
        assert_element::<i32>();
        assert_element::<i64>();
        assert_element::<u8>();
        assert_element::<u32>();
        assert_element::<u64>();
    }

    #[test]
    fn float_combine() {
        assert_eq!(1.5f64.combine(2.0, ReduceOp::Sum), 3.5);
        assert_eq!(1.5f64.combine(2.0, ReduceOp::Max), 2.0);
        assert_eq!(1.5f64.combine(2.0, ReduceOp::Min), 1.5);
        assert_eq!(1.5f64.combine(2.0, ReduceOp::Prod), 3.0);
    }

    #[test]
    fn integer_combine_wraps_instead_of_panicking() {
        assert_eq!(250u8.combine(10, ReduceOp::Sum), 4);
        assert_eq!(7i32.combine(-3, ReduceOp::Min), -3);
        assert_eq!(7u64.combine(9, ReduceOp::Max), 9);
        assert_eq!(i64::MAX.combine(2, ReduceOp::Prod), -2);
    }
}
