use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

use anyhow::bail;
use num_traits::{Float, FromPrimitive, NumCast};

/// Floating point element type accepted by every reduction and clustering routine.
pub trait FloatOps:
    Float
    + NumCast
    + FromPrimitive
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Sum
    + Debug
    + Display
    + Send
    + Sync
    + 'static
{
}

impl<T> FloatOps for T where
    T: Float
        + NumCast
        + FromPrimitive
        + AddAssign
        + SubAssign
        + MulAssign
        + DivAssign
        + Sum
        + Debug
        + Display
        + Send
        + Sync
        + 'static
{
}

/// Axis selector. `ROW` operates on each row, `COLUMN` on each column.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ROW,
    COLUMN,
}

impl Direction {
    /// Maps the integer axis flag used by older callers: `1` selects rows,
    /// `0` and `2` both select columns.
    pub fn from_dim(dim: i32) -> anyhow::Result<Self> {
        match dim {
            1 => Ok(Direction::ROW),
            0 | 2 => Ok(Direction::COLUMN),
            other => bail!("Unknown axis flag {}, expected 0, 1 or 2", other),
        }
    }
}

/// What to do with non-finite values in a computed result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NanPolicy {
    /// Hand `NaN`/`inf` back to the caller untouched.
    #[default]
    Propagate,
    /// Fail as soon as the result contains a non-finite value.
    Reject,
}

impl NanPolicy {
    pub fn check<'a, T, I>(&self, values: I, what: &str) -> anyhow::Result<()>
    where
        T: FloatOps + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        if *self == NanPolicy::Propagate {
            return Ok(());
        }
        if let Some((idx, v)) = values.into_iter().enumerate().find(|(_, v)| !v.is_finite()) {
            bail!("{} contains a non-finite value ({}) at flat index {}", what, v, idx);
        }
        Ok(())
    }
}

/// Trait for types that can be used to identify batches
pub trait BatchIdentifier: Clone + Eq + Hash {}

impl BatchIdentifier for String {}
impl BatchIdentifier for &str {}
impl BatchIdentifier for i32 {}
impl BatchIdentifier for u32 {}
impl BatchIdentifier for usize {}
