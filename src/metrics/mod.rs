//! Neighbourhood mixing metrics for judging how well batches are integrated.

mod simpson;

pub use simpson::{simpson_index, SimpsonConfig};
