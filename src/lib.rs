pub mod clustering;
pub mod dense;
pub mod metrics;
pub mod similarity;
pub mod sparse;
mod utils;

pub use utils::BatchIdentifier;
pub use utils::Direction;
pub use utils::FloatOps;
pub use utils::NanPolicy;
