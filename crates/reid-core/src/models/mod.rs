//! Domain models.

pub mod detection;
pub mod embedding;
pub mod investigation;
pub mod location;
pub mod verification;

pub use detection::*;
pub use embedding::*;
pub use investigation::*;
pub use location::*;
pub use verification::*;
