pub mod series;
pub mod features;

pub use series::*;
pub use features::*;
