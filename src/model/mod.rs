pub mod baseline;
pub mod features;
pub mod traits;
