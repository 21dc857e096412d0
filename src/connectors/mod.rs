pub mod paper;
pub mod synthetic;
pub mod traits;
