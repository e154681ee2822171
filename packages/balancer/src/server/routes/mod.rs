// HTTP routes
pub mod admission;
pub mod health;

pub use admission::*;
pub use health::*;
