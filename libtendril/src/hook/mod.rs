pub mod errors;
pub mod installer;
pub mod sizing;

pub use errors::*;
pub use installer::*;
pub use sizing::*;
