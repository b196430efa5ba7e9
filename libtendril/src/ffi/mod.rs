pub mod dl;
pub mod envblock;
pub mod fnptr;

pub use dl::*;
pub use envblock::*;
pub use fnptr::*;
