//! libtendril
//! Core primitives for the tendril instrumentation engine.
//!
//! The crate answers two questions a hook installer has to ask before it
//! touches a live process: how many leading instructions of a function can be
//! relocated without cutting through a branch, and how to get at the
//! platform pieces (symbols, environment blocks, hook primitive) that the
//! spawn hook needs to propagate the engine into new processes.

// Only Unix-like targets expose posix_spawn and the dlopen family
#[cfg(not(unix))]
compile_error!("Unsupported OS - tendril only supports Unix-like targets");

pub mod arch;
pub mod ffi;
pub mod hook;
pub mod memory;
