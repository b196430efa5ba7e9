//! Per-architecture instruction classification.
//!
//! Sizing a hook only needs to know where control flow leaves a function's
//! prologue, so an [`InstructionSet`] classifies nothing but branch families.
//! New targets plug in here without touching the size oracle.

use std::fmt::Debug;

pub mod arm64;

/// Width in bytes of one instruction on the supported fixed-width targets.
pub const INSN_WIDTH: usize = 4;

/// Branch families the classifier recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// Unconditional branch. The only family treated as a function boundary.
    Unconditional,

    /// Branch with link, e.g. a call.
    Link,

    /// Conditional branch.
    Conditional,
}

impl BranchKind {
    /// Returns `true` if relocating instructions past this branch is unsafe.
    pub fn is_boundary(self) -> bool {
        matches!(self, BranchKind::Unconditional)
    }
}

/// Fixed-width instruction set able to classify branch instructions.
///
/// Implementations must be pure: the same word always yields the same answer.
pub trait InstructionSet: Send + Sync + Debug {
    /// Short name for logging.
    fn name(&self) -> &'static str;

    /// Normalizes 4 bytes, as laid out in memory, into an instruction word.
    fn decode(&self, bytes: [u8; INSN_WIDTH]) -> u32;

    /// Classifies a normalized instruction word.
    fn classify(&self, word: u32) -> Option<BranchKind>;

    /// Returns `true` for compiler-emitted prologue markers which must be
    /// skipped rather than classified.
    fn is_prologue_marker(&self, word: u32) -> bool;
}

/// Architectures with a classifier implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Arch {
    #[default]
    Arm64,
}

impl Arch {
    /// Architecture of the running process, if a classifier exists for it.
    pub fn host() -> Option<Self> {
        #[cfg(target_arch = "aarch64")]
        {
            Some(Arch::Arm64)
        }

        #[cfg(not(target_arch = "aarch64"))]
        {
            None
        }
    }

    /// Returns the classifier for this architecture.
    pub fn instruction_set(self) -> &'static dyn InstructionSet {
        match self {
            Arch::Arm64 => &arm64::Arm64,
        }
    }
}
