use super::{BranchKind, INSN_WIDTH, InstructionSet};

/// asm: b #0
pub const B_BASE: u32 = 0x1400_0000;

/// asm: bl #0
pub const BL_BASE: u32 = 0x9400_0000;

/// asm: b.eq #0
pub const B_COND_BASE: u32 = 0x5400_0000;

/// asm: pacibsp
/// Stored in memory as `7F 23 03 D5`.
pub const PACIBSP: u32 = 0xD503_237F;

/// Bit 25 is the top bit of imm26 for B and BL, so a backward branch carries
/// a different 7-bit prefix than a forward one.
const IMM26_SIGN: u32 = 1 << 25;

/// Families in match order, each with its 7-bit reference prefixes.
const FAMILIES: [(BranchKind, &[u32]); 3] = [
    (
        BranchKind::Unconditional,
        &[top7(B_BASE), top7(B_BASE | IMM26_SIGN)],
    ),
    (BranchKind::Link, &[top7(BL_BASE), top7(BL_BASE | IMM26_SIGN)]),
    (BranchKind::Conditional, &[top7(B_COND_BASE)]),
];

const fn top7(word: u32) -> u32 {
    word >> 25
}

/// AArch64 (A64) classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct Arm64;

impl InstructionSet for Arm64 {
    fn name(&self) -> &'static str {
        "arm64"
    }

    fn decode(&self, bytes: [u8; INSN_WIDTH]) -> u32 {
        // A64 code is always little-endian in memory
        u32::from_be_bytes(bytes).swap_bytes()
    }

    fn classify(&self, word: u32) -> Option<BranchKind> {
        let prefix = top7(word);

        FAMILIES
            .iter()
            .find(|(_, patterns)| patterns.contains(&prefix))
            .map(|(kind, _)| *kind)
    }

    fn is_prologue_marker(&self, word: u32) -> bool {
        word == PACIBSP
    }
}
