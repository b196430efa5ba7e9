//! Function size oracle
//!
//! Before a detour is written over a function entry the installer needs to
//! know how much of the prologue can be relocated. We do not analyse the whole
//! function: it is enough to confirm that the first few instructions are free
//! of an unconditional branch, because anything after such a branch may
//! belong to a different control path (a stub, or a long branch that is
//! already there).

use libc::c_void;
use log::{debug, trace};

use super::errors::{SizingError, SizingResult};
use crate::arch::{Arch, INSN_WIDTH, InstructionSet};
use crate::memory::validate_executable_range;

/// Number of instructions inspected from the function entry.
///
/// Exceeds the longest absolute-address trampoline on the supported targets
/// (`ldr x16, #8; br x16; .quad addr` is 4 words on AArch64).
pub const SCAN_WINDOW_INSNS: usize = 5;

/// Size of the inspected window in bytes.
pub const SCAN_WINDOW_BYTES: usize = SCAN_WINDOW_INSNS * INSN_WIDTH;

/// Finds safe relocation lengths using an architecture's classifier.
#[derive(Debug, Clone, Copy)]
pub struct FunctionSizer {
    isa: &'static dyn InstructionSet,
}

impl Default for FunctionSizer {
    fn default() -> Self {
        Self::new(Arch::default())
    }
}

impl FunctionSizer {
    pub fn new(arch: Arch) -> Self {
        Self {
            isa: arch.instruction_set(),
        }
    }

    /// Sizer for the architecture of the running process.
    pub fn for_host() -> SizingResult<Self> {
        Arch::host()
            .map(Self::new)
            .ok_or(SizingError::UnsupportedArchitecture(std::env::consts::ARCH))
    }

    /// Scans an in-memory instruction window.
    ///
    /// Returns `Some(n)` when instructions `0..n` may be relocated, with the
    /// unconditional branch at index `n - 1` being the last of them, or
    /// `None` if the window holds no unconditional branch. Only whole
    /// instructions within the first [`SCAN_WINDOW_BYTES`] are considered.
    pub fn scan(&self, window: &[u8]) -> Option<usize> {
        let window = &window[..window.len().min(SCAN_WINDOW_BYTES)];

        for (index, chunk) in window.chunks_exact(INSN_WIDTH).enumerate() {
            let mut bytes = [0u8; INSN_WIDTH];
            bytes.copy_from_slice(chunk);

            let word = self.isa.decode(bytes);

            if self.isa.is_prologue_marker(word) {
                trace!("[{}] #{} {:#010x}: prologue marker", self.isa.name(), index, word);
                continue;
            }

            let kind = self.isa.classify(word);
            trace!("[{}] #{} {:#010x}: {:?}", self.isa.name(), index, word, kind);

            if kind.is_some_and(|kind| kind.is_boundary()) {
                return Some(index + 1);
            }
        }

        None
    }

    /// Reads the window at `target` and scans it.
    ///
    /// # Safety
    /// `target` must point to at least [`SCAN_WINDOW_BYTES`] bytes of mapped,
    /// readable memory. Nothing is validated here, use
    /// [`FunctionSizer::find_function_size_checked`] when that is not known.
    pub unsafe fn find_function_size(&self, target: *const c_void) -> Option<usize> {
        let window = unsafe { target.cast::<[u8; SCAN_WINDOW_BYTES]>().read_unaligned() };

        let size = self.scan(&window);
        debug!("Function size at {:p}: {:?}", target, size);

        size
    }

    /// Validates that the window at `target` is mapped executable memory,
    /// then reads and scans it.
    pub fn find_function_size_checked(&self, target: *const c_void) -> SizingResult<Option<usize>> {
        validate_executable_range(target, SCAN_WINDOW_BYTES)?;

        // Safety: the whole window was just validated as mapped and readable
        Ok(unsafe { self.find_function_size(target) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::{B_BASE, B_COND_BASE, BL_BASE, PACIBSP};
    use crate::memory::MemoryError;

    const NOP: u32 = 0xD503_201F;
    // mov x29, sp
    const MOV_FP_SP: u32 = 0x9100_03FD;

    fn window(words: [u32; SCAN_WINDOW_INSNS]) -> [u8; SCAN_WINDOW_BYTES] {
        let mut bytes = [0u8; SCAN_WINDOW_BYTES];
        for (chunk, word) in bytes.chunks_exact_mut(INSN_WIDTH).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_branch_at_index_two() {
        let sizer = FunctionSizer::new(Arch::Arm64);
        let bytes = window([NOP, MOV_FP_SP, B_BASE | 0x10, NOP, NOP]);
        assert_eq!(sizer.scan(&bytes), Some(3));
    }

    #[test]
    fn test_no_branch() {
        let sizer = FunctionSizer::new(Arch::Arm64);
        let bytes = window([NOP, MOV_FP_SP, NOP, NOP, NOP]);
        assert_eq!(sizer.scan(&bytes), None);
    }

    #[test]
    fn test_signing_marker_does_not_block() {
        let sizer = FunctionSizer::new(Arch::Arm64);
        let bytes = window([PACIBSP, NOP, B_BASE, NOP, NOP]);
        assert_eq!(sizer.scan(&bytes), Some(3));
    }

    #[test]
    fn test_calls_and_conditionals_do_not_stop_scan() {
        let sizer = FunctionSizer::new(Arch::Arm64);

        let bytes = window([BL_BASE | 0x20, B_COND_BASE | 0x41, NOP, NOP, B_BASE]);
        assert_eq!(sizer.scan(&bytes), Some(5));

        let bytes = window([BL_BASE, B_COND_BASE, NOP, NOP, NOP]);
        assert_eq!(sizer.scan(&bytes), None);
    }

    #[test]
    fn test_first_branch_wins() {
        let sizer = FunctionSizer::new(Arch::Arm64);
        let bytes = window([B_BASE, NOP, B_BASE, NOP, NOP]);
        assert_eq!(sizer.scan(&bytes), Some(1));
    }

    #[test]
    fn test_window_is_bounded() {
        let sizer = FunctionSizer::new(Arch::Arm64);

        let mut bytes = window([NOP; SCAN_WINDOW_INSNS]).to_vec();
        bytes.extend_from_slice(&B_BASE.to_le_bytes());
        assert_eq!(sizer.scan(&bytes), None);

        // Trailing partial word is ignored
        let mut bytes = NOP.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(sizer.scan(&bytes), None);
    }

    #[test]
    fn test_read_from_pointer() {
        let sizer = FunctionSizer::default();
        let bytes = window([PACIBSP, MOV_FP_SP, NOP, B_BASE, NOP]);

        let size = unsafe { sizer.find_function_size(bytes.as_ptr().cast()) };
        assert_eq!(size, Some(4));
    }

    #[test]
    fn test_concurrent_callers() {
        let sizer = FunctionSizer::default();
        let bytes = window([NOP, NOP, B_BASE, NOP, NOP]);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        assert_eq!(sizer.scan(&bytes), Some(3));
                    }
                });
            }
        });
    }

    #[test]
    fn test_checked_rejects_data_memory() {
        let sizer = FunctionSizer::default();
        let bytes = window([NOP, NOP, B_BASE, NOP, NOP]).to_vec();

        let err = sizer
            .find_function_size_checked(bytes.as_ptr().cast())
            .unwrap_err();
        assert!(matches!(
            err,
            SizingError::UnreadableTarget(MemoryError::NotExecutable(_))
        ));
    }

    #[test]
    fn test_checked_rejects_null() {
        let sizer = FunctionSizer::default();
        assert!(matches!(
            sizer.find_function_size_checked(std::ptr::null()),
            Err(SizingError::UnreadableTarget(MemoryError::InputNullPtr))
        ));
    }

    #[inline(never)]
    extern "C" fn sized_target(a: u64, b: u64) -> u64 {
        a.wrapping_mul(31).wrapping_add(b)
    }

    #[test]
    fn test_checked_accepts_code() {
        assert_eq!(sized_target(1, 2), 33);

        let sizer = FunctionSizer::default();
        assert!(sizer.find_function_size_checked(sized_target as *const c_void).is_ok());
    }

    #[test]
    fn test_for_host() {
        let sizer = FunctionSizer::for_host();

        #[cfg(target_arch = "aarch64")]
        assert!(sizer.is_ok());

        #[cfg(not(target_arch = "aarch64"))]
        assert!(matches!(sizer, Err(SizingError::UnsupportedArchitecture(_))));
    }
}
