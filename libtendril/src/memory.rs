use libc::c_void;
use region::Protection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Invalid size parameter")]
    InvalidSize,

    #[error("Input PTR is NULL")]
    InputNullPtr,

    #[error("Invalid memory range: base=0x{0:X}, size={1}")]
    InvalidMemoryRange(usize, usize),

    #[error("Memory not mapped at address 0x{0:X}")]
    NotMapped(usize),

    #[error("Memory at 0x{0:X} is not readable and executable")]
    NotExecutable(usize),

    #[error("Region query failed: {0}")]
    Query(#[from] region::Error),
}

pub type MemoryResult<T> = std::result::Result<T, MemoryError>;

/// Validates that `size` bytes starting at `ptr` are mapped, readable and
/// executable. Every page of the range is checked, so a window straddling a
/// region border is only accepted if both regions qualify.
pub fn validate_executable_range(ptr: *const c_void, size: usize) -> MemoryResult<()> {
    if ptr.is_null() {
        return Err(MemoryError::InputNullPtr);
    }

    if size == 0 {
        return Err(MemoryError::InvalidSize);
    }

    let start = ptr as usize;
    let end = start
        .checked_add(size)
        .ok_or(MemoryError::InvalidMemoryRange(start, size))?;

    let mut cursor = start;

    for region in region::query_range(ptr, size)? {
        let region = region?;
        let range = region.as_range();

        // A hole between two regions means part of the window is unmapped
        if range.start > cursor {
            return Err(MemoryError::NotMapped(cursor));
        }

        if !region.protection().contains(Protection::READ_EXECUTE) {
            return Err(MemoryError::NotExecutable(cursor));
        }

        cursor = cursor.max(range.end);

        if cursor >= end {
            return Ok(());
        }
    }

    Err(MemoryError::NotMapped(cursor))
}
