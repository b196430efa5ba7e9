use std::ffi::{CStr, CString, NulError, OsStr};
use std::marker::PhantomData;
use std::os::unix::ffi::OsStrExt;
use std::ptr;

use libc::c_char;
use thiserror::Error;

/// Default capacity of a working environment block, in bytes of pointer slots.
pub const ENV_BLOCK_CAPACITY_BYTES: usize = 0x4000;

const SLOT_SIZE: usize = std::mem::size_of::<*const c_char>();

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Environment block overflow: {needed} slots needed, capacity is {capacity}")]
    Overflow { needed: usize, capacity: usize },

    #[error("Environment capacity of {0} bytes cannot hold a terminator")]
    CapacityTooSmall(usize),

    #[error("Interior nul bytes found: {0}")]
    NulError(#[from] NulError),
}

pub type EnvResult<T> = std::result::Result<T, EnvError>;

/// Bounded, null-terminated environment vector.
///
/// Entries are either borrowed from a caller's `envp` (lifetime `'a`) or owned
/// by the block. The slot array always ends with a null pointer and never
/// holds more than `capacity_bytes / size_of::<*const c_char>()` slots,
/// terminator included.
#[derive(Debug)]
pub struct EnvBlock<'a> {
    slots: Vec<*const c_char>,
    owned: Vec<CString>,
    max_slots: usize,
    _borrowed: PhantomData<&'a CStr>,
}

impl<'a> EnvBlock<'a> {
    /// Creates an empty block bounded to `capacity_bytes` of pointer slots.
    pub fn with_capacity_bytes(capacity_bytes: usize) -> EnvResult<Self> {
        let max_slots = capacity_bytes / SLOT_SIZE;

        if max_slots == 0 {
            return Err(EnvError::CapacityTooSmall(capacity_bytes));
        }

        let mut slots = Vec::with_capacity(max_slots);
        slots.push(ptr::null());

        Ok(Self {
            slots,
            owned: Vec::new(),
            max_slots,
            _borrowed: PhantomData,
        })
    }

    /// Copies the entries of a caller's `envp` into a new block.
    ///
    /// Only pointer slots up to the terminating null are read. A null `envp`
    /// yields an empty block.
    ///
    /// # Safety
    /// `envp` must be null or point to a null-terminated array of valid C
    /// strings which outlive `'a`.
    pub unsafe fn from_raw(envp: *const *const c_char, capacity_bytes: usize) -> EnvResult<Self> {
        let mut block = Self::with_capacity_bytes(capacity_bytes)?;

        if envp.is_null() {
            return Ok(block);
        }

        let mut count = 0;
        while !unsafe { *envp.add(count) }.is_null() {
            count += 1;
        }

        let needed = count + 1;
        if needed > block.max_slots {
            return Err(EnvError::Overflow {
                needed,
                capacity: block.max_slots,
            });
        }

        let entries = unsafe { std::slice::from_raw_parts(envp, count) };
        block.slots.clear();
        block.slots.extend_from_slice(entries);
        block.slots.push(ptr::null());

        Ok(block)
    }

    /// Appends an owned entry before the terminator.
    pub fn push(&mut self, entry: CString) -> EnvResult<()> {
        let needed = self.slots.len() + 1;

        if needed > self.max_slots {
            return Err(EnvError::Overflow {
                needed,
                capacity: self.max_slots,
            });
        }

        // CString keeps its heap buffer when moved, so the slot stays valid
        let terminator = self.slots.len() - 1;
        self.slots.insert(terminator, entry.as_ptr());
        self.owned.push(entry);

        Ok(())
    }

    /// Number of entries, terminator excluded.
    pub fn len(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the entries in order.
    pub fn iter(&self) -> impl Iterator<Item = &CStr> + '_ {
        self.slots[..self.len()]
            .iter()
            // Safety: every slot before the terminator is a valid C string,
            // either borrowed for 'a or owned by self
            .map(|entry| unsafe { CStr::from_ptr(*entry) })
    }

    /// Pointer to the null-terminated slot array, shaped for `posix_spawn`.
    ///
    /// Valid while the block is alive and not modified.
    pub fn as_envp(&self) -> *const *mut c_char {
        self.slots.as_ptr().cast()
    }
}

/// Builds a `NAME=value` environment entry.
pub fn env_entry(name: &str, value: &OsStr) -> EnvResult<CString> {
    let mut bytes = Vec::with_capacity(name.len() + 1 + value.len());
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(b'=');
    bytes.extend_from_slice(value.as_bytes());

    Ok(CString::new(bytes)?)
}
