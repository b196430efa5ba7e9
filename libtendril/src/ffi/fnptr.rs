use std::{
    ffi::c_void,
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::atomic::{AtomicPtr, Ordering},
};
use thiserror::Error;
use log::{debug, error, trace};

#[derive(Debug, Error)]
pub enum FnPtrError {
    #[error("Function pointer is NULL")]
    FunctionPtrIsNull,

    #[error("Function pointer has wrong size (does not match *mut c_void)")]
    FunctionPtrSize,

    #[error("Function pointer already published: 0x{0:X}")]
    AlreadyPublished(usize),
}

pub type FnPtrResult<T> = std::result::Result<T, FnPtrError>;

/// A function pointer slot that can be published exactly once.
///
/// The slot starts empty. [`OnceFnPtr::publish`] stores a pointer with a
/// compare-and-swap, so concurrent publishers cannot overwrite each other and
/// readers either see nothing or the complete pointer.
///
/// # Safety Requirements
/// - T must be a function pointer type (e.g., `unsafe extern "C" fn(...)`)
/// - The published pointer must remain valid for the lifetime of the slot
#[derive(Debug)]
pub struct OnceFnPtr<T: Copy + 'static> {
    raw_ptr: AtomicPtr<c_void>,
    _phantom: PhantomData<T>,
}

// Safety: only a raw address is stored, and it is accessed atomically.
// Function pointers are inherently Send + Sync in Rust
unsafe impl<T: Copy + 'static> Send for OnceFnPtr<T> {}
unsafe impl<T: Copy + 'static> Sync for OnceFnPtr<T> {}

impl<T: Copy + 'static> Default for OnceFnPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + 'static> OnceFnPtr<T> {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self {
            raw_ptr: AtomicPtr::new(ptr::null_mut()),
            _phantom: PhantomData,
        }
    }

    /// Publishes `raw_ptr` into the slot.
    ///
    /// Fails if the pointer is null, if `T` is not pointer sized, or if the
    /// slot was already published. The first published value is never
    /// replaced.
    pub fn publish(&self, raw_ptr: *mut c_void) -> FnPtrResult<()> {
        debug!("Publishing function pointer: {:p}", raw_ptr);

        Self::validate_size()?;

        if raw_ptr.is_null() {
            error!("Cannot publish null function pointer");
            return Err(FnPtrError::FunctionPtrIsNull);
        }

        self.raw_ptr
            .compare_exchange(ptr::null_mut(), raw_ptr, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| trace!("Function pointer published"))
            .map_err(|existing| {
                error!("Function pointer already published as {:p}", existing);
                FnPtrError::AlreadyPublished(existing as usize)
            })
    }

    /// Returns the published raw pointer, if any.
    pub fn raw(&self) -> Option<NonNull<c_void>> {
        NonNull::new(self.raw_ptr.load(Ordering::Acquire))
    }

    /// Returns the published pointer as a function of type T.
    ///
    /// # Safety
    /// - The caller must ensure T is the correct function pointer type
    /// - The published pointer must point to a function with that signature
    pub unsafe fn get(&self) -> Option<T> {
        let ptr = self.raw()?;

        if Self::validate_size().is_err() {
            return None;
        }

        let addr = ptr.as_ptr() as usize;

        // Safety: validate_size ensures that T has the same size as a usize, making this transmutation safe.
        Some(unsafe { std::mem::transmute_copy::<usize, T>(&addr) })
    }

    /// Validates that T has the correct size for a function pointer.
    fn validate_size() -> FnPtrResult<()> {
        let type_size = std::mem::size_of::<T>();
        let ptr_size = std::mem::size_of::<usize>();

        if type_size != ptr_size {
            error!("Invalid function pointer type size: {} != {}", type_size, ptr_size);
            return Err(FnPtrError::FunctionPtrSize);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type AddFn = extern "C" fn(u32, u32) -> u32;

    extern "C" fn add(a: u32, b: u32) -> u32 {
        a + b
    }

    extern "C" fn sub(a: u32, b: u32) -> u32 {
        a - b
    }

    #[test]
    fn test_empty_slot() {
        let slot = OnceFnPtr::<AddFn>::new();
        assert!(slot.raw().is_none());
        assert!(unsafe { slot.get() }.is_none());
    }

    #[test]
    fn test_publish_and_call() {
        let slot = OnceFnPtr::<AddFn>::new();
        slot.publish(add as *mut c_void).unwrap();

        let f = unsafe { slot.get() }.unwrap();
        assert_eq!(f(2, 3), 5);
    }

    #[test]
    fn test_publish_is_one_shot() {
        let slot = OnceFnPtr::<AddFn>::new();
        slot.publish(add as *mut c_void).unwrap();

        let err = slot.publish(sub as *mut c_void).unwrap_err();
        assert!(matches!(err, FnPtrError::AlreadyPublished(addr) if addr == add as usize));

        let f = unsafe { slot.get() }.unwrap();
        assert_eq!(f(7, 3), 10);
    }

    #[test]
    fn test_null_rejected() {
        let slot = OnceFnPtr::<AddFn>::new();
        assert!(matches!(
            slot.publish(ptr::null_mut()),
            Err(FnPtrError::FunctionPtrIsNull)
        ));
        assert!(slot.raw().is_none());
    }

    #[test]
    fn test_wrong_size_rejected() {
        let slot = OnceFnPtr::<[usize; 2]>::new();
        assert!(matches!(
            slot.publish(add as *mut c_void),
            Err(FnPtrError::FunctionPtrSize)
        ));
    }

    #[test]
    fn test_concurrent_publishers_single_winner() {
        let slot = OnceFnPtr::<AddFn>::new();

        let wins = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let slot = &slot;
                    scope.spawn(move || {
                        let f: AddFn = if i % 2 == 0 { add } else { sub };
                        slot.publish(f as *mut c_void).is_ok()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });

        assert_eq!(wins, 1);
        assert!(slot.raw().is_some());
    }
}
