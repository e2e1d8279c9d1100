//! The null-terminated array of NUL-terminated strings consumed by execve.

use std::ffi::{c_char, CString};

/// A container owning a list of C strings plus a null-terminated pointer
/// array into them, suitable for passing as argv or envp. The pointer array
/// is built once and stays valid because the strings are never moved or
/// mutated after construction.
pub struct OwningNullTerminatedArray {
    strings: Box<[CString]>,
    pointers: Box<[*const c_char]>,
}

// Safety: immutable after construction; the raw pointers point into our own
// boxed strings.
unsafe impl Send for OwningNullTerminatedArray {}
unsafe impl Sync for OwningNullTerminatedArray {}

impl OwningNullTerminatedArray {
    /// Construct, taking ownership of the strings.
    pub fn new(strs: Vec<CString>) -> Self {
        let strings = strs.into_boxed_slice();
        let mut pointers = Vec::with_capacity(strings.len() + 1);
        for s in strings.iter() {
            pointers.push(s.as_ptr());
        }
        pointers.push(std::ptr::null());
        OwningNullTerminatedArray {
            strings,
            pointers: pointers.into_boxed_slice(),
        }
    }

    /// The pointer array, for envp or argv. The caller may rearrange entries
    /// but not modify string contents; exec interfaces want mutable pointers
    /// even though nothing is mutated.
    pub fn get(&self) -> *mut *const c_char {
        debug_assert!(self.pointers.last().unwrap().is_null());
        self.pointers.as_ptr().cast_mut()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CString> {
        self.strings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::OwningNullTerminatedArray;
    use std::ffi::{CStr, CString};
    use std::ptr;

    #[test]
    fn test_owning_null_terminated_array() {
        let owned_strs = vec![CString::new("foo").unwrap(), CString::new("bar").unwrap()];
        let arr = OwningNullTerminatedArray::new(owned_strs);
        let ptr = arr.get();
        unsafe {
            assert_eq!(CStr::from_ptr(*ptr).to_str().unwrap(), "foo");
            assert_eq!(CStr::from_ptr(*ptr.add(1)).to_str().unwrap(), "bar");
            assert_eq!(*ptr.add(2), ptr::null());
        }
        assert_eq!(arr.len(), 2);
    }
}
