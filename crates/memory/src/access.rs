//! Reading and writing the hooked process's memory
//!
//! Tasks go through [`ProcessMemory`] so they can be exercised against plain
//! heap buffers. [`NativeMemory`] is the implementation used inside the host.

use hookline_core::{TaskError, TaskResult};

/// Raw memory access within the current process
pub trait ProcessMemory: Send + Sync {
    /// Copy `len` bytes starting at `address`
    fn read(&self, address: usize, len: usize) -> TaskResult<Vec<u8>>;

    /// Overwrite the bytes at `address`, lifting page protection if needed
    fn write(&self, address: usize, bytes: &[u8]) -> TaskResult;
}

/// Direct access to this process's address space
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeMemory;

impl NativeMemory {
    fn check(address: usize, what: &str) -> TaskResult {
        if address == 0 {
            return Err(TaskError::InvalidAddress(format!("null {what} address")));
        }
        Ok(())
    }
}

#[cfg(windows)]
#[allow(unsafe_code)]
impl ProcessMemory for NativeMemory {
    fn read(&self, address: usize, len: usize) -> TaskResult<Vec<u8>> {
        use std::ffi::c_void;
        use windows_sys::Win32::System::Diagnostics::Debug::ReadProcessMemory;
        use windows_sys::Win32::System::Threading::GetCurrentProcess;

        Self::check(address, "source")?;
        let mut buffer = vec![0u8; len];
        let mut read = 0usize;
        // SAFETY: ReadProcessMemory validates the source range and fails
        // instead of faulting; the buffer holds `len` bytes
        let ok = unsafe {
            ReadProcessMemory(
                GetCurrentProcess(),
                address as *const c_void,
                buffer.as_mut_ptr().cast(),
                len,
                &mut read,
            )
        };
        if ok == 0 || read != len {
            return Err(TaskError::CopyFailed(format!(
                "read of {len} bytes at {address:#x} failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(buffer)
    }

    fn write(&self, address: usize, bytes: &[u8]) -> TaskResult {
        use std::ffi::c_void;
        use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
        use windows_sys::Win32::System::Memory::{
            PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualProtect,
        };
        use windows_sys::Win32::System::Threading::GetCurrentProcess;

        Self::check(address, "target")?;
        let mut old_protect: PAGE_PROTECTION_FLAGS = 0;
        // SAFETY: VirtualProtect fails on unmapped pages, so the copy only
        // runs on a committed, writable range
        unsafe {
            if VirtualProtect(
                address as *const c_void,
                bytes.len(),
                PAGE_EXECUTE_READWRITE,
                &mut old_protect,
            ) == 0
            {
                return Err(TaskError::PatchFailed(format!(
                    "cannot make {address:#x} writable: {}",
                    std::io::Error::last_os_error()
                )));
            }
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
            VirtualProtect(
                address as *const c_void,
                bytes.len(),
                old_protect,
                &mut old_protect,
            );
            FlushInstructionCache(GetCurrentProcess(), address as *const c_void, bytes.len());
        }
        Ok(())
    }
}

#[cfg(not(windows))]
#[allow(unsafe_code)]
impl ProcessMemory for NativeMemory {
    fn read(&self, address: usize, len: usize) -> TaskResult<Vec<u8>> {
        Self::check(address, "source")?;
        // SAFETY: the caller's configuration names a readable range of this
        // process; there is no protection query to verify it here
        let source = unsafe { std::slice::from_raw_parts(address as *const u8, len) };
        Ok(source.to_vec())
    }

    fn write(&self, address: usize, bytes: &[u8]) -> TaskResult {
        Self::check(address, "target")?;
        // SAFETY: as for `read`, the range must be mapped and writable
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len()) };
        Ok(())
    }
}
