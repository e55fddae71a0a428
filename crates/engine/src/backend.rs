//! Hooking backend abstraction
//!
//! The manager never touches executable memory directly. Everything that
//! writes code or redirects functions goes through [`HookBackend`]:
//! - `DetourBackend`: real detours via `retour` and the Win32 memory API (Windows only)
//! - [`RecordingBackend`]: keeps everything in memory, for tests and offline checks

use crate::error::{HookError, HookResult};
use std::collections::{BTreeMap, HashMap};

/// Operations the hook manager needs from a detour library
pub trait HookBackend: Send {
    /// Prepare the library; called once before any hook is created
    fn initialize(&mut self) -> HookResult;

    /// Remove every remaining detour and release the library
    fn uninitialize(&mut self) -> HookResult;

    /// Allocate `size` bytes of executable memory
    fn allocate_executable(&mut self, size: usize) -> HookResult<usize>;

    /// Copy machine code to `address` and make it visible to the CPU
    fn write_code(&mut self, address: usize, bytes: &[u8]) -> HookResult;

    /// Redirect `target` to `detour` (disabled); returns the trampoline
    fn create_hook(&mut self, target: usize, detour: usize) -> HookResult<usize>;

    /// Activate the redirect at `target`
    fn enable_hook(&mut self, target: usize) -> HookResult;

    /// Deactivate the redirect at `target`
    fn disable_hook(&mut self, target: usize) -> HookResult;

    /// Forget the redirect at `target`, restoring the original code
    fn remove_hook(&mut self, target: usize) -> HookResult;

    /// Give up the redirect at `target` without freeing its trampoline
    ///
    /// Used when a thread may still return into the trampoline. The redirect
    /// should already be disabled.
    fn leak_hook(&mut self, target: usize) -> HookResult;
}

/// A backend operation, as recorded by [`RecordingBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    /// `initialize`
    Initialize,
    /// `uninitialize`
    Uninitialize,
    /// `allocate_executable` and the address handed out
    Allocate { address: usize, size: usize },
    /// `write_code`
    WriteCode { address: usize, len: usize },
    /// `create_hook`
    Create { target: usize, detour: usize },
    /// `enable_hook`
    Enable(usize),
    /// `disable_hook`
    Disable(usize),
    /// `remove_hook`
    Remove(usize),
    /// `leak_hook`
    Leak(usize),
}

/// State of a detour inside [`RecordingBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedHook {
    /// Where the target was redirected to
    pub detour: usize,
    /// Trampoline handed back
    pub trampoline: usize,
    /// Whether the redirect is active
    pub enabled: bool,
}

const ARENA_BASE: usize = 0x1000_0000;
const TRAMPOLINE_BASE: usize = 0x2000_0000;

/// In-memory backend that records every call
///
/// Executable allocations are plain buffers at synthetic addresses, so stub
/// contents can be inspected after installation. Failures can be injected per
/// target address.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    initialized: bool,
    calls: Vec<BackendCall>,
    arena: BTreeMap<usize, Vec<u8>>,
    hooks: HashMap<usize, RecordedHook>,
    leaked: HashMap<usize, RecordedHook>,
    next_allocation: usize,
    next_trampoline: usize,
    fail_create: Option<usize>,
    fail_enable: Option<usize>,
}

impl RecordingBackend {
    /// Create a backend with no hooks
    pub fn new() -> Self {
        Self {
            next_allocation: ARENA_BASE,
            next_trampoline: TRAMPOLINE_BASE,
            ..Self::default()
        }
    }

    /// Make `create_hook` fail for `target`
    #[must_use]
    pub fn failing_create(mut self, target: usize) -> Self {
        self.fail_create = Some(target);
        self
    }

    /// Make `enable_hook` fail for `target`
    #[must_use]
    pub fn failing_enable(mut self, target: usize) -> Self {
        self.fail_enable = Some(target);
        self
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Current detour at `target`
    pub fn hook(&self, target: usize) -> Option<RecordedHook> {
        self.hooks.get(&target).copied()
    }

    /// Number of live detours
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// Detour given up with `leak_hook`, trampoline still valid
    pub fn leaked(&self, target: usize) -> Option<RecordedHook> {
        self.leaked.get(&target).copied()
    }

    /// Whether `initialize` has been called without a matching `uninitialize`
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Contents of the allocation starting at `address`
    pub fn code_at(&self, address: usize) -> Option<&[u8]> {
        self.arena.get(&address).map(Vec::as_slice)
    }

    fn require_initialized(&self, address: usize) -> HookResult {
        if self.initialized {
            Ok(())
        } else {
            Err(HookError::CreateFailed {
                address,
                message: "backend not initialized".into(),
            })
        }
    }
}

impl HookBackend for RecordingBackend {
    fn initialize(&mut self) -> HookResult {
        self.calls.push(BackendCall::Initialize);
        if self.initialized {
            return Err(HookError::InitFailed("already initialized".into()));
        }
        self.initialized = true;
        Ok(())
    }

    fn uninitialize(&mut self) -> HookResult {
        self.calls.push(BackendCall::Uninitialize);
        self.hooks.clear();
        self.initialized = false;
        Ok(())
    }

    fn allocate_executable(&mut self, size: usize) -> HookResult<usize> {
        if size == 0 {
            return Err(HookError::StubAllocation("zero-sized allocation".into()));
        }
        if self.next_allocation == 0 {
            self.next_allocation = ARENA_BASE;
        }
        let address = self.next_allocation;
        self.next_allocation += size.next_multiple_of(16);
        self.arena.insert(address, vec![0xCC; size]);
        self.calls.push(BackendCall::Allocate { address, size });
        Ok(address)
    }

    fn write_code(&mut self, address: usize, bytes: &[u8]) -> HookResult {
        self.calls.push(BackendCall::WriteCode {
            address,
            len: bytes.len(),
        });

        let Some((&start, block)) = self.arena.range_mut(..=address).next_back() else {
            return Err(HookError::StubAllocation(format!(
                "{address:#x} is not inside an executable allocation"
            )));
        };
        let offset = address - start;
        let end = offset + bytes.len();
        if end > block.len() {
            return Err(HookError::StubAllocation(format!(
                "write of {} bytes at {address:#x} overruns allocation at {start:#x}",
                bytes.len()
            )));
        }
        block[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    fn create_hook(&mut self, target: usize, detour: usize) -> HookResult<usize> {
        self.calls.push(BackendCall::Create { target, detour });
        self.require_initialized(target)?;

        if self.fail_create == Some(target) {
            return Err(HookError::CreateFailed {
                address: target,
                message: "injected failure".into(),
            });
        }
        if self.hooks.contains_key(&target) {
            return Err(HookError::AlreadyExists(target));
        }

        if self.next_trampoline == 0 {
            self.next_trampoline = TRAMPOLINE_BASE;
        }
        let trampoline = self.next_trampoline;
        self.next_trampoline += 0x40;
        self.hooks.insert(
            target,
            RecordedHook {
                detour,
                trampoline,
                enabled: false,
            },
        );
        Ok(trampoline)
    }

    fn enable_hook(&mut self, target: usize) -> HookResult {
        self.calls.push(BackendCall::Enable(target));
        if self.fail_enable == Some(target) {
            return Err(HookError::EnableFailed {
                address: target,
                message: "injected failure".into(),
            });
        }
        let hook = self.hooks.get_mut(&target).ok_or(HookError::NotFound(target))?;
        hook.enabled = true;
        Ok(())
    }

    fn disable_hook(&mut self, target: usize) -> HookResult {
        self.calls.push(BackendCall::Disable(target));
        let hook = self.hooks.get_mut(&target).ok_or(HookError::NotFound(target))?;
        hook.enabled = false;
        Ok(())
    }

    fn remove_hook(&mut self, target: usize) -> HookResult {
        self.calls.push(BackendCall::Remove(target));
        self.hooks
            .remove(&target)
            .map(|_| ())
            .ok_or(HookError::NotFound(target))
    }

    fn leak_hook(&mut self, target: usize) -> HookResult {
        self.calls.push(BackendCall::Leak(target));
        let hook = self.hooks.remove(&target).ok_or(HookError::NotFound(target))?;
        self.leaked.insert(target, hook);
        Ok(())
    }
}

#[cfg(windows)]
pub use native::DetourBackend;

#[cfg(windows)]
#[allow(unsafe_code)]
mod native {
    use super::HookBackend;
    use crate::error::{HookError, HookResult};
    use retour::RawDetour;
    use std::collections::HashMap;
    use std::ffi::c_void;
    use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualAlloc,
        VirtualProtect,
    };
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    /// Detour owned by the backend, which only moves between threads under the manager's lock
    struct SendDetour(RawDetour);

    // SAFETY: RawDetour holds raw code pointers into this process; it is only
    // used behind `&mut self` of the backend.
    unsafe impl Send for SendDetour {}

    /// Inline detours through `retour`
    #[derive(Default)]
    pub struct DetourBackend {
        initialized: bool,
        detours: HashMap<usize, SendDetour>,
    }

    impl DetourBackend {
        /// Create an uninitialized backend
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl HookBackend for DetourBackend {
        fn initialize(&mut self) -> HookResult {
            if self.initialized {
                return Err(HookError::InitFailed("already initialized".into()));
            }
            self.initialized = true;
            tracing::debug!("Detour backend initialized");
            Ok(())
        }

        fn uninitialize(&mut self) -> HookResult {
            for (target, detour) in self.detours.drain() {
                // SAFETY: the target is still mapped; disabling restores its prologue
                if let Err(e) = unsafe { detour.0.disable() } {
                    tracing::warn!(target = format_args!("{target:#x}"), error = %e, "Failed to disable detour during teardown");
                }
            }
            self.initialized = false;
            Ok(())
        }

        fn allocate_executable(&mut self, size: usize) -> HookResult<usize> {
            // SAFETY: fresh anonymous allocation, no existing memory is touched
            let memory = unsafe {
                VirtualAlloc(
                    std::ptr::null(),
                    size,
                    MEM_COMMIT | MEM_RESERVE,
                    PAGE_EXECUTE_READWRITE,
                )
            };
            if memory.is_null() {
                return Err(HookError::StubAllocation(format!(
                    "VirtualAlloc of {size} bytes failed: {}",
                    std::io::Error::last_os_error()
                )));
            }
            Ok(memory as usize)
        }

        fn write_code(&mut self, address: usize, bytes: &[u8]) -> HookResult {
            let mut old_protect: PAGE_PROTECTION_FLAGS = 0;
            // SAFETY: `address` was returned by allocate_executable with room for `bytes`
            unsafe {
                if VirtualProtect(
                    address as *const c_void,
                    bytes.len(),
                    PAGE_EXECUTE_READWRITE,
                    &mut old_protect,
                ) == 0
                {
                    return Err(HookError::StubAllocation(format!(
                        "VirtualProtect at {address:#x} failed: {}",
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

        fn create_hook(&mut self, target: usize, detour: usize) -> HookResult<usize> {
            if !self.initialized {
                return Err(HookError::CreateFailed {
                    address: target,
                    message: "backend not initialized".into(),
                });
            }
            if self.detours.contains_key(&target) {
                return Err(HookError::AlreadyExists(target));
            }

            // SAFETY: target is a function entry supplied by configuration and
            // detour is a stub built for it
            let raw = unsafe { RawDetour::new(target as *const (), detour as *const ()) }
                .map_err(|e| HookError::CreateFailed {
                    address: target,
                    message: e.to_string(),
                })?;
            let trampoline = std::ptr::from_ref(raw.trampoline()) as usize;
            self.detours.insert(target, SendDetour(raw));
            Ok(trampoline)
        }

        fn enable_hook(&mut self, target: usize) -> HookResult {
            let detour = self.detours.get(&target).ok_or(HookError::NotFound(target))?;
            // SAFETY: the stub and its dispatch entry exist before enabling
            unsafe { detour.0.enable() }.map_err(|e| HookError::EnableFailed {
                address: target,
                message: e.to_string(),
            })
        }

        fn disable_hook(&mut self, target: usize) -> HookResult {
            let detour = self.detours.get(&target).ok_or(HookError::NotFound(target))?;
            // SAFETY: restores the original prologue of a mapped function
            unsafe { detour.0.disable() }.map_err(|e| HookError::DisableFailed {
                address: target,
                message: e.to_string(),
            })
        }

        fn remove_hook(&mut self, target: usize) -> HookResult {
            self.detours
                .remove(&target)
                .map(drop)
                .ok_or(HookError::NotFound(target))
        }

        fn leak_hook(&mut self, target: usize) -> HookResult {
            let detour = self.detours.remove(&target).ok_or(HookError::NotFound(target))?;
            // Dropping a RawDetour frees its trampoline
            std::mem::forget(detour);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::error::HookErrorKind;

    #[test]
    fn test_recording_lifecycle() {
        let mut backend = RecordingBackend::new();
        backend.initialize().unwrap();
        assert_eq!(
            backend.initialize().unwrap_err().kind(),
            HookErrorKind::InitFailed
        );

        let trampoline = backend.create_hook(0x40_1000, 0x1000_0000).unwrap();
        assert!(!backend.hook(0x40_1000).unwrap().enabled);
        backend.enable_hook(0x40_1000).unwrap();
        assert!(backend.hook(0x40_1000).unwrap().enabled);
        assert_eq!(backend.hook(0x40_1000).unwrap().trampoline, trampoline);

        backend.disable_hook(0x40_1000).unwrap();
        backend.remove_hook(0x40_1000).unwrap();
        assert_eq!(backend.hook_count(), 0);
        assert_eq!(
            backend.remove_hook(0x40_1000).unwrap_err().kind(),
            HookErrorKind::NotFound
        );
    }

    #[test]
    fn test_leaked_hook_keeps_its_trampoline() {
        let mut backend = RecordingBackend::new();
        backend.initialize().unwrap();
        let trampoline = backend.create_hook(0x40_1000, 0x1000_0000).unwrap();
        backend.leak_hook(0x40_1000).unwrap();

        assert_eq!(backend.hook_count(), 0);
        assert_eq!(backend.leaked(0x40_1000).unwrap().trampoline, trampoline);
        backend.uninitialize().unwrap();
        assert!(backend.leaked(0x40_1000).is_some());
        assert_eq!(
            backend.leak_hook(0x40_1000).unwrap_err().kind(),
            HookErrorKind::NotFound
        );
    }

    #[test]
    fn test_code_is_written_into_allocations() {
        let mut backend = RecordingBackend::new();
        let a = backend.allocate_executable(23).unwrap();
        let b = backend.allocate_executable(23).unwrap();
        assert!(b >= a + 23);

        backend.write_code(a, &[0x60, 0x9C]).unwrap();
        backend.write_code(b + 21, &[0xAA, 0xBB]).unwrap();
        assert_eq!(&backend.code_at(a).unwrap()[..2], &[0x60, 0x9C]);
        assert_eq!(&backend.code_at(b).unwrap()[21..], &[0xAA, 0xBB]);

        let err = backend.write_code(b + 22, &[1, 2]).unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::StubAllocation);
        let err = backend.write_code(0x10, &[1]).unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::StubAllocation);
    }

    #[test]
    fn test_create_requires_initialize() {
        let mut backend = RecordingBackend::new();
        let err = backend.create_hook(0x40_1000, 0x1).unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::CreateFailed);
    }
}
