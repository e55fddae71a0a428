//! Win32 side of injection: process lookup, architecture check, remote load

#![allow(unsafe_code)]

use crate::error::{CommandError, Result};
use std::ffi::{OsStr, c_void};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, Instant};
use windows_sys::Win32::Foundation::{
    BOOL, CloseHandle, FALSE, GetLastError, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::System::Diagnostics::Debug::WriteProcessMemory;
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
    TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows_sys::Win32::System::Memory::{
    MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE, VirtualAllocEx, VirtualFreeEx,
};
use windows_sys::Win32::System::Threading::{
    CreateRemoteThread, GetCurrentProcess, GetExitCodeThread, INFINITE, IsWow64Process,
    LPTHREAD_START_ROUTINE, OpenProcess, PROCESS_CREATE_THREAD, PROCESS_QUERY_INFORMATION,
    PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE, WaitForSingleObject,
};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

struct Handle(HANDLE);

impl Handle {
    fn new(raw: HANDLE, step: &'static str) -> Result<Self> {
        if raw.is_null() || raw == INVALID_HANDLE_VALUE {
            return Err(last_error(step));
        }
        Ok(Self(raw))
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned open by the API that created it.
        unsafe {
            CloseHandle(self.0);
        }
    }
}

fn last_error(step: &'static str) -> CommandError {
    // SAFETY: reads the calling thread's last-error value.
    let code = unsafe { GetLastError() };
    CommandError::InjectionFailed { step, code }
}

fn wide(text: &OsStr) -> Vec<u16> {
    text.encode_wide().chain(std::iter::once(0)).collect()
}

/// Pid of the first process whose executable name matches `name`, ignoring case
pub fn find_process(name: &str) -> Result<Option<u32>> {
    // SAFETY: plain snapshot creation, checked below.
    let snapshot = Handle::new(
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) },
        "CreateToolhelp32Snapshot",
    )?;

    // SAFETY: PROCESSENTRY32W is plain data; all-zero is a valid value.
    let mut entry: PROCESSENTRY32W = unsafe { std::mem::zeroed() };
    entry.dwSize = u32::try_from(std::mem::size_of::<PROCESSENTRY32W>()).unwrap_or(u32::MAX);

    // SAFETY: `entry` is a valid, sized PROCESSENTRY32W.
    let mut more = unsafe { Process32FirstW(snapshot.0, &raw mut entry) } != FALSE;
    while more {
        let len = entry
            .szExeFile
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(entry.szExeFile.len());
        let exe = String::from_utf16_lossy(&entry.szExeFile[..len]);
        if exe.eq_ignore_ascii_case(name) {
            return Ok(Some(entry.th32ProcessID));
        }
        // SAFETY: as above.
        more = unsafe { Process32NextW(snapshot.0, &raw mut entry) } != FALSE;
    }
    Ok(None)
}

/// Poll for `name` until it shows up or `wait` elapses
pub fn wait_for_process(name: &str, wait: Duration) -> Result<u32> {
    let start = Instant::now();
    let mut announced = false;
    loop {
        if let Some(pid) = find_process(name)? {
            tracing::info!(process = %name, pid, "Target process found");
            return Ok(pid);
        }
        if start.elapsed() >= wait {
            return Err(CommandError::ProcessNotFound {
                name: name.to_string(),
                waited_secs: wait.as_secs(),
            });
        }
        if !announced {
            println!("Waiting for {name}...");
            announced = true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn is_wow64(process: HANDLE) -> Result<bool> {
    let mut wow64: BOOL = FALSE;
    // SAFETY: `process` is open with query rights; `wow64` is a valid out pointer.
    if unsafe { IsWow64Process(process, &raw mut wow64) } == FALSE {
        return Err(last_error("IsWow64Process"));
    }
    Ok(wow64 != FALSE)
}

fn arch_name(is_32_bit: bool) -> &'static str {
    if is_32_bit { "x86" } else { "x86_64" }
}

/// Fail unless the target has the injector's pointer width
pub fn check_architecture(pid: u32, name: &str) -> Result<()> {
    // SAFETY: opening with query rights only.
    let process = Handle::new(
        unsafe { OpenProcess(PROCESS_QUERY_INFORMATION, FALSE, pid) },
        "OpenProcess",
    )?;

    let injector_32 = cfg!(target_pointer_width = "32");
    // SAFETY: pseudo handle for this process, never closed.
    let os_64 = !injector_32 || is_wow64(unsafe { GetCurrentProcess() })?;
    let target_32 = !os_64 || is_wow64(process.0)?;

    if target_32 != injector_32 {
        return Err(CommandError::ArchitectureMismatch {
            process: name.to_string(),
            target: arch_name(target_32),
            injector: arch_name(injector_32),
        });
    }
    Ok(())
}

struct RemoteBuffer<'a> {
    process: &'a Handle,
    address: *mut c_void,
}

impl Drop for RemoteBuffer<'_> {
    fn drop(&mut self) {
        // SAFETY: the region was allocated in that process by VirtualAllocEx.
        unsafe {
            VirtualFreeEx(self.process.0, self.address, 0, MEM_RELEASE);
        }
    }
}

/// Load `module` into process `pid` with a remote `LoadLibraryW` call
pub fn inject_library(pid: u32, module: &Path) -> Result<()> {
    let path = wide(module.as_os_str());
    let size = std::mem::size_of_val(path.as_slice());

    // SAFETY: opening with the rights the steps below need.
    let process = Handle::new(
        unsafe {
            OpenProcess(
                PROCESS_CREATE_THREAD
                    | PROCESS_QUERY_INFORMATION
                    | PROCESS_VM_OPERATION
                    | PROCESS_VM_WRITE
                    | PROCESS_VM_READ,
                FALSE,
                pid,
            )
        },
        "OpenProcess",
    )?;

    // SAFETY: fresh read-write allocation in the target, checked below.
    let address = unsafe {
        VirtualAllocEx(
            process.0,
            std::ptr::null(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };
    if address.is_null() {
        return Err(last_error("VirtualAllocEx"));
    }
    let buffer = RemoteBuffer {
        process: &process,
        address,
    };

    let mut written = 0usize;
    // SAFETY: the remote buffer holds `size` bytes and `path` is `size` bytes long.
    let ok = unsafe {
        WriteProcessMemory(
            process.0,
            buffer.address,
            path.as_ptr().cast(),
            size,
            &raw mut written,
        )
    };
    if ok == FALSE || written != size {
        return Err(last_error("WriteProcessMemory"));
    }

    let kernel32 = wide(OsStr::new("kernel32.dll"));
    // SAFETY: kernel32 is mapped at the same address in every process of a
    // session, so its LoadLibraryW is valid as a remote start routine.
    let start: LPTHREAD_START_ROUTINE = unsafe {
        let module = GetModuleHandleW(kernel32.as_ptr());
        if module.is_null() {
            return Err(last_error("GetModuleHandleW"));
        }
        let Some(load_library) = GetProcAddress(module, c"LoadLibraryW".as_ptr().cast()) else {
            return Err(last_error("GetProcAddress"));
        };
        Some(std::mem::transmute::<
            unsafe extern "system" fn() -> isize,
            unsafe extern "system" fn(*mut c_void) -> u32,
        >(load_library))
    };

    // SAFETY: `start` is LoadLibraryW and its argument is the path written above.
    let thread = Handle::new(
        unsafe {
            CreateRemoteThread(
                process.0,
                std::ptr::null(),
                0,
                start,
                buffer.address,
                0,
                std::ptr::null_mut(),
            )
        },
        "CreateRemoteThread",
    )?;

    let mut exit_code = 0u32;
    // SAFETY: `thread` is an open thread handle; `exit_code` is a valid out pointer.
    unsafe {
        WaitForSingleObject(thread.0, INFINITE);
        if GetExitCodeThread(thread.0, &raw mut exit_code) == FALSE {
            return Err(last_error("GetExitCodeThread"));
        }
    }
    drop(buffer);

    if exit_code == 0 {
        return Err(CommandError::LoadLibraryFailed(module.to_path_buf()));
    }
    tracing::info!(pid, module = %module.display(), "Module loaded in target");
    Ok(())
}
