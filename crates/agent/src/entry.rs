//! `DllMain` for the injected module
//!
//! Attach does nothing beyond spawning the install thread, since the loader
//! lock is held. Detach under `FreeLibrary` only disables hooks: waiting for
//! task chains or unloading plugin libraries is not allowed there. The full
//! teardown runs through [`HooklineShutdown`], which a controller calls on a
//! thread of its own before unloading the module. Process termination
//! leaves everything as is.

#![allow(unsafe_code)]

use crate::runtime::{Agent, bootstrap};
use hookline_engine::{DetourBackend, HookManager};
use std::ffi::{OsString, c_void};
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;
use std::sync::Mutex;
use windows_sys::Win32::Foundation::{BOOL, HINSTANCE, MAX_PATH, TRUE};
use windows_sys::Win32::System::LibraryLoader::{DisableThreadLibraryCalls, GetModuleFileNameW};
use windows_sys::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};
use windows_sys::Win32::UI::WindowsAndMessaging::{MB_ICONERROR, MB_OK, MessageBoxW};

static AGENT: Mutex<Option<Agent<DetourBackend>>> = Mutex::new(None);

/// Module entry point
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(module: HINSTANCE, reason: u32, reserved: *mut c_void) -> BOOL {
    match reason {
        DLL_PROCESS_ATTACH => {
            // SAFETY: `module` is the handle the loader passed for this image.
            unsafe {
                DisableThreadLibraryCalls(module);
            }
            let module_dir = module_directory(module);
            let spawned = std::thread::Builder::new()
                .name("hookline-install".into())
                .spawn(move || install(&module_dir));
            if spawned.is_err() {
                show_error("hookline could not start its install thread");
            }
        }
        DLL_PROCESS_DETACH => {
            if reserved.is_null() {
                detach();
            }
        }
        _ => {}
    }
    TRUE
}

fn install(module_dir: &std::path::Path) {
    let make_hooks = |settings: &hookline_config::Settings| {
        HookManager::new(DetourBackend::new()).with_quiesce_timeout(settings.quiesce_timeout())
    };

    match bootstrap(module_dir, make_hooks) {
        Ok(agent) => {
            if let Ok(mut slot) = AGENT.lock() {
                *slot = Some(agent);
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "hookline failed to install");
            show_error(&format!("hookline failed to install:\n{e}"));
        }
    }
}

fn take_agent() -> Option<Agent<DetourBackend>> {
    match AGENT.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    }
}

/// Release every hook and plugin
///
/// Has the signature of a thread start routine so it can be run with
/// `CreateRemoteThread`. Must not be called from `DllMain`. Returns 1 when an
/// agent was shut down, 0 when none was installed.
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "system" fn HooklineShutdown(_parameter: *mut c_void) -> u32 {
    match take_agent() {
        Some(mut agent) => {
            agent.shutdown();
            1
        }
        None => 0,
    }
}

fn detach() {
    if let Some(mut agent) = take_agent() {
        agent.disable_hooks();
        // Dropping would wait for task chains and free plugin libraries
        std::mem::forget(agent);
    }
}

fn module_directory(module: HINSTANCE) -> PathBuf {
    let mut buffer = vec![0u16; MAX_PATH as usize];
    loop {
        let capacity = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        // SAFETY: the buffer holds `capacity` u16 values.
        let len = unsafe { GetModuleFileNameW(module, buffer.as_mut_ptr(), capacity) } as usize;
        if len == 0 {
            return PathBuf::from(".");
        }
        if len < buffer.len() {
            let path = PathBuf::from(OsString::from_wide(&buffer[..len]));
            return path
                .parent()
                .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
        }
        buffer.resize(buffer.len() * 2, 0);
    }
}

fn wide(text: &str) -> Vec<u16> {
    std::ffi::OsStr::new(text)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn show_error(message: &str) {
    let text = wide(message);
    let caption = wide("hookline");
    // SAFETY: both strings are NUL terminated and outlive the call.
    unsafe {
        MessageBoxW(
            std::ptr::null_mut(),
            text.as_ptr(),
            caption.as_ptr(),
            MB_OK | MB_ICONERROR,
        );
    }
}
