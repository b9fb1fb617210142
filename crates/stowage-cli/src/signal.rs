use std::sync::atomic::{AtomicBool, Ordering};

/// Raised by the first interrupt. The repair engine polls it between volumes,
/// drains its uploads and returns a result marked interrupted.
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Route SIGINT/SIGTERM (Ctrl-C, Ctrl-Break and console close on Windows)
/// to the stop flag and return it.
///
/// Only the first interrupt is caught. The default disposition is put back
/// so a second one kills the process.
pub(crate) fn install_stop_handler() -> &'static AtomicBool {
    #[cfg(unix)]
    // Safety: the handler only stores to an atomic and resets the disposition.
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTERM] {
            libc::signal(sig, on_unix_signal as *const () as libc::sighandler_t);
        }
    }

    #[cfg(windows)]
    // Safety: registering a plain function pointer.
    unsafe {
        windows_sys::Win32::System::Console::SetConsoleCtrlHandler(Some(on_console_event), 1);
    }

    &STOP_REQUESTED
}

#[cfg(unix)]
extern "C" fn on_unix_signal(sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}

#[cfg(windows)]
unsafe extern "system" fn on_console_event(event: u32) -> i32 {
    // CTRL_C_EVENT, CTRL_BREAK_EVENT, CTRL_CLOSE_EVENT
    if event > 2 {
        return 0;
    }
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    windows_sys::Win32::System::Console::SetConsoleCtrlHandler(Some(on_console_event), 0);
    1
}
