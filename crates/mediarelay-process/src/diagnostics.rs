//! OS status codes rendered for log messages

use std::io;

/// A known OS status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsCode {
    pub code: u32,
    pub name: &'static str,
    pub description: &'static str,
}

const fn code(code: u32, name: &'static str, description: &'static str) -> OsCode {
    OsCode {
        code,
        name,
        description,
    }
}

/// Win32 error codes seen from process control and named pipes
static WIN32_CODES: &[OsCode] = &[
    code(0, "ERROR_SUCCESS", "The operation completed successfully."),
    code(1, "ERROR_INVALID_FUNCTION", "Incorrect function."),
    code(2, "ERROR_FILE_NOT_FOUND", "The system cannot find the file specified."),
    code(5, "ERROR_ACCESS_DENIED", "Access is denied."),
    code(6, "ERROR_INVALID_HANDLE", "The handle is invalid."),
    code(8, "ERROR_NOT_ENOUGH_MEMORY", "Not enough memory resources are available to process this command."),
    code(31, "ERROR_GEN_FAILURE", "A device attached to the system is not functioning."),
    code(87, "ERROR_INVALID_PARAMETER", "The parameter is incorrect."),
    code(109, "ERROR_BROKEN_PIPE", "The pipe has been ended."),
    code(123, "ERROR_INVALID_NAME", "The filename, directory name, or volume label syntax is incorrect."),
    code(128, "ERROR_WAIT_NO_CHILDREN", "There are no child processes to wait for."),
    code(231, "ERROR_PIPE_BUSY", "All pipe instances are busy."),
    code(232, "ERROR_NO_DATA", "The pipe is being closed."),
    code(233, "ERROR_PIPE_NOT_CONNECTED", "No process is on the other end of the pipe."),
    code(258, "WAIT_TIMEOUT", "The wait operation timed out."),
    code(535, "ERROR_PIPE_CONNECTED", "There is a process on other end of the pipe."),
    code(536, "ERROR_PIPE_LISTENING", "Waiting for a process to open the other end of the pipe."),
    code(1400, "ERROR_INVALID_WINDOW_HANDLE", "Invalid window handle."),
    code(1460, "ERROR_TIMEOUT", "This operation returned because the timeout period expired."),
];

/// Look up a Win32 error code
pub fn lookup_win32(code: u32) -> Option<&'static OsCode> {
    WIN32_CODES.iter().find(|entry| entry.code == code)
}

/// `NAME (code): description`, or the bare code when unknown
pub fn describe_win32(code: u32) -> String {
    match lookup_win32(code) {
        Some(entry) => format!("{} ({}): {}", entry.name, entry.code, entry.description),
        None => format!("Win32 error {} (0x{:08X})", code, code),
    }
}

#[cfg(unix)]
pub fn describe_errno(errno: nix::errno::Errno) -> String {
    format!("{:?} ({}): {}", errno, errno as i32, errno.desc())
}

/// Describe an I/O error using the platform's code table when possible
pub fn describe_io(err: &io::Error) -> String {
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(raw) => describe_errno(nix::errno::Errno::from_raw(raw)),
        #[cfg(windows)]
        Some(raw) => describe_win32(raw as u32),
        _ => err.to_string(),
    }
}
