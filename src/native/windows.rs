//! Windows primitives: kill-on-close job object, `TerminateProcess`,
//! `WM_CLOSE` to top-level windows, toolhelp snapshots and working-set size.
//!
//! Raw handles are wrapped in [`OwnedHandle`] (or [`JobObject`]) immediately
//! after they are returned, so every early return closes them.

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;

use windows_sys::Win32::Foundation::{
    BOOL, CloseHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER, HANDLE, HWND,
    INVALID_HANDLE_VALUE, LPARAM, TRUE,
};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW, TH32CS_SNAPPROCESS,
};
use windows_sys::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
    JOBOBJECT_EXTENDED_LIMIT_INFORMATION, JobObjectExtendedLimitInformation,
    SetInformationJobObject,
};
use windows_sys::Win32::System::ProcessStatus::{K32GetProcessMemoryInfo, PROCESS_MEMORY_COUNTERS};
use windows_sys::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_TERMINATE, PROCESS_VM_READ,
    TerminateProcess,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowThreadProcessId, IsWindowVisible, PostMessageW, WM_CLOSE,
};

/// Exit code given to processes terminated by the guardian.
pub(crate) const FORCED_EXIT_CODE: u32 = 1;

/// Kill-on-close job object. Closing the last handle terminates every member.
pub(crate) struct JobObject {
    handle: HANDLE,
}

// The job handle is a kernel object reference usable from any thread.
unsafe impl Send for JobObject {}
unsafe impl Sync for JobObject {}

impl std::fmt::Debug for JobObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobObject").field("handle", &self.handle).finish()
    }
}

impl JobObject {
    /// Creates an anonymous job with `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`.
    pub(crate) fn create_kill_on_close() -> io::Result<Self> {
        let handle = unsafe { CreateJobObjectW(ptr::null(), ptr::null()) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let job = Self { handle };

        let mut info: JOBOBJECT_EXTENDED_LIMIT_INFORMATION = unsafe { mem::zeroed() };
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;
        let ok = unsafe {
            SetInformationJobObject(
                job.handle,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const c_void,
                mem::size_of::<JOBOBJECT_EXTENDED_LIMIT_INFORMATION>() as u32,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(job)
    }

    /// Adds a process (by its live handle) to the job.
    pub(crate) fn assign(&self, process: RawHandle) -> io::Result<()> {
        let ok = unsafe { AssignProcessToJobObject(self.handle, process as HANDLE) };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Closes the job, terminating its members.
    pub(crate) fn close(self) -> io::Result<()> {
        let handle = self.handle;
        mem::forget(self);
        if unsafe { CloseHandle(handle) } == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for JobObject {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

fn open_process(pid: u32, access: u32) -> io::Result<Option<OwnedHandle>> {
    let handle = unsafe { OpenProcess(access, 0, pid) };
    if handle.is_null() {
        let err = io::Error::last_os_error();
        // The pid no longer names a process.
        if err.raw_os_error() == Some(ERROR_INVALID_PARAMETER as i32) {
            return Ok(None);
        }
        return Err(err);
    }
    Ok(Some(unsafe { OwnedHandle::from_raw_handle(handle as RawHandle) }))
}

/// `TerminateProcess` by pid. Returns false if the process is already gone.
pub(crate) fn terminate_pid(pid: u32) -> io::Result<bool> {
    let Some(handle) = open_process(pid, PROCESS_TERMINATE)? else {
        return Ok(false);
    };
    let ok = unsafe { TerminateProcess(handle.as_raw_handle() as HANDLE, FORCED_EXIT_CODE) };
    if ok == 0 {
        let err = io::Error::last_os_error();
        // Access denied here means the process is already exiting.
        if err.raw_os_error() == Some(ERROR_ACCESS_DENIED as i32) {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(true)
}

struct CloseRequest {
    pid: u32,
    posted: usize,
}

unsafe extern "system" fn post_close(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let req = unsafe { &mut *(lparam as *mut CloseRequest) };
    let mut owner = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, &mut owner) };
    if owner == req.pid
        && unsafe { IsWindowVisible(hwnd) } != 0
        && unsafe { PostMessageW(hwnd, WM_CLOSE, 0, 0) } != 0
    {
        req.posted += 1;
    }
    TRUE
}

/// Posts `WM_CLOSE` to every visible top-level window owned by `pid`.
///
/// Returns the number of windows asked to close; zero for console programs.
pub(crate) fn close_main_windows(pid: u32) -> usize {
    let mut req = CloseRequest { pid, posted: 0 };
    unsafe {
        EnumWindows(Some(post_close), &mut req as *mut CloseRequest as LPARAM);
    }
    req.posted
}

/// `(pid, parent_pid)` for every process in a toolhelp snapshot.
pub(crate) fn list_processes() -> io::Result<Vec<(u32, u32)>> {
    let raw = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
    if raw == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }
    let snapshot = unsafe { OwnedHandle::from_raw_handle(raw as RawHandle) };
    let snap = snapshot.as_raw_handle() as HANDLE;

    let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
    entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as u32;

    let mut pairs = Vec::new();
    if unsafe { Process32FirstW(snap, &mut entry) } == 0 {
        return Ok(pairs);
    }
    loop {
        pairs.push((entry.th32ProcessID, entry.th32ParentProcessID));
        if unsafe { Process32NextW(snap, &mut entry) } == 0 {
            break;
        }
    }
    Ok(pairs)
}

/// Working-set size of `pid` in bytes.
pub(crate) fn resident_bytes(pid: u32) -> Option<u64> {
    let handle = open_process(pid, PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_VM_READ).ok()??;
    let mut counters: PROCESS_MEMORY_COUNTERS = unsafe { mem::zeroed() };
    counters.cb = mem::size_of::<PROCESS_MEMORY_COUNTERS>() as u32;
    let ok = unsafe {
        K32GetProcessMemoryInfo(handle.as_raw_handle() as HANDLE, &mut counters, counters.cb)
    };
    (ok != 0).then_some(counters.WorkingSetSize as u64)
}
