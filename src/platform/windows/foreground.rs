//! Foreground window introspection via user32

use crate::game_activity::{ForegroundProbe, ForegroundWindow};
use std::mem;
use std::path::Path;
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, HWND, RECT};
use windows::Win32::Graphics::Gdi::{GetMonitorInfoW, MonitorFromWindow, MONITORINFO, MONITOR_DEFAULTTONEAREST};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetDesktopWindow, GetForegroundWindow, GetShellWindow, GetWindowRect, GetWindowThreadProcessId,
};

/// Reads the foreground window with user32
pub struct User32Foreground;

impl ForegroundProbe for User32Foreground {
    fn foreground(&self) -> Option<ForegroundWindow> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.0.is_null() {
            return None;
        }

        Some(ForegroundWindow {
            process_name: process_name(hwnd),
            is_fullscreen: is_fullscreen(hwnd),
        })
    }
}

/// Window rectangle covers its whole monitor
fn is_fullscreen(hwnd: HWND) -> bool {
    // The desktop and shell windows cover the monitor without being games
    let (desktop, shell) = unsafe { (GetDesktopWindow(), GetShellWindow()) };
    if hwnd == desktop || hwnd == shell {
        return false;
    }

    let mut window = RECT::default();
    if unsafe { GetWindowRect(hwnd, &mut window) }.is_err() {
        return false;
    }

    let monitor = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST) };
    let mut info: MONITORINFO = unsafe { mem::zeroed() };
    info.cbSize = mem::size_of::<MONITORINFO>() as u32;
    if !unsafe { GetMonitorInfoW(monitor, &mut info) }.as_bool() {
        return false;
    }

    covers_exactly(&window, &info.rcMonitor)
}

/// Window bounds equal the monitor bounds
///
/// A maximized window overhangs its monitor by the resize border and does
/// not count.
fn covers_exactly(window: &RECT, screen: &RECT) -> bool {
    window.left == screen.left
        && window.top == screen.top
        && window.right == screen.right
        && window.bottom == screen.bottom
}

/// Executable file stem of the window's process
fn process_name(hwnd: HWND) -> Option<String> {
    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
    if pid == 0 {
        return None;
    }

    let process = unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }
        .map_err(|e| log::trace!("OpenProcess({}) failed: {}", pid, e))
        .ok()?;

    let mut buf = [0u16; 1024];
    let mut len = buf.len() as u32;
    let queried = unsafe {
        QueryFullProcessImageNameW(process, PROCESS_NAME_WIN32, PWSTR(buf.as_mut_ptr()), &mut len)
    };
    let _ = unsafe { CloseHandle(process) };
    queried.ok()?;

    let path = String::from_utf16_lossy(&buf[..len as usize]);
    Path::new(&path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}
