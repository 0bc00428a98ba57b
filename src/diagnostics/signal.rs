//! Fatal-signal backtrace printing.
//!
//! The handler may run inside a fault raised by the allocator itself, so it
//! is restricted to async-signal-safe operations: raw `write` calls and a
//! frame-pointer walk. No allocation, no symbolization, no formatting
//! machinery. Frames are printed as raw addresses; `addr2line` on the
//! preloaded binary turns them back into symbols.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::tracker::unit::BACKTRACE_DEPTH;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Install handlers for SIGABRT, SIGSEGV and SIGINT. Idempotent.
pub fn install() {
    if INSTALLED.swap(true, Ordering::AcqRel) {
        return;
    }

    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_signal as extern "C" fn(libc::c_int) as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;

        libc::sigaction(libc::SIGABRT, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGSEGV, &action, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
    }
}

extern "C" fn on_signal(signo: libc::c_int) {
    write_str("signal: ");
    write_dec(signo as u64);
    write_str("\n");

    match signo {
        libc::SIGABRT | libc::SIGSEGV => {
            print_raw_backtrace();
            // Restore the default disposition and re-raise so the process
            // still dies with the original signal.
            unsafe {
                libc::signal(signo, libc::SIG_DFL);
                libc::raise(signo);
            }
        }
        _ => {}
    }
}

fn print_raw_backtrace() {
    write_str("backtrace:\n");
    let mut depth = 0;
    unsafe {
        backtrace::trace_unsynchronized(|frame| {
            write_str("  ");
            write_hex(frame.ip() as u64);
            write_str("\n");
            depth += 1;
            depth < BACKTRACE_DEPTH
        });
    }
}

// Raw stderr writers. `fmt` is not async-signal-safe; these are.

fn write_str(s: &str) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            s.as_ptr() as *const libc::c_void,
            s.len(),
        );
    }
}

fn write_bytes(buf: &[u8]) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
        );
    }
}

fn write_dec(mut value: u64) {
    let mut buf = [0u8; 20];
    let mut pos = buf.len();
    loop {
        pos -= 1;
        buf[pos] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 {
            break;
        }
    }
    write_bytes(&buf[pos..]);
}

fn write_hex(value: u64) {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 18];
    buf[0] = b'0';
    buf[1] = b'x';
    for i in 0..16 {
        let shift = (15 - i) * 4;
        buf[2 + i] = DIGITS[((value >> shift) & 0xf) as usize];
    }
    write_bytes(&buf);
}
