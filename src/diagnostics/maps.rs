//! Process memory map dump.
//!
//! Streams `/proc/self/maps` to stderr with raw file descriptors so it can
//! run late in teardown or next to a fatal report without touching the heap.

/// Dump the current memory map to stderr. Silently does nothing if the maps
/// pseudo-file cannot be opened (non-Linux, restricted /proc).
pub fn dump() {
    unsafe {
        let banner = b"[tracealloc] memory map:\n";
        libc::write(
            libc::STDERR_FILENO,
            banner.as_ptr() as *const libc::c_void,
            banner.len(),
        );

        let path = b"/proc/self/maps\0";
        let fd = libc::open(path.as_ptr() as *const libc::c_char, libc::O_RDONLY);
        if fd < 0 {
            return;
        }

        let mut buffer = [0u8; 2048];
        loop {
            let read = libc::read(fd, buffer.as_mut_ptr() as *mut libc::c_void, buffer.len());
            if read <= 0 {
                break;
            }
            libc::write(
                libc::STDERR_FILENO,
                buffer.as_ptr() as *const libc::c_void,
                read as usize,
            );
        }

        libc::close(fd);
    }
}
