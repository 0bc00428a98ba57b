//! C ABI surface: the six interposed allocator symbols plus the ELF
//! constructor/destructor hooks.
//!
//! Built only with the `hook` feature. Preloading the cdylib makes these
//! definitions shadow libc's for the whole process; each shim forwards
//! straight into the interception layer, which lazily resolves the real
//! allocator on first use.

use std::ffi::c_void;

use crate::api::trace;
use crate::config;
use crate::diagnostics::signal;
use crate::report;

#[no_mangle]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    trace::trace_malloc(size) as *mut c_void
}

#[no_mangle]
pub extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    trace::trace_calloc(nmemb, size) as *mut c_void
}

#[no_mangle]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    trace::trace_realloc(ptr as *mut u8, size) as *mut c_void
}

#[no_mangle]
pub extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    trace::trace_memalign(alignment, size) as *mut c_void
}

#[no_mangle]
pub extern "C" fn valloc(size: usize) -> *mut c_void {
    trace::trace_valloc(size) as *mut c_void
}

#[no_mangle]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    trace::trace_free(ptr as *mut u8);
}

/// Library constructor: runs before `main`, installs the fatal-signal
/// backtrace handlers. Allocator initialization itself stays lazy so it
/// happens on whichever call first needs it.
#[used]
#[link_section = ".init_array"]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn startup() {
        signal::install();
    }
    startup
};

/// Library destructor: runs at process teardown and reports everything
/// still live. Report-only unless TRACEALLOC_AUTO_RELEASE asked otherwise.
#[used]
#[link_section = ".fini_array"]
static DTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn shutdown() {
        report::shutdown(config::auto_release());
    }
    shutdown
};
