//! Build script for tracealloc.
//!
//! Emits feature-related hints for users building the preload artifact.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_HOOK");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_PARKING_LOT");
    println!("cargo:rerun-if-env-changed=CARGO_FEATURE_DIAGNOSTICS");

    let hook_enabled = env::var("CARGO_FEATURE_HOOK").is_ok();
    let parking_lot_enabled = env::var("CARGO_FEATURE_PARKING_LOT").is_ok();
    let diagnostics_enabled = env::var("CARGO_FEATURE_DIAGNOSTICS").is_ok();

    let target = env::var("TARGET").unwrap_or_default();

    if hook_enabled {
        emit_info("Symbol interposition enabled (hook)");
        emit_note("Preload the cdylib to trace a process:");
        emit_note("  LD_PRELOAD=target/release/libtracealloc.so ./your-program");

        if !target.contains("linux") {
            emit_warning("The hook feature targets Linux (RTLD_NEXT + ELF ctor/dtor)");
            emit_note("The exported symbols will build but interposition is untested here.");
        }
    }

    if parking_lot_enabled {
        emit_info("Using parking_lot for mutexes (faster lock implementation)");
    }

    if diagnostics_enabled {
        emit_info("Per-call trace lines compiled in");
        emit_note("Enable them at runtime with TRACEALLOC_VERBOSE=1");
    }
}

fn emit_info(msg: &str) {
    println!("cargo:warning=[tracealloc] ℹ️  {}", msg);
}

fn emit_note(msg: &str) {
    println!("cargo:warning=[tracealloc]    {}", msg);
}

fn emit_warning(msg: &str) {
    println!("cargo:warning=[tracealloc] ⚠️  {}", msg);
}
