//! Diagnostic collaborators around the tracking core.
//!
//! None of this participates in allocation correctness: the signal handler
//! prints a backtrace for fatal signals, and the maps dump exposes the
//! process memory map for cross-referencing leak addresses.

pub mod maps;
pub mod signal;
