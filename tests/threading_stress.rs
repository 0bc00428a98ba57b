//! Thread stress tests for tracealloc.
//!
//! Exercises the registry under heavy concurrent allocation and release,
//! verifying that the aggregate counters stay exactly consistent and that
//! no list node is lost or duplicated.

use std::sync::{Arc, Barrier, Mutex, MutexGuard};
use std::thread;

use tracealloc::{stats, trace_free, trace_malloc};

// The counter-delta assertions below need the registry to themselves.
static LOCK: Mutex<()> = Mutex::new(());

fn serialize() -> MutexGuard<'static, ()> {
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Wrapper to send payload pointers across threads. The tracer is
/// thread-safe; only ownership moves (one thread allocates, another frees).
#[derive(Clone, Copy)]
struct SendPtr(*mut u8);
unsafe impl Send for SendPtr {}

fn stress_alloc_free_n_threads(num_threads: usize) {
    const ITERATIONS: usize = 2_000;
    const ALLOC_SIZE: usize = 128;

    let _guard = serialize();
    tracealloc::init();
    let before = stats();

    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ITERATIONS {
                    let p = trace_malloc(ALLOC_SIZE);
                    assert!(!p.is_null(), "allocation returned null under contention");
                    unsafe {
                        std::ptr::write_bytes(p, 0xCC, ALLOC_SIZE);
                        trace_free(p);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked during stress");
    }

    let after = stats();
    let cycles = (num_threads * ITERATIONS) as u64;
    assert_eq!(after.allocation_count, before.allocation_count + cycles);
    assert_eq!(after.release_count, before.release_count + cycles);
    assert_eq!(after.live_count(), before.live_count());
    assert_eq!(after.live_bytes(), before.live_bytes());
}

#[test]
fn stress_alloc_free_4_threads() {
    stress_alloc_free_n_threads(4);
}

#[test]
fn stress_alloc_free_8_threads() {
    stress_alloc_free_n_threads(8);
}

#[test]
fn stress_cross_thread_free() {
    const PER_THREAD: usize = 500;
    const PRODUCERS: usize = 4;

    let _guard = serialize();
    tracealloc::init();
    let before = stats();

    // Producers allocate, a single consumer frees everything.
    let (tx, rx) = std::sync::mpsc::channel::<SendPtr>();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|t| {
            let tx = tx.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let size = 16 + ((t * 31 + i) % 240);
                    let p = trace_malloc(size);
                    assert!(!p.is_null());
                    tx.send(SendPtr(p)).expect("consumer hung up");
                }
            })
        })
        .collect();
    drop(tx);

    let consumer = thread::spawn(move || {
        let mut freed = 0usize;
        while let Ok(SendPtr(p)) = rx.recv() {
            unsafe { trace_free(p) };
            freed += 1;
        }
        freed
    });

    for p in producers {
        p.join().expect("producer panicked");
    }
    let freed = consumer.join().expect("consumer panicked");
    assert_eq!(freed, PRODUCERS * PER_THREAD);

    let after = stats();
    assert_eq!(after.live_count(), before.live_count());
    assert_eq!(after.live_bytes(), before.live_bytes());
}

#[test]
fn stress_mixed_sizes_with_outstanding_set() {
    const ITERATIONS: usize = 300;
    const THREADS: usize = 4;

    let _guard = serialize();
    tracealloc::init();
    let before = stats();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut outstanding: Vec<SendPtr> = Vec::new();
                for i in 0..ITERATIONS {
                    let size = 1 + ((i * 7 + t * 13) % 2048);
                    let p = trace_malloc(size);
                    assert!(!p.is_null());
                    outstanding.push(SendPtr(p));

                    // Free half of what accumulates, oldest first.
                    if outstanding.len() > 8 {
                        let SendPtr(victim) = outstanding.remove(0);
                        unsafe { trace_free(victim) };
                    }
                }
                for SendPtr(p) in outstanding {
                    unsafe { trace_free(p) };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("thread panicked");
    }

    let after = stats();
    assert_eq!(after.live_count(), before.live_count());
    assert_eq!(after.live_bytes(), before.live_bytes());
}
