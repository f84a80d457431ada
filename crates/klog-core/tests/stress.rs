//! Stress tests for klog-core
//!
//! Concurrent readers against a buffer that keeps moving its storage, and a
//! trigger firing far faster than the appender is scheduled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use klog_core::{scratch_cell, DeferredAppender, KlogConfig, LogBuffer, LogSubsystem, PendingWork};

/// Byte expected at `offset` of the log in these tests
fn pattern(offset: usize) -> u8 {
    (offset % 251) as u8
}

fn chunk(start: usize, len: usize) -> Vec<u8> {
    (start..start + len).map(pattern).collect()
}

/// Readers must only ever see a correct prefix of the final log
fn assert_prefix(bytes: &[u8]) {
    for (offset, byte) in bytes.iter().enumerate() {
        assert_eq!(*byte, pattern(offset), "corrupt byte at offset {offset}");
    }
}

/// Each append in a round doubles the log, so every append moves the storage
#[test]
fn test_readers_during_growth_on_every_append() {
    const NUM_READERS: usize = 8;
    const ROUNDS: usize = 200;
    const MAX_ENTRY: usize = 1024;

    let start = Instant::now();

    for _ in 0..ROUNDS {
        let buffer = Arc::new(LogBuffer::new(1, MAX_ENTRY, None).unwrap());
        let barrier = Arc::new(Barrier::new(NUM_READERS + 1));
        let done = Arc::new(AtomicBool::new(false));
        let mut handles = vec![];

        for _ in 0..NUM_READERS {
            let buffer = Arc::clone(&buffer);
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);

            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut last_len = 0;
                loop {
                    let finished = done.load(Ordering::Acquire);
                    let committed = buffer.committed_offset();
                    let seen = buffer.read_at(0, committed);

                    assert!(seen.len() >= last_len, "committed region shrank");
                    assert_prefix(&seen);
                    last_len = seen.len();

                    if finished {
                        break;
                    }
                }
                last_len
            }));
        }

        barrier.wait();
        let mut committed = 0;
        let mut len = 2;
        while len <= MAX_ENTRY {
            let before = buffer.capacity();
            buffer.append(&chunk(committed, len)).unwrap();
            committed += len;
            assert!(buffer.capacity() > before, "append did not grow the buffer");
            len = committed;
        }
        done.store(true, Ordering::Release);

        for handle in handles {
            assert_eq!(handle.join().unwrap(), committed);
        }
        let stats = buffer.stats();
        assert_eq!(stats.growths, stats.entries);
    }

    let elapsed = start.elapsed();
    println!(
        "{} rounds of growth-on-every-append with {} readers in {:?}",
        ROUNDS, NUM_READERS, elapsed
    );
}

/// Many small appends from a single writer while readers seek and read slices
#[test]
fn test_concurrent_slice_reads_while_growing() {
    const NUM_READERS: usize = 16;
    const APPENDS: usize = 20_000;

    let buffer = Arc::new(LogBuffer::new(1, 16, None).unwrap());
    let barrier = Arc::new(Barrier::new(NUM_READERS + 1));
    let done = Arc::new(AtomicBool::new(false));
    let mut handles = vec![];

    let start = Instant::now();

    for reader_id in 0..NUM_READERS {
        let buffer = Arc::clone(&buffer);
        let barrier = Arc::clone(&barrier);
        let done = Arc::clone(&done);

        handles.push(thread::spawn(move || {
            barrier.wait();
            let mut reads = 0u64;
            let mut out = [0u8; 37];
            while !done.load(Ordering::Acquire) {
                let committed = buffer.committed_offset();
                let offset = (reads as usize * 7 + reader_id) % (committed + 1);
                let n = buffer.read_into(offset as u64, &mut out);
                assert!(offset + n <= buffer.committed_offset());
                for (i, byte) in out[..n].iter().enumerate() {
                    assert_eq!(*byte, pattern(offset + i));
                }
                reads += 1;
            }
            reads
        }));
    }

    barrier.wait();
    let mut committed = 0;
    for i in 0..APPENDS {
        let len = i % 16 + 1;
        buffer.append(&chunk(committed, len)).unwrap();
        committed += len;
    }
    done.store(true, Ordering::Release);

    let total_reads: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let elapsed = start.elapsed();

    assert_eq!(buffer.committed_offset(), committed);
    assert_prefix(&buffer.snapshot());
    println!(
        "{} appends ({} bytes, {} growths) against {} reads in {:?}",
        APPENDS,
        committed,
        buffer.stats().growths,
        total_reads,
        elapsed
    );
}

/// A producer thread hammering the scratch cell against a draining thread
///
/// Every committed entry must be a whole entry, in production order, and
/// nothing is committed that was never produced.
#[test]
fn test_scratch_race_never_commits_torn_entries() {
    const FIRES: u64 = 50_000;

    let (mut writer, reader) = scratch_cell(64);
    let buffer = Arc::new(LogBuffer::new(16, 64, None).unwrap());
    let pending = Arc::new(PendingWork::new());
    let mut appender = DeferredAppender::new(reader, buffer.clone(), pending.clone());
    let done = Arc::new(AtomicBool::new(false));

    let start = Instant::now();

    let drainer = {
        let done = Arc::clone(&done);
        let pending = Arc::clone(&pending);
        thread::spawn(move || {
            loop {
                let finished = done.load(Ordering::Acquire);
                if pending.is_owed() || finished {
                    appender.drain_once().unwrap();
                }
                if finished {
                    break;
                }
                thread::yield_now();
            }
            appender.counters().stats()
        })
    };

    for tick in 1..=FIRES {
        writer.write_with(|out| {
            use std::fmt::Write;
            writeln!(out, "Timer {} hit", tick)
        });
        pending.schedule();
    }
    done.store(true, Ordering::Release);
    let stats = drainer.join().unwrap();

    let log = String::from_utf8(buffer.snapshot().to_vec()).unwrap();
    let mut last = 0;
    let mut lines = 0;
    for line in log.lines() {
        let tick: u64 = line
            .strip_prefix("Timer ")
            .and_then(|rest| rest.strip_suffix(" hit"))
            .and_then(|n| n.parse().ok())
            .unwrap_or_else(|| panic!("torn entry {line:?}"));
        assert!(tick > last && tick <= FIRES);
        last = tick;
        lines += 1;
    }

    // The final drain after `done` always picks up the last entry
    assert_eq!(last, FIRES);
    assert_eq!(lines, stats.committed);
    assert!(stats.committed <= FIRES);
    println!(
        "{} fires, {} committed, {} drains in {:?}",
        FIRES,
        stats.committed,
        stats.drains,
        start.elapsed()
    );
}

/// Full subsystem with a 1ms trigger on a multi-threaded runtime
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fast_trigger_against_appender() {
    klog_logging::init_testing();

    let config = KlogConfig::testing()
        .with_initial_capacity(1)
        .with_trigger_period(Duration::from_millis(1));
    let log = LogSubsystem::start(config).await.unwrap();

    let mut reader = log.reader();
    let poll_start = Instant::now();
    while poll_start.elapsed() < Duration::from_millis(300) {
        let tail = reader.read_remaining();
        assert!(tail.iter().all(|b| b.is_ascii()));
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let stats = log.stop().await.unwrap();
    assert!(stats.ticks() > 0);
    assert!(stats.appender.committed > 0);
    assert!(stats.appender.committed + stats.appender.dropped <= stats.ticks());
    assert_eq!(stats.appender.dropped, 0);
    assert_eq!(stats.buffer.entries, stats.appender.committed);

    reader.seek(0, klog_core::Whence::Start).unwrap();
    let text = String::from_utf8(reader.read_remaining().to_vec()).unwrap();
    assert_eq!(text.lines().count() as u64, stats.appender.committed);
    println!(
        "{} ticks, {} committed, {} superseded, {} coalesced, capacity {}",
        stats.ticks(),
        stats.appender.committed,
        stats.superseded(),
        stats.pending.coalesced,
        stats.buffer.capacity
    );
}
