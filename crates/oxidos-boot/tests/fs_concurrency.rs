//! Multi-thread file-system scenarios. The software timer is armed so
//! threads genuinely interleave inside file-system operations, exercising
//! the hand-over-hand directory locks, the free-map lock and the open-file
//! registry under contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use oxidos_boot::{boot, BootOptions, System};
use oxidos_machine::ConsoleSink;
use tempfile::TempDir;

fn booted(timer: Option<u64>) -> (System, TempDir) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut opts = BootOptions::new(dir.path().join("DISK"))
        .format(true)
        .console_sink(ConsoleSink::Buffer(Vec::new()));
    if let Some(interval) = timer {
        opts = opts.timer_interval(interval);
    }
    (boot(opts).unwrap(), dir)
}

#[test]
fn multilevel_stress_across_seven_threads() {
    let (system, _dir) = booted(Some(7));
    let kernel = system.kernel;
    let free_at_start = kernel.fs.free_sectors().unwrap();
    let failures = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for w in 0..7 {
        let k = kernel.clone();
        let fails = failures.clone();
        let tid = kernel.threads.fork(&format!("worker {w}"), 0, true, move || {
            let dir = format!("/w{w}");
            let fs = &k.fs;
            let result = (|| -> Result<bool, oxidos_kernel::FsError> {
                fs.create(&dir, 0, true)?;
                fs.change_directory(&dir)?;

                let payload: Vec<u8> = b"1234567890".repeat(100);
                for f in 0..5 {
                    let name = format!("file{f}");
                    fs.create(&name, 0, false)?;
                    let mut file = fs.open(&name)?;
                    file.write(&payload)?;

                    file.seek(0);
                    let mut back = vec![0u8; payload.len()];
                    let n = file.read(&mut back)?;
                    if n != payload.len() || back != payload {
                        return Ok(false);
                    }
                    drop(file);
                    fs.remove(&name)?;
                }
                fs.change_directory("/")?;
                fs.remove(&dir)?;
                Ok(true)
            })();
            if !matches!(result, Ok(true)) {
                eprintln!("worker {w} failed: {result:?}");
                fails.fetch_add(1, Ordering::SeqCst);
            }
        });
        workers.push(tid);
    }

    for tid in workers {
        assert_eq!(kernel.threads.join(tid), Some(0));
    }
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(kernel.fs.free_sectors().unwrap(), free_at_start);
    assert_eq!(kernel.fs.list("/").unwrap(), Vec::<String>::new());
}

#[test]
fn deferred_removal_between_threads() {
    let (system, _dir) = booted(Some(5));
    let kernel = system.kernel;
    let fs = &kernel.fs;

    fs.create("/f", 0, false).unwrap();
    let mut reader = fs.open("/f").unwrap();
    reader.write(b"payload").unwrap();

    let k = kernel.clone();
    let remover = kernel.threads.fork("remover", 0, true, move || {
        // removing while the other thread holds a handle defers the delete
        k.fs.remove("/f").unwrap();
        assert!(matches!(
            k.fs.open("/f"),
            Err(oxidos_kernel::FsError::PendingRemoval)
        ));
    });
    assert_eq!(kernel.threads.join(remover), Some(0));

    // the surviving handle still reads the previously written bytes
    reader.seek(0);
    let mut back = [0u8; 7];
    assert_eq!(reader.read(&mut back).unwrap(), 7);
    assert_eq!(&back, b"payload");

    let free_before_close = fs.free_sectors().unwrap();
    drop(reader);
    assert!(matches!(
        fs.open("/f"),
        Err(oxidos_kernel::FsError::NotFound)
    ));
    assert!(fs.free_sectors().unwrap() > free_before_close);
}

#[test]
fn concurrent_writers_on_one_name_serialize() {
    let (system, _dir) = booted(Some(3));
    let kernel = system.kernel;
    kernel.fs.create("/log", 0, false).unwrap();

    // Each writer lays down its whole stripe at its own offset; the shared
    // reader/writer lock serializes the sector-level read-modify-write, so
    // stripes never tear even though they share sectors.
    let mut writers = Vec::new();
    for w in 0..4u8 {
        let k = kernel.clone();
        writers.push(kernel.threads.fork(&format!("writer {w}"), 0, true, move || {
            let mut file = k.fs.open("/log").unwrap();
            let stripe = vec![b'a' + w; 100];
            file.write_at(&stripe, w as u32 * 100).unwrap();
        }));
    }
    for tid in writers {
        assert_eq!(kernel.threads.join(tid), Some(0));
    }

    let mut file = kernel.fs.open("/log").unwrap();
    let mut all = vec![0u8; 400];
    assert_eq!(file.read_at(&mut all, 0).unwrap(), 400);
    for w in 0..4u8 {
        let stripe = &all[w as usize * 100..(w as usize + 1) * 100];
        assert!(stripe.iter().all(|&b| b == b'a' + w), "stripe {w} torn");
    }
}

#[test]
fn directories_in_distinct_subtrees_do_not_block_each_other() {
    let (system, _dir) = booted(Some(4));
    let kernel = system.kernel;
    kernel.fs.create("/left", 0, true).unwrap();
    kernel.fs.create("/right", 0, true).unwrap();

    let mut threads = Vec::new();
    for (side, count) in [("left", 8u32), ("right", 8u32)] {
        let k = kernel.clone();
        threads.push(kernel.threads.fork(side, 0, true, move || {
            for i in 0..count {
                k.fs.create(&format!("/{side}/n{i}"), 0, false).unwrap();
            }
        }));
    }
    for tid in threads {
        assert_eq!(kernel.threads.join(tid), Some(0));
    }
    assert_eq!(kernel.fs.list("/left").unwrap().len(), 8);
    assert_eq!(kernel.fs.list("/right").unwrap().len(), 8);
}
