// Unit tests for the lock primitives

use super::*;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

// Every lock class must serialize increments from several threads
fn check_mutual_exclusion<L>()
where
    L: LockInterface<u64> + Send + Sync + 'static,
{
    let lock = Arc::new(L::new(0));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lock = lock.clone();
            thread::spawn(move || {
                for _ in 0..2_000 {
                    let mut g = lock.lock();
                    let v = *g;
                    *g = v + 1;
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), 8_000);
}

#[test]
fn test_spin_lock_mutual_exclusion() {
    check_mutual_exclusion::<SpinLock<u64>>();
}

#[test]
fn test_sleep_lock_mutual_exclusion() {
    check_mutual_exclusion::<SleepLock<u64>>();
}

#[test]
fn test_parking_lot_wrapper_mutual_exclusion() {
    check_mutual_exclusion::<ParkingLotMutexWrapper<u64>>();
}

#[test]
fn test_parking_lot_wrapper_never_claims_holding() {
    let l = ParkingLotMutexWrapper::new(0u64);
    assert!(!l.holding());
    let g = l.lock();
    // locked, but the owner is unknown
    assert!(!l.holding());
    thread::scope(|s| {
        s.spawn(|| assert!(!l.holding()));
    });
    drop(g);
    assert!(!l.holding());
}

#[test]
fn test_spin_lock_raii_and_holding() {
    let l = SpinLock::new("test", 0_u32);
    assert!(!l.holding());
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.holding());
    }
    assert!(!l.holding());
    *l.lock() += 1;
    assert_eq!(*l.lock(), 42);
}

#[test]
fn test_spin_try_lock() {
    let l = SpinLock::new("test", 1u8);
    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());
    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn test_spin_holding_is_per_context() {
    let l = SpinLock::new("test", ());
    let _g = l.lock();
    thread::scope(|s| {
        s.spawn(|| assert!(!l.holding()));
    });
    assert!(l.holding());
}

#[test]
#[should_panic(expected = "already held")]
fn test_spin_relock_halts() {
    let l = SpinLock::new("relock", ());
    let _g = l.lock();
    let _g2 = l.lock();
}

#[test]
fn test_sleep_lock_holding() {
    let l = SleepLock::new("content", vec![0u8; 4]);
    assert!(!l.holding());
    let g = l.lock();
    assert!(g.holding());
    assert!(l.is_locked());
    thread::scope(|s| {
        s.spawn(|| {
            assert!(l.is_locked());
            assert!(!l.holding());
            assert!(l.try_lock().is_none());
        });
    });
    drop(g);
    assert!(!l.is_locked());
}

#[test]
fn test_sleep_lock_blocks_until_released() {
    let l = Arc::new(SleepLock::new("content", 0u32));
    let entered = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();

    let mut g = l.lock();
    let waiter = {
        let l = l.clone();
        let entered = entered.clone();
        thread::spawn(move || {
            tx.send(()).unwrap();
            let g = l.lock();
            entered.store(1, Ordering::SeqCst);
            *g
        })
    };

    rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    // the waiter is parked behind us
    assert_eq!(entered.load(Ordering::SeqCst), 0);
    *g = 7;
    drop(g);

    assert_eq!(waiter.join().unwrap(), 7);
    assert_eq!(entered.load(Ordering::SeqCst), 1);
}

#[test]
#[should_panic(expected = "already held")]
fn test_sleep_relock_halts() {
    let l = SleepLock::new("relock", ());
    let _g = l.lock();
    let _g2 = l.lock();
}

#[test]
fn test_context_ids_differ_between_threads() {
    let mine = context_id();
    assert_eq!(mine, context_id());
    let other = thread::spawn(context_id).join().unwrap();
    assert_ne!(mine, other);
    assert_ne!(other, 0);
}
