//! Multi-threaded behavior of the reactive core.
//!
//! Writers on different threads refresh dependents on their own thread.
//! These tests check that concurrent refreshes coalesce and that no change
//! is lost, whatever the interleaving.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use tether_core::reactive::{Computed, ComputedState, Effect, LifetimeContext, Signal};

const WRITERS: usize = 8;
const WRITES_PER_THREAD: i64 = 200;

fn spawn_writers(cells: &[Signal<i64>]) {
    let barrier = Arc::new(Barrier::new(cells.len()));
    let handles: Vec<_> = cells
        .iter()
        .cloned()
        .map(|cell| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for value in 1..=WRITES_PER_THREAD {
                    cell.set(value).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

fn sum_of(cells: &[Signal<i64>]) -> Computed<i64> {
    let cells = cells.to_vec();
    Computed::new(move || cells.iter().map(|cell| cell.get().unwrap()).sum()).unwrap()
}

#[test]
fn computed_settles_to_latest_values() {
    let cells: Vec<Signal<i64>> = (0..WRITERS).map(|_| Signal::new(0)).collect();
    let sum = sum_of(&cells);

    spawn_writers(&cells);

    assert_eq!(sum.get().unwrap(), WRITERS as i64 * WRITES_PER_THREAD);
    assert_eq!(sum.dependency_count(), WRITERS);

    // Coalescing never makes more evaluations than there were changes.
    let changes = WRITERS * WRITES_PER_THREAD as usize;
    assert!(sum.evaluation_count() <= changes + 1);
}

#[test]
fn effect_observes_final_state() {
    let cells: Vec<Signal<i64>> = (0..WRITERS).map(|_| Signal::new(0)).collect();
    let sum = sum_of(&cells);
    let last_seen = Arc::new(AtomicI64::new(-1));
    let effect = {
        let (sum, last_seen) = (sum.clone(), last_seen.clone());
        Effect::new(move || last_seen.store(sum.get().unwrap(), Ordering::SeqCst)).unwrap()
    };

    spawn_writers(&cells);

    assert_eq!(last_seen.load(Ordering::SeqCst), WRITERS as i64 * WRITES_PER_THREAD);
    assert!(!effect.is_run_queued());
}

#[test]
fn concurrent_readers_share_one_evaluation() {
    let source = Signal::new(1_i64);
    let computed = {
        let source = source.clone();
        Computed::new(move || source.get().unwrap() * 2).unwrap()
    };
    let barrier = Arc::new(Barrier::new(WRITERS));

    let readers: Vec<_> = (0..WRITERS)
        .map(|_| {
            let (computed, barrier) = (computed.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                computed.get().unwrap()
            })
        })
        .collect();

    for reader in readers {
        assert_eq!(reader.join().unwrap(), 2);
    }
    assert_eq!(computed.evaluation_count(), 1);
}

#[test]
fn dispose_races_with_writers_without_leaking_edges() {
    let context = LifetimeContext::new();
    let cells: Vec<Signal<i64>> = (0..WRITERS).map(|_| Signal::new(0)).collect();
    let sum = {
        let cells = cells.clone();
        Computed::new_in(&context, move || {
            cells.iter().map(|cell| cell.get().unwrap()).sum::<i64>()
        })
        .unwrap()
    };

    let disposer = {
        let context = context.clone();
        thread::spawn(move || context.dispose())
    };
    spawn_writers(&cells);
    disposer.join().unwrap();

    assert!(sum.get().is_err());
    assert_eq!(sum.dependency_count(), 0);
    assert!(cells.iter().all(|cell| cell.subscriber_count() == 0));
}

#[test]
fn concurrent_updates_are_not_lost() {
    let counter = Signal::new(0_i64);
    let barrier = Arc::new(Barrier::new(WRITERS));

    let handles: Vec<_> = (0..WRITERS)
        .map(|_| {
            let (counter, barrier) = (counter.clone(), barrier.clone());
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..WRITES_PER_THREAD {
                    counter.update(|value| value + 1).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(counter.get().unwrap(), WRITERS as i64 * WRITES_PER_THREAD);
}

/// Lets a test hold an evaluation open at a known point.
struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    arrivals: AtomicUsize,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            open: Mutex::new(true),
            opened: Condvar::new(),
            arrivals: AtomicUsize::new(0),
        })
    }

    fn pass(&self) {
        self.arrivals.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    fn close(&self) {
        *self.open.lock() = false;
    }

    fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    fn wait_for_arrivals(&self, count: usize) {
        while self.arrivals.load(Ordering::SeqCst) < count {
            thread::yield_now();
        }
    }
}

/// Changes landing while an evaluation is in flight produce exactly one
/// more evaluation, which sees all of them.
#[test]
fn changes_during_evaluation_cause_one_more_evaluation() {
    let first = Signal::new(1);
    let second = Signal::new(2);
    let third = Signal::new(3);
    let gate = Gate::new();

    let computed = {
        let (first, second, third, gate) =
            (first.clone(), second.clone(), third.clone(), gate.clone());
        Computed::new(move || {
            first.get().unwrap();
            second.get().unwrap();
            third.get().unwrap();
            gate.pass();
            third.get().unwrap()
        })
        .unwrap()
    };
    assert_eq!(computed.evaluation_count(), 1);

    gate.close();
    let first_writer = thread::spawn(move || first.set(4).unwrap());
    gate.wait_for_arrivals(2);

    let second_writer = thread::spawn(move || second.set(5).unwrap());
    while computed.state() != ComputedState::EvaluationQueued {
        thread::yield_now();
    }

    // Coalesced into the evaluation already queued.
    third.set(6).unwrap();

    gate.open();
    first_writer.join().unwrap();
    second_writer.join().unwrap();

    assert_eq!(computed.get().unwrap(), 6);
    assert_eq!(computed.evaluation_count(), 3);
}

#[test]
fn changes_during_effect_run_cause_one_more_run() {
    let first = Signal::new(1);
    let second = Signal::new(2);
    let third = Signal::new(2);
    let gate = Gate::new();
    let seen = Arc::new(AtomicI64::new(0));

    let effect = {
        let (first, second, third, gate, seen) =
            (first.clone(), second.clone(), third.clone(), gate.clone(), seen.clone());
        Effect::new(move || {
            first.get().unwrap();
            second.get().unwrap();
            third.get().unwrap();
            gate.pass();
            seen.store(third.get().unwrap(), Ordering::SeqCst);
        })
        .unwrap()
    };
    assert_eq!(effect.run_count(), 1);

    gate.close();
    let first_writer = thread::spawn(move || first.set(2).unwrap());
    gate.wait_for_arrivals(2);

    let second_writer = thread::spawn(move || second.set(3).unwrap());
    while !effect.is_run_queued() {
        thread::yield_now();
    }

    third.set(4).unwrap();

    gate.open();
    first_writer.join().unwrap();
    second_writer.join().unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 4);
    assert_eq!(effect.run_count(), 3);
}

/// Effects in two contexts, each reading a computed value from the other
/// context while their own run is in progress.
#[test]
fn cross_context_reads_do_not_deadlock() {
    let left = LifetimeContext::new();
    let right = LifetimeContext::new();
    let left_value = Computed::new_in(&left, || 1).unwrap();
    let right_value = Computed::new_in(&right, || 2).unwrap();
    let left_trigger = Signal::new(0);
    let right_trigger = Signal::new(0);
    let both_running = Arc::new(Barrier::new(2));
    let total = Arc::new(AtomicI64::new(0));

    let cross_reader = |context: &LifetimeContext, trigger: &Signal<i32>, other: &Computed<i32>| {
        let (trigger, other) = (trigger.clone(), other.clone());
        let (both_running, total) = (both_running.clone(), total.clone());
        Effect::new_in(context, move || {
            if trigger.get().unwrap() == 1 {
                both_running.wait();
                total.fetch_add(i64::from(other.get().unwrap()), Ordering::SeqCst);
            }
        })
        .unwrap()
    };
    let left_effect = cross_reader(&left, &left_trigger, &right_value);
    let right_effect = cross_reader(&right, &right_trigger, &left_value);

    let (done, finished) = mpsc::channel();
    for trigger in [left_trigger.clone(), right_trigger.clone()] {
        let done = done.clone();
        thread::spawn(move || {
            trigger.set(1).unwrap();
            let _ = done.send(());
        });
    }

    for _ in 0..2 {
        finished
            .recv_timeout(Duration::from_secs(10))
            .expect("writers blocked on each other's context");
    }
    assert_eq!(total.load(Ordering::SeqCst), 3);
    assert_eq!(left_effect.run_count(), 2);
    assert_eq!(right_effect.run_count(), 2);

    left.dispose();
    right.dispose();
}
