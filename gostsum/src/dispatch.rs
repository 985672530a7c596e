//! A bounded array of task slots shared between the manifest-driving main
//! thread and a pool of validation workers.
//!
//! Every slot is guarded by an atomic state word, so claiming and completing
//! work is lock-free; the mutex and the two condition variables only put
//! threads to sleep when there is nothing to do. The happens-before edges
//! are: the main thread's release store of SUBMITTED publishes the task body
//! to the claiming worker, and the worker's release store of a completion
//! code publishes the outcome back to the main thread's acquire load.

use crate::task::{result, Task, READ_BUF_SIZE};
use std::cell::UnsafeCell;
use std::cmp;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;

/// Number of task slots.
pub const SLOT_COUNT: usize = 10;
// The protocol supports 4 to 126 slots.
const _: () = assert!(SLOT_COUNT >= 4 && SLOT_COUNT <= 126);

/// Worker threads get a small fixed stack; the validation path keeps its
/// read buffer and little else on it.
pub(crate) const WORKER_STACK_SIZE: usize = 16 * 1024;

const MIN_WORKERS: usize = 2;
const MAX_WORKERS: usize = 8;

// Budget knobs for the main thread's slot walk: one full scan spends
// SCAN_BUDGET, a reported completion costs COST_RELEASE, a free slot costs
// COST_FREE, and MAIN_SPIN_LOOPS failed scans are allowed before blocking.
const MAIN_SPIN_LOOPS: i32 = 0;
const SCAN_BUDGET: i32 = 4;
const COST_RELEASE: i32 = 1;
const COST_FREE: i32 = 2;

/// Worker pool size: one thread per online CPU, clamped to [2, 8].
pub fn worker_count() -> usize {
    cmp::max(MIN_WORKERS, cmp::min(num_cpus::get(), MAX_WORKERS))
}

/// One slot: a task body guarded by an atomic state word. Exactly one thread
/// owns the body at any time: the main thread while the state is INIT or a
/// completion code, and the claiming worker from its successful CAS to TAKEN
/// until it stores the completion code.
pub struct Slot {
    state: AtomicU32,
    task: UnsafeCell<Task>,
}

// Safety: the state word serializes ownership of `task`; only the owning
// thread at each state touches the body.
unsafe impl Sync for Slot {}

impl Slot {
    fn new() -> Slot {
        Slot {
            state: AtomicU32::new(result::INIT),
            task: UnsafeCell::new(Task::new()),
        }
    }

    /// Current state word. The acquire pairs with the release store of a
    /// completion code in the worker.
    pub fn result(&self) -> u32 {
        self.state.load(Ordering::Acquire)
    }

    /// Return the slot to the free pool. Relaxed is enough: the body is next
    /// touched only by the same main thread that stores this.
    pub fn release(&self) {
        self.state.store(result::INIT, Ordering::Relaxed);
    }

    /// # Safety
    ///
    /// The caller must own the slot body under the state protocol: the main
    /// thread with the slot in INIT or a completion state, or the worker
    /// that moved it to TAKEN.
    pub unsafe fn task_mut(&self) -> &mut Task {
        &mut *self.task.get()
    }

    /// # Safety
    ///
    /// Same ownership requirement as [`Slot::task_mut`].
    pub unsafe fn task(&self) -> &Task {
        &*self.task.get()
    }
}

pub struct Dispatcher {
    slots: [Slot; SLOT_COUNT],
    /// Count of SUBMITTED slots not yet claimed by a worker.
    awaiting: AtomicU32,
    /// Monotone shutdown flag.
    stop: AtomicBool,
    lock: Mutex<()>,
    /// The main thread waits here for a completion when no slot is usable.
    cv_master: Condvar,
    /// Workers wait here for submissions.
    cv_worker: Condvar,
}

impl Dispatcher {
    pub fn new() -> Dispatcher {
        Dispatcher {
            slots: std::array::from_fn(|_| Slot::new()),
            awaiting: AtomicU32::new(0),
            stop: AtomicBool::new(false),
            lock: Mutex::new(()),
            cv_master: Condvar::new(),
            cv_worker: Condvar::new(),
        }
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Publish a filled slot to the workers. The release store makes the
    /// task body written by the main thread visible to the claiming worker.
    pub fn submit(&self, index: usize) {
        self.slots[index]
            .state
            .store(result::SUBMITTED, Ordering::Release);
        let _guard = self.lock.lock().unwrap();
        self.awaiting.fetch_add(1, Ordering::Release);
        self.cv_worker.notify_one();
    }

    /// Request shutdown and wake every sleeping worker. Workers drain any
    /// remaining submissions before exiting.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        let _guard = self.lock.lock().unwrap();
        self.cv_worker.notify_all();
    }

    fn has_complete(&self) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.result() & result::COMPLETE_MASK != 0)
    }

    /// Block until some slot carries a completion code. A single wait is
    /// enough; the caller rescans either way.
    fn master_wait(&self) {
        let guard = self.lock.lock().unwrap();
        if !self.has_complete() {
            let _guard = self.cv_master.wait(guard).unwrap();
        }
    }

    /// Block until work is submitted or shutdown is requested. Returns the
    /// submitted count, which is zero only when stopping.
    fn worker_wait(&self) -> u32 {
        let mut guard = self.lock.lock().unwrap();
        loop {
            let pending = self.awaiting.load(Ordering::Acquire);
            if pending > 0 || self.stop.load(Ordering::Relaxed) {
                return pending;
            }
            guard = self.cv_worker.wait(guard).unwrap();
        }
    }

    /// Worker thread body: claim submitted slots, validate outside the lock,
    /// publish completion codes. Returns how many tasks this worker ran.
    pub fn worker_loop(&self) -> u64 {
        let mut done = 0;
        let mut buf = [0; READ_BUF_SIZE];
        let mut pending = 0;
        loop {
            let mut i = 0;
            while pending > 0 && i < SLOT_COUNT {
                let slot = &self.slots[i];
                i += 1;
                if slot.result() != result::SUBMITTED {
                    continue;
                }
                // The scan retries anyway, so a weak exchange is fine.
                if slot
                    .state
                    .compare_exchange_weak(
                        result::SUBMITTED,
                        result::TAKEN,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_err()
                {
                    continue;
                }
                self.awaiting.fetch_sub(1, Ordering::Release);
                // Safety: the CAS made this worker the slot owner.
                let outcome = unsafe { slot.task_mut() }.validate(&mut buf);
                done += 1;
                {
                    let _guard = self.lock.lock().unwrap();
                    slot.state.store(outcome, Ordering::Release);
                    self.cv_master.notify_one();
                }
                // Restart the scan; newer work may have landed in low slots.
                pending = self.awaiting.load(Ordering::Acquire);
                i = 0;
            }
            pending = self.worker_wait();
            if pending == 0 {
                // Shutdown requested and nothing left submitted.
                return done;
            }
        }
    }

    /// Walk the slots, reporting and releasing completions, until a free
    /// slot turns up. Blocks on the master condvar once the spin budget is
    /// spent and a full scan found nothing.
    pub fn find_free_slot(&self, report: &mut dyn FnMut(&Task, u32)) -> usize {
        let mut spins = MAIN_SPIN_LOOPS;
        loop {
            let mut found = None;
            let mut budget = SCAN_BUDGET;
            for (i, slot) in self.slots.iter().enumerate() {
                if budget < 0 {
                    break;
                }
                let state = slot.result();
                if state & result::COMPLETE_MASK != 0 {
                    // Safety: completed slots belong to the main thread.
                    report(unsafe { slot.task() }, state);
                    slot.release();
                    budget -= COST_RELEASE;
                    found = Some(i);
                } else if state == result::INIT {
                    budget -= COST_FREE;
                    found = Some(i);
                }
            }
            if let Some(index) = found {
                return index;
            }
            spins -= 1;
            if spins <= 0 {
                self.master_wait();
            } else {
                thread::yield_now();
            }
        }
    }

    /// Report every remaining completion. Called after the workers have been
    /// joined, when no slot can be SUBMITTED or TAKEN anymore.
    pub fn drain(&self, report: &mut dyn FnMut(&Task, u32)) {
        for slot in self.slots.iter() {
            let state = slot.result();
            if state & result::COMPLETE_MASK != 0 {
                // Safety: the workers are gone; main owns every slot.
                report(unsafe { slot.task() }, state);
                slot.release();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gosthash2012::streebog256;
    use std::fs;

    #[test]
    fn test_worker_count_bounds() {
        let count = worker_count();
        assert!(count >= MIN_WORKERS && count <= MAX_WORKERS);
    }

    #[test]
    fn test_every_submission_completes_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut rows = Vec::new();
        for i in 0..25usize {
            let path = dir.path().join(format!("f{}", i));
            let content = vec![i as u8; i * 37];
            fs::write(&path, &content).unwrap();
            let mut expected = hex::encode(streebog256(&content).bytes()).into_bytes();
            if i % 5 == 0 {
                expected[0] = if expected[0] == b'0' { b'1' } else { b'0' };
            }
            rows.push((path.to_string_lossy().into_owned().into_bytes(), expected));
        }

        let disp = Dispatcher::new();
        let mut matches = 0;
        let mut mismatches = 0;
        crossbeam::thread::scope(|s| {
            let mut handles = Vec::new();
            for _ in 0..3 {
                let disp = &disp;
                handles.push(s.spawn(move |_| disp.worker_loop()));
            }

            let mut report = |_task: &Task, code: u32| {
                if code == result::MATCH {
                    matches += 1;
                } else {
                    mismatches += 1;
                }
            };
            for (name, expected) in &rows {
                let index = disp.find_free_slot(&mut report);
                // Safety: the slot is INIT and owned by this thread.
                let task = unsafe { disp.slot(index).task_mut() };
                task.set_digest_size(32);
                task.set_expected(0, expected).unwrap();
                task.filename_mut().clear();
                task.filename_mut().extend_from_slice(name);
                disp.submit(index);
            }

            disp.shutdown();
            let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(25, total);
            disp.drain(&mut report);
        })
        .unwrap();

        assert_eq!(20, matches);
        assert_eq!(5, mismatches);
    }
}
