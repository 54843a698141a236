//! Locked register store
//!
//! One mutex guards the whole address→byte map. Each modification queues its
//! value changes while still holding the map lock, so the queue is in apply
//! order. The map lock is released before any change is dispatched; whichever
//! caller finds the queue idle drains it, delivering its own batch and any
//! batch queued meanwhile by other writers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

/// One byte whose value was actually changed by a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterChange {
    pub address: u32,
    pub old: u8,
    pub new: u8,
}

/// Change batches waiting for dispatch
#[derive(Debug, Default)]
struct PendingChanges {
    batches: VecDeque<Vec<RegisterChange>>,
    draining: bool,
}

/// Address→byte register map
///
/// Addresses are fixed at construction; touching an address that was never
/// defined fails with that address as the error value.
#[derive(Debug)]
pub struct RegisterStore {
    map: Mutex<HashMap<u32, u8>>,
    pending: Mutex<PendingChanges>,
    lock_count: AtomicU64,
}

impl RegisterStore {
    pub fn new(defaults: &BTreeMap<u32, u8>) -> Self {
        Self {
            map: Mutex::new(defaults.iter().map(|(a, v)| (*a, *v)).collect()),
            pending: Mutex::new(PendingChanges::default()),
            lock_count: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, u8>> {
        self.lock_count.fetch_add(1, Ordering::Relaxed);
        self.map.lock()
    }

    /// Number of times the map lock has been taken
    pub fn lock_count(&self) -> u64 {
        self.lock_count.load(Ordering::Relaxed)
    }

    /// Copy `length` consecutive bytes starting at `address`
    pub fn read_range(&self, address: u32, length: usize) -> Result<Vec<u8>, u32> {
        let map = self.lock();
        (0..length as u32)
            .map(|offset| {
                let addr = address + offset;
                map.get(&addr).copied().ok_or(addr)
            })
            .collect()
    }

    /// Write `data` to consecutive addresses starting at `address`
    pub fn write_bytes<D>(&self, address: u32, data: &[u8], dispatch: D) -> Result<Vec<RegisterChange>, u32>
    where
        D: FnMut(&[RegisterChange]),
    {
        self.modify(
            |_| {
                data.iter()
                    .enumerate()
                    .map(|(offset, value)| (address + offset as u32, *value))
                    .collect()
            },
            dispatch,
        )
    }

    /// Compute updates from the current map and apply them atomically
    ///
    /// Either every update lands or none does. `dispatch` receives the real
    /// before/after pairs and never runs with the map lock held. While another
    /// caller is dispatching, this call only queues its changes and that caller
    /// delivers them through its own `dispatch`, so changes for one address
    /// reach the sink in apply order.
    pub fn modify<F, D>(&self, compute: F, dispatch: D) -> Result<Vec<RegisterChange>, u32>
    where
        F: FnOnce(&HashMap<u32, u8>) -> Vec<(u32, u8)>,
        D: FnMut(&[RegisterChange]),
    {
        let mut map = self.lock();
        let updates = compute(&map);
        if let Some((missing, _)) = updates.iter().find(|(a, _)| !map.contains_key(a)) {
            return Err(*missing);
        }

        let mut changes = Vec::new();
        for (address, value) in updates {
            if let Some(slot) = map.get_mut(&address) {
                if *slot != value {
                    changes.push(RegisterChange {
                        address,
                        old: *slot,
                        new: value,
                    });
                    *slot = value;
                }
            }
        }

        if changes.is_empty() {
            return Ok(changes);
        }
        self.pending.lock().batches.push_back(changes.clone());
        drop(map);

        self.drain(dispatch);
        Ok(changes)
    }

    /// Deliver queued batches in order unless another caller already is
    fn drain<D>(&self, mut dispatch: D)
    where
        D: FnMut(&[RegisterChange]),
    {
        {
            let mut pending = self.pending.lock();
            if pending.draining {
                return;
            }
            pending.draining = true;
        }

        loop {
            let batch = {
                let mut pending = self.pending.lock();
                match pending.batches.pop_front() {
                    Some(batch) => batch,
                    None => {
                        pending.draining = false;
                        return;
                    },
                }
            };
            dispatch(&batch);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<u32, u8> {
        self.lock().iter().map(|(a, v)| (*a, *v)).collect()
    }
}
