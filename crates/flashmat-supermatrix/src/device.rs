//! Accelerator residency tracking.
//!
//! Workers `0..num_gpus` drive one accelerator each. Before such a worker
//! runs a task, every operand must be resident on its device: missing
//! blocks are transferred with [`DeviceBackend::update_block`], evicting
//! least recently used blocks (flushing them if dirty) when the device is
//! full. Outputs become dirty on that device and are invalidated on the
//! others. A host worker first flushes any dirty device copy of its
//! operands. All dirty blocks are flushed when `exec` finishes.
//!
//! Kernels always run on the host; the backend only sees transfers.

use std::collections::VecDeque;

use flashmat_core::{BlockKey, KernelError};
use parking_lot::Mutex;

/// Transfer interface of an accelerator.
pub trait DeviceBackend: Send + Sync {
    /// Copy `key` from host memory to `device`.
    fn update_block(&self, device: usize, key: &BlockKey) -> Result<(), KernelError>;

    /// Copy `key` from `device` back to host memory.
    fn flush_block(&self, device: usize, key: &BlockKey) -> Result<(), KernelError>;

    /// Forget the copy of `key` on `device`.
    fn invalidate_block(&self, device: usize, key: &BlockKey);
}

/// Transfer seen by a [`RecordingDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Host to device copy.
    Update {
        /// Target device
        device: usize,
        /// Block copied
        key: BlockKey,
    },
    /// Device to host copy.
    Flush {
        /// Source device
        device: usize,
        /// Block copied
        key: BlockKey,
    },
    /// Device copy dropped.
    Invalidate {
        /// Device
        device: usize,
        /// Block dropped
        key: BlockKey,
    },
}

/// Backend that records every transfer and never fails.
#[derive(Debug, Default)]
pub struct RecordingDevice {
    events: Mutex<Vec<DeviceEvent>>,
}

impl RecordingDevice {
    /// Create a backend with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transfers recorded so far.
    pub fn events(&self) -> Vec<DeviceEvent> {
        self.events.lock().clone()
    }

    /// Number of host-to-device copies recorded.
    pub fn num_updates(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Update { .. }))
            .count()
    }

    /// Number of device-to-host copies recorded.
    pub fn num_flushes(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, DeviceEvent::Flush { .. }))
            .count()
    }

    /// Clear the log.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DeviceBackend for RecordingDevice {
    fn update_block(&self, device: usize, key: &BlockKey) -> Result<(), KernelError> {
        self.events.lock().push(DeviceEvent::Update { device, key: *key });
        Ok(())
    }

    fn flush_block(&self, device: usize, key: &BlockKey) -> Result<(), KernelError> {
        self.events.lock().push(DeviceEvent::Flush { device, key: *key });
        Ok(())
    }

    fn invalidate_block(&self, device: usize, key: &BlockKey) {
        self.events
            .lock()
            .push(DeviceEvent::Invalidate { device, key: *key });
    }
}

#[derive(Debug, Clone, Copy)]
struct Resident {
    key: BlockKey,
    dirty: bool,
}

#[derive(Debug)]
struct DeviceCache {
    /// Most recently used at the front.
    blocks: VecDeque<Resident>,
}

impl DeviceCache {
    fn position(&self, key: &BlockKey) -> Option<usize> {
        self.blocks.iter().position(|r| r.key == *key)
    }
}

/// Residency of leaf blocks on every device.
pub(crate) struct DeviceResidency<'a> {
    backend: &'a dyn DeviceBackend,
    capacity: usize,
    devices: Vec<DeviceCache>,
}

impl<'a> DeviceResidency<'a> {
    pub(crate) fn new(backend: &'a dyn DeviceBackend, num_devices: usize, capacity: usize) -> Self {
        Self {
            backend,
            capacity,
            devices: (0..num_devices)
                .map(|_| DeviceCache {
                    blocks: VecDeque::new(),
                })
                .collect(),
        }
    }

    /// Flush the dirty copy of `key` held by any device other than `except`.
    fn flush_elsewhere(&mut self, key: &BlockKey, except: Option<usize>) -> Result<(), KernelError> {
        for (d, cache) in self.devices.iter_mut().enumerate() {
            if Some(d) == except {
                continue;
            }
            if let Some(pos) = cache.position(key) {
                if cache.blocks[pos].dirty {
                    self.backend.flush_block(d, key)?;
                    cache.blocks[pos].dirty = false;
                }
            }
        }
        Ok(())
    }

    /// Make every operand resident on `device`.
    pub(crate) fn prepare_device(&mut self, device: usize, keys: &[BlockKey]) -> Result<(), KernelError> {
        for key in keys {
            self.flush_elsewhere(key, Some(device))?;
            let backend = self.backend;
            let capacity = self.capacity;
            let cache = &mut self.devices[device];
            if let Some(pos) = cache.position(key) {
                if let Some(r) = cache.blocks.remove(pos) {
                    cache.blocks.push_front(r);
                }
                continue;
            }
            while cache.blocks.len() >= capacity {
                match cache.blocks.pop_back() {
                    Some(victim) => {
                        if victim.dirty {
                            backend.flush_block(device, &victim.key)?;
                        }
                        backend.invalidate_block(device, &victim.key);
                    }
                    None => break,
                }
            }
            backend.update_block(device, key)?;
            cache.blocks.push_front(Resident {
                key: *key,
                dirty: false,
            });
        }
        Ok(())
    }

    /// Make host memory current for every operand.
    pub(crate) fn prepare_host(&mut self, keys: &[BlockKey]) -> Result<(), KernelError> {
        for key in keys {
            self.flush_elsewhere(key, None)?;
        }
        Ok(())
    }

    /// Record outputs written on `device`, or on the host when `None`.
    pub(crate) fn finish(&mut self, device: Option<usize>, outputs: &[BlockKey]) {
        for key in outputs {
            for (d, cache) in self.devices.iter_mut().enumerate() {
                let Some(pos) = cache.position(key) else {
                    continue;
                };
                if Some(d) == device {
                    cache.blocks[pos].dirty = true;
                } else {
                    cache.blocks.remove(pos);
                    self.backend.invalidate_block(d, key);
                }
            }
        }
    }

    /// Flush every dirty block on every device.
    pub(crate) fn flush_all(&mut self) -> Result<(), KernelError> {
        for (d, cache) in self.devices.iter_mut().enumerate() {
            for r in cache.blocks.iter_mut().filter(|r| r.dirty) {
                self.backend.flush_block(d, &r.key)?;
                r.dirty = false;
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn resident(&self, device: usize) -> usize {
        self.devices[device].blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashmat_core::Obj;

    fn key() -> BlockKey {
        Obj::<f64>::create(2, 2).block_keys()[0]
    }

    #[test]
    fn test_missing_blocks_are_transferred_once() {
        let backend = RecordingDevice::new();
        let mut res = DeviceResidency::new(&backend, 1, 4);
        let (a, b) = (key(), key());
        res.prepare_device(0, &[a, b]).unwrap();
        res.prepare_device(0, &[a]).unwrap();
        assert_eq!(backend.num_updates(), 2);
        assert_eq!(res.resident(0), 2);
    }

    #[test]
    fn test_eviction_flushes_dirty_block() {
        let backend = RecordingDevice::new();
        let mut res = DeviceResidency::new(&backend, 1, 1);
        let (a, b) = (key(), key());
        res.prepare_device(0, &[a]).unwrap();
        res.finish(Some(0), &[a]);
        res.prepare_device(0, &[b]).unwrap();
        assert_eq!(backend.num_flushes(), 1);
        assert_eq!(res.resident(0), 1);
    }

    #[test]
    fn test_host_reads_flush_dirty_copies() {
        let backend = RecordingDevice::new();
        let mut res = DeviceResidency::new(&backend, 2, 4);
        let a = key();
        res.prepare_device(0, &[a]).unwrap();
        res.prepare_device(1, &[a]).unwrap();
        res.finish(Some(0), &[a]);
        // Device 1's copy is stale now.
        assert_eq!(res.resident(1), 0);
        res.prepare_host(&[a]).unwrap();
        assert_eq!(backend.num_flushes(), 1);
        res.flush_all().unwrap();
        assert_eq!(backend.num_flushes(), 1);
    }
}
