// The MIT License (MIT)
//
// Copyright (c) 2020, National Cybersecurity Agency of France (ANSSI)
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! In-memory flash emulation.
//!
//! [`RamFlash`] behaves like a real NOR device: programming ANDs bytes into
//! memory (bits only move from 1 to 0), and only a sector erase refills a
//! sector with `0xFF`. Verification failures can be injected, and the raw
//! memory can be shared out so tests can assert on the medium itself.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use super::{FlashDriver, VerifyMode};

/// Emulated NOR flash backed by a byte array.
pub struct RamFlash {
    /// The medium. Shared so that a test can keep a view onto it.
    mem: Arc<Mutex<Vec<u8>>>,

    /// Status code returned by the next write instead of programming, 0 for
    /// none. Consumed by the write that reports it.
    fail_next_write: Arc<AtomicU32>,

    /// Whether the bus is currently powered.
    powered: bool,

    /// Sector size in bytes.
    sector: usize,
}

impl RamFlash {
    /// Creates `size` bytes of erased flash cut into `sector`-byte sectors.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a positive multiple of `sector`.
    pub fn new(size: usize, sector: usize) -> RamFlash {
        assert!(sector > 0 && size > 0 && size % sector == 0);
        RamFlash {
            mem: Arc::new(Mutex::new(vec![0xFF; size])),
            fail_next_write: Arc::new(AtomicU32::new(0)),
            powered: false,
            sector,
        }
    }

    /// Shared view onto the raw medium.
    pub fn mem(&self) -> Arc<Mutex<Vec<u8>>> {
        self.mem.clone()
    }

    /// Handle for injecting a write failure: storing a nonzero status makes
    /// the next write report it without programming anything.
    pub fn fault(&self) -> Arc<AtomicU32> {
        self.fail_next_write.clone()
    }
}

impl FlashDriver for RamFlash {
    fn size(&self) -> u32 {
        self.mem.lock().len() as u32
    }

    fn enable(&mut self) {
        self.powered = true;
    }

    fn disable(&mut self) {
        self.powered = false;
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) {
        debug_assert!(self.powered, "read on a powered-down bus");
        let mem = self.mem.lock();
        let a = addr as usize;
        buf.copy_from_slice(&mem[a..a + buf.len()]);
    }

    fn write(&mut self, addr: u32, data: &[u8], verify: VerifyMode) -> u32 {
        debug_assert!(self.powered, "write on a powered-down bus");
        let injected = self.fail_next_write.swap(0, Ordering::SeqCst);
        if injected != 0 {
            return injected;
        }
        let mut mem = self.mem.lock();
        let a = addr as usize;
        if let VerifyMode::Pre | VerifyMode::Both = verify {
            if mem[a..a + data.len()].iter().any(|&b| b != 0xFF) {
                return 2;
            }
        }
        for (i, &b) in data.iter().enumerate() {
            mem[a + i] &= b;
        }
        if let VerifyMode::Post | VerifyMode::Both = verify {
            if &mem[a..a + data.len()] != data {
                return 1;
            }
        }
        0
    }

    fn erase_sector(&mut self, addr: u32) {
        debug_assert!(self.powered, "erase on a powered-down bus");
        let mut mem = self.mem.lock();
        let base = addr as usize / self.sector * self.sector;
        for b in &mut mem[base..base + self.sector] {
            *b = 0xFF;
        }
    }
}
