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

//! Low-level flash handling.
//!
//! The flash is cut into sectors, by hardware design. Memory can be written
//! from 1 to 0 at any bit level, but writing from 0 to 1 requires erasing an
//! entire sector.
//!
//! The raw driver is a collaborator supplied by the host through
//! [`FlashDriver`]; everything above it goes through [`Flash`], which bounds
//! checks every access against the device size and keeps a count of nested
//! enable scopes so that the bus is powered exactly while some operation needs
//! it.

pub mod ram;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::Error;

/// Hardware verification policy for a programming operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Program without reading anything back.
    None,
    /// Read back after programming and compare with the requested image.
    Post,
    /// Check that the target reads erased before programming.
    Pre,
    /// Both pre- and post-verification.
    Both,
}

/// Low-level capability set expected from a raw SPI flash driver.
///
/// Addresses handed to the driver are guaranteed in bounds by [`Flash`]; the
/// driver does not need to re-check them.
pub trait FlashDriver {
    /// Byte count of the physical device.
    fn size(&self) -> u32;

    /// Powers the bus up. Idempotent.
    fn enable(&mut self);

    /// Powers the bus down. Idempotent.
    fn disable(&mut self);

    /// Reads `buf.len()` bytes starting at `addr`.
    fn read(&mut self, addr: u32, buf: &mut [u8]);

    /// Programs `data` at `addr`, flipping bits from 1 to 0 only.
    ///
    /// Returns 0 on success; any other value is a status code and is fatal to
    /// the operation in flight.
    fn write(&mut self, addr: u32, data: &[u8], verify: VerifyMode) -> u32;

    /// Erases the sector containing `addr`, restoring all its bits to 1.
    fn erase_sector(&mut self, addr: u32);
}

/// Main structure for handling the flash device.
pub struct Flash {
    /// The raw driver supplied by the host.
    driver: Box<dyn FlashDriver>,

    /// Depth of nested enable scopes; the driver is powered while nonzero.
    enabled: u32,
}

impl Flash {
    /// Wraps a raw driver.
    pub fn new(driver: Box<dyn FlashDriver>) -> Flash {
        Flash { driver, enabled: 0 }
    }

    /// Byte count of the physical device.
    pub fn size(&self) -> u32 {
        self.driver.size()
    }

    /// Opens an enable scope; the driver is physically enabled on the 0→1
    /// transition only, so nested scopes compose.
    pub fn enable(&mut self) {
        if self.enabled == 0 {
            self.driver.enable();
        }
        self.enabled += 1;
    }

    /// Closes an enable scope; the driver is physically disabled on the 1→0
    /// transition only.
    ///
    /// # Panics
    ///
    /// Panics on an unbalanced disable, which is a bug in the caller.
    pub fn disable(&mut self) {
        assert!(self.enabled > 0, "unbalanced flash disable");
        self.enabled -= 1;
        if self.enabled == 0 {
            self.driver.disable();
        }
    }

    /// Calls `f` with the flash kept enabled for the whole scope.
    pub fn with_enabled<T, F: FnOnce(&mut Flash) -> T>(&mut self, f: F) -> T {
        self.enable();
        let res = f(self);
        self.disable();
        res
    }

    /// Checks that `[addr, addr + len)` lies on the device.
    fn check_range(&self, addr: u32, len: usize) -> Result<(), Error> {
        let size = self.driver.size() as u64;
        if (addr as u64) >= size || addr as u64 + len as u64 > size {
            return err!(Error::InvalidSpiflashAddress);
        }
        Ok(())
    }

    /// Reads `len` bytes starting at `addr`.
    ///
    /// # Errors
    ///
    /// Errors if the range exceeds the device.
    pub fn read(&mut self, addr: u32, len: usize) -> Result<Vec<u8>, Error> {
        get!(self.check_range(addr, len));
        let mut buf = vec![0; len];
        self.enable();
        self.driver.read(addr, &mut buf);
        self.disable();
        Ok(buf)
    }

    /// Programs `data` at `addr`.
    ///
    /// # Errors
    ///
    /// Errors if the range exceeds the device, or with
    /// [`Error::Validation`](../error/enum.Error.html) if the driver reports a
    /// nonzero status (typically a verification mismatch).
    pub fn write(&mut self, addr: u32, data: &[u8], verify: VerifyMode) -> Result<(), Error> {
        get!(self.check_range(addr, data.len()));
        self.enable();
        let status = self.driver.write(addr, data, verify);
        self.disable();
        if status != 0 {
            debug!("Flash write at {:#x} returned status {}", addr, status);
            return err!(Error::Validation);
        }
        Ok(())
    }

    /// Erases the sector starting at `addr`.
    ///
    /// # Errors
    ///
    /// Errors if `addr` is outside the device.
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error> {
        get!(self.check_range(addr, 1));
        self.enable();
        self.driver.erase_sector(addr);
        self.disable();
        Ok(())
    }
}
