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

//! # spanfs
//!
//! A small log-structured, wear-leveling file system over raw NOR-like SPI
//! flash.
//!
//! The medium can program bits from 1 to 0 at byte granularity, but restoring
//! bits to 1 requires erasing a whole sector. The file system cuts a region of
//! the device into pages (one page per sector), chains the pages of a file
//! through per-page headers, and rebuilds its entire index (the FAT) in RAM
//! by scanning those headers at init time. Deleting a file only zeroes its
//! headers; the garbage collector turns such sectors back into allocatable
//! space lazily, and allocation starts from a random page so that writes
//! spread across the device.
//!
//! The raw flash driver is a collaborator provided by the host through the
//! [`FlashDriver`] trait; an in-memory emulation with true NOR semantics is
//! available as [`flash::ram::RamFlash`](flash/ram/struct.RamFlash.html). The
//! wall clock used to stamp file creation times is injected through the
//! [`Clock`] trait.

#![no_std]
#![warn(missing_docs)]

extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
pub mod debug;

pub mod clock;
pub mod error;
pub mod fat;
pub mod flash;
pub mod fs;
pub mod page;

pub use clock::Clock;
pub use error::Error;
pub use fat::{FileInfo, FileRef, Stats};
pub use flash::{FlashDriver, VerifyMode};
pub use fs::{Dimensions, File, FileSystem, FreeSpace};
