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

//! Error taxonomy of the file system.
//!
//! Callers are expected to match on the variant, not on a message; the
//! `Display` rendering is the stable identifier of the error and nothing else.

use core::fmt;

/// An error that can happen during a file-system operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    /// The operation requires that no file handle is open, but one is.
    FileOpen,

    /// The handle has already been closed.
    FileClosed,

    /// No file with the requested name or id exists.
    FileNotFound,

    /// A file with the requested name already exists.
    FileExists,

    /// Writing through a handle that was opened read-only.
    FileWriteR,

    /// The requested open mode is neither `"r"` nor `"w"`.
    UnknownMode,

    /// Write verification failed: the medium does not read back what was
    /// programmed.
    Validation,

    /// The region bounds are misaligned or outside the device.
    InvalidSpiflashAddress,

    /// The data handed to a write is not a byte sequence.
    InvalidWriteData,

    /// No free page is left, even after collecting reclaimable sectors.
    NoFreeSpace,

    /// The filename is empty or longer than the medium can store.
    InvalidFilename,

    /// A parameter is out of range for the operation.
    InvalidParameters,
}

impl Error {
    /// Canonical identifier of this error.
    pub fn as_str(self) -> &'static str {
        match self {
            Error::FileOpen => "FILE_OPEN",
            Error::FileClosed => "FILE_CLOSED",
            Error::FileNotFound => "FILE_NOT_FOUND",
            Error::FileExists => "FILE_EXISTS",
            Error::FileWriteR => "FILE_WRITE_R",
            Error::UnknownMode => "UNKNOWN_MODE",
            Error::Validation => "VALIDATION",
            Error::InvalidSpiflashAddress => "INVALID_SPIFLASH_ADDRESS",
            Error::InvalidWriteData => "INVALID_WRITE_DATA",
            Error::NoFreeSpace => "NO_FREE_SPACE",
            Error::InvalidFilename => "INVALID_FILENAME",
            Error::InvalidParameters => "INVALID_PARAMETERS",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
