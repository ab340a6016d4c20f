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

//! On-medium page layout.
//!
//! Each page starts with a little-endian header:
//!
//! ```none
//! +-------+-------+-------+-----------+----------+----------+
//! |  id   | span  | size  |  created  | name_len |   name   |
//! | 2B    | 2B    | 2B    | 4B        | 1B       | ≤64B     |
//! +-------+-------+-------+-----------+----------+----------+
//! ```
//!
//! `created`, `name_len` and `name` exist only on the head page of a file
//! (`span == 0`); continuation pages carry the fixed six bytes and payload.
//! The payload runs from the end of the header to the end of the page.
//!
//! The sentinel values encode the page's status: a page of raw erased flash
//! reads all `0xFF` (free), a zeroed header marks a logically deleted page
//! awaiting physical erase, and anything that fits neither pattern nor a valid
//! in-use header is broken.
//!
//! The `size` field is programmed after the rest of the header, because on NOR
//! flash bits only move from 1 to 0: a page is written with
//! `size == 0xFFFF` ("still open"), and finalized later by programming the
//! real value over it. `0` means the page was filled completely and the
//! payload length follows from the geometry.


use alloc::string::String;
use alloc::vec::Vec;

/// Size of a page; equal to the erase-sector size of the medium.
pub const PAGE_SIZE: usize = 4096;

/// Fixed part of every page header: id, span and size, two bytes each.
pub const FIXED_HEADER: usize = 6;

/// Width of the creation timestamp carried by head pages.
const CREATED_LEN: usize = 4;

/// Longest allowed filename, in bytes.
pub const MAX_FNAME: usize = 64;

/// Largest possible header: fixed part, timestamp, name length and name.
pub const MAX_HEADER: usize = FIXED_HEADER + CREATED_LEN + 1 + MAX_FNAME;

/// `id` read from a page of raw erased flash.
pub const ID_FREE: u16 = 0xFFFF;

/// `id` of a logically deleted page.
pub const ID_ERASED: u16 = 0x0000;

/// Highest mintable file id; 0 and 0xFFFF are reserved sentinels.
pub const MAX_FILE_ID: u16 = 0xFFFE;

/// `size` of a page whose final size has not been programmed yet.
pub const SIZE_OPEN: u16 = 0xFFFF;

/// `size` of a fully used page.
pub const SIZE_FULL: u16 = 0;

/// Status of a page, as derived from its header bytes at scan time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    /// Erased raw flash, never written.
    Free,
    /// Currently holding file data.
    Used,
    /// Logically deleted; bits zeroed, sector not yet physically erased.
    Erased,
    /// Header inconsistent with any valid pattern.
    Bad,
}

/// Head-page fields: creation time and filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadInfo {
    /// Creation timestamp, in seconds.
    pub created: u32,
    /// Name of the file.
    pub fname: String,
}

/// A decoded page header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// File identifier.
    pub id: u16,
    /// Index of this page within the file, 0 for the head page.
    pub span: u16,
    /// Raw size field; interpret through [`decoded_size`](fn.decoded_size.html).
    pub size: u16,
    /// Present on head pages only.
    pub head: Option<HeadInfo>,
}

/// Outcome of parsing the first [`MAX_HEADER`] bytes of a page.
///
/// [`MAX_HEADER`]: constant.MAX_HEADER.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    /// The page is erased raw flash.
    Free,
    /// The page was logically deleted and awaits physical erase.
    Erased,
    /// The header matches no valid pattern.
    Bad,
    /// The page holds file data.
    Used(Header),
}

impl Parsed {
    /// Page status implied by this parse outcome.
    pub fn status(&self) -> PageStatus {
        match *self {
            Parsed::Free => PageStatus::Free,
            Parsed::Erased => PageStatus::Erased,
            Parsed::Bad => PageStatus::Bad,
            Parsed::Used(_) => PageStatus::Used,
        }
    }
}

/// Header length of a head page carrying a name of `name_len` bytes.
pub fn head_header_len(name_len: usize) -> usize {
    FIXED_HEADER + CREATED_LEN + 1 + name_len
}

/// Payload capacity of a page.
pub fn payload_capacity(span: u16, name_len: usize) -> usize {
    if span == 0 {
        PAGE_SIZE - head_header_len(name_len)
    } else {
        PAGE_SIZE - FIXED_HEADER
    }
}

fn le16(raw: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([raw[off], raw[off + 1]])
}

fn le32(raw: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]])
}

/// Encodes the header of a head page.
///
/// `size` is usually [`SIZE_OPEN`]: the real size is programmed over it when
/// the page is finalized.
///
/// # Panics
///
/// Panics if the name is empty or longer than [`MAX_FNAME`]; callers validate
/// names before any id is minted.
///
/// [`SIZE_OPEN`]: constant.SIZE_OPEN.html
/// [`MAX_FNAME`]: constant.MAX_FNAME.html
pub fn encode_head(id: u16, size: u16, created: u32, fname: &str) -> Vec<u8> {
    let name = fname.as_bytes();
    assert!(!name.is_empty() && name.len() <= MAX_FNAME);
    let mut out = Vec::with_capacity(head_header_len(name.len()));
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&created.to_le_bytes());
    out.push(name.len() as u8);
    out.extend_from_slice(name);
    out
}

/// Encodes the header of a continuation page (`span > 0`).
pub fn encode_cont(id: u16, span: u16, size: u16) -> [u8; FIXED_HEADER] {
    let id = id.to_le_bytes();
    let span = span.to_le_bytes();
    let size = size.to_le_bytes();
    [id[0], id[1], span[0], span[1], size[0], size[1]]
}

/// Encodes the size-finalization image: `0xFF` everywhere but the size field,
/// so programming it touches no bit outside that field.
pub fn encode_size_patch(size: u16) -> [u8; FIXED_HEADER] {
    let size = size.to_le_bytes();
    [0xFF, 0xFF, 0xFF, 0xFF, size[0], size[1]]
}

/// Parses and classifies the first [`MAX_HEADER`] bytes of a page.
///
/// A head page whose `name_len` falls outside `1..=64` or whose name bytes are
/// not valid UTF-8 is broken, as is any sentinel id paired with non-sentinel
/// neighbours.
///
/// [`MAX_HEADER`]: constant.MAX_HEADER.html
pub fn parse(raw: &[u8]) -> Parsed {
    debug_assert!(raw.len() >= MAX_HEADER);
    let id = le16(raw, 0);
    let span = le16(raw, 2);
    let size = le16(raw, 4);
    if id == ID_FREE {
        return if span == 0xFFFF && size == 0xFFFF {
            Parsed::Free
        } else {
            Parsed::Bad
        };
    }
    if id == ID_ERASED {
        return if span == 0 && size == 0 {
            Parsed::Erased
        } else {
            Parsed::Bad
        };
    }
    if span == 0 {
        let created = le32(raw, FIXED_HEADER);
        let name_len = raw[FIXED_HEADER + CREATED_LEN] as usize;
        if name_len == 0 || name_len > MAX_FNAME {
            return Parsed::Bad;
        }
        let name_off = FIXED_HEADER + CREATED_LEN + 1;
        match core::str::from_utf8(&raw[name_off..name_off + name_len]) {
            Ok(name) => Parsed::Used(Header {
                id,
                span,
                size,
                head: Some(HeadInfo {
                    created,
                    fname: String::from(name),
                }),
            }),
            Err(_) => Parsed::Bad,
        }
    } else if span == 0xFFFF {
        Parsed::Bad
    } else {
        Parsed::Used(Header {
            id,
            span,
            size,
            head: None,
        })
    }
}

/// Payload bytes recorded by a decoded header, given the page geometry.
///
/// A page that was never finalized (`size == 0xFFFF`, power lost while the
/// file was open) counts as empty: the interrupted tail is unrecoverable.
pub fn decoded_size(h: &Header) -> usize {
    match h.size {
        SIZE_OPEN => 0,
        SIZE_FULL => {
            let name_len = h.head.as_ref().map_or(0, |hd| hd.fname.len());
            payload_capacity(h.span, name_len)
        }
        s => s as usize,
    }
}
