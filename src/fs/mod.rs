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

//! File system core.
//!
//! # High-level overview
//!
//! A [`FileSystem`] is bound to a sector-aligned region of the flash device.
//! Files are chains of pages linked by the span index in each page header;
//! only the head page (span 0) carries the filename and creation time. The
//! whole index lives in RAM (the FAT) and is rebuilt by scanning every header
//! at [`init`] time.
//!
//! Writing acts without erasing anything, as an erase is really slow: fresh
//! pages are taken from wherever free space is found, headers are programmed
//! with a provisional size, and the real size is programmed over it when the
//! page fills or the file closes (bits only move from 1 to 0, so a field left
//! all-ones can be finalized later). Deleting a file zeroes the header area of
//! its pages, which makes them invisible to the next scan but does not free
//! them: the garbage collector erases such sectors lazily, either a bounded
//! batch at a time ([`gc`]) or one sector per [`gc_step`] pump of the
//! cooperative sweep.
//!
//! All state sits behind one lock shared between the `FileSystem` front and
//! every open [`File`], so operations are serialized; there is no suspension
//! point inside any of them.
//!
//! [`FileSystem`]: struct.FileSystem.html
//! [`File`]: struct.File.html
//! [`init`]: struct.FileSystem.html#method.init
//! [`gc`]: struct.FileSystem.html#method.gc
//! [`gc_step`]: struct.FileSystem.html#method.gc_step

mod tests;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use spin::Mutex;

use crate::clock::Clock;
use crate::error::Error;
use crate::fat::{Fat, FileInfo, FileRef, Stats};
use crate::flash::{Flash, FlashDriver, VerifyMode};
use crate::page::{self, PageStatus, MAX_FNAME, MAX_HEADER, PAGE_SIZE, SIZE_FULL, SIZE_OPEN};

/// Number of free pages at or below which the automatic collector wakes up.
pub const DEFAULT_AUTO_GC_THRESHOLD: usize = 4;

/// Conservative payload estimate for one page, used by free-space reporting.
const PAGE_PAYLOAD_HEURISTIC: usize = PAGE_SIZE - MAX_HEADER;

/// Region and medium geometry as seen by a file-system instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Byte count of the physical device.
    pub size: u32,
    /// Byte count of the region.
    pub len: u32,
    /// First byte of the region.
    pub start: u32,
    /// One past the last byte of the region.
    pub end: u32,
    /// Number of pages in the region.
    pub pages: usize,
}

/// Free-space estimate, in payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpace {
    /// Immediately allocatable.
    pub free: usize,
    /// Allocatable once the collector has run.
    pub freeable: usize,
}

/// Access mode of an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// State of an armed cooperative sweep: the page map as it looked when the
/// sweep was armed, and the next sector to visit.
struct GcSweep {
    snapshot: Vec<PageStatus>,
    next: usize,
}

/// Everything behind the lock.
struct Fs {
    flash: Flash,
    clock: Box<dyn Clock>,
    rng: SmallRng,
    start: u32,
    end: u32,
    fat: Fat,
    /// Open handles: handle index → file id.
    handles: BTreeMap<usize, u16>,
    next_handle: usize,
    auto_gc_threshold: usize,
    /// The armed cooperative sweep, if any. `Some` doubles as the
    /// "collecting" flag: only one sweep exists at a time.
    sweep: Option<GcSweep>,
}

/// A file system over one region of a NOR flash device.
pub struct FileSystem {
    inner: Arc<Mutex<Fs>>,
}

impl core::fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FileSystem").finish()
    }
}

/// An open file.
///
/// Reads go through a seekable cursor; writes always append. Dropping an
/// unclosed handle commits it the way [`close`](#method.close) would,
/// ignoring errors.
pub struct File {
    fs: Arc<Mutex<Fs>>,
    id: u16,
    idx: usize,
    name: String,
    mode: Mode,
    r_pos: usize,
    w_pos: usize,
    /// Write address in the file's page-shaped address space: every page
    /// contributes [`PAGE_SIZE`](../page/constant.PAGE_SIZE.html) addresses,
    /// header included, so a page-aligned value means the previous page was
    /// filled exactly.
    w_addr: u32,
    dirty: bool,
    closed: bool,
}

impl core::fmt::Debug for File {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("File")
            .field("id", &self.id)
            .field("idx", &self.idx)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("r_pos", &self.r_pos)
            .field("w_pos", &self.w_pos)
            .field("w_addr", &self.w_addr)
            .field("dirty", &self.dirty)
            .field("closed", &self.closed)
            .finish()
    }
}

fn is_dirty(st: PageStatus) -> bool {
    matches!(st, PageStatus::Erased | PageStatus::Bad)
}

impl FileSystem {
    /// Binds a file system to the region `[start, end)` of `driver`'s device.
    ///
    /// The FAT starts blank; call [`init`](#method.init) to pick up whatever
    /// the medium already holds. `seed` feeds the generator behind the
    /// wear-leveling random starts; fix it to make allocation reproducible.
    ///
    /// # Errors
    ///
    /// Errors if the bounds are not sector-aligned, empty, or outside the
    /// device.
    pub fn new(
        driver: Box<dyn FlashDriver>,
        clock: Box<dyn Clock>,
        start: u32,
        end: u32,
        seed: u64,
    ) -> Result<FileSystem, Error> {
        let flash = Flash::new(driver);
        let device = flash.size();
        let page = PAGE_SIZE as u32;
        if start >= end || end > device || start % page != 0 || end % page != 0 {
            return err!(Error::InvalidSpiflashAddress);
        }
        let pages = ((end - start) as usize) / PAGE_SIZE;
        debug!("File system over [{:#x}, {:#x}): {} pages", start, end, pages);
        Ok(FileSystem {
            inner: Arc::new(Mutex::new(Fs {
                flash,
                clock,
                rng: SmallRng::seed_from_u64(seed),
                start,
                end,
                fat: Fat::blank(pages),
                handles: BTreeMap::new(),
                next_handle: 0,
                auto_gc_threshold: DEFAULT_AUTO_GC_THRESHOLD,
                sweep: None,
            })),
        })
    }

    /// Rebuilds the FAT from the medium.
    ///
    /// # Errors
    ///
    /// Errors with `FILE_OPEN` if any handle is open.
    pub fn init(&self) -> Result<(), Error> {
        let mut fs = self.inner.lock();
        fs.init()
    }

    /// Rebuilds the FAT from the medium, then hands the name-sorted file list
    /// to `cb`.
    ///
    /// # Errors
    ///
    /// Errors with `FILE_OPEN` if any handle is open.
    pub fn init_with<F: FnOnce(&[FileInfo])>(&self, cb: F) -> Result<(), Error> {
        let list = {
            let mut fs = self.inner.lock();
            get!(fs.init());
            fs.fat.file_list(false)
        };
        cb(&list);
        Ok(())
    }

    /// Region and device geometry.
    pub fn dimensions(&self) -> Dimensions {
        let fs = self.inner.lock();
        Dimensions {
            size: fs.flash.size(),
            len: fs.end - fs.start,
            start: fs.start,
            end: fs.end,
            pages: fs.fat.page_count(),
        }
    }

    /// Directory listing, sorted by name, or by creation time if `by_date`.
    pub fn file_list(&self, by_date: bool) -> Vec<FileInfo> {
        self.inner.lock().fat.file_list(by_date)
    }

    /// Whether a file with this name exists.
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.lock().fat.file_exists(FileRef::Name(name))
    }

    /// Whether some handle onto the named file is currently open.
    pub fn is_file_open(&self, name: &str) -> bool {
        let fs = self.inner.lock();
        match fs.fat.get(FileRef::Name(name)) {
            Ok(entry) => fs.handles.values().any(|&id| id == entry.id),
            Err(_) => false,
        }
    }

    /// Logical size of a file, by name or id.
    ///
    /// # Errors
    ///
    /// Errors if no such file exists.
    pub fn file_size<'a>(&self, fref: impl Into<FileRef<'a>>) -> Result<usize, Error> {
        Ok(get!(self.inner.lock().fat.get(fref.into())).size_total)
    }

    /// Creation timestamp of a file, by name or id.
    ///
    /// # Errors
    ///
    /// Errors if no such file exists.
    pub fn created<'a>(&self, fref: impl Into<FileRef<'a>>) -> Result<u32, Error> {
        Ok(get!(self.inner.lock().fat.get(fref.into())).created)
    }

    /// Opens a file.
    ///
    /// `"r"` opens an existing file for reading; `"w"` creates a fresh one for
    /// writing. There is no append mode.
    ///
    /// # Errors
    ///
    /// `INVALID_FILENAME` for an empty or over-long name, `UNKNOWN_MODE` for
    /// any mode but `"r"`/`"w"`, `FILE_NOT_FOUND` when reading a missing file,
    /// `FILE_EXISTS` when writing an existing one.
    pub fn open(&self, name: &str, mode: &str) -> Result<File, Error> {
        let mut fs = self.inner.lock();
        if name.is_empty() || name.len() > MAX_FNAME {
            return err!(Error::InvalidFilename);
        }
        let mode = match mode {
            "r" => Mode::Read,
            "w" => Mode::Write,
            _ => return err!(Error::UnknownMode),
        };
        let id = match mode {
            Mode::Read => get!(fs.fat.get(FileRef::Name(name))).id,
            Mode::Write => {
                if fs.fat.file_exists(FileRef::Name(name)) {
                    return err!(Error::FileExists);
                }
                let now = fs.clock.now();
                get!(fs.fat.get_file_id(name, now))
            }
        };
        let idx = fs.next_handle;
        fs.next_handle += 1;
        fs.handles.insert(idx, id);
        debug!("Opened {:?} (id {}) as handle {}", name, id, idx);
        Ok(File {
            fs: self.inner.clone(),
            id,
            idx,
            name: String::from(name),
            mode,
            r_pos: 0,
            w_pos: 0,
            w_addr: 0,
            dirty: false,
            closed: false,
        })
    }

    /// Erases a file: its pages' headers are zeroed and the FAT forgets it.
    /// The sectors themselves are reclaimed later by the collector.
    ///
    /// # Errors
    ///
    /// Errors if the file does not exist or is currently open.
    pub fn erase_file(&self, name: &str) -> Result<(), Error> {
        self.inner.lock().erase_file(name)
    }

    /// Erases every file.
    ///
    /// Unlike [`erase_all`](#method.erase_all), this refuses without failing
    /// when a handle is open: it logs an error and leaves everything in place.
    ///
    /// # Errors
    ///
    /// Errors only if erasing one of the files fails on the medium.
    pub fn erase_files(&self) -> Result<(), Error> {
        let mut fs = self.inner.lock();
        if !fs.handles.is_empty() {
            log::error!("erase_files refused: a file handle is open");
            return Ok(());
        }
        for f in fs.fat.file_list(false) {
            get!(fs.erase_file(&f.fname));
        }
        Ok(())
    }

    /// Physically erases the whole region and installs a blank FAT.
    ///
    /// # Errors
    ///
    /// Errors with `FILE_OPEN` if any handle is open.
    pub fn erase_all(&self) -> Result<(), Error> {
        let mut fs = self.inner.lock();
        if !fs.handles.is_empty() {
            return err!(Error::FileOpen);
        }
        let pages = fs.fat.page_count();
        fs.fat = Fat::blank(pages);
        fs.sweep = None;
        let start = fs.start;
        get!(fs.flash.with_enabled(|flash| -> Result<(), Error> {
            for i in 0..pages {
                get!(flash.erase_sector(start + (i * PAGE_SIZE) as u32));
            }
            Ok(())
        }));
        Ok(())
    }

    /// Free-space estimate: `free` counts free pages only, `freeable` also
    /// counts sectors the collector could reclaim. Both use a conservative
    /// per-page payload, so the medium never holds less than reported.
    pub fn get_free_space(&self) -> FreeSpace {
        let s = self.inner.lock().fat.stats();
        FreeSpace {
            free: s.free * PAGE_PAYLOAD_HEURISTIC,
            freeable: (s.free + s.erased) * PAGE_PAYLOAD_HEURISTIC,
        }
    }

    /// Sets the auto-collection threshold; 0 disables the automatic trigger.
    pub fn set_auto_gc(&self, threshold: usize) {
        self.inner.lock().auto_gc_threshold = threshold;
    }

    /// Collects up to `n` dirty sectors now, scanning circularly from a random
    /// index. Returns how many sectors became free.
    ///
    /// # Errors
    ///
    /// Errors if a physical erase fails.
    pub fn gc(&self, n: usize) -> Result<usize, Error> {
        self.inner.lock().gc_collect(n)
    }

    /// Arms the cooperative sweep over a snapshot of the page map. Returns
    /// false if one is already armed.
    ///
    /// The sweep does no work by itself; pump it with
    /// [`gc_step`](#method.gc_step).
    pub fn gc_async(&self) -> bool {
        let mut fs = self.inner.lock();
        if fs.sweep.is_some() {
            return false;
        }
        fs.sweep = Some(GcSweep {
            snapshot: fs.fat.page_map().to_vec(),
            next: 0,
        });
        true
    }

    /// Advances the armed sweep by one sector, erasing it if it is dirty.
    /// Returns whether the sweep is still armed afterwards.
    ///
    /// # Errors
    ///
    /// Errors if a physical erase fails; the sweep stays armed.
    pub fn gc_step(&self) -> Result<bool, Error> {
        self.inner.lock().gc_step()
    }

    /// Page counts per status.
    pub fn stats(&self) -> Stats {
        self.inner.lock().fat.stats()
    }

    /// Dumps the current state of the file system onto the diagnostic log.
    pub fn dump(&self) {
        let fs = self.inner.lock();
        let s = fs.fat.stats();
        debug!("FileSystem [{:#x}, {:#x}):", fs.start, fs.end);
        debug!(
            "  Pages: {} free, {} used, {} erased, {} bad",
            s.free, s.used, s.erased, s.bad
        );
        debug!("  Open handles: {}", fs.handles.len());
        debug!(
            "  Auto-GC threshold: {}, sweep armed: {}",
            fs.auto_gc_threshold,
            fs.sweep.is_some()
        );
        for f in fs.fat.file_list(false) {
            debug!(
                "  File {:?}: id {}, {} bytes, created {}",
                f.fname, f.id, f.size, f.created
            );
        }
    }
}

impl Fs {
    /// Address of the first byte of page `p`.
    fn page_addr(&self, p: u32) -> u32 {
        self.start + p * PAGE_SIZE as u32
    }

    fn init(&mut self) -> Result<(), Error> {
        if !self.handles.is_empty() {
            return err!(Error::FileOpen);
        }
        let pages = self.fat.page_count();
        self.fat = get!(Fat::scan(&mut self.flash, self.start, pages));
        Ok(())
    }

    fn erase_file(&mut self, name: &str) -> Result<(), Error> {
        let entry = get!(self.fat.get(FileRef::Name(name)));
        if self.handles.values().any(|&id| id == entry.id) {
            return err!(Error::FileOpen);
        }
        debug!("Erasing file {:?} (id {})", name, entry.id);
        // Zeroing the whole header area turns the page into an erased one no
        // matter which layout it carried.
        let zeros = [0u8; MAX_HEADER];
        for &p in &entry.pages {
            let addr = self.page_addr(p);
            get!(self.flash.write(addr, &zeros, VerifyMode::Post));
            self.fat.mark_page(p, PageStatus::Erased);
        }
        get!(self.fat.remove_file(name));
        self.maybe_auto_gc();
        Ok(())
    }

    /// A free page, collecting reclaimable sectors once if none is left.
    fn allocate_page(&mut self) -> Result<u32, Error> {
        if let Some(p) = self.fat.get_free_page(&mut self.rng) {
            return Ok(p);
        }
        let threshold = if self.auto_gc_threshold > 0 {
            self.auto_gc_threshold
        } else {
            DEFAULT_AUTO_GC_THRESHOLD
        };
        debug!("No free page; collecting up to {} sectors", 2 * threshold);
        get!(self.gc_collect(2 * threshold));
        match self.fat.get_free_page(&mut self.rng) {
            Some(p) => Ok(p),
            None => err!(Error::NoFreeSpace),
        }
    }

    /// Writes `data` at write address `addr` of file `id`, allocating pages as
    /// needed, and returns the advanced write address.
    ///
    /// The write address lives in the file's page-shaped address space (every
    /// page contributes `PAGE_SIZE` addresses, header included), so it is
    /// page-aligned exactly when the previous page was filled, and on the very
    /// first call, where nothing has been allocated yet.
    fn write_at(&mut self, id: u16, mut addr: u32, data: &[u8]) -> Result<u32, Error> {
        let page_sz = PAGE_SIZE as u32;
        let mut consumed = 0;
        while consumed < data.len() {
            if addr % page_sz == 0 {
                let p = get!(self.allocate_page());
                let span = self.fat.span_count(id) as u16;
                self.fat.add_page(id, p);
                self.fat.mark_page(p, PageStatus::Used);
                let header = if span == 0 {
                    let entry = get!(self.fat.get(FileRef::Id(id)));
                    page::encode_head(id, SIZE_OPEN, entry.created, &entry.fname)
                } else {
                    page::encode_cont(id, span, SIZE_OPEN).to_vec()
                };
                get!(self.flash.write(self.page_addr(p), &header, VerifyMode::Post));
                addr += header.len() as u32;
            }
            let p = self.fat.last_page(id).expect("a page was just allocated");
            let in_page = (addr % page_sz) as usize;
            let room = PAGE_SIZE - in_page;
            let n = core::cmp::min(room, data.len() - consumed);
            let dst = self.page_addr(p) + in_page as u32;
            get!(self
                .flash
                .write(dst, &data[consumed..consumed + n], VerifyMode::Post));
            self.fat.add_size_to_last_span(id, n);
            addr += n as u32;
            consumed += n;
            if addr % page_sz == 0 {
                // The page filled up; its payload length now follows from the
                // geometry alone.
                get!(self.finalize_size(p, SIZE_FULL));
            }
        }
        Ok(addr)
    }

    /// Programs the final size field of page `p`'s header.
    ///
    /// The id and span fields were programmed long ago, so the patch carries
    /// all-ones there and hardware verification is off: re-reading would
    /// compare the old values against `0xFFFF` and fail, while programming a
    /// 1-bit changes nothing on NOR.
    fn finalize_size(&mut self, p: u32, size: u16) -> Result<(), Error> {
        let patch = page::encode_size_patch(size);
        self.flash
            .write(self.page_addr(p), &patch, VerifyMode::None)
    }

    /// Reads `len` payload bytes starting at logical offset `pos`.
    fn read_at(&mut self, id: u16, pos: usize, len: usize) -> Result<Vec<u8>, Error> {
        let entry = get!(self.fat.get(FileRef::Id(id)));
        let name_len = entry.fname.len();
        let mut out = Vec::with_capacity(len);
        let mut before = 0; // payload held by the spans already passed
        for (k, (&p, &psize)) in entry.pages.iter().zip(entry.sizes.iter()).enumerate() {
            if out.len() == len {
                break;
            }
            if before + psize > pos {
                let header = if k == 0 {
                    page::head_header_len(name_len)
                } else {
                    page::FIXED_HEADER
                };
                let off = pos.saturating_sub(before);
                let n = core::cmp::min(psize - off, len - out.len());
                let src = self.page_addr(p) + (header + off) as u32;
                out.extend_from_slice(&get!(self.flash.read(src, n)));
            }
            before += psize;
        }
        Ok(out)
    }

    /// Commits and releases a handle.
    ///
    /// The handle is dropped even if finalizing the size field fails; a file
    /// that never received a byte is un-minted here, which is why opening and
    /// closing a fresh name leaves no trace.
    fn close_handle(&mut self, id: u16, idx: usize, dirty: bool) -> Result<(), Error> {
        let mut res = Ok(());
        if dirty {
            if let (Some(p), Some(size)) = (self.fat.last_page(id), self.fat.last_size(id)) {
                res = self.finalize_size(p, size as u16);
            }
        }
        self.handles.remove(&idx);
        if let Ok(entry) = self.fat.get(FileRef::Id(id)) {
            if entry.pages.is_empty() {
                debug!("Dropping empty file {:?} (id {})", entry.fname, id);
                let _ = self.fat.remove_file(&entry.fname);
            }
        }
        self.maybe_auto_gc();
        res
    }

    /// Arms the cooperative sweep if the free-page level warrants it.
    fn maybe_auto_gc(&mut self) {
        if !self.handles.is_empty() || self.auto_gc_threshold == 0 || self.sweep.is_some() {
            return;
        }
        let s = self.fat.stats();
        if s.free <= self.auto_gc_threshold && s.erased >= 1 {
            debug!(
                "Arming background collection: {} free, {} erased",
                s.free, s.erased
            );
            self.sweep = Some(GcSweep {
                snapshot: self.fat.page_map().to_vec(),
                next: 0,
            });
        }
    }

    /// Physically erases page `p`'s sector and marks it free.
    fn erase_page(&mut self, p: usize) -> Result<(), Error> {
        get!(self
            .flash
            .erase_sector(self.start + (p * PAGE_SIZE) as u32));
        self.fat.mark_page(p as u32, PageStatus::Free);
        Ok(())
    }

    fn gc_collect(&mut self, n: usize) -> Result<usize, Error> {
        let map = self.fat.page_map().to_vec();
        let len = map.len();
        if len == 0 || n == 0 {
            return Ok(0);
        }
        let from = self.rng.gen_range(0..len);
        let mut collected = 0;
        for k in 0..len {
            if collected >= n {
                break;
            }
            let i = (from + k) % len;
            if is_dirty(map[i]) {
                get!(self.erase_page(i));
                collected += 1;
            }
        }
        debug!("Collected {} sectors", collected);
        Ok(collected)
    }

    fn gc_step(&mut self) -> Result<bool, Error> {
        let visit = match self.sweep.as_mut() {
            None => return Ok(false),
            Some(sweep) => {
                if sweep.next >= sweep.snapshot.len() {
                    None
                } else {
                    let i = sweep.next;
                    sweep.next += 1;
                    Some((i, sweep.snapshot[i]))
                }
            }
        };
        let (i, snapshot_status) = match visit {
            None => {
                debug!("Background collection done");
                self.sweep = None;
                return Ok(false);
            }
            Some(v) => v,
        };
        // The snapshot may lag behind a synchronous collection that ran in the
        // meantime, so the live status decides too.
        if is_dirty(snapshot_status) && is_dirty(self.fat.page_map()[i]) {
            get!(self.erase_page(i));
        }
        Ok(true)
    }
}

impl File {
    /// Name of the file this handle is open on.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn check_open(&self) -> Result<(), Error> {
        if self.closed {
            return err!(Error::FileClosed);
        }
        Ok(())
    }

    /// Logical size of the file.
    ///
    /// This reflects every byte written so far, whether or not the last page's
    /// size field has been finalized on the medium.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed.
    pub fn len(&self) -> Result<usize, Error> {
        get!(self.check_open());
        Ok(get!(self.fs.lock().fat.get(FileRef::Id(self.id))).size_total)
    }

    /// Whether the file holds no bytes.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed.
    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(get!(self.len()) == 0)
    }

    /// Creation timestamp of the file.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed.
    pub fn created(&self) -> Result<u32, Error> {
        get!(self.check_open());
        Ok(get!(self.fs.lock().fat.get(FileRef::Id(self.id))).created)
    }

    /// Moves the read cursor to `pos`.
    ///
    /// # Errors
    ///
    /// Errors with `INVALID_PARAMETERS` past the end of the file, or if the
    /// handle is closed.
    pub fn seek(&mut self, pos: usize) -> Result<(), Error> {
        if pos > get!(self.len()) {
            return err!(Error::InvalidParameters);
        }
        self.r_pos = pos;
        Ok(())
    }

    /// Current read cursor.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed.
    pub fn tell(&self) -> Result<usize, Error> {
        get!(self.check_open());
        Ok(self.r_pos)
    }

    /// Whether the read cursor sits at or past the end of the file.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed.
    pub fn eof(&self) -> Result<bool, Error> {
        Ok(self.r_pos >= get!(self.len()))
    }

    /// Reads up to `n` bytes from the read cursor and advances it. At end of
    /// file the result is empty.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed or the medium cannot be read.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        get!(self.check_open());
        let mut fs = self.fs.lock();
        let total = get!(fs.fat.get(FileRef::Id(self.id))).size_total;
        if self.r_pos >= total {
            return Ok(Vec::new());
        }
        let n = core::cmp::min(n, total - self.r_pos);
        let out = get!(fs.read_at(self.id, self.r_pos, n));
        self.r_pos += out.len();
        Ok(out)
    }

    /// Reads from the read cursor to the end of the file.
    ///
    /// # Errors
    ///
    /// Errors if the handle is closed or the medium cannot be read.
    pub fn read_all(&mut self) -> Result<Vec<u8>, Error> {
        self.read(usize::MAX)
    }

    /// Appends `data` to the file.
    ///
    /// Writes always go to the end of the file, regardless of any seek; the
    /// bytes are on the medium when this returns, though the last page's size
    /// field is only finalized at close.
    ///
    /// # Errors
    ///
    /// Errors with `FILE_WRITE_R` on a read-only handle, `NO_FREE_SPACE` when
    /// no page can be allocated even after collecting, or if the handle is
    /// closed.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        get!(self.check_open());
        if self.mode == Mode::Read {
            return err!(Error::FileWriteR);
        }
        if data.is_empty() {
            return Ok(());
        }
        let mut fs = self.fs.lock();
        self.w_addr = get!(fs.write_at(self.id, self.w_addr, data));
        self.w_pos += data.len();
        self.dirty = true;
        Ok(())
    }

    /// Appends a string to the file, byte for byte.
    ///
    /// # Errors
    ///
    /// Same as [`write`](#method.write).
    pub fn write_str(&mut self, s: &str) -> Result<(), Error> {
        self.write(s.as_bytes())
    }

    /// Commits the handle: finalizes the last page's size field if anything
    /// was written, releases the handle slot, and un-mints a file that never
    /// received a byte.
    ///
    /// # Errors
    ///
    /// Errors with `FILE_CLOSED` on a second close.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return err!(Error::FileClosed);
        }
        self.closed = true;
        let mut fs = self.fs.lock();
        fs.close_handle(self.id, self.idx, self.dirty)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut fs = self.fs.lock();
            let _ = fs.close_handle(self.id, self.idx, self.dirty);
        }
    }
}
