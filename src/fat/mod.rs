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

//! In-memory file allocation table.
//!
//! The medium carries no on-disk directory: the FAT is rebuilt in RAM on every
//! init by scanning all page headers, and kept current by the file-system core
//! afterwards. It maps names to file ids, each id to its pages in span order
//! with the payload size of every span, and tracks the status of every page of
//! the region.
//!
//! Free pages are handed out starting from a uniformly random index, which
//! amortizes wear across the physical cells under steady-state write/erase
//! cycles.


use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use rand::rngs::SmallRng;
use rand::Rng;

use crate::error::Error;
use crate::flash::Flash;
use crate::page::{self, PageStatus, Parsed, MAX_FILE_ID, MAX_HEADER, PAGE_SIZE};

/// Reference to a file, either by name or by id.
#[derive(Debug, Clone, Copy)]
pub enum FileRef<'a> {
    /// By filename.
    Name(&'a str),
    /// By file id.
    Id(u16),
}

impl<'a> From<&'a str> for FileRef<'a> {
    fn from(name: &'a str) -> FileRef<'a> {
        FileRef::Name(name)
    }
}

impl From<u16> for FileRef<'static> {
    fn from(id: u16) -> FileRef<'static> {
        FileRef::Id(id)
    }
}

/// Aggregate of everything the FAT knows about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File id.
    pub id: u16,
    /// Filename.
    pub fname: String,
    /// Highest span index.
    pub spans: u16,
    /// Page numbers, span 0 first.
    pub pages: Vec<u32>,
    /// Payload bytes held by each span, parallel to `pages`.
    pub sizes: Vec<usize>,
    /// Logical size of the file.
    pub size_total: usize,
    /// Creation timestamp.
    pub created: u32,
}

/// One row of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File id.
    pub id: u16,
    /// Filename.
    pub fname: String,
    /// Logical size of the file.
    pub size: usize,
    /// Creation timestamp.
    pub created: u32,
}

/// Page counts per status.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Pages of erased raw flash.
    pub free: usize,
    /// Pages holding file data.
    pub used: usize,
    /// Logically deleted pages awaiting physical erase.
    pub erased: usize,
    /// Pages with a broken header.
    pub bad: usize,
}

/// The file allocation table.
pub struct Fat {
    /// Filename → id. Filenames are unique.
    names: BTreeMap<String, u16>,

    /// Id → page numbers, span 0 first.
    pages: BTreeMap<u16, Vec<u32>>,

    /// Id → payload bytes per span, parallel to `pages`.
    sizes: BTreeMap<u16, Vec<usize>>,

    /// Id → highest span index (also the current span while writing).
    spans: BTreeMap<u16, u16>,

    /// Id → creation timestamp, copied from the head page.
    created: BTreeMap<u16, u32>,

    /// Status of every page of the region, indexed by page number.
    page_map: Vec<PageStatus>,

    /// Last id handed out; minting continues from here, rolling over at
    /// [`MAX_FILE_ID`](../page/constant.MAX_FILE_ID.html).
    last_id: u16,
}

impl Fat {
    /// A blank FAT over `pages` pages of erased flash.
    pub fn blank(pages: usize) -> Fat {
        Fat {
            names: BTreeMap::new(),
            pages: BTreeMap::new(),
            sizes: BTreeMap::new(),
            spans: BTreeMap::new(),
            created: BTreeMap::new(),
            page_map: alloc::vec![PageStatus::Free; pages],
            last_id: 0,
        }
    }

    /// Rebuilds a FAT by decoding every page header of the `pages_n`-page
    /// region starting at `start`.
    ///
    /// A continuation run whose head page is gone (a partially completed
    /// erase) cannot be named, so it is not entered into the tables; its pages
    /// are marked erased instead, which makes the collector reclaim them.
    ///
    /// # Errors
    ///
    /// Errors if reading a header fails.
    pub fn scan(flash: &mut Flash, start: u32, pages_n: usize) -> Result<Fat, Error> {
        debug!("Scanning {} pages from {:#x}", pages_n, start);
        let mut fat = Fat::blank(pages_n);
        // id → span → (page number, payload size)
        let mut by_span: BTreeMap<u16, BTreeMap<u16, (u32, usize)>> = BTreeMap::new();
        // id → (filename, created), from the head page
        let mut heads: BTreeMap<u16, (String, u32)> = BTreeMap::new();

        flash.with_enabled(|flash| -> Result<(), Error> {
            for idx in 0..pages_n {
                let raw = get!(flash.read(start + (idx * PAGE_SIZE) as u32, MAX_HEADER));
                let parsed = page::parse(&raw);
                fat.page_map[idx] = parsed.status();
                if let Parsed::Used(h) = parsed {
                    let size = page::decoded_size(&h);
                    if let Some(head) = h.head {
                        heads.insert(h.id, (head.fname, head.created));
                    }
                    by_span
                        .entry(h.id)
                        .or_insert_with(BTreeMap::new)
                        .insert(h.span, (idx as u32, size));
                }
            }
            Ok(())
        })?;

        for (id, spans) in by_span {
            match heads.remove(&id) {
                None => {
                    debug!("Found {} orphaned pages of id {}", spans.len(), id);
                    for &(p, _) in spans.values() {
                        fat.page_map[p as usize] = PageStatus::Erased;
                    }
                }
                Some((fname, created)) => {
                    let top = *spans.keys().next_back().expect("span table never empty");
                    fat.names.insert(fname, id);
                    fat.created.insert(id, created);
                    fat.spans.insert(id, top);
                    fat.pages.insert(id, spans.values().map(|&(p, _)| p).collect());
                    fat.sizes.insert(id, spans.values().map(|&(_, s)| s).collect());
                    if id > fat.last_id {
                        fat.last_id = id;
                    }
                }
            }
        }
        debug!("Scan found {} files", fat.names.len());
        Ok(fat)
    }

    /// Resolves a reference to an id, if the file exists.
    fn id_of(&self, fref: FileRef) -> Option<u16> {
        match fref {
            FileRef::Name(name) => self.names.get(name).copied(),
            FileRef::Id(id) if self.created.contains_key(&id) => Some(id),
            FileRef::Id(_) => None,
        }
    }

    /// Whether a file with this name or id exists.
    pub fn file_exists(&self, fref: FileRef) -> bool {
        self.id_of(fref).is_some()
    }

    /// Name of the file with this id.
    fn fname_of(&self, id: u16) -> Option<&str> {
        self.names
            .iter()
            .find(|&(_, &i)| i == id)
            .map(|(name, _)| name.as_str())
    }

    /// Everything known about a file.
    ///
    /// # Errors
    ///
    /// Errors if no such file exists.
    pub fn get(&self, fref: FileRef) -> Result<FileEntry, Error> {
        let id = match self.id_of(fref) {
            Some(id) => id,
            None => return err!(Error::FileNotFound),
        };
        let sizes = self.sizes[&id].clone();
        Ok(FileEntry {
            id,
            fname: String::from(self.fname_of(id).expect("named tables in sync")),
            spans: self.spans[&id],
            pages: self.pages[&id].clone(),
            size_total: sizes.iter().sum(),
            sizes,
            created: self.created[&id],
        })
    }

    /// Id of the named file, minting a fresh one if the name is new.
    ///
    /// A minted file starts with an empty page list and `created = now`; it
    /// only reaches the medium once a byte is written to it.
    ///
    /// # Errors
    ///
    /// Errors if all 65534 ids are taken.
    pub fn get_file_id(&mut self, name: &str, now: u32) -> Result<u16, Error> {
        if let Some(&id) = self.names.get(name) {
            return Ok(id);
        }
        let id = get!(self.mint_id());
        self.names.insert(String::from(name), id);
        self.pages.insert(id, Vec::new());
        self.sizes.insert(id, Vec::new());
        self.spans.insert(id, 0);
        self.created.insert(id, now);
        Ok(id)
    }

    /// Next unused id after `last_id`, skipping the 0 and 0xFFFF sentinels.
    fn mint_id(&mut self) -> Result<u16, Error> {
        for _ in 0..MAX_FILE_ID {
            self.last_id = if self.last_id >= MAX_FILE_ID {
                1
            } else {
                self.last_id + 1
            };
            if !self.created.contains_key(&self.last_id) {
                return Ok(self.last_id);
            }
        }
        err!(Error::NoFreeSpace)
    }

    /// Directory listing, sorted by name, or by creation time if `by_date`.
    pub fn file_list(&self, by_date: bool) -> Vec<FileInfo> {
        let mut out: Vec<FileInfo> = self
            .names
            .iter()
            .map(|(name, &id)| FileInfo {
                id,
                fname: name.clone(),
                size: self.sizes[&id].iter().sum(),
                created: self.created[&id],
            })
            .collect();
        if by_date {
            // The stable sort keeps name order within equal timestamps.
            out.sort_by_key(|f| f.created);
        }
        out
    }

    /// First free page, scanning linearly from a uniformly random index and
    /// retrying from zero before giving up.
    pub fn get_free_page(&mut self, rng: &mut SmallRng) -> Option<u32> {
        let n = self.page_map.len();
        if n == 0 {
            return None;
        }
        let from = rng.gen_range(0..n);
        (from..n)
            .chain(0..n)
            .find(|&idx| self.page_map[idx] == PageStatus::Free)
            .map(|idx| idx as u32)
    }

    /// Updates the status of a page. No I/O happens here.
    pub fn mark_page(&mut self, p: u32, status: PageStatus) {
        self.page_map[p as usize] = status;
    }

    /// Read-only view of the page map.
    pub fn page_map(&self) -> &[PageStatus] {
        &self.page_map
    }

    /// Number of pages tracked by this FAT.
    pub fn page_count(&self) -> usize {
        self.page_map.len()
    }

    /// Appends a page to a file, opening a new zero-size span.
    ///
    /// # Panics
    ///
    /// Panics if the id was never minted.
    pub fn add_page(&mut self, id: u16, p: u32) {
        let pages = self.pages.get_mut(&id).expect("add_page on unminted id");
        pages.push(p);
        self.sizes.get_mut(&id).expect("tables in sync").push(0);
        self.spans.insert(id, (pages.len() - 1) as u16);
    }

    /// Adds `n` payload bytes to the file's current (last) span.
    ///
    /// # Panics
    ///
    /// Panics if the file has no span yet.
    pub fn add_size_to_last_span(&mut self, id: u16, n: usize) {
        let sizes = self.sizes.get_mut(&id).expect("unminted id");
        *sizes.last_mut().expect("no span open") += n;
    }

    /// Number of spans the file currently has; also the index of the span a
    /// fresh page would open.
    pub fn span_count(&self, id: u16) -> usize {
        self.pages.get(&id).map_or(0, Vec::len)
    }

    /// Page holding the file's last span.
    pub fn last_page(&self, id: u16) -> Option<u32> {
        self.pages.get(&id).and_then(|p| p.last().copied())
    }

    /// Payload bytes in the file's last span.
    pub fn last_size(&self, id: u16) -> Option<usize> {
        self.sizes.get(&id).and_then(|s| s.last().copied())
    }

    /// Drops every table entry of the named file.
    ///
    /// # Errors
    ///
    /// Errors if no such file exists.
    pub fn remove_file(&mut self, name: &str) -> Result<u16, Error> {
        let id = match self.names.remove(name) {
            Some(id) => id,
            None => return err!(Error::FileNotFound),
        };
        self.pages.remove(&id);
        self.sizes.remove(&id);
        self.spans.remove(&id);
        self.created.remove(&id);
        Ok(id)
    }

    /// Calls `f` with each page of the file, in ascending span order.
    ///
    /// # Errors
    ///
    /// Errors if no such file exists.
    pub fn for_each_page<F: FnMut(u32)>(&self, fref: FileRef, mut f: F) -> Result<(), Error> {
        let entry = get!(self.get(fref));
        for &p in &entry.pages {
            f(p);
        }
        Ok(())
    }

    /// Page counts per status.
    pub fn stats(&self) -> Stats {
        let mut s = Stats::default();
        for st in &self.page_map {
            match st {
                PageStatus::Free => s.free += 1,
                PageStatus::Used => s.used += 1,
                PageStatus::Erased => s.erased += 1,
                PageStatus::Bad => s.bad += 1,
            }
        }
        s
    }
}
