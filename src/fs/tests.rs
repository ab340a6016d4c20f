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

#![cfg(test)]
#![allow(unused_variables, unused_mut)]

use super::*;
use crate::clock::ManualClock;
use crate::flash::ram::RamFlash;
use alloc::format;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use speculate::speculate;

const PAGES: usize = 16;
const REGION: u32 = (PAGES * PAGE_SIZE) as u32;

/// Deterministic junk.
fn fill(n: usize, seed: u8) -> Vec<u8> {
    (0..n)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

speculate! {
    describe "file system" {
        before {
            let ram = RamFlash::new(PAGES * PAGE_SIZE, PAGE_SIZE);
            let mem = ram.mem();
            let fault = ram.fault();
            let clock = ManualClock::new(1_000);
            let fs = FileSystem::new(Box::new(ram), Box::new(clock.clone()), 0, REGION, 42).unwrap();
            fs.init().unwrap();
        }

        describe "construction" {
            it "rejects misaligned or out-of-range regions" {
                let mk = || Box::new(RamFlash::new(PAGES * PAGE_SIZE, PAGE_SIZE)) as Box<dyn FlashDriver>;
                let clk = || Box::new(ManualClock::new(0)) as Box<dyn Clock>;
                assert_eq!(
                    FileSystem::new(mk(), clk(), 1, REGION, 0).unwrap_err(),
                    Error::InvalidSpiflashAddress
                );
                assert_eq!(
                    FileSystem::new(mk(), clk(), 0, REGION - 1, 0).unwrap_err(),
                    Error::InvalidSpiflashAddress
                );
                assert_eq!(
                    FileSystem::new(mk(), clk(), 0, REGION + PAGE_SIZE as u32, 0).unwrap_err(),
                    Error::InvalidSpiflashAddress
                );
                assert_eq!(
                    FileSystem::new(mk(), clk(), REGION, REGION, 0).unwrap_err(),
                    Error::InvalidSpiflashAddress
                );
            }

            it "reports its dimensions" {
                let d = fs.dimensions();
                assert_eq!(d, Dimensions {
                    size: REGION,
                    len: REGION,
                    start: 0,
                    end: REGION,
                    pages: PAGES,
                });
            }
        }

        describe "listing and lookup" {
            it "starts with no files" {
                assert!(fs.file_list(false).is_empty());
            }

            it "does not persist a file that never received a byte" {
                let mut f = fs.open("a.txt", "w").unwrap();
                f.close().unwrap();
                assert!(fs.file_list(false).is_empty());
                assert!(!fs.file_exists("a.txt"));
                assert_eq!(fs.stats().used, 0);
            }

            it "records size and creation time" {
                clock.set(1234);
                let mut f = fs.open("b.txt", "w").unwrap();
                f.write(b"hello").unwrap();
                f.close().unwrap();
                assert_eq!(fs.file_size("b.txt").unwrap(), 5);
                assert_eq!(fs.created("b.txt").unwrap(), 1234);
            }

            it "lists by name and by date" {
                let order = [("b", 30u32), ("a", 40), ("c", 20)];
                for &(name, t) in order.iter() {
                    clock.set(t);
                    let mut f = fs.open(name, "w").unwrap();
                    f.write(b"x").unwrap();
                    f.close().unwrap();
                }
                let by_name: Vec<_> = fs.file_list(false).into_iter().map(|f| f.fname).collect();
                assert_eq!(by_name, ["a", "b", "c"]);
                let by_date: Vec<_> = fs.file_list(true).into_iter().map(|f| f.fname).collect();
                assert_eq!(by_date, ["c", "b", "a"]);
            }

            it "resolves files by name or id" {
                let mut f = fs.open("byid", "w").unwrap();
                f.write(b"abc").unwrap();
                f.close().unwrap();
                let id = fs.file_list(false)[0].id;
                assert_eq!(fs.file_size(id).unwrap(), 3);
                assert_eq!(fs.created(id).unwrap(), fs.created("byid").unwrap());
                assert_eq!(fs.file_size(9999u16).unwrap_err(), Error::FileNotFound);
            }

            it "knows which files are open" {
                let mut f = fs.open("a", "w").unwrap();
                f.write(b"x").unwrap();
                assert!(fs.is_file_open("a"));
                assert!(!fs.is_file_open("b"));
                f.close().unwrap();
                assert!(!fs.is_file_open("a"));
            }
        }

        describe "open" {
            it "validates names and modes" {
                assert_eq!(fs.open("", "w").unwrap_err(), Error::InvalidFilename);
                let long = "x".repeat(MAX_FNAME + 1);
                assert_eq!(fs.open(&long, "w").unwrap_err(), Error::InvalidFilename);
                assert_eq!(fs.open("a", "a").unwrap_err(), Error::UnknownMode);
                assert_eq!(fs.open("a", "rw").unwrap_err(), Error::UnknownMode);
                assert_eq!(fs.open("a", "r").unwrap_err(), Error::FileNotFound);
            }

            it "accepts a name of exactly the maximum length" {
                let name = "y".repeat(MAX_FNAME);
                let mut f = fs.open(&name, "w").unwrap();
                f.write(b"z").unwrap();
                f.close().unwrap();
                assert_eq!(fs.file_size(name.as_str()).unwrap(), 1);
                fs.init().unwrap();
                assert_eq!(fs.file_size(name.as_str()).unwrap(), 1);
            }

            it "refuses to recreate an existing file" {
                let mut f = fs.open("a", "w").unwrap();
                f.write(b"x").unwrap();
                f.close().unwrap();
                assert_eq!(fs.open("a", "w").unwrap_err(), Error::FileExists);
            }
        }

        describe "round trips" {
            it "round-trips a small file" {
                let mut f = fs.open("small", "w").unwrap();
                f.write(b"hello world").unwrap();
                f.close().unwrap();
                let mut f = fs.open("small", "r").unwrap();
                assert_eq!(f.read_all().unwrap(), b"hello world");
                f.close().unwrap();
            }

            it "splits a large file across pages" {
                let data = fill(6232, 1);
                let mut f = fs.open("test.txt", "w").unwrap();
                f.write(&data).unwrap();
                assert_eq!(f.len().unwrap(), 6232);
                f.close().unwrap();
                assert_eq!(fs.stats().used, 2);
                // span 0 holds the page minus its 19-byte header, span 1 the rest
                let head_payload = PAGE_SIZE - page::head_header_len("test.txt".len());
                assert_eq!(head_payload, PAGE_SIZE - 19);
                let mut f = fs.open("test.txt", "r").unwrap();
                assert_eq!(f.read(head_payload).unwrap(), &data[..head_payload]);
                assert_eq!(f.read_all().unwrap(), &data[head_payload..]);
                f.close().unwrap();
            }

            it "survives a rescan" {
                let data = fill(6232, 2);
                clock.set(7777);
                let mut f = fs.open("test.txt", "w").unwrap();
                f.write(&data).unwrap();
                f.close().unwrap();
                fs.init().unwrap();
                assert_eq!(fs.file_size("test.txt").unwrap(), 6232);
                assert_eq!(fs.created("test.txt").unwrap(), 7777);
                let mut f = fs.open("test.txt", "r").unwrap();
                assert_eq!(f.read_all().unwrap(), data);
                f.close().unwrap();
            }

            it "keeps the listing stable across a restart" {
                for i in 0..3 {
                    let mut f = fs.open(&format!("file{}", i), "w").unwrap();
                    f.write(&fill(10 * (i + 1), i as u8)).unwrap();
                    f.close().unwrap();
                }
                let before_restart = fs.file_list(false);
                fs.init().unwrap();
                assert_eq!(fs.file_list(false), before_restart);
            }

            it "lands chunked writes back to back" {
                let mut f = fs.open("chunks", "w").unwrap();
                f.write(b"abc").unwrap();
                f.write(b"defg").unwrap();
                f.write(b"").unwrap();
                f.close().unwrap();
                let mut f = fs.open("chunks", "r").unwrap();
                assert_eq!(f.read_all().unwrap(), b"abcdefg");
                f.close().unwrap();
            }

            it "records a full page as full on the medium" {
                let cap = PAGE_SIZE - page::head_header_len(4);
                let mut f = fs.open("full", "w").unwrap();
                f.write(&fill(cap, 3)).unwrap();
                f.close().unwrap();
                assert_eq!(fs.file_size("full").unwrap(), cap);
                let mem = mem.lock();
                let mut found = false;
                for p in 0..PAGES {
                    let base = p * PAGE_SIZE;
                    if mem[base] != 0xFF || mem[base + 1] != 0xFF {
                        // the on-medium size field of the only used page is 0
                        assert_eq!(&mem[base + 4..base + 6], &[0, 0]);
                        found = true;
                    }
                }
                assert!(found);
            }
        }

        describe "cursors" {
            before {
                let mut f = fs.open("cur", "w").unwrap();
                f.write(b"0123456789").unwrap();
                f.close().unwrap();
                let mut f = fs.open("cur", "r").unwrap();
            }

            it "seeks and tells" {
                assert_eq!(f.tell().unwrap(), 0);
                f.seek(4).unwrap();
                assert_eq!(f.tell().unwrap(), 4);
                assert_eq!(f.read(3).unwrap(), b"456");
                assert_eq!(f.tell().unwrap(), 7);
            }

            it "reads nothing at the end" {
                f.seek(10).unwrap();
                assert!(f.read(5).unwrap().is_empty());
                assert!(f.eof().unwrap());
            }

            it "rejects seeking past the end" {
                assert_eq!(f.seek(11).unwrap_err(), Error::InvalidParameters);
            }

            it "reports length and eof" {
                assert_eq!(f.len().unwrap(), 10);
                assert!(!f.is_empty().unwrap());
                assert!(!f.eof().unwrap());
                assert_eq!(f.read_all().unwrap().len(), 10);
                assert!(f.eof().unwrap());
            }
        }

        describe "handle discipline" {
            it "rejects writing through a read handle" {
                let mut f = fs.open("a", "w").unwrap();
                f.write(b"x").unwrap();
                f.close().unwrap();
                let mut f = fs.open("a", "r").unwrap();
                assert_eq!(f.write(b"y").unwrap_err(), Error::FileWriteR);
                f.close().unwrap();
            }

            it "rejects a second close" {
                let mut f = fs.open("a", "w").unwrap();
                f.close().unwrap();
                assert_eq!(f.close().unwrap_err(), Error::FileClosed);
            }

            it "rejects every operation on a closed handle" {
                let mut f = fs.open("a", "w").unwrap();
                f.write(b"x").unwrap();
                f.close().unwrap();
                assert_eq!(f.read(1).unwrap_err(), Error::FileClosed);
                assert_eq!(f.write(b"y").unwrap_err(), Error::FileClosed);
                assert_eq!(f.seek(0).unwrap_err(), Error::FileClosed);
                assert_eq!(f.tell().unwrap_err(), Error::FileClosed);
                assert_eq!(f.len().unwrap_err(), Error::FileClosed);
                assert_eq!(f.eof().unwrap_err(), Error::FileClosed);
                assert_eq!(f.created().unwrap_err(), Error::FileClosed);
            }

            it "commits on drop" {
                {
                    let mut f = fs.open("d", "w").unwrap();
                    f.write(b"kept").unwrap();
                }
                fs.init().unwrap(); // no handle left open
                assert_eq!(fs.file_size("d").unwrap(), 4);
            }

            it "blocks init and erase_all while a handle is open" {
                let mut f = fs.open("a", "w").unwrap();
                assert_eq!(fs.init().unwrap_err(), Error::FileOpen);
                assert_eq!(fs.erase_all().unwrap_err(), Error::FileOpen);
                f.close().unwrap();
            }

            it "hands the scanned listing to the init callback" {
                let mut f = fs.open("seen", "w").unwrap();
                f.write(b"abc").unwrap();
                f.close().unwrap();
                let mut names = Vec::new();
                fs.init_with(|list| {
                    names = list.iter().map(|f| f.fname.clone()).collect();
                }).unwrap();
                assert_eq!(names, ["seen"]);
            }
        }

        describe "erasing" {
            before {
                let mut f = fs.open("victim", "w").unwrap();
                f.write(&fill(5000, 4)).unwrap(); // two pages
                f.close().unwrap();
            }

            it "marks pages erased without touching the sectors" {
                fs.erase_file("victim").unwrap();
                assert!(!fs.file_exists("victim"));
                let s = fs.stats();
                assert_eq!(s.erased, 2);
                assert_eq!(s.used, 0);
                // headers zeroed on the medium, payload bits still in place
                let mem = mem.lock();
                let zeroed = (0..PAGES).filter(|p| mem[p * PAGE_SIZE] == 0).count();
                assert_eq!(zeroed, 2);
            }

            it "frees erased sectors one gc call at a time" {
                fs.erase_file("victim").unwrap();
                let before_gc = fs.stats();
                assert_eq!(fs.gc(1).unwrap(), 1);
                let after = fs.stats();
                assert_eq!(after.free, before_gc.free + 1);
                assert_eq!(after.erased, before_gc.erased - 1);
            }

            it "gc is idempotent once everything is clean" {
                fs.erase_file("victim").unwrap();
                fs.gc(PAGES).unwrap();
                let clean = fs.stats();
                assert_eq!(clean.free, PAGES);
                assert_eq!(fs.gc(PAGES).unwrap(), 0);
                assert_eq!(fs.stats(), clean);
            }

            it "refuses to erase an open file" {
                let mut f = fs.open("victim", "r").unwrap();
                assert_eq!(fs.erase_file("victim").unwrap_err(), Error::FileOpen);
                f.close().unwrap();
            }

            it "reports a missing file" {
                assert_eq!(fs.erase_file("nope").unwrap_err(), Error::FileNotFound);
            }

            it "erase_files refuses silently while a handle is open" {
                let mut f = fs.open("other", "w").unwrap();
                f.write(b"x").unwrap();
                fs.erase_files().unwrap(); // logs and leaves everything alone
                assert!(fs.file_exists("victim"));
                f.close().unwrap();
                fs.erase_files().unwrap();
                assert!(fs.file_list(false).is_empty());
            }

            it "erase_all wipes the region" {
                fs.erase_all().unwrap();
                assert!(fs.file_list(false).is_empty());
                assert_eq!(fs.stats().free, PAGES);
                assert!(mem.lock().iter().all(|&b| b == 0xFF));
            }
        }

        describe "space" {
            it "fills the region and reports exhaustion" {
                for i in 0..PAGES {
                    let mut f = fs.open(&format!("f{:02}", i), "w").unwrap();
                    f.write(&fill(100, i as u8)).unwrap();
                    f.close().unwrap();
                }
                assert_eq!(fs.stats().free, 0);
                let mut f = fs.open("extra", "w").unwrap();
                assert_eq!(f.write(b"x").unwrap_err(), Error::NoFreeSpace);
                f.close().unwrap();
                assert!(!fs.file_exists("extra"));
            }

            it "collects reclaimable sectors instead of failing" {
                for i in 0..PAGES {
                    let mut f = fs.open(&format!("f{:02}", i), "w").unwrap();
                    f.write(&fill(100, i as u8)).unwrap();
                    f.close().unwrap();
                }
                fs.erase_file("f00").unwrap();
                let mut f = fs.open("extra", "w").unwrap();
                f.write(b"hello").unwrap(); // allocation collects the erased sector
                f.close().unwrap();
                assert_eq!(fs.file_size("extra").unwrap(), 5);
            }

            it "loses the race for the last free page" {
                for i in 0..PAGES - 1 {
                    let mut f = fs.open(&format!("f{:02}", i), "w").unwrap();
                    f.write(&fill(100, i as u8)).unwrap();
                    f.close().unwrap();
                }
                let mut a = fs.open("racer_a", "w").unwrap();
                let mut b = fs.open("racer_b", "w").unwrap();
                a.write(b"first").unwrap();
                assert_eq!(b.write(b"second").unwrap_err(), Error::NoFreeSpace);
                a.close().unwrap();
                b.close().unwrap();
                assert_eq!(fs.file_size("racer_a").unwrap(), 5);
                assert!(!fs.file_exists("racer_b"));
            }

            it "estimates free space conservatively" {
                let payload = PAGE_SIZE - MAX_HEADER;
                assert_eq!(fs.get_free_space(), FreeSpace {
                    free: PAGES * payload,
                    freeable: PAGES * payload,
                });
                let mut f = fs.open("a", "w").unwrap();
                f.write(b"x").unwrap();
                f.close().unwrap();
                fs.erase_file("a").unwrap();
                let est = fs.get_free_space();
                assert_eq!(est.free, (PAGES - 1) * payload);
                assert_eq!(est.freeable, PAGES * payload);
            }
        }

        describe "background collection" {
            before {
                let mut f = fs.open("bg", "w").unwrap();
                f.write(&fill(100, 9)).unwrap();
                f.close().unwrap();
            }

            it "pumps one sector per step" {
                fs.erase_file("bg").unwrap();
                assert!(fs.gc_async());
                assert!(!fs.gc_async()); // one sweep at a time
                let mut steps = 0;
                while fs.gc_step().unwrap() {
                    steps += 1;
                }
                assert_eq!(steps, PAGES);
                assert_eq!(fs.stats().erased, 0);
                assert_eq!(fs.stats().free, PAGES);
                assert!(!fs.gc_step().unwrap()); // idle again
            }

            it "arms itself when free pages run low" {
                fs.set_auto_gc(PAGES); // any erase now leaves free ≤ threshold
                fs.erase_file("bg").unwrap();
                let mut progressed = false;
                while fs.gc_step().unwrap() {
                    progressed = true;
                }
                assert!(progressed);
                assert_eq!(fs.stats().erased, 0);
            }

            it "stays quiet when disabled" {
                fs.set_auto_gc(0);
                fs.erase_file("bg").unwrap();
                assert!(!fs.gc_step().unwrap());
                assert_eq!(fs.stats().erased, 1);
            }

            it "stays quiet while free pages are plentiful" {
                fs.erase_file("bg").unwrap(); // free is way above the default threshold
                assert!(!fs.gc_step().unwrap());
            }
        }

        describe "medium failures" {
            it "surfaces verification failures" {
                let mut f = fs.open("v", "w").unwrap();
                fault.store(1, Ordering::SeqCst);
                assert_eq!(f.write(b"x").unwrap_err(), Error::Validation);
                f.close().unwrap();
            }
        }
    }
}
