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

//! Wall-clock capability.
//!
//! The clock is only used to stamp file creation times; it is injected at
//! construction so that hosts without an RTC can supply whatever counter they
//! have, and so that tests can advance time by hand.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

/// Source of the current time.
pub trait Clock {
    /// Current time in seconds. The epoch is whatever the host says it is.
    fn now(&self) -> u32;
}

/// A clock whose time only moves when told to.
#[derive(Clone)]
pub struct ManualClock {
    t: Arc<AtomicU32>,
}

impl ManualClock {
    /// Creates a clock reading `t` seconds.
    pub fn new(t: u32) -> ManualClock {
        ManualClock {
            t: Arc::new(AtomicU32::new(t)),
        }
    }

    /// Sets the clock to `t` seconds.
    pub fn set(&self, t: u32) {
        self.t.store(t, Ordering::SeqCst);
    }

    /// Moves the clock forward by `dt` seconds.
    pub fn advance(&self, dt: u32) {
        self.t.fetch_add(dt, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u32 {
        self.t.load(Ordering::SeqCst)
    }
}
