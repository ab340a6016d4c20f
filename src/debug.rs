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

//! Diagnostic macros, routed through the `log` facade.
//!
//! The crate never installs a logger; hosts that want the diagnostics bring
//! their own `log` implementation.

/// Formats a diagnostic message, `println!`-like, at debug level.
#[macro_export]
macro_rules! debug {
    ($($arg:tt)+) => {{
        ::log::debug!($($arg)+);
    }};
}

/// Makes an error and logs it at the site where it is minted.
#[macro_export]
macro_rules! err {
    ($x:expr) => {{
        let e = $x;
        debug!("Error at {}:{}: {:?}", file!(), line!(), e);
        Err(e)
    }};
}

/// Forwards an error up (`?`-like) while logging the crossing site.
#[macro_export]
macro_rules! get {
    ($x:expr) => {{
        match $x {
            Ok(x) => x,
            Err(e) => {
                debug!("  Error at {}:{}: {:?}", file!(), line!(), e);
                Err(e)?
            }
        }
    }};
}
