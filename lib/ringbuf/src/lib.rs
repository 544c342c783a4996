// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static trace buffers for drivers and services.
//!
//! Each module that wants to record what it is doing declares a small `Copy`
//! event type (conventionally an `enum Trace`) and a ring buffer of those
//! events:
//!
//! ```ignore
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Start(u32),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::Start(3));
//! ```
//!
//! A named buffer can be declared when a module wants more than one:
//!
//! ```ignore
//! ringbuf!(RESET_RINGBUF, Trace, 16, Trace::None);
//! ringbuf_entry!(RESET_RINGBUF, Trace::Start(3));
//! ```
//!
//! When an entry is recorded with the same source line and payload as the
//! most recent entry, the count of that entry is bumped instead of consuming
//! a new slot. A buffer can be read back from a debugger or, in tests, with
//! [`Ringbuf::last`] and [`Ringbuf::for_each`].
//!
//! Unlike a single-threaded task, the secure firmware can enter the same
//! driver from several contexts, so each buffer carries its own spin lock.
//! Recording an entry never waits on that lock for long: if another context
//! (say, the thread an interrupt preempted) still holds it after a few
//! attempts, the entry is dropped and counted in [`Ringbuf::dropped`].

#![no_std]

use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, MutexGuard};

/// Lock attempts before an entry is given up.
const LOCK_ATTEMPTS: usize = 64;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a static ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// If you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::Ringbuf<$t, $n> = $crate::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload without letting either see the
        // other's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// A single recorded event.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
struct Inner<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

/// A ring buffer of parametrized type and size. See [`ringbuf!`].
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    inner: Mutex<Inner<T, N>>,
    dropped: AtomicU32,
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last: None,
                buffer: [RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: init,
                }; N],
            }),
            dropped: AtomicU32::new(0),
        }
    }

    pub fn entry(&self, line: u16, payload: T) {
        let Some(mut inner) = self.try_lock() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        // None is treated as an out-of-range index so that the first entry
        // lands in slot 0 and never bumps an existing count.
        let last = inner.last.unwrap_or(usize::MAX);

        if let Some(ent) = inner.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            if last_plus_1 >= N {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = inner.buffer.get_mut(ndx) else {
            // Zero-sized buffer; nothing to record.
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        inner.last = Some(ndx);
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, Inner<T, N>>> {
        (0..LOCK_ATTEMPTS).find_map(|_| {
            let guard = self.inner.try_lock();
            if guard.is_none() {
                core::hint::spin_loop();
            }
            guard
        })
    }

    /// Number of entries lost because the buffer was busy.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last(&self) -> Option<RingbufEntry<T>> {
        let inner = self.inner.lock();
        inner.last.and_then(|ndx| inner.buffer.get(ndx).copied())
    }

    /// Visits every recorded entry from oldest to newest.
    pub fn for_each(&self, mut f: impl FnMut(&RingbufEntry<T>)) {
        let inner = self.inner.lock();
        let Some(last) = inner.last else {
            return;
        };
        let start = last.wrapping_add(1);
        for i in 0..N {
            let ndx = (start + i) % N;
            let ent = &inner.buffer[ndx];
            if ent.generation != 0 {
                f(ent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::vec::Vec;

    #[derive(Copy, Clone, Debug, PartialEq)]
    enum Trace {
        None,
        Event(u8),
    }

    fn payloads<const N: usize>(buf: &Ringbuf<Trace, N>) -> Vec<(Trace, u32)> {
        let mut out = Vec::new();
        buf.for_each(|e| out.push((e.payload, e.count)));
        out
    }

    #[test]
    fn empty_buffer_has_no_last() {
        let buf: Ringbuf<Trace, 4> = Ringbuf::new(Trace::None);
        assert!(buf.last().is_none());
        assert!(payloads(&buf).is_empty());
    }

    #[test]
    fn repeated_entries_are_counted() {
        let buf: Ringbuf<Trace, 4> = Ringbuf::new(Trace::None);
        buf.entry(10, Trace::Event(1));
        buf.entry(10, Trace::Event(1));
        buf.entry(10, Trace::Event(1));
        assert_eq!(payloads(&buf), [(Trace::Event(1), 3)]);
    }

    #[test]
    fn same_payload_on_other_line_is_a_new_entry() {
        let buf: Ringbuf<Trace, 4> = Ringbuf::new(Trace::None);
        buf.entry(10, Trace::Event(1));
        buf.entry(11, Trace::Event(1));
        assert_eq!(payloads(&buf), [(Trace::Event(1), 1), (Trace::Event(1), 1)]);
    }

    #[test]
    fn wraps_and_keeps_newest() {
        let buf: Ringbuf<Trace, 3> = Ringbuf::new(Trace::None);
        for i in 0..5 {
            buf.entry(1, Trace::Event(i));
        }
        assert_eq!(
            payloads(&buf),
            [(Trace::Event(2), 1), (Trace::Event(3), 1), (Trace::Event(4), 1)]
        );
        let last = buf.last().unwrap();
        assert_eq!(last.payload, Trace::Event(4));
        assert_eq!(last.generation, 2);
    }

    #[test]
    fn busy_buffer_drops_instead_of_waiting() {
        let buf: Ringbuf<Trace, 4> = Ringbuf::new(Trace::None);
        buf.entry(1, Trace::Event(1));

        let held = buf.inner.lock();
        buf.entry(2, Trace::Event(2));
        buf.entry(2, Trace::Event(2));
        drop(held);

        assert_eq!(buf.dropped(), 2);
        assert_eq!(payloads(&buf), [(Trace::Event(1), 1)]);

        buf.entry(3, Trace::Event(3));
        assert_eq!(buf.last().unwrap().payload, Trace::Event(3));
        assert_eq!(buf.dropped(), 2);
    }

    #[test]
    fn macros_declare_and_record() {
        ringbuf!(TEST_RINGBUF, Trace, 8, Trace::None);
        ringbuf_entry!(TEST_RINGBUF, Trace::Event(7));
        assert_eq!(TEST_RINGBUF.last().unwrap().payload, Trace::Event(7));
    }
}
