// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing kernel and application events.
//!
//! This is a fixed-capacity trace buffer designed to be instantiated as a
//! static and fed small `Copy` payloads at interesting moments. While
//! nothing prevents leaving a ring buffer in production code, the design
//! center is debugging: the buffers can be read out of a memory image or,
//! on hosted builds, dumped at the end of a run.
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, naming the
//! static, the payload type, and the capacity:
//!
//! ```ignore
//! ringbuf!(TRACE, Trace, 32);
//! ```
//!
//! Entries are recorded with [`ringbuf_entry!`]:
//!
//! ```ignore
//! ringbuf_entry!(TRACE, Trace::QueueSwitch(mode));
//! ```
//!
//! ## Entry de-duplication
//!
//! When the same payload is recorded several times in a row, the repeats
//! are folded into a counter on the most recent entry instead of consuming
//! new slots. This keeps a buffer from filling up with the steady-state
//! event and losing the history that led there. The payload type must
//! implement `PartialEq` for this comparison.
//!
//! The static form wraps the buffer in a spinlock so that it can be fed
//! from more than one context (the hosted rescue worker, tests running in
//! parallel threads). Contention is expected to be nil; the lock is only
//! ever held for the few instructions of a record.

#![cfg_attr(not(test), no_std)]

/// One recorded trace entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Entry<T> {
    pub payload: T,
    /// Number of *additional* back-to-back occurrences folded into this
    /// entry; 0 means the payload was seen exactly once.
    pub repeats: u16,
}

/// Fixed-capacity trace buffer. Usually not used directly; see the
/// [`ringbuf!`] macro and [`StaticRingbuf`].
#[derive(Clone, Debug)]
pub struct Ringbuf<T, const N: usize> {
    entries: [Option<Entry<T>>; N],
    /// Slot that the next distinct payload will be written to.
    next: usize,
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new() -> Self {
        Self {
            entries: [None; N],
            next: 0,
        }
    }

    /// Records `payload`, folding it into the previous entry if it is a
    /// back-to-back repeat.
    pub fn record(&mut self, payload: T) {
        if N == 0 {
            return;
        }
        let prev = if self.next == 0 { N - 1 } else { self.next - 1 };
        if let Some(e) = &mut self.entries[prev] {
            if e.payload == payload && e.repeats < u16::MAX {
                e.repeats += 1;
                return;
            }
        }
        self.entries[self.next] = Some(Entry { payload, repeats: 0 });
        self.next = (self.next + 1) % N;
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last(&self) -> Option<&Entry<T>> {
        if N == 0 {
            return None;
        }
        let prev = if self.next == 0 { N - 1 } else { self.next - 1 };
        self.entries[prev].as_ref()
    }

    /// Iterates entries oldest-first. Once the buffer has wrapped, the
    /// oldest surviving entry is the one `next` is about to overwrite.
    pub fn iter(&self) -> impl Iterator<Item = &Entry<T>> {
        let (tail, head) = self.entries.split_at(self.next);
        head.iter().chain(tail.iter()).filter_map(|e| e.as_ref())
    }

    /// Number of distinct entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.is_none())
    }
}

/// A `Ringbuf` behind a spinlock, suitable for placement in a static.
pub struct StaticRingbuf<T, const N: usize>(spin::Mutex<Ringbuf<T, N>>);

impl<T: Copy + PartialEq, const N: usize> StaticRingbuf<T, N> {
    pub const fn new() -> Self {
        Self(spin::Mutex::new(Ringbuf::new()))
    }

    pub fn record(&self, payload: T) {
        self.0.lock().record(payload);
    }

    /// Runs `body` with the buffer locked, for readout.
    pub fn with<R>(&self, body: impl FnOnce(&Ringbuf<T, N>) -> R) -> R {
        body(&self.0.lock())
    }
}

/// Declares a static trace buffer.
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr) => {
        static $name: $crate::StaticRingbuf<$t, { $n }> =
            $crate::StaticRingbuf::new();
    };
}

/// Records an entry in a buffer declared with [`ringbuf!`].
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:ident, $payload:expr) => {
        $name.record($payload);
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer() {
        let rb = Ringbuf::<u32, 4>::new();
        assert!(rb.is_empty());
        assert_eq!(rb.last(), None);
        assert_eq!(rb.iter().count(), 0);
    }

    #[test]
    fn records_in_order() {
        let mut rb = Ringbuf::<u32, 4>::new();
        rb.record(1);
        rb.record(2);
        rb.record(3);
        let seen: Vec<u32> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(seen, [1, 2, 3]);
        assert_eq!(rb.last().unwrap().payload, 3);
    }

    #[test]
    fn dedups_consecutive_entries() {
        let mut rb = Ringbuf::<u32, 4>::new();
        rb.record(7);
        rb.record(7);
        rb.record(7);
        rb.record(8);
        // Three 7s collapse into one slot with two folded repeats.
        assert_eq!(rb.len(), 2);
        let seen: Vec<(u32, u16)> =
            rb.iter().map(|e| (e.payload, e.repeats)).collect();
        assert_eq!(seen, [(7, 2), (8, 0)]);
    }

    #[test]
    fn nonconsecutive_repeats_get_their_own_slots() {
        let mut rb = Ringbuf::<u32, 4>::new();
        rb.record(7);
        rb.record(8);
        rb.record(7);
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn wraps_and_keeps_newest() {
        let mut rb = Ringbuf::<u32, 3>::new();
        for v in 0..5 {
            rb.record(v);
        }
        // Capacity 3: the two oldest entries have been overwritten.
        let seen: Vec<u32> = rb.iter().map(|e| e.payload).collect();
        assert_eq!(seen, [2, 3, 4]);
    }

    #[test]
    fn static_form_records_through_the_lock() {
        ringbuf!(TRACE, u32, 8);
        ringbuf_entry!(TRACE, 5);
        ringbuf_entry!(TRACE, 5);
        TRACE.with(|rb| {
            assert_eq!(rb.len(), 1);
            assert_eq!(rb.last().unwrap().repeats, 1);
        });
    }
}
