/// Per-feature session debug statistics.
///
/// A fixed table of `capacity` records, one per tracked interface, plus one
/// feature-wide base record. Everything sits behind a single lock; inbound
/// stats syncs add into it, snapshots copy out of it. Counters are `u64`
/// and wrap on overflow.
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsError {
    TableFull,
    /// Output buffer holds `got` records, `need` are valid.
    BufferTooSmall { need: usize, got: usize },
}

impl fmt::Display for StatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatsError::TableFull => write!(f, "session stats table full"),
            StatsError::BufferTooSmall { need, got } => {
                write!(f, "snapshot needs {} records, buffer holds {}", need, got)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionRecord<const N: usize> {
    pub valid: bool,
    pub if_num: u16,
    /// Host-side index used when presenting the record.
    pub if_index: u32,
    pub stats: [u64; N],
}

impl<const N: usize> SessionRecord<N> {
    pub const EMPTY: Self = Self { valid: false, if_num: 0, if_index: 0, stats: [0; N] };
}

impl<const N: usize> Default for SessionRecord<N> {
    fn default() -> Self {
        Self::EMPTY
    }
}

struct Inner<const N: usize> {
    sessions: Vec<SessionRecord<N>>,
    base: Vec<u64>,
}

pub struct SessionStats<const N: usize> {
    inner: Mutex<Inner<N>>,
    /// Registrations and syncs that found no slot.
    dropped: AtomicU64,
}

impl<const N: usize> SessionStats<N> {
    pub fn new(capacity: usize, base_counters: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: vec![SessionRecord::EMPTY; capacity],
                base: vec![0; base_counters],
            }),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    /// Claim the first free slot for `if_num`.
    pub fn register(&self, if_num: u16, if_index: u32) -> Result<(), StatsError> {
        let mut inner = self.inner.lock();
        match inner.sessions.iter_mut().find(|r| !r.valid) {
            Some(slot) => {
                *slot = SessionRecord { valid: true, if_num, if_index, stats: [0; N] };
                Ok(())
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(StatsError::TableFull)
            }
        }
    }

    /// Zero and invalidate the slot of `if_num`. Returns whether one existed.
    pub fn unregister(&self, if_num: u16) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.iter_mut().find(|r| r.valid && r.if_num == if_num) {
            Some(slot) => {
                *slot = SessionRecord::EMPTY;
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, if_num: u16) -> bool {
        self.inner.lock().sessions.iter().any(|r| r.valid && r.if_num == if_num)
    }

    /// Add `counters` into the record of `if_num`. Extra input counters are
    /// ignored. Untracked interfaces are counted as drops.
    pub fn accumulate(&self, if_num: u16, counters: &[u32]) {
        let mut inner = self.inner.lock();
        match inner.sessions.iter_mut().find(|r| r.valid && r.if_num == if_num) {
            Some(rec) => {
                for (acc, v) in rec.stats.iter_mut().zip(counters) {
                    *acc = acc.wrapping_add(*v as u64);
                }
            }
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Add into the feature-wide record.
    pub fn accumulate_base(&self, counters: &[u32]) {
        let mut inner = self.inner.lock();
        for (acc, v) in inner.base.iter_mut().zip(counters) {
            *acc = acc.wrapping_add(*v as u64);
        }
    }

    /// Copy valid records, in slot order, into `out`. Returns the count.
    pub fn snapshot(&self, out: &mut [SessionRecord<N>]) -> Result<usize, StatsError> {
        let inner = self.inner.lock();
        let need = inner.sessions.iter().filter(|r| r.valid).count();
        if out.len() < need {
            return Err(StatsError::BufferTooSmall { need, got: out.len() });
        }
        for (dst, src) in out.iter_mut().zip(inner.sessions.iter().filter(|r| r.valid)) {
            *dst = *src;
        }
        Ok(need)
    }

    /// Copy of the base record; `out` beyond the record length is untouched.
    pub fn base_snapshot(&self, out: &mut [u64]) -> usize {
        let inner = self.inner.lock();
        let n = out.len().min(inner.base.len());
        out[..n].copy_from_slice(&inner.base[..n]);
        n
    }

    pub fn valid_count(&self) -> usize {
        self.inner.lock().sessions.iter().filter(|r| r.valid).count()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
