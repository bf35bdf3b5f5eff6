//! Bounded CPU sets in the Linux list syntax.
//!
//! A [`CpuSet`] is a bit-vector over CPU ids `0..max_cpus`, laid out exactly
//! like the kernel's dynamically sized `cpu_set_t` so it can be handed to
//! `sched_setaffinity(2)` without conversion. `max_cpus` is discovered once
//! per process from sysfs ([`kernel_max_cpus`]) and passed explicitly to every
//! constructor; sets built with different bounds must never be combined.

mod parse;

use std::fmt::{self, Write as _};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign};
use std::path::Path;
use std::sync::OnceLock;

use nix::unistd::Pid;
use runexcl_common::constants::{CPU_SETSIZE, CPU_SYSFS_PATH, KERNEL_MAX_FILE};
use runexcl_common::error::{Result, RunexclError};

type Word = libc::c_ulong;

const WORD_BITS: usize = Word::BITS as usize;

const fn bit(cpu: usize) -> Word {
    1 << (cpu % WORD_BITS)
}

static KERNEL_MAX_CPUS: OnceLock<usize> = OnceLock::new();

/// Returns the number of CPU ids the running kernel can address.
///
/// Read once from `/sys/devices/system/cpu/kernel_max`; never smaller than
/// glibc's `CPU_SETSIZE`.
pub fn kernel_max_cpus() -> usize {
    *KERNEL_MAX_CPUS.get_or_init(|| max_cpus_from(&Path::new(CPU_SYSFS_PATH).join(KERNEL_MAX_FILE)))
}

/// Computes the CPU id bound from a `kernel_max` file, falling back to
/// [`CPU_SETSIZE`] when the file is missing or unreadable.
pub fn max_cpus_from(path: &Path) -> usize {
    let kernel_max = std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.trim().parse::<usize>().ok());
    match kernel_max {
        Some(max) => max.saturating_add(1).max(CPU_SETSIZE),
        None => {
            tracing::debug!(path = %path.display(), "kernel_max unavailable, using CPU_SETSIZE");
            CPU_SETSIZE
        }
    }
}

/// Set of CPU ids bounded by a host-wide maximum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CpuSet {
    max_cpus: usize,
    words: Box<[Word]>,
}

impl CpuSet {
    /// Creates an empty set for ids in `0..max_cpus`.
    #[must_use]
    pub fn new(max_cpus: usize) -> Self {
        Self {
            max_cpus,
            words: vec![0; max_cpus.div_ceil(WORD_BITS)].into_boxed_slice(),
        }
    }

    /// Parses a CPU list such as `0-2,4,6-7,9` into a new set.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Syntax`] for malformed text,
    /// [`RunexclError::InvalidRange`] for a descending range, and
    /// [`RunexclError::OutOfBounds`] for ids at or above `max_cpus`.
    pub fn from_list(text: &str, max_cpus: usize) -> Result<Self> {
        let mut set = Self::new(max_cpus);
        set.parse(text)?;
        Ok(set)
    }

    /// Clears the set and fills it from a CPU list. The empty string is the
    /// empty set. On error the set is left empty.
    ///
    /// # Errors
    ///
    /// Same as [`CpuSet::from_list`].
    pub fn parse(&mut self, text: &str) -> Result<()> {
        self.clear();
        let (parsed, rest) = parse::cpu_list(text, self.max_cpus)?;
        if let Some(c) = rest.chars().next() {
            return Err(RunexclError::Syntax {
                input: text.to_owned(),
                message: format!("unexpected character '{}'", c.escape_default()),
            });
        }
        *self = parsed;
        Ok(())
    }

    /// Parses the CPU list at the start of `input` and returns the set along
    /// with the unconsumed remainder.
    ///
    /// Leading whitespace is skipped. Input that is empty after it yields the
    /// empty set. Parsing stops at the first character that cannot continue
    /// the list, so `"0-3\nrest"` leaves `"\nrest"`; a dangling `,` or `-`
    /// is still an error.
    ///
    /// # Errors
    ///
    /// Same as [`CpuSet::from_list`].
    pub fn parse_prefix(input: &str, max_cpus: usize) -> Result<(Self, &str)> {
        parse::cpu_list(input.trim_start(), max_cpus)
    }

    /// Exclusive upper bound on CPU ids in this set.
    pub const fn max_cpus(&self) -> usize {
        self.max_cpus
    }

    /// Removes every CPU from the set.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Adds `cpu` to the set.
    ///
    /// # Panics
    ///
    /// Panics if `cpu >= max_cpus`.
    pub fn insert(&mut self, cpu: usize) {
        assert!(cpu < self.max_cpus, "CPU {cpu} outside 0..{}", self.max_cpus);
        self.words[cpu / WORD_BITS] |= bit(cpu);
    }

    /// Removes `cpu` from the set.
    ///
    /// # Panics
    ///
    /// Panics if `cpu >= max_cpus`.
    pub fn remove(&mut self, cpu: usize) {
        assert!(cpu < self.max_cpus, "CPU {cpu} outside 0..{}", self.max_cpus);
        self.words[cpu / WORD_BITS] &= !bit(cpu);
    }

    /// Returns `true` if `cpu` is in the set. Ids beyond the bound are never
    /// members.
    pub fn contains(&self, cpu: usize) -> bool {
        cpu < self.max_cpus && self.words[cpu / WORD_BITS] & bit(cpu) != 0
    }

    /// Number of CPUs in the set.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns `true` if the set holds no CPU.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Lowest CPU id in the set.
    pub fn first(&self) -> Option<usize> {
        self.iter().next()
    }

    /// Highest CPU id in the set.
    pub fn last(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|&(_, &w)| w != 0)
            .map(|(index, &w)| index * WORD_BITS + (WORD_BITS - 1 - w.leading_zeros() as usize))
    }

    /// Iterates over the CPU ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, &word)| {
            let base = index * WORD_BITS;
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let offset = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(base + offset)
            })
        })
    }

    /// Maximal runs of consecutive ids as inclusive `(lo, hi)` pairs.
    pub fn ranges(&self) -> Vec<(usize, usize)> {
        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for cpu in self.iter() {
            match ranges.last_mut() {
                Some((_, hi)) if *hi + 1 == cpu => *hi = cpu,
                _ => ranges.push((cpu, cpu)),
            }
        }
        ranges
    }

    /// Returns `true` if every CPU of `self` is also in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        self.assert_compatible(other);
        self.words.iter().zip(other.words.iter()).all(|(a, b)| a & !b == 0)
    }

    /// Returns `true` if the sets share no CPU.
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.assert_compatible(other);
        self.words.iter().zip(other.words.iter()).all(|(a, b)| a & b == 0)
    }

    /// CPUs in `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.assert_compatible(other);
        let mut result = self.clone();
        for (word, rhs) in result.words.iter_mut().zip(other.words.iter()) {
            *word &= !rhs;
        }
        result
    }

    /// Applies the set as the affinity mask of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Os`] if `sched_setaffinity(2)` fails.
    pub fn bind_to_current_thread(&self) -> Result<()> {
        self.bind_to(Pid::from_raw(0))
    }

    /// Applies the set as the affinity mask of `pid` (a process or thread id;
    /// `0` is the calling thread).
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Os`] if `sched_setaffinity(2)` fails.
    pub fn bind_to(&self, pid: Pid) -> Result<()> {
        // SAFETY: `words` is a live buffer of exactly `byte_len()` bytes laid
        // out as the kernel's unsigned-long CPU mask.
        let ret = unsafe {
            libc::sched_setaffinity(
                pid.as_raw(),
                self.byte_len(),
                self.words.as_ptr().cast::<libc::cpu_set_t>(),
            )
        };
        if ret != 0 {
            return Err(RunexclError::last_os_error("sched_setaffinity"));
        }
        tracing::debug!(pid = pid.as_raw(), cpus = %self, "affinity set");
        Ok(())
    }

    /// Reads the affinity mask of `pid` (`0` is the calling thread).
    ///
    /// # Errors
    ///
    /// Returns [`RunexclError::Os`] if `sched_getaffinity(2)` fails.
    pub fn affinity_of(pid: Pid, max_cpus: usize) -> Result<Self> {
        let mut set = Self::new(max_cpus);
        let size = set.byte_len();
        // SAFETY: the kernel writes at most `size` bytes into `words`, which
        // owns exactly that many.
        let ret = unsafe {
            libc::sched_getaffinity(
                pid.as_raw(),
                size,
                set.words.as_mut_ptr().cast::<libc::cpu_set_t>(),
            )
        };
        if ret != 0 {
            return Err(RunexclError::last_os_error("sched_getaffinity"));
        }
        Ok(set)
    }

    const fn byte_len(&self) -> usize {
        self.words.len() * size_of::<Word>()
    }

    fn assert_compatible(&self, other: &Self) {
        assert_eq!(
            self.max_cpus, other.max_cpus,
            "CPU sets with different bounds cannot be combined"
        );
    }
}

impl fmt::Display for CpuSet {
    /// Canonical list form: ascending, maximal runs merged, empty set as "".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (lo, hi)) in self.ranges().into_iter().enumerate() {
            if index > 0 {
                f.write_char(',')?;
            }
            if lo == hi {
                write!(f, "{lo}")?;
            } else {
                write!(f, "{lo}-{hi}")?;
            }
        }
        Ok(())
    }
}

macro_rules! set_op {
    ($trait:ident, $method:ident, $assign_trait:ident, $assign_method:ident, $op:tt) => {
        impl $assign_trait<&CpuSet> for CpuSet {
            fn $assign_method(&mut self, rhs: &CpuSet) {
                self.assert_compatible(rhs);
                for (word, other) in self.words.iter_mut().zip(rhs.words.iter()) {
                    *word $op *other;
                }
            }
        }

        impl $trait<&CpuSet> for CpuSet {
            type Output = CpuSet;

            fn $method(mut self, rhs: &CpuSet) -> CpuSet {
                self.$assign_method(rhs);
                self
            }
        }

        impl $trait<&CpuSet> for &CpuSet {
            type Output = CpuSet;

            fn $method(self, rhs: &CpuSet) -> CpuSet {
                let mut result = self.clone();
                result.$assign_method(rhs);
                result
            }
        }
    };
}

set_op!(BitAnd, bitand, BitAndAssign, bitand_assign, &=);
set_op!(BitOr, bitor, BitOrAssign, bitor_assign, |=);
set_op!(BitXor, bitxor, BitXorAssign, bitxor_assign, ^=);
