//! Mapping modes, ordered from strictest to loosest.

use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

/// Equivalence notion a graph is built under.
///
/// Each mode's partition refines the next one's: dimensions mapped under `Exact`
/// are mapped under `AlmostExact`, and so on up to `Permissive`. `Loop` only
/// contains leaf dimensions and is built from `Permissive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumCount, EnumIter)]
pub enum IdMappingMode {
    /// Same extent, same iteration.
    #[strum(serialize = "EXACT")]
    Exact,
    /// Exact, modulo transforms that do not change the index (split by 1, merge with 1).
    #[strum(serialize = "ALMOST_EXACT")]
    AlmostExact,
    /// Also maps broadcast dimensions to the dimensions they are broadcast against.
    #[strum(serialize = "PERMISSIVE")]
    Permissive,
    /// Leaf dimensions that share a generated loop.
    #[strum(serialize = "LOOP")]
    Loop,
}

impl IdMappingMode {
    /// This mode and every looser analytical mode, strictest first. LOOP stands alone.
    pub fn and_looser(self) -> impl Iterator<Item = IdMappingMode> {
        Self::iter().filter(move |mode| *mode == self || (self != Self::Loop && *mode > self && *mode != Self::Loop))
    }
}
