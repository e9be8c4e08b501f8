//! Dimension extents that can be either concrete or symbolic.
//!
//! Extents produced by transforms are folded eagerly: splitting a constant extent
//! yields a constant, multiplying by one is the identity, and so on. Two extents are
//! considered "the same" when they are structurally equal after folding, which is
//! exactly the comparison the equivalence graphs need.

use std::fmt;
use std::sync::Arc;

/// Extent of an iteration dimension.
///
/// # Examples
///
/// ```rust
/// # use kiln_ir::Extent;
/// let n = Extent::var("N");
/// assert_eq!(n.ceil_div(&Extent::Const(1)), n);
/// assert_eq!(Extent::Const(10).ceil_div(&Extent::Const(4)).as_const(), Some(3));
/// assert!(Extent::Const(1).mul(&n) == n);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extent {
    /// Compile-time constant.
    Const(usize),
    /// Named runtime size.
    Var(Arc<str>),
    /// `ceilDiv(numerator, denominator)`.
    CeilDiv(Arc<Extent>, Arc<Extent>),
    /// `lhs * rhs`.
    Mul(Arc<Extent>, Arc<Extent>),
}

impl Extent {
    /// Create a named symbolic extent.
    pub fn var(name: impl Into<Arc<str>>) -> Self {
        Self::Var(name.into())
    }

    pub fn as_const(&self) -> Option<usize> {
        match self {
            Self::Const(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Self::Const(1))
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Self::Const(0))
    }

    /// `ceilDiv(self, factor)` with constant folding.
    pub fn ceil_div(&self, factor: &Extent) -> Self {
        match (self, factor) {
            (_, f) if f.is_one() => self.clone(),
            (Self::Const(n), Self::Const(d)) if *d != 0 => Self::Const(n.div_ceil(*d)),
            _ => Self::CeilDiv(Arc::new(self.clone()), Arc::new(factor.clone())),
        }
    }

    /// `self * rhs` with constant folding.
    pub fn mul(&self, rhs: &Extent) -> Self {
        match (self, rhs) {
            (lhs, r) if r.is_one() => lhs.clone(),
            (l, _) if l.is_one() => rhs.clone(),
            (Self::Const(a), Self::Const(b)) => Self::Const(a * b),
            _ => Self::Mul(Arc::new(self.clone()), Arc::new(rhs.clone())),
        }
    }
}

impl From<usize> for Extent {
    fn from(value: usize) -> Self {
        Self::Const(value)
    }
}

impl From<&str> for Extent {
    fn from(value: &str) -> Self {
        Self::var(value)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Var(name) => write!(f, "{name}"),
            Self::CeilDiv(n, d) => write!(f, "ceilDiv({n}, {d})"),
            Self::Mul(l, r) => write!(f, "({l} * {r})"),
        }
    }
}
