/*!
Packed token-occurrence positions, the NFA states of the
followpos construction.
*/

use std::collections::{BTreeMap, BTreeSet};

/// A lazy quantifier group id. Zero means "not lazy".
pub(crate) type LazyId = u8;

/// An iteration counter for unrolled bounded repeats.
pub(crate) type IterNum = u16;

/// A location (byte offset) in the pattern source.
pub(crate) type Location = u32;

/// A position is one occurrence of a character (or character class, or
/// zero-width assertion) in the pattern, packed into 64 bits:
///
/// ```text
/// bits  0..32   location in the pattern; the accept index for
///               accept positions
/// bits 32..48   iteration counter for unrolled bounded repeats
/// bits 48..51   reserved
/// bit  51       NEGATE   position belongs to a negative pattern (?^X)
/// bit  52       TICKED   the closing ) of a lookahead (?=X)
/// bit  53       GREEDY   possessive quantifier intent
/// bit  54       ANCHOR   begin anchor
/// bit  55       ACCEPT   accept pseudo-position
/// bits 56..64   lazy quantifier group id
/// ```
///
/// Equality and ordering are over the raw packed value, so positions that
/// differ only in flags are distinct NFA states. The lazy id occupies the
/// top byte: positions of the same lazy group sort together, after all
/// unstamped positions.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
#[repr(transparent)]
pub(crate) struct Position(u64);

const NEGATE: u64 = 1 << 51;
const TICKED: u64 = 1 << 52;
const GREEDY: u64 = 1 << 53;
const ANCHOR: u64 = 1 << 54;
const ACCEPT: u64 = 1 << 55;

impl Position {
    /// The sentinel "no position" value.
    pub(crate) const NPOS: Position = Position(u64::MAX);

    /// The largest representable iteration counter.
    pub(crate) const MAX_ITER: IterNum = 0xFFFF;

    #[inline]
    pub(crate) const fn new(loc: Location) -> Position {
        Position(loc as u64)
    }

    /// Create an accept pseudo-position for the given accept index.
    #[inline]
    pub(crate) const fn accept_at(index: u32) -> Position {
        Position(index as u64 | ACCEPT)
    }

    /// The location of this position in the pattern, or the accept index
    /// for accept positions.
    #[inline]
    pub(crate) const fn loc(self) -> Location {
        self.0 as u32
    }

    /// The accept index of an accept position.
    #[inline]
    pub(crate) const fn accepts(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub(crate) const fn iter_num(self) -> IterNum {
        ((self.0 >> 32) & 0xFFFF) as IterNum
    }

    /// Add `n` to the iteration counter, distinguishing positions of
    /// unrolled repeat copies.
    #[inline]
    pub(crate) const fn in_iter(self, n: IterNum) -> Position {
        Position(self.0 + ((n as u64) << 32))
    }

    #[inline]
    pub(crate) const fn lazy(self) -> LazyId {
        (self.0 >> 56) as LazyId
    }

    /// Replace the lazy group id.
    #[inline]
    pub(crate) const fn lazied(self, l: LazyId) -> Position {
        Position((self.0 & 0x00FF_FFFF_FFFF_FFFF) | ((l as u64) << 56))
    }

    #[inline]
    pub(crate) const fn is_negated(self) -> bool {
        self.0 & NEGATE != 0
    }

    #[inline]
    pub(crate) const fn negated(self, yes: bool) -> Position {
        if yes {
            Position(self.0 | NEGATE)
        } else {
            Position(self.0 & !NEGATE)
        }
    }

    #[inline]
    pub(crate) const fn is_ticked(self) -> bool {
        self.0 & TICKED != 0
    }

    #[inline]
    pub(crate) const fn ticked(self, yes: bool) -> Position {
        if yes {
            Position(self.0 | TICKED)
        } else {
            Position(self.0 & !TICKED)
        }
    }

    #[inline]
    pub(crate) const fn is_greedy(self) -> bool {
        self.0 & GREEDY != 0
    }

    #[inline]
    pub(crate) const fn greedy(self, yes: bool) -> Position {
        if yes {
            Position(self.0 | GREEDY)
        } else {
            Position(self.0 & !GREEDY)
        }
    }

    #[inline]
    pub(crate) const fn is_anchor(self) -> bool {
        self.0 & ANCHOR != 0
    }

    #[inline]
    pub(crate) const fn anchored(self, yes: bool) -> Position {
        if yes {
            Position(self.0 | ANCHOR)
        } else {
            Position(self.0 & !ANCHOR)
        }
    }

    #[inline]
    pub(crate) const fn is_accept(self) -> bool {
        self.0 & ACCEPT != 0
    }

    /// Strip all flags and the lazy id, keeping location and iteration.
    /// Used as the key into the follow relation.
    #[inline]
    pub(crate) const fn pos(self) -> Position {
        Position(self.0 & 0x0000_FFFF_FFFF_FFFF)
    }
}

impl core::fmt::Debug for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        if *self == Position::NPOS {
            return write!(f, "NPOS");
        }
        if self.is_accept() {
            write!(f, "({})", self.accepts())?;
        } else {
            if self.iter_num() != 0 {
                write!(f, "{}.", self.iter_num())?;
            }
            write!(f, "{}", self.loc())?;
        }
        if self.lazy() != 0 {
            write!(f, "?{}", self.lazy())?;
        }
        if self.is_anchor() {
            write!(f, "^")?;
        }
        if self.is_greedy() {
            write!(f, "!")?;
        }
        if self.is_ticked() {
            write!(f, "'")?;
        }
        if self.is_negated() {
            write!(f, "~")?;
        }
        Ok(())
    }
}

/// An ordered set of positions: one state of the subset construction.
pub(crate) type Positions = BTreeSet<Position>;

/// The follow relation of the construction: for each position (keyed with
/// flags stripped via [`Position::pos`]), the set of positions that can
/// immediately follow it.
pub(crate) type Follow = BTreeMap<Position, Positions>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_roundtrip() {
        let p = Position::new(17)
            .in_iter(3)
            .lazied(5)
            .negated(true)
            .ticked(true)
            .greedy(true)
            .anchored(true);
        assert_eq!(p.loc(), 17);
        assert_eq!(p.iter_num(), 3);
        assert_eq!(p.lazy(), 5);
        assert!(p.is_negated());
        assert!(p.is_ticked());
        assert!(p.is_greedy());
        assert!(p.is_anchor());
        assert!(!p.is_accept());
        let stripped = p.pos();
        assert_eq!(stripped.loc(), 17);
        assert_eq!(stripped.iter_num(), 3);
        assert_eq!(stripped.lazy(), 0);
        assert!(!stripped.is_negated());
        assert!(!stripped.is_ticked());
    }

    #[test]
    fn accept_positions_carry_their_index() {
        let p = Position::accept_at(9);
        assert!(p.is_accept());
        assert_eq!(p.accepts(), 9);
        assert_ne!(p, Position::new(9));
    }

    #[test]
    fn ordering_groups_lazy_ids_last() {
        let plain = Position::new(100);
        let lazy1 = Position::new(1).lazied(1);
        let lazy2 = Position::new(1).lazied(2);
        assert!(plain < lazy1);
        assert!(lazy1 < lazy2);
    }

    #[test]
    fn distinct_flags_are_distinct_states() {
        let a = Position::new(4);
        let b = Position::new(4).in_iter(1);
        let c = Position::new(4).lazied(1);
        let mut set = Positions::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 3);
    }
}
