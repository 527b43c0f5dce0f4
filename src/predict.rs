/*!
Match prediction tables.

Three filters are derived from the DFA so that `find` can skip input
positions where no match can start:

* a literal prefix, the longest byte string every match begins with;
* a bitap table for shift-or scanning when there is no prefix;
* 4-gram (`pma`) and 8-gram (`pmh`) tables indexed by a 12-bit rolling
  hash, recording which byte can follow which hash at which offset.

All tables store the complement: a set bit means "no match is possible
here". The filters are one-sided: they may pass positions that do not
match, but never reject one that does.
*/

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    dfa::{Dfa, StateId},
    opcode::{is_meta, limits},
};

/// The rolling hash: `h' = ((h << 3) ^ b) & 0xFFF`.
#[inline]
pub(crate) fn hash(h: u16, b: u8) -> u16 {
    ((h << 3) ^ b as u16) & (limits::HASH as u16 - 1)
}

/// Truncate a hash for use as the base of the next level's hash, so
/// that chained hashes stay within the table.
#[inline]
fn truncated(h: u16) -> u16 {
    h & ((limits::HASH as u16 - 1) >> 3)
}

/// The predictor of one compiled pattern.
#[derive(Clone)]
pub struct Predictor {
    pref: Vec<u8>,
    min: u8,
    one: bool,
    bit: [u8; 256],
    pmh: [u8; limits::HASH],
    pma: [u8; limits::HASH],
}

impl core::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Predictor")
            .field("pref", &self.pref)
            .field("min", &self.min)
            .field("one", &self.one)
            .finish()
    }
}

impl Predictor {
    /// Derive the predictor from a compiled DFA.
    pub(crate) fn from_dfa(dfa: &Dfa) -> Predictor {
        let mut p = Predictor {
            pref: Vec::new(),
            min: 0,
            one: true,
            bit: [0xFF; 256],
            pmh: [0xFF; limits::HASH],
            pma: [0xFF; limits::HASH],
        };

        // Walk the single-byte spine from the start to find the common
        // prefix of all matches.
        let mut state: StateId = 0;
        loop {
            let s = &dfa.states[state as usize];
            if s.accept != 0 || s.redo {
                break;
            }
            if s.edges.len() != 1 {
                p.one = false;
                break;
            }
            let (&lo, &(hi, to)) = s.edges.iter().next().unwrap();
            if is_meta(lo) || lo != hi || p.pref.len() >= 255 {
                p.one = false;
                break;
            }
            p.pref.push(lo as u8);
            state = to;
        }
        {
            let s = &dfa.states[state as usize];
            if s.accept != 0 && !s.edges.is_empty() {
                p.one = false;
            }
        }

        if dfa.states[state as usize].accept == 0
            && !dfa.states[state as usize].redo
        {
            p.generate(dfa, state);
        }
        debug!(
            "predictor: prefix {:?}, min {}, one {}",
            String::from_utf8_lossy(&p.pref),
            p.min,
            p.one
        );
        p
    }

    /// Populate the gram tables from the post-prefix fringe.
    fn generate(&mut self, dfa: &Dfa, fringe: StateId) {
        self.min = 8;
        let mut level_states: BTreeMap<StateId, BTreeSet<u16>> =
            BTreeMap::new();
        self.transitions(dfa, 0, fringe, &BTreeSet::new(), &mut level_states);
        for level in 1..8u8 {
            let prev = core::mem::take(&mut level_states);
            for (state, labels) in prev.iter() {
                self.transitions(dfa, level, *state, labels, &mut level_states);
            }
        }
        // Keep only the bitap columns up to the minimum length; with a
        // minimum of 8 the mask is the full byte.
        let mask = 1u16
            .checked_shl(self.min as u32)
            .map_or(0xFFu8, |v| (v - 1) as u8);
        for v in self.bit.iter_mut() {
            *v &= mask;
        }
    }

    fn transitions(
        &mut self,
        dfa: &Dfa,
        level: u8,
        state: StateId,
        labels: &BTreeSet<u16>,
        out: &mut BTreeMap<StateId, BTreeSet<u16>>,
    ) {
        for (&lo, &(hi, to)) in dfa.states[state as usize].edges.iter() {
            if is_meta(lo) {
                // A zero-width assertion makes position predictions
                // unsound from here on.
                if level == 0 {
                    self.min = 0;
                }
                break;
            }
            let next = &dfa.states[to as usize];
            let next_terminal = level >= 7
                || next.edges.is_empty()
                || next.edges.keys().next().map_or(false, |&c| is_meta(c));
            let accept = level >= 7
                || next.accept != 0
                || next.redo
                || next.edges.is_empty()
                || next.edges.keys().any(|&c| is_meta(c));
            if accept && (level == 0 || self.min > level) {
                self.min = level + 1;
            }
            if level == 0 {
                for c in lo..=hi {
                    self.bit[c as usize] &= !1;
                    self.pmh[c as usize] &= !1;
                    if accept {
                        self.pma[c as usize] &= !(1 << 7);
                    }
                    self.pma[c as usize] &= !(1 << 6);
                    if !next_terminal {
                        out.entry(to).or_default().insert(truncated(c));
                    }
                }
                continue;
            }
            if level < 4 || level <= self.min {
                if level <= self.min {
                    for c in lo..=hi {
                        self.bit[c as usize] &= !(1 << level);
                    }
                }
                for &label in labels.iter() {
                    for c in lo..=hi {
                        let h = hash(label, c as u8);
                        self.pmh[h as usize] &= !(1 << level);
                        if level < 4 {
                            if level == 3 || accept {
                                self.pma[h as usize] &= !(1 << (7 - 2 * level));
                            }
                            self.pma[h as usize] &= !(1 << (6 - 2 * level));
                        }
                        if !next_terminal {
                            out.entry(to).or_default().insert(truncated(h));
                        }
                    }
                }
            }
        }
    }

    /// The literal prefix of every match.
    pub fn prefix(&self) -> &[u8] {
        &self.pref
    }

    /// Minimum match length after the prefix, clamped to 8.
    pub fn min_after_prefix(&self) -> u8 {
        self.min
    }

    /// True when the pattern matches exactly the prefix literal.
    pub fn is_one_literal(&self) -> bool {
        self.one
    }

    pub(crate) fn bitap(&self) -> &[u8; 256] {
        &self.bit
    }

    /// True when a match of length at least `n` may start at the head
    /// of `s`, judged by the 8-gram hash table. One-sided: `false`
    /// guarantees no match.
    pub(crate) fn predict_match_hash(&self, s: &[u8], n: usize) -> bool {
        debug_assert!(n >= 4 && s.len() >= n);
        let mut h = s[0] as u16;
        if self.pmh[h as usize] & 1 != 0 {
            return false;
        }
        h = hash(h, s[1]);
        if self.pmh[h as usize] & 2 != 0 {
            return false;
        }
        h = hash(h, s[2]);
        if self.pmh[h as usize] & 4 != 0 {
            return false;
        }
        h = hash(h, s[3]);
        if self.pmh[h as usize] & 8 != 0 {
            return false;
        }
        let mut m = 16u8;
        for &b in s[4..n].iter() {
            h = hash(h, b);
            if self.pmh[h as usize] & m != 0 {
                return false;
            }
            m <<= 1;
        }
        true
    }

    /// Judge the four bytes at the head of `s` by the 4-gram table.
    /// Returns 0 when a match may start here, else a safe shift of
    /// 1..=4 bytes.
    pub(crate) fn predict_match_shift(&self, s: &[u8; 4]) -> usize {
        let h1 = hash(s[0] as u16, s[1]);
        let h2 = hash(h1, s[2]);
        let h3 = hash(h2, s[3]);
        let a0 = self.pma[s[0] as usize];
        let a1 = self.pma[h1 as usize];
        let a2 = self.pma[h2 as usize];
        let a3 = self.pma[h3 as usize];
        let p = (a0 & 0xC0) | (a1 & 0x30) | (a2 & 0x0C) | (a3 & 0x03);
        let m = (((((p >> 2) | p) >> 2) | p) >> 1) | p;
        if m != 0xFF {
            return 0;
        }
        if self.pma[s[1] as usize] & 0xC0 != 0xC0 {
            return 1;
        }
        if self.pma[s[2] as usize] & 0xC0 != 0xC0 {
            return 2;
        }
        if self.pma[s[3] as usize] & 0xC0 != 0xC0 {
            return 3;
        }
        4
    }

    /// Serialize to the predictor blob: a length byte, a flag byte
    /// `min | one << 4`, the prefix bytes, the bitap table when it
    /// applies, then the gram table selected by `min`. Table bytes are
    /// complemented on write.
    pub(crate) fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(self.pref.len() as u8);
        out.push(self.min | (u8::from(self.one) << 4));
        out.extend_from_slice(&self.pref);
        if self.min > 1 && self.pref.is_empty() {
            out.extend(self.bit.iter().map(|&v| !v));
        }
        if self.min >= 4 {
            out.extend(self.pmh.iter().map(|&v| !v));
        } else if self.min > 0 {
            out.extend(self.pma.iter().map(|&v| !v));
        }
        out
    }

    /// Deserialize a predictor blob written by [`Predictor::to_blob`].
    pub(crate) fn from_blob(blob: &[u8]) -> Option<Predictor> {
        let len = *blob.first()? as usize;
        let flags = *blob.get(1)?;
        let mut p = Predictor {
            pref: blob.get(2..2 + len)?.to_vec(),
            min: flags & 0x0F,
            one: flags & 0x10 != 0,
            bit: [0xFF; 256],
            pmh: [0xFF; limits::HASH],
            pma: [0xFF; limits::HASH],
        };
        let mut n = 2 + len;
        if p.min > 0 {
            if p.min > 1 && len == 0 {
                for (i, &v) in blob.get(n..n + 256)?.iter().enumerate() {
                    p.bit[i] = !v;
                }
                n += 256;
            }
            let table = blob.get(n..n + limits::HASH)?;
            if p.min >= 4 {
                for (i, &v) in table.iter().enumerate() {
                    p.pmh[i] = !v;
                }
            } else {
                for (i, &v) in table.iter().enumerate() {
                    p.pma[i] = !v;
                }
            }
        }
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfa::{trie::Trie, Builder};
    use crate::parser::Parser;
    use crate::pattern::Options;

    fn predictor(rex: &str) -> Predictor {
        let opts = Options::default();
        let parsed = Parser::new(rex.as_bytes(), &opts).parse().unwrap();
        let trie = Trie::new();
        let dfa =
            Builder::new(rex.as_bytes(), &opts, &parsed, &trie).build().unwrap();
        Predictor::from_dfa(&dfa)
    }

    #[test]
    fn hash_is_deterministic_and_seeded_by_first_byte() {
        assert_eq!(hash(0, b'a'), b'a' as u16);
        let h1 = hash(hash(b'a' as u16, b'b'), b'c');
        let h2 = hash(hash(b'a' as u16, b'b'), b'c');
        assert_eq!(h1, h2);
        assert!(h1 < 0x1000);
    }

    #[test]
    fn single_literal_is_one() {
        let p = predictor("ab");
        assert_eq!(p.prefix(), b"ab");
        assert!(p.is_one_literal());
        assert_eq!(p.min_after_prefix(), 0);
    }

    #[test]
    fn shared_prefix_is_found() {
        let p = predictor("abcd|abce");
        assert_eq!(p.prefix(), b"abc");
        assert!(!p.is_one_literal());
        assert_eq!(p.min_after_prefix(), 1);
    }

    #[test]
    fn branching_patterns_have_no_prefix() {
        let p = predictor("abc|xyz");
        assert_eq!(p.prefix(), b"");
        assert_eq!(p.min_after_prefix(), 3);
    }

    #[test]
    fn predictor_is_sound_for_matches() {
        // One-sided: positions where a match starts must never be
        // rejected.
        let p = predictor("abc|xyz");
        assert_eq!(p.predict_match_shift(b"abcQ"), 0);
        assert_eq!(p.predict_match_shift(b"xyzQ"), 0);
    }

    #[test]
    fn predictor_rejects_impossible_heads() {
        let p = predictor("abc|xyz");
        assert_ne!(p.predict_match_shift(b"qqqq"), 0);
    }

    #[test]
    fn long_tail_uses_hash_table() {
        let p = predictor("[ab]cdef|ghijk");
        assert!(p.min_after_prefix() >= 4);
        assert!(p.predict_match_hash(b"acdef", 5));
        assert!(p.predict_match_hash(b"ghijk", 4));
        assert!(!p.predict_match_hash(b"qqqqq", 4));
    }

    #[test]
    fn bitap_marks_possible_first_bytes() {
        let p = predictor("abc|xyz");
        // Bit 0 cleared for possible first bytes.
        assert_eq!(p.bitap()[b'a' as usize] & 1, 0);
        assert_eq!(p.bitap()[b'x' as usize] & 1, 0);
        assert_ne!(p.bitap()[b'q' as usize] & 1, 0);
    }

    #[test]
    fn blob_roundtrip() {
        // Only the tables the blob actually carries can round-trip:
        // the bitap when there is no prefix and min > 1, and the gram
        // table selected by min.
        for rex in ["ab", "abc|xyz", "abcd|abce", "[ab]cdef|ghijk"] {
            let p = predictor(rex);
            let blob = p.to_blob();
            let q = Predictor::from_blob(&blob).unwrap();
            assert_eq!(p.pref, q.pref, "{}", rex);
            assert_eq!(p.min, q.min, "{}", rex);
            assert_eq!(p.one, q.one, "{}", rex);
            if p.min > 1 && p.pref.is_empty() {
                assert_eq!(p.bit[..], q.bit[..], "{}", rex);
            }
            if p.min >= 4 {
                assert_eq!(p.pmh[..], q.pmh[..], "{}", rex);
            } else if p.min > 0 {
                assert_eq!(p.pma[..], q.pma[..], "{}", rex);
            }
        }
    }
}
