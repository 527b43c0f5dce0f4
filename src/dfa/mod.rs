/*!
Subset construction.

DFA states are sets of parser positions, optionally joined with a node
of the literal trie. The builder processes states from a worklist,
partitioning each state's outgoing characters into moves that fire the
same set of positions, then applying lazy culling, greedy conversion,
anchor trimming and lookahead closure to each move's target before
deduplicating it against the states seen so far.

Meta (zero-width) transitions come in two flavors. Word, line and buffer
assertions keep the rest of the state alive: their target is the union
of the assertion's follow set with the remaining positions, so that a
matcher committing to a true assertion loses no alternative.
Indentation assertions commit: their target is the follow set alone, and
the matcher only tests them once no byte transition applies.
*/

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    error::{Error, ErrorKind},
    opcode::{is_meta, Accept, Char, Index, Meta},
    parser::{chars_at, Parsed},
    pattern::Options,
    util::{
        charset::CharSet,
        position::{Position, Positions},
    },
};

pub(crate) mod assemble;
pub(crate) mod trie;

use trie::{NodeId, Trie};

/// Index of a DFA state in the builder's arena.
pub(crate) type StateId = u32;

/// Cap on the number of DFA states, a complexity guard hit before the
/// opcode-index limits would overflow silently.
const MAX_STATES: usize = 1 << 20;

/// One DFA state.
#[derive(Clone, Debug, Default)]
pub(crate) struct State {
    /// The positions of the subset construction.
    pub(crate) positions: Positions,
    /// The literal-trie node merged into this state, if any.
    pub(crate) tnode: Option<NodeId>,
    /// Outgoing edges: low bound to (high bound, target). Meta edges
    /// have `lo == hi` holding the meta code.
    pub(crate) edges: BTreeMap<Char, (Char, StateId)>,
    /// Nonzero when this state accepts.
    pub(crate) accept: Accept,
    /// True when the accept comes from a negative pattern: the match is
    /// reported as REDO and discarded by the driver.
    pub(crate) redo: bool,
    /// Lookahead ids starting at this state.
    pub(crate) heads: BTreeSet<u32>,
    /// Lookahead ids completing at this state.
    pub(crate) tails: BTreeSet<u32>,
    /// Opcode offset after the first assembly pass.
    pub(crate) first: Index,
    /// Final opcode offset.
    pub(crate) index: Index,
}

/// The built automaton: state 0 is the start state.
#[derive(Clone, Debug)]
pub(crate) struct Dfa {
    pub(crate) states: Vec<State>,
    /// For each subpattern index (1-based), whether any state accepts
    /// it.
    pub(crate) reachable: Vec<bool>,
}

impl Dfa {
    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }
}

/// One move under construction: the characters that fire it and the
/// positions they lead to.
#[derive(Clone, Debug)]
struct Move {
    chars: CharSet,
    follow: Positions,
    tnode: Option<NodeId>,
}

pub(crate) struct Builder<'b> {
    rex: &'b [u8],
    opts: &'b Options,
    parsed: &'b Parsed,
    trie: &'b Trie,
    states: Vec<State>,
    cache: HashMap<(Vec<Position>, u32), StateId>,
    accepts: usize,
}

impl<'b> Builder<'b> {
    pub(crate) fn new(
        rex: &'b [u8],
        opts: &'b Options,
        parsed: &'b Parsed,
        trie: &'b Trie,
    ) -> Builder<'b> {
        Builder {
            rex,
            opts,
            parsed,
            trie,
            states: Vec::new(),
            cache: HashMap::new(),
            accepts: parsed.end.len(),
        }
    }

    /// Run the construction.
    pub(crate) fn build(mut self) -> Result<Dfa, Error> {
        let mut start = self.parsed.startpos.clone();
        self.close_ticked(&mut start);
        trim_lazy(&mut start);
        let tnode = if self.trie.is_empty() {
            None
        } else {
            Some(self.trie.root())
        };
        self.intern(start, tnode)?;
        let mut next = 0usize;
        while next < self.states.len() {
            self.compile_state(next as StateId)?;
            next += 1;
        }
        let mut reachable = vec![false; self.accepts + 1];
        for state in self.states.iter() {
            if state.accept != 0 && (state.accept as usize) < reachable.len() {
                reachable[state.accept as usize] = true;
            }
        }
        debug!(
            "dfa: {} states, {} edges",
            self.states.len(),
            self.states.iter().map(|s| s.edges.len()).sum::<usize>(),
        );
        Ok(Dfa { states: self.states, reachable })
    }

    /// Find or create the state for a position set and trie node.
    fn intern(
        &mut self,
        positions: Positions,
        tnode: Option<NodeId>,
    ) -> Result<StateId, Error> {
        let key: Vec<Position> = positions.iter().copied().collect();
        let tkey = tnode.map_or(0, |n| n + 1);
        if let Some(&id) = self.cache.get(&(key.clone(), tkey)) {
            return Ok(id);
        }
        if self.states.len() >= MAX_STATES {
            return Err(Error::new(
                ErrorKind::ExceedsLimits,
                &String::from_utf8_lossy(self.rex),
                0,
            ));
        }
        let id = self.states.len() as StateId;
        let mut state = State::default();
        self.resolve_accept(&positions, tnode, &mut state);
        self.resolve_lookaheads(&positions, &mut state);
        state.positions = positions;
        state.tnode = tnode;
        self.states.push(state);
        self.cache.insert((key, tkey), id);
        Ok(id)
    }

    /// Determine the accept index and redo flag of a state. Among
    /// ordinary accepts the smallest subpattern index wins; an accept
    /// from a negative pattern takes priority over ordinary ones and
    /// flags the state as redo.
    fn resolve_accept(
        &self,
        positions: &Positions,
        tnode: Option<NodeId>,
        state: &mut State,
    ) {
        let mut plain: Accept = 0;
        let mut negated: Accept = 0;
        for p in positions.iter().filter(|p| p.is_accept()) {
            let n = p.accepts();
            if p.is_negated() {
                if negated == 0 || n < negated {
                    negated = n;
                }
            } else if plain == 0 || n < plain {
                plain = n;
            }
        }
        if let Some(tn) = tnode {
            let n = self.trie.accept(tn);
            if n != 0 && (plain == 0 || n < plain) {
                plain = n;
            }
        }
        if negated != 0 {
            state.accept = negated;
            state.redo = true;
        } else {
            state.accept = plain;
        }
    }

    fn resolve_lookaheads(&self, positions: &Positions, state: &mut State) {
        for p in positions.iter() {
            for (k, la) in self.parsed.lookaheads.iter().enumerate() {
                if p.is_ticked() {
                    if p.pos().loc() == la.end {
                        state.tails.insert(k as u32);
                    }
                } else if !p.is_accept() && la.starts.contains(&p.pos().loc())
                {
                    state.heads.insert(k as u32);
                }
            }
        }
    }

    /// Compute the moves of one state and wire its edges.
    fn compile_state(&mut self, id: StateId) -> Result<(), Error> {
        let positions = self.states[id as usize].positions.clone();
        let tnode = self.states[id as usize].tnode;

        // Gather the character set of every non-accept position once.
        let mut chars_of: Vec<(Position, CharSet)> = Vec::new();
        for p in positions.iter().filter(|p| !p.is_accept() && !p.is_ticked())
        {
            let set = chars_at(self.rex, self.opts, p.pos().loc(), self.parsed);
            if set.any() {
                chars_of.push((*p, set));
            }
        }

        // Byte moves: partition by identical follow sets.
        let mut moves: Vec<Move> = Vec::new();
        for (p, set) in chars_of.iter() {
            if set.has_meta() {
                continue;
            }
            let follow = self.follow_of(*p);
            transition(&mut moves, *set, follow);
        }
        // Moves that ended up with identical targets merge, which is
        // what compacts split character ranges back together.
        coalesce(&mut moves);
        // Merge the trie node's edges into the byte moves.
        if let Some(tn) = tnode {
            for (b, child) in self.trie.edges(tn).collect::<Vec<_>>() {
                self.carve_trie_edge(&mut moves, b, child);
            }
        }
        for mv in moves.into_iter() {
            let mut target = mv.follow;
            trim_anchors(&mut target);
            self.close_ticked(&mut target);
            trim_lazy(&mut target);
            if target.is_empty() && mv.tnode.is_none() {
                continue;
            }
            let to = self.intern(target, mv.tnode)?;
            self.add_byte_edges(id, &mv.chars, to);
        }

        // Meta moves, one per meta code present.
        let mut meta_codes: BTreeSet<Char> = BTreeSet::new();
        for (_, set) in chars_of.iter() {
            if set.has_meta() {
                for c in set.iter() {
                    if is_meta(c) {
                        meta_codes.insert(c);
                    }
                }
            }
        }
        for mc in meta_codes {
            let meta = Meta::from_char(mc).expect("meta code");
            let mut follow = Positions::new();
            let mut fired = Positions::new();
            for (p, set) in chars_of.iter() {
                if set.contains(mc) {
                    fired.insert(*p);
                    follow.extend(self.follow_of(*p).iter().copied());
                }
            }
            let mut target = follow;
            if !meta.is_dent() {
                // Assertions keep every other alternative alive: a
                // matcher that commits to a true assertion must lose
                // nothing it could still match.
                for p in positions.iter() {
                    if !fired.contains(p) {
                        target.insert(*p);
                    }
                }
            }
            self.close_ticked(&mut target);
            trim_lazy(&mut target);
            if target.is_empty() {
                continue;
            }
            let keep_tnode = if meta.is_dent() { None } else { tnode };
            let to = self.intern(target, keep_tnode)?;
            self.states[id as usize].edges.insert(mc, (mc, to));
        }
        Ok(())
    }

    /// The follow set of `p`, with lazy and greedy stamps inherited by
    /// the successors.
    fn follow_of(&self, p: Position) -> Positions {
        let raw = match self.parsed.followpos.get(&p.pos()) {
            Some(set) => set,
            None => return Positions::new(),
        };
        let mut out = Positions::new();
        for q in raw.iter() {
            let q = if p.is_greedy() {
                // Greedy conversion: successors shed competing lazy
                // marks and stay greedy.
                q.lazied(0).greedy(true)
            } else if p.lazy() != 0 && q.lazy() == 0 {
                q.lazied(p.lazy())
            } else {
                *q
            };
            out.insert(q);
        }
        out
    }

    /// Split `moves` so that byte `b` maps to the trie child, keeping
    /// any position follow set that also fires on `b`.
    fn carve_trie_edge(
        &mut self,
        moves: &mut Vec<Move>,
        b: u8,
        child: NodeId,
    ) {
        let single = CharSet::single(b as Char);
        for i in 0..moves.len() {
            if moves[i].chars.contains(b as Char) {
                if moves[i].chars == single {
                    moves[i].tnode = Some(child);
                } else {
                    let follow = moves[i].follow.clone();
                    moves[i].chars -= single;
                    moves.push(Move {
                        chars: single,
                        follow,
                        tnode: Some(child),
                    });
                }
                return;
            }
        }
        moves.push(Move { chars: single, follow: Positions::new(), tnode: Some(child) });
    }

    /// Add edges for every contiguous byte range of `chars`.
    fn add_byte_edges(&mut self, id: StateId, chars: &CharSet, to: StateId) {
        let mut c: Char = 0;
        while c < 0x100 {
            if chars.contains(c) {
                let lo = c;
                while c + 1 < 0x100 && chars.contains(c + 1) {
                    c += 1;
                }
                self.states[id as usize].edges.insert(lo, (c, to));
            }
            c += 1;
        }
    }

    /// Close a position set over TICKED positions: a state containing
    /// the end of a lookahead also contains what follows it.
    fn close_ticked(&self, positions: &mut Positions) {
        loop {
            let mut added = Positions::new();
            for p in positions.iter().filter(|p| p.is_ticked()) {
                for q in self.follow_of(*p).iter() {
                    if !positions.contains(q) {
                        added.insert(*q);
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            positions.extend(added.iter().copied());
        }
    }
}

/// Partition refinement: merge `chars -> follow` into the move list,
/// splitting overlapping moves so that the moves stay disjoint and each
/// fires exactly the positions of its characters.
fn transition(moves: &mut Vec<Move>, chars: CharSet, follow: Positions) {
    let mut chars = chars;
    let mut i = 0;
    while i < moves.len() && chars.any() {
        let common = moves[i].chars & chars;
        if common.any() {
            if moves[i].chars == common {
                moves[i].follow.extend(follow.iter().copied());
            } else {
                let mut split = moves[i].clone();
                split.chars = common;
                split.follow.extend(follow.iter().copied());
                moves[i].chars -= common;
                moves.push(split);
            }
            chars -= common;
        }
        i += 1;
    }
    if chars.any() {
        moves.push(Move { chars, follow, tnode: None });
    }
}

/// Merge moves with identical targets, reuniting character ranges that
/// partitioning split apart.
fn coalesce(moves: &mut Vec<Move>) {
    let mut out: Vec<Move> = Vec::with_capacity(moves.len());
    for mv in moves.drain(..) {
        match out
            .iter_mut()
            .find(|o| o.follow == mv.follow && o.tnode == mv.tnode)
        {
            Some(o) => o.chars |= mv.chars,
            None => out.push(mv),
        }
    }
    *moves = out;
}

/// Lazy culling: when a move's target contains an accept position of a
/// lazy group, the group has found its shortest match, and the group's
/// non-accept continuations are dropped.
fn trim_lazy(positions: &mut Positions) {
    let mut lazy_accepts: BTreeSet<u8> = BTreeSet::new();
    for p in positions.iter() {
        if p.is_accept() && p.lazy() != 0 {
            lazy_accepts.insert(p.lazy());
        }
    }
    if lazy_accepts.is_empty() {
        return;
    }
    positions.retain(|p| p.is_accept() || !lazy_accepts.contains(&p.lazy()));
}

/// Anchor trimming: a begin anchor cannot hold once input has been
/// consumed, so anchor-flagged positions are dropped from byte-move
/// targets.
fn trim_anchors(positions: &mut Positions) {
    positions.retain(|p| !p.is_anchor());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn build(rex: &str) -> Dfa {
        let opts = Options::default();
        let parsed = Parser::new(rex.as_bytes(), &opts).parse().unwrap();
        let trie = Trie::new();
        Builder::new(rex.as_bytes(), &opts, &parsed, &trie).build().unwrap()
    }

    fn step(dfa: &Dfa, from: StateId, b: u8) -> Option<StateId> {
        for (&lo, &(hi, to)) in dfa.states[from as usize].edges.iter() {
            if !is_meta(lo) && lo <= b as Char && b as Char <= hi {
                return Some(to);
            }
        }
        None
    }

    #[test]
    fn literal_chain() {
        let dfa = build("ab");
        let s1 = step(&dfa, 0, b'a').unwrap();
        let s2 = step(&dfa, s1, b'b').unwrap();
        assert_eq!(dfa.states[s2 as usize].accept, 1);
        assert_eq!(step(&dfa, 0, b'b'), None);
        assert_eq!(step(&dfa, s2, b'a'), None);
    }

    #[test]
    fn determinism() {
        // Every byte is covered by at most one edge per state.
        let dfa = build("[a-cg-ik]z|d|[e-g]|j|y|[x-z]|.|\\n");
        for state in dfa.states.iter() {
            for b in 0..=255u16 {
                let covering = state
                    .edges
                    .iter()
                    .filter(|(&lo, &(hi, _))| {
                        !is_meta(lo) && lo <= b && b <= hi
                    })
                    .count();
                assert!(covering <= 1, "byte {} covered {} times", b, covering);
            }
        }
    }

    #[test]
    fn alternation_prefers_smaller_accept() {
        let dfa = build("a|a");
        let s1 = step(&dfa, 0, b'a').unwrap();
        assert_eq!(dfa.states[s1 as usize].accept, 1);
    }

    #[test]
    fn lazy_star_commits() {
        // After the first 'a' of 'a*?a', culling leaves only the
        // accept.
        let dfa = build("a*?a");
        let s1 = step(&dfa, 0, b'a').unwrap();
        assert_eq!(dfa.states[s1 as usize].accept, 1);
        assert!(dfa.states[s1 as usize].edges.is_empty());
    }

    #[test]
    fn greedy_star_does_not_commit() {
        let dfa = build("a*a");
        let s1 = step(&dfa, 0, b'a').unwrap();
        assert_eq!(dfa.states[s1 as usize].accept, 1);
        assert!(step(&dfa, s1, b'a').is_some());
    }

    #[test]
    fn negative_pattern_sets_redo() {
        let dfa = build("(?^ab)|c");
        let s1 = step(&dfa, 0, b'a').unwrap();
        let s2 = step(&dfa, s1, b'b').unwrap();
        assert!(dfa.states[s2 as usize].redo);
        assert_eq!(dfa.states[s2 as usize].accept, 1);
        let c = step(&dfa, 0, b'c').unwrap();
        assert!(!dfa.states[c as usize].redo);
        assert_eq!(dfa.states[c as usize].accept, 2);
    }

    #[test]
    fn anchors_make_meta_edges() {
        let dfa = build("^a");
        let bob = Meta::BOB.as_char();
        let (_, to) = dfa.states[0].edges[&bob];
        // The assertion target still reaches 'a'.
        assert!(step(&dfa, to, b'a').is_some());
        // Without the assertion, 'a' does not start a match.
        assert_eq!(step(&dfa, 0, b'a'), None);
    }

    #[test]
    fn meta_union_keeps_alternatives() {
        let dfa = build("(?m)^a|b");
        let bol = Meta::BOL.as_char();
        let (_, to) = dfa.states[0].edges[&bol];
        // After committing to BOL, 'b' must still be matchable.
        assert!(step(&dfa, to, b'b').is_some());
    }

    #[test]
    fn lookahead_heads_and_tails() {
        let dfa = build("a(?=bc)");
        let s1 = step(&dfa, 0, b'a').unwrap();
        assert!(dfa.states[s1 as usize].heads.contains(&0));
        let s2 = step(&dfa, s1, b'b').unwrap();
        let s3 = step(&dfa, s2, b'c').unwrap();
        assert!(dfa.states[s3 as usize].tails.contains(&0));
        assert_eq!(dfa.states[s3 as usize].accept, 1);
    }

    #[test]
    fn case_insensitive_edges() {
        let dfa = build("(?i)ab");
        let s1 = step(&dfa, 0, b'A').unwrap();
        assert_eq!(step(&dfa, 0, b'a'), Some(s1));
        let s2 = step(&dfa, s1, b'B').unwrap();
        assert_eq!(dfa.states[s2 as usize].accept, 1);
    }

    #[test]
    fn edge_ranges_are_compact() {
        let dfa = build("[a-z]");
        // One contiguous range edge.
        assert_eq!(dfa.states[0].edges.len(), 1);
        let (&lo, &(hi, _)) = dfa.states[0].edges.iter().next().unwrap();
        assert_eq!((lo, hi), (b'a' as Char, b'z' as Char));
    }

    #[test]
    fn trie_merges_literals() {
        let opts = Options::default();
        let parsed = Parser::new(b"x", &opts).parse().unwrap();
        // Build a DFA whose literals come from the trie.
        let mut trie = Trie::new();
        trie.add(b"foo", 1);
        trie.add(b"far", 2);
        let builder = Builder::new(b"x", &opts, &parsed, &trie);
        let dfa = builder.build().unwrap();
        // 'f' is shared: one edge out of the start for it.
        let f = step(&dfa, 0, b'f').unwrap();
        let o = step(&dfa, f, b'o').unwrap();
        let o2 = step(&dfa, o, b'o').unwrap();
        assert_eq!(dfa.states[o2 as usize].accept, 1);
        let a = step(&dfa, f, b'a').unwrap();
        let r = step(&dfa, a, b'r').unwrap();
        assert_eq!(dfa.states[r as usize].accept, 2);
    }

    #[test]
    fn reachability() {
        let dfa = build("ab|cd");
        assert_eq!(dfa.reachable, vec![false, true, true]);
    }
}
