/*!
The pattern parser.

A recursive-descent parser over four precedence levels: alternation,
concatenation, quantified atoms, atoms. Rather than building a syntax
tree, parsing directly computes the ingredients of the followpos
construction: the first/last position sets and nullability of every
sub-expression, the follow relation between positions, the modifier
location map, lookahead spans and quotation spans. Positions refer back
into the pattern text; the DFA builder later asks [`chars_at`] for the
character set a position matches, so bracket lists and escapes are
interpreted once more at compile time, when the final modifier map is
known.
*/

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::{Error, ErrorKind},
    opcode::{Char, Meta},
    pattern::Options,
    util::{
        charset::CharSet,
        position::{Follow, IterNum, LazyId, Location, Position, Positions},
        ranges::LocationRanges,
    },
};

pub(crate) mod unicode;

/// Pattern length limit. Locations must leave room in the packed
/// position representation, and the table format caps patterns at 64K.
const MAX_PATTERN_LEN: usize = 0xFFFF;

/// Group nesting limit, bounding the descent depth.
const MAX_GROUP_DEPTH: u32 = 256;

/// An anchor occurrence, recorded by location. The builder resolves each
/// to a meta code, consulting the final modifier map for `^` and `$`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AnchorKind {
    /// `^`: BOL in multiline mode, BOB otherwise.
    Caret,
    /// `$`: EOL in multiline mode, EOB otherwise.
    Dollar,
    /// `\A`.
    BufferBegin,
    /// `\Z` and `\z`.
    BufferEnd,
    /// `\b` opening a sequence.
    WordAtBegin,
    /// `\b` after an atom.
    WordAtEnd,
    /// `\B` opening a sequence.
    NonWordAtBegin,
    /// `\B` after an atom.
    NonWordAtEnd,
    /// `\<` opening a sequence.
    WordBeginAtBegin,
    /// `\<` after an atom.
    WordBeginAtEnd,
    /// `\>` opening a sequence.
    WordEndAtBegin,
    /// `\>` after an atom.
    WordEndAtEnd,
    /// `\i`.
    Indent,
    /// `\j`.
    Dedent,
    /// `\k`.
    Undent,
}

impl AnchorKind {
    /// True for anchors that assert a context to the left of the match
    /// start.
    fn is_begin(self) -> bool {
        matches!(
            self,
            AnchorKind::WordAtBegin
                | AnchorKind::NonWordAtBegin
                | AnchorKind::WordBeginAtBegin
                | AnchorKind::WordEndAtBegin
        )
    }

    /// Resolve this anchor to its meta character set. `multiline` is the
    /// state of the `m` modifier at the anchor's location.
    pub(crate) fn metas(self, multiline: bool) -> CharSet {
        let mut set = CharSet::empty();
        match self {
            AnchorKind::Caret => set.insert(
                if multiline { Meta::BOL } else { Meta::BOB }.as_char(),
            ),
            AnchorKind::Dollar => set.insert(
                if multiline { Meta::EOL } else { Meta::EOB }.as_char(),
            ),
            AnchorKind::BufferBegin => set.insert(Meta::BOB.as_char()),
            AnchorKind::BufferEnd => set.insert(Meta::EOB.as_char()),
            AnchorKind::WordAtBegin => {
                set.insert(Meta::BWB.as_char());
                set.insert(Meta::EWB.as_char());
            }
            AnchorKind::WordAtEnd => {
                set.insert(Meta::BWE.as_char());
                set.insert(Meta::EWE.as_char());
            }
            AnchorKind::NonWordAtBegin => set.insert(Meta::NWB.as_char()),
            AnchorKind::NonWordAtEnd => set.insert(Meta::NWE.as_char()),
            AnchorKind::WordBeginAtBegin => set.insert(Meta::BWB.as_char()),
            AnchorKind::WordBeginAtEnd => set.insert(Meta::BWE.as_char()),
            AnchorKind::WordEndAtBegin => set.insert(Meta::EWB.as_char()),
            AnchorKind::WordEndAtEnd => set.insert(Meta::EWE.as_char()),
            AnchorKind::Indent => set.insert(Meta::IND.as_char()),
            AnchorKind::Dedent => set.insert(Meta::DED.as_char()),
            AnchorKind::Undent => set.insert(Meta::UND.as_char()),
        }
        set
    }
}

/// The span of one `(?=X)` lookahead.
#[derive(Clone, Debug)]
pub(crate) struct LookaheadSpan {
    /// Locations of the first positions of `X`: a state containing one
    /// of these has entered the lookahead.
    pub(crate) starts: BTreeSet<Location>,
    /// Location of the closing `)`, carried by the TICKED position.
    pub(crate) end: Location,
}

/// The modifier map: for each modifier letter, the pattern locations it
/// applies to. Disabling modifiers are recorded under the upper-case
/// letter; when a mode is recorded, locations already recorded for the
/// opposite case are excluded.
#[derive(Clone, Debug, Default)]
pub(crate) struct ModifierMap {
    map: BTreeMap<u8, LocationRanges>,
}

impl ModifierMap {
    pub(crate) fn new() -> ModifierMap {
        ModifierMap::default()
    }

    /// True when modifier `mode` applies at `loc`.
    pub(crate) fn is_modified(&self, mode: u8, loc: Location) -> bool {
        self.map.get(&mode).map_or(false, |r| r.contains(loc))
    }

    /// Record `mode` over the inclusive range `from..=to`, excluding
    /// locations already recorded for the opposite-case mode.
    pub(crate) fn update(&mut self, mode: u8, from: Location, to: Location) {
        if from > to {
            return;
        }
        let reverse = mode ^ 0x20;
        if let Some(opposite) = self.map.get(&reverse) {
            let mut modified = LocationRanges::range(from, to);
            modified.subtract(opposite);
            self.map.entry(mode).or_default().union(&modified);
        } else {
            self.map.entry(mode).or_default().insert(from, to);
        }
    }
}

/// Everything the parser produces: the inputs of the DFA builder.
#[derive(Clone, Debug, Default)]
pub(crate) struct Parsed {
    /// First positions of the whole pattern: the start state.
    pub(crate) startpos: Positions,
    /// The follow relation, keyed by flag-stripped positions.
    pub(crate) followpos: Follow,
    /// Final modifier location map.
    pub(crate) modifiers: ModifierMap,
    /// Lookahead spans, indexed by lookahead id.
    pub(crate) lookaheads: Vec<LookaheadSpan>,
    /// Per-subpattern end location (its `|` or the pattern end).
    pub(crate) end: Vec<Location>,
    /// Anchor occurrences by location.
    pub(crate) anchors: BTreeMap<Location, AnchorKind>,
    /// Character-set overrides by location: escape expansions and
    /// synthetic locations of wide bracket alternatives.
    pub(crate) overrides: BTreeMap<Location, CharSet>,
    /// Quotation spans: locations inside `\Q...\E` or `"..."` match
    /// their byte verbatim.
    pub(crate) quoted: LocationRanges,
}

/// First/last sets and nullability of one sub-expression.
#[derive(Clone, Debug, Default)]
struct Frame {
    firstpos: Positions,
    lastpos: Positions,
    nullable: bool,
    /// Lazy quantifier ids introduced inside this sub-expression.
    lazyset: BTreeSet<LazyId>,
}

pub(crate) struct Parser<'p> {
    rex: &'p [u8],
    opts: &'p Options,
    loc: Location,
    out: Parsed,
    /// Flag-form modifier updates `(?i)`, applied after parsing in
    /// reverse order so that group-form disables recorded during parsing
    /// take precedence.
    queued_mods: Vec<(u8, Location)>,
    lazy_count: LazyId,
    iter_count: IterNum,
    /// Iteration stamp for positions created right now; nonzero while
    /// re-parsing an atom for bounded-repeat unrolling.
    iter_stamp: IterNum,
    /// Live free-space mode; it changes tokenization, so it is tracked
    /// during parsing rather than through the modifier map.
    free_space: bool,
    /// Live quotation mode (`q` option or `(?q:...)`).
    quotable: bool,
    /// Current top-level subpattern index.
    choice: u32,
    /// Current group nesting depth.
    depth: u32,
    /// Top-level alternatives handled by the literal trie: they are
    /// skipped here, keeping only the subpattern numbering.
    skip: BTreeSet<u32>,
    /// Next synthetic location, growing past the end of the pattern.
    synth_next: Location,
}

type Result<T> = core::result::Result<T, Error>;
type RawError = (ErrorKind, usize);

impl<'p> Parser<'p> {
    pub(crate) fn new(rex: &'p [u8], opts: &'p Options) -> Parser<'p> {
        Parser {
            rex,
            opts,
            loc: 0,
            out: Parsed::default(),
            queued_mods: Vec::new(),
            lazy_count: 0,
            iter_count: 0,
            iter_stamp: 0,
            free_space: opts.free_space,
            quotable: opts.quotable,
            choice: 1,
            depth: 0,
            skip: BTreeSet::new(),
            synth_next: rex.len() as Location,
        }
    }

    /// Mark top-level alternatives (1-based) to be skipped; used for
    /// alternatives the literal trie already covers.
    pub(crate) fn with_skip(mut self, skip: BTreeSet<u32>) -> Parser<'p> {
        self.skip = skip;
        self
    }

    /// Parse the whole pattern.
    pub(crate) fn parse(mut self) -> Result<Parsed> {
        if self.rex.len() > MAX_PATTERN_LEN {
            return Err(self.err(ErrorKind::ExceedsLength, 0));
        }
        debug!("parse: {:?}", String::from_utf8_lossy(self.rex));
        loop {
            if self.skip.contains(&self.choice) {
                // A literal alternative: its text holds no specials, so
                // the next '|' at this level is the next byte '|'.
                while !matches!(self.at(self.loc), None | Some(b'|')) {
                    self.loc += 1;
                }
                self.out.end.push(self.loc);
                if self.at(self.loc) == Some(b'|') {
                    self.loc += 1;
                    self.choice += 1;
                    continue;
                }
                break;
            }
            let frame = self.parse_concat(true)?;
            self.out.end.push(self.loc);
            let accept = Position::accept_at(self.choice);
            // The accept continues any lazy group of this alternative:
            // stamped accepts are what trigger lazy culling.
            let accepts = stamp_lazy(
                &Positions::from_iter([accept]),
                &frame.lazyset,
            );
            for p in frame.lastpos.iter() {
                self.follow_entry(*p).extend(accepts.iter().copied());
            }
            if frame.nullable {
                if frame.lazyset.is_empty() {
                    self.out.startpos.insert(accept);
                } else {
                    // A nullable lazy alternative commits to the empty
                    // match; the stamped accept triggers culling of its
                    // continuations in the start state.
                    for &l in frame.lazyset.iter() {
                        self.out.startpos.insert(accept.lazied(l));
                    }
                }
            }
            self.out.startpos.extend(frame.firstpos.iter().copied());
            if self.at(self.loc) == Some(b'|') {
                self.loc += 1;
                self.choice += 1;
                continue;
            }
            break;
        }
        if (self.loc as usize) < self.rex.len() {
            return Err(
                self.err(ErrorKind::MismatchedParens, self.loc as usize)
            );
        }
        if !self.rex.is_empty() {
            let to = self.rex.len() as Location - 1;
            for (mode, from) in
                core::mem::take(&mut self.queued_mods).into_iter().rev()
            {
                if from <= to {
                    self.out.modifiers.update(mode, from, to);
                }
            }
            for (flag, on) in [
                (b'i', self.opts.case_insensitive),
                (b'm', self.opts.multiline),
                (b's', self.opts.dotall),
            ] {
                if on {
                    self.out.modifiers.update(flag, 0, to);
                }
            }
        }
        debug!(
            "parse: {} subpatterns, {} lookaheads, {} follow entries",
            self.out.end.len(),
            self.out.lookaheads.len(),
            self.out.followpos.len()
        );
        Ok(self.out)
    }

    fn err(&self, kind: ErrorKind, pos: usize) -> Error {
        Error::new(kind, &String::from_utf8_lossy(self.rex), pos)
    }

    #[inline]
    fn at(&self, loc: Location) -> Option<u8> {
        self.rex.get(loc as usize).copied()
    }

    /// The escape character, or `None` when escapes are disabled.
    #[inline]
    fn escape_char(&self) -> Option<u8> {
        if self.opts.escape > 0xFF {
            None
        } else {
            Some(self.opts.escape as u8)
        }
    }

    /// Create a position at `loc`, stamped with the current iteration.
    fn position(&self, loc: Location) -> Position {
        Position::new(loc).in_iter(self.iter_stamp)
    }

    fn follow_entry(&mut self, p: Position) -> &mut Positions {
        self.out.followpos.entry(p.pos()).or_default()
    }

    /// In free-space mode, skip whitespace and `#` comments.
    fn skip_space(&mut self) {
        if !self.free_space {
            return;
        }
        while let Some(b) = self.at(self.loc) {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' => self.loc += 1,
                b'#' => {
                    while let Some(b) = self.at(self.loc) {
                        self.loc += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// True at `|`, `)` or the end of the pattern.
    fn at_sequence_end(&self) -> bool {
        matches!(self.at(self.loc), None | Some(b'|') | Some(b')'))
    }

    // ---- alternation ----

    fn parse_alternation(&mut self, begin: bool) -> Result<Frame> {
        let mut frame = self.parse_concat(begin)?;
        while self.at(self.loc) == Some(b'|') {
            self.loc += 1;
            let other = self.parse_concat(begin)?;
            frame.firstpos.extend(other.firstpos.iter().copied());
            frame.lastpos.extend(other.lastpos.iter().copied());
            frame.nullable |= other.nullable;
            frame.lazyset.extend(other.lazyset.iter().copied());
        }
        Ok(frame)
    }

    // ---- concatenation ----

    fn parse_concat(&mut self, begin: bool) -> Result<Frame> {
        self.skip_space();
        if self.at_sequence_end() {
            return Err(
                self.err(ErrorKind::EmptyExpression, self.loc as usize)
            );
        }
        let mut frame = Frame::default();
        frame.nullable = true;
        let mut first = true;
        while !self.at_sequence_end() {
            let other = self.parse_quantified(begin && first)?;
            self.concat_into(&mut frame, other);
            first = false;
            self.skip_space();
        }
        Ok(frame)
    }

    /// Concatenate `other` onto `frame` in place. Positions entering
    /// `other` continue any lazy quantifier of `frame`, so its first
    /// positions are stamped with the accumulated lazy set.
    fn concat_into(&mut self, frame: &mut Frame, other: Frame) {
        let stamped = stamp_lazy(&other.firstpos, &frame.lazyset);
        for p in frame.lastpos.iter() {
            self.follow_entry(*p).extend(stamped.iter().copied());
        }
        if frame.nullable {
            frame.firstpos.extend(stamped.iter().copied());
        }
        if other.nullable {
            frame.lastpos.extend(other.lastpos.iter().copied());
        } else {
            frame.lastpos = other.lastpos;
        }
        frame.nullable &= other.nullable;
        frame.lazyset.extend(other.lazyset.iter().copied());
    }

    // ---- quantifiers ----

    fn parse_quantified(&mut self, begin: bool) -> Result<Frame> {
        let atom_start = self.loc;
        let mut frame = self.parse_atom(begin)?;
        let mut quantified = false;
        loop {
            self.skip_space();
            match self.at(self.loc) {
                Some(b'?') => {
                    self.loc += 1;
                    self.quantifier_suffix(&mut frame)?;
                    frame.nullable = true;
                    quantified = true;
                }
                Some(b'*') => {
                    self.loc += 1;
                    self.quantifier_suffix(&mut frame)?;
                    self.add_loop_edges(&frame);
                    frame.nullable = true;
                    quantified = true;
                }
                Some(b'+') => {
                    self.loc += 1;
                    self.quantifier_suffix(&mut frame)?;
                    self.add_loop_edges(&frame);
                    quantified = true;
                }
                Some(b'{') => {
                    let brace = self.loc;
                    match self.parse_repeat_bounds()? {
                        Some((n, m, unbounded)) => {
                            if quantified {
                                return Err(self.err(
                                    ErrorKind::InvalidRepeat,
                                    brace as usize,
                                ));
                            }
                            frame = self.unroll_repeat(
                                atom_start, brace, frame, n, m, unbounded,
                            )?;
                            quantified = true;
                        }
                        None => break,
                    }
                }
                _ => break,
            }
        }
        Ok(frame)
    }

    /// Consume an optional lazy `?` or possessive `+` after a
    /// quantifier, stamping the frame accordingly.
    fn quantifier_suffix(&mut self, frame: &mut Frame) -> Result<()> {
        match self.at(self.loc) {
            Some(b'?') => {
                self.loc += 1;
                if matches!(self.at(self.loc), Some(b'?') | Some(b'+')) {
                    return Err(self
                        .err(ErrorKind::InvalidQuantifier, self.loc as usize));
                }
                let l = self.next_lazy_id()?;
                frame.lazyset.insert(l);
                frame.firstpos = stamp_one(&frame.firstpos, l);
                Ok(())
            }
            Some(b'+') => {
                self.loc += 1;
                frame.firstpos =
                    frame.firstpos.iter().map(|p| p.greedy(true)).collect();
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn next_lazy_id(&mut self) -> Result<LazyId> {
        if self.lazy_count == LazyId::MAX {
            return Err(self.err(ErrorKind::ExceedsLimits, self.loc as usize));
        }
        self.lazy_count += 1;
        Ok(self.lazy_count)
    }

    /// The loop-back edges of `*` and `+`: every last position is
    /// followed by every first position.
    fn add_loop_edges(&mut self, frame: &Frame) {
        for p in frame.lastpos.clone().iter() {
            self.follow_entry(*p).extend(frame.firstpos.iter().copied());
        }
    }

    /// Parse `{n}`, `{n,}` or `{n,m}` after the opening brace. Returns
    /// `None` without consuming when the braces are not a repeat.
    fn parse_repeat_bounds(&mut self) -> Result<Option<(u32, u32, bool)>> {
        let start = self.loc;
        let mut loc = self.loc + 1;
        let mut n: u32 = 0;
        let mut saw_digit = false;
        while let Some(b @ b'0'..=b'9') = self.at(loc) {
            n = n.saturating_mul(10).saturating_add((b - b'0') as u32);
            saw_digit = true;
            loc += 1;
        }
        if !saw_digit {
            return Ok(None);
        }
        let (m, unbounded) = match self.at(loc) {
            Some(b'}') => (n, false),
            Some(b',') => {
                loc += 1;
                let mut m: u32 = 0;
                let mut saw = false;
                while let Some(b @ b'0'..=b'9') = self.at(loc) {
                    m = m.saturating_mul(10).saturating_add((b - b'0') as u32);
                    saw = true;
                    loc += 1;
                }
                if self.at(loc) != Some(b'}') {
                    return Err(
                        self.err(ErrorKind::MismatchedBraces, start as usize)
                    );
                }
                if saw {
                    (m, false)
                } else {
                    (n.max(1), true)
                }
            }
            _ => {
                return Err(
                    self.err(ErrorKind::MismatchedBraces, start as usize)
                )
            }
        };
        if (!unbounded && m < n) || (m == 0 && !unbounded) {
            return Err(self.err(ErrorKind::InvalidRepeat, start as usize));
        }
        if m > Position::MAX_ITER as u32 {
            return Err(self.err(ErrorKind::ExceedsLimits, start as usize));
        }
        self.loc = loc + 1;
        Ok(Some((n, m, unbounded)))
    }

    /// Unroll `X{n,m}` by re-parsing the atom text for each additional
    /// copy, stamping each copy's positions with a fresh iteration
    /// number. Copies beyond the `n`th are optional; for `{n,}` the
    /// last copy loops.
    fn unroll_repeat(
        &mut self,
        atom_start: Location,
        brace: Location,
        first_copy: Frame,
        n: u32,
        m: u32,
        unbounded: bool,
    ) -> Result<Frame> {
        let lazy_id = match self.at(self.loc) {
            Some(b'?') => {
                self.loc += 1;
                if matches!(self.at(self.loc), Some(b'?') | Some(b'+')) {
                    return Err(self
                        .err(ErrorKind::InvalidQuantifier, self.loc as usize));
                }
                Some(self.next_lazy_id()?)
            }
            _ => None,
        };
        let possessive = lazy_id.is_none() && self.at(self.loc) == Some(b'+');
        if possessive {
            self.loc += 1;
        }
        let after_quant = self.loc;

        let copies = m.max(1);
        let mut combined = first_copy;
        if let Some(l) = lazy_id {
            combined.lazyset.insert(l);
            if n == 0 {
                combined.firstpos = stamp_one(&combined.firstpos, l);
            }
        }
        if possessive {
            combined.firstpos =
                combined.firstpos.iter().map(|p| p.greedy(true)).collect();
        }
        let mut last_first = combined.firstpos.clone();
        for k in 2..=copies {
            if self.iter_count == Position::MAX_ITER {
                return Err(
                    self.err(ErrorKind::ExceedsLimits, brace as usize)
                );
            }
            self.iter_count += 1;
            let (save_loc, save_stamp) = (self.loc, self.iter_stamp);
            self.loc = atom_start;
            self.iter_stamp = self.iter_count;
            let copy = self.parse_atom(false)?;
            debug_assert!(self.loc <= brace);
            self.loc = save_loc;
            self.iter_stamp = save_stamp;

            let optional = k > n;
            let mut copy_first = copy.firstpos.clone();
            if let (Some(l), true) = (lazy_id, optional) {
                copy_first = stamp_one(&copy_first, l);
            }
            for p in combined.lastpos.iter() {
                self.out
                    .followpos
                    .entry(p.pos())
                    .or_default()
                    .extend(copy_first.iter().copied());
            }
            if combined.nullable {
                combined.firstpos.extend(copy_first.iter().copied());
            }
            if optional || copy.nullable {
                combined.lastpos.extend(copy.lastpos.iter().copied());
            } else {
                combined.lastpos = copy.lastpos;
            }
            combined.nullable &= copy.nullable || optional;
            combined.lazyset.extend(copy.lazyset.iter().copied());
            last_first = copy_first;
        }
        if unbounded {
            let loop_first = match lazy_id {
                Some(l) => stamp_one(&last_first, l),
                None => last_first,
            };
            for p in combined.lastpos.clone().iter() {
                self.follow_entry(*p).extend(loop_first.iter().copied());
            }
        }
        if n == 0 {
            combined.nullable = true;
        }
        self.loc = after_quant;
        Ok(combined)
    }

    // ---- atoms ----

    fn parse_atom(&mut self, begin: bool) -> Result<Frame> {
        self.skip_space();
        let loc = self.loc;
        match self.at(loc) {
            None | Some(b'|') | Some(b')') => {
                Err(self.err(ErrorKind::EmptyExpression, loc as usize))
            }
            Some(b'(') => self.parse_group(begin),
            Some(b'[') => self.parse_bracket_atom(),
            Some(b'.') => {
                self.loc += 1;
                Ok(self.leaf(loc))
            }
            Some(b'^') => {
                self.loc += 1;
                self.anchor_atom(loc, AnchorKind::Caret, begin)
            }
            Some(b'$') => {
                self.loc += 1;
                self.anchor_atom(loc, AnchorKind::Dollar, false)
            }
            Some(b'"') if self.quotable => self.parse_quoted(),
            Some(b'*') | Some(b'+') | Some(b'?') => {
                Err(self.err(ErrorKind::InvalidQuantifier, loc as usize))
            }
            Some(c) if Some(c) == self.escape_char() => {
                self.parse_escape_atom(begin)
            }
            Some(_) => {
                self.loc += 1;
                Ok(self.leaf(loc))
            }
        }
    }

    /// A single-position leaf at `loc`.
    fn leaf(&self, loc: Location) -> Frame {
        let p = self.position(loc);
        let mut frame = Frame::default();
        frame.firstpos.insert(p);
        frame.lastpos.insert(p);
        frame
    }

    fn anchor_atom(
        &mut self,
        loc: Location,
        kind: AnchorKind,
        begin: bool,
    ) -> Result<Frame> {
        self.out.anchors.insert(loc, kind);
        let anchor_flag = kind.is_begin()
            || (begin
                && matches!(kind, AnchorKind::Caret | AnchorKind::BufferBegin));
        let p = self.position(loc).anchored(anchor_flag);
        let mut frame = Frame::default();
        frame.firstpos.insert(p);
        frame.lastpos.insert(p);
        Ok(frame)
    }

    fn parse_group(&mut self, begin: bool) -> Result<Frame> {
        let open = self.loc;
        self.depth += 1;
        if self.depth > MAX_GROUP_DEPTH {
            return Err(self.err(ErrorKind::ExceedsLimits, open as usize));
        }
        let frame = self.parse_group_body(begin, open);
        self.depth -= 1;
        frame
    }

    fn parse_group_body(&mut self, begin: bool, open: Location) -> Result<Frame> {
        self.loc += 1;
        if self.at(self.loc) == Some(b'?') {
            match self.at(self.loc + 1) {
                Some(b'=') => return self.parse_lookahead(open),
                Some(b'^') => return self.parse_negative(open),
                Some(b'#') => {
                    // A comment group, closed by the first ')'.
                    self.loc += 2;
                    while let Some(b) = self.at(self.loc) {
                        self.loc += 1;
                        if b == b')' {
                            return self.parse_atom(begin);
                        }
                    }
                    return Err(
                        self.err(ErrorKind::MismatchedParens, open as usize)
                    );
                }
                Some(b':') => {
                    self.loc += 2;
                    let frame = self.parse_alternation(begin)?;
                    self.expect_close(open)?;
                    return Ok(frame);
                }
                _ => return self.parse_modifier_group(open, begin),
            }
        }
        let frame = self.parse_alternation(begin)?;
        self.expect_close(open)?;
        Ok(frame)
    }

    fn expect_close(&mut self, open: Location) -> Result<()> {
        if self.at(self.loc) == Some(b')') {
            self.loc += 1;
            Ok(())
        } else {
            Err(self.err(ErrorKind::MismatchedParens, open as usize))
        }
    }

    fn parse_lookahead(&mut self, open: Location) -> Result<Frame> {
        self.loc += 2;
        let frame = self.parse_alternation(false)?;
        let close = self.loc;
        self.expect_close(open)?;
        let starts = frame.firstpos.iter().map(|p| p.pos().loc()).collect();
        self.out.lookaheads.push(LookaheadSpan { starts, end: close });
        // The TICKED position marks the closing ')': reaching it means
        // the lookahead body matched completely.
        let tick = self.position(close).ticked(true);
        for p in frame.lastpos.iter() {
            self.follow_entry(*p).insert(tick);
        }
        let mut out = Frame::default();
        out.firstpos = frame.firstpos;
        if frame.nullable {
            out.firstpos.insert(tick);
        }
        out.lastpos.insert(tick);
        out.nullable = frame.nullable;
        out.lazyset = frame.lazyset;
        Ok(out)
    }

    fn parse_negative(&mut self, open: Location) -> Result<Frame> {
        self.loc += 2;
        let frame = self.parse_alternation(false)?;
        self.expect_close(open)?;
        if frame.nullable {
            return Err(self.err(ErrorKind::EmptyExpression, open as usize));
        }
        // A negative pattern terminates its token: the body ends in a
        // negated accept for the current subpattern, and nothing may
        // follow the group.
        let accept = Position::accept_at(self.choice).negated(true);
        let accepts =
            stamp_lazy(&Positions::from_iter([accept]), &frame.lazyset);
        for p in frame.lastpos.iter() {
            self.follow_entry(*p).extend(accepts.iter().copied());
        }
        let mut out = Frame::default();
        out.firstpos = frame.firstpos;
        out.nullable = false;
        out.lazyset = frame.lazyset;
        Ok(out)
    }

    fn parse_modifier_group(
        &mut self,
        open: Location,
        begin: bool,
    ) -> Result<Frame> {
        self.loc += 1; // past '?'
        let mut enable = true;
        let mut flags: Vec<u8> = Vec::new();
        loop {
            match self.at(self.loc) {
                Some(b'-') => {
                    enable = false;
                    self.loc += 1;
                }
                Some(c @ (b'i' | b'm' | b's' | b'x' | b'q')) => {
                    flags.push(if enable { c } else { c & !0x20 });
                    self.loc += 1;
                }
                Some(b':') | Some(b')') => break,
                _ => {
                    return Err(
                        self.err(ErrorKind::InvalidModifier, self.loc as usize)
                    )
                }
            }
        }
        let (save_x, save_q) = (self.free_space, self.quotable);
        for &f in flags.iter() {
            match f {
                b'x' => self.free_space = true,
                b'X' => self.free_space = false,
                b'q' => self.quotable = true,
                b'Q' => self.quotable = false,
                _ => {}
            }
        }
        if self.at(self.loc) == Some(b')') {
            // Flag form: applies to the rest of the pattern. Free-space
            // and quotation stay live; map modifiers are queued and
            // applied once all group spans are known.
            self.loc += 1;
            for &f in flags.iter() {
                if matches!(f, b'i' | b'm' | b's' | b'I' | b'M' | b'S') {
                    self.queued_mods.push((f, self.loc));
                }
            }
            return self.parse_atom(begin);
        }
        // Group form '(?flags:...)'.
        self.loc += 1;
        let content = self.loc;
        let frame = self.parse_alternation(begin)?;
        let close = self.loc;
        self.expect_close(open)?;
        for &f in flags.iter() {
            if matches!(f, b'i' | b'm' | b's' | b'I' | b'M' | b'S') {
                self.out.modifiers.update(
                    f,
                    content,
                    close.saturating_sub(1).max(content),
                );
            }
        }
        self.free_space = save_x;
        self.quotable = save_q;
        Ok(frame)
    }

    /// Parse a `"..."` quotation into a chain of literal byte positions.
    fn parse_quoted(&mut self) -> Result<Frame> {
        let open = self.loc;
        self.loc += 1;
        let mut frame = Frame::default();
        frame.nullable = true;
        loop {
            match self.at(self.loc) {
                None => {
                    return Err(
                        self.err(ErrorKind::MismatchedQuotation, open as usize)
                    )
                }
                Some(b'"') => {
                    self.loc += 1;
                    break;
                }
                Some(c) => {
                    // Inside quotes only \" and \\ unescape.
                    if Some(c) == self.escape_char()
                        && matches!(
                            self.at(self.loc + 1),
                            Some(b'"') | Some(b'\\')
                        )
                    {
                        self.loc += 1;
                    }
                    let loc = self.loc;
                    self.out.quoted.insert(loc, loc);
                    let other = self.leaf(loc);
                    self.loc += 1;
                    self.concat_into(&mut frame, other);
                }
            }
        }
        Ok(frame)
    }

    /// Parse `\Q...\E` into a chain of literal byte positions.
    fn parse_quoted_qe(&mut self) -> Result<Frame> {
        let open = self.loc;
        self.loc += 2;
        let mut frame = Frame::default();
        frame.nullable = true;
        loop {
            match self.at(self.loc) {
                None => {
                    return Err(
                        self.err(ErrorKind::MismatchedQuotation, open as usize)
                    )
                }
                Some(c)
                    if Some(c) == self.escape_char()
                        && self.at(self.loc + 1) == Some(b'E') =>
                {
                    self.loc += 2;
                    break;
                }
                Some(_) => {
                    let loc = self.loc;
                    self.out.quoted.insert(loc, loc);
                    let other = self.leaf(loc);
                    self.loc += 1;
                    self.concat_into(&mut frame, other);
                }
            }
        }
        Ok(frame)
    }

    /// A chain of byte positions spelling the UTF-8 encoding of `cp`,
    /// anchored at the escape's own text span.
    fn utf8_chain(&mut self, esc_loc: Location, cp: u32) -> Frame {
        let (bytes, len) = unicode::encode(cp);
        let mut frame = Frame::default();
        frame.nullable = true;
        for (k, &b) in bytes[..len as usize].iter().enumerate() {
            let loc = esc_loc + k as Location;
            self.out.overrides.insert(loc, CharSet::single(b as Char));
            let other = self.leaf(loc);
            self.concat_into(&mut frame, other);
        }
        frame
    }

    fn parse_escape_atom(&mut self, begin: bool) -> Result<Frame> {
        let loc = self.loc;
        if self.at(loc + 1) == Some(b'Q') {
            return self.parse_quoted_qe();
        }
        let esc = parse_esc(self.rex, loc)
            .map_err(|(kind, pos)| self.err(kind, pos))?;
        let end = escape_span(self.rex, loc);
        self.loc = end;
        match esc {
            Esc::Byte(b) => {
                self.out.overrides.insert(loc, CharSet::single(b as Char));
                Ok(self.leaf(loc))
            }
            Esc::Wide(cp) => {
                if cp <= 0xFF {
                    self.out
                        .overrides
                        .insert(loc, CharSet::single(cp as Char));
                    Ok(self.leaf(loc))
                } else {
                    Ok(self.utf8_chain(loc, cp))
                }
            }
            Esc::Class(set) => {
                self.out.overrides.insert(loc, set);
                Ok(self.leaf(loc))
            }
            Esc::Anchor(c) => {
                let kind = match (c, begin) {
                    (b'A', _) => AnchorKind::BufferBegin,
                    (b'Z', _) | (b'z', _) => AnchorKind::BufferEnd,
                    (b'b', true) => AnchorKind::WordAtBegin,
                    (b'b', false) => AnchorKind::WordAtEnd,
                    (b'B', true) => AnchorKind::NonWordAtBegin,
                    (b'B', false) => AnchorKind::NonWordAtEnd,
                    (b'<', true) => AnchorKind::WordBeginAtBegin,
                    (b'<', false) => AnchorKind::WordBeginAtEnd,
                    (b'>', true) => AnchorKind::WordEndAtBegin,
                    (b'>', false) => AnchorKind::WordEndAtEnd,
                    (b'i', _) => AnchorKind::Indent,
                    (b'j', _) => AnchorKind::Dedent,
                    (b'k', _) => AnchorKind::Undent,
                    _ => {
                        return Err(
                            self.err(ErrorKind::InvalidAnchor, loc as usize)
                        )
                    }
                };
                self.anchor_atom(loc, kind, begin)
            }
        }
    }

    // ---- bracket lists ----

    fn parse_bracket_atom(&mut self) -> Result<Frame> {
        let loc = self.loc;
        let (set, wide, end) = parse_bracket_list(
            self.rex,
            self.opts,
            loc,
            None,
        )
        .map_err(|(kind, pos)| self.err(kind, pos))?;
        self.loc = end;
        let mut frame = if set.any() { self.leaf(loc) } else { Frame::default() };
        // Wide members become synthetic byte chains unioned in as
        // alternatives.
        for (lo, hi) in wide {
            for seq in unicode::utf8_sequences(lo, hi) {
                let mut chain = Frame::default();
                chain.nullable = true;
                for &(blo, bhi) in seq.as_slice() {
                    let sloc = self.synth_next;
                    self.synth_next += 1;
                    let mut bytes = CharSet::empty();
                    bytes.insert_range(blo as Char, bhi as Char);
                    self.out.overrides.insert(sloc, bytes);
                    let other = self.leaf(sloc);
                    self.concat_into(&mut chain, other);
                }
                frame.firstpos.extend(chain.firstpos.iter().copied());
                frame.lastpos.extend(chain.lastpos.iter().copied());
            }
        }
        if frame.firstpos.is_empty() {
            return Err(self.err(ErrorKind::EmptyClass, loc as usize));
        }
        frame.nullable = false;
        Ok(frame)
    }
}

/// The meaning of one escape sequence.
enum Esc {
    Byte(u8),
    Wide(u32),
    Class(CharSet),
    Anchor(u8),
}

fn flipped(mut set: CharSet) -> CharSet {
    set.flip256();
    set
}

/// Stamp every unstamped position with each lazy id of `lazyset`.
fn stamp_lazy(pos: &Positions, lazyset: &BTreeSet<LazyId>) -> Positions {
    if lazyset.is_empty() {
        return pos.clone();
    }
    let mut out = Positions::new();
    for p in pos.iter() {
        if p.lazy() != 0 {
            out.insert(*p);
        } else {
            for &l in lazyset.iter() {
                out.insert(p.lazied(l));
            }
        }
    }
    out
}

fn stamp_one(pos: &Positions, l: LazyId) -> Positions {
    pos.iter()
        .map(|p| if p.lazy() == 0 { p.lazied(l) } else { *p })
        .collect()
}

/// The 14 POSIX class names of the original, at the ASCII level.
pub(crate) fn posix_class(name: &str) -> Option<CharSet> {
    let mut set = CharSet::empty();
    match name {
        "ASCII" | "ascii" => set.insert_range(0x00, 0x7F),
        "Space" | "space" => {
            set.insert_range(0x09, 0x0D);
            set.insert(b' ' as Char);
        }
        "XDigit" | "xdigit" => {
            set.insert_range(b'0' as Char, b'9' as Char);
            set.insert_range(b'A' as Char, b'F' as Char);
            set.insert_range(b'a' as Char, b'f' as Char);
        }
        "Cntrl" | "cntrl" => {
            set.insert_range(0x00, 0x1F);
            set.insert(0x7F);
        }
        "Print" | "print" => set.insert_range(0x20, 0x7E),
        "Alnum" | "alnum" => {
            set.insert_range(b'0' as Char, b'9' as Char);
            set.insert_range(b'A' as Char, b'Z' as Char);
            set.insert_range(b'a' as Char, b'z' as Char);
        }
        "Alpha" | "alpha" => {
            set.insert_range(b'A' as Char, b'Z' as Char);
            set.insert_range(b'a' as Char, b'z' as Char);
        }
        "Blank" | "blank" => {
            set.insert(b'\t' as Char);
            set.insert(b' ' as Char);
        }
        "Digit" | "digit" => set.insert_range(b'0' as Char, b'9' as Char),
        "Graph" | "graph" => set.insert_range(0x21, 0x7E),
        "Lower" | "lower" => set.insert_range(b'a' as Char, b'z' as Char),
        "Punct" | "punct" => {
            set.insert_range(0x21, 0x2F);
            set.insert_range(0x3A, 0x40);
            set.insert_range(0x5B, 0x60);
            set.insert_range(0x7B, 0x7E);
        }
        "Upper" | "upper" => set.insert_range(b'A' as Char, b'Z' as Char),
        "Word" | "word" => {
            set.insert_range(b'0' as Char, b'9' as Char);
            set.insert_range(b'A' as Char, b'Z' as Char);
            set.insert_range(b'a' as Char, b'z' as Char);
            set.insert(b'_' as Char);
        }
        _ => return None,
    }
    Some(set)
}

/// The location just past the escape sequence starting at `loc` (which
/// holds the escape character).
fn escape_span(rex: &[u8], loc: Location) -> Location {
    let at = |x: Location| rex.get(x as usize).copied();
    let braced = |start: Location| -> Location {
        let mut e = start;
        while at(e).map_or(false, |b| b != b'}') {
            e += 1;
        }
        e + 1
    };
    match at(loc + 1) {
        Some(b'x') | Some(b'u') if at(loc + 2) == Some(b'{') => braced(loc + 3),
        Some(b'x') => loc + 4,
        Some(b'u')
            if (0..4).all(|k| {
                at(loc + 2 + k)
                    .map_or(false, |b| (b as char).is_ascii_hexdigit())
            }) =>
        {
            loc + 6
        }
        Some(b'p') | Some(b'P') if at(loc + 2) == Some(b'{') => braced(loc + 3),
        Some(b'p') | Some(b'P') => loc + 3,
        Some(b'c') => loc + 3,
        Some(b'0') => {
            let mut e = loc + 2;
            let mut k = 0;
            while k < 3 && at(e).map_or(false, |b| (b'0'..=b'7').contains(&b)) {
                e += 1;
                k += 1;
            }
            e
        }
        _ => loc + 2,
    }
}

/// Interpret the escape sequence starting at `loc` (which holds the
/// escape character).
fn parse_esc(rex: &[u8], loc: Location) -> core::result::Result<Esc, RawError> {
    let at = |x: Location| rex.get(x as usize).copied();
    let c = match at(loc + 1) {
        None => return Err((ErrorKind::InvalidEscape, loc as usize)),
        Some(c) => c,
    };
    let hex = |start: Location, n: u32| -> Option<u32> {
        let mut v = 0u32;
        for k in 0..n {
            v = v * 16 + (at(start + k)? as char).to_digit(16)?;
        }
        Some(v)
    };
    let braced = |start: Location| -> Option<u32> {
        let mut e = start;
        let mut v = 0u32;
        let mut any = false;
        loop {
            match at(e)? {
                b'}' if any => return Some(v),
                b'}' => return None,
                b => {
                    v = v
                        .saturating_mul(16)
                        .saturating_add((b as char).to_digit(16)?);
                    any = true;
                    e += 1;
                }
            }
        }
    };
    let esc = match c {
        b'0' => {
            let mut v = 0u32;
            let mut e = loc + 2;
            let mut k = 0;
            while k < 3 && at(e).map_or(false, |b| (b'0'..=b'7').contains(&b)) {
                v = v * 8 + (at(e).unwrap() - b'0') as u32;
                e += 1;
                k += 1;
            }
            Esc::Byte((v & 0xFF) as u8)
        }
        b'x' if at(loc + 2) == Some(b'{') => match braced(loc + 3) {
            Some(v) if v <= 0x10FFFF => Esc::Wide(v),
            _ => return Err((ErrorKind::InvalidEscape, loc as usize)),
        },
        b'x' => match hex(loc + 2, 2) {
            Some(v) => Esc::Byte(v as u8),
            None => return Err((ErrorKind::InvalidEscape, loc as usize)),
        },
        b'u' if at(loc + 2) == Some(b'{') => match braced(loc + 3) {
            Some(v) if v <= 0x10FFFF => Esc::Wide(v),
            _ => return Err((ErrorKind::InvalidEscape, loc as usize)),
        },
        b'u' => match hex(loc + 2, 4) {
            Some(v) => Esc::Wide(v),
            // '\u' with no digits is the upper-case letter class.
            None => Esc::Class(posix_class("Upper").unwrap()),
        },
        b'c' => match at(loc + 2) {
            Some(ctl) => Esc::Byte(ctl & 0x1F),
            None => return Err((ErrorKind::InvalidEscape, loc as usize)),
        },
        b'p' | b'P' => {
            let name = if at(loc + 2) == Some(b'{') {
                let mut e = loc + 3;
                let mut name = Vec::new();
                while let Some(b) = at(e) {
                    if b == b'}' {
                        break;
                    }
                    name.push(b);
                    e += 1;
                }
                String::from_utf8_lossy(&name).to_string()
            } else {
                match at(loc + 2) {
                    Some(b) => (b as char).to_string(),
                    None => return Err((ErrorKind::InvalidClass, loc as usize)),
                }
            };
            match posix_class(&name) {
                Some(set) => {
                    Esc::Class(if c == b'P' { flipped(set) } else { set })
                }
                None => return Err((ErrorKind::InvalidClass, loc as usize)),
            }
        }
        b'd' => Esc::Class(posix_class("Digit").unwrap()),
        b'D' => Esc::Class(flipped(posix_class("Digit").unwrap())),
        b's' => Esc::Class(posix_class("Space").unwrap()),
        b'S' => Esc::Class(flipped(posix_class("Space").unwrap())),
        b'w' => Esc::Class(posix_class("Word").unwrap()),
        b'W' => Esc::Class(flipped(posix_class("Word").unwrap())),
        b'l' => Esc::Class(posix_class("Lower").unwrap()),
        b'h' => {
            let mut set = CharSet::empty();
            set.insert(b' ' as Char);
            set.insert(b'\t' as Char);
            Esc::Class(set)
        }
        b'n' => Esc::Byte(b'\n'),
        b'r' => Esc::Byte(b'\r'),
        b't' => Esc::Byte(b'\t'),
        b'f' => Esc::Byte(0x0C),
        b'v' => Esc::Byte(0x0B),
        b'a' => Esc::Byte(0x07),
        b'e' => Esc::Byte(0x1B),
        b'A' | b'Z' | b'z' | b'b' | b'B' | b'<' | b'>' | b'i' | b'j' | b'k' => {
            Esc::Anchor(c)
        }
        b'1'..=b'9' => {
            return Err((ErrorKind::InvalidBackreference, loc as usize))
        }
        c if !c.is_ascii_alphanumeric() => Esc::Byte(c),
        _ => return Err((ErrorKind::InvalidEscape, loc as usize)),
    };
    Ok(esc)
}

/// Parse the bracket list starting at `loc` (at `[`). Returns the byte
/// part of the class, wide code-point ranges, and the location just past
/// the closing `]`.
///
/// When `modifiers` is given (compile-time interpretation), the `i`
/// modifier folds letter case into the set before any negation.
pub(crate) fn parse_bracket_list(
    rex: &[u8],
    opts: &Options,
    loc: Location,
    modifiers: Option<&ModifierMap>,
) -> core::result::Result<(CharSet, Vec<(u32, u32)>, Location), RawError> {
    let at = |l: Location| rex.get(l as usize).copied();
    let escape: Option<u8> = if opts.escape > 0xFF || opts.bracket_escapes_off {
        None
    } else {
        Some(opts.escape as u8)
    };
    let open = loc;
    let mut l = loc + 1;
    let mut negate = false;
    let mut set = CharSet::empty();
    let mut wide: Vec<(u32, u32)> = Vec::new();
    if at(l) == Some(b'^') {
        negate = true;
        l += 1;
    }
    let mut first = true;
    // Pending lower bound of a possible range, as a code point.
    let mut pending: Option<u32> = None;
    loop {
        let b = match at(l) {
            None => return Err((ErrorKind::MismatchedBrackets, open as usize)),
            Some(b) => b,
        };
        match b {
            b']' if !first => {
                if let Some(cp) = pending.take() {
                    insert_cp_range(&mut set, &mut wide, cp, cp);
                }
                l += 1;
                break;
            }
            b'[' if at(l + 1) == Some(b':') => {
                if let Some(cp) = pending.take() {
                    insert_cp_range(&mut set, &mut wide, cp, cp);
                }
                let mut e = l + 2;
                let mut name = Vec::new();
                while let Some(c) = at(e) {
                    if c == b':' {
                        break;
                    }
                    name.push(c);
                    e += 1;
                }
                if at(e) != Some(b':') || at(e + 1) != Some(b']') {
                    return Err((ErrorKind::InvalidClass, l as usize));
                }
                let name = String::from_utf8_lossy(&name).to_string();
                let class = posix_class(&name)
                    .ok_or((ErrorKind::InvalidClass, l as usize))?;
                set |= class;
                l = e + 2;
            }
            b'[' if matches!(at(l + 1), Some(b'.') | Some(b'=')) => {
                return Err((ErrorKind::InvalidCollating, l as usize));
            }
            b'&' if at(l + 1) == Some(b'&') && at(l + 2) == Some(b'[') => {
                if let Some(cp) = pending.take() {
                    insert_cp_range(&mut set, &mut wide, cp, cp);
                }
                let (other, owide, end) =
                    parse_bracket_list(rex, opts, l + 2, modifiers)?;
                if !owide.is_empty() {
                    return Err((ErrorKind::InvalidClass, l as usize));
                }
                set &= other;
                if !set.any() {
                    return Err((ErrorKind::EmptyClass, open as usize));
                }
                l = end;
                if at(l) != Some(b']') {
                    return Err((ErrorKind::MismatchedBrackets, open as usize));
                }
                l += 1;
                // Intersection closes the list.
                break;
            }
            b'-' => {
                if pending.is_some()
                    && at(l + 1) != Some(b']')
                    && at(l + 1).is_some()
                {
                    // Range: resolve the upper bound.
                    let lo = pending.take().unwrap();
                    l += 1;
                    let hi = match bracket_item(rex, l, escape)? {
                        (Item::Cp(v), next) => {
                            l = next;
                            v
                        }
                        (Item::Class(_), _) => {
                            return Err((
                                ErrorKind::InvalidClassRange,
                                l as usize,
                            ))
                        }
                    };
                    if hi < lo {
                        return Err((ErrorKind::InvalidClassRange, l as usize));
                    }
                    insert_cp_range(&mut set, &mut wide, lo, hi);
                } else if pending.is_none() && !first && at(l + 1) == Some(b']')
                {
                    // Literal '-' just before ']'.
                    set.insert(b'-' as Char);
                    l += 1;
                } else if pending.is_none() {
                    // '-' adjacent to '[' (or after a flushed item):
                    // an ordinary character that may open a range.
                    pending = Some(b'-' as u32);
                    l += 1;
                } else {
                    // Pending item with ']' next: both are literal.
                    let cp = pending.take().unwrap();
                    insert_cp_range(&mut set, &mut wide, cp, cp);
                    set.insert(b'-' as Char);
                    l += 1;
                }
            }
            _ => {
                if let Some(prev) = pending.take() {
                    insert_cp_range(&mut set, &mut wide, prev, prev);
                }
                let (cp, next) = bracket_item(rex, l, escape)?;
                match cp {
                    Item::Cp(v) => {
                        pending = Some(v);
                    }
                    Item::Class(class) => {
                        set |= class;
                    }
                }
                l = next;
            }
        }
        first = false;
    }
    if let Some(mods) = modifiers {
        if mods.is_modified(b'i', open) {
            set = fold_case(&set);
        }
    }
    if negate {
        if !wide.is_empty() {
            return Err((ErrorKind::InvalidClass, open as usize));
        }
        set.flip256();
    }
    if !set.any() && wide.is_empty() {
        return Err((ErrorKind::EmptyClass, open as usize));
    }
    Ok((set, wide, l))
}

/// A resolved bracket item.
enum Item {
    Cp(u32),
    Class(CharSet),
}

/// One item of a bracket list: a literal byte, an escape, or a UTF-8
/// encoded code point. Returns the item and the location past it.
fn bracket_item(
    rex: &[u8],
    l: Location,
    escape: Option<u8>,
) -> core::result::Result<(Item, Location), RawError> {
    let b = *rex
        .get(l as usize)
        .ok_or((ErrorKind::MismatchedBrackets, l as usize))?;
    if Some(b) == escape {
        let end = escape_span(rex, l);
        return match parse_esc(rex, l)? {
            Esc::Byte(v) => Ok((Item::Cp(v as u32), end)),
            Esc::Wide(v) => Ok((Item::Cp(v), end)),
            Esc::Class(set) => Ok((Item::Class(set), end)),
            // In a bracket list '\b' is backspace; other anchors are
            // invalid.
            Esc::Anchor(b'b') => Ok((Item::Cp(0x08), end)),
            Esc::Anchor(b'i') | Esc::Anchor(b'j') | Esc::Anchor(b'k') => {
                Err((ErrorKind::InvalidEscape, l as usize))
            }
            Esc::Anchor(_) => Err((ErrorKind::InvalidEscape, l as usize)),
        };
    }
    if b < 0x80 {
        return Ok((Item::Cp(b as u32), l + 1));
    }
    // Decode one UTF-8 sequence; an invalid byte stands for itself.
    let s = &rex[l as usize..];
    let take = s.len().min(4);
    match core::str::from_utf8(&s[..take]) {
        Ok(text) => {
            let ch = text.chars().next().unwrap();
            Ok((Item::Cp(ch as u32), l + ch.len_utf8() as Location))
        }
        Err(e) if e.valid_up_to() > 0 => {
            let text = core::str::from_utf8(&s[..e.valid_up_to()]).unwrap();
            let ch = text.chars().next().unwrap();
            Ok((Item::Cp(ch as u32), l + ch.len_utf8() as Location))
        }
        Err(_) => Ok((Item::Cp(b as u32), l + 1)),
    }
}

fn insert_cp_range(
    set: &mut CharSet,
    wide: &mut Vec<(u32, u32)>,
    lo: u32,
    hi: u32,
) {
    if lo <= 0xFF {
        set.insert_range(lo as Char, hi.min(0xFF) as Char);
    }
    if hi > 0xFF {
        wide.push((lo.max(0x100), hi));
    }
}

/// Fold ASCII letter case into the set: for each letter present, insert
/// its opposite case.
pub(crate) fn fold_case(set: &CharSet) -> CharSet {
    let mut out = *set;
    for c in b'a'..=b'z' {
        if set.contains(c as Char) {
            out.insert((c & !0x20) as Char);
        }
    }
    for c in b'A'..=b'Z' {
        if set.contains(c as Char) {
            out.insert((c | 0x20) as Char);
        }
    }
    out
}

/// The character set matched by the position at `loc`, interpreted with
/// the final modifier map. Anchor locations resolve to meta sets.
pub(crate) fn chars_at(
    rex: &[u8],
    opts: &Options,
    loc: Location,
    parsed: &Parsed,
) -> CharSet {
    if let Some(kind) = parsed.anchors.get(&loc) {
        return kind.metas(parsed.modifiers.is_modified(b'm', loc));
    }
    let insensitive = parsed.modifiers.is_modified(b'i', loc);
    if let Some(set) = parsed.overrides.get(&loc) {
        return if insensitive { fold_case(set) } else { *set };
    }
    let b = match rex.get(loc as usize) {
        None => return CharSet::empty(),
        Some(&b) => b,
    };
    if parsed.quoted.contains(loc) {
        let set = CharSet::single(b as Char);
        return if insensitive { fold_case(&set) } else { set };
    }
    match b {
        b'.' => {
            let mut set = CharSet::empty();
            set.insert_range(0, 0xFF);
            if !parsed.modifiers.is_modified(b's', loc) {
                set -= CharSet::single(b'\n' as Char);
            }
            set
        }
        b'[' => {
            match parse_bracket_list(rex, opts, loc, Some(&parsed.modifiers)) {
                Ok((set, _, _)) => set,
                Err(_) => CharSet::empty(),
            }
        }
        c if (c as Char) == opts.escape => match parse_esc(rex, loc) {
            Ok(Esc::Byte(v)) => {
                let set = CharSet::single(v as Char);
                if insensitive {
                    fold_case(&set)
                } else {
                    set
                }
            }
            Ok(Esc::Wide(v)) if v <= 0xFF => {
                let set = CharSet::single(v as Char);
                if insensitive {
                    fold_case(&set)
                } else {
                    set
                }
            }
            Ok(Esc::Class(set)) => set,
            _ => CharSet::empty(),
        },
        _ => {
            let set = CharSet::single(b as Char);
            if insensitive {
                fold_case(&set)
            } else {
                set
            }
        }
    }
}
