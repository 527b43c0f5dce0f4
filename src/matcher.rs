/*!
The matcher VM.

The VM executes the opcode program one byte at a time, remembering the
longest accept it has seen. Each state is processed in three stages:

1. marker words: HEAD records the current offset for its lookahead,
   TAIL rewinds the candidate match end to the recorded offset, TAKE
   and REDO record an accept at the (possibly rewound) offset;
2. assertion GOTOs, in opcode order: the first assertion whose
   predicate holds is taken without consuming input (indentation
   assertions are set aside for stage 3);
3. byte GOTOs: the edge covering the next input byte is taken,
   consuming it. When no edge matches, the indentation assertions set
   aside in stage 2 are tried; if none fires, the state is dead and the
   best recorded accept is the match.

Accept bookkeeping prefers longer matches; among equal-length accepts a
later one (reached through assertion chains) replaces an earlier one,
while a single state always carries its smallest accept index. A REDO
accept reports a negative-pattern match: `scan` consumes and discards
it unless the `accept_all` option is set.

The VM itself never fails. The one runtime error lives in the driver:
a scan that dies with input remaining and nothing accepted has jammed,
and `scan` and `tokens` report it as a [`ScannerJammed`] error rather
than a clean end of input.

[`ScannerJammed`]: crate::ErrorKind::ScannerJammed
*/

use crate::{
    error::{Error, ErrorKind},
    input::Input,
    opcode::{
        index_of, is_opcode_goto, is_opcode_halt, is_opcode_head,
        is_opcode_long, is_opcode_meta, is_opcode_redo, is_opcode_tail,
        is_opcode_take, limits, lo_of, long_index_of, meta_of, Accept, Meta,
        Opcode,
    },
    pattern::Pattern,
    util::is_word_byte,
};

/// The accept code reported for a matched negative pattern.
pub const REDO: Accept = 0x7FFF_FFFF;

/// The accept code reported by `split` for the final piece of input.
pub const EMPTY: Accept = 0xFFFF_FFFF;

/// Matcher options.
#[derive(Clone, Debug)]
pub struct MatcherOptions {
    /// Report REDO accepts to the caller instead of discarding them.
    pub accept_all: bool,
    /// Half-check word boundaries: only the left context of `\<` and
    /// the right context of `\>` are tested.
    pub whole_words: bool,
    /// Column width of a tab stop for indentation tracking.
    pub tab_width: usize,
}

impl Default for MatcherOptions {
    fn default() -> MatcherOptions {
        MatcherOptions { accept_all: false, whole_words: false, tab_width: 4 }
    }
}

/// The outcome of one VM run.
#[derive(Clone, Copy, Debug)]
struct RawMatch {
    cap: Accept,
    start: usize,
    end: usize,
    /// The last indentation assertion taken, with the offset at which
    /// it fired.
    dent: Option<(Meta, usize)>,
    /// True when the run died with input remaining and no accept: the
    /// scanner jammed rather than reaching a clean end of input.
    jammed: bool,
}

/// A matcher executing one pattern over one haystack.
///
/// The pattern is immutable and shareable; all scan state lives here.
#[derive(Clone, Debug)]
pub struct Matcher<'p, 'h> {
    pattern: &'p Pattern,
    input: Input<'h>,
    opts: MatcherOptions,
    /// Indent stops, maintained across tokens.
    tab: Vec<usize>,
    /// Span of the last match.
    last: (usize, usize),
}

impl<'p, 'h> Matcher<'p, 'h> {
    /// Create a matcher for `pattern` over `haystack` with default
    /// options.
    pub fn new<H: ?Sized + AsRef<[u8]>>(
        pattern: &'p Pattern,
        haystack: &'h H,
    ) -> Matcher<'p, 'h> {
        Matcher::with_options(pattern, haystack, MatcherOptions::default())
    }

    /// Create a matcher with the given options.
    pub fn with_options<H: ?Sized + AsRef<[u8]>>(
        pattern: &'p Pattern,
        haystack: &'h H,
        opts: MatcherOptions,
    ) -> Matcher<'p, 'h> {
        Matcher {
            pattern,
            input: Input::new(haystack),
            opts,
            tab: Vec::new(),
            last: (0, 0),
        }
    }

    /// The text of the last match.
    pub fn text(&self) -> &'h [u8] {
        &self.input.haystack()[self.last.0..self.last.1]
    }

    /// The span of the last match.
    pub fn span(&self) -> (usize, usize) {
        self.last
    }

    /// True when the whole input has been consumed.
    pub fn at_end(&self) -> bool {
        self.input.at_eob()
    }

    /// True when a dedent must be tested before byte matching: the
    /// token starts a line that carries no leading whitespace, so the
    /// deferred evaluation (which needs a byte dead-end) would never
    /// see a pending dedent to column zero.
    fn eager_dent_at(&self, start: usize) -> bool {
        let hay = self.input.haystack();
        let at_bol = start == 0 || hay.get(start - 1) == Some(&b'\n');
        at_bol
            && !matches!(hay.get(start), Some(b' ') | Some(b'\t'))
            && self.tab.last().map_or(false, |&s| s > 0)
    }

    /// Match the token at the current position and consume it.
    /// Returns the accept index, or 0 at the clean end of input. A scan
    /// that dies with input remaining and nothing accepted has jammed
    /// and is reported as a [`ErrorKind::ScannerJammed`] error carrying
    /// the input offset.
    pub fn scan(&mut self) -> Result<Accept, Error> {
        loop {
            let start = self.input.pos();
            let m = self.run(start, self.eager_dent_at(start));
            self.finish(&m);
            if m.cap == 0 {
                self.last = (start, start);
                if m.jammed {
                    return Err(self.jam_error(start));
                }
                return Ok(0);
            }
            self.input.seek(m.end);
            self.last = (m.start, m.end);
            if m.cap == REDO && !self.opts.accept_all {
                // A negative-pattern match is consumed and discarded.
                if m.end == m.start {
                    return Err(self.jam_error(start));
                }
                continue;
            }
            return Ok(m.cap);
        }
    }

    fn jam_error(&self, at: usize) -> Error {
        Error::new(ErrorKind::ScannerJammed, self.pattern.as_str(), at)
    }

    /// Collect all accept codes by scanning tokens until the clean end
    /// of input. A jam mid-input is returned as the error it is.
    pub fn tokens(&mut self) -> Result<Vec<Accept>, Error> {
        let mut out = Vec::new();
        loop {
            let before = self.input.pos();
            let stops = self.tab.len();
            let cap = self.scan()?;
            if cap == 0 {
                break;
            }
            out.push(cap);
            if self.input.pos() == before && self.tab.len() == stops {
                // A zero-length match that moved no indent stop would
                // loop forever.
                break;
            }
        }
        Ok(out)
    }

    /// Search forward for the next match, using the prediction tables
    /// to skip impossible positions. Returns the accept index or 0.
    pub fn find(&mut self) -> Accept {
        let hay = self.input.haystack();
        let mut at = self.input.pos();
        while at <= hay.len() {
            match self.predict(at) {
                Prediction::Dead => break,
                Prediction::SkipTo(next) => {
                    at = next;
                    continue;
                }
                Prediction::Try => {}
            }
            let m = self.run(at, false);
            if m.cap != 0 {
                if m.cap == REDO && !self.opts.accept_all {
                    at = m.end.max(at + 1);
                    continue;
                }
                self.finish(&m);
                self.input.seek(m.end);
                self.last = (m.start, m.end);
                return m.cap;
            }
            at += 1;
        }
        self.input.seek(hay.len());
        self.last = (hay.len(), hay.len());
        0
    }

    /// Match the whole input. Returns the accept index when the
    /// pattern consumes every byte, else 0.
    pub fn matches(&mut self) -> Accept {
        let m = self.run(0, false);
        if m.cap != 0 && m.end == self.input.haystack().len() {
            if m.cap == REDO && !self.opts.accept_all {
                return 0;
            }
            self.last = (0, m.end);
            return m.cap;
        }
        0
    }

    /// Split mode: return the input up to the next match together with
    /// the accept index of the separating match, consuming both. At
    /// the end of input the final piece is reported with [`EMPTY`].
    pub fn split(&mut self) -> Option<(Accept, &'h [u8])> {
        if self.input.at_eob() && self.last.1 == self.input.haystack().len() {
            return None;
        }
        let hay = self.input.haystack();
        let piece_start = self.input.pos();
        let mut at = piece_start;
        while at <= hay.len() {
            match self.predict(at) {
                Prediction::Dead => break,
                Prediction::SkipTo(next) => {
                    at = next;
                    continue;
                }
                Prediction::Try => {}
            }
            let m = self.run(at, false);
            if m.cap != 0 && m.end > m.start {
                if m.cap == REDO && !self.opts.accept_all {
                    at = m.end;
                    continue;
                }
                self.finish(&m);
                self.input.seek(m.end);
                self.last = (m.start, m.end);
                return Some((m.cap, &hay[piece_start..m.start]));
            }
            at += 1;
        }
        self.input.seek(hay.len());
        self.last = (hay.len(), hay.len());
        Some((EMPTY, &hay[piece_start..]))
    }

    // ---- prediction ----

    fn predict(&self, at: usize) -> Prediction {
        let hay = self.input.haystack();
        let p = match self.pattern.predictor() {
            None => return Prediction::Try,
            Some(p) => p,
        };
        let pref = p.prefix();
        let min = p.min_after_prefix() as usize;
        if !pref.is_empty() {
            if at + pref.len() > hay.len() {
                return Prediction::Dead;
            }
            match memchr::memchr(pref[0], &hay[at..]) {
                None => return Prediction::Dead,
                Some(0) => {}
                Some(i) => return Prediction::SkipTo(at + i),
            }
            if !hay[at..].starts_with(pref) {
                return Prediction::SkipTo(at + 1);
            }
            let tail = &hay[at + pref.len()..];
            if min >= 4 && tail.len() >= min {
                if !p.predict_match_hash(tail, min) {
                    return Prediction::SkipTo(at + 1);
                }
            }
            return Prediction::Try;
        }
        if min >= 2 {
            // Shift-or over the bitap table for the next viable start.
            let bit = p.bitap();
            let mut state: u8 = 0xFF;
            let goal = 1u8 << (min - 1);
            for (i, &b) in hay[at..].iter().enumerate() {
                state = (state << 1) | bit[b as usize];
                if state & goal == 0 {
                    let candidate = at + i + 1 - min;
                    if candidate == at {
                        return Prediction::Try;
                    }
                    return Prediction::SkipTo(candidate);
                }
            }
            return Prediction::Dead;
        }
        if min >= 1 && hay.len() >= at + 4 {
            let s: [u8; 4] = hay[at..at + 4].try_into().unwrap();
            let shift = p.predict_match_shift(&s);
            if shift != 0 {
                return Prediction::SkipTo(at + shift);
            }
        }
        Prediction::Try
    }

    // ---- the VM ----

    fn run(&self, start: usize, eager_dent: bool) -> RawMatch {
        let code = self.pattern.code();
        let hay = self.input.haystack();
        let mut lap: Vec<Option<usize>> =
            vec![None; self.pattern.lookahead_count()];
        let mut m = RawMatch {
            cap: 0,
            start,
            end: start,
            dent: None,
            jammed: false,
        };
        if code.is_empty() {
            m.jammed = start < hay.len();
            return m;
        }
        let mut pc: usize = 0;
        let mut cur = start;
        // Zero-width steps since the last byte was consumed, bounding
        // assertion chains.
        let mut steps = 0usize;
        loop {
            // Stage 1: markers.
            let mut tailed: Option<usize> = None;
            while pc < code.len() {
                let op = code[pc];
                if is_opcode_head(op) {
                    let k = long_index_of(op) as usize;
                    if let Some(slot) = lap.get_mut(k) {
                        *slot = Some(cur - start);
                    }
                } else if is_opcode_tail(op) {
                    let k = long_index_of(op) as usize;
                    if let Some(off) = lap.get(k).copied().flatten() {
                        tailed = Some(off);
                    }
                } else if is_opcode_redo(op) {
                    let end = start + tailed.unwrap_or(cur - start);
                    if m.cap == 0 || end >= m.end {
                        m.cap = REDO;
                        m.end = end;
                    }
                } else if is_opcode_take(op) {
                    let end = start + tailed.unwrap_or(cur - start);
                    if m.cap == 0 || end >= m.end {
                        m.cap = long_index_of(op);
                        m.end = end;
                    }
                } else {
                    break;
                }
                pc += 1;
            }

            // Stages 2 and 3: assertion and byte GOTOs.
            let next = hay.get(cur).copied();
            let prev = cur.checked_sub(1).map(|i| hay[i]);
            let mut jump: Option<usize> = None;
            let mut consumed = false;
            let mut dents: Vec<(Meta, usize)> = Vec::new();
            let mut gi = pc;
            while gi < code.len() {
                let op = code[gi];
                if is_opcode_halt(op) {
                    break;
                }
                if is_opcode_meta(op) {
                    let meta = Meta::from_char(meta_of(op)).expect("meta");
                    let (target, width) = goto_target(code, gi);
                    if meta.is_dent() {
                        if eager_dent
                            && cur == start
                            && self.dent_assertion(meta, start, cur)
                        {
                            m.dent = Some((meta, cur));
                            jump = Some(target);
                            break;
                        }
                        dents.push((meta, target));
                    } else if self.assertion(meta, cur, prev, next) {
                        jump = Some(target);
                        break;
                    }
                    gi += width;
                    continue;
                }
                if !is_opcode_goto(op) {
                    // The next state's markers: this state is over.
                    break;
                }
                let b = match next {
                    // At the end of input no byte edge can fire, and
                    // the assertions of this state have all been seen:
                    // the first byte GOTO ends the scan.
                    None => break,
                    Some(b) => b,
                };
                let (target, width) = goto_target(code, gi);
                let lo = lo_of(op);
                let hi = crate::opcode::hi_of(op);
                if lo <= b as u16 && (b as u16) <= hi {
                    if index_of(op) == limits::HALT {
                        break;
                    }
                    jump = Some(target);
                    consumed = true;
                    break;
                }
                gi += width;
            }
            if jump.is_none() {
                // Deferred indentation assertions.
                for &(meta, target) in dents.iter() {
                    if self.dent_assertion(meta, start, cur) {
                        m.dent = Some((meta, cur));
                        jump = Some(target);
                        break;
                    }
                }
            }
            match jump {
                None => break,
                Some(t) => {
                    if consumed {
                        cur += 1;
                        steps = 0;
                    } else {
                        steps += 1;
                        if steps > code.len() {
                            break;
                        }
                    }
                    pc = t;
                }
            }
        }
        // No transition applied and nothing was accepted: with input
        // still to scan, that is a jam, not a clean end of input.
        m.jammed = m.cap == 0 && start < hay.len();
        m
    }

    /// Evaluate a zero-width assertion at the current offset. `prev`
    /// is the last byte consumed, `next` the byte about to be.
    fn assertion(
        &self,
        meta: Meta,
        cur: usize,
        prev: Option<u8>,
        next: Option<u8>,
    ) -> bool {
        let w = |b: Option<u8>| b.map_or(false, is_word_byte);
        let half = self.opts.whole_words;
        match meta {
            Meta::BOL => prev.map_or(true, |b| b == b'\n'),
            Meta::EOL => next.map_or(true, |b| b == b'\n'),
            Meta::BOB => cur == 0,
            Meta::EOB => next.is_none(),
            Meta::BWB => !w(prev) && (half || w(next)),
            Meta::EWB => w(prev) && !w(next),
            Meta::BWE => !w(prev) && w(next),
            Meta::EWE => (w(prev) || half) && !w(next),
            Meta::NWB | Meta::NWE => w(prev) == w(next),
            Meta::UND | Meta::IND | Meta::DED => unreachable!("deferred"),
        }
    }

    /// Evaluate an indentation assertion over the token consumed so
    /// far.
    fn dent_assertion(&self, meta: Meta, start: usize, cur: usize) -> bool {
        let col = self.column_of(start, cur);
        let stop = self.tab.last().copied();
        match meta {
            Meta::IND => col > 0 && stop.map_or(true, |s| s < col),
            Meta::DED => stop.map_or(false, |s| s > col),
            Meta::UND => {
                // Undent: the column is off every stop boundary.
                let nodent = (col == 0 || stop.map_or(false, |s| s >= col))
                    && stop.map_or(true, |s| s <= col);
                !nodent
            }
            _ => unreachable!(),
        }
    }

    /// The column at the end of the token `start..cur`.
    fn column_of(&self, start: usize, cur: usize) -> usize {
        let mut col = 0usize;
        for &b in self.input.haystack()[start..cur].iter() {
            if b == b'\t' {
                col = (col / self.opts.tab_width + 1) * self.opts.tab_width;
            } else {
                col += 1;
            }
        }
        col
    }

    /// Apply the indent-stop effect of a finished match.
    fn finish(&mut self, m: &RawMatch) {
        let (meta, fired_at) = match m.dent {
            None => return,
            Some(d) => d,
        };
        if m.cap == 0 || fired_at != m.end {
            return;
        }
        let col = self.column_of(m.start, m.end);
        match meta {
            Meta::IND => {
                if self.tab.last().map_or(true, |&s| s < col) {
                    self.tab.push(col);
                }
            }
            Meta::DED => {
                if self.tab.last().map_or(false, |&s| s > col) {
                    self.tab.pop();
                }
            }
            _ => {}
        }
    }
}

enum Prediction {
    /// Run the VM at this position.
    Try,
    /// No match can start before this position.
    SkipTo(usize),
    /// No match can start anywhere in the rest of the input.
    Dead,
}

/// Resolve the target of a GOTO word, reading the following LONG word
/// when present. Returns the target opcode index and the number of
/// words the edge occupies.
#[inline]
fn goto_target(code: &[Opcode], gi: usize) -> (usize, usize) {
    let idx = index_of(code[gi]);
    if idx == limits::LONG {
        let next = code.get(gi + 1).copied().unwrap_or(0);
        debug_assert!(is_opcode_long(next));
        (long_index_of(next) as usize, 2)
    } else {
        (idx as usize, 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(pattern: &str, flags: &str, input: &str) -> Vec<Accept> {
        let p = Pattern::with_options(pattern, flags).unwrap();
        assert!(p.is_compiled(), "pattern failed: {:?}", p.error());
        Matcher::new(&p, input).tokens().unwrap()
    }

    #[test]
    fn scan_alternatives() {
        assert_eq!(tokens("ab|xy", "", "abxy"), vec![1, 2]);
        assert_eq!(tokens("ab", "", "abab"), vec![1, 1]);
        assert_eq!(tokens("a(p|q)z", "", "apzaqz"), vec![1, 1]);
    }

    #[test]
    fn scan_case_insensitive() {
        assert_eq!(
            tokens("(?i)abc|xyz", "", "abcABCxyzXYZ"),
            vec![1, 1, 2, 2]
        );
        assert_eq!(tokens("(?i:abc)|xyz", "", "abcABCxyz"), vec![1, 1, 2]);
        assert_eq!(
            tokens("(?i)abc|(?-i:xyz)|(?-i:XYZ)", "", "abcABCxyzXYZ"),
            vec![1, 1, 2, 3]
        );
    }

    #[test]
    fn longest_match_wins() {
        // 'b' extends 'a' on the same prefix: the longer accept wins.
        assert_eq!(tokens("a|ab", "", "ab"), vec![2]);
        assert_eq!(tokens("a?b+|a", "", "baba"), vec![1, 1, 2]);
    }

    #[test]
    fn first_accept_wins_on_ties() {
        assert_eq!(tokens("a|a", "", "aa"), vec![1, 1]);
    }

    #[test]
    fn jam_is_distinguished_from_end_of_input() {
        let p = Pattern::new("ab|xy").unwrap();
        let mut m = Matcher::new(&p, "abq");
        assert_eq!(m.scan().unwrap(), 1);
        let err = m.scan().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScannerJammed);
        assert_eq!(err.pos(), 2);
        // A clean end of input is a plain zero.
        let mut m = Matcher::new(&p, "ab");
        assert_eq!(m.scan().unwrap(), 1);
        assert_eq!(m.scan().unwrap(), 0);
    }

    #[test]
    fn lazy_star_commits_to_shortest() {
        assert_eq!(tokens("a*?a", "", "aaaa"), vec![1, 1, 1, 1]);
        assert_eq!(tokens("a*?b", "", "aaab"), vec![1]);
        assert_eq!(tokens("a*?|a|b", "", "aab"), vec![2, 2, 3]);
        assert_eq!(tokens("a+?a", "", "aaaa"), vec![1, 1]);
    }

    #[test]
    fn lazy_iteration() {
        assert_eq!(
            tokens("(ab|cd){1,3}?ababab", "", "cdababababababab"),
            vec![1, 1]
        );
    }

    #[test]
    fn quantifiers() {
        assert_eq!(tokens("a?z", "", "azz"), vec![1, 1]);
        assert_eq!(tokens("a*z", "", "azaazz"), vec![1, 1, 1]);
        assert_eq!(tokens("a+z", "", "azaaz"), vec![1, 1]);
        assert_eq!(tokens("ab{2}", "", "abbabb"), vec![1, 1]);
        assert_eq!(tokens("ab{2,3}", "", "abbabbb"), vec![1, 1]);
        assert_eq!(tokens("ab{2,}", "", "abbabbbabbbb"), vec![1, 1, 1]);
        assert_eq!(tokens("(ab{0,2}c){2}", "", "abbcacabcabc"), vec![1, 1]);
    }

    #[test]
    fn anchors() {
        assert_eq!(tokens("\\Aa\\z", "", "a"), vec![1]);
        assert_eq!(tokens("^a$", "", "a"), vec![1]);
        assert_eq!(tokens("(?m)^a$|\\n", "m", "a\na"), vec![1, 2, 1]);
        assert_eq!(
            tokens("(?m)^a|a$|a|\\n", "m", "aa\naaa"),
            vec![1, 2, 4, 1, 3, 2]
        );
    }

    #[test]
    fn word_boundaries() {
        assert_eq!(
            tokens("\\<a\\>|\\<a|a\\>|a|-", "", "a-aaa"),
            vec![1, 5, 2, 4, 3]
        );
        assert_eq!(tokens("\\<.*\\>", "", "abc def"), vec![1]);
        assert_eq!(
            tokens("\\<.*ab\\>|[ab]*|-|\\n", "", "-aaa-aaba-aab-\n-aaa"),
            vec![3, 1, 3, 4, 3, 2]
        );
    }

    #[test]
    fn lookahead() {
        assert_eq!(
            tokens("a(?=bc)|ab(?=d)|bc|d", "", "abcdabd"),
            vec![1, 3, 4, 2, 4]
        );
    }

    #[test]
    fn negative_patterns_are_discarded() {
        assert_eq!(
            tokens("(?^ab)|\\w+| ", "", "aa ab abab ababba"),
            vec![2, 3, 3, 2, 3, 2]
        );
        assert_eq!(
            tokens("\\w+|(?^ab)| ", "", "aa ab abab ababba"),
            vec![1, 3, 3, 1, 3, 1]
        );
    }

    #[test]
    fn negative_patterns_visible_with_accept_all() {
        let p = Pattern::new("(?^ab)|\\w+| ").unwrap();
        let mut m = Matcher::with_options(
            &p,
            "aa ab abab ababba",
            MatcherOptions { accept_all: true, ..MatcherOptions::default() },
        );
        assert_eq!(
            m.tokens().unwrap(),
            vec![2, 3, REDO, 3, 2, 3, 2]
        );
    }

    #[test]
    fn find_skips_nonmatching_positions() {
        let p = Pattern::new("needle").unwrap();
        let mut m = Matcher::new(&p, "hay hay needle hay needle");
        assert_eq!(m.find(), 1);
        assert_eq!(m.span(), (8, 14));
        assert_eq!(m.find(), 1);
        assert_eq!(m.span(), (19, 25));
        assert_eq!(m.find(), 0);
    }

    #[test]
    fn find_with_branching_pattern() {
        let p = Pattern::new("abc|xyz").unwrap();
        let mut m = Matcher::new(&p, "..xyz..abc");
        assert_eq!(m.find(), 2);
        assert_eq!(m.text(), b"xyz");
        assert_eq!(m.find(), 1);
        assert_eq!(m.text(), b"abc");
        assert_eq!(m.find(), 0);
    }

    #[test]
    fn matches_whole_input_only() {
        let p = Pattern::new("a+b").unwrap();
        assert_eq!(Matcher::new(&p, "aaab").matches(), 1);
        assert_eq!(Matcher::new(&p, "aaabx").matches(), 0);
        assert_eq!(Matcher::new(&p, "").matches(), 0);
    }

    #[test]
    fn split_returns_pieces_between_matches() {
        let p = Pattern::new(",|;").unwrap();
        let mut m = Matcher::new(&p, "a,b;c");
        assert_eq!(m.split(), Some((1, &b"a"[..])));
        assert_eq!(m.split(), Some((2, &b"b"[..])));
        assert_eq!(m.split(), Some((EMPTY, &b"c"[..])));
        assert_eq!(m.split(), None);
    }

    #[test]
    fn quoted_literals() {
        assert_eq!(
            tokens("\\Q(^|$)\"\\.+\\E", "", "(^|$)\"\\.+"),
            vec![1]
        );
        assert_eq!(
            tokens("\"(^|$)\\\"\\.+\"", "q", "(^|$)\"\\.+"),
            vec![1]
        );
    }

    #[test]
    fn custom_escape_character() {
        let p = Pattern::with_options("%(%x41%xFF%)", "e=%").unwrap();
        // The UTF-8 encoding of U+00FF is not the byte 0xFF: the scan
        // dies mid-input, which is a jam.
        let mut m = Matcher::new(&p, "(A\u{FF}");
        let err = m.tokens().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScannerJammed);
        let hay = [b'(', 0x41, 0xFF, b')'];
        let mut m = Matcher::new(&p, &hay[..]);
        assert_eq!(m.scan().unwrap(), 1);
    }

    #[test]
    fn free_space_mode() {
        assert_eq!(tokens("(?x) a\tb\n c | ( xy ) z ?", "", "abcxy"), vec![1, 2]);
        assert_eq!(tokens("(?x: a b\n c)", "", "abc"), vec![1]);
    }

    #[test]
    fn dotall() {
        assert_eq!(tokens("(?s).", "", "a\n"), vec![1, 1]);
    }

    #[test]
    fn posix_classes_scan() {
        assert_eq!(tokens("[[:alpha:]]", "", "abcxyz"), vec![1; 6]);
        assert_eq!(tokens("[\\p{Alpha}]", "", "abcxyz"), vec![1; 6]);
        assert_eq!(tokens("[^a-z]", "", "A"), vec![1]);
    }

    #[test]
    fn edge_compaction_scan() {
        assert_eq!(
            tokens("[a-cg-ik]z|d|[e-g]|j|y|[x-z]|.|\\n", "", "azz"),
            vec![1, 6]
        );
    }
}
