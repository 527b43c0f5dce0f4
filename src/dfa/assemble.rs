/*!
Two-pass opcode assembly.

The first pass lays states out without LONG words and records each
state's offset in `first`. When the total exceeds the 16-bit goto space,
a second pass re-lays the states, inserting an extra LONG word for every
edge whose target needs a 24-bit index: forward jumps whose first-pass
offset reaches half the 16-bit space (final offsets never more than
double, so the test is conservative but safe), and backward jumps whose
final offset is already known to overflow.

Emission per state: HEAD markers, TAIL markers, TAKE or REDO, then meta
GOTOs in ascending code order, byte GOTOs in ascending range order, and
a catch-all HALT unless the byte edges cover the whole alphabet.
*/

use crate::{
    dfa::Dfa,
    error::{Error, ErrorKind},
    opcode::{
        is_meta, limits, opcode_goto, opcode_halt, opcode_head, opcode_long,
        opcode_redo, opcode_tail, opcode_take, Index, Opcode,
    },
};

/// Magic word leading a serialized opcode table.
pub(crate) const MAGIC: u32 = u32::from_be_bytes(*b"LXA\x01");

/// Assemble the DFA into its opcode program, assigning `first` and
/// `index` offsets to every state.
pub(crate) fn assemble(dfa: &mut Dfa, rex: &str) -> Result<Vec<Opcode>, Error> {
    // Pass 1: offsets without LONG words.
    let mut pc: Index = 0;
    for i in 0..dfa.states.len() {
        dfa.states[i].first = pc;
        dfa.states[i].index = pc;
        pc = pc
            .checked_add(state_words(dfa, i, false))
            .ok_or_else(|| Error::new(ErrorKind::ExceedsLimits, rex, 0))?;
        if pc > limits::GMAX {
            return Err(Error::new(ErrorKind::ExceedsLimits, rex, 0));
        }
    }
    let mut total = pc;
    if total > limits::LONG {
        // Pass 2: insert LONG words where needed.
        pc = 0;
        for i in 0..dfa.states.len() {
            dfa.states[i].index = pc;
            pc = pc
                .checked_add(state_words(dfa, i, true))
                .ok_or_else(|| Error::new(ErrorKind::ExceedsLimits, rex, 0))?;
            if pc > limits::GMAX {
                return Err(Error::new(ErrorKind::ExceedsLimits, rex, 0));
            }
        }
        total = pc;
    }

    for state in dfa.states.iter() {
        for &k in state.heads.iter().chain(state.tails.iter()) {
            if k > limits::LMAX {
                return Err(Error::new(ErrorKind::ExceedsLimits, rex, 0));
            }
        }
    }

    let mut code: Vec<Opcode> = Vec::with_capacity(total as usize);
    for i in 0..dfa.states.len() {
        debug_assert_eq!(code.len() as Index, dfa.states[i].index);
        for &k in dfa.states[i].heads.iter() {
            code.push(opcode_head(k));
        }
        for &k in dfa.states[i].tails.iter() {
            code.push(opcode_tail(k));
        }
        if dfa.states[i].redo {
            code.push(opcode_redo());
        } else if dfa.states[i].accept != 0 {
            code.push(opcode_take(dfa.states[i].accept.min(limits::AMAX)));
        }
        // Meta edges first, then byte ranges; both ascend.
        let edges: Vec<(u16, u16, u32)> = dfa.states[i]
            .edges
            .iter()
            .map(|(&lo, &(hi, to))| (lo, hi, to))
            .collect();
        for &(lo, hi, to) in
            edges.iter().filter(|&&(lo, _, _)| is_meta(lo)).chain(
                edges.iter().filter(|&&(lo, _, _)| !is_meta(lo)),
            )
        {
            let t = &dfa.states[to as usize];
            let use_long = total > limits::LONG
                && ((t.first > dfa.states[i].first
                    && t.first >= limits::LONG / 2)
                    || t.index >= limits::LONG);
            if use_long {
                code.push(opcode_goto(lo, hi, limits::LONG));
                code.push(opcode_long(t.index));
            } else {
                code.push(opcode_goto(lo, hi, t.index));
            }
        }
        if !covers_all_bytes(dfa, i) {
            code.push(opcode_halt());
        }
    }
    debug_assert_eq!(code.len() as Index, total);
    debug!(
        "assemble: {} states, {} words{}",
        dfa.states.len(),
        code.len(),
        if total > limits::LONG { " (with LONG gotos)" } else { "" },
    );
    Ok(code)
}

/// Number of opcode words state `i` occupies. With `with_long`, LONG
/// words are counted per edge with the same test emission uses.
fn state_words(dfa: &Dfa, i: usize, with_long: bool) -> Index {
    let state = &dfa.states[i];
    let mut words = (state.heads.len()
        + state.tails.len()
        + usize::from(state.accept != 0 || state.redo)) as Index;
    for (_, &(_, to)) in state.edges.iter() {
        let t = &dfa.states[to as usize];
        let long = with_long
            && ((t.first > state.first && t.first >= limits::LONG / 2)
                || t.index >= limits::LONG);
        words += if long { 2 } else { 1 };
    }
    if !covers_all_bytes(dfa, i) {
        words += 1;
    }
    words
}

/// True when the byte edges of state `i` cover every value `0..=255`.
fn covers_all_bytes(dfa: &Dfa, i: usize) -> bool {
    let mut next: u32 = 0;
    for (&lo, &(hi, _)) in dfa.states[i].edges.iter() {
        if is_meta(lo) {
            continue;
        }
        if (lo as u32) > next {
            return false;
        }
        next = next.max(hi as u32 + 1);
    }
    next == 256
}

/// Serialize an opcode table to the canonical big-endian form, led by
/// the magic word.
pub(crate) fn to_bytes(code: &[Opcode]) -> Vec<u8> {
    let mut out = Vec::with_capacity((code.len() + 1) * 4);
    out.extend_from_slice(&MAGIC.to_be_bytes());
    for &word in code {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out
}

/// Deserialize an opcode table from its big-endian form.
pub(crate) fn from_bytes(bytes: &[u8]) -> Option<Vec<Opcode>> {
    if bytes.len() < 4 || bytes.len() % 4 != 0 {
        return None;
    }
    let magic = u32::from_be_bytes(bytes[..4].try_into().unwrap());
    if magic != MAGIC {
        return None;
    }
    Some(
        bytes[4..]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dfa::{trie::Trie, Builder},
        opcode::{
            hi_of, index_of, is_opcode_goto, is_opcode_halt, is_opcode_take,
            lo_of, Meta,
        },
        parser::Parser,
        pattern::Options,
    };

    fn assemble_pattern(rex: &str) -> (Dfa, Vec<Opcode>) {
        let opts = Options::default();
        let parsed = Parser::new(rex.as_bytes(), &opts).parse().unwrap();
        let trie = Trie::new();
        let mut dfa =
            Builder::new(rex.as_bytes(), &opts, &parsed, &trie).build().unwrap();
        let code = assemble(&mut dfa, rex).unwrap();
        (dfa, code)
    }

    #[test]
    fn single_literal_layout() {
        let (dfa, code) = assemble_pattern("ab");
        // Start state: one goto and a halt.
        assert!(is_opcode_goto(code[0]));
        assert_eq!(lo_of(code[0]), b'a' as u16);
        assert_eq!(hi_of(code[0]), b'a' as u16);
        let s1 = index_of(code[0]) as usize;
        assert_eq!(s1, dfa.states[1].index as usize);
        assert!(is_opcode_halt(code[1]));
        // Accepting state ends with TAKE then HALT.
        let accept_at = dfa.states.iter().find(|s| s.accept == 1).unwrap();
        let word = code[accept_at.index as usize];
        assert!(is_opcode_take(word));
    }

    #[test]
    fn meta_edges_precede_byte_edges() {
        let (_, code) = assemble_pattern("(?m)^a|b");
        // State 0 must list the BOL meta goto before the byte goto.
        assert!(crate::opcode::is_opcode_meta(code[0]));
        assert_eq!(crate::opcode::meta_of(code[0]), Meta::BOL.as_char());
        assert!(is_opcode_goto(code[1]));
        assert_eq!(lo_of(code[1]), b'b' as u16);
    }

    #[test]
    fn full_coverage_omits_halt() {
        let (dfa, code) = assemble_pattern("(?s).");
        // The start state's dot edge covers all bytes: no HALT word
        // before the next state.
        let start_words = dfa.states[1].index - dfa.states[0].index;
        let _ = code;
        assert_eq!(start_words, 1);
    }

    #[test]
    fn roundtrip_serialization() {
        let (_, code) = assemble_pattern("a+b?c");
        let bytes = to_bytes(&code);
        assert_eq!(bytes.len() % 4, 0);
        let back = from_bytes(&bytes).unwrap();
        assert_eq!(back, code);
        assert_eq!(from_bytes(&bytes[4..]), None);
    }

    #[test]
    fn offsets_are_consistent() {
        let (dfa, code) = assemble_pattern("abc|abd|xyz|[0-9]+");
        for state in dfa.states.iter() {
            assert!(state.index as usize <= code.len());
        }
        // Every goto's target is some state's index.
        let targets: std::collections::BTreeSet<u32> =
            dfa.states.iter().map(|s| s.index).collect();
        let mut i = 0;
        while i < code.len() {
            let word = code[i];
            if is_opcode_goto(word) && !is_opcode_halt(word) {
                let idx = index_of(word);
                if idx == limits::LONG {
                    assert!(targets
                        .contains(&crate::opcode::long_index_of(code[i + 1])));
                    i += 1;
                } else if idx != limits::HALT {
                    assert!(targets.contains(&idx), "bad target {}", idx);
                }
            } else if crate::opcode::is_opcode_meta(word) {
                let idx = index_of(word);
                if idx != limits::HALT && idx != limits::LONG {
                    assert!(targets.contains(&idx));
                }
            }
            i += 1;
        }
    }
}
