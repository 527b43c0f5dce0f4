/*!
The compiled pattern.

`Pattern` owns the opcode program and prediction tables produced by the
compile pipeline: parse, literal-trie extraction, subset construction,
assembly, prediction. A compiled pattern is immutable and may be shared
by any number of matchers.
*/

use std::collections::BTreeSet;

use crate::{
    dfa::{assemble, trie::Trie, Builder},
    error::{Error, ErrorKind},
    opcode::{Accept, Char, Opcode},
    parser::Parser,
    predict::Predictor,
    util::position::Location,
};

/// Compiler options, settable from a flag string.
///
/// The flag string is a `;`-separated list where each part is either a
/// run of single-letter flags or a `letter=value` assignment:
///
/// | Flag | Effect |
/// |---|---|
/// | `b` | disable escapes inside bracket lists |
/// | `e=X` | use `X` as the escape character; `e=` disables escapes |
/// | `i` | case-insensitive matching |
/// | `m` | multi-line mode: `^` and `$` match at line boundaries |
/// | `s` | dot matches newline |
/// | `x` | free-spacing mode |
/// | `q` | `"..."` quotes verbatim content |
/// | `o` | reserved for optimized code output |
/// | `p` | include prediction tables in written output |
/// | `r` | raise syntax errors instead of recording them |
/// | `w` | print syntax errors to standard error |
/// | `f=a,b` | write the compiled tables to the named files |
/// | `n=NAME` | pattern name for written output |
/// | `z=NS` | name-space for written output |
#[derive(Clone, Debug)]
pub struct Options {
    /// Disable escapes in bracket lists (`b`).
    pub bracket_escapes_off: bool,
    /// The escape character; values above 255 disable escapes (`e=`).
    pub escape: Char,
    /// Case-insensitive matching (`i`).
    pub case_insensitive: bool,
    /// Multi-line mode (`m`).
    pub multiline: bool,
    /// Dot-all mode (`s`).
    pub dotall: bool,
    /// Free-spacing mode (`x`).
    pub free_space: bool,
    /// Quotation mode (`q`).
    pub quotable: bool,
    /// Reserved: generate optimized code instead of tables (`o`).
    pub optimize: bool,
    /// Include prediction tables in written output (`p`).
    pub predict: bool,
    /// Raise syntax errors (`r`).
    pub raise_errors: bool,
    /// Print syntax errors to standard error (`w`).
    pub print_errors: bool,
    /// Output file names (`f=`).
    pub files: Vec<String>,
    /// Pattern name for generated output (`n=`).
    pub name: String,
    /// Name-space for generated output (`z=`).
    pub namespace: String,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            bracket_escapes_off: false,
            escape: b'\\' as Char,
            case_insensitive: false,
            multiline: false,
            dotall: false,
            free_space: false,
            quotable: false,
            optimize: false,
            predict: false,
            raise_errors: false,
            print_errors: false,
            files: Vec::new(),
            name: String::new(),
            namespace: String::new(),
        }
    }
}

impl Options {
    /// Parse an option flag string.
    pub fn parse(flags: &str) -> Result<Options, Error> {
        let mut opts = Options::default();
        for part in flags.split(';') {
            if part.is_empty() {
                continue;
            }
            if let Some((key, value)) = part.split_once('=') {
                match key {
                    "e" => {
                        opts.escape = match value.as_bytes().first() {
                            None => 0x100,
                            Some(&b) => b as Char,
                        };
                        if value == "\\0" {
                            opts.escape = 0x100;
                        }
                    }
                    "f" => opts
                        .files
                        .extend(value.split(',').map(|s| s.to_string())),
                    "n" => opts.name = value.to_string(),
                    "z" => opts.namespace = value.to_string(),
                    _ => {
                        return Err(Error::new(
                            ErrorKind::InvalidModifier,
                            flags,
                            0,
                        ))
                    }
                }
                continue;
            }
            for c in part.chars() {
                match c {
                    'b' => opts.bracket_escapes_off = true,
                    'i' => opts.case_insensitive = true,
                    'm' => opts.multiline = true,
                    's' => opts.dotall = true,
                    'x' => opts.free_space = true,
                    'q' => opts.quotable = true,
                    'o' => opts.optimize = true,
                    'p' => opts.predict = true,
                    'r' => opts.raise_errors = true,
                    'w' => opts.print_errors = true,
                    _ => {
                        return Err(Error::new(
                            ErrorKind::InvalidModifier,
                            flags,
                            0,
                        ))
                    }
                }
            }
        }
        Ok(opts)
    }
}

/// A compiled pattern: the opcode program, prediction tables and
/// subpattern bookkeeping.
#[derive(Clone, Debug)]
pub struct Pattern {
    rex: String,
    opts: Options,
    code: Vec<Opcode>,
    predictor: Option<Predictor>,
    lookaheads: usize,
    /// Per-subpattern (start, end) spans in the pattern source.
    spans: Vec<(Location, Location)>,
    reachable: Vec<bool>,
    nodes: usize,
    edges: usize,
    error: Option<Error>,
}

impl Pattern {
    /// Compile a pattern with default options.
    pub fn new(regex: &str) -> Result<Pattern, Error> {
        Pattern::with_options(regex, "")
    }

    /// Compile a pattern with the given option flag string.
    ///
    /// A syntax error is returned as `Err` only when it is fatal
    /// (`exceeds_limits`) or when the `r` option is set; otherwise the
    /// error is recorded on the returned (unusable) pattern.
    pub fn with_options(regex: &str, flags: &str) -> Result<Pattern, Error> {
        let opts = Options::parse(flags)?;
        let mut pattern = Pattern {
            rex: regex.to_string(),
            opts,
            code: Vec::new(),
            predictor: None,
            lookaheads: 0,
            spans: Vec::new(),
            reachable: Vec::new(),
            nodes: 0,
            edges: 0,
            error: None,
        };
        match pattern.compile() {
            Ok(()) => Ok(pattern),
            Err(err) => {
                if pattern.opts.print_errors {
                    eprintln!("{}", err);
                }
                if err.is_fatal() || pattern.opts.raise_errors {
                    Err(err)
                } else {
                    pattern.error = Some(err);
                    Ok(pattern)
                }
            }
        }
    }

    /// Reconstruct a pattern from a serialized opcode table and an
    /// optional predictor blob, as written by [`Pattern::to_bytes`].
    pub fn from_bytes(code: &[u8], pred: Option<&[u8]>) -> Option<Pattern> {
        let code = assemble::from_bytes(code)?;
        let predictor = match pred {
            None => None,
            Some(blob) => Some(Predictor::from_blob(blob)?),
        };
        Some(Pattern {
            rex: String::new(),
            opts: Options::default(),
            lookaheads: count_lookaheads(&code),
            code,
            predictor,
            spans: Vec::new(),
            reachable: Vec::new(),
            nodes: 0,
            edges: 0,
            error: None,
        })
    }

    fn compile(&mut self) -> Result<(), Error> {
        let rex = self.rex.clone();
        let bytes = rex.as_bytes();

        // Pure literal alternatives bypass the position construction
        // and meet the rest of the pattern again inside the DFA, as a
        // prefix-sharing trie.
        let mut trie = Trie::new();
        let mut skip: BTreeSet<u32> = BTreeSet::new();
        if !self.opts.case_insensitive
            && !self.opts.free_space
            && !self.opts.quotable
        {
            for (i, span) in top_level_alternatives(bytes).iter().enumerate() {
                let text = &bytes[span.0 as usize..span.1 as usize];
                if !text.is_empty() && is_literal(text, self.opts.escape) {
                    trie.add(text, i as Accept + 1);
                    skip.insert(i as u32 + 1);
                }
            }
            // A trie with every alternative literal still needs the
            // pattern-level bookkeeping from the parser, so the skip
            // set only suppresses position generation.
        }

        let parsed =
            Parser::new(bytes, &self.opts).with_skip(skip).parse()?;
        self.lookaheads = parsed.lookaheads.len();
        let mut start = 0u32;
        self.spans = parsed
            .end
            .iter()
            .map(|&end| {
                let span = (start, end);
                start = end + 1;
                span
            })
            .collect();

        let mut dfa = Builder::new(bytes, &self.opts, &parsed, &trie).build()?;
        self.reachable = dfa.reachable.clone();
        self.nodes = dfa.len();
        self.edges = dfa
            .states
            .iter()
            .map(|s| s.edges.len())
            .sum::<usize>();
        self.code = assemble::assemble(&mut dfa, &rex)?;
        self.predictor = Some(Predictor::from_dfa(&dfa));
        self.write_files()?;
        Ok(())
    }

    /// Write the compiled tables to the files named by the `f` option.
    fn write_files(&self) -> Result<(), Error> {
        use std::io::Write;
        for name in self.opts.files.iter() {
            let write = |path: &str, data: &[u8]| -> std::io::Result<()> {
                let mut file = std::fs::File::create(path)?;
                file.write_all(data)
            };
            if let Err(err) = write(name, &assemble::to_bytes(&self.code)) {
                debug!("failed to write {}: {}", name, err);
                continue;
            }
            if self.opts.predict {
                if let Some(p) = self.predictor.as_ref() {
                    let pred_name = format!("{}.pred", name);
                    if let Err(err) = write(&pred_name, &p.to_blob()) {
                        debug!("failed to write {}: {}", pred_name, err);
                    }
                }
            }
        }
        Ok(())
    }

    /// The pattern source.
    pub fn as_str(&self) -> &str {
        &self.rex
    }

    /// The error recorded during compilation, when the `r` option was
    /// not set.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// True when compilation produced a usable opcode program.
    pub fn is_compiled(&self) -> bool {
        !self.code.is_empty() && self.error.is_none()
    }

    /// Number of top-level subpatterns.
    pub fn count(&self) -> usize {
        self.spans.len()
    }

    /// The source text of subpattern `n` (1-based); index 0 is the
    /// whole pattern.
    pub fn subpattern(&self, n: usize) -> &str {
        if n == 0 {
            return &self.rex;
        }
        match self.spans.get(n - 1) {
            None => "",
            Some(&(start, end)) => &self.rex[start as usize..end as usize],
        }
    }

    /// True when subpattern `n` (1-based) can be reached by a match.
    pub fn reachable(&self, n: usize) -> bool {
        self.reachable.get(n).copied().unwrap_or(false)
    }

    /// Number of DFA states.
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Number of DFA transitions.
    pub fn edges(&self) -> usize {
        self.edges
    }

    /// Number of opcode words.
    pub fn words(&self) -> usize {
        self.code.len()
    }

    /// The opcode program.
    pub(crate) fn code(&self) -> &[Opcode] {
        &self.code
    }

    /// The number of lookaheads in the pattern.
    pub(crate) fn lookahead_count(&self) -> usize {
        self.lookaheads
    }

    /// The match predictor, when one was computed.
    pub fn predictor(&self) -> Option<&Predictor> {
        self.predictor.as_ref()
    }

    /// Serialize the opcode program to its canonical big-endian form.
    pub fn to_bytes(&self) -> Vec<u8> {
        assemble::to_bytes(&self.code)
    }

    /// Serialize the predictor blob, when prediction tables exist.
    pub fn predictor_blob(&self) -> Option<Vec<u8>> {
        self.predictor.as_ref().map(|p| p.to_blob())
    }
}

/// Count HEAD markers to size the matcher's lookahead table when a
/// pattern is loaded from a serialized table.
fn count_lookaheads(code: &[Opcode]) -> usize {
    let mut max = 0usize;
    for &word in code {
        if crate::opcode::is_opcode_head(word) {
            max = max.max(crate::opcode::long_index_of(word) as usize + 1);
        }
    }
    max
}

/// The spans of the top-level alternatives of a pattern, splitting on
/// `|` outside any group, bracket list or quotation.
fn top_level_alternatives(rex: &[u8]) -> Vec<(Location, Location)> {
    let mut spans = Vec::new();
    let mut start = 0u32;
    let mut depth = 0i32;
    let mut in_brackets = false;
    let mut i = 0usize;
    while i < rex.len() {
        match rex[i] {
            b'\\' => i += 1,
            b'[' if !in_brackets => in_brackets = true,
            b']' if in_brackets => in_brackets = false,
            b'(' if !in_brackets => depth += 1,
            b')' if !in_brackets => depth -= 1,
            b'|' if !in_brackets && depth == 0 => {
                spans.push((start, i as Location));
                start = i as Location + 1;
            }
            _ => {}
        }
        i += 1;
    }
    spans.push((start, rex.len() as Location));
    spans
}

/// True when the alternative text is a plain literal: no operators,
/// classes, anchors, quotes or escapes.
fn is_literal(text: &[u8], escape: Char) -> bool {
    text.iter().all(|&b| {
        !matches!(
            b,
            b'(' | b')'
                | b'['
                | b']'
                | b'{'
                | b'}'
                | b'.'
                | b'^'
                | b'$'
                | b'*'
                | b'+'
                | b'?'
                | b'|'
                | b'"'
        ) && (b as Char) != escape
    })
}
