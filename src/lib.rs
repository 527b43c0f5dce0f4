/*!
A lexer pattern compiler and matching engine.

This crate compiles POSIX-style patterns with lexer extensions — lazy
quantifiers, lookahead, anchors and word boundaries, indentation
tokens, negative patterns, modifier groups — into a deterministic
finite-state machine encoded as a compact program of 32-bit opcodes,
together with match-prediction tables for fast searching. A matcher VM
executes the opcode program over byte input to tokenize it into accept
codes.

# Example

```
use lexer_automata::{Matcher, Pattern};

let pattern = Pattern::new("\\d+|[a-z]+|\\s+")?;
let mut matcher = Matcher::new(&pattern, "abc 123");
assert_eq!(matcher.scan()?, 2);
assert_eq!(matcher.text(), b"abc");
assert_eq!(matcher.scan()?, 3);
assert_eq!(matcher.scan()?, 1);
assert_eq!(matcher.text(), b"123");
assert_eq!(matcher.scan()?, 0);
# Ok::<(), lexer_automata::Error>(())
```

Compilation follows the classic followpos construction: the parser
computes position sets directly from the pattern text, subset
construction turns them into a DFA (merging a prefix trie built from
literal alternatives), and the assembler lays the DFA out as opcode
words. Compiled patterns are immutable and can be shared by any number
of matchers; each matcher owns its own scan state.
*/

#![deny(missing_docs)]

#[macro_use]
mod macros;

mod error;
mod input;
mod matcher;
mod opcode;
mod pattern;
mod predict;
mod util;

mod dfa;
mod parser;

pub use crate::{
    error::{Error, ErrorKind},
    input::Input,
    matcher::{Matcher, MatcherOptions, EMPTY, REDO},
    opcode::{Accept, Index, Meta, Opcode},
    pattern::{Options, Pattern},
    predict::Predictor,
};
