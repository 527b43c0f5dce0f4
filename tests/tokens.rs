/*!
Table-driven tokenization tests: pattern, compile options, matcher
options, input, expected accept codes.
*/

use lexer_automata::{ErrorKind, Matcher, MatcherOptions, Pattern, REDO};

struct Test {
    pattern: &'static str,
    popts: &'static str,
    mopts: &'static str,
    input: &'static str,
    accepts: &'static [u32],
}

const fn t(
    pattern: &'static str,
    popts: &'static str,
    mopts: &'static str,
    input: &'static str,
    accepts: &'static [u32],
) -> Test {
    Test { pattern, popts, mopts, input, accepts }
}

fn run(tests: &[Test]) {
    let _ = env_logger::builder().is_test(true).try_init();
    for test in tests {
        let pattern = match Pattern::with_options(test.pattern, test.popts) {
            Ok(p) => p,
            Err(err) => panic!("{:?} failed to compile: {}", test.pattern, err),
        };
        assert!(
            pattern.is_compiled(),
            "{:?}: {:?}",
            test.pattern,
            pattern.error()
        );
        let mut opts = MatcherOptions::default();
        for flag in test.mopts.split(';').filter(|s| !s.is_empty()) {
            match *flag.as_bytes().first().unwrap() {
                b'A' => opts.accept_all = true,
                b'W' => opts.whole_words = true,
                b'T' => {
                    opts.tab_width =
                        flag[2..].parse().expect("tab width")
                }
                f => panic!("unknown matcher option {}", f as char),
            }
        }
        let mut matcher =
            Matcher::with_options(&pattern, test.input, opts);
        let got = matcher.tokens().unwrap_or_else(|err| {
            panic!("pattern {:?} jammed: {}", test.pattern, err)
        });
        assert_eq!(
            got, test.accepts,
            "pattern {:?} options {:?} input {:?}",
            test.pattern, test.popts, test.input
        );
    }
}

#[test]
fn literals_and_alternation() {
    run(&[
        t("ab", "", "", "ab", &[1]),
        t("ab", "", "", "abab", &[1, 1]),
        t("ab|xy", "", "", "abxy", &[1, 2]),
        t("a(p|q)z", "", "", "apzaqz", &[1, 1]),
        // Shared-prefix literals exercise the trie path.
        t("abc|abd|xyz", "", "", "abdabcxyz", &[2, 1, 3]),
    ])
}

#[test]
fn edge_compaction() {
    run(&[t(
        "[a-cg-ik]z|d|[e-g]|j|y|[x-z]|.|\\n",
        "",
        "",
        "azz",
        &[1, 6],
    )])
}

#[test]
fn posix_classes() {
    run(&[
        t(
            "[[:ASCII:]]-[[:space:]]-[[:xdigit:]]-[[:cntrl:]]-[[:print:]]-\
             [[:alnum:]]-[[:alpha:]]-[[:blank:]]-[[:digit:]]-[[:graph:]]-\
             [[:lower:]]-[[:punct:]]-[[:upper:]]-[[:word:]]",
            "",
            "",
            "\x7E-\r-F-\x01-&-0-A-\t-0-#-l-.-U-_",
            &[1],
        ),
        t(
            "\\p{ASCII}-\\p{Space}-\\p{XDigit}-\\p{Cntrl}-\\p{Print}-\
             \\p{Alnum}-\\p{Alpha}-\\p{Blank}-\\p{Digit}-\\p{Graph}-\
             \\p{Lower}-\\p{Punct}-\\p{Upper}-\\p{Word}",
            "",
            "",
            "\x7E-\r-F-\x01-&-0-A-\t-0-#-l-.-U-_",
            &[1],
        ),
        t(
            "[\\s]-[\\cA-\\cZ\\x1b-\\x1f\\x7f]-[\\d]-[\\l]-[\\u]-[\\w]",
            "",
            "",
            "\r-\x01-0-l-U-_",
            &[1],
        ),
    ])
}

#[test]
fn pattern_options() {
    run(&[
        t("(?q:\"(^|$)\\\"\\.+\")", "", "", "(^|$)\"\\.+", &[1]),
        t("\"(^|$)\\\"\\.+\"", "q", "", "(^|$)\"\\.+", &[1]),
        t("\\Q(^|$)\"\\.+\\E", "", "", "(^|$)\"\\.+", &[1]),
    ])
}

#[test]
fn case_insensitivity() {
    run(&[
        t("(?i:abc)", "", "", "abcABC", &[1, 1]),
        t("(?i)abc|xyz", "", "", "abcABCxyzXYZ", &[1, 1, 2, 2]),
        t("(?i:abc)|xyz", "", "", "abcABCxyz", &[1, 1, 2]),
        t("(?i:abc)|(?i:xyz)", "", "", "abcABCxyzXYZ", &[1, 1, 2, 2]),
        t(
            "(?i)abc|(?-i:xyz)|(?-i:XYZ)",
            "",
            "",
            "abcABCxyzXYZ",
            &[1, 1, 2, 3],
        ),
        t(
            "(?i:abc(?-i:xyz))|ABCXYZ",
            "",
            "",
            "abcxyzABCxyzABCXYZ",
            &[1, 1, 2],
        ),
        t("abc", "i", "", "abcABC", &[1, 1]),
    ])
}

#[test]
fn free_space_mode() {
    run(&[
        t("(?x) a\tb\n c | ( xy ) z ?", "", "", "abcxy", &[1, 2]),
        t("(?x: a b\n c)", "", "", "abc", &[1]),
        t("(?x) a b c\n|\n# COMMENT\n x y z", "", "", "abcxyz", &[1, 2]),
        t(
            "(?# test option (?x:... )(?x: a b c)|x y z",
            "",
            "",
            "abcx y z",
            &[1, 2],
        ),
    ])
}

#[test]
fn dotall() {
    run(&[
        t("(?s).", "", "", "a\n", &[1, 1]),
        t("(?s:.)", "", "", "a\n", &[1, 1]),
        t(".", "s", "", "a\n", &[1, 1]),
    ])
}

#[test]
fn anchors() {
    run(&[
        t("\\Aa\\z", "", "", "a", &[1]),
        t("^a$", "", "", "a", &[1]),
        t("(?m)^a$|\\n", "m", "", "a\na", &[1, 2, 1]),
        t("(?m)^a|a$|a|\\n", "m", "", "aa\naaa", &[1, 2, 4, 1, 3, 2]),
    ])
}

#[test]
fn optionals_and_closures() {
    run(&[
        t("a?z", "", "", "azz", &[1, 1]),
        t("a*z", "", "", "azaazz", &[1, 1, 1]),
        t("a+z", "", "", "azaaz", &[1, 1]),
        t("a?b+|a", "", "", "baba", &[1, 1, 2]),
        t("a*b+|a", "", "", "baabaa", &[1, 1, 2, 2]),
    ])
}

#[test]
fn bounded_repeats() {
    run(&[
        t("ab{2}", "", "", "abbabb", &[1, 1]),
        t("ab{2,3}", "", "", "abbabbb", &[1, 1]),
        t("ab{2,}", "", "", "abbabbbabbbb", &[1, 1, 1]),
        t("ab{0,}", "", "", "a", &[1]),
        t("(ab{0,2}c){2}", "", "", "abbcacabcabc", &[1, 1]),
    ])
}

#[test]
fn lazy_optionals() {
    run(&[
        t("(a|b)??a", "", "", "aaba", &[1, 1, 1]),
        t("a??b?a", "", "", "aba", &[1, 1]),
    ])
}

#[test]
fn lazy_closures() {
    run(&[
        t("a*?a", "", "", "aaaa", &[1, 1, 1, 1]),
        t("a*?|a|b", "", "", "aab", &[2, 2, 3]),
        t("(a|bb)*?abb", "", "", "abbbbabb", &[1, 1]),
        t("ab*?|b", "", "", "ab", &[1, 2]),
        t("(ab)*?|b", "", "", "b", &[2]),
        t("a(ab)*?|b", "", "", "ab", &[1, 2]),
        t("(a|b)*?a|c?", "", "", "bbaaac", &[1, 1, 1, 2]),
        t("a(a|b)*?a", "", "", "aaaba", &[1, 1]),
        t("a(a|b)*?a|a", "", "", "aaaba", &[1, 1]),
        t("a+?a", "", "", "aaaa", &[1, 1]),
        t("(a|b)+?", "", "", "ab", &[1, 1]),
        t("(a|b)+?a", "", "", "bbaaa", &[1, 1]),
        t("(a|b)+?a|a", "", "", "bbaaa", &[1, 1]),
        t("(ab)+?ac", "", "", "ababac", &[1]),
    ])
}

#[test]
fn lazy_repeats() {
    run(&[
        t("(a|b){0,3}?aaa", "", "", "baaaaaa", &[1, 1]),
        t("(a|b){1,3}?aaa", "", "", "baaaaaaa", &[1, 1]),
        t("(a|b){1,3}?aaa", "", "", "bbbaaaaaaa", &[1, 1]),
        t("(ab|cd){0,3}?ababab", "", "", "cdabababababab", &[1, 1]),
        t("(ab|cd){1,3}?ababab", "", "", "cdababababababab", &[1, 1]),
        t("(a|b){1,}?a|a", "", "", "bbaaa", &[1, 1]),
        t("(a|b){2,}?a|aa", "", "", "bbbaaaa", &[1, 1]),
    ])
}

#[test]
fn bracket_lists() {
    run(&[
        t("[a-z]", "", "", "abcxyz", &[1, 1, 1, 1, 1, 1]),
        t("[a-d-z]", "", "", "abcd-z", &[1, 1, 1, 1, 1, 1]),
        t("[-z]", "", "", "-z", &[1, 1]),
        t("[z-]", "", "", "-z", &[1, 1]),
        t("[--z]", "", "", "-az", &[1, 1, 1]),
        t("[ --]", "", "", " +-", &[1, 1, 1]),
        t("[^a-z]", "", "", "A", &[1]),
        t("[[:alpha:]]", "", "", "abcxyz", &[1, 1, 1, 1, 1, 1]),
        t("[\\p{Alpha}]", "", "", "abcxyz", &[1, 1, 1, 1, 1, 1]),
        t("[][]", "", "", "[]", &[1, 1]),
    ])
}

#[test]
fn lookahead() {
    run(&[
        t("a(?=bc)|ab(?=d)|bc|d", "", "", "abcdabd", &[1, 3, 4, 2, 4]),
        t("(?m)a(?=b?)|bc", "m", "", "aabc", &[1, 1, 2]),
        t("(?m)^a(?=b$)|b|\\n", "m", "", "ab\n", &[1, 2, 3]),
    ])
}

#[test]
fn negative_patterns() {
    run(&[
        t("(?^ab)|\\w+| ", "", "", "aa ab abab ababba", &[2, 3, 3, 2, 3, 2]),
        t(
            "(?^ab)|\\w+| ",
            "",
            "A",
            "aa ab abab ababba",
            &[2, 3, REDO, 3, 2, 3, 2],
        ),
        t("\\w+|(?^ab)| ", "", "", "aa ab abab ababba", &[1, 3, 3, 1, 3, 1]),
        t("\\w+|(?^\\s)", "", "", "99 Luftballons", &[1, 1]),
    ])
}

#[test]
fn word_boundaries() {
    run(&[
        t("\\<a\\>|\\<a|a\\>|a|-", "", "", "a-aaa", &[1, 5, 2, 4, 3]),
        t("\\<.*\\>", "", "", "abc def", &[1]),
        t("\\<.*\\>|-", "", "", "abc-", &[1, 2]),
        t("\\b.*\\b|-", "", "", "abc-", &[1, 2]),
        t("-|\\<.*\\>", "", "", "-abc-", &[1, 2, 1]),
        t("-|\\b.*\\b", "", "", "-abc-", &[1, 2, 1]),
        t("\\<(-|a)(-|a)\\>| ", "", "", "aa aa", &[1, 2, 1]),
        t("\\b(-|a)(-|a)\\b| ", "", "", "aa aa", &[1, 2, 1]),
        t(
            "\\<.*ab\\>|[ab]*|-|\\n",
            "",
            "",
            "-aaa-aaba-aab-\n-aaa",
            &[3, 1, 3, 4, 3, 2],
        ),
    ])
}

#[test]
fn indentation() {
    run(&[
        t(
            "(?m)^[ \\t]+|[ \\t]*\\i|[ \\t]*\\j|a|[ \\n]",
            "m",
            "",
            "a\n  a\n  a\n    a\n",
            &[4, 5, 2, 4, 5, 1, 4, 5, 2, 4, 5, 3, 3],
        ),
        t(
            "(?m)^[ \\t]+|[ \\t]*\\i|[ \\t]*\\j|a|[ \\n]",
            "m",
            "",
            "a\n  a\n  a\n    a\na\n",
            &[4, 5, 2, 4, 5, 1, 4, 5, 2, 4, 5, 3, 3, 4, 5],
        ),
        t(
            "(?m)^[ \\t]+|[ \\t]*\\i|[ \\t]*\\j|a|[ \\n]",
            "m",
            "",
            "a\n  a\n  a\n    a\n  a\na\n",
            &[4, 5, 2, 4, 5, 1, 4, 5, 2, 4, 5, 3, 4, 5, 3, 4, 5],
        ),
        t(
            "(?m)^[ \\t]+|[ \\t]*\\i|[ \\t]*\\j|a|[ \\n]",
            "m",
            "T=2",
            "a\n  a\n\ta\n    a\n\ta\na\n",
            &[4, 5, 2, 4, 5, 1, 4, 5, 2, 4, 5, 3, 4, 5, 3, 4, 5],
        ),
    ])
}

#[test]
fn escape_option() {
    let pattern = Pattern::with_options("%(%x41%xFF%)", "e=%").unwrap();
    let input = [b'(', 0x41, 0xFF, b')'];
    let mut matcher = Matcher::new(&pattern, &input[..]);
    assert_eq!(matcher.tokens().unwrap(), vec![1]);
}

#[test]
fn jammed_input_is_an_error() {
    let pattern = Pattern::new("ab|xy").unwrap();
    let mut matcher = Matcher::new(&pattern, "abq");
    assert_eq!(matcher.scan().unwrap(), 1);
    let err = matcher.scan().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ScannerJammed);
    assert_eq!(err.pos(), 2);
    // Unmatchable input right at the start jams too.
    let mut matcher = Matcher::new(&pattern, "qq");
    assert_eq!(
        matcher.tokens().unwrap_err().kind(),
        ErrorKind::ScannerJammed
    );
    // A clean end of input is not a jam.
    let mut matcher = Matcher::new(&pattern, "abxy");
    assert_eq!(matcher.tokens().unwrap(), vec![1, 2]);
    assert_eq!(matcher.scan().unwrap(), 0);
}

#[test]
fn multibyte_literals() {
    // A two-byte UTF-8 literal matches bytewise.
    run(&[t("(\u{A9})+", "", "", "\u{A9}", &[1])])
}
