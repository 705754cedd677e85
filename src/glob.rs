//! Sieve wildcard patterns (`:matches`).
//!
//! `*` matches any run of characters and `?` exactly one. A backslash makes
//! the next character literal; for anything other than `\`, `*` or `?` the
//! backslash is simply dropped. Every wildcard is a capture group, numbered
//! left to right, which is what `${1}`..`${N}` refer to after a match.

use itertools::Either;
use regex::Regex;
use std::iter;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Star,
    Any,
    Literal(char),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut out = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        let tok = match ch {
            '*' => Token::Star,
            '?' => Token::Any,
            // A trailing lone backslash stands for itself.
            '\\' => Token::Literal(chars.next().unwrap_or('\\')),
            ch => Token::Literal(ch),
        };
        out.push(tok);
    }
    out
}

#[derive(Clone, Debug)]
pub struct Glob {
    regex: Regex,
    casemap: bool,
}

impl Glob {
    /// Compile `pattern`. With `casemap`, ASCII letters compare without
    /// regard to case; anything else compares exactly.
    pub fn compile(pattern: &str, casemap: bool) -> Result<Glob, regex::Error> {
        let tokens = tokenize(pattern);
        // Every star is lazy except the last one, so earlier groups take as
        // little as they can and the final one soaks up the rest.
        let last_star = tokens.iter().rposition(|t| *t == Token::Star);
        let body: String = tokens
            .iter()
            .enumerate()
            .flat_map(|(i, tok)| match *tok {
                Token::Star if Some(i) == last_star => Either::Left("(.*)".chars()),
                Token::Star => Either::Left("(.*?)".chars()),
                Token::Any => Either::Left("(.)".chars()),
                Token::Literal(ch) => {
                    let ch = if casemap { ch.to_ascii_uppercase() } else { ch };
                    if regex_syntax::is_meta_character(ch) {
                        Either::Right(Either::Left(iter::once('\\').chain(iter::once(ch))))
                    } else {
                        Either::Right(Either::Right(iter::once(ch)))
                    }
                }
            })
            .collect();
        let regex = Regex::new(&format!("(?s)^{}$", body))?;
        Ok(Glob { regex, casemap })
    }

    pub fn is_match(&self, candidate: &str) -> bool {
        if self.casemap {
            self.regex.is_match(&candidate.to_ascii_uppercase())
        } else {
            self.regex.is_match(candidate)
        }
    }

    /// On a match, returns the whole candidate followed by the text of each
    /// wildcard. The text comes from `candidate` itself, so its case is kept
    /// even under case-insensitive matching.
    pub fn captures(&self, candidate: &str) -> Option<Vec<String>> {
        let folded;
        let haystack = if self.casemap {
            folded = candidate.to_ascii_uppercase();
            folded.as_str()
        } else {
            candidate
        };
        // ASCII case folding keeps byte offsets, so the ranges index both strings.
        let caps = self.regex.captures(haystack)?;
        Some(
            caps.iter()
                .map(|m| m.map(|m| candidate[m.start()..m.end()].to_owned()).unwrap_or_default())
                .collect(),
        )
    }
}

/// Escape `s` so that it matches only itself when used as a pattern.
pub fn quote_wildcards(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(r"user\*@zimbra.com", "user*@zimbra.com", true)]
    #[case(r"user\*@zimbra.com", "userXYZ@zimbra.com", false)]
    #[case("user*@zimbra.com", "userXYZ@zimbra.com", true)]
    #[case(r"a\\b", r"a\b", true)]
    #[case(r"a\?", "a?", true)]
    #[case(r"a\?", "ab", false)]
    #[case(r"\a\b\c", "abc", true)]
    #[case("a?c", "abc", true)]
    #[case("a?c", "ac", false)]
    #[case("*", "", true)]
    #[case("(x).[y]+", "(x).[y]+", true)]
    #[case("(x).[y]+", "(x)a[y]", false)]
    #[case("multi*line", "multi\nline", true)]
    #[case(r"trailing\", r"trailing\", true)]
    fn octet_patterns(#[case] pattern: &str, #[case] candidate: &str, #[case] expected: bool) {
        let glob = Glob::compile(pattern, false).unwrap();
        assert_eq!(glob.is_match(candidate), expected, "{} vs {}", pattern, candidate);
    }

    #[test]
    fn casemap_only_folds_ascii() {
        let glob = Glob::compile("*Zimbra*", true).unwrap();
        assert!(glob.is_match("hello ZIMBRA world"));
        let glob = Glob::compile("é*", true).unwrap();
        assert!(glob.is_match("éa"));
        assert!(!glob.is_match("Éa"));
    }

    #[test]
    fn octet_is_case_sensitive() {
        let glob = Glob::compile("abc*", false).unwrap();
        assert!(!glob.is_match("ABCD"));
    }

    #[test]
    fn captures_keep_original_case() {
        let glob = Glob::compile("coyote@**.com", true).unwrap();
        let caps = glob.captures("coyote@ACME.Example.COM").unwrap();
        assert_eq!(caps, vec!["coyote@ACME.Example.COM", "", "ACME.Example"]);
    }

    #[test]
    fn captures_number_question_marks_too() {
        let glob = Glob::compile("coyote@??M?.Example.com", true).unwrap();
        let caps = glob.captures("coyote@ACME.Example.com").unwrap();
        assert_eq!(caps, vec!["coyote@ACME.Example.com", "A", "C", "E"]);
    }

    #[test]
    fn escaped_wildcards_do_not_capture() {
        let glob = Glob::compile(r"*\*?", false).unwrap();
        let caps = glob.captures("ab*c").unwrap();
        assert_eq!(caps, vec!["ab*c", "ab", "c"]);
    }

    #[test]
    fn no_match_no_captures() {
        let glob = Glob::compile("a*", false).unwrap();
        assert_eq!(glob.captures("ba"), None);
    }

    #[test]
    fn quoted_string_matches_itself() {
        let raw = r"j?uMBlEd*lETte\RS";
        let quoted = quote_wildcards(raw);
        assert_eq!(quoted, r"j\?uMBlEd\*lETte\\RS");
        let glob = Glob::compile(&quoted, false).unwrap();
        assert!(glob.is_match(raw));
        assert!(!glob.is_match("jxuMBlEdylETte\\RS"));
    }
}
