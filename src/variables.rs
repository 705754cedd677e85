//! Variables extension (RFC 5229): scoped variable tables, `${...}`
//! expansion and the `set` modifiers.

use std::collections::HashMap;

use anyhow::bail;

use crate::glob;

/// Variable names are ASCII identifiers compared without regard to case.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_match_index(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// Variables visible to one script layer.
#[derive(Clone, Debug, Default)]
pub struct VariableScope {
    vars: HashMap<String, String>,
    match_groups: Vec<String>,
}

impl VariableScope {
    fn lookup(&self, name: &str) -> Option<&str> {
        if is_match_index(name) {
            let idx: usize = name.parse().ok()?;
            self.match_groups.get(idx).map(String::as_str)
        } else {
            self.vars.get(&name.to_ascii_lowercase()).map(String::as_str)
        }
    }
}

/// One scope per script layer, pushed when the layer starts and popped when
/// it ends, so nothing a layer sets is visible to the next one.
#[derive(Debug)]
pub struct VariableStack {
    scopes: Vec<VariableScope>,
}

impl Default for VariableStack {
    fn default() -> Self {
        Self {
            scopes: vec![VariableScope::default()],
        }
    }
}

impl VariableStack {
    pub fn push_scope(&mut self) {
        self.scopes.push(VariableScope::default());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
        if self.scopes.is_empty() {
            self.scopes.push(VariableScope::default());
        }
    }

    fn current(&self) -> &VariableScope {
        // The stack is never left empty.
        &self.scopes[self.scopes.len() - 1]
    }

    fn current_mut(&mut self) -> &mut VariableScope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    /// Assign a variable in the current scope. Names that are not identifiers
    /// are ignored; returns whether the assignment took place.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        if !is_identifier(name) {
            tracing::warn!(name, "ignoring assignment to invalid variable name");
            return false;
        }
        self.current_mut()
            .vars
            .insert(name.to_ascii_lowercase(), value.into());
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.current().lookup(name)
    }

    /// Replace `${0}`..`${N}` with the groups of the last successful match.
    pub fn set_match_groups(&mut self, groups: Vec<String>) {
        self.current_mut().match_groups = groups;
    }

    /// Substitute every `${name}` in `template`.
    ///
    /// References that do not name a variable are copied through unchanged,
    /// as is an unterminated `${`. When another `${` starts before the
    /// closing brace, the text up to it is copied and scanning restarts at
    /// the inner reference. Substituted values are not scanned again.
    pub fn expand(&self, template: &str) -> String {
        let scope = self.current();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let inner = &rest[start + 2..];
            let close = match inner.find('}') {
                Some(close) => close,
                None => {
                    out.push_str(&rest[start..]);
                    return out;
                }
            };
            if let Some(nested) = inner.find("${") {
                if nested < close {
                    out.push_str(&rest[start..start + 2 + nested]);
                    rest = &inner[nested..];
                    continue;
                }
            }
            let name = unquote(&inner[..close]);
            if is_identifier(&name) || is_match_index(&name) {
                out.push_str(scope.lookup(&name).unwrap_or(""));
            } else {
                out.push_str(&rest[start..start + 3 + close]);
            }
            rest = &inner[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

/// Backslashes inside a reference quote the next character; a doubled
/// backslash stands for one.
fn unquote(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Modifier {
    Lower,
    Upper,
    LowerFirst,
    UpperFirst,
    QuoteWildcard,
    EncodeUrl,
    Length,
}

impl Modifier {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "lower" => Some(Modifier::Lower),
            "upper" => Some(Modifier::Upper),
            "lowerfirst" => Some(Modifier::LowerFirst),
            "upperfirst" => Some(Modifier::UpperFirst),
            "quotewildcard" => Some(Modifier::QuoteWildcard),
            "encodeurl" => Some(Modifier::EncodeUrl),
            "length" => Some(Modifier::Length),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Modifier::Lower => "lower",
            Modifier::Upper => "upper",
            Modifier::LowerFirst => "lowerfirst",
            Modifier::UpperFirst => "upperfirst",
            Modifier::QuoteWildcard => "quotewildcard",
            Modifier::EncodeUrl => "encodeurl",
            Modifier::Length => "length",
        }
    }

    /// Higher values are applied first.
    pub fn precedence(self) -> u8 {
        match self {
            Modifier::Lower | Modifier::Upper => 40,
            Modifier::LowerFirst | Modifier::UpperFirst => 30,
            Modifier::QuoteWildcard => 20,
            Modifier::EncodeUrl => 15,
            Modifier::Length => 10,
        }
    }

    pub fn apply(self, value: &str) -> String {
        match self {
            Modifier::Lower => value.to_lowercase(),
            Modifier::Upper => value.to_uppercase(),
            Modifier::LowerFirst => map_first(value, |c| c.to_lowercase().collect()),
            Modifier::UpperFirst => map_first(value, |c| c.to_uppercase().collect()),
            Modifier::QuoteWildcard => glob::quote_wildcards(value),
            Modifier::EncodeUrl => urlencoding::encode(value).replace("%20", "+"),
            Modifier::Length => value.chars().count().to_string(),
        }
    }
}

fn map_first(value: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => f(first) + chars.as_str(),
        None => String::new(),
    }
}

/// At most one modifier of each precedence may appear on a single `set`.
pub fn check_modifiers(modifiers: &[Modifier]) -> anyhow::Result<()> {
    for (i, m) in modifiers.iter().enumerate() {
        if let Some(other) = modifiers[..i]
            .iter()
            .find(|o| o.precedence() == m.precedence())
        {
            bail!(
                "Modifiers :{} and :{} cannot be used together.",
                other.tag(),
                m.tag()
            );
        }
    }
    Ok(())
}

pub fn apply_modifiers(modifiers: &[Modifier], value: &str) -> String {
    let mut ordered = modifiers.to_vec();
    ordered.sort_by(|a, b| b.precedence().cmp(&a.precedence()));
    ordered
        .into_iter()
        .fold(value.to_owned(), |acc, m| m.apply(&acc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn acme() -> VariableStack {
        let mut vars = VariableStack::default();
        vars.set("company", "ACME");
        vars.set("foo", "bar");
        vars.set("var", "hello");
        vars
    }

    #[rstest]
    #[case("${var}", "hello")]
    #[case("${var!}", "${var!}")]
    #[case("${undefined}", "")]
    #[case("${full}", "")]
    #[case("${COMpANY}", "ACME")]
    #[case("${BAD${Company}", "${BADACME")]
    #[case("${President, ${Company} Inc.}", "${President, ACME Inc.}")]
    #[case("${company", "${company")]
    #[case("${${company}}", "${ACME}")]
    #[case("${${COMpANY}}", "${ACME}")]
    #[case("${${${company}}}", "${${ACME}}")]
    #[case("&%${}!", "&%${}!")]
    #[case("${doh!}", "${doh!}")]
    #[case(r"${fo\o}", "bar")]
    #[case(r"${fo\\o}", r"${fo\\o}")]
    #[case(r"${foo\}", "bar")]
    #[case("no references", "no references")]
    #[case("${foo}${foo} and ${foo}", "barbar and bar")]
    fn expansion(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(acme().expand(template), expected);
    }

    #[test]
    fn values_are_not_rescanned() {
        let mut vars = acme();
        vars.set("loop", "${company}");
        assert_eq!(vars.expand("${loop}"), "${company}");
    }

    #[test]
    fn match_groups() {
        let mut vars = acme();
        vars.set_match_groups(vec!["whole".into(), "one".into()]);
        assert_eq!(vars.expand("${0}-${1}-${2}"), "whole-one-");
    }

    #[test]
    fn invalid_names_are_not_assigned() {
        let mut vars = VariableStack::default();
        assert!(!vars.set("1abc", "x"));
        assert!(!vars.set("a-b", "x"));
        assert!(!vars.set("", "x"));
        assert_eq!(vars.get("1abc"), None);
    }

    #[test]
    fn scopes_are_isolated() {
        let mut vars = acme();
        vars.push_scope();
        assert_eq!(vars.expand("${company}"), "");
        vars.set("company", "Other");
        vars.pop_scope();
        assert_eq!(vars.expand("${company}"), "ACME");
    }

    #[rstest]
    #[case(&[Modifier::Length], "hello", "5")]
    #[case(&[Modifier::Lower], "WORLD", "world")]
    #[case(&[Modifier::Upper], "world", "WORLD")]
    #[case(&[Modifier::LowerFirst], "WORLD", "wORLD")]
    #[case(&[Modifier::UpperFirst], "example", "Example")]
    #[case(&[Modifier::EncodeUrl, Modifier::Lower], "Safe body&evil=evilbody", "safe+body%26evil%3Devilbody")]
    #[case(&[Modifier::UpperFirst, Modifier::Lower], "juMBlEd lETteRS", "Jumbled letters")]
    #[case(&[Modifier::QuoteWildcard, Modifier::Upper, Modifier::LowerFirst], r"j?uMBlEd*lETte\RS", r"j\?UMBLED\*LETTE\\RS")]
    #[case(&[Modifier::Length, Modifier::Upper], "abc", "3")]
    fn modifiers(#[case] mods: &[Modifier], #[case] input: &str, #[case] expected: &str) {
        assert_eq!(apply_modifiers(mods, input), expected);
    }

    #[test]
    fn same_precedence_is_rejected() {
        assert!(check_modifiers(&[Modifier::Lower, Modifier::Upper]).is_err());
        assert!(check_modifiers(&[Modifier::LowerFirst, Modifier::UpperFirst]).is_err());
        assert!(check_modifiers(&[Modifier::Lower, Modifier::UpperFirst, Modifier::Length]).is_ok());
    }
}
