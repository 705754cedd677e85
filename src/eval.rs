//! Test evaluation. Given a compiled test and the message it is run
//! against, decide true or false.

use std::collections::HashSet;

use crate::comparator::Comparator;
use crate::email::{self, AddrSpec, Envelope, MessageSource};
use crate::error::Result;
use crate::registry::{CustomContext, Registry};
use crate::sema::{Action, Matching, MatchType, Test, Value};
use crate::variables::VariableStack;

/// Extensions a script layer may use.
#[derive(Clone, Debug, Default)]
pub struct Capabilities {
    enforced: bool,
    declared: HashSet<String>,
}

impl Capabilities {
    pub fn new(enforced: bool, requires: &[String]) -> Self {
        Self {
            enforced,
            declared: requires.iter().map(|r| r.to_ascii_lowercase()).collect(),
        }
    }

    /// Everything is allowed when enforcement is off.
    pub fn allows(&self, capability: &str) -> bool {
        !self.enforced || self.declared.contains(&capability.to_ascii_lowercase())
    }

    pub fn allows_comparator(&self, comparator: Comparator) -> bool {
        comparator.always_available() || self.allows(comparator.capability())
    }
}

/// Everything one message evaluation reads and writes. Created per message
/// and never shared.
pub struct EvaluationContext<'a> {
    pub message: &'a dyn MessageSource,
    pub envelope: Option<&'a Envelope>,
    pub registry: &'a Registry,
    pub require_enforced: bool,
    pub capabilities: Capabilities,
    pub variables: VariableStack,
    /// Accumulated actions, strings already expanded.
    pub actions: Vec<Action>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        message: &'a dyn MessageSource,
        envelope: Option<&'a Envelope>,
        registry: &'a Registry,
        require_enforced: bool,
    ) -> Self {
        Self {
            message,
            envelope,
            registry,
            require_enforced,
            capabilities: Capabilities::new(require_enforced, &[]),
            variables: VariableStack::default(),
            actions: vec![],
        }
    }

    /// Expand `${...}` references if the variables extension is in use.
    pub fn expand(&self, s: &str) -> String {
        if self.capabilities.allows("variables") {
            self.variables.expand(s)
        } else {
            s.to_owned()
        }
    }

    fn expand_all(&self, strings: &[String]) -> Vec<String> {
        strings.iter().map(|s| self.expand(s)).collect()
    }

    fn gate(&self, capability: &str, test: &str) -> bool {
        let allowed = self.capabilities.allows(capability);
        if !allowed {
            tracing::warn!(test, capability, "test used without require, evaluating as false");
        }
        allowed
    }
}

/// Evaluate `test`. Errors are ones evaluation cannot recover from, such as
/// a negative operand to `i;ascii-numeric`.
pub fn evaluate(test: &Test, ctx: &mut EvaluationContext<'_>) -> Result<bool> {
    match test {
        Test::True => Ok(true),
        Test::False => Ok(false),
        Test::Not(inner) => Ok(!evaluate(inner, ctx)?),
        Test::AllOf(tests) => {
            for t in tests {
                if !evaluate(t, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Test::AnyOf(tests) => {
            for t in tests {
                if evaluate(t, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Test::Header(h) => {
            let mut values = vec![];
            for name in ctx.expand_all(&h.names) {
                if h.mime {
                    values.extend(ctx.message.mime_header_values(&name));
                } else {
                    values.extend(ctx.message.header_values(&name));
                }
            }
            match_values(ctx, &h.matching, &values)
        }
        Test::Address(a) => {
            let part = a.part.unwrap_or_default();
            let mut values = vec![];
            for name in ctx.expand_all(&a.headers) {
                values.extend(email::address_values(ctx.message, &name, part));
            }
            match_values(ctx, &a.matching, &values)
        }
        Test::Envelope(e) => {
            if !ctx.gate("envelope", "envelope") {
                return Ok(false);
            }
            let part = e.part.unwrap_or_default();
            let values: Vec<String> = match ctx.envelope {
                Some(envelope) => ctx
                    .expand_all(&e.envelope_parts)
                    .iter()
                    .flat_map(|p| envelope.part_values(p))
                    .map(|addr| {
                        if addr.is_empty() {
                            addr
                        } else {
                            AddrSpec::from_raw(&addr).part(part)
                        }
                    })
                    .collect(),
                None => vec![],
            };
            match_values(ctx, &e.matching, &values)
        }
        Test::Body(b) => {
            if !ctx.gate("body", "body") {
                return Ok(false);
            }
            let body = ctx.message.body_text();
            match_values(ctx, &b.matching, &[body])
        }
        Test::Size(s) => {
            let size = ctx.message.size() as u64;
            Ok(if s.over { size > s.limit } else { size < s.limit })
        }
        Test::Exists(e) => Ok(ctx
            .expand_all(&e.names)
            .iter()
            .all(|name| !ctx.message.header_values(name).is_empty())),
        Test::String(s) => {
            if !ctx.gate("variables", "string") {
                return Ok(false);
            }
            let mut sources = ctx.expand_all(&s.sources);
            // Empty strings are not counted.
            if let MatchType::Count(_) = s.matching.match_type {
                sources.retain(|v| !v.is_empty());
            }
            match_values(ctx, &s.matching, &sources)
        }
        Test::Custom(c) => {
            if !ctx.gate(&c.name, "custom") {
                return Ok(false);
            }
            let custom = match ctx.registry.test(&c.name) {
                Some(custom) => custom.clone(),
                None => {
                    tracing::warn!(test = %c.name, "custom test is no longer registered");
                    return Ok(false);
                }
            };
            let args: Vec<Value> = c
                .args
                .iter()
                .map(|arg| match arg {
                    Value::Strings(ss) => Value::Strings(ctx.expand_all(ss)),
                    other => other.clone(),
                })
                .collect();
            let custom_ctx = CustomContext {
                message: ctx.message,
                envelope: ctx.envelope,
            };
            custom.evaluate(&args, &custom_ctx)
        }
    }
}

fn comparator_for(ctx: &EvaluationContext<'_>, matching: &Matching) -> Option<Comparator> {
    let comparator = match &matching.comparator {
        None => Comparator::default(),
        Some(name) => match Comparator::from_name(&ctx.expand(name)) {
            Some(c) => c,
            None => {
                tracing::warn!(comparator = %name, "unknown comparator, evaluating as false");
                return None;
            }
        },
    };
    if !ctx.capabilities.allows_comparator(comparator) {
        tracing::warn!(
            comparator = comparator.name(),
            "comparator used without require, evaluating as false"
        );
        return None;
    }
    Some(comparator)
}

/// Compare the values a test found against its keys. True as soon as one
/// value and key pair satisfies the match type.
pub fn match_values(
    ctx: &mut EvaluationContext<'_>,
    matching: &Matching,
    values: &[String],
) -> Result<bool> {
    let comparator = match comparator_for(ctx, matching) {
        Some(c) => c,
        None => return Ok(false),
    };
    if matching.match_type.is_relational() && !ctx.gate("relational", "relational match") {
        return Ok(false);
    }
    let keys = ctx.expand_all(&matching.keys);
    if let MatchType::Is | MatchType::Count(_) | MatchType::Value(_) = matching.match_type {
        for key in &keys {
            comparator.check_operand(key)?;
        }
    }
    match matching.match_type {
        MatchType::Is => {
            for value in values {
                for key in &keys {
                    if comparator.is(value, key)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        MatchType::Contains => {
            for value in values {
                for key in &keys {
                    if comparator.contains(value, key)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        MatchType::Matches => {
            for value in values {
                for key in &keys {
                    if let Some(groups) = comparator.matches(value, key)? {
                        if ctx.capabilities.allows("variables") {
                            ctx.variables.set_match_groups(groups);
                        }
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        MatchType::Count(op) => {
            let count = values.len().to_string();
            for key in &keys {
                if comparator.relation(op, &count, key)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        MatchType::Value(op) => {
            for value in values {
                for key in &keys {
                    if comparator.relation(op, value, key)? {
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::ParsedMessage;
    use crate::error::Error;
    use crate::sema::{self, Rule};
    use rstest::rstest;

    const MSG: &str = "Return-Path: <bounce@example.com>\r\n\
        From: \"Wile E. Coyote\" <coyote@desert.example.org>\r\n\
        To: test1@in.telligent.com, \"bar, foo\" <foo@x.com>\r\n\
        Cc: undisclosed-recipients:;\r\n\
        Subject: Meeting about the ACME order\r\n\
        X-Priority: 3\r\n\
        \r\n\
        Please bring the anvil.\r\n";

    fn message() -> ParsedMessage {
        email::parse(MSG.as_bytes()).unwrap()
    }

    fn first_test(script: &str) -> Test {
        let compiled = sema::compile(script, &Registry::default()).unwrap();
        let Rule { test, .. } = compiled.rules.into_iter().last().unwrap();
        test.unwrap()
    }

    fn run(script: &str, enforced: bool) -> Result<bool> {
        let msg = message();
        let envelope = Envelope::new(
            Some("<sender@example.net>".into()),
            vec!["<rcpt@in.telligent.com>".into()],
        );
        let registry = Registry::default();
        let requires = sema::compile(script, &registry).unwrap().requires;
        let mut ctx = EvaluationContext::new(&msg, Some(&envelope), &registry, enforced);
        ctx.capabilities = Capabilities::new(enforced, &requires);
        evaluate(&first_test(script), &mut ctx)
    }

    #[rstest]
    #[case(r#"if header :is "Subject" "meeting about the acme order" {}"#, true)]
    #[case(r#"if header :comparator "i;octet" :is "Subject" "meeting about the acme order" {}"#, false)]
    #[case(r#"if header :contains ["X", "Subject"] "ACME" {}"#, true)]
    #[case(r#"if header :matches "Subject" "Meeting*order" {}"#, true)]
    #[case(r#"if header :is " Subject" "Meeting about the ACME order" {}"#, false)]
    #[case(r#"if address :domain :is "to" "in.telligent.com" {}"#, true)]
    #[case(r#"if address :domain :is "cc" "in.telligent.com" {}"#, false)]
    #[case(r#"if address :localpart :is "to" "foo" {}"#, true)]
    #[case(r#"if address :all :is "from" "coyote@desert.example.org" {}"#, true)]
    #[case(r#"if exists ["From", "To"] {}"#, true)]
    #[case(r#"if exists ["From", "Bcc"] {}"#, false)]
    #[case(r#"if size :over 100 {}"#, true)]
    #[case(r#"if size :under 1K {}"#, true)]
    #[case(r#"if not true {}"#, false)]
    #[case(r#"if anyof (false, header :contains "Subject" "order") {}"#, true)]
    #[case(r#"if allof (true, header :contains "Subject" "nothing") {}"#, false)]
    fn core_tests(#[case] script: &str, #[case] expected: bool) {
        assert_eq!(run(script, true).unwrap(), expected, "{}", script);
    }

    #[rstest]
    #[case(r#"require "envelope"; if envelope :domain :is "from" "example.net" {}"#, true)]
    #[case(r#"if envelope :domain :is "from" "example.net" {}"#, false)]
    #[case(r#"require "body"; if body :contains "anvil" {}"#, true)]
    #[case(r#"if body :contains "anvil" {}"#, false)]
    #[case(r#"require "relational"; if address :count "eq" "to" "2" {}"#, true)]
    #[case(r#"if address :count "eq" "to" "2" {}"#, false)]
    #[case(r#"require ["relational", "comparator-i;ascii-numeric"]; if header :value "gt" :comparator "i;ascii-numeric" "X-Priority" "2" {}"#, true)]
    #[case(r#"require "relational"; if header :value "gt" :comparator "i;ascii-numeric" "X-Priority" "2" {}"#, false)]
    #[case(r#"if header :comparator "i;nonsense" :is "Subject" "x" {}"#, false)]
    fn capability_gating(#[case] script: &str, #[case] expected: bool) {
        assert_eq!(run(script, true).unwrap(), expected, "{}", script);
    }

    #[test]
    fn unenforced_allows_everything() {
        assert!(run(r#"if body :contains "anvil" {}"#, false).unwrap());
        assert!(run(
            r#"if header :value "gt" :comparator "i;ascii-numeric" "X-Priority" "2" {}"#,
            false
        )
        .unwrap());
    }

    #[test]
    fn negative_numeric_key_is_an_error() {
        let err = run(
            r#"require ["relational", "comparator-i;ascii-numeric"];
               if address :count "lt" :comparator "i;ascii-numeric" "To" "-1" {}"#,
            true,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NegativeNumber(_)));
    }

    #[test]
    fn matches_sets_groups() {
        let msg = message();
        let registry = Registry::default();
        let mut ctx = EvaluationContext::new(&msg, None, &registry, true);
        ctx.capabilities = Capabilities::new(true, &["variables".to_owned()]);
        let test = first_test(r#"if header :matches "Subject" "* about the *" {}"#);
        assert!(evaluate(&test, &mut ctx).unwrap());
        assert_eq!(ctx.variables.expand("${1}/${2}"), "Meeting/ACME order");

        let miss = first_test(r#"if header :matches "Subject" "nothing*" {}"#);
        assert!(!evaluate(&miss, &mut ctx).unwrap());
        assert_eq!(ctx.variables.expand("${1}"), "Meeting");
    }

    #[test]
    fn string_test_counts_non_empty() {
        let msg = message();
        let registry = Registry::default();
        let mut ctx = EvaluationContext::new(&msg, None, &registry, false);
        ctx.variables.set("a", "x");
        let test = first_test(r#"if string :count "eq" ["${a}", "${b}"] "1" {}"#);
        assert!(evaluate(&test, &mut ctx).unwrap());
    }
}
