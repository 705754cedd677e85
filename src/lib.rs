//! Sieve (RFC 5228) filtering for mail delivery.
//!
//! Scripts are parsed by [`parse`], checked and turned into rule trees by
//! [`sema`], evaluated against a message by [`exec`] and carried out
//! against a mailbox by [`executor`]. [`FilterEngine`] ties these together
//! for accounts with up to three script layers.

pub mod cache;
pub mod comparator;
pub mod config;
pub mod email;
pub mod emit;
pub mod error;
pub mod eval;
pub mod exec;
pub mod executor;
pub mod glob;
pub mod parse;
pub mod registry;
pub mod sema;
pub mod variables;
pub mod xml;

pub use cache::ScriptCache;
pub use config::FilterConfig;
pub use email::{Envelope, MessageSource, ParsedMessage};
pub use error::{Error, Result};
pub use eval::EvaluationContext;
pub use exec::{ExecutionResult, ScriptKind, WalkState};
pub use executor::{DeliveryPlan, MailboxSink, RecordingSink, RejectNotice};
pub use registry::{CustomContext, CustomTest, Registry};
pub use sema::{Action, Rule, Script, Test};

/// Scripts, settings and custom tests for a set of accounts. Shared between
/// delivery threads; each evaluation gets its own context.
#[derive(Debug, Default)]
pub struct FilterEngine {
    config: FilterConfig,
    registry: Registry,
    cache: ScriptCache,
}

impl FilterEngine {
    pub fn new(config: FilterConfig, registry: Registry) -> Self {
        Self {
            config,
            registry,
            cache: ScriptCache::new(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn cache(&self) -> &ScriptCache {
        &self.cache
    }

    pub fn set_script(&self, account: &str, kind: ScriptKind, source: &str) -> Result<()> {
        self.cache
            .set_script(account, kind, source, &self.config, &self.registry)
            .map(|_| ())
    }

    /// Evaluate the account's enabled layers against a message.
    pub fn evaluate(
        &self,
        account: &str,
        message: &dyn MessageSource,
        envelope: Option<&Envelope>,
    ) -> ExecutionResult {
        let layers = self.cache.layers(account);
        let refs: Vec<(ScriptKind, &Script)> =
            layers.iter().map(|(kind, s)| (*kind, s.as_ref())).collect();
        let ctx = EvaluationContext::new(
            message,
            envelope,
            &self.registry,
            self.config.require_enforced,
        );
        exec::evaluate_layers(&refs, ctx)
    }

    /// Evaluate and then carry out the result against `sink`.
    pub fn deliver(
        &self,
        account: &str,
        message: &dyn MessageSource,
        envelope: Option<&Envelope>,
        sink: &mut dyn MailboxSink,
    ) -> Result<DeliveryPlan> {
        let result = self.evaluate(account, message, envelope);
        executor::execute(&result, message, envelope, &self.config, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const ACCOUNT: &str = "test1@in.telligent.com";

    fn message(text: &str) -> ParsedMessage {
        email::parse(text.replace('\n', "\r\n").as_bytes()).unwrap()
    }

    fn plain() -> ParsedMessage {
        message(
            "From: coyote@desert.example.org\n\
             To: test1@in.telligent.com\n\
             Subject: Test\n\
             \n\
             Hello.\n",
        )
    }

    fn engine_with(user: &str) -> FilterEngine {
        let engine = FilterEngine::default();
        engine.set_script(ACCOUNT, ScriptKind::User, user).unwrap();
        engine
    }

    fn deliver(engine: &FilterEngine, msg: &ParsedMessage) -> (DeliveryPlan, RecordingSink) {
        let mut sink = RecordingSink::default();
        let plan = engine.deliver(ACCOUNT, msg, None, &mut sink).unwrap();
        (plan, sink)
    }

    #[test]
    fn single_tag_applied_once() {
        let engine = engine_with(r#"require "tag"; if header :is "Subject" "Test" { tag "Priority"; }"#);
        let (plan, sink) = deliver(&engine, &plain());
        assert_eq!(plan.tags, vec!["Priority"]);
        assert_eq!(
            sink.calls,
            vec![r#"tag "Priority""#.to_owned(), r#"implicit keep "Inbox""#.to_owned()]
        );
    }

    #[test]
    fn escaped_star_matches_literally() {
        let script = r#"require "tag"; if header :matches "X-To" "user\\*@zimbra.com" { tag "hit"; }"#;
        let engine = engine_with(script);
        let literal = message("X-To: user*@zimbra.com\n\nx\n");
        assert_eq!(deliver(&engine, &literal).0.tags, vec!["hit"]);
        let other = message("X-To: userXYZ@zimbra.com\n\nx\n");
        assert!(deliver(&engine, &other).0.tags.is_empty());
    }

    #[test]
    fn address_domain_against_groups() {
        let script = r#"require "tag";
            if address :domain :comparator "i;ascii-casemap" :is ["to"] "in.telligent.com" { tag "t"; }"#;
        let engine = engine_with(script);
        let hit = message("To: test1@in.telligent.com\n\nx\n");
        assert_eq!(deliver(&engine, &hit).0.tags, vec!["t"]);
        let group = message("To: undisclosed-recipients:;\n\nx\n");
        assert!(deliver(&engine, &group).0.tags.is_empty());
    }

    #[test]
    fn negative_numeric_key_applies_no_tags() {
        let script = r#"require ["tag", "relational", "comparator-i;ascii-numeric"];
            if address :count "lt" :comparator "i;ascii-numeric" "To" "-1" { tag "t1"; }
            tag "t2";"#;
        let engine = engine_with(script);
        let result = engine.evaluate(ACCOUNT, &plain(), None);
        assert!(result.is_aborted());
        let (plan, _) = deliver(&engine, &plain());
        assert!(plan.tags.is_empty());
        assert!(plan.implicit_keep);
    }

    const NUMERIC: &str = r#"require ["tag", "relational", "comparator-i;ascii-numeric"];"#;

    #[test]
    fn minus_without_digits_is_infinity() {
        let script = format!(
            r#"{} if header :is :comparator "i;ascii-numeric" ["X-Minus"] [""] {{ tag "Xminus"; }}"#,
            NUMERIC
        );
        let engine = engine_with(&script);
        let msg = message("X-Minus: -abc\n\nx\n");
        let result = engine.evaluate(ACCOUNT, &msg, None);
        assert!(!result.is_aborted());
        assert_eq!(deliver(&engine, &msg).0.tags, vec!["Xminus"]);
    }

    #[test]
    fn negative_header_value_applies_no_tags() {
        let script = format!(
            r#"{} if header :value "ge" :comparator "i;ascii-numeric" ["X-Spam-score"] ["500"] {{ tag "XSpamScore"; }}
            tag "Negative";"#,
            NUMERIC
        );
        let engine = engine_with(&script);
        let msg = message("X-Spam-score: -5\n\nx\n");
        assert!(engine.evaluate(ACCOUNT, &msg, None).is_aborted());
        let (plan, _) = deliver(&engine, &msg);
        assert!(plan.tags.is_empty());
        assert!(plan.implicit_keep);
    }

    #[test]
    fn negative_key_aborts_without_matching_header() {
        for test in &[
            r#"header :value "lt" :comparator "i;ascii-numeric" ["X-Missing"] ["-1"]"#,
            r#"header :is :comparator "i;ascii-numeric" ["X-Missing"] ["-5"]"#,
        ] {
            let script = format!(r#"{} if {} {{ tag "t1"; }} tag "t2";"#, NUMERIC, test);
            let engine = engine_with(&script);
            assert!(engine.evaluate(ACCOUNT, &plain(), None).is_aborted(), "{}", test);
            assert!(deliver(&engine, &plain()).0.tags.is_empty(), "{}", test);
        }
    }

    #[test]
    fn empty_header_name_matches_nothing() {
        let engine = engine_with(r#"require ["tag", "flag"]; if header :contains [""] [""] { tag "zimbra"; }"#);
        assert!(deliver(&engine, &plain()).0.tags.is_empty());
    }

    #[test]
    fn folder_names_keep_spaces() {
        let engine = engine_with(r#"require "fileinto"; fileinto " abc"; fileinto "abc ";"#);
        let (plan, sink) = deliver(&engine, &plain());
        assert_eq!(plan.folders, vec![" abc", "abc"]);
        assert_eq!(
            sink.calls,
            vec![r#"fileinto " abc""#.to_owned(), r#"fileinto "abc""#.to_owned()]
        );
    }

    #[test]
    fn keep_and_fileinto_inbox_deliver_once() {
        for script in &[
            r#"require "fileinto"; keep; fileinto "Inbox";"#,
            r#"require "fileinto"; fileinto "Inbox"; keep;"#,
            r#"require ["fileinto", "copy"]; fileinto :copy "Inbox"; keep;"#,
        ] {
            let engine = engine_with(script);
            let (plan, sink) = deliver(&engine, &plain());
            assert_eq!(plan.folders, vec!["Inbox"], "{}", script);
            assert_eq!(sink.calls.len(), 1, "{}", script);
        }
    }

    #[test]
    fn xml_round_trip_of_nested_elsif() {
        let text = r#"require ["tag", "fileinto"];

# Nested
if header :contains "Subject" "a" {
    tag "a";
}
elsif header :contains "Subject" "b" {
    if address :domain :is "From" "example.org" {
        fileinto "b/example";
    }
    elsif true {
        tag "b";
    }
}
else {
    stop;
}
"#;
        let script = sema::compile(text, &Registry::default()).unwrap();
        let xml = xml::to_xml(&script).unwrap();
        assert!(xml.contains("<elseRules>"));
        assert!(xml.contains("<nestedRule"));
        let back = xml::from_xml(&xml).unwrap();
        assert_eq!(emit::to_sieve(&back), text);
    }

    #[test]
    fn variable_expansion_in_actions() {
        let script = r#"require ["variables", "tag"];
            set "var" "hello";
            set "company" "ACME";
            tag "${var}";
            tag "${var!}";
            tag "[${undefined}]";
            tag "${${COMpANY}}";"#;
        let engine = engine_with(script);
        let (plan, _) = deliver(&engine, &plain());
        assert_eq!(plan.tags, vec!["hello", "${var!}", "[]", "${ACME}"]);
    }

    #[test]
    fn header_name_spaces_never_match() {
        let engine = engine_with(r#"require "tag"; if header :is " To" "test1@in.telligent.com" { tag "t"; }"#);
        assert!(deliver(&engine, &plain()).0.tags.is_empty());
    }

    #[test]
    fn layers_compose() {
        let engine = FilterEngine::default();
        engine
            .set_script(ACCOUNT, ScriptKind::AdminBefore, r#"require "tag"; tag "admin";"#)
            .unwrap();
        engine
            .set_script(ACCOUNT, ScriptKind::User, r#"require "bogus"; tag "user";"#)
            .unwrap();
        engine
            .set_script(ACCOUNT, ScriptKind::AdminAfter, r#"require "fileinto"; fileinto "Audit";"#)
            .unwrap();
        let result = engine.evaluate(ACCOUNT, &plain(), None);
        assert_eq!(result.tags(), vec!["admin"]);
        assert!(matches!(
            result.layer_errors.as_slice(),
            [(ScriptKind::User, Error::UnknownCapability(cap))] if cap == "bogus"
        ));
        let (plan, _) = deliver(&engine, &plain());
        assert_eq!(plan.folders, vec!["Audit"]);
    }

    struct FromVip;

    impl CustomTest for FromVip {
        fn validate(&self, args: &[sema::Value]) -> anyhow::Result<()> {
            match args {
                [sema::Value::Strings(_)] => Ok(()),
                _ => anyhow::bail!("vip takes one string list"),
            }
        }

        fn evaluate(&self, args: &[sema::Value], ctx: &CustomContext<'_>) -> Result<bool> {
            let vips = match args {
                [sema::Value::Strings(vips)] => vips,
                _ => return Ok(false),
            };
            let from = email::address_values(ctx.message, "From", email::AddressPart::All);
            Ok(from.iter().any(|f| vips.iter().any(|v| v.eq_ignore_ascii_case(f))))
        }
    }

    #[test]
    fn custom_tests_come_from_the_registry() {
        let registry = Registry::new().with_test("vip", Arc::new(FromVip));
        let engine = FilterEngine::new(FilterConfig::default(), registry);
        engine
            .set_script(ACCOUNT, ScriptKind::User, r#"require ["vip", "tag"]; if vip ["Coyote@desert.example.org"] { tag "vip"; }"#)
            .unwrap();
        assert_eq!(deliver(&engine, &plain()).0.tags, vec!["vip"]);
        engine
            .set_script(ACCOUNT, ScriptKind::User, r#"require "tag"; if vip ["Coyote@desert.example.org"] { tag "vip"; }"#)
            .unwrap();
        assert!(deliver(&engine, &plain()).0.tags.is_empty());
        assert!(engine
            .set_script(ACCOUNT, ScriptKind::User, r#"if vip :x { keep; }"#)
            .is_err());
        assert!(FilterEngine::default()
            .set_script(ACCOUNT, ScriptKind::User, r#"if vip ["a"] { keep; }"#)
            .is_err());
    }
}
