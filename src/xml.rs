//! The XML form rules are exchanged in by admin tools. Every `Script` maps
//! to XML and back without loss.
//!
//! ```xml
//! <filterRules>
//!   <require capability="tag"/>
//!   <filterRule name="Orders" active="1">
//!     <filterTests condition="anyof">
//!       <headerTest index="0" matchType="contains">
//!         <header name="Subject"/>
//!         <key value="order"/>
//!       </headerTest>
//!     </filterTests>
//!     <filterActions>
//!       <actionTag index="0" tagName="acme"/>
//!     </filterActions>
//!     <elseRules>
//!       <elseRule><filterActions><actionStop index="0"/></filterActions></elseRule>
//!     </elseRules>
//!   </filterRule>
//! </filterRules>
//! ```
//!
//! Lists are child elements and every string is an attribute value, so
//! surrounding spaces survive.

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::comparator::RelOp;
use crate::email::AddressPart;
use crate::error::{Error, Result};
use crate::sema::{
    Action, AddressTest, BodyTest, BodyTransform, CustomTest, ElseBranch, EnvelopeTest,
    ExistsTest, HeaderTest, LogLevel, Matching, MatchType, Notify, Rule, Script, SizeTest,
    Statement, StringTest, Test, Value,
};
use crate::variables::{self, Modifier};

fn xml_err(e: impl std::fmt::Display) -> Error {
    Error::Xml(e.to_string())
}

/// An element with its attributes and child elements. Text is not used.
#[derive(Debug, Default)]
struct Node {
    name: String,
    attrs: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Node {
    fn new(name: &str) -> Self {
        Node {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    fn attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attrs.push((key.to_owned(), value.into()));
        self
    }

    fn opt_attr(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    fn child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    fn children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::Xml(format!("<{}> is missing attribute {:?}", self.name, key)))
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("1") | Some("true"))
    }

    fn index(&self) -> Result<Option<u64>> {
        self.get("index")
            .map(|i| {
                i.parse()
                    .map_err(|_| Error::Xml(format!("bad index {:?} on <{}>", i, self.name)))
            })
            .transpose()
    }

    fn find(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Values of the `attr` attribute of every `name` child.
    fn list(&self, name: &str, attr: &str) -> Result<Vec<String>> {
        self.children
            .iter()
            .filter(|c| c.name == name)
            .map(|c| c.require(attr).map(str::to_owned))
            .collect()
    }

    fn write<W: std::io::Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (k, v) in &self.attrs {
            start.push_attribute((k.as_str(), v.as_str()));
        }
        if self.children.is_empty() {
            writer.write_event(Event::Empty(start)).map_err(xml_err)?;
        } else {
            writer.write_event(Event::Start(start)).map_err(xml_err)?;
            for child in &self.children {
                child.write(writer)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(self.name.as_str())))
                .map_err(xml_err)?;
        }
        Ok(())
    }
}

/// Children sorted by their `index` attribute; unindexed ones keep document
/// order after the indexed ones.
fn by_index<'n>(nodes: impl Iterator<Item = &'n Node>) -> Result<Vec<&'n Node>> {
    let mut keyed = nodes
        .map(|n| Ok((n.index()?.unwrap_or(u64::MAX), n)))
        .collect::<Result<Vec<_>>>()?;
    keyed.sort_by_key(|(i, _)| *i);
    Ok(keyed.into_iter().map(|(_, n)| n).collect())
}

fn read_tree(xml: &str) -> Result<Node> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<Node> = vec![];
    let mut root = None;

    fn start(e: &BytesStart<'_>) -> Result<Node> {
        let mut node = Node::new(&String::from_utf8_lossy(e.name().as_ref()));
        for attr in e.attributes() {
            let attr = attr.map_err(xml_err)?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(xml_err)?.into_owned();
            node.attrs.push((key, value));
        }
        Ok(node)
    }

    loop {
        let finished = match reader.read_event().map_err(xml_err)? {
            Event::Start(e) => {
                stack.push(start(&e)?);
                None
            }
            Event::Empty(e) => Some(start(&e)?),
            Event::End(_) => stack.pop(),
            Event::Text(t) => {
                let text = t.unescape().map_err(xml_err)?;
                if !text.trim().is_empty() {
                    return Err(Error::Xml(format!("unexpected text {:?}", text)));
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };
        if let Some(node) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(node),
                None if root.is_none() => root = Some(node),
                None => return Err(Error::Xml("more than one root element".to_owned())),
            }
        }
    }
    if !stack.is_empty() {
        return Err(Error::Xml("unterminated element".to_owned()));
    }
    root.ok_or_else(|| Error::Xml("empty document".to_owned()))
}

pub fn to_xml(script: &Script) -> Result<String> {
    let root = Node::new("filterRules")
        .children(
            script
                .requires
                .iter()
                .map(|r| Node::new("require").attr("capability", r.as_str())),
        )
        .children(script.rules.iter().map(|r| rule_node("filterRule", r, None)));
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    root.write(&mut writer)?;
    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

fn bool_attr(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

fn rule_node(element: &str, rule: &Rule, index: Option<usize>) -> Node {
    let mut node = Node::new(element)
        .opt_attr("index", index.map(|i| i.to_string()).as_deref())
        .opt_attr("name", rule.name.as_deref())
        .attr("active", bool_attr(rule.active));
    if let Some(test) = &rule.test {
        node = node.child(tests_node(test));
    }
    node = node.child(actions_node(&rule.body));
    if !rule.else_chain.is_empty() {
        node = node.child(Node::new("elseRules").children(rule.else_chain.iter().map(|b| {
            let mut else_node = Node::new("elseRule");
            if let Some(test) = &b.test {
                else_node = else_node.child(tests_node(test));
            }
            else_node.child(actions_node(&b.body))
        })));
    }
    node
}

fn tests_node(test: &Test) -> Node {
    let (condition, tests) = match test {
        Test::AllOf(tests) => (Some("allof"), tests.iter().collect::<Vec<_>>()),
        Test::AnyOf(tests) => (Some("anyof"), tests.iter().collect()),
        other => (None, vec![other]),
    };
    Node::new("filterTests")
        .opt_attr("condition", condition)
        .children(tests.into_iter().enumerate().map(|(i, t)| test_node(t, i)))
}

fn matching_node(node: Node, matching: &Matching) -> Node {
    let node = match matching.match_type {
        MatchType::Is => node.attr("matchType", "is"),
        MatchType::Contains => node.attr("matchType", "contains"),
        MatchType::Matches => node.attr("matchType", "matches"),
        MatchType::Count(op) => node.attr("matchType", "count").attr("relation", op.name()),
        MatchType::Value(op) => node.attr("matchType", "value").attr("relation", op.name()),
    };
    node.opt_attr("comparator", matching.comparator.as_deref())
}

fn named<'a>(
    element: &'static str,
    attr: &'static str,
    values: &'a [String],
) -> impl Iterator<Item = Node> + 'a {
    values
        .iter()
        .map(move |v| Node::new(element).attr(attr, v.as_str()))
}

fn keys(matching: &Matching) -> impl Iterator<Item = Node> + '_ {
    named("key", "value", &matching.keys)
}

fn test_node(test: &Test, index: usize) -> Node {
    let (test, negative) = match test {
        Test::Not(inner) => match inner.as_ref() {
            // A double negation is written as the test itself.
            Test::Not(twice) => (twice.as_ref(), false),
            other => (other, true),
        },
        other => (other, false),
    };
    let node = |name: &str| {
        let n = Node::new(name).attr("index", index.to_string());
        if negative {
            n.attr("negative", "1")
        } else {
            n
        }
    };
    match test {
        Test::True => node("trueTest"),
        Test::False => node("falseTest"),
        Test::Not(_) => test_node(test, index),
        Test::AllOf(tests) => node("allofTest")
            .children(tests.iter().enumerate().map(|(i, t)| test_node(t, i))),
        Test::AnyOf(tests) => node("anyofTest")
            .children(tests.iter().enumerate().map(|(i, t)| test_node(t, i))),
        Test::Header(h) => matching_node(
            node(if h.mime { "mimeHeaderTest" } else { "headerTest" }),
            &h.matching,
        )
        .children(named("header", "name", &h.names))
        .children(keys(&h.matching)),
        Test::Address(a) => matching_node(node("addressTest"), &a.matching)
            .opt_attr("part", a.part.map(AddressPart::tag))
            .children(named("header", "name", &a.headers))
            .children(keys(&a.matching)),
        Test::Envelope(e) => matching_node(node("envelopeTest"), &e.matching)
            .opt_attr("part", e.part.map(AddressPart::tag))
            .children(named("envelopePart", "name", &e.envelope_parts))
            .children(keys(&e.matching)),
        Test::Body(b) => matching_node(node("bodyTest"), &b.matching)
            .opt_attr(
                "transform",
                b.transform.map(|t| match t {
                    BodyTransform::Text => "text",
                    BodyTransform::Raw => "raw",
                }),
            )
            .children(keys(&b.matching)),
        Test::Size(s) => node("sizeTest")
            .attr("numberComparison", if s.over { "over" } else { "under" })
            .attr("s", s.limit.to_string()),
        Test::Exists(e) => node("existsTest").children(named("header", "name", &e.names)),
        Test::String(s) => matching_node(node("stringTest"), &s.matching)
            .children(named("source", "value", &s.sources))
            .children(keys(&s.matching)),
        Test::Custom(c) => node("customTest")
            .attr("name", c.name.as_str())
            .children(c.args.iter().map(|arg| match arg {
                Value::Tag(t) => Node::new("tagArg").attr("value", t.as_str()),
                Value::Number(n) => Node::new("numberArg").attr("value", n.to_string()),
                Value::Strings(ss) => Node::new("stringsArg").children(named("key", "value", ss)),
            })),
    }
}

fn actions_node(body: &[Statement]) -> Node {
    Node::new("filterActions").children(body.iter().enumerate().map(|(i, s)| match s {
        Statement::Rule(rule) => rule_node("nestedRule", rule, Some(i)),
        Statement::Action(action) => action_node(action).attr("index", i.to_string()),
    }))
}

fn action_node(action: &Action) -> Node {
    match action {
        Action::Keep => Node::new("actionKeep"),
        Action::Discard => Node::new("actionDiscard"),
        Action::Stop => Node::new("actionStop"),
        Action::FileInto { folder, copy } => Node::new("actionFileInto")
            .attr("folderPath", folder.as_str())
            .attr("copy", bool_attr(*copy)),
        Action::Redirect { address, copy } => Node::new("actionRedirect")
            .attr("a", address.as_str())
            .attr("copy", bool_attr(*copy)),
        Action::Tag(t) => Node::new("actionTag").attr("tagName", t.as_str()),
        Action::Flag(f) => Node::new("actionFlag").attr("flagName", f.as_str()),
        Action::Reject(text) => Node::new("actionReject").attr("content", text.as_str()),
        Action::Ereject(text) => Node::new("actionEreject").attr("content", text.as_str()),
        Action::Notify(n) => Node::new("actionNotify")
            .attr("method", n.method.as_str())
            .opt_attr("from", n.from.as_deref())
            .opt_attr("importance", n.importance.as_deref())
            .opt_attr("message", n.message.as_deref())
            .children(named("option", "value", &n.options)),
        Action::Log { level, text } => Node::new("actionLog")
            .opt_attr("level", level.map(LogLevel::tag))
            .attr("content", text.as_str()),
        Action::SetVariable {
            name,
            value,
            modifiers,
        } => Node::new("actionSet")
            .attr("name", name.as_str())
            .attr("value", value.as_str())
            .opt_attr(
                "modifiers",
                Some(modifiers.iter().map(|m| m.tag()).collect::<Vec<_>>().join(" "))
                    .filter(|m| !m.is_empty())
                    .as_deref(),
            ),
    }
}

/// Read rules from their XML form.
pub fn from_xml(xml: &str) -> Result<Script> {
    let root = read_tree(xml)?;
    if root.name != "filterRules" {
        return Err(Error::Xml(format!("expected <filterRules>, found <{}>", root.name)));
    }
    let mut script = Script::default();
    for child in &root.children {
        match child.name.as_str() {
            "require" => script.requires.push(child.require("capability")?.to_owned()),
            "filterRule" => script.rules.push(read_rule(child, true)?),
            other => return Err(Error::Xml(format!("unexpected <{}> in <filterRules>", other))),
        }
    }
    Ok(script)
}

fn read_rule(node: &Node, top_level: bool) -> Result<Rule> {
    let test = node.find("filterTests").map(read_tests).transpose()?;
    if test.is_none() && !top_level {
        return Err(Error::Xml("<nestedRule> needs <filterTests>".to_owned()));
    }
    let body = match node.find("filterActions") {
        Some(actions) => read_actions(actions)?,
        None => vec![],
    };
    let mut rule = Rule::new(test, body);
    if top_level {
        rule.name = node.get("name").map(str::to_owned);
    }
    rule.active = node.get("active").map_or(true, |a| a == "1" || a == "true");
    let else_chain = match node.find("elseRules") {
        None => vec![],
        Some(else_rules) => else_rules
            .children
            .iter()
            .map(|e| {
                if e.name != "elseRule" {
                    return Err(Error::Xml(format!("unexpected <{}> in <elseRules>", e.name)));
                }
                if e.find("elseRules").is_some() {
                    return Err(Error::Xml("else rules cannot be nested in an else rule".to_owned()));
                }
                Ok(ElseBranch {
                    test: e.find("filterTests").map(read_tests).transpose()?,
                    body: match e.find("filterActions") {
                        Some(actions) => read_actions(actions)?,
                        None => vec![],
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?,
    };
    rule.with_else_chain(else_chain).map_err(xml_err)
}

fn read_tests(node: &Node) -> Result<Test> {
    let mut tests = by_index(node.children.iter())?
        .into_iter()
        .map(read_test)
        .collect::<Result<Vec<_>>>()?;
    match node.get("condition") {
        Some("allof") => Ok(Test::AllOf(tests)),
        Some("anyof") => Ok(Test::AnyOf(tests)),
        Some(other) => Err(Error::Xml(format!("unknown condition {:?}", other))),
        None if tests.len() == 1 => Ok(tests.remove(0)),
        None => Err(Error::Xml(
            "<filterTests> without a condition must hold exactly one test".to_owned(),
        )),
    }
}

fn read_matching(node: &Node) -> Result<Matching> {
    let relation = || -> Result<RelOp> {
        let name = node.require("relation")?;
        RelOp::from_name(name).ok_or_else(|| Error::Xml(format!("unknown relation {:?}", name)))
    };
    let match_type = match node.get("matchType").unwrap_or("is") {
        "is" => MatchType::Is,
        "contains" => MatchType::Contains,
        "matches" => MatchType::Matches,
        "count" => MatchType::Count(relation()?),
        "value" => MatchType::Value(relation()?),
        other => return Err(Error::Xml(format!("unknown matchType {:?}", other))),
    };
    Ok(Matching {
        match_type,
        comparator: node.get("comparator").map(str::to_owned),
        keys: node.list("key", "value")?,
    })
}

fn read_part(node: &Node) -> Result<Option<AddressPart>> {
    node.get("part")
        .map(|p| match p {
            "all" => Ok(AddressPart::All),
            "localpart" => Ok(AddressPart::LocalPart),
            "domain" => Ok(AddressPart::Domain),
            other => Err(Error::Xml(format!("unknown address part {:?}", other))),
        })
        .transpose()
}

fn read_test(node: &Node) -> Result<Test> {
    let test = match node.name.as_str() {
        "trueTest" => Test::True,
        "falseTest" => Test::False,
        "allofTest" | "anyofTest" => {
            let tests = by_index(node.children.iter())?
                .into_iter()
                .map(read_test)
                .collect::<Result<Vec<_>>>()?;
            if node.name == "allofTest" {
                Test::AllOf(tests)
            } else {
                Test::AnyOf(tests)
            }
        }
        "headerTest" | "mimeHeaderTest" => Test::Header(HeaderTest {
            mime: node.name == "mimeHeaderTest",
            names: node.list("header", "name")?,
            matching: read_matching(node)?,
        }),
        "addressTest" => Test::Address(AddressTest {
            part: read_part(node)?,
            headers: node.list("header", "name")?,
            matching: read_matching(node)?,
        }),
        "envelopeTest" => Test::Envelope(EnvelopeTest {
            part: read_part(node)?,
            envelope_parts: node.list("envelopePart", "name")?,
            matching: read_matching(node)?,
        }),
        "bodyTest" => Test::Body(BodyTest {
            transform: match node.get("transform") {
                None => None,
                Some("text") => Some(BodyTransform::Text),
                Some("raw") => Some(BodyTransform::Raw),
                Some(other) => return Err(Error::Xml(format!("unknown transform {:?}", other))),
            },
            matching: read_matching(node)?,
        }),
        "sizeTest" => Test::Size(SizeTest {
            over: match node.require("numberComparison")? {
                "over" => true,
                "under" => false,
                other => return Err(Error::Xml(format!("unknown numberComparison {:?}", other))),
            },
            limit: node
                .require("s")?
                .parse()
                .map_err(|_| Error::Xml("sizeTest s must be a number".to_owned()))?,
        }),
        "existsTest" => Test::Exists(ExistsTest {
            names: node.list("header", "name")?,
        }),
        "stringTest" => Test::String(StringTest {
            sources: node.list("source", "value")?,
            matching: read_matching(node)?,
        }),
        "customTest" => Test::Custom(CustomTest {
            name: node.require("name")?.to_ascii_lowercase(),
            args: node
                .children
                .iter()
                .map(|arg| match arg.name.as_str() {
                    "tagArg" => Ok(Value::Tag(arg.require("value")?.to_owned())),
                    "numberArg" => arg
                        .require("value")?
                        .parse()
                        .map(Value::Number)
                        .map_err(|_| Error::Xml("numberArg must be a number".to_owned())),
                    "stringsArg" => Ok(Value::Strings(arg.list("key", "value")?)),
                    other => Err(Error::Xml(format!("unexpected <{}> in <customTest>", other))),
                })
                .collect::<Result<Vec<_>>>()?,
        }),
        other => return Err(Error::Xml(format!("unknown test <{}>", other))),
    };
    Ok(if node.flag("negative") {
        Test::Not(Box::new(test))
    } else {
        test
    })
}

fn read_actions(node: &Node) -> Result<Vec<Statement>> {
    by_index(node.children.iter())?
        .into_iter()
        .map(|child| {
            if child.name == "nestedRule" {
                Ok(Statement::Rule(read_rule(child, false)?))
            } else {
                Ok(Statement::Action(read_action(child)?))
            }
        })
        .collect()
}

fn read_action(node: &Node) -> Result<Action> {
    let text = |key: &str| node.require(key).map(str::to_owned);
    let action = match node.name.as_str() {
        "actionKeep" => Action::Keep,
        "actionDiscard" => Action::Discard,
        "actionStop" => Action::Stop,
        "actionFileInto" => Action::FileInto {
            folder: text("folderPath")?,
            copy: node.flag("copy"),
        },
        "actionRedirect" => Action::Redirect {
            address: text("a")?,
            copy: node.flag("copy"),
        },
        "actionTag" => Action::Tag(text("tagName")?),
        "actionFlag" => Action::Flag(text("flagName")?),
        "actionReject" => Action::Reject(text("content")?),
        "actionEreject" => Action::Ereject(text("content")?),
        "actionNotify" => Action::Notify(Notify {
            method: text("method")?,
            from: node.get("from").map(str::to_owned),
            importance: node.get("importance").map(str::to_owned),
            options: node.list("option", "value")?,
            message: node.get("message").map(str::to_owned),
        }),
        "actionLog" => Action::Log {
            level: node
                .get("level")
                .map(|l| LogLevel::from_tag(l).ok_or_else(|| Error::Xml(format!("unknown log level {:?}", l))))
                .transpose()?,
            text: text("content")?,
        },
        "actionSet" => {
            let modifiers = node
                .get("modifiers")
                .unwrap_or("")
                .split_whitespace()
                .map(|m| Modifier::from_tag(m).ok_or_else(|| Error::Xml(format!("unknown modifier {:?}", m))))
                .collect::<Result<Vec<_>>>()?;
            variables::check_modifiers(&modifiers).map_err(xml_err)?;
            Action::SetVariable {
                name: text("name")?,
                value: text("value")?,
                modifiers,
            }
        }
        other => return Err(Error::Xml(format!("unknown action <{}>", other))),
    };
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::to_sieve;
    use crate::registry::Registry;
    use crate::sema;
    use pretty_assertions::assert_eq;

    const NESTED: &str = r#"require ["fileinto", "tag", "variables", "relational", "comparator-i;ascii-numeric"];

# Sorting
if allof (header :is "X-List" "dev", not address :domain :is "From" "example.com") {
    fileinto :copy " abc";
}
elsif header :comparator "i;ascii-numeric" :value "ge" "X-Priority" "3" {
    tag "low";
    if exists "X-Mailer" {
        set :upper "m" "${1}";
        fileinto "mailers/${m}";
    }
    else {
        tag "no mailer";
    }
    stop;
}
else {
    keep;
}
# Bare
tag "line one
line two";
disabled_if size :over 10240 {
    discard;
}
"#;

    fn compile(text: &str) -> Script {
        sema::compile(text, &Registry::default()).unwrap()
    }

    #[test]
    fn round_trip_preserves_script() {
        let script = compile(NESTED);
        let xml = to_xml(&script).unwrap();
        let back = from_xml(&xml).unwrap();
        assert_eq!(back, script);
        assert_eq!(to_sieve(&back), NESTED);
    }

    #[test]
    fn xml_shape() {
        let script = compile(
            r#"require "fileinto"; if header :contains "Subject" "x" { fileinto :copy "a"; if true { stop; } }"#,
        );
        let xml = to_xml(&script).unwrap();
        assert!(xml.contains(r#"<require capability="fileinto"/>"#));
        assert!(xml.contains(r#"<filterRule active="1">"#));
        assert!(xml.contains(r#"<headerTest index="0" matchType="contains">"#));
        assert!(xml.contains(r#"<actionFileInto folderPath="a" copy="1" index="0"/>"#));
        assert!(xml.contains(r#"<nestedRule index="1" active="1">"#));
    }

    #[test]
    fn string_lists_become_child_elements() {
        let script = compile(r#"if header :is ["To", "Cc"] ["a", "b"] { keep; }"#);
        let xml = to_xml(&script).unwrap();
        for line in &[
            r#"<header name="To"/>"#,
            r#"<header name="Cc"/>"#,
            r#"<key value="a"/>"#,
            r#"<key value="b"/>"#,
        ] {
            assert!(xml.contains(line), "{} not in {}", line, xml);
        }
        let back = from_xml(&xml).unwrap();
        assert_eq!(to_sieve(&back), to_sieve(&script));
    }

    #[test]
    fn actions_follow_index_order() {
        let xml = r#"<filterRules>
            <filterRule name="r">
              <filterTests><trueTest index="0"/></filterTests>
              <filterActions>
                <actionStop index="2"/>
                <actionTag index="0" tagName="a"/>
                <actionFlag index="1" flagName="b"/>
              </filterActions>
            </filterRule>
          </filterRules>"#;
        let script = from_xml(xml).unwrap();
        assert_eq!(
            script.rules[0].body,
            vec![
                Statement::Action(Action::Tag("a".into())),
                Statement::Action(Action::Flag("b".into())),
                Statement::Action(Action::Stop),
            ]
        );
        assert_eq!(script.rules[0].name.as_deref(), Some("r"));
    }

    #[test]
    fn malformed_documents() {
        let cases = [
            "<filterRules><filterRule><filterTests/></filterRule></filterRules>",
            "<filterRules><bogus/></filterRules>",
            "<filterRules><filterRule><filterTests><fooTest/></filterTests></filterRule></filterRules>",
            "<filterRules><filterRule><filterTests><trueTest/></filterTests>\
             <elseRules><elseRule/><elseRule><filterTests><trueTest/></filterTests></elseRule></elseRules>\
             </filterRule></filterRules>",
            "<filterRules><filterRule>",
            "",
        ];
        for xml in &cases {
            assert!(matches!(from_xml(xml), Err(Error::Xml(_))), "{}", xml);
        }
    }
}
