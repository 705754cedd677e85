use crate::comparator::RelOp;
use crate::email::AddressPart;
use crate::parse::{self, Argument, Command, Document, StringIsh};
use crate::registry::Registry;
use crate::variables::{self, Modifier};

use anyhow::{anyhow, bail};
use enum_kinds::EnumKind;

/// A compiled script. Immutable once built and shared between evaluations.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Script {
    pub requires: Vec<String>,
    pub rules: Vec<Rule>,
}

impl Script {
    pub fn declares(&self, capability: &str) -> bool {
        self.requires
            .iter()
            .any(|r| r.eq_ignore_ascii_case(capability))
    }
}

/// One `if` with its `elsif`/`else` chain, or a run of unconditional
/// top-level commands (`test` is `None`).
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub name: Option<String>,
    /// Inactive rules come from `disabled_if` and are never evaluated.
    pub active: bool,
    pub test: Option<Test>,
    pub body: Vec<Statement>,
    pub else_chain: Vec<ElseBranch>,
}

impl Rule {
    pub fn new(test: Option<Test>, body: Vec<Statement>) -> Self {
        Rule {
            name: None,
            active: true,
            test,
            body,
            else_chain: vec![],
        }
    }

    /// Attach an else chain. A branch without a test is an `else` and may
    /// only come last.
    pub fn with_else_chain(mut self, else_chain: Vec<ElseBranch>) -> anyhow::Result<Self> {
        if let Some(pos) = else_chain.iter().position(|b| b.test.is_none()) {
            if pos + 1 != else_chain.len() {
                bail!("Else cannot be followed by elsif or else.");
            }
        }
        if !else_chain.is_empty() && self.test.is_none() {
            bail!("Only a rule with a test can have an else chain.");
        }
        self.else_chain = else_chain;
        Ok(self)
    }
}

/// An `elsif` (with a test) or `else` (without). It has no chain of its own.
#[derive(Clone, Debug, PartialEq)]
pub struct ElseBranch {
    pub test: Option<Test>,
    pub body: Vec<Statement>,
}

/// Contents of a block, in order: actions and nested rules.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Action(Action),
    Rule(Rule),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Test {
    Header(HeaderTest),
    Address(AddressTest),
    Envelope(EnvelopeTest),
    Body(BodyTest),
    Size(SizeTest),
    Exists(ExistsTest),
    String(StringTest),
    True,
    False,
    Not(Box<Test>),
    AllOf(Vec<Test>),
    AnyOf(Vec<Test>),
    Custom(CustomTest),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MatchType {
    Is,
    Contains,
    Matches,
    Count(RelOp),
    Value(RelOp),
}

impl Default for MatchType {
    fn default() -> Self {
        MatchType::Is
    }
}

impl MatchType {
    pub fn is_relational(self) -> bool {
        matches!(self, MatchType::Count(_) | MatchType::Value(_))
    }
}

/// How a test compares what it finds against its keys.
#[derive(Clone, Debug, PartialEq)]
pub struct Matching {
    pub match_type: MatchType,
    /// Comparator name as written; `None` means `i;ascii-casemap`.
    pub comparator: Option<String>,
    pub keys: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeaderTest {
    /// `mime_header` rather than `header`.
    pub mime: bool,
    pub names: Vec<String>,
    pub matching: Matching,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AddressTest {
    pub part: Option<AddressPart>,
    pub headers: Vec<String>,
    pub matching: Matching,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnvelopeTest {
    pub part: Option<AddressPart>,
    pub envelope_parts: Vec<String>,
    pub matching: Matching,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BodyTransform {
    Text,
    Raw,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BodyTest {
    pub transform: Option<BodyTransform>,
    pub matching: Matching,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SizeTest {
    pub over: bool,
    pub limit: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExistsTest {
    pub names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StringTest {
    pub sources: Vec<String>,
    pub matching: Matching,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CustomTest {
    pub name: String,
    pub args: Vec<Value>,
}

/// An argument of a custom test, kept as written.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Tag(String),
    Strings(Vec<String>),
    Number(u64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Parameters of an RFC 5435 `notify`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Notify {
    pub method: String,
    pub from: Option<String>,
    pub importance: Option<String>,
    pub options: Vec<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, PartialEq, EnumKind)]
#[enum_kind(ActionKind, derive(Hash))]
pub enum Action {
    Keep,
    Discard,
    Stop,
    FileInto { folder: String, copy: bool },
    Redirect { address: String, copy: bool },
    Tag(String),
    Flag(String),
    Reject(String),
    Ereject(String),
    Notify(Notify),
    Log { level: Option<LogLevel>, text: String },
    SetVariable {
        name: String,
        value: String,
        modifiers: Vec<Modifier>,
    },
}

impl ActionKind {
    /// Capability a script must `require` to use the action.
    pub fn capability(self) -> Option<&'static str> {
        match self {
            ActionKind::FileInto => Some("fileinto"),
            ActionKind::Tag => Some("tag"),
            ActionKind::Flag => Some("flag"),
            ActionKind::Reject => Some("reject"),
            ActionKind::Ereject => Some("ereject"),
            ActionKind::Notify => Some("enotify"),
            ActionKind::Log => Some("log"),
            ActionKind::SetVariable => Some("variables"),
            ActionKind::Keep | ActionKind::Discard | ActionKind::Stop | ActionKind::Redirect => None,
        }
    }
}

/// Extensions this engine implements.
pub const CAPABILITIES: &[&str] = &[
    "fileinto",
    "envelope",
    "body",
    "relational",
    "variables",
    "copy",
    "reject",
    "ereject",
    "enotify",
    "tag",
    "flag",
    "log",
    "comparator-i;octet",
    "comparator-i;ascii-casemap",
    "comparator-i;ascii-numeric",
];

/// Parse and analyze script text.
pub fn compile(text: &str, registry: &Registry) -> anyhow::Result<Script> {
    let doc = parse::parse_document(text)?;
    analyze(&doc, registry)
}

pub fn analyze(doc: &Document, registry: &Registry) -> anyhow::Result<Script> {
    let mut script = Script::default();
    let mut loose: Option<Rule> = None;
    let cmds = &doc.commands;
    let mut i = 0;
    while i < cmds.len() {
        let cmd = &cmds[i];
        match cmd.id.to_ascii_lowercase().as_str() {
            "require" => {
                script.requires.extend(require(cmd)?);
                i += 1;
            }
            "if" | "disabled_if" => {
                script.rules.extend(loose.take());
                let (mut rule, used) = if_chain(&cmds[i..], registry)?;
                rule.name = cmd.comment.map(str::to_owned);
                script.rules.push(rule);
                i += used;
            }
            "elsif" | "else" => bail!("{} without a preceding if.", cmd.id),
            _ => {
                let action = Statement::Action(action(cmd)?);
                // A named command starts a new rule.
                if cmd.comment.is_some() {
                    script.rules.extend(loose.take());
                }
                match loose.as_mut() {
                    Some(rule) => rule.body.push(action),
                    None => {
                        let mut rule = Rule::new(None, vec![action]);
                        rule.name = cmd.comment.map(str::to_owned);
                        loose = Some(rule);
                    }
                }
                i += 1;
            }
        }
    }
    script.rules.extend(loose);
    Ok(script)
}

fn require(cmd: &Command) -> anyhow::Result<Vec<String>> {
    no_block(cmd)?;
    let args = analyze_args(&cmd.args.inner, &[], cmd.id)?;
    if !cmd.args.tests.is_empty() || args.positional.len() != 1 {
        bail!("Require takes one positional arg.");
    }
    args.strings(0, "Require arg must be a string or string list.")
}

fn block(cmds: &[Command], registry: &Registry) -> anyhow::Result<Vec<Statement>> {
    let mut ret = Vec::new();
    let mut i = 0;
    while i < cmds.len() {
        let cmd = &cmds[i];
        match cmd.id.to_ascii_lowercase().as_str() {
            "if" | "disabled_if" => {
                let (rule, used) = if_chain(&cmds[i..], registry)?;
                ret.push(Statement::Rule(rule));
                i += used;
            }
            "elsif" | "else" => bail!("{} without a preceding if.", cmd.id),
            "require" => bail!("Require is only allowed at the top level."),
            _ => {
                ret.push(Statement::Action(action(cmd)?));
                i += 1;
            }
        }
    }
    Ok(ret)
}

/// The `if` at `cmds[0]` and any `elsif`/`else` after it. Returns the rule
/// and how many commands it spans.
fn if_chain(cmds: &[Command], registry: &Registry) -> anyhow::Result<(Rule, usize)> {
    let head = &cmds[0];
    let (test, body) = if_branch(head, registry)?;
    let mut rule = Rule::new(Some(test), body);
    rule.active = !head.id.eq_ignore_ascii_case("disabled_if");
    let mut else_chain = vec![];
    let mut used = 1;
    for cmd in &cmds[1..] {
        match cmd.id.to_ascii_lowercase().as_str() {
            "elsif" => {
                let (test, body) = if_branch(cmd, registry)?;
                else_chain.push(ElseBranch {
                    test: Some(test),
                    body,
                });
                used += 1;
            }
            "else" => {
                if !cmd.args.inner.is_empty() || !cmd.args.tests.is_empty() {
                    bail!("else cannot have any arguments.");
                }
                else_chain.push(ElseBranch {
                    test: None,
                    body: block(cmd_block(cmd)?, registry)?,
                });
                used += 1;
                break;
            }
            _ => break,
        }
    }
    Ok((rule.with_else_chain(else_chain)?, used))
}

fn if_branch(cmd: &Command, registry: &Registry) -> anyhow::Result<(Test, Vec<Statement>)> {
    if !cmd.args.inner.is_empty() {
        bail!("{} cannot have non-test arguments.", cmd.id);
    } else if cmd.args.tests.len() != 1 {
        bail!("{} must have exactly one test.", cmd.id);
    }
    let test = test_command(&cmd.args.tests[0], registry)?;
    Ok((test, block(cmd_block(cmd)?, registry)?))
}

fn cmd_block<'a, 'doc>(cmd: &'a Command<'doc>) -> anyhow::Result<&'a [Command<'doc>]> {
    cmd.block
        .as_deref()
        .ok_or_else(|| anyhow!("{} requires a block.", cmd.id))
}

fn no_block(cmd: &Command) -> anyhow::Result<()> {
    if cmd.block.is_some() {
        bail!("{} does not take a block.", cmd.id);
    }
    Ok(())
}

#[derive(Debug, PartialEq)]
enum NonTaggedArg<'a, 'doc> {
    Strings(&'a [StringIsh<'doc>]),
    Number(u64),
}

#[derive(Default)]
struct Args<'a, 'doc> {
    comparator: Option<String>,
    address_part: Option<AddressPart>,
    match_type: Option<MatchType>,
    over: Option<bool>,
    copy: bool,
    body_transform: Option<BodyTransform>,
    log_level: Option<LogLevel>,
    modifiers: Vec<Modifier>,
    /// Tags that take a value, such as `:from "x"` on notify.
    valued: Vec<(String, NonTaggedArg<'a, 'doc>)>,
    positional: Vec<NonTaggedArg<'a, 'doc>>,
}

const MATCH_TAGS: &[&str] = &["comparator", "is", "contains", "matches", "count", "value"];
const ADDRESS_TAGS: &[&str] = &[
    "comparator", "is", "contains", "matches", "count", "value", "all", "localpart", "domain",
];
const NOTIFY_TAGS: &[&str] = &["from", "importance", "options", "message"];

fn strings_of(list: &[StringIsh]) -> Vec<String> {
    list.iter().map(StringIsh::to_string).collect()
}

impl<'a, 'doc> Args<'a, 'doc> {
    fn strings(&self, idx: usize, err: &str) -> anyhow::Result<Vec<String>> {
        match self.positional.get(idx) {
            Some(NonTaggedArg::Strings(ss)) => Ok(strings_of(ss)),
            _ => bail!("{}", err.to_owned()),
        }
    }

    fn string(&self, idx: usize, err: &str) -> anyhow::Result<String> {
        match self.positional.get(idx) {
            Some(NonTaggedArg::Strings(ss)) if ss.len() == 1 => Ok(ss[0].to_string()),
            _ => bail!("{}", err.to_owned()),
        }
    }

    fn valued_string(&self, tag: &str) -> anyhow::Result<Option<String>> {
        match self.valued.iter().find(|(t, _)| t == tag) {
            None => Ok(None),
            Some((_, NonTaggedArg::Strings(ss))) if ss.len() == 1 => Ok(Some(ss[0].to_string())),
            Some(_) => bail!(":{} takes a single string.", tag),
        }
    }

    fn valued_strings(&self, tag: &str) -> anyhow::Result<Vec<String>> {
        match self.valued.iter().find(|(t, _)| t == tag) {
            None => Ok(vec![]),
            Some((_, NonTaggedArg::Strings(ss))) => Ok(strings_of(ss)),
            Some(_) => bail!(":{} takes a string list.", tag),
        }
    }

    fn matching(&self, keys: Vec<String>) -> Matching {
        Matching {
            match_type: self.match_type.unwrap_or_default(),
            comparator: self.comparator.clone(),
            keys,
        }
    }
}

fn single_string<'a>(arg: Option<&'a Argument>, what: &str) -> anyhow::Result<String> {
    match arg {
        Some(Argument::Strings(ss)) if ss.len() == 1 => Ok(ss[0].to_string()),
        _ => bail!("{} takes exactly one string.", what),
    }
}

fn analyze_args<'a, 'doc>(
    args: &'a [Argument<'doc>],
    allowed: &[&str],
    id: &str,
) -> anyhow::Result<Args<'a, 'doc>> {
    let mut ret: Args<'a, 'doc> = Default::default();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let s = match arg {
            Argument::Strings(ss) => {
                ret.positional.push(NonTaggedArg::Strings(ss));
                continue;
            }
            Argument::Number(n) => {
                ret.positional.push(NonTaggedArg::Number(*n));
                continue;
            }
            Argument::Tag(s) => s,
        };
        if !ret.positional.is_empty() {
            bail!("Tag :{} after positional argument.", s);
        }
        let tag = s.to_ascii_lowercase();
        let modifier = Modifier::from_tag(&tag);
        let log_level = LogLevel::from_tag(&tag);
        if !allowed.contains(&tag.as_str())
            && !(modifier.is_some() && allowed.contains(&"modifiers"))
            && !(log_level.is_some() && allowed.contains(&"level"))
        {
            bail!("Unrecognized tag :{} for {}.", s, id);
        }
        match tag.as_str() {
            "comparator" => {
                if ret.comparator.is_some() {
                    bail!("Comparator specified twice.");
                }
                ret.comparator = Some(single_string(it.next(), ":comparator")?);
            }
            "is" | "contains" | "matches" | "count" | "value" => {
                if ret.match_type.is_some() {
                    bail!("Match type specified twice.");
                }
                let mt = match tag.as_str() {
                    "is" => MatchType::Is,
                    "contains" => MatchType::Contains,
                    "matches" => MatchType::Matches,
                    _ => {
                        let op = single_string(it.next(), &format!(":{}", tag))?;
                        let op = RelOp::from_name(&op)
                            .ok_or_else(|| anyhow!("Unknown relational operator {:?}.", op))?;
                        if tag == "count" {
                            MatchType::Count(op)
                        } else {
                            MatchType::Value(op)
                        }
                    }
                };
                ret.match_type = Some(mt);
            }
            "all" | "localpart" | "domain" => {
                if ret.address_part.is_some() {
                    bail!("Address part specified twice.");
                }
                ret.address_part = Some(match tag.as_str() {
                    "all" => AddressPart::All,
                    "localpart" => AddressPart::LocalPart,
                    _ => AddressPart::Domain,
                });
            }
            "over" | "under" => {
                if ret.over.is_some() {
                    bail!("At most one of :over or :under is allowed.");
                }
                ret.over = Some(tag == "over");
            }
            "copy" => ret.copy = true,
            "text" | "raw" => {
                if ret.body_transform.is_some() {
                    bail!("Body transform specified twice.");
                }
                ret.body_transform = Some(if tag == "raw" {
                    BodyTransform::Raw
                } else {
                    BodyTransform::Text
                });
            }
            "from" | "importance" | "options" | "message" => match it.next() {
                Some(Argument::Strings(ss)) => ret.valued.push((tag.clone(), NonTaggedArg::Strings(ss))),
                _ => bail!(":{} needs a string argument.", tag),
            },
            _ => match (modifier, log_level) {
                (Some(m), _) => {
                    if ret.modifiers.contains(&m) {
                        bail!("Modifier :{} given twice.", tag);
                    }
                    ret.modifiers.push(m);
                }
                (None, Some(level)) => {
                    if ret.log_level.is_some() {
                        bail!("Log level specified twice.");
                    }
                    ret.log_level = Some(level);
                }
                (None, None) => bail!("Unrecognized tag :{}.", s),
            },
        }
    }
    Ok(ret)
}

pub fn test_command(cmd: &parse::Test, registry: &Registry) -> anyhow::Result<Test> {
    let id = cmd.id.to_ascii_lowercase();
    match id.as_str() {
        "allof" | "anyof" => {
            if !cmd.args.inner.is_empty() {
                bail!("{} only takes other tests as arguments.", cmd.id);
            }
            if cmd.args.tests.is_empty() {
                bail!("{} needs at least one test.", cmd.id);
            }
            let tests = cmd
                .args
                .tests
                .iter()
                .map(|t| test_command(t, registry))
                .collect::<anyhow::Result<Vec<_>>>()?;
            Ok(if id == "allof" {
                Test::AllOf(tests)
            } else {
                Test::AnyOf(tests)
            })
        }
        "not" => {
            if !cmd.args.inner.is_empty() || cmd.args.tests.len() != 1 {
                bail!("Not takes exactly one test argument.");
            }
            Ok(Test::Not(Box::new(test_command(&cmd.args.tests[0], registry)?)))
        }
        "true" | "false" => {
            if !cmd.args.inner.is_empty() || !cmd.args.tests.is_empty() {
                bail!("{} takes no arguments.", cmd.id);
            }
            Ok(if id == "true" { Test::True } else { Test::False })
        }
        _ if !cmd.args.tests.is_empty() => bail!("{} cannot have test arguments.", cmd.id),
        "header" | "mime_header" => {
            let args = analyze_args(&cmd.args.inner, MATCH_TAGS, cmd.id)?;
            if args.positional.len() != 2 {
                bail!("Header takes exactly two positional arguments.");
            }
            let names = args.strings(0, "Header names must be a string or string list.")?;
            let keys = args.strings(1, "Header keys must be a string or string list.")?;
            Ok(Test::Header(HeaderTest {
                mime: id == "mime_header",
                names,
                matching: args.matching(keys),
            }))
        }
        "address" | "envelope" => {
            let args = analyze_args(&cmd.args.inner, ADDRESS_TAGS, cmd.id)?;
            if args.positional.len() != 2 {
                bail!("{} takes exactly two positional arguments.", cmd.id);
            }
            let fields = args.strings(0, "Address headers must be a string or string list.")?;
            let keys = args.strings(1, "Address keys must be a string or string list.")?;
            let matching = args.matching(keys);
            Ok(if id == "address" {
                Test::Address(AddressTest {
                    part: args.address_part,
                    headers: fields,
                    matching,
                })
            } else {
                Test::Envelope(EnvelopeTest {
                    part: args.address_part,
                    envelope_parts: fields,
                    matching,
                })
            })
        }
        "body" => {
            let args = analyze_args(
                &cmd.args.inner,
                &["comparator", "is", "contains", "matches", "text", "raw"],
                cmd.id,
            )?;
            if args.positional.len() != 1 {
                bail!("Body takes exactly one positional argument.");
            }
            let keys = args.strings(0, "Body keys must be a string or string list.")?;
            Ok(Test::Body(BodyTest {
                transform: args.body_transform,
                matching: args.matching(keys),
            }))
        }
        "string" => {
            let args = analyze_args(&cmd.args.inner, MATCH_TAGS, cmd.id)?;
            if args.positional.len() != 2 {
                bail!("String takes exactly two positional arguments.");
            }
            let sources = args.strings(0, "String sources must be a string or string list.")?;
            let keys = args.strings(1, "String keys must be a string or string list.")?;
            Ok(Test::String(StringTest {
                sources,
                matching: args.matching(keys),
            }))
        }
        "exists" => {
            let args = analyze_args(&cmd.args.inner, &[], cmd.id)?;
            if args.positional.len() != 1 {
                bail!("Exists takes exactly one positional argument.");
            }
            Ok(Test::Exists(ExistsTest {
                names: args.strings(0, "Exists header names must be a string or string list.")?,
            }))
        }
        "size" => {
            let args = analyze_args(&cmd.args.inner, &["over", "under"], cmd.id)?;
            let over = match args.over {
                None => bail!("Size takes exactly one of :over or :under."),
                Some(over) => over,
            };
            match args.positional.as_slice() {
                [NonTaggedArg::Number(limit)] => Ok(Test::Size(SizeTest {
                    over,
                    limit: *limit,
                })),
                _ => bail!("Size takes exactly one number."),
            }
        }
        _ => match registry.test(&id) {
            Some(custom) => {
                let args: Vec<Value> = cmd
                    .args
                    .inner
                    .iter()
                    .map(|a| match a {
                        Argument::Tag(t) => Value::Tag(t.to_string()),
                        Argument::Strings(ss) => Value::Strings(strings_of(ss)),
                        Argument::Number(n) => Value::Number(*n),
                    })
                    .collect();
                custom.validate(&args)?;
                Ok(Test::Custom(CustomTest { name: id, args }))
            }
            None => bail!("Unrecognized test command: {}", cmd.id),
        },
    }
}

pub fn action(cmd: &Command) -> anyhow::Result<Action> {
    no_block(cmd)?;
    if !cmd.args.tests.is_empty() {
        bail!("{} does not take test arguments.", cmd.id);
    }
    let id = cmd.id.to_ascii_lowercase();
    let allowed: &[&str] = match id.as_str() {
        "fileinto" | "redirect" => &["copy"],
        "notify" => NOTIFY_TAGS,
        "log" => &["level"],
        "set" => &["modifiers"],
        _ => &[],
    };
    let args = analyze_args(&cmd.args.inner, allowed, cmd.id)?;
    let count = args.positional.len();
    let expect = |n: usize| -> anyhow::Result<()> {
        if count != n {
            bail!("{} takes {} positional argument(s), got {}.", cmd.id, n, count);
        }
        Ok(())
    };
    let action = match id.as_str() {
        "keep" => {
            expect(0)?;
            Action::Keep
        }
        "discard" => {
            expect(0)?;
            Action::Discard
        }
        "stop" => {
            expect(0)?;
            Action::Stop
        }
        "fileinto" => {
            expect(1)?;
            Action::FileInto {
                folder: args.string(0, "Fileinto arg must be a string.")?,
                copy: args.copy,
            }
        }
        "redirect" => {
            expect(1)?;
            Action::Redirect {
                address: args.string(0, "Redirect arg must be a string.")?,
                copy: args.copy,
            }
        }
        "tag" => {
            expect(1)?;
            Action::Tag(args.string(0, "Tag arg must be a string.")?)
        }
        "flag" => {
            expect(1)?;
            Action::Flag(args.string(0, "Flag arg must be a string.")?)
        }
        "reject" => {
            expect(1)?;
            Action::Reject(args.string(0, "Reject arg must be a string.")?)
        }
        "ereject" => {
            expect(1)?;
            Action::Ereject(args.string(0, "Ereject arg must be a string.")?)
        }
        "notify" => {
            expect(1)?;
            Action::Notify(Notify {
                method: args.string(0, "Notify method must be a string.")?,
                from: args.valued_string("from")?,
                importance: args.valued_string("importance")?,
                options: args.valued_strings("options")?,
                message: args.valued_string("message")?,
            })
        }
        "log" => {
            expect(1)?;
            Action::Log {
                level: args.log_level,
                text: args.string(0, "Log arg must be a string.")?,
            }
        }
        "set" => {
            expect(2)?;
            variables::check_modifiers(&args.modifiers)?;
            Action::SetVariable {
                name: args.string(0, "Set name must be a string.")?,
                value: args.string(1, "Set value must be a string.")?,
                modifiers: args.modifiers,
            }
        }
        _ => bail!("Unrecognized command: {}", cmd.id),
    };
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compile_ok(text: &str) -> Script {
        compile(text, &Registry::default()).unwrap()
    }

    fn compile_err(text: &str) -> String {
        format!("{:#}", compile(text, &Registry::default()).unwrap_err())
    }

    #[test]
    fn single_rule() {
        let script = compile_ok(
            "require [\"tag\"];\n# Tag it\nif header :is \"Subject\" \"Hello\" { tag \"t1\"; }",
        );
        assert_eq!(script.requires, vec!["tag"]);
        assert_eq!(
            script.rules,
            vec![Rule {
                name: Some("Tag it".into()),
                active: true,
                test: Some(Test::Header(HeaderTest {
                    mime: false,
                    names: vec!["Subject".into()],
                    matching: Matching {
                        match_type: MatchType::Is,
                        comparator: None,
                        keys: vec!["Hello".into()],
                    },
                })),
                body: vec![Statement::Action(Action::Tag("t1".into()))],
                else_chain: vec![],
            }]
        );
    }

    #[test]
    fn else_chain_and_nesting() {
        let script = compile_ok(
            "if true { if false { keep; } discard; } elsif size :under 1K { stop; } else { keep; }",
        );
        let rule = &script.rules[0];
        assert_eq!(rule.body.len(), 2);
        assert!(matches!(rule.body[0], Statement::Rule(_)));
        assert_eq!(rule.else_chain.len(), 2);
        assert_eq!(
            rule.else_chain[0].test,
            Some(Test::Size(SizeTest { over: false, limit: 1024 }))
        );
        assert_eq!(rule.else_chain[1].test, None);
    }

    #[test]
    fn loose_commands_are_grouped() {
        let script = compile_ok("tag \"a\"; tag \"b\"; if true { keep; } stop;");
        assert_eq!(script.rules.len(), 3);
        assert_eq!(script.rules[0].test, None);
        assert_eq!(script.rules[0].body.len(), 2);
        assert_eq!(script.rules[2].body, vec![Statement::Action(Action::Stop)]);
    }

    #[test]
    fn disabled_rule() {
        let script = compile_ok("disabled_if true { keep; }");
        assert!(!script.rules[0].active);
    }

    #[test]
    fn relational_and_comparator() {
        let script = compile_ok(
            "if address :count \"lt\" :comparator \"i;ascii-numeric\" :domain \"To\" \"-1\" { keep; }",
        );
        match &script.rules[0].test {
            Some(Test::Address(a)) => {
                assert_eq!(a.part, Some(AddressPart::Domain));
                assert_eq!(a.matching.match_type, MatchType::Count(RelOp::Lt));
                assert_eq!(a.matching.comparator.as_deref(), Some("i;ascii-numeric"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn set_and_notify() {
        let script = compile_ok(
            "set :lower :upperfirst \"name\" \"VALUE\";\n\
             notify :importance \"1\" :options [\"a\", \"b\"] :message \"hi\" \"mailto:x@y.com\";\n\
             log :warn \"careful\";",
        );
        let body = &script.rules[0].body;
        assert_eq!(
            body[0],
            Statement::Action(Action::SetVariable {
                name: "name".into(),
                value: "VALUE".into(),
                modifiers: vec![Modifier::Lower, Modifier::UpperFirst],
            })
        );
        assert_eq!(
            body[1],
            Statement::Action(Action::Notify(Notify {
                method: "mailto:x@y.com".into(),
                from: None,
                importance: Some("1".into()),
                options: vec!["a".into(), "b".into()],
                message: Some("hi".into()),
            }))
        );
        assert_eq!(
            body[2],
            Statement::Action(Action::Log {
                level: Some(LogLevel::Warn),
                text: "careful".into(),
            })
        );
    }

    #[test]
    fn compile_errors() {
        assert!(compile_err("frobnicate;").contains("Unrecognized command"));
        assert!(compile_err("if bogus { keep; }").contains("Unrecognized test"));
        assert!(compile_err("else { keep; }").contains("without a preceding if"));
        assert!(compile_err("if true { keep; } else { keep; } else { keep; }").contains("without a preceding if"));
        assert!(compile_err("set :lower :upper \"a\" \"b\";").contains("cannot be used together"));
        assert!(compile_err("set :bogus \"a\" \"b\";").contains("Unrecognized tag"));
        assert!(compile_err("keep \"x\";").contains("positional"));
        assert!(compile_err("if true keep;").contains("takes no arguments"));
        assert!(compile_err("if true { keep; ").contains("Syntax error"));
        assert!(compile_err("if true { require \"x\"; }").contains("top level"));
        assert!(compile_err("if header :is :contains \"a\" \"b\" { keep; }").contains("twice"));
        assert!(compile_err("if size 10 { keep; }").contains(":over"));
        assert!(compile_err("if not (true, false) { keep; }").contains("exactly one"));
        assert!(compile_err("fileinto :copy \"a\" :copy;").contains("after positional"));
        assert!(compile_err("if true;").contains("requires a block"));
    }

    #[test]
    fn else_must_be_last() {
        let err = Rule::new(Some(Test::True), vec![])
            .with_else_chain(vec![
                ElseBranch { test: None, body: vec![] },
                ElseBranch { test: Some(Test::False), body: vec![] },
            ])
            .unwrap_err();
        assert!(err.to_string().contains("Else cannot be followed"));
    }

    #[test]
    fn action_capabilities() {
        assert_eq!(ActionKind::from(&Action::Keep).capability(), None);
        assert_eq!(
            ActionKind::from(&Action::FileInto { folder: "x".into(), copy: false }).capability(),
            Some("fileinto")
        );
    }
}
