//! Canonical script text for a compiled `Script`. Compiling the output
//! gives back an equal `Script`.

use crate::sema::{
    Action, Matching, MatchType, Rule, Script, Statement, Test, Value,
};

const INDENT: &str = "    ";

pub fn to_sieve(script: &Script) -> String {
    let mut out = String::new();
    if !script.requires.is_empty() {
        out.push_str("require ");
        out.push_str(&string_list(&script.requires));
        out.push_str(";\n\n");
    }
    for rule in &script.rules {
        if let Some(name) = &rule.name {
            // Names are single-line comments.
            out.push_str("# ");
            out.push_str(&name.replace(|c| c == '\r' || c == '\n', " "));
            out.push('\n');
        }
        match &rule.test {
            None => statements(&mut out, &rule.body, 0),
            Some(_) => write_rule(&mut out, rule, 0),
        }
    }
    out
}

fn pad(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn string_list(list: &[String]) -> String {
    match list {
        [single] => quote(single),
        _ => format!(
            "[{}]",
            list.iter().map(|s| quote(s)).collect::<Vec<_>>().join(", ")
        ),
    }
}

fn write_rule(out: &mut String, rule: &Rule, depth: usize) {
    let test = match &rule.test {
        Some(test) => test,
        None => {
            statements(out, &rule.body, depth);
            return;
        }
    };
    pad(out, depth);
    out.push_str(if rule.active { "if " } else { "disabled_if " });
    out.push_str(&test_text(test));
    block(out, &rule.body, depth);
    for branch in &rule.else_chain {
        pad(out, depth);
        match &branch.test {
            Some(test) => {
                out.push_str("elsif ");
                out.push_str(&test_text(test));
            }
            None => out.push_str("else"),
        }
        block(out, &branch.body, depth);
    }
}

fn block(out: &mut String, body: &[Statement], depth: usize) {
    out.push_str(" {\n");
    statements(out, body, depth + 1);
    pad(out, depth);
    out.push_str("}\n");
}

fn statements(out: &mut String, body: &[Statement], depth: usize) {
    for statement in body {
        match statement {
            Statement::Action(action) => {
                pad(out, depth);
                out.push_str(&action_text(action));
                out.push_str(";\n");
            }
            Statement::Rule(rule) => write_rule(out, rule, depth),
        }
    }
}

fn matching_tags(matching: &Matching) -> String {
    let match_type = match matching.match_type {
        MatchType::Is => ":is".to_owned(),
        MatchType::Contains => ":contains".to_owned(),
        MatchType::Matches => ":matches".to_owned(),
        MatchType::Count(op) => format!(":count {}", quote(op.name())),
        MatchType::Value(op) => format!(":value {}", quote(op.name())),
    };
    match &matching.comparator {
        Some(comparator) => format!(":comparator {} {}", quote(comparator), match_type),
        None => match_type,
    }
}

pub fn test_text(test: &Test) -> String {
    match test {
        Test::True => "true".to_owned(),
        Test::False => "false".to_owned(),
        Test::Not(inner) => format!("not {}", test_text(inner)),
        Test::AllOf(tests) | Test::AnyOf(tests) => format!(
            "{} ({})",
            if let Test::AllOf(_) = test { "allof" } else { "anyof" },
            tests.iter().map(test_text).collect::<Vec<_>>().join(", ")
        ),
        Test::Header(h) => format!(
            "{} {} {} {}",
            if h.mime { "mime_header" } else { "header" },
            matching_tags(&h.matching),
            string_list(&h.names),
            string_list(&h.matching.keys)
        ),
        Test::Address(a) => format!(
            "address {}{} {} {}",
            a.part.map(|p| format!(":{} ", p.tag())).unwrap_or_default(),
            matching_tags(&a.matching),
            string_list(&a.headers),
            string_list(&a.matching.keys)
        ),
        Test::Envelope(e) => format!(
            "envelope {}{} {} {}",
            e.part.map(|p| format!(":{} ", p.tag())).unwrap_or_default(),
            matching_tags(&e.matching),
            string_list(&e.envelope_parts),
            string_list(&e.matching.keys)
        ),
        Test::Body(b) => format!(
            "body {}{} {}",
            match b.transform {
                Some(crate::sema::BodyTransform::Raw) => ":raw ",
                Some(crate::sema::BodyTransform::Text) => ":text ",
                None => "",
            },
            matching_tags(&b.matching),
            string_list(&b.matching.keys)
        ),
        Test::Size(s) => format!(
            "size {} {}",
            if s.over { ":over" } else { ":under" },
            s.limit
        ),
        Test::Exists(e) => format!("exists {}", string_list(&e.names)),
        Test::String(s) => format!(
            "string {} {} {}",
            matching_tags(&s.matching),
            string_list(&s.sources),
            string_list(&s.matching.keys)
        ),
        Test::Custom(c) => {
            let mut out = c.name.clone();
            for arg in &c.args {
                out.push(' ');
                out.push_str(&value_text(arg));
            }
            out
        }
    }
}

pub fn value_text(value: &Value) -> String {
    match value {
        Value::Tag(t) => format!(":{}", t),
        Value::Strings(ss) => string_list(ss),
        Value::Number(n) => n.to_string(),
    }
}

fn copy_tag(copy: bool) -> &'static str {
    if copy {
        ":copy "
    } else {
        ""
    }
}

pub fn action_text(action: &Action) -> String {
    match action {
        Action::Keep => "keep".to_owned(),
        Action::Discard => "discard".to_owned(),
        Action::Stop => "stop".to_owned(),
        Action::FileInto { folder, copy } => format!("fileinto {}{}", copy_tag(*copy), quote(folder)),
        Action::Redirect { address, copy } => {
            format!("redirect {}{}", copy_tag(*copy), quote(address))
        }
        Action::Tag(t) => format!("tag {}", quote(t)),
        Action::Flag(f) => format!("flag {}", quote(f)),
        Action::Reject(text) => format!("reject {}", quote(text)),
        Action::Ereject(text) => format!("ereject {}", quote(text)),
        Action::Notify(n) => {
            let mut out = "notify ".to_owned();
            if let Some(from) = &n.from {
                out.push_str(&format!(":from {} ", quote(from)));
            }
            if let Some(importance) = &n.importance {
                out.push_str(&format!(":importance {} ", quote(importance)));
            }
            if !n.options.is_empty() {
                out.push_str(&format!(
                    ":options [{}] ",
                    n.options.iter().map(|o| quote(o)).collect::<Vec<_>>().join(", ")
                ));
            }
            if let Some(message) = &n.message {
                out.push_str(&format!(":message {} ", quote(message)));
            }
            out.push_str(&quote(&n.method));
            out
        }
        Action::Log { level, text } => match level {
            Some(level) => format!("log :{} {}", level.tag(), quote(text)),
            None => format!("log {}", quote(text)),
        },
        Action::SetVariable {
            name,
            value,
            modifiers,
        } => {
            let mut out = "set ".to_owned();
            for m in modifiers {
                out.push(':');
                out.push_str(m.tag());
                out.push(' ');
            }
            out.push_str(&format!("{} {}", quote(name), quote(value)));
            out
        }
    }
}
