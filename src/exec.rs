//! Rule-tree walking. Script layers are evaluated in order against one
//! message, and the actions of every matched rule are accumulated.

use std::fmt;

use crate::error::{Error, Result};
use crate::eval::{self, Capabilities, EvaluationContext};
use crate::sema::{self, Action, ActionKind, LogLevel, Notify, Rule, Script, Statement};
use crate::variables;

/// Which of an account's scripts a layer is. Layers run in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptKind {
    AdminBefore,
    User,
    AdminAfter,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 3] = [ScriptKind::AdminBefore, ScriptKind::User, ScriptKind::AdminAfter];
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptKind::AdminBefore => "admin-before",
            ScriptKind::User => "user",
            ScriptKind::AdminAfter => "admin-after",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum WalkState {
    Running,
    /// `stop` was executed; nothing further is evaluated in any layer.
    Stopped,
    /// `discard` was executed. Evaluation carries on but there is no
    /// implicit keep.
    Discarded,
    Rejected { text: String, ereject: bool },
    Done,
}

impl WalkState {
    fn halted(&self) -> bool {
        matches!(self, WalkState::Stopped | WalkState::Rejected { .. })
    }
}

/// Outcome of evaluating every layer against one message.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Actions in the order they fired, `${...}` expanded. `stop` and `set`
    /// are not included.
    pub actions: Vec<Action>,
    pub state: WalkState,
    /// Set when a numeric-domain error cancelled every action.
    pub aborted: Option<Error>,
    /// Layers that failed part way; their earlier actions stand.
    pub layer_errors: Vec<(ScriptKind, Error)>,
}

impl ExecutionResult {
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub fn tags(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Tag(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

struct Walker<'c, 'a> {
    ctx: &'c mut EvaluationContext<'a>,
    state: WalkState,
}

impl<'c, 'a> Walker<'c, 'a> {
    fn layer(&mut self, script: &Script) -> Result<()> {
        for cap in &script.requires {
            let known = sema::CAPABILITIES
                .iter()
                .any(|c| c.eq_ignore_ascii_case(cap))
                || self.ctx.registry.knows_capability(cap);
            if !known {
                return Err(Error::UnknownCapability(cap.clone()));
            }
        }
        self.ctx.capabilities = Capabilities::new(self.ctx.require_enforced, &script.requires);
        for rule in &script.rules {
            if self.state.halted() {
                break;
            }
            self.rule(rule)?;
        }
        Ok(())
    }

    fn rule(&mut self, rule: &Rule) -> Result<()> {
        if !rule.active {
            return Ok(());
        }
        let body = match &rule.test {
            None => Some(&rule.body),
            Some(test) if eval::evaluate(test, self.ctx)? => Some(&rule.body),
            Some(_) => {
                let mut chosen = None;
                for branch in &rule.else_chain {
                    let hit = match &branch.test {
                        None => true,
                        Some(test) => eval::evaluate(test, self.ctx)?,
                    };
                    if hit {
                        chosen = Some(&branch.body);
                        break;
                    }
                }
                chosen
            }
        };
        if let Some(body) = body {
            if let Some(name) = &rule.name {
                tracing::debug!(rule = %name, "rule matched");
            }
            self.block(body)?;
        }
        Ok(())
    }

    fn block(&mut self, body: &[Statement]) -> Result<()> {
        for statement in body {
            if self.state.halted() {
                break;
            }
            match statement {
                Statement::Action(action) => self.action(action),
                Statement::Rule(rule) => self.rule(rule)?,
            }
        }
        Ok(())
    }

    fn allowed(&self, action: &Action) -> bool {
        let kind = ActionKind::from(action);
        if let Some(cap) = kind.capability() {
            if !self.ctx.capabilities.allows(cap) {
                tracing::warn!(?kind, capability = cap, "command used without require, ignoring it");
                return false;
            }
        }
        let copy = matches!(
            action,
            Action::FileInto { copy: true, .. } | Action::Redirect { copy: true, .. }
        );
        if copy && !self.ctx.capabilities.allows("copy") {
            tracing::warn!(?kind, "`:copy` used without require, ignoring the command");
            return false;
        }
        true
    }

    fn action(&mut self, action: &Action) {
        if !self.allowed(action) {
            return;
        }
        let ctx = &mut *self.ctx;
        let expanded = match action {
            Action::Stop => {
                self.state = WalkState::Stopped;
                return;
            }
            Action::SetVariable {
                name,
                value,
                modifiers,
            } => {
                let value = variables::apply_modifiers(modifiers, &ctx.expand(value));
                ctx.variables.set(name, value);
                return;
            }
            Action::Keep => Action::Keep,
            Action::Discard => {
                if self.state == WalkState::Running {
                    self.state = WalkState::Discarded;
                }
                Action::Discard
            }
            Action::FileInto { folder, copy } => Action::FileInto {
                folder: ctx.expand(folder),
                copy: *copy,
            },
            Action::Redirect { address, copy } => Action::Redirect {
                address: ctx.expand(address),
                copy: *copy,
            },
            Action::Tag(t) => Action::Tag(ctx.expand(t)),
            Action::Flag(f) => Action::Flag(ctx.expand(f)),
            Action::Reject(text) | Action::Ereject(text) => {
                let text = ctx.expand(text);
                let ereject = matches!(action, Action::Ereject(_));
                self.state = WalkState::Rejected {
                    text: text.clone(),
                    ereject,
                };
                if ereject {
                    Action::Ereject(text)
                } else {
                    Action::Reject(text)
                }
            }
            Action::Notify(n) => Action::Notify(Notify {
                method: ctx.expand(&n.method),
                from: n.from.as_deref().map(|s| ctx.expand(s)),
                importance: n.importance.as_deref().map(|s| ctx.expand(s)),
                options: n.options.iter().map(|s| ctx.expand(s)).collect(),
                message: n.message.as_deref().map(|s| ctx.expand(s)),
            }),
            Action::Log { level, text } => {
                let text = ctx.expand(text);
                match level.unwrap_or(LogLevel::Info) {
                    LogLevel::Debug => tracing::debug!(target: "sieve", "{}", text),
                    LogLevel::Info => tracing::info!(target: "sieve", "{}", text),
                    LogLevel::Warn => tracing::warn!(target: "sieve", "{}", text),
                    LogLevel::Error => tracing::error!(target: "sieve", "{}", text),
                }
                Action::Log {
                    level: *level,
                    text,
                }
            }
        };
        ctx.actions.push(expanded);
    }
}

/// Evaluate `layers` in order against the message in `ctx`.
///
/// Each layer gets a fresh variable scope. A layer that fails stops where it
/// is and the next one still runs. A negative `i;ascii-numeric` operand
/// anywhere cancels every accumulated action.
pub fn evaluate_layers(layers: &[(ScriptKind, &Script)], mut ctx: EvaluationContext<'_>) -> ExecutionResult {
    let mut walker = Walker {
        ctx: &mut ctx,
        state: WalkState::Running,
    };
    let mut layer_errors = vec![];
    for (kind, script) in layers {
        if walker.state.halted() {
            tracing::debug!(layer = %kind, "skipping layer after stop or reject");
            continue;
        }
        walker.ctx.variables.push_scope();
        let outcome = walker.layer(script);
        walker.ctx.variables.pop_scope();
        match outcome {
            Ok(()) => {}
            Err(e @ Error::NegativeNumber(_)) => {
                tracing::warn!(layer = %kind, error = %e, "evaluation aborted, dropping all actions");
                return ExecutionResult {
                    actions: vec![],
                    state: WalkState::Done,
                    aborted: Some(e),
                    layer_errors,
                };
            }
            Err(e) => {
                tracing::warn!(layer = %kind, error = %e, "script layer failed");
                layer_errors.push((*kind, e));
            }
        }
    }
    let state = match walker.state {
        WalkState::Running => WalkState::Done,
        other => other,
    };
    ExecutionResult {
        actions: std::mem::take(&mut ctx.actions),
        state,
        aborted: None,
        layer_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::{self, Envelope, ParsedMessage};
    use crate::registry::Registry;
    use pretty_assertions::assert_eq;

    const MSG: &str = "From: coyote@desert.example.org\r\n\
        To: test1@in.telligent.com\r\n\
        Subject: ACME order 42\r\n\
        \r\n\
        Beep beep.\r\n";

    fn message() -> ParsedMessage {
        email::parse(MSG.as_bytes()).unwrap()
    }

    fn script(text: &str) -> Script {
        sema::compile(text, &Registry::default()).unwrap()
    }

    fn run_layers(layers: &[(ScriptKind, &Script)], enforced: bool) -> ExecutionResult {
        let msg = message();
        let registry = Registry::default();
        let envelope = Envelope::new(Some("sender@example.net".into()), vec![]);
        let ctx = EvaluationContext::new(&msg, Some(&envelope), &registry, enforced);
        evaluate_layers(layers, ctx)
    }

    fn run(text: &str) -> ExecutionResult {
        let s = script(text);
        run_layers(&[(ScriptKind::User, &s)], true)
    }

    #[test]
    fn single_matching_rule_tags_once() {
        let result = run(r#"require "tag"; if header :contains "Subject" "ACME" { tag "acme"; }"#);
        assert_eq!(result.actions, vec![Action::Tag("acme".into())]);
        assert_eq!(result.state, WalkState::Done);
    }

    #[test]
    fn else_chain_picks_first_hit() {
        let result = run(
            r#"require "tag";
            if header :is "Subject" "nope" { tag "if"; }
            elsif header :contains "Subject" "order" {
                tag "elsif";
                if true { tag "nested"; }
            }
            else { tag "else"; }"#,
        );
        assert_eq!(result.tags(), vec!["elsif", "nested"]);
    }

    #[test]
    fn falls_through_to_else() {
        let result = run(r#"require "tag"; if false { tag "a"; } elsif false { tag "b"; } else { tag "c"; }"#);
        assert_eq!(result.tags(), vec!["c"]);
    }

    #[test]
    fn disabled_rules_do_not_run() {
        let result = run(r#"require "tag"; disabled_if true { tag "off"; } tag "on";"#);
        assert_eq!(result.tags(), vec!["on"]);
    }

    #[test]
    fn stop_halts_later_layers() {
        let before = script(r#"require "tag"; tag "before"; stop; tag "unreached";"#);
        let user = script(r#"require "tag"; tag "user";"#);
        let result = run_layers(
            &[(ScriptKind::AdminBefore, &before), (ScriptKind::User, &user)],
            true,
        );
        assert_eq!(result.tags(), vec!["before"]);
        assert_eq!(result.state, WalkState::Stopped);
    }

    #[test]
    fn discard_keeps_evaluating() {
        let result = run(r#"require "tag"; discard; tag "after";"#);
        assert_eq!(result.actions, vec![Action::Discard, Action::Tag("after".into())]);
        assert_eq!(result.state, WalkState::Discarded);
    }

    #[test]
    fn reject_is_terminal() {
        let result = run(r#"require ["reject", "tag"]; reject "go away"; tag "after";"#);
        assert_eq!(result.actions, vec![Action::Reject("go away".into())]);
        assert_eq!(
            result.state,
            WalkState::Rejected {
                text: "go away".into(),
                ereject: false,
            }
        );
    }

    #[test]
    fn negative_numeric_aborts_everything() {
        let before = script(r#"require "tag"; tag "before";"#);
        let user = script(
            r#"require ["tag", "relational", "comparator-i;ascii-numeric"];
            if address :count "lt" :comparator "i;ascii-numeric" "To" "-1" { tag "t"; }
            tag "unconditional";"#,
        );
        let result = run_layers(
            &[(ScriptKind::AdminBefore, &before), (ScriptKind::User, &user)],
            true,
        );
        assert!(result.is_aborted());
        assert!(result.actions.is_empty());
    }

    #[test]
    fn unknown_capability_halts_only_that_layer() {
        let before = script(r#"require "tag"; tag "before";"#);
        let user = script(r#"require ["tag", "x-unheard-of"]; tag "user";"#);
        let after = script(r#"require "tag"; tag "after";"#);
        let result = run_layers(
            &[
                (ScriptKind::AdminBefore, &before),
                (ScriptKind::User, &user),
                (ScriptKind::AdminAfter, &after),
            ],
            true,
        );
        assert_eq!(result.tags(), vec!["before", "after"]);
        assert_eq!(result.layer_errors.len(), 1);
        assert_eq!(result.layer_errors[0].0, ScriptKind::User);
        assert!(matches!(result.layer_errors[0].1, Error::UnknownCapability(_)));
    }

    #[test]
    fn undeclared_commands_are_ignored() {
        let result = run(r#"tag "t"; fileinto "f"; keep;"#);
        assert_eq!(result.actions, vec![Action::Keep]);

        let s = script(r#"tag "t"; fileinto :copy "f";"#);
        let unenforced = run_layers(&[(ScriptKind::User, &s)], false);
        assert_eq!(
            unenforced.actions,
            vec![
                Action::Tag("t".into()),
                Action::FileInto {
                    folder: "f".into(),
                    copy: true,
                },
            ]
        );
    }

    #[test]
    fn variables_are_scoped_per_layer() {
        let before = script(r#"require ["variables", "tag"]; set "who" "admin"; tag "${who}";"#);
        let user = script(r#"require ["variables", "tag"]; tag "x${who}x";"#);
        let result = run_layers(
            &[(ScriptKind::AdminBefore, &before), (ScriptKind::User, &user)],
            true,
        );
        assert_eq!(result.tags(), vec!["admin", "xx"]);
    }

    #[test]
    fn match_groups_feed_actions() {
        let result = run(
            r#"require ["variables", "fileinto"];
            if header :matches "Subject" "* order *" { set :lower "co" "${1}"; fileinto "orders/${co}/${2}"; }"#,
        );
        assert_eq!(
            result.actions,
            vec![Action::FileInto {
                folder: "orders/acme/42".into(),
                copy: false,
            }]
        );
    }
}
