//! Carrying out accumulated actions against the mailbox.

use std::collections::HashSet;

use crate::config::FilterConfig;
use crate::email::{Envelope, MessageSource};
use crate::error::{Error, Result};
use crate::exec::ExecutionResult;
use crate::sema::{Action, Notify};

/// A notice sent to the sender of a rejected message.
#[derive(Clone, Debug, PartialEq)]
pub struct RejectNotice {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// The mailbox and delivery operations actions turn into. Calls arrive in
/// the order the actions fired.
pub trait MailboxSink {
    fn tag(&mut self, name: &str) -> anyhow::Result<()>;
    fn flag(&mut self, name: &str) -> anyhow::Result<()>;
    /// Deliver into `folder`, creating it if it does not exist.
    fn file_into(&mut self, folder: &str, copy: bool) -> anyhow::Result<()>;
    fn redirect(&mut self, address: &str, copy: bool) -> anyhow::Result<()>;
    /// Deliver into the default folder.
    fn keep(&mut self, folder: &str, implicit: bool, mark_read: bool) -> anyhow::Result<()>;
    fn discard(&mut self) -> anyhow::Result<()>;
    fn notify(&mut self, notify: &Notify) -> anyhow::Result<()>;
    fn reject(&mut self, notice: &RejectNotice) -> anyhow::Result<()>;
}

/// What happened to the message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveryPlan {
    /// Folders the message was placed in, default folder included.
    pub folders: Vec<String>,
    pub redirects: Vec<String>,
    pub tags: Vec<String>,
    pub flags: Vec<String>,
    pub implicit_keep: bool,
    pub discarded: bool,
    pub rejected: bool,
    pub notice_to: Option<String>,
}

/// Folder name as delivered: one leading and one trailing `/` removed and
/// trailing spaces trimmed. Leading spaces are part of the name.
pub fn folder_name(folder: &str) -> &str {
    let folder = folder.strip_prefix('/').unwrap_or(folder);
    let folder = folder.strip_suffix('/').unwrap_or(folder);
    folder.trim_end_matches(' ')
}

fn folder_key(folder: &str) -> String {
    folder_name(folder).to_lowercase()
}

fn collaborator(e: anyhow::Error) -> Error {
    Error::Collaborator(format!("{:#}", e))
}

struct Delivery<'s> {
    sink: &'s mut dyn MailboxSink,
    plan: DeliveryPlan,
    placed: HashSet<String>,
    redirected: HashSet<String>,
}

impl<'s> Delivery<'s> {
    fn place(&mut self, folder: &str, keep: Option<(bool, bool)>, copy: bool) -> Result<()> {
        let name = folder_name(folder);
        if !self.placed.insert(folder_key(folder)) {
            tracing::debug!(folder = name, "already delivered to folder");
            return Ok(());
        }
        let placed = match keep {
            Some((implicit, mark_read)) => self.sink.keep(name, implicit, mark_read),
            None => self.sink.file_into(name, copy),
        };
        placed.map_err(collaborator)?;
        self.plan.folders.push(name.to_owned());
        Ok(())
    }
}

fn disposes(action: &Action) -> bool {
    matches!(
        action,
        Action::Keep
            | Action::Discard
            | Action::Reject(_)
            | Action::Ereject(_)
            | Action::FileInto { copy: false, .. }
            | Action::Redirect { copy: false, .. }
    )
}

fn reject_recipient(message: &dyn MessageSource, envelope: Option<&Envelope>) -> Option<String> {
    if let Some(sender) = envelope.and_then(Envelope::sender) {
        if !sender.is_empty() {
            return Some(sender);
        }
    }
    message
        .header_values("Return-Path")
        .into_iter()
        .map(|rp| {
            rp.trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .trim()
                .to_owned()
        })
        .find(|rp| !rp.is_empty())
}

fn reject_notice(
    to: String,
    reason: &str,
    message: &dyn MessageSource,
    envelope: Option<&Envelope>,
    config: &FilterConfig,
) -> RejectNotice {
    let recipient = envelope
        .and_then(|e| e.recipients().into_iter().next())
        .unwrap_or_default();
    let original_subject = message
        .header_values("Subject")
        .into_iter()
        .next()
        .unwrap_or_default();
    let body = format!(
        "Your message was automatically rejected by the recipient's mail filter.\r\n\
         \r\n\
         Subject: {}\r\n\
         Reason: {}\r\n\
         \r\n\
         Final-Recipient: rfc822; {}\r\n\
         Disposition: automatic-action/MDN-sent-automatically; deleted\r\n",
        original_subject, reason, recipient
    );
    RejectNotice {
        to,
        subject: config.reject_subject.clone(),
        body,
    }
}

/// Apply `result` to `sink`.
///
/// Every placement, tag, flag and redirect happens at most once. If nothing
/// disposed of the message it is kept in the default folder. `ereject`
/// returns `Error::DeliveryRefused` so the transport can refuse the
/// recipient.
pub fn execute(
    result: &ExecutionResult,
    message: &dyn MessageSource,
    envelope: Option<&Envelope>,
    config: &FilterConfig,
    sink: &mut dyn MailboxSink,
) -> Result<DeliveryPlan> {
    let mark_read = config.implicit_keep_read();
    let mut delivery = Delivery {
        sink,
        plan: DeliveryPlan::default(),
        placed: HashSet::new(),
        redirected: HashSet::new(),
    };

    if result.is_aborted() {
        tracing::warn!("evaluation was aborted, falling back to implicit keep");
        delivery.place(&config.default_folder, Some((true, mark_read)), false)?;
        delivery.plan.implicit_keep = true;
        return Ok(delivery.plan);
    }

    if let Some(text) = result.actions.iter().find_map(|a| match a {
        Action::Ereject(text) => Some(text),
        _ => None,
    }) {
        return Err(Error::DeliveryRefused(text.clone()));
    }

    if let Some(reason) = result.actions.iter().find_map(|a| match a {
        Action::Reject(text) => Some(text),
        _ => None,
    }) {
        delivery.plan.rejected = true;
        match reject_recipient(message, envelope) {
            Some(to) => {
                let notice = reject_notice(to.clone(), reason, message, envelope, config);
                delivery.sink.reject(&notice).map_err(collaborator)?;
                delivery.plan.notice_to = Some(to);
            }
            None => tracing::warn!(error = %Error::NoRejectRecipient, "reject notice not sent"),
        }
        return Ok(delivery.plan);
    }

    let mut tags = HashSet::new();
    let mut flags = HashSet::new();
    for action in &result.actions {
        match action {
            Action::Tag(name) => {
                if tags.insert(name.clone()) {
                    delivery.sink.tag(name).map_err(collaborator)?;
                    delivery.plan.tags.push(name.clone());
                }
            }
            Action::Flag(name) => {
                if flags.insert(name.to_ascii_lowercase()) {
                    delivery.sink.flag(name).map_err(collaborator)?;
                    delivery.plan.flags.push(name.clone());
                }
            }
            Action::FileInto { folder, copy } => delivery.place(folder, None, *copy)?,
            Action::Keep => delivery.place(&config.default_folder, Some((false, false)), false)?,
            Action::Redirect { address, copy } => {
                if delivery.redirected.insert(address.to_ascii_lowercase()) {
                    delivery.sink.redirect(address, *copy).map_err(collaborator)?;
                    delivery.plan.redirects.push(address.clone());
                }
            }
            Action::Discard => {
                if !delivery.plan.discarded {
                    delivery.sink.discard().map_err(collaborator)?;
                    delivery.plan.discarded = true;
                }
            }
            Action::Notify(notify) => delivery.sink.notify(notify).map_err(collaborator)?,
            Action::Log { .. }
            | Action::Stop
            | Action::SetVariable { .. }
            | Action::Reject(_)
            | Action::Ereject(_) => {}
        }
    }

    if !result.actions.iter().any(disposes) {
        delivery.place(&config.default_folder, Some((true, mark_read)), false)?;
        delivery.plan.implicit_keep = true;
    }
    Ok(delivery.plan)
}

/// A sink that records what it is asked to do, for the command line tool
/// and for tests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordingSink {
    pub calls: Vec<String>,
}

impl MailboxSink for RecordingSink {
    fn tag(&mut self, name: &str) -> anyhow::Result<()> {
        self.calls.push(format!("tag {:?}", name));
        Ok(())
    }

    fn flag(&mut self, name: &str) -> anyhow::Result<()> {
        self.calls.push(format!("flag {:?}", name));
        Ok(())
    }

    fn file_into(&mut self, folder: &str, copy: bool) -> anyhow::Result<()> {
        self.calls
            .push(format!("fileinto{} {:?}", if copy { " :copy" } else { "" }, folder));
        Ok(())
    }

    fn redirect(&mut self, address: &str, copy: bool) -> anyhow::Result<()> {
        self.calls
            .push(format!("redirect{} {:?}", if copy { " :copy" } else { "" }, address));
        Ok(())
    }

    fn keep(&mut self, folder: &str, implicit: bool, mark_read: bool) -> anyhow::Result<()> {
        self.calls.push(format!(
            "{} {:?}{}",
            if implicit { "implicit keep" } else { "keep" },
            folder,
            if mark_read { " (read)" } else { "" }
        ));
        Ok(())
    }

    fn discard(&mut self) -> anyhow::Result<()> {
        self.calls.push("discard".to_owned());
        Ok(())
    }

    fn notify(&mut self, notify: &Notify) -> anyhow::Result<()> {
        self.calls.push(format!("notify {:?}", notify.method));
        Ok(())
    }

    fn reject(&mut self, notice: &RejectNotice) -> anyhow::Result<()> {
        self.calls.push(format!("reject notice to {:?}", notice.to));
        Ok(())
    }
}
