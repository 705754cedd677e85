use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::config::FilterConfig;
use crate::error::{Error, Result};
use crate::exec::ScriptKind;
use crate::registry::Registry;
use crate::sema::{self, Script};

#[derive(Debug)]
struct Entry {
    source: String,
    script: Arc<Script>,
    enabled: bool,
}

/// Compiled scripts per account and layer. Readers get `Arc` handles that
/// stay valid while a script is replaced underneath them.
#[derive(Debug, Default)]
pub struct ScriptCache {
    entries: RwLock<HashMap<(String, ScriptKind), Entry>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and store a script. On failure the previous script for the
    /// layer stays in place.
    pub fn set_script(
        &self,
        account: &str,
        kind: ScriptKind,
        source: &str,
        config: &FilterConfig,
        registry: &Registry,
    ) -> Result<Arc<Script>> {
        if source.len() > config.max_script_size {
            return Err(Error::ScriptTooLarge {
                size: source.len(),
                max: config.max_script_size,
            });
        }
        let script = Arc::new(sema::compile(source, registry)?);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let enabled = entries
            .get(&(account.to_owned(), kind))
            .map_or(true, |e| e.enabled);
        tracing::debug!(account, layer = %kind, "script replaced");
        entries.insert(
            (account.to_owned(), kind),
            Entry {
                source: source.to_owned(),
                script: script.clone(),
                enabled,
            },
        );
        Ok(script)
    }

    pub fn remove_script(&self, account: &str, kind: ScriptKind) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(account.to_owned(), kind));
    }

    /// Turn a layer on or off without forgetting its script. Returns false
    /// if there is no script for the layer.
    pub fn set_enabled(&self, account: &str, kind: ScriptKind, enabled: bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(&(account.to_owned(), kind)) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable(&self, account: &str, kind: ScriptKind) -> bool {
        self.set_enabled(account, kind, true)
    }

    pub fn disable(&self, account: &str, kind: ScriptKind) -> bool {
        self.set_enabled(account, kind, false)
    }

    pub fn source(&self, account: &str, kind: ScriptKind) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(account.to_owned(), kind))
            .map(|e| e.source.clone())
    }

    /// The enabled scripts of an account in evaluation order.
    pub fn layers(&self, account: &str) -> Vec<(ScriptKind, Arc<Script>)> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        ScriptKind::ALL
            .iter()
            .filter_map(|kind| {
                entries
                    .get(&(account.to_owned(), *kind))
                    .filter(|e| e.enabled)
                    .map(|e| (*kind, e.script.clone()))
            })
            .collect()
    }
}
