use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Settings for how scripts are stored and how their actions are carried out.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Whether extensions must be declared with `require` before use.
    pub require_enforced: bool,
    /// Largest script text, in bytes, accepted by the script cache.
    pub max_script_size: usize,
    /// Folder used by `keep` and by the implicit keep.
    pub default_folder: String,
    /// Subject line of notices sent by `reject`.
    pub reject_subject: String,
    pub forwarding: ForwardingConfig,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ForwardingConfig {
    pub enabled: bool,
    pub mark_as_read: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            require_enforced: true,
            max_script_size: 512 * 1024,
            default_folder: "Inbox".to_owned(),
            reject_subject: "Message rejected".to_owned(),
            forwarding: ForwardingConfig::default(),
        }
    }
}

impl FilterConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// The implicit keep is delivered as already read only when the
    /// account forwards its mail and asks for forwarded mail to be marked.
    pub fn implicit_keep_read(&self) -> bool {
        self.forwarding.enabled && self.forwarding.mark_as_read
    }
}
