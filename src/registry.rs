use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::email::{Envelope, MessageSource};
use crate::error::Result;
use crate::sema::Value;

/// What a custom test can see while it is evaluated.
pub struct CustomContext<'a> {
    pub message: &'a dyn MessageSource,
    pub envelope: Option<&'a Envelope>,
}

/// A test implemented outside the engine, such as an address-book lookup.
pub trait CustomTest: Send + Sync {
    /// Check the arguments once, when a script using the test is compiled.
    fn validate(&self, _args: &[Value]) -> anyhow::Result<()> {
        Ok(())
    }

    /// Evaluate against a message. Arguments have had `${...}` expanded.
    fn evaluate(&self, args: &[Value], ctx: &CustomContext<'_>) -> Result<bool>;
}

/// Custom tests known to the engine, looked up by name. Shared read-only
/// by every evaluation.
#[derive(Clone, Default)]
pub struct Registry {
    tests: HashMap<String, Arc<dyn CustomTest>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.tests.keys().collect();
        names.sort();
        f.debug_struct("Registry").field("tests", &names).finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_test(&mut self, name: &str, test: Arc<dyn CustomTest>) {
        self.tests.insert(name.to_ascii_lowercase(), test);
    }

    pub fn with_test(mut self, name: &str, test: Arc<dyn CustomTest>) -> Self {
        self.register_test(name, test);
        self
    }

    pub fn test(&self, name: &str) -> Option<&Arc<dyn CustomTest>> {
        self.tests.get(&name.to_ascii_lowercase())
    }

    /// Registered names double as capabilities a script may `require`.
    pub fn knows_capability(&self, capability: &str) -> bool {
        self.tests.contains_key(&capability.to_ascii_lowercase())
    }
}
