use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::savecompat_export;

/// Maps obsolete entity references to the identity they now resolve to.
///
/// The host owns one table per load and consults it whenever it resolves a cross-reference
/// that was written before the entity's category was corrected.
#[derive(Debug, Default, uniffi::Object)]
pub struct AliasTable {
    aliases: Mutex<HashMap<String, String>>,
}

#[savecompat_export]
impl AliasTable {
    /// Creates an empty table.
    #[uniffi::constructor]
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers `alias` as another name for `target`.
    ///
    /// Self-aliases and empty references are ignored. An alias that is already registered
    /// keeps its first target. Returns `true` if the table changed.
    pub fn add_alias(&self, alias: String, target: String) -> bool {
        if alias.is_empty() || target.is_empty() || alias == target {
            return false;
        }
        let mut aliases = self.lock();
        if let Some(existing) = aliases.get(&alias) {
            if *existing != target {
                crate::warn!(
                    "alias.conflict alias={} kept={} ignored={}",
                    alias,
                    existing,
                    target
                );
            }
            return false;
        }
        crate::debug!("alias.added alias={} target={}", alias, target);
        aliases.insert(alias, target);
        true
    }

    /// Follows the alias chain starting at `reference` and returns its final target.
    ///
    /// A reference with no alias resolves to itself. Cycles stop at the last reference
    /// before the walk would revisit one.
    #[must_use]
    pub fn resolve(&self, reference: String) -> String {
        let aliases = self.lock();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = reference.as_str();
        visited.insert(current);

        while let Some(next) = aliases.get(current) {
            if !visited.insert(next.as_str()) {
                crate::warn!("alias.cycle reference={} stopped_at={}", reference, current);
                break;
            }
            current = next.as_str();
        }
        current.to_string()
    }

    /// Number of registered aliases.
    #[must_use]
    pub fn len(&self) -> u32 {
        u32::try_from(self.lock().len()).unwrap_or(u32::MAX)
    }

    /// Whether no alias is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl AliasTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.aliases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
