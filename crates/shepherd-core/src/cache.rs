//! Process-lifetime memo for near-static tracker lookups.
//!
//! Only metadata that does not change while the supervisor runs belongs
//! here: custom field name to id mappings and user lookups. Entity state
//! (statuses, labels, rules) is never cached.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
pub struct LookupCache {
    fields: RefCell<Option<BTreeMap<String, String>>>,
    users: RefCell<HashMap<String, Option<String>>>,
}

impl LookupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of the custom field called `name`, loading the whole map on first use.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; nothing is cached in that case.
    pub fn field_id(
        &self,
        name: &str,
        load: impl FnOnce() -> Result<BTreeMap<String, String>>,
    ) -> Result<Option<String>> {
        if self.fields.borrow().is_none() {
            let loaded = load()?;
            *self.fields.borrow_mut() = Some(loaded);
        }
        Ok(self
            .fields
            .borrow()
            .as_ref()
            .and_then(|fields| fields.get(name).cloned()))
    }

    /// Account id for a user query, remembering misses too.
    ///
    /// # Errors
    ///
    /// Returns the loader's error; nothing is cached in that case.
    pub fn user(
        &self,
        query: &str,
        load: impl FnOnce() -> Result<Option<String>>,
    ) -> Result<Option<String>> {
        if let Some(hit) = self.users.borrow().get(query) {
            return Ok(hit.clone());
        }
        let found = load()?;
        self.users
            .borrow_mut()
            .insert(query.to_string(), found.clone());
        Ok(found)
    }
}
