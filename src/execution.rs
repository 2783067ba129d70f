//! Execution context passed to connections
//!
//! Identifies the unit of work on whose behalf requests run: who is acting,
//! under which process id, with any caller-supplied data. Every `Changes`
//! batch is tagged from it.

use std::collections::BTreeMap;
use uuid::Uuid;

/// Actor used when a caller does not name one
pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    id: Uuid,
    process_id: String,
    user: String,
    data: BTreeMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        ExecutionContext {
            id,
            process_id: id.to_string(),
            user: ANONYMOUS_USER.to_string(),
            data: BTreeMap::new(),
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_process_id(mut self, process_id: impl Into<String>) -> Self {
        self.process_id = process_id.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
