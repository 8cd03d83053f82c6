use std::collections::HashMap;

/// Session variable consulted by the join planner.
pub const DISABLE_MERGE_JOIN: &str = "disable_merge_join";
/// Session variable holding hint text in the `/*+ ... */` grammar.
pub const JOIN_HINTS: &str = "join_hints";

/// Per-statement state handed to every rule.
#[derive(Clone, Debug, Default)]
pub struct Context {
    query: String,
    session_vars: HashMap<String, String>,
}

impl Context {
    pub fn new<S: Into<String>>(query: S) -> Self {
        Self {
            query: query.into(),
            session_vars: HashMap::new(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn with_session_var<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.set_session_var(name, value);
        self
    }

    pub fn set_session_var<K: Into<String>, V: Into<String>>(&mut self, name: K, value: V) {
        self.session_vars
            .insert(name.into().to_lowercase(), value.into());
    }

    pub fn session_var(&self, name: &str) -> Option<&str> {
        self.session_vars
            .get(&name.to_lowercase())
            .map(String::as_str)
    }

    /// `1`, `on` and `true` are truthy, anything else is not.
    pub fn session_flag(&self, name: &str) -> bool {
        self.session_var(name)
            .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "on" | "true"))
            .unwrap_or(false)
    }
}
