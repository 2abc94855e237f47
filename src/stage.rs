//! A single named node in a crawler's pipeline graph.
//!
//! A [`Stage`] is identity plus routing: it names the handler that does the
//! work and maps the handler's output labels to downstream stage names.
//! Stages are owned exclusively by their crawler and have no lifecycle of
//! their own.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::types::StageName;

/// One processing step in a pipeline, bound to a handler by id.
#[derive(Clone, Debug, PartialEq)]
pub struct Stage {
    name: StageName,
    handler: String,
    handle: FxHashMap<String, StageName>,
    params: FxHashMap<String, Value>,
}

impl Stage {
    pub(crate) fn new(
        name: StageName,
        handler: String,
        handle: FxHashMap<String, StageName>,
        params: FxHashMap<String, Value>,
    ) -> Self {
        Self {
            name,
            handler,
            handle,
            params,
        }
    }

    #[must_use]
    pub fn name(&self) -> &StageName {
        &self.name
    }

    /// Id of the handler capability this stage invokes, resolved from the
    /// process-wide [`HandlerRegistry`](crate::handler::HandlerRegistry).
    #[must_use]
    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// Resolve an output label to the downstream stage it routes to.
    #[must_use]
    pub fn resolve(&self, label: &str) -> Option<&StageName> {
        self.handle.get(label)
    }

    /// The full routing table.
    #[must_use]
    pub fn routes(&self) -> &FxHashMap<String, StageName> {
        &self.handle
    }

    /// Free-form stage parameters, passed through to the handler.
    #[must_use]
    pub fn params(&self) -> &FxHashMap<String, Value> {
        &self.params
    }

    /// A single stage parameter by key.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch_stage() -> Stage {
        let mut handle = FxHashMap::default();
        handle.insert("parse".to_string(), StageName::from("parse"));
        let mut params = FxHashMap::default();
        params.insert("retries".to_string(), serde_json::json!(3));
        Stage::new(StageName::from("fetch"), "http_get".to_string(), handle, params)
    }

    #[test]
    fn resolves_known_labels() {
        let stage = fetch_stage();
        assert_eq!(stage.resolve("parse"), Some(&StageName::from("parse")));
        assert_eq!(stage.resolve("store"), None);
    }

    #[test]
    fn exposes_handler_and_params() {
        let stage = fetch_stage();
        assert_eq!(stage.handler(), "http_get");
        assert_eq!(stage.param("retries"), Some(&serde_json::json!(3)));
    }
}
