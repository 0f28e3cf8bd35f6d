use engine_core::{
    error::AlgorithmError,
    props::Props,
    rate_limit::{RateLimitAlgorithm, RateLimitRegistry},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pluggable algorithm selected by name, with free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub name: String,
    #[serde(default)]
    pub props: Props,
}

impl AlgorithmConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            props: Props::new(),
        }
    }

    pub fn with_prop(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    pub fn rate_limiter(&self) -> Result<Arc<dyn RateLimitAlgorithm>, AlgorithmError> {
        RateLimitRegistry::create(&self.name, &self.props)
    }
}
