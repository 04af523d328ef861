use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A campaign recipient: a free-form field map from a CSV row or request
/// body. `phone` is the only field with meaning to the dispatcher; the rest
/// feed template personalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Contact {
    pub fields: HashMap<String, String>,
}

impl Contact {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn phone(&self) -> Option<&str> {
        self.fields.get("phone").map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Contact {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}
