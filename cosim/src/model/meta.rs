use serde::Serialize;
use std::collections::BTreeMap;

pub const API_VERSION: &str = "2.4";

/// Creation parameters of an entity: the two end points of its connection.
pub const PARAMS: [&str; 2] = ["src", "dst"];

/// Attributes of an entity: the value and its time.
pub const ATTRS: [&str; 2] = ["v", "t"];

/// Description of the simulator, returned by `init`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
    pub api_version: &'static str,
    pub models: BTreeMap<String, ModelMeta>,
    pub extra_methods: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMeta {
    pub public: bool,
    pub params: Vec<&'static str>,
    pub attrs: Vec<&'static str>,
}

impl Meta {
    pub fn new(model_name: &str) -> Self {
        let model = ModelMeta {
            public: true,
            params: PARAMS.to_vec(),
            attrs: ATTRS.to_vec(),
        };

        Self {
            api_version: API_VERSION,
            models: BTreeMap::from([(model_name.to_owned(), model)]),
            extra_methods: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serialize() {
        let meta = serde_json::to_value(Meta::new("Transporter")).unwrap();

        assert_eq!(
            meta,
            json!({
                "api_version": "2.4",
                "models": {
                    "Transporter": {
                        "public": true,
                        "params": ["src", "dst"],
                        "attrs": ["v", "t"],
                    }
                },
                "extra_methods": [],
            })
        );
    }
}
