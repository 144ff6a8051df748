use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::AdapterError;
use crate::schedule::types::Parameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Bool => value.is_boolean(),
        }
    }
}

/// One declared option of an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

impl ParameterSchema {
    pub fn optional(name: &str, param_type: ParamType, default: Value, group: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: false,
            default: Some(default),
            group: group.to_string(),
            description: String::new(),
            options: None,
        }
    }

    pub fn required(name: &str, param_type: ParamType, group: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type,
            required: true,
            default: None,
            group: group.to_string(),
            description: String::new(),
            options: None,
        }
    }

    /// Optional with no default: absent means "let the backend decide".
    pub fn unset(name: &str, param_type: ParamType, group: &str) -> Self {
        Self {
            default: None,
            ..Self::optional(name, param_type, Value::Null, group)
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn one_of(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }
}

/// Checks `params` against `schema`. Unknown keys are tolerated; `null` counts as absent.
pub fn validate(schema: &[ParameterSchema], params: &Parameters) -> Result<(), AdapterError> {
    for param in schema {
        let value = match params.get(&param.name) {
            Some(Value::Null) | None => {
                if param.required {
                    return Err(AdapterError::InvalidParameters(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                continue;
            }
            Some(value) => value,
        };

        if !param.param_type.accepts(value) {
            return Err(AdapterError::InvalidParameters(format!(
                "parameter '{}' must be of type {:?}, got {}",
                param.name, param.param_type, value
            )));
        }

        if let (Some(options), Some(s)) = (&param.options, value.as_str()) {
            if !options.iter().any(|o| o == s) {
                return Err(AdapterError::InvalidParameters(format!(
                    "parameter '{}' must be one of {:?}, got '{}'",
                    param.name, options, s
                )));
            }
        }
    }

    for key in params.keys() {
        if !schema.iter().any(|p| &p.name == key) {
            debug!("Ignoring undeclared parameter '{}'", key);
        }
    }

    Ok(())
}

/// Copy of `params` with every absent optional parameter set to its default.
pub fn apply_defaults(schema: &[ParameterSchema], params: &Parameters) -> Parameters {
    let mut merged = params.clone();
    for param in schema {
        let absent = matches!(merged.get(&param.name), None | Some(Value::Null));
        if let (true, Some(default)) = (absent, &param.default) {
            merged.insert(param.name.clone(), default.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Vec<ParameterSchema> {
        vec![
            ParameterSchema::required("model", ParamType::String, "basic").one_of(&["small", "large-v3"]),
            ParameterSchema::optional("batch_size", ParamType::Int, json!(16), "quality"),
            ParameterSchema::optional("temperature", ParamType::Float, json!(0.0), "quality"),
            ParameterSchema::optional("diarize", ParamType::Bool, json!(false), "diarization"),
            ParameterSchema::unset("language", ParamType::String, "basic"),
        ]
    }

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_missing_required_parameter_rejected() {
        let err = validate(&schema(), &params(json!({"batch_size": 8}))).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidParameters(ref m) if m.contains("model")));

        let err = validate(&schema(), &params(json!({"model": null}))).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidParameters(_)));
    }

    #[test]
    fn test_only_defaulted_optionals_accepted() {
        let input = params(json!({"model": "small"}));
        let with_defaults = apply_defaults(&schema(), &input);

        validate(&schema(), &input).unwrap();
        validate(&schema(), &with_defaults).unwrap();
        assert_eq!(with_defaults["batch_size"], json!(16));
        assert_eq!(with_defaults["diarize"], json!(false));
        assert!(!with_defaults.contains_key("language"));
    }

    #[test]
    fn test_mistyped_parameter_rejected() {
        for bad in [
            json!({"model": "small", "batch_size": "eight"}),
            json!({"model": "small", "batch_size": 1.5}),
            json!({"model": "small", "diarize": "yes"}),
            json!({"model": 3}),
        ] {
            assert!(validate(&schema(), &params(bad.clone())).is_err(), "{}", bad);
        }
        // integers are valid floats
        validate(&schema(), &params(json!({"model": "small", "temperature": 1}))).unwrap();
    }

    #[test]
    fn test_value_outside_options_rejected() {
        let err = validate(&schema(), &params(json!({"model": "gigantic"}))).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidParameters(ref m) if m.contains("gigantic")));
    }

    #[test]
    fn test_unknown_keys_tolerated() {
        validate(&schema(), &params(json!({"model": "small", "audio_base64": "AAAA"}))).unwrap();
    }

    #[test]
    fn test_defaults_do_not_override_given_values() {
        let merged = apply_defaults(&schema(), &params(json!({"model": "small", "batch_size": 4})));
        assert_eq!(merged["batch_size"], json!(4));
    }
}
