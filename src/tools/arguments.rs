//! Typed access to tool call arguments.

use crate::error::SpotterError;

/// Parsed tool call arguments (always a JSON object).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Parse the serialized argument string carried by a tool call.
    ///
    /// An empty string means "no arguments". Anything other than a JSON
    /// object is rejected.
    pub fn parse(raw: &str) -> Result<Self, SpotterError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Self::new(serde_json::json!({})));
        }
        let value: serde_json::Value = serde_json::from_str(trimmed)
            .map_err(|e| SpotterError::InvalidArgument(format!("arguments are not valid JSON: {e}")))?;
        if !value.is_object() {
            return Err(SpotterError::InvalidArgument(
                "arguments must be a JSON object".to_string(),
            ));
        }
        Ok(Self::new(value))
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, SpotterError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| SpotterError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value.get(key).and_then(|v| v.as_str())
    }

    /// Get an integer argument.
    pub fn get_i64(&self, key: &str) -> Result<i64, SpotterError> {
        self.value
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| SpotterError::InvalidArgument(format!("Missing integer argument: {key}")))
    }

    /// Get a float argument.
    pub fn get_f64(&self, key: &str) -> Result<f64, SpotterError> {
        self.value
            .get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| SpotterError::InvalidArgument(format!("Missing float argument: {key}")))
    }

    /// Get a boolean argument.
    pub fn get_bool(&self, key: &str) -> Result<bool, SpotterError> {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .ok_or_else(|| SpotterError::InvalidArgument(format!("Missing boolean argument: {key}")))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, SpotterError> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            SpotterError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_means_no_arguments() {
        let args = ToolArguments::parse("  ").unwrap();
        assert_eq!(args.raw(), &serde_json::json!({}));
    }

    #[test]
    fn rejects_non_objects_and_bad_json() {
        assert!(matches!(
            ToolArguments::parse("[1, 2]"),
            Err(SpotterError::InvalidArgument(_))
        ));
        assert!(matches!(
            ToolArguments::parse("{\"weight\": "),
            Err(SpotterError::InvalidArgument(_))
        ));
    }

    #[test]
    fn typed_getters() {
        let args = ToolArguments::parse(r#"{"exercise": "squat", "weight": 140.5, "reps": 3, "pr": true}"#)
            .unwrap();
        assert_eq!(args.get_str("exercise").unwrap(), "squat");
        assert_eq!(args.get_f64("weight").unwrap(), 140.5);
        assert_eq!(args.get_i64("reps").unwrap(), 3);
        assert!(args.get_bool("pr").unwrap());
        assert_eq!(args.get_str_opt("notes"), None);
        assert!(args.get_str("notes").is_err());
    }

    #[test]
    fn deserializes_into_structs() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct OneRepMax {
            weight: f64,
            reps: u32,
        }

        let args = ToolArguments::parse(r#"{"weight": 100, "reps": 5}"#).unwrap();
        let parsed: OneRepMax = args.deserialize().unwrap();
        assert_eq!(parsed, OneRepMax { weight: 100.0, reps: 5 });
    }
}
