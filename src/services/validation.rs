use crate::constants::network::SSH_DEFAULT_PORT;
use crate::errors::ToolError;
use serde_json::Value;

#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(&self, value: Option<&Value>, label: &str) -> Result<String, ToolError> {
        let text = value
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::config(format!("{} must be a non-empty string", label)))?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ToolError::config(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        Ok(trimmed.to_string())
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<String>, ToolError> {
        match value {
            None => Ok(None),
            Some(val) if val.is_null() => Ok(None),
            Some(val) => self.ensure_string(Some(val), label).map(Some),
        }
    }

    pub fn ensure_port(&self, value: Option<&Value>) -> Result<u16, ToolError> {
        let Some(value) = value else {
            return Ok(SSH_DEFAULT_PORT);
        };
        if value.is_null() {
            return Ok(SSH_DEFAULT_PORT);
        }
        let numeric = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
            .ok_or_else(|| ToolError::config("port must be an integer between 1 and 65535"))?;
        if !(1..=65_535).contains(&numeric) {
            return Err(ToolError::config("port must be an integer between 1 and 65535"));
        }
        Ok(numeric as u16)
    }

    pub fn ensure_bool(&self, value: Option<&Value>, fallback: bool) -> bool {
        value.and_then(|v| v.as_bool()).unwrap_or(fallback)
    }

    pub fn ensure_positive_int(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<u64>, ToolError> {
        let Some(value) = value else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        let numeric = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.parse::<i64>().ok()))
            .ok_or_else(|| ToolError::config(format!("{} must be a positive integer", label)))?;
        if numeric <= 0 {
            return Err(ToolError::config(format!(
                "{} must be a positive integer",
                label
            )));
        }
        Ok(Some(numeric as u64))
    }

    pub fn ensure_regex(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<regex::Regex>, ToolError> {
        let Some(pattern) = self.ensure_optional_string(value, label)? else {
            return Ok(None);
        };
        regex::Regex::new(&pattern)
            .map(Some)
            .map_err(|err| ToolError::config(format!("{} is not a valid regex: {}", label, err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_string_rejects_blank() {
        let v = Validation::new();
        assert!(v.ensure_string(Some(&json!("  ")), "host").is_err());
        assert!(v.ensure_string(None, "host").is_err());
        assert_eq!(v.ensure_string(Some(&json!(" h1 ")), "host").unwrap(), "h1");
    }

    #[test]
    fn ensure_port_defaults_and_bounds() {
        let v = Validation::new();
        assert_eq!(v.ensure_port(None).unwrap(), 22);
        assert_eq!(v.ensure_port(Some(&json!(2222))).unwrap(), 2222);
        assert_eq!(v.ensure_port(Some(&json!("2022"))).unwrap(), 2022);
        assert!(v.ensure_port(Some(&json!(0))).is_err());
        assert!(v.ensure_port(Some(&json!(70_000))).is_err());
    }

    #[test]
    fn ensure_positive_int_parses_strings() {
        let v = Validation::new();
        assert_eq!(
            v.ensure_positive_int(Some(&json!("120")), "timeout").unwrap(),
            Some(120)
        );
        assert!(v.ensure_positive_int(Some(&json!(-1)), "timeout").is_err());
        assert_eq!(v.ensure_positive_int(None, "timeout").unwrap(), None);
    }

    #[test]
    fn ensure_regex_surfaces_bad_patterns() {
        let v = Validation::new();
        assert!(v.ensure_regex(Some(&json!("[")), "filter_pattern").is_err());
        assert!(v
            .ensure_regex(Some(&json!("\\.conf$")), "filter_pattern")
            .unwrap()
            .is_some());
    }
}
