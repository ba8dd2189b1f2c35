use crate::constants::shaping::TOKEN_BYTES;
use crate::errors::ToolError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static SENTINEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\.\.\. \[truncated \d+ of \d+ bytes\]$").expect("sentinel"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeMode {
    Full,
    Filter,
    Truncate,
}

impl ShapeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ShapeMode::Full => "full",
            ShapeMode::Filter => "filter",
            ShapeMode::Truncate => "truncate",
        }
    }
}

/// The deterministic transform applied to raw output before it crosses the
/// stdio boundary. Part of the cache key: a hit must be byte-identical to a
/// fresh execution shaped the same way.
#[derive(Debug, Clone)]
pub struct ShapeSpec {
    pub mode: ShapeMode,
    pub filter_pattern: Option<String>,
    pub max_tokens: Option<usize>,
}

impl ShapeSpec {
    pub fn full() -> Self {
        Self {
            mode: ShapeMode::Full,
            filter_pattern: None,
            max_tokens: None,
        }
    }

    pub fn truncate(max_tokens: usize) -> Self {
        Self {
            mode: ShapeMode::Truncate,
            filter_pattern: None,
            max_tokens: Some(max_tokens),
        }
    }

    pub fn from_args(args: &Value) -> Result<Self, ToolError> {
        let mode = match args.get("token_mode").and_then(|v| v.as_str()) {
            None | Some("full") => ShapeMode::Full,
            Some("filter") => ShapeMode::Filter,
            Some("truncate") => ShapeMode::Truncate,
            Some(other) => {
                return Err(ToolError::config(format!(
                    "token_mode must be one of full, filter, truncate (got {:?})",
                    other
                )))
            }
        };
        let filter_pattern = args
            .get("filter_pattern")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let max_tokens = args
            .get("max_tokens")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);

        let spec = Self {
            mode,
            filter_pattern,
            max_tokens,
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<(), ToolError> {
        match self.mode {
            ShapeMode::Filter => {
                let pattern = self
                    .filter_pattern
                    .as_deref()
                    .ok_or_else(|| ToolError::config("filter_pattern is required for token_mode=filter"))?;
                Regex::new(pattern).map_err(|err| {
                    ToolError::config(format!("filter_pattern is not a valid regex: {}", err))
                })?;
            }
            ShapeMode::Truncate => {
                if self.max_tokens.is_none() {
                    return Err(ToolError::config(
                        "max_tokens is required for token_mode=truncate",
                    ));
                }
            }
            ShapeMode::Full => {}
        }
        Ok(())
    }

    /// Canonical form folded into the result-cache key.
    pub fn cache_fragment(&self) -> Value {
        serde_json::json!({
            "mode": self.mode.as_str(),
            "filter_pattern": self.filter_pattern,
            "max_tokens": self.max_tokens,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ShapedText {
    pub text: String,
    pub truncated: bool,
    pub token_estimate: usize,
}

/// 4 bytes of UTF-8 approximate one token; used only for output budgeting.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(TOKEN_BYTES)
}

pub fn shape(text: &str, spec: &ShapeSpec) -> Result<ShapedText, ToolError> {
    spec.validate()?;
    match spec.mode {
        ShapeMode::Full => Ok(ShapedText {
            text: text.to_string(),
            truncated: false,
            token_estimate: estimate_tokens(text),
        }),
        ShapeMode::Filter => {
            let pattern = spec.filter_pattern.as_deref().unwrap_or_default();
            let re = Regex::new(pattern)
                .map_err(|err| ToolError::config(format!("filter_pattern is not a valid regex: {}", err)))?;
            let filtered: Vec<&str> = text.lines().filter(|line| re.is_match(line)).collect();
            let joined = filtered.join("\n");
            let token_estimate = estimate_tokens(&joined);
            Ok(ShapedText {
                text: joined,
                truncated: false,
                token_estimate,
            })
        }
        ShapeMode::Truncate => {
            let max_tokens = spec.max_tokens.unwrap_or_default();
            Ok(truncate_to_tokens(text, max_tokens))
        }
    }
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> ShapedText {
    let budget = max_tokens.saturating_mul(TOKEN_BYTES);
    if text.len() <= budget {
        return ShapedText {
            text: text.to_string(),
            truncated: false,
            token_estimate: estimate_tokens(text),
        };
    }

    // Re-shaping already-truncated output is a no-op as long as the body
    // before the sentinel still fits the budget.
    if let Some(found) = SENTINEL.find_iter(text).last() {
        if found.end() == text.len() {
            let body = &text[..found.start()];
            let body = body.strip_suffix('\n').unwrap_or(body);
            if body.len() <= budget {
                return ShapedText {
                    text: text.to_string(),
                    truncated: true,
                    token_estimate: estimate_tokens(text),
                };
            }
        }
    }

    let cut = floor_char_boundary(text, budget);
    let kept = &text[..cut];
    let dropped = text.len() - kept.len();
    let sentinel = format!("... [truncated {} of {} bytes]", dropped, text.len());
    let shaped = if kept.is_empty() {
        sentinel
    } else {
        format!("{}\n{}", kept, sentinel)
    };
    let token_estimate = estimate_tokens(&shaped);
    ShapedText {
        text: shaped,
        truncated: true,
        token_estimate,
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_mode_is_passthrough() {
        let out = shape("a\nb\nc", &ShapeSpec::full()).unwrap();
        assert_eq!(out.text, "a\nb\nc");
        assert!(!out.truncated);
    }

    #[test]
    fn filter_keeps_matching_lines_in_order() {
        let spec = ShapeSpec {
            mode: ShapeMode::Filter,
            filter_pattern: Some("err".to_string()),
            max_tokens: None,
        };
        let out = shape("ok 1\nerr 1\nok 2\nerr 2", &spec).unwrap();
        assert_eq!(out.text, "err 1\nerr 2");
    }

    #[test]
    fn filter_without_pattern_is_config_error() {
        let spec = ShapeSpec {
            mode: ShapeMode::Filter,
            filter_pattern: None,
            max_tokens: None,
        };
        assert!(shape("x", &spec).is_err());
    }

    #[test]
    fn truncate_respects_token_budget() {
        let input = "x".repeat(1000);
        let out = shape(&input, &ShapeSpec::truncate(10)).unwrap();
        assert!(out.truncated);
        let sentinel_len = "... [truncated 960 of 1000 bytes]".len();
        // budget bytes + newline + sentinel line
        assert!(out.text.len() <= 10 * TOKEN_BYTES + 1 + sentinel_len);
        assert!(out.text.contains("[truncated 960 of 1000 bytes]"));
    }

    #[test]
    fn truncate_below_budget_is_identity() {
        let out = shape("short", &ShapeSpec::truncate(100)).unwrap();
        assert_eq!(out.text, "short");
        assert!(!out.truncated);
    }

    #[test]
    fn truncate_is_idempotent() {
        let input = "line\n".repeat(500);
        let spec = ShapeSpec::truncate(25);
        let once = shape(&input, &spec).unwrap();
        let twice = shape(&once.text, &spec).unwrap();
        assert_eq!(once.text, twice.text);
        assert!(twice.truncated);
    }

    #[test]
    fn truncate_cuts_on_char_boundaries() {
        let input = "héllo wörld ".repeat(100);
        let out = shape(&input, &ShapeSpec::truncate(5)).unwrap();
        assert!(out.truncated);
        // must be valid UTF-8 by construction; also bounded
        assert!(out.text.len() < input.len());
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn spec_from_args_validates_mode() {
        assert!(ShapeSpec::from_args(&json!({"token_mode": "truncate"})).is_err());
        assert!(ShapeSpec::from_args(&json!({"token_mode": "filter"})).is_err());
        assert!(ShapeSpec::from_args(&json!({"token_mode": "sideways"})).is_err());
        let spec =
            ShapeSpec::from_args(&json!({"token_mode": "truncate", "max_tokens": 80})).unwrap();
        assert_eq!(spec.max_tokens, Some(80));
    }

    #[test]
    fn shaping_is_deterministic() {
        let input = "z".repeat(333);
        let spec = ShapeSpec::truncate(7);
        assert_eq!(shape(&input, &spec).unwrap().text, shape(&input, &spec).unwrap().text);
    }
}
