//! `{name}` path patterns compiled to anchored regexes.

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::BridgeError;

/// A compiled path pattern such as `/tools/{tool_id}/presets/{preset}`.
///
/// Each placeholder matches one non-empty path segment. Literal text is
/// matched exactly.
#[derive(Debug, Clone)]
pub struct RoutePattern {
    raw: String,
    regex: Regex,
    params: Vec<String>,
}

impl RoutePattern {
    pub fn compile(raw: &str) -> Result<Self, BridgeError> {
        let fail = |reason: String| BridgeError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };

        if !raw.starts_with('/') {
            return Err(fail("pattern must start with '/'".to_string()));
        }

        let mut source = String::from("^");
        let mut params: Vec<String> = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        match c {
                            '}' => {
                                closed = true;
                                break;
                            }
                            '{' => return Err(fail("nested '{'".to_string())),
                            _ => name.push(c),
                        }
                    }
                    if !closed {
                        return Err(fail(format!("unclosed placeholder '{{{name}'")));
                    }
                    if !is_identifier(&name) {
                        return Err(fail(format!("invalid placeholder name '{name}'")));
                    }
                    if params.contains(&name) {
                        return Err(fail(format!("duplicate placeholder '{name}'")));
                    }
                    source.push_str(&regex::escape(&literal));
                    literal.clear();
                    source.push_str(&format!("(?P<{name}>[^/]+)"));
                    params.push(name);
                }
                '}' => return Err(fail("unmatched '}'".to_string())),
                _ => literal.push(c),
            }
        }
        source.push_str(&regex::escape(&literal));
        source.push('$');

        let regex = Regex::new(&source).map_err(|e| fail(e.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            regex,
            params,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Placeholder values when `path` matches, as JSON strings.
    pub fn captures(&self, path: &str) -> Option<Map<String, Value>> {
        let caps = self.regex.captures(path)?;
        let mut out = Map::new();
        for name in &self.params {
            if let Some(m) = caps.name(name) {
                out.insert(name.clone(), Value::String(m.as_str().to_string()));
            }
        }
        Some(out)
    }

    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn placeholders_capture_single_segments() {
        let p = RoutePattern::compile("/tools/{tool_id}").unwrap();
        let caps = p.captures("/tools/abc123").unwrap();
        assert_eq!(caps["tool_id"], "abc123");
        assert_eq!(p.params(), ["tool_id".to_string()]);

        assert!(p.captures("/tools/abc/def").is_none());
        assert!(p.captures("/tools/").is_none());
        assert!(p.captures("/tools").is_none());
    }

    #[test]
    fn literal_text_is_escaped() {
        let p = RoutePattern::compile("/export/model.step").unwrap();
        assert!(p.is_match("/export/model.step"));
        assert!(!p.is_match("/export/modelxstep"));
    }

    #[test]
    fn several_placeholders() {
        let p = RoutePattern::compile("/setups/{setup}/operations/{op_id}").unwrap();
        let caps = p.captures("/setups/S1/operations/42").unwrap();
        assert_eq!(caps["setup"], "S1");
        assert_eq!(caps["op_id"], "42");
    }

    #[rstest]
    #[case("tools")]
    #[case("/tools/{")]
    #[case("/tools/{id")]
    #[case("/tools/id}")]
    #[case("/tools/{}")]
    #[case("/tools/{1st}")]
    #[case("/tools/{a-b}")]
    #[case("/tools/{id}/{id}")]
    #[case("/tools/{a{b}}")]
    fn invalid_patterns_are_rejected(#[case] raw: &str) {
        let err = RoutePattern::compile(raw).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPattern { .. }), "{raw}: {err}");
    }
}
