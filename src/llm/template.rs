//! Prompt templates with `{name}` placeholders.
//!
//! `{{` and `}}` render as literal braces. Anything between braces that is not
//! a plain identifier is left untouched, so JSON examples in a prompt survive.

use std::collections::BTreeMap;

use crate::error::PipelineError;

/// Named values interpolated into a template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Merge `other` into `self`; keys in `other` win.
    pub fn extend(&mut self, other: Variables) {
        self.0.extend(other.0);
    }
}

/// One segment of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `text` into a template identified by `name` in error messages.
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            segments: parse(text),
        }
    }

    /// A template that renders `text` verbatim, braces included.
    pub fn literal(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            segments: vec![Segment::Literal(text.into())],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(name) = segment
                && !seen.contains(&name.as_str())
            {
                seen.push(name);
            }
        }
        seen
    }

    /// Fill every placeholder. Fails on the first variable not in `vars`.
    pub fn render(&self, vars: &Variables) -> Result<String, PipelineError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    let value = vars.get(key).ok_or_else(|| PipelineError::Template {
                        template: self.name.clone(),
                        variable: key.clone(),
                    })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some(pos) = rest.find(['{', '}']) {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            literal.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            literal.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail[1..].find('}') {
                Some(end) if is_ident(&tail[1..=end]) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder(tail[1..=end].to_string()));
                    rest = &tail[end + 2..];
                }
                _ => {
                    literal.push('{');
                    rest = &tail[1..];
                }
            }
        } else {
            literal.push('}');
            rest = &tail[1..];
        }
    }

    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders() {
        let t = PromptTemplate::new("t", "From: {from}\nBody: {body}");
        let vars = Variables::new().with("from", "a@b.com").with("body", "hi");
        assert_eq!(t.render(&vars).unwrap(), "From: a@b.com\nBody: hi");
    }

    #[test]
    fn missing_variable_is_template_error() {
        let t = PromptTemplate::new("relevancy.user", "{from} {body}");
        let vars = Variables::new().with("from", "x");
        match t.render(&vars) {
            Err(PipelineError::Template { template, variable }) => {
                assert_eq!(template, "relevancy.user");
                assert_eq!(variable, "body");
            }
            other => panic!("expected Template error, got {other:?}"),
        }
    }

    #[test]
    fn double_braces_escape() {
        let t = PromptTemplate::new("t", "{{\"decision\": \"{value}\"}}");
        let vars = Variables::new().with("value", "reply");
        assert_eq!(t.render(&vars).unwrap(), "{\"decision\": \"reply\"}");
    }

    #[test]
    fn non_identifier_braces_stay_literal() {
        let t = PromptTemplate::new("t", "json: { \"a\": 1 } and {name}");
        let vars = Variables::new().with("name", "n");
        assert_eq!(t.render(&vars).unwrap(), "json: { \"a\": 1 } and n");
    }

    #[test]
    fn placeholders_deduplicated_in_order() {
        let t = PromptTemplate::new("t", "{b} {a} {b}");
        assert_eq!(t.placeholders(), vec!["b", "a"]);
    }

    #[test]
    fn literal_template_keeps_braces() {
        let t = PromptTemplate::literal("turn", "use {input} as-is");
        assert_eq!(t.render(&Variables::new()).unwrap(), "use {input} as-is");
        assert!(t.placeholders().is_empty());
    }

    #[test]
    fn values_are_not_reinterpreted() {
        let t = PromptTemplate::new("t", "{body}");
        let vars = Variables::new().with("body", "{from}");
        assert_eq!(t.render(&vars).unwrap(), "{from}");
    }
}
