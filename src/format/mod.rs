// Format codecs - encode/decode a document's field map to file contents

use crate::error::{Result, ShelfDbError};
use serde_json::{Map, Value};

/// On-disk encoding for documents in a repository.
///
/// Markdown files carry a YAML frontmatter block between `---` fences; the
/// text after the closing fence is stored under `content_field` as a regular
/// string field, so queries and indexes see it like any other field.
#[derive(Debug, Clone, PartialEq)]
pub enum Format {
    Json,
    Yaml,
    Markdown { content_field: String },
}

impl Default for Format {
    fn default() -> Self {
        Format::Json
    }
}

impl Format {
    /// Markdown with the body stored under the default `body` field.
    pub fn markdown() -> Self {
        Format::Markdown {
            content_field: "body".to_string(),
        }
    }

    /// File extension for this format, without the leading dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Yaml => "yaml",
            Format::Markdown { .. } => "md",
        }
    }

    /// Encode a field map into file contents.
    pub fn encode(&self, fields: &Map<String, Value>) -> Result<String> {
        match self {
            Format::Json => Ok(serde_json::to_string_pretty(fields)?),
            Format::Yaml => Ok(serde_yaml::to_string(fields)?),
            Format::Markdown { content_field } => {
                let mut front = fields.clone();
                let body = match front.remove(content_field) {
                    Some(Value::String(s)) => s,
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };

                let mut out = String::from("---\n");
                out.push_str(&serde_yaml::to_string(&front)?);
                out.push_str("---\n");
                out.push_str(&body);
                Ok(out)
            }
        }
    }

    /// Decode file contents into a field map.
    pub fn decode(&self, raw: &str) -> Result<Map<String, Value>> {
        match self {
            Format::Json => Ok(serde_json::from_str(raw)?),
            Format::Yaml => Ok(serde_yaml::from_str(raw)?),
            Format::Markdown { content_field } => {
                let (front, body) = split_frontmatter(raw).ok_or_else(|| {
                    ShelfDbError::InvalidArgument(
                        "markdown document is missing a frontmatter block".to_string(),
                    )
                })?;

                let mut fields: Map<String, Value> = if front.trim().is_empty() {
                    Map::new()
                } else {
                    serde_yaml::from_str(front)?
                };
                fields.insert(content_field.clone(), Value::String(body.to_string()));
                Ok(fields)
            }
        }
    }
}

/// Split `---\n<yaml>\n---\n<body>` into the frontmatter and body slices.
fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("---\n").or_else(|| {
        raw.strip_prefix("---\r\n")
    })?;

    if let Some(stripped) = rest.strip_prefix("---\n") {
        // Empty frontmatter block.
        return Some(("", stripped));
    }
    if let Some(idx) = rest.find("\n---\n") {
        return Some((&rest[..idx + 1], &rest[idx + 5..]));
    }
    if let Some(front) = rest.strip_suffix("\n---") {
        return Some((front, ""));
    }
    None
}
