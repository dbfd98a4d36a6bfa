//! Benthos configuration rendering
//!
//! Turns a pipeline's configuration source into the canonical YAML text that
//! is written to the ConfigMap, plus a fingerprint of that text. A broken
//! inline document never fails the pass: it renders to a sentinel string so
//! the ConfigMap still shows what went wrong.

use crate::crds::{BenthosPipeline, BenthosPipelineSpec};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value as JsonValue};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Text rendered when `configInline` cannot be decoded as an object
pub const PARSING_ERROR_SENTINEL: &str = "config-parsing-error";

/// Text rendered when the decoded document cannot be encoded as YAML
pub const MARSHALING_ERROR_SENTINEL: &str = "config-marshaling-error";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("configInline could not be decoded as an object: {0}")]
    ParseFailed(String),

    #[error("configInline could not be encoded as YAML: {0}")]
    MarshalFailed(String),
}

impl RenderError {
    #[must_use]
    pub fn sentinel(&self) -> &'static str {
        match self {
            RenderError::ParseFailed(_) => PARSING_ERROR_SENTINEL,
            RenderError::MarshalFailed(_) => MARSHALING_ERROR_SENTINEL,
        }
    }
}

/// Where the rendered text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSource {
    /// `spec.config`, used verbatim
    Raw,
    /// `spec.configInline`, re-encoded as YAML
    Inline,
    /// Rendering failed; the text is the error's sentinel
    Degraded(RenderError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfig {
    pub text: String,
    pub fingerprint: String,
    pub source: RenderSource,
}

impl RenderedConfig {
    #[must_use]
    pub fn degradation(&self) -> Option<&RenderError> {
        match &self.source {
            RenderSource::Degraded(err) => Some(err),
            RenderSource::Raw | RenderSource::Inline => None,
        }
    }

    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degradation().is_some()
    }
}

#[must_use]
pub fn render(pipeline: &BenthosPipeline) -> RenderedConfig {
    render_spec(&pipeline.spec)
}

#[must_use]
pub fn render_spec(spec: &BenthosPipelineSpec) -> RenderedConfig {
    let (text, source) = match canonical_text(spec) {
        Ok(rendered) => rendered,
        Err(err) => (err.sentinel().to_string(), RenderSource::Degraded(err)),
    };

    RenderedConfig {
        fingerprint: fingerprint(&text),
        text,
        source,
    }
}

/// Base64 (standard alphabet, padded) SHA-1 of `text`
#[must_use]
pub fn fingerprint(text: &str) -> String {
    BASE64.encode(Sha1::digest(text.as_bytes()))
}

fn canonical_text(spec: &BenthosPipelineSpec) -> Result<(String, RenderSource), RenderError> {
    if !spec.config.is_empty() {
        return Ok((spec.config.clone(), RenderSource::Raw));
    }

    let document = decode_inline(spec.config_inline.as_ref())?;
    let text = serde_yaml::to_string(&canonicalize(JsonValue::Object(document)))
        .map_err(|e| RenderError::MarshalFailed(e.to_string()))?;
    Ok((text, RenderSource::Inline))
}

fn decode_inline(inline: Option<&JsonValue>) -> Result<Map<String, JsonValue>, RenderError> {
    let raw = inline.cloned().unwrap_or(JsonValue::Null);
    serde_json::from_value(raw).map_err(|e| RenderError::ParseFailed(e.to_string()))
}

/// Rebuild every mapping with sorted keys so the YAML text does not depend on
/// how the document was ordered when it was submitted.
///
/// `serde_json::Map` is a `BTreeMap` and already sorted unless some crate in
/// the build enables serde_json's `preserve_order` feature, which swaps it
/// for an insertion-ordered map. Sorting here keeps the fingerprint stable
/// in both builds.
fn canonicalize(value: JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(String, JsonValue)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            JsonValue::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        JsonValue::Array(items) => JsonValue::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(config: &str, inline: Option<JsonValue>) -> BenthosPipelineSpec {
        BenthosPipelineSpec {
            config: config.to_string(),
            config_inline: inline,
            ..Default::default()
        }
    }

    #[test]
    fn raw_config_is_used_verbatim() {
        let rendered = render_spec(&spec("x: 1\n", None));

        assert_eq!(rendered.text, "x: 1\n");
        assert_eq!(rendered.source, RenderSource::Raw);
        assert_eq!(rendered.fingerprint, fingerprint("x: 1\n"));
    }

    #[test]
    fn raw_config_wins_over_inline() {
        let rendered = render_spec(&spec(
            "input:\n  stdin: {}\n",
            Some(json!({"output": {"label": "ignored"}})),
        ));

        assert_eq!(rendered.text, "input:\n  stdin: {}\n");
        assert_eq!(rendered.source, RenderSource::Raw);
    }

    #[test]
    fn inline_config_is_encoded_with_sorted_keys() {
        let rendered = render_spec(&spec(
            "",
            Some(json!({"input": {"label": "in"}, "pipeline": {"threads": 2}})),
        ));

        assert_eq!(rendered.text, "input:\n  label: in\npipeline:\n  threads: 2\n");
        assert_eq!(rendered.source, RenderSource::Inline);
        assert!(!rendered.is_degraded());
    }

    #[test]
    fn missing_inline_renders_parsing_sentinel() {
        let rendered = render_spec(&spec("", None));

        assert_eq!(rendered.text, PARSING_ERROR_SENTINEL);
        assert!(matches!(
            rendered.degradation(),
            Some(RenderError::ParseFailed(_))
        ));
        assert_eq!(rendered.fingerprint, fingerprint(PARSING_ERROR_SENTINEL));
    }

    #[test]
    fn non_object_inline_renders_parsing_sentinel() {
        let rendered = render_spec(&spec("", Some(json!(["input", "output"]))));

        assert_eq!(rendered.text, "config-parsing-error");
        assert!(rendered.is_degraded());
    }

    #[test]
    fn sentinels_match_error_kind() {
        assert_eq!(
            RenderError::ParseFailed(String::new()).sentinel(),
            "config-parsing-error"
        );
        assert_eq!(
            RenderError::MarshalFailed(String::new()).sentinel(),
            "config-marshaling-error"
        );
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        assert_eq!(fingerprint("a: 1\n"), fingerprint("a: 1\n"));
        assert_ne!(fingerprint("a: 1\n"), fingerprint("a: 2\n"));
        // sha1("") = da39a3ee5e6b4b0d3255bfef95601890afd80709
        assert_eq!(fingerprint(""), "2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
    }

    #[test]
    fn render_is_deterministic() {
        let spec = spec(
            "",
            Some(json!({"output": {"drop": {}}, "input": {"generate": {"mapping": "root = 1"}}})),
        );

        assert_eq!(render_spec(&spec), render_spec(&spec));
    }
}
