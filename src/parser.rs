//! Default response parser: best-effort JSON extraction with text
//! pass-through.

use crate::traits::ResponseParser;
use crate::types::ParsedResponse;

/// Parses raw model output into structured JSON when possible.
///
/// Models frequently wrap JSON in a markdown code fence; the fence is
/// stripped before the decode attempt. Anything that still fails to decode
/// is returned verbatim as text. This parser never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultParser;

impl ResponseParser for DefaultParser {
    fn parse(&self, raw: &str) -> ParsedResponse {
        let candidate = strip_code_fence(raw.trim());
        match serde_json::from_str::<serde_json::Value>(candidate) {
            Ok(value) if value.is_object() || value.is_array() => ParsedResponse::Json(value),
            _ => ParsedResponse::Text(raw.to_string()),
        }
    }
}

/// Remove a surrounding ```…``` fence, with or without a language tag.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the language tag on the opening fence line, if any.
    match body.split_once('\n') {
        Some((first_line, remainder)) if !first_line.contains('{') && !first_line.contains('[') => {
            remainder.trim()
        }
        _ => body.trim(),
    }
}
