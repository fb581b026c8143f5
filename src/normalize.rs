//! Best-effort cleanup of raw tool output.
//!
//! Many tools answer with one multi-line string that embeds a YAML block
//! starting with `- names:`. When that block parses, callers get the parsed
//! structure instead of the text. Anything else passes through.

use serde_json::Value;
use tracing::debug;

/// Marker that opens the embedded YAML block.
pub const STRUCTURED_MARKER: &str = "- names:";

/// Reinterpret `raw` as structured data where possible.
///
/// Non-strings and single-line strings are returned unchanged. A multi-line
/// string is searched for [`STRUCTURED_MARKER`]; the text from the marker on
/// is parsed as YAML and returned on success, otherwise the string is
/// returned as-is.
pub fn normalize(raw: Value) -> Value {
    let text = match raw {
        Value::String(text) if text.contains('\n') => text,
        other => return other,
    };

    let Some(start) = text.find(STRUCTURED_MARKER) else {
        return Value::String(text);
    };

    match parse_block(&text[start..]) {
        Some(parsed) => parsed,
        None => Value::String(text),
    }
}

fn parse_block(block: &str) -> Option<Value> {
    let yaml: serde_yaml::Value = match serde_yaml::from_str(block) {
        Ok(yaml) => yaml,
        Err(e) => {
            debug!("Tool output block is not valid YAML: {e}");
            return None;
        }
    };

    // Mappings with non-string keys have no JSON form.
    match serde_json::to_value(yaml) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Tool output block has no JSON representation: {e}");
            None
        }
    }
}
