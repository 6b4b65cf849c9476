//! Small utility helpers used across modules.

use rand::RngCore;

/// Number of random bytes behind an anonymous scenario-session token.
pub const SESSION_TOKEN_BYTES: usize = 16;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// Substituted values are never re-scanned for placeholders; unknown
/// placeholders are left as written.
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = String::with_capacity(tpl.len());
  let mut rest = tpl;
  while let Some(open) = rest.find('{') {
    out.push_str(&rest[..open]);
    let after = &rest[open + 1..];
    let hit = after.find('}').and_then(|close| {
      let key = &after[..close];
      pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| (close, *v))
    });
    match hit {
      Some((close, value)) => {
        out.push_str(value);
        rest = &after[close + 1..];
      }
      None => {
        out.push('{');
        rest = after;
      }
    }
  }
  out.push_str(rest);
  out
}

/// Fresh opaque session token: random bytes, lower-case hex.
pub fn random_hex_token() -> String {
  let mut bytes = [0u8; SESSION_TOKEN_BYTES];
  rand::thread_rng().fill_bytes(&mut bytes);
  bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) {
    end -= 1;
  }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// JSON type name, for warnings about unexpected answer shapes.
pub fn json_type_name(v: &serde_json::Value) -> &'static str {
  match v {
    serde_json::Value::Null => "null",
    serde_json::Value::Bool(_) => "bool",
    serde_json::Value::Number(_) => "number",
    serde_json::Value::String(_) => "string",
    serde_json::Value::Array(_) => "array",
    serde_json::Value::Object(_) => "object",
  }
}
