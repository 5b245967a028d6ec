use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::data::RequestDescriptor;

/// Compute the cache and de-duplication key of a request.
///
/// The key covers the method, the normalized target, the query parameters
/// (inline and explicit, sorted) and the canonical JSON body. Headers and
/// policies are not part of a request's identity.
///
/// # Examples
///
/// ```
/// use pulith_request::{RequestDescriptor, fingerprint};
///
/// let a = RequestDescriptor::get("https://API.example.com/items/").query("b", "2").query("a", "1");
/// let b = RequestDescriptor::get("https://api.example.com/items?a=1").query("b", "2");
/// assert_eq!(fingerprint(&a), fingerprint(&b));
///
/// let c = RequestDescriptor::get("https://api.example.com/items").query("a", "2");
/// assert_ne!(fingerprint(&a), fingerprint(&c));
/// ```
pub fn fingerprint(request: &RequestDescriptor) -> String {
    let (base, inline_query) = normalize_target(&request.target);

    let mut params: Vec<(&str, &str)> = inline_query;
    params.extend(request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    params.sort_unstable();

    let mut hasher = Sha256::new();
    update_field(&mut hasher, request.method.as_str().as_bytes());
    update_field(&mut hasher, base.as_bytes());
    hasher.update((params.len() as u64).to_le_bytes());
    for (key, value) in &params {
        update_field(&mut hasher, key.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }
    match &request.body {
        Some(body) => update_field(&mut hasher, canonical_json(body).as_bytes()),
        None => hasher.update([0xff]),
    }

    format!("{}:{}", request.method, hex::encode(hasher.finalize()))
}

/// Length-prefixed so adjacent fields can never run together.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Split a target into its normalized base and inline query pairs.
///
/// Whitespace, the fragment and trailing slashes are dropped, and the scheme
/// and authority are lowercased.
fn normalize_target(target: &str) -> (String, Vec<(&str, &str)>) {
    let target = target.trim();
    let target = target.split_once('#').map_or(target, |(head, _)| head);
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    let mut base = match path.find("://") {
        Some(scheme_end) => {
            let authority_start = scheme_end + 3;
            let authority_end = path[authority_start..]
                .find('/')
                .map_or(path.len(), |i| authority_start + i);
            let mut s = path[..authority_end].to_ascii_lowercase();
            s.push_str(&path[authority_end..]);
            s
        }
        None => path.to_string(),
    };
    while base.len() > 1 && base.ends_with('/') {
        base.pop();
    }

    let pairs = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();

    (base, pairs)
}

/// Serialize JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => write_string(s, out),
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    let _ = write!(out, "{}", Value::String(s.to_owned()));
}
