use crate::error::{Error, Result};
use ethers::abi::{self, ParamType, Token};
use ethers::types::Bytes;
use ethers::utils::keccak256;

/// 4-byte function selector from a canonical human-readable signature,
/// e.g. `function_selector("mint(address)")`.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// ABI-encode `values` against the given parameter type tags and prepend the
/// selector. Static types are encoded inline, dynamic types via offset+length
/// (standard contract ABI rules, done by `ethers::abi::encode`).
///
/// Fails with [`Error::Encoding`] on arity mismatch, a value that does not
/// match its declared type, or an unsupported type tag.
pub fn create_call_data(selector: [u8; 4], types: &[&str], values: Vec<Token>) -> Result<Bytes> {
    if types.len() != values.len() {
        return Err(Error::Encoding(format!(
            "arity mismatch: {} type tags but {} values",
            types.len(),
            values.len()
        )));
    }

    for (tag, value) in types.iter().zip(values.iter()) {
        let param = parse_param_type(tag)?;
        if !value.type_check(&param) {
            return Err(Error::Encoding(format!(
                "value {value:?} does not match declared type {tag}"
            )));
        }
    }

    Ok(encode_with_selector(selector, &values))
}

/// Low-level join of a selector and already-validated tokens.
pub fn encode_with_selector(selector: [u8; 4], tokens: &[Token]) -> Bytes {
    let encoded = abi::encode(tokens);
    let mut out = Vec::with_capacity(4 + encoded.len());
    out.extend_from_slice(&selector);
    out.extend_from_slice(&encoded);
    Bytes::from(out)
}

/// Parse a parameter type tag. Supports the tags this pipeline actually
/// emits: elementary types, fixed bytes, dynamic arrays (`T[]`), and tuples
/// (`(T,...)` as used by `executeBatch((address,uint256,bytes)[])`).
fn parse_param_type(tag: &str) -> Result<ParamType> {
    let tag = tag.trim();

    if let Some(inner) = tag.strip_suffix("[]") {
        return Ok(ParamType::Array(Box::new(parse_param_type(inner)?)));
    }

    if let Some(inner) = tag.strip_prefix('(') {
        let inner = inner
            .strip_suffix(')')
            .ok_or_else(|| Error::Encoding(format!("unbalanced tuple tag: {tag}")))?;
        let mut fields = Vec::new();
        for part in split_top_level(inner) {
            fields.push(parse_param_type(part)?);
        }
        return Ok(ParamType::Tuple(fields));
    }

    match tag {
        "address" => return Ok(ParamType::Address),
        "bool" => return Ok(ParamType::Bool),
        "string" => return Ok(ParamType::String),
        "bytes" => return Ok(ParamType::Bytes),
        _ => {}
    }

    if let Some(n) = tag.strip_prefix("bytes") {
        let n: usize = n
            .parse()
            .map_err(|_| Error::Encoding(format!("unsupported type tag: {tag}")))?;
        if (1..=32).contains(&n) {
            return Ok(ParamType::FixedBytes(n));
        }
        return Err(Error::Encoding(format!("unsupported type tag: {tag}")));
    }

    for (prefix, ctor) in [
        ("uint", ParamType::Uint as fn(usize) -> ParamType),
        ("int", ParamType::Int as fn(usize) -> ParamType),
    ] {
        if let Some(n) = tag.strip_prefix(prefix) {
            let n: usize = if n.is_empty() {
                256
            } else {
                n.parse()
                    .map_err(|_| Error::Encoding(format!("unsupported type tag: {tag}")))?
            };
            if n % 8 == 0 && (8..=256).contains(&n) {
                return Ok(ctor(n));
            }
            return Err(Error::Encoding(format!("unsupported type tag: {tag}")));
        }
    }

    Err(Error::Encoding(format!("unsupported type tag: {tag}")))
}

/// Split a tuple body on commas that are not nested inside parentheses.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if !s[start..].trim().is_empty() {
        parts.push(&s[start..]);
    }
    parts
}
