//! # Extractor Module
//!
//! Turns raw crash dump records into normalized property sets.
//!
//! - Reject dumps whose mandatory fields (`dump_id`, `timestamp`) cannot be parsed
//! - Preserve unknown-but-well-formed fields as opaque properties
//! - Normalize stack frames and compute a stable `stack_hash`
//! - No storage, no classification: extraction is a pure transformation
//!
//! ## Source Formats
//!
//! JSON objects:
//!
//! ```text
//! {"dump_id": "D1", "timestamp": "2024-01-10T00:00:00Z",
//!  "exception_code": "0xC0000005", "stack": ["app.exe!main+0x10"]}
//! ```
//!
//! Structured text headers (a blank line ends the header):
//!
//! ```text
//! DumpId: D1
//! Timestamp: 2024-01-10T00:00:00Z
//! ExceptionCode: 0xC0000005
//! Stack:
//!   app.exe!main+0x10
//!   kernel32.dll!BaseThreadInitThunk+0x14
//! ```

use crate::config::SignatureConfig;
use crate::primitives::{
    MAX_DUMP_BYTES, MAX_PROPERTIES, MAX_PROPERTY_NAME_LENGTH, MAX_PROPERTY_VALUE_LENGTH,
    STACK_HASH_HEX_LEN, props,
};
use crate::{PropertySet, PropertyValue, Timestamp, TriageError};

/// Source format of a raw dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DumpFormat {
    /// JSON if the first non-whitespace byte is `{`, text otherwise.
    #[default]
    Auto,
    /// A single JSON object.
    Json,
    /// `Key: Value` header lines.
    Text,
}

impl DumpFormat {
    /// Parse a format name (`auto`, `json`, `text`).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "json" => Some(Self::Json),
            "text" | "txt" => Some(Self::Text),
            _ => None,
        }
    }
}

/// The Extractor validates raw dumps and produces property sets.
///
/// Stateless apart from its configuration; safe to share across threads.
#[derive(Debug, Clone)]
pub struct Extractor {
    max_frames: usize,
    format: DumpFormat,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(&SignatureConfig::default())
    }
}

impl Extractor {
    /// Create an extractor using the signature settings for stack hashing.
    #[must_use]
    pub fn new(config: &SignatureConfig) -> Self {
        Self {
            max_frames: config.max_frames.max(1),
            format: DumpFormat::Auto,
        }
    }

    /// Force a source format instead of auto-detection.
    #[must_use]
    pub fn with_format(mut self, format: DumpFormat) -> Self {
        self.format = format;
        self
    }

    /// Extract the normalized property set of a raw dump.
    ///
    /// Returns `TriageError::MalformedDump` if:
    /// - The input exceeds `MAX_DUMP_BYTES` or is not UTF-8
    /// - A JSON input is not an object
    /// - `dump_id` or `timestamp` is missing or unparseable
    /// - Property count or sizes exceed their limits
    pub fn extract(&self, raw: &[u8]) -> Result<PropertySet, TriageError> {
        if raw.len() > MAX_DUMP_BYTES {
            return Err(TriageError::malformed(
                "payload",
                &format!("{} bytes exceeds limit of {}", raw.len(), MAX_DUMP_BYTES),
            ));
        }

        let text = std::str::from_utf8(raw)
            .map_err(|e| TriageError::malformed("payload", &format!("not UTF-8: {}", e)))?;

        let format = match self.format {
            DumpFormat::Auto if text.trim_start().starts_with('{') => DumpFormat::Json,
            DumpFormat::Auto => DumpFormat::Text,
            other => other,
        };

        let (properties, frames) = match format {
            DumpFormat::Json => parse_json(text)?,
            _ => parse_text(text)?,
        };

        self.finish(properties, &frames)
    }

    /// Normalize well-known fields and enforce limits.
    fn finish(
        &self,
        mut properties: PropertySet,
        frames: &[String],
    ) -> Result<PropertySet, TriageError> {
        // Mandatory fields first: these are the only hard failures.
        properties.dump_id()?;
        let timestamp = canonical_timestamp(properties.get(props::TIMESTAMP))?;
        properties.insert(props::TIMESTAMP, timestamp.to_string());

        let normalized: Vec<String> = frames.iter().filter_map(|f| normalize_frame(f)).collect();
        if !normalized.is_empty() {
            if !properties.contains(props::STACK_HASH) {
                properties.insert(props::STACK_HASH, stack_hash(&normalized, self.max_frames));
            }
            properties.insert(props::STACK, normalized.join("\n"));
        }

        for key in [props::EXCEPTION_CODE, props::FAULT_OFFSET] {
            if let Some(value) = properties.get(key) {
                let code = normalize_code(value);
                properties.insert(key, code);
            }
        }

        validate_limits(&properties)?;
        Ok(properties)
    }
}

// =============================================================================
// FORMAT PARSERS
// =============================================================================

fn parse_json(text: &str) -> Result<(PropertySet, Vec<String>), TriageError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| TriageError::malformed("payload", &format!("invalid JSON: {}", e)))?;
    let serde_json::Value::Object(map) = value else {
        return Err(TriageError::malformed("payload", "expected a JSON object"));
    };

    let mut properties = PropertySet::new();
    let mut frames = Vec::new();

    for (key, value) in map {
        let key = normalize_key(&key);
        if key.is_empty() {
            continue;
        }
        if key == props::STACK {
            frames.extend(json_frames(&value));
            continue;
        }
        if let Some(value) = json_property(value) {
            insert_unique(&mut properties, key, value)?;
        }
    }

    Ok((properties, frames))
}

/// Insert a parsed field, refusing a second value for a mandatory field.
///
/// Distinct source keys can normalize to one name (`DumpId`, `dump_id`).
/// For `dump_id` and `timestamp` that is ambiguous and the dump is
/// malformed; for anything else the later value wins.
fn insert_unique(
    properties: &mut PropertySet,
    key: String,
    value: PropertyValue,
) -> Result<(), TriageError> {
    if properties.contains(&key) {
        if key == props::DUMP_ID || key == props::TIMESTAMP {
            return Err(TriageError::malformed(&key, "given more than once"));
        }
        tracing::debug!("Duplicate field {:?}; keeping the later value", key);
    }
    properties.insert(key, value);
    Ok(())
}

/// Convert a JSON member to a property; nulls carry nothing and are dropped.
fn json_property(value: serde_json::Value) -> Option<PropertyValue> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(PropertyValue::Flag(b)),
        serde_json::Value::String(s) => Some(PropertyValue::Text(s)),
        serde_json::Value::Number(n) => Some(match n.as_i64() {
            Some(i) => PropertyValue::Integer(i),
            None => PropertyValue::Text(n.to_string()),
        }),
        other => Some(PropertyValue::Text(other.to_string())),
    }
}

fn json_frames(value: &serde_json::Value) -> Vec<String> {
    match value {
        serde_json::Value::String(s) => s.lines().map(str::to_string).collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Object(frame) => {
                    let module = frame.get("module").and_then(|v| v.as_str()).unwrap_or("");
                    let function = frame
                        .get("function")
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    if module.is_empty() && function.is_empty() {
                        None
                    } else {
                        Some(format!("{}!{}", module, function))
                    }
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_text(text: &str) -> Result<(PropertySet, Vec<String>), TriageError> {
    let mut properties = PropertySet::new();
    let mut frames = Vec::new();
    let mut in_stack = false;
    let mut seen_header = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            if seen_header {
                break;
            }
            continue;
        }
        seen_header = true;

        if in_stack && line.starts_with([' ', '\t']) {
            frames.push(line.trim().to_string());
            continue;
        }
        in_stack = false;

        let Some((key, value)) = line.split_once(':') else {
            tracing::debug!("Skipping header line without a key: {:?}", line);
            continue;
        };
        let key = normalize_key(key);
        let value = value.trim();
        if key.is_empty() {
            continue;
        }

        if key == props::STACK {
            if value.is_empty() {
                in_stack = true;
            } else {
                frames.extend(value.split(';').map(|f| f.trim().to_string()));
            }
            continue;
        }

        insert_unique(&mut properties, key, PropertyValue::from(value))?;
    }

    Ok((properties, frames))
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Normalize a header or JSON key to snake_case.
///
/// - `DumpId` -> `dump_id`
/// - `Exception-Code` -> `exception_code`
/// - `fault offset` -> `fault_offset`
#[must_use]
pub fn normalize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.trim().chars() {
        if ch == '-' || ch == '_' || ch == '.' || ch.is_whitespace() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        } else if ch.is_uppercase() {
            if prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
            prev_lower = false;
        } else {
            out.push(ch);
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Normalize a stack frame to `module!function`:
/// - strip the `+0x..` offset
/// - strip the module's directory and lowercase it
///
/// Returns `None` for frames that are empty after normalization.
#[must_use]
pub fn normalize_frame(frame: &str) -> Option<String> {
    let frame = frame.trim();
    let frame = match frame.rsplit_once('+') {
        Some((head, offset)) if is_offset(offset) => head.trim_end(),
        _ => frame,
    };

    let normalized = match frame.split_once('!') {
        Some((module, function)) => {
            let module = module
                .rsplit(['/', '\\'])
                .next()
                .unwrap_or(module)
                .to_ascii_lowercase();
            format!("{}!{}", module, function.trim())
        }
        None => frame.to_string(),
    };

    if normalized.is_empty() || normalized == "!" {
        None
    } else {
        Some(normalized)
    }
}

fn is_offset(s: &str) -> bool {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit())
}

/// Stable hash of the top `max_frames` normalized frames.
///
/// Uses BLAKE3 and keeps `STACK_HASH_HEX_LEN` hex characters.
#[must_use]
pub fn stack_hash(frames: &[String], max_frames: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    for frame in frames.iter().take(max_frames.max(1)) {
        hasher.update(frame.as_bytes());
        hasher.update(b"\n");
    }
    let hex = hasher.finalize().to_hex();
    hex[..STACK_HASH_HEX_LEN].to_string()
}

/// Canonical text for exception codes and offsets.
///
/// Non-negative numbers (decimal or `0x` hex) become lower-case `0x` hex;
/// anything else (signal names, negative codes) is kept as trimmed text.
fn normalize_code(value: &PropertyValue) -> PropertyValue {
    match value {
        PropertyValue::Integer(n) if *n >= 0 => PropertyValue::Text(format!("{:#x}", n)),
        PropertyValue::Text(s) => {
            let s = s.trim();
            let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse::<u64>().ok(),
            };
            match parsed {
                Some(n) => PropertyValue::Text(format!("{:#x}", n)),
                None => PropertyValue::Text(s.to_string()),
            }
        }
        other => PropertyValue::Text(other.to_string()),
    }
}

/// Parse the mandatory timestamp from RFC 3339 text or epoch seconds.
///
/// Seconds outside the calendar range are rejected here, so every extracted
/// property set carries a timestamp that renders as RFC 3339.
fn canonical_timestamp(value: Option<&PropertyValue>) -> Result<Timestamp, TriageError> {
    match value {
        Some(PropertyValue::Integer(secs)) => Timestamp::from_secs(*secs)
            .ok_or_else(|| TriageError::malformed(props::TIMESTAMP, "epoch seconds out of range")),
        Some(PropertyValue::Text(s)) => Timestamp::parse_rfc3339(s)
            .or_else(|| {
                s.trim()
                    .parse::<i64>()
                    .ok()
                    .and_then(Timestamp::from_secs)
            })
            .ok_or_else(|| {
                TriageError::malformed(props::TIMESTAMP, "expected RFC 3339 or epoch seconds")
            }),
        Some(PropertyValue::Flag(_)) => Err(TriageError::malformed(
            props::TIMESTAMP,
            "expected RFC 3339 or epoch seconds",
        )),
        None => Err(TriageError::malformed(props::TIMESTAMP, "missing")),
    }
}

fn validate_limits(properties: &PropertySet) -> Result<(), TriageError> {
    if properties.len() > MAX_PROPERTIES {
        return Err(TriageError::malformed(
            "properties",
            &format!("{} properties exceeds limit of {}", properties.len(), MAX_PROPERTIES),
        ));
    }
    for (name, value) in properties.iter() {
        if name.len() > MAX_PROPERTY_NAME_LENGTH {
            return Err(TriageError::malformed(name, "property name too long"));
        }
        if value.encoded_len() > MAX_PROPERTY_VALUE_LENGTH {
            return Err(TriageError::malformed(name, "property value too long"));
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
