//! Parameter value parsing for the sweep configuration DSL.
//!
//! A configuration value is either a literal (scalar or list) or a small
//! range DSL string:
//!
//! - `start:stop:step` - arithmetic range, inclusive of `stop`
//! - `linspace:start:stop:num` - evenly spaced points, both ends included
//! - `log:start:stop:num` - log-spaced points (positive bounds only)
//! - `rand:low:high:count` - uniform random draws
//! - `file:path[:column]` - CSV column load, or a job-table path
//! - `{v1, v2, ...}` - aggregate array expanded elsewhere into `name[i]`
//!
//! Parsing never fails to the caller: a malformed DSL string is logged and
//! degrades to the original string as a single literal value.

use std::path::Path;

use rand::Rng;
use serde_json::Value;

/// Round to 8 decimals to keep swept values stable across float formatting.
pub(crate) fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}

fn number(x: f64) -> Value {
    serde_json::Number::from_f64(x).map_or(Value::Null, Value::Number)
}

/// Split `s` on `sep`, ignoring separators nested inside brackets, braces,
/// parentheses, or quotes.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for c in s.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(c);
            }
            ']' | '}' | ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            _ if c == sep && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Parse a single literal element of an aggregate array string: a number,
/// a quoted string, a bare `true`/`false`, or a nested `[...]` list.
pub(crate) fn parse_literal(s: &str) -> Option<Value> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
        || (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
    {
        return Some(Value::String(s[1..s.len() - 1].to_string()));
    }
    if s.starts_with('[') && s.ends_with(']') {
        let inner = &s[1..s.len() - 1];
        let mut items = Vec::new();
        if !inner.trim().is_empty() {
            for part in split_top_level(inner, ',') {
                items.push(parse_literal(&part)?);
            }
        }
        return Some(Value::Array(items));
    }
    match s {
        "true" | "True" => return Some(Value::Bool(true)),
        "false" | "False" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    if let Ok(x) = s.parse::<f64>() {
        return Some(number(x));
    }
    None
}

enum ParseFailure {
    BadNumber(String),
    WrongArity,
    NonPositiveLogBound,
    File(String),
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::BadNumber(s) => write!(f, "not a number: '{s}'"),
            ParseFailure::WrongArity => write!(f, "wrong number of ':'-separated fields"),
            ParseFailure::NonPositiveLogBound => {
                write!(f, "log scale start and stop values must be positive")
            }
            ParseFailure::File(msg) => write!(f, "{msg}"),
        }
    }
}

fn parse_f64(s: &str) -> Result<f64, ParseFailure> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| ParseFailure::BadNumber(s.trim().to_string()))
}

fn three_floats(args: &str) -> Result<(f64, f64, f64), ParseFailure> {
    let parts: Vec<&str> = args.split(':').collect();
    if parts.len() != 3 {
        return Err(ParseFailure::WrongArity);
    }
    Ok((parse_f64(parts[0])?, parse_f64(parts[1])?, parse_f64(parts[2])?))
}

fn try_parse_dsl(value: &str) -> Result<Vec<Value>, ParseFailure> {
    let (prefix, args) = value.split_once(':').ok_or(ParseFailure::WrongArity)?;
    match prefix.to_ascii_lowercase().as_str() {
        "linspace" => {
            let (start, stop, num) = three_floats(args)?;
            Ok(linspace(start, stop, num as usize))
        }
        "log" => {
            let (start, stop, num) = three_floats(args)?;
            if start <= 0.0 || stop <= 0.0 {
                return Err(ParseFailure::NonPositiveLogBound);
            }
            Ok(linspace(start.log10(), stop.log10(), num as usize)
                .into_iter()
                .map(|v| number(round8(10f64.powf(v.as_f64().unwrap_or(0.0)))))
                .collect())
        }
        "rand" => {
            let (low, high, count) = three_floats(args)?;
            let mut rng = rand::rng();
            Ok((0..count as usize)
                .map(|_| number(round8(low + (high - low) * rng.random::<f64>())))
                .collect())
        }
        "file" => parse_file_spec(args),
        _ => {
            // Plain start:stop:step range, inclusive of stop. The half-step
            // epsilon keeps the endpoint from being lost to float rounding.
            let (start, stop, step) = three_floats(value)?;
            let mut values = Vec::new();
            let mut x = start;
            while x < stop + step / 2.0 {
                values.push(number(round8(x)));
                x += step;
            }
            Ok(values)
        }
    }
}

fn parse_file_spec(args: &str) -> Result<Vec<Value>, ParseFailure> {
    match args.rsplit_once(':') {
        Some((path, column)) => {
            let path = path.trim();
            let column = column.trim();
            let abs = if Path::new(path).is_absolute() {
                Path::new(path).to_path_buf()
            } else {
                std::env::current_dir()
                    .map_err(|e| ParseFailure::File(e.to_string()))?
                    .join(path)
            };
            let mut reader = csv::Reader::from_path(&abs)
                .map_err(|e| ParseFailure::File(format!("{}: {e}", abs.display())))?;
            let headers = reader
                .headers()
                .map_err(|e| ParseFailure::File(e.to_string()))?;
            let idx = headers
                .iter()
                .position(|h| h.trim() == column)
                .ok_or_else(|| {
                    ParseFailure::File(format!("column '{column}' not found in {}", abs.display()))
                })?;
            let mut values = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|e| ParseFailure::File(e.to_string()))?;
                let field = record.get(idx).unwrap_or("").trim();
                values.push(match field.parse::<f64>() {
                    Ok(x) => number(x),
                    Err(_) => Value::String(field.to_string()),
                });
            }
            Ok(values)
        }
        // No column: return the path itself for downstream per-row job loading.
        None => Ok(vec![Value::String(args.trim().to_string())]),
    }
}

fn linspace(start: f64, stop: f64, num: usize) -> Vec<Value> {
    if num <= 1 {
        return vec![number(round8(start))];
    }
    let step = (stop - start) / (num - 1) as f64;
    (0..num)
        .map(|i| number(round8(start + step * i as f64)))
        .collect()
}

/// Parse one configuration value into a concrete list of values.
///
/// Non-string values are wrapped in a single-element list unless already a
/// list. Strings without `:` are literals. DSL strings expand to value
/// lists; any DSL parse failure degrades to the original string as a single
/// literal value (logged, never raised).
pub fn parse_parameter_value(value: &Value) -> Vec<Value> {
    let text = match value {
        Value::Array(items) => return items.clone(),
        Value::String(s) => s,
        other => return vec![other.clone()],
    };

    if !text.contains(':') {
        return vec![Value::String(text.clone())];
    }

    match try_parse_dsl(text) {
        Ok(values) => values,
        Err(reason) => {
            tracing::warn!(
                value = %text,
                %reason,
                "invalid parameter value format, treating as a single literal"
            );
            vec![Value::String(text.clone())]
        }
    }
}
