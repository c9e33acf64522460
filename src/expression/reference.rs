//! Parameter References
//!
//! Supports:
//! - `$(inputs.a.b)` (field access)
//! - `$(self[0])`, `$(inputs.files['name'])` (index and quoted key)
//! - `$(inputs.list.length)` (array/string length)
//! - `$(true)`, `$(null)`, `$(42)`, `$('text')` (literals)
//! - `prefix $(inputs.a) suffix` (string interpolation)
//!
//! Does NOT support arbitrary code (operators, function calls).

use log::debug;

use crate::error::FlowError;
use crate::workflow::value::{Value, ValueMap};

use super::ExpressionEvaluator;

/// A parsed reference segment
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    /// Object field access: .field or ['field']
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

/// Parsed body of one `$(...)`
#[derive(Debug, Clone, PartialEq)]
enum Reference {
    Literal(Value),
    Path { root: String, segments: Vec<Segment> },
}

/// Built-in evaluator for parameter references.
///
/// Stateless, so a single instance can be shared across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParameterReferences;

impl ParameterReferences {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for ParameterReferences {
    fn evaluate(
        &self,
        expression: &str,
        inputs: &ValueMap,
        context: Option<&Value>,
    ) -> Result<Value, FlowError> {
        let spans = find_references(expression)?;

        if spans.is_empty() {
            return Ok(Value::String(unescape(expression)));
        }

        // A lone reference keeps its type
        let trimmed = expression.trim();
        if spans.len() == 1 {
            let (start, end) = spans[0];
            if &expression[start..end] == trimmed {
                let body = &expression[start + 2..end - 1];
                return lookup(expression, body, inputs, context);
            }
        }

        let mut output = String::new();
        let mut cursor = 0;
        for (start, end) in spans {
            output.push_str(&unescape(&expression[cursor..start]));
            let value = lookup(expression, &expression[start + 2..end - 1], inputs, context)?;
            match value {
                Value::String(s) => output.push_str(&s),
                other => output.push_str(&other.to_json().to_string()),
            }
            cursor = end;
        }
        output.push_str(&unescape(&expression[cursor..]));

        debug!("Interpolated '{}' -> '{}'", expression, output);
        Ok(Value::String(output))
    }
}

/// Turns every escaped `\\$(` in literal text into `$(`.
fn unescape(text: &str) -> String {
    text.replace("\\$(", "$(")
}

/// Returns byte ranges `[start, end)` of every `$( ... )` in the expression.
fn find_references(expression: &str) -> Result<Vec<(usize, usize)>, FlowError> {
    let bytes = expression.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' && bytes[i + 1] == b'$' {
            i += 2;
            continue;
        }
        if bytes[i] == b'$' && bytes[i + 1] == b'(' {
            let start = i;
            let mut depth = 0usize;
            let mut quote: Option<u8> = None;
            let mut end = None;
            let mut j = i + 1;
            while j < bytes.len() {
                let b = bytes[j];
                match quote {
                    Some(q) if b == q => quote = None,
                    Some(_) => {}
                    None => match b {
                        b'\'' | b'"' => quote = Some(b),
                        b'(' => depth += 1,
                        b')' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(j + 1);
                                break;
                            }
                        }
                        _ => {}
                    },
                }
                j += 1;
            }
            let end = end.ok_or_else(|| {
                FlowError::expression(expression, format!("unterminated reference at position {}", start))
            })?;
            spans.push((start, end));
            i = end;
        } else {
            i += 1;
        }
    }

    Ok(spans)
}

/// Parses a reference body: a literal or `root(.field|[n]|['key'])*`.
fn parse(expression: &str, body: &str) -> Result<Reference, FlowError> {
    let body = body.trim();
    let fail = |message: &str| FlowError::expression(expression, format!("{} in '{}'", message, body));

    match body {
        "true" => return Ok(Reference::Literal(Value::Bool(true))),
        "false" => return Ok(Reference::Literal(Value::Bool(false))),
        "null" => return Ok(Reference::Literal(Value::Null)),
        _ => {}
    }
    if body.len() >= 2
        && ((body.starts_with('\'') && body.ends_with('\''))
            || (body.starts_with('"') && body.ends_with('"')))
    {
        return Ok(Reference::Literal(Value::String(body[1..body.len() - 1].to_string())));
    }
    if body.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        let number: serde_json::Value =
            serde_json::from_str(body).map_err(|_| fail("invalid number literal"))?;
        return Ok(Reference::Literal(Value::from(number)));
    }

    let chars: Vec<char> = body.chars().collect();
    let mut pos = 0;
    let read_ident = |pos: &mut usize| -> String {
        let begin = *pos;
        while *pos < chars.len() && (chars[*pos].is_alphanumeric() || chars[*pos] == '_') {
            *pos += 1;
        }
        chars[begin..*pos].iter().collect()
    };

    let root = read_ident(&mut pos);
    if root.is_empty() {
        return Err(fail("expected a name"));
    }

    let mut segments = Vec::new();
    while pos < chars.len() {
        match chars[pos] {
            '.' => {
                pos += 1;
                let field = read_ident(&mut pos);
                if field.is_empty() {
                    return Err(fail("expected a field name after '.'"));
                }
                segments.push(Segment::Field(field));
            }
            '[' => {
                let close = chars[pos..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|offset| pos + offset)
                    .ok_or_else(|| fail("unclosed '['"))?;
                let inner: String = chars[pos + 1..close].iter().collect();
                let inner = inner.trim();
                if inner.len() >= 2
                    && ((inner.starts_with('\'') && inner.ends_with('\''))
                        || (inner.starts_with('"') && inner.ends_with('"')))
                {
                    segments.push(Segment::Field(inner[1..inner.len() - 1].to_string()));
                } else {
                    let index = inner.parse::<usize>().map_err(|_| fail("invalid index"))?;
                    segments.push(Segment::Index(index));
                }
                pos = close + 1;
            }
            c if c.is_whitespace() => pos += 1,
            _ => return Err(fail("unsupported syntax")),
        }
    }

    Ok(Reference::Path { root, segments })
}

/// Evaluates one reference body against the bindings.
fn lookup(
    expression: &str,
    body: &str,
    inputs: &ValueMap,
    context: Option<&Value>,
) -> Result<Value, FlowError> {
    let (root, segments) = match parse(expression, body)? {
        Reference::Literal(value) => return Ok(value),
        Reference::Path { root, segments } => (root, segments),
    };

    let mut current = match root.as_str() {
        "inputs" => Value::Object(inputs.clone()),
        "self" => context.cloned().unwrap_or(Value::Null),
        other => {
            return Err(FlowError::expression(
                expression,
                format!("unknown symbol '{}'", other),
            ))
        }
    };

    for segment in &segments {
        let next = match (segment, &current) {
            (Segment::Field(name), Value::Object(map)) => {
                map.get(name).cloned().unwrap_or(Value::Null)
            }
            (Segment::Field(name), Value::Array(items)) if name == "length" => {
                Value::from(items.len() as i64)
            }
            (Segment::Field(name), Value::String(s)) if name == "length" => {
                Value::from(s.chars().count() as i64)
            }
            (Segment::Index(index), Value::Array(items)) => {
                items.get(*index).cloned().unwrap_or(Value::Null)
            }
            (segment, value) => {
                return Err(FlowError::expression(
                    expression,
                    format!("cannot apply {:?} to {}", segment, value.type_name()),
                ))
            }
        };
        current = next;
    }

    Ok(current)
}
