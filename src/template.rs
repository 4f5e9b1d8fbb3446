//! Template resolver (C6): substitutes `{{ expr }}` markers in a node's raw
//! config against `ctx.globals` and recorded node outputs.
//!
//! No templating crate in the corpus exposes a subset sandboxed to "dotted
//! variable access only" without pulling in a full expression language
//! (Tera, Handlebars); this resolver is a small hand-rolled recursive-descent
//! parser instead, noted as a deliberate corpus deviation in DESIGN.md.

use serde_json::Value;
use std::fmt;

use crate::context::Context;

/// `ident(.ident|['key'])*`: a variable name followed by dotted or bracketed
/// accessors. `nodes` is a predefined root resolving to a node's recorded
/// output; every other root name is looked up in `ctx.globals`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Accessor {
    root: String,
    path: Vec<String>,
}

#[derive(Debug)]
pub struct TemplateError {
    message: String,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template parse error: {}", self.message)
    }
}

impl std::error::Error for TemplateError {}

/// Maximum re-render passes (§4.4): after this many, the last result is
/// returned even if markers remain, rather than failing.
pub const MAX_RENDER_PASSES: usize = 10;

/// Render `input` against `ctx`, recursively re-expanding while the result
/// still contains markers, up to [`MAX_RENDER_PASSES`] (terminating early if
/// the text stops changing between passes).
pub async fn render(input: &str, ctx: &Context) -> String {
    let mut current = input.to_string();
    for _ in 0..MAX_RENDER_PASSES {
        let next = render_once(&current, ctx).await;
        if next == current {
            return next;
        }
        current = next;
    }
    current
}

async fn render_once(input: &str, ctx: &Context) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        match after_open.find("}}") {
            Some(end) => {
                let expr = after_open[..end].trim();
                let rendered = match parse_accessor(expr) {
                    Ok(accessor) => resolve(&accessor, ctx).await,
                    Err(_) => format!("{{{{ {expr} }}}}"),
                };
                out.push_str(&rendered);
                rest = &after_open[end + 2..];
            }
            None => {
                // Unterminated marker: emit the rest verbatim.
                out.push_str("{{");
                out.push_str(after_open);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn parse_accessor(expr: &str) -> Result<Accessor, TemplateError> {
    let mut chars = expr.chars().peekable();
    let root = parse_ident(&mut chars)?;
    let mut path = Vec::new();
    while let Some(&c) = chars.peek() {
        match c {
            '.' => {
                chars.next();
                path.push(parse_ident(&mut chars)?);
            }
            '[' => {
                chars.next();
                let key = parse_bracket_key(&mut chars)?;
                path.push(key);
            }
            other if other.is_whitespace() => {
                chars.next();
            }
            other => {
                return Err(TemplateError {
                    message: format!("unexpected character '{other}' in '{expr}'"),
                })
            }
        }
    }
    Ok(Accessor { root, path })
}

fn parse_ident(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String, TemplateError> {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if ident.is_empty() {
        return Err(TemplateError {
            message: "expected an identifier".to_string(),
        });
    }
    Ok(ident)
}

fn parse_bracket_key(chars: &mut std::iter::Peekable<std::str::Chars>) -> Result<String, TemplateError> {
    let quote = match chars.peek() {
        Some('\'') | Some('"') => chars.next().unwrap(),
        _ => {
            return Err(TemplateError {
                message: "expected a quoted key after '['".to_string(),
            })
        }
    };
    let mut key = String::new();
    loop {
        match chars.next() {
            Some(c) if c == quote => break,
            Some(c) => key.push(c),
            None => {
                return Err(TemplateError {
                    message: "unterminated bracket key".to_string(),
                })
            }
        }
    }
    match chars.next() {
        Some(']') => Ok(key),
        _ => Err(TemplateError {
            message: "expected closing ']'".to_string(),
        }),
    }
}

async fn resolve(accessor: &Accessor, ctx: &Context) -> String {
    let root_value = if accessor.root == "nodes" {
        match accessor.path.first() {
            Some(node_id) => match ctx.output(node_id).await {
                Some(value) => walk(&value, &accessor.path[1..]),
                None => return String::new(),
            },
            None => return String::new(),
        }
    } else {
        let dotted = if accessor.path.is_empty() {
            accessor.root.clone()
        } else {
            format!("{}.{}", accessor.root, accessor.path.join("."))
        };
        Some(ctx.get_global(&dotted, Value::Null).await)
    };

    match root_value {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn walk(value: &Value, path: &[String]) -> Option<Value> {
    let mut cursor = value.clone();
    for segment in path {
        cursor = cursor.as_object()?.get(segment)?.clone();
    }
    Some(cursor)
}

/// Render every string leaf of a JSON config structure, recursing into
/// arrays and objects. Non-string leaves (numbers, booleans, null) pass
/// through untouched — template markers only ever appear inside strings.
pub async fn render_value(value: &Value, ctx: &Context) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, ctx).await),
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(Box::pin(render_value(item, ctx)).await);
            }
            Value::Array(rendered)
        }
        Value::Object(fields) => {
            let mut rendered = serde_json::Map::with_capacity(fields.len());
            for (key, val) in fields {
                rendered.insert(key.clone(), Box::pin(render_value(val, ctx)).await);
            }
            Value::Object(rendered)
        }
        other => other.clone(),
    }
}
