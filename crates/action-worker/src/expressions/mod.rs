// Expression collaborator used for `${{ }}` interpolation of uses strings,
// inputs and outputs, and for evaluating step/stage conditions.
//
// Only a subset of the workflow expression language:
// status functions, literals, context lookups, `==`, `!=`, `&&`, `||`, `!`,
// parentheses and the `contains`/`startsWith`/`endsWith` helpers.

use serde_json::Value;

use action_common::{ActionError, TaskResult};

/// Data an expression is evaluated against.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Root object: `github`, `env`, `inputs`, `steps`, `job`, ...
    pub data: Value,
    pub job_status: TaskResult,
    pub is_cancelled: bool,
}

impl EvaluationContext {
    pub fn new(data: Value, job_status: TaskResult, is_cancelled: bool) -> Self {
        Self {
            data,
            job_status,
            is_cancelled,
        }
    }
}

/// Interpolates strings and evaluates conditions.
pub trait ExpressionEvaluator: Send + Sync {
    /// Replace every `${{ expr }}` in `input` with the evaluated value.
    fn interpolate(&self, context: &EvaluationContext, input: &str) -> Result<String, ActionError>;

    /// Evaluate an `if:` condition. An empty condition means `success()`.
    fn evaluate_condition(
        &self,
        context: &EvaluationContext,
        condition: &str,
    ) -> Result<bool, ActionError>;
}

/// Default evaluator over a JSON context object.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextExpressionEvaluator;

impl ExpressionEvaluator for ContextExpressionEvaluator {
    fn interpolate(&self, context: &EvaluationContext, input: &str) -> Result<String, ActionError> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(start) = rest.find("${{") {
            output.push_str(&rest[..start]);
            let body = &rest[start + 3..];
            let end = find_closing(body).ok_or_else(|| ActionError::Interpolation {
                expression: rest[start..].to_string(),
                message: "The expression is not closed. An unescaped ${{ sequence was found, but the closing }} sequence was not found.".to_string(),
            })?;
            let expression = body[..end].trim();
            let value = evaluate(expression, context)?;
            output.push_str(&to_display_string(&value));
            rest = &body[end + 2..];
        }
        output.push_str(rest);
        Ok(output)
    }

    fn evaluate_condition(
        &self,
        context: &EvaluationContext,
        condition: &str,
    ) -> Result<bool, ActionError> {
        let mut expr = condition.trim();
        if let Some(inner) = expr.strip_prefix("${{").and_then(|s| s.strip_suffix("}}")) {
            expr = inner.trim();
        }
        if expr.is_empty() {
            return Ok(status_success(context));
        }

        let value = evaluate(expr, context)?;
        // Without a status function the condition is implicitly `success() && (...)`.
        if !contains_status_function(expr) && !status_success(context) {
            return Ok(false);
        }
        Ok(is_truthy(&value))
    }
}

fn status_success(context: &EvaluationContext) -> bool {
    context.job_status == TaskResult::Succeeded && !context.is_cancelled
}

fn contains_status_function(expr: &str) -> bool {
    let lower = expr.to_lowercase();
    ["success(", "failure(", "cancelled(", "always("]
        .iter()
        .any(|f| lower.contains(f))
}

/// Position of the `}}` closing an interpolation, skipping string literals.
fn find_closing(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn error(expression: &str, message: impl Into<String>) -> ActionError {
    ActionError::Interpolation {
        expression: expression.to_string(),
        message: message.into(),
    }
}

/// Evaluate an expression (without the `${{ }}` wrapper).
fn evaluate(expr: &str, context: &EvaluationContext) -> Result<Value, ActionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(error(expr, "Empty expression"));
    }
    check_balanced(expr)?;

    let parts = split_top_level(expr, "||");
    if parts.len() > 1 {
        let mut last = Value::Null;
        for part in parts {
            last = evaluate(part, context)?;
            if is_truthy(&last) {
                break;
            }
        }
        return Ok(last);
    }

    let parts = split_top_level(expr, "&&");
    if parts.len() > 1 {
        let mut last = Value::Null;
        for part in parts {
            last = evaluate(part, context)?;
            if !is_truthy(&last) {
                break;
            }
        }
        return Ok(last);
    }

    if let Some((left, op, right)) = split_comparison(expr) {
        let l = evaluate(left, context)?;
        let r = evaluate(right, context)?;
        let equal = loose_equals(&l, &r);
        return Ok(Value::Bool(if op == "==" { equal } else { !equal }));
    }

    if let Some(inner) = expr.strip_prefix('!') {
        return Ok(Value::Bool(!is_truthy(&evaluate(inner, context)?)));
    }

    if let Some(inner) = strip_outer_parens(expr) {
        return evaluate(inner, context);
    }

    evaluate_primary(expr, context)
}

fn evaluate_primary(expr: &str, context: &EvaluationContext) -> Result<Value, ActionError> {
    if let Some(literal) = parse_string_literal(expr) {
        return Ok(Value::String(literal));
    }

    match expr {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if let Ok(n) = expr.parse::<f64>() {
        return serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| error(expr, "Invalid number"));
    }

    if let Some((name, args)) = parse_function_call(expr) {
        return call_function(expr, &name, &args, context);
    }

    resolve_path(expr, &context.data)
}

fn call_function(
    expr: &str,
    name: &str,
    args: &[&str],
    context: &EvaluationContext,
) -> Result<Value, ActionError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(error(expr, format!("Function '{}' expects {} argument(s)", name, n)))
        }
    };

    match name {
        "success" => {
            arity(0)?;
            Ok(Value::Bool(status_success(context)))
        }
        "failure" => {
            arity(0)?;
            Ok(Value::Bool(context.job_status == TaskResult::Failed))
        }
        "cancelled" => {
            arity(0)?;
            Ok(Value::Bool(context.is_cancelled))
        }
        "always" => {
            arity(0)?;
            Ok(Value::Bool(true))
        }
        "contains" | "startswith" | "endswith" => {
            arity(2)?;
            let subject = evaluate(args[0], context)?;
            let needle = to_display_string(&evaluate(args[1], context)?).to_lowercase();
            let result = match (name, &subject) {
                ("contains", Value::Array(items)) => items
                    .iter()
                    .any(|item| to_display_string(item).to_lowercase() == needle),
                ("contains", _) => to_display_string(&subject).to_lowercase().contains(&needle),
                ("startswith", _) => to_display_string(&subject).to_lowercase().starts_with(&needle),
                _ => to_display_string(&subject).to_lowercase().ends_with(&needle),
            };
            Ok(Value::Bool(result))
        }
        other => Err(error(expr, format!("Unrecognized function: '{}'", other))),
    }
}

/// Resolve `a.b['c'].d` against the context object. Missing keys are null.
fn resolve_path(expr: &str, root: &Value) -> Result<Value, ActionError> {
    let mut current = root;
    let mut rest = expr;
    let mut first = true;

    while !rest.is_empty() {
        let key: String;
        if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']').ok_or_else(|| error(expr, "Unclosed index"))?;
            let inner = after[..close].trim();
            key = parse_string_literal(inner).unwrap_or_else(|| inner.to_string());
            rest = &after[close + 1..];
        } else {
            let segment = if first {
                rest
            } else {
                rest.strip_prefix('.')
                    .ok_or_else(|| error(expr, "Unexpected symbol"))?
            };
            let end = segment
                .find(|c: char| c == '.' || c == '[')
                .unwrap_or(segment.len());
            let name = &segment[..end];
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(error(expr, format!("Unrecognized named-value: '{}'", name)));
            }
            key = name.to_string();
            rest = &segment[end..];
        }
        first = false;

        current = match lookup(current, &key) {
            Some(v) => v,
            None => return Ok(Value::Null),
        };
    }

    Ok(current.clone())
}

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key).or_else(|| {
            map.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        }),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

/// Truthiness as used by conditions: null, false, 0 and '' are false.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Null, Value::Null) => true,
        _ => to_display_string(left).eq_ignore_ascii_case(&to_display_string(right)),
    }
}

/// String form used when splicing a value into text.
fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}

/// `'it''s'` → `it's`. Only single quotes delimit strings.
fn parse_string_literal(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix('\'')?.strip_suffix('\'')?;
    // Reject 'a' + 'b' shapes: any lone quote inside ends the literal early.
    let mut chars = inner.chars().peekable();
    let mut out = String::with_capacity(inner.len());
    while let Some(c) = chars.next() {
        if c == '\'' && chars.next() != Some('\'') {
            return None;
        }
        out.push(c);
    }
    Some(out)
}

/// `name(arg, arg)` → lower-cased name plus raw argument slices.
fn parse_function_call(expr: &str) -> Option<(String, Vec<&str>)> {
    let open = expr.find('(')?;
    let name = &expr[..open];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let args = strip_outer_parens(&expr[open..])?;
    let args = if args.trim().is_empty() {
        Vec::new()
    } else {
        split_top_level(args, ",")
    };
    Some((name.to_lowercase(), args))
}

/// Returns the inside of `( ... )` when the opening paren matches the last char.
fn strip_outer_parens(expr: &str) -> Option<&str> {
    if !expr.starts_with('(') || !expr.ends_with(')') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    for (i, b) in expr.bytes().enumerate() {
        match b {
            b'\'' => in_string = !in_string,
            b'(' | b'[' if !in_string => depth += 1,
            b')' | b']' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return (i == expr.len() - 1).then(|| &expr[1..i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `op` where it appears outside strings, parens and brackets.
fn split_top_level<'a>(expr: &'a str, op: &str) -> Vec<&'a str> {
    let bytes = expr.as_bytes();
    let op = op.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'(' | b'[' if !in_string => depth += 1,
            b')' | b']' if !in_string => depth -= 1,
            _ if !in_string && depth == 0 && bytes[i..].starts_with(op) => {
                parts.push(expr[start..i].trim());
                i += op.len();
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(expr[start..].trim());
    parts
}

/// First top-level `==` or `!=`.
fn split_comparison(expr: &str) -> Option<(&str, &'static str, &str)> {
    let bytes = expr.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => in_string = !in_string,
            b'(' | b'[' if !in_string => depth += 1,
            b')' | b']' if !in_string => depth -= 1,
            b'=' | b'!' if !in_string && depth == 0 && bytes.get(i + 1) == Some(&b'=') => {
                let op = if bytes[i] == b'=' { "==" } else { "!=" };
                return Some((expr[..i].trim(), op, expr[i + 2..].trim()));
            }
            _ => {}
        }
    }
    None
}

fn check_balanced(expr: &str) -> Result<(), ActionError> {
    let mut depth = 0i32;
    let mut in_string = false;
    for b in expr.bytes() {
        match b {
            b'\'' => in_string = !in_string,
            b'(' | b'[' if !in_string => depth += 1,
            b')' | b']' if !in_string => {
                depth -= 1;
                if depth < 0 {
                    return Err(error(expr, "Unexpected symbol: ')'"));
                }
            }
            _ => {}
        }
    }
    if in_string {
        return Err(error(expr, "Unterminated string literal"));
    }
    if depth != 0 {
        return Err(error(expr, "Unbalanced parentheses"));
    }
    Ok(())
}
