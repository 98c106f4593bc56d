//! Expression and script sandbox.
//!
//! Wraps `jexl_eval::Evaluator` with a small set of transforms. Scripts are
//! line oriented: `name = <expr>` assigns into the task data scope, any other
//! line is evaluated for its side-effect free value and discarded. Every root
//! identifier is resolved against the scope before evaluation so a misspelt
//! variable fails loudly instead of silently evaluating to null.

use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

const KEYWORDS: &[&str] = &["true", "false", "null", "in"];

/// Which instance and task an evaluation runs for. Threaded explicitly
/// through every evaluation and used for diagnostics.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub instance_id: Uuid,
    pub model_id: String,
    /// Process definition the task belongs to.
    pub process_id: String,
    /// Symbolic name of the task.
    pub task_name: String,
}

impl ScriptContext {
    fn trace(&self, line_number: u32, line: &str) -> Vec<String> {
        vec![
            format!("instance {} (model '{}')", self.instance_id, self.model_id),
            format!("process '{}', task '{}'", self.process_id, self.task_name),
            format!("line {line_number}: {line}"),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptErrorKind {
    /// A root identifier is not defined in the data scope.
    NameError,
    /// The evaluator rejected or failed the expression.
    EvaluationError,
}

/// A failed evaluation with its source position.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub kind: ScriptErrorKind,
    pub message: String,
    /// 1-based line within the script.
    pub line_number: u32,
    pub line_contents: String,
    /// 1-based column, when determinable.
    pub offset: Option<u32>,
    pub trace: Vec<String>,
}

/// JEXL evaluator with the standard transforms registered.
pub struct ScriptEngine {
    evaluator: jexl_eval::Evaluator<'static>,
}

fn str_arg(args: &[Value], index: usize) -> &str {
    args.get(index).and_then(|v| v.as_str()).unwrap_or("")
}

impl ScriptEngine {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| Ok(json!(str_arg(args, 0).trim())))
            .with_transform("split", |args: &[Value]| {
                let delimiter = match str_arg(args, 1) {
                    "" => ",",
                    d => d,
                };
                let parts: Vec<&str> = str_arg(args, 0).split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("contains", |args: &[Value]| {
                Ok(json!(str_arg(args, 0).contains(str_arg(args, 1))))
            })
            .with_transform("not", |args: &[Value]| {
                Ok(json!(!value_to_bool(args.first().unwrap_or(&Value::Null))))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate a single expression against a data scope.
    pub fn evaluate(
        &self,
        expression: &str,
        scope: &Map<String, Value>,
        ctx: &ScriptContext,
    ) -> Result<Value, ScriptError> {
        let column = expression.len() - expression.trim_start().len();
        self.eval_line(expression.trim(), column, scope, 1, expression, ctx)
    }

    /// Evaluate an expression and coerce the result with JavaScript-like truthiness.
    pub fn evaluate_bool(
        &self,
        expression: &str,
        scope: &Map<String, Value>,
        ctx: &ScriptContext,
    ) -> Result<bool, ScriptError> {
        self.evaluate(expression, scope, ctx)
            .map(|value| value_to_bool(&value))
    }

    /// Run a script, writing assignments into `scope` as each line succeeds.
    ///
    /// On failure `scope` keeps every assignment made before the failing line.
    pub fn execute(
        &self,
        script: &str,
        scope: &mut Map<String, Value>,
        ctx: &ScriptContext,
    ) -> Result<(), ScriptError> {
        let _span = tracing::debug_span!(
            "script",
            instance_id = %ctx.instance_id,
            model = %ctx.model_id,
            task = %ctx.task_name,
        )
        .entered();

        for (index, raw) in script.lines().enumerate() {
            let line_number = index as u32 + 1;
            let statement = raw.trim();
            if statement.is_empty() || statement.starts_with('#') {
                continue;
            }

            match parse_assignment(raw) {
                Some((target, expr_start)) => {
                    let expr = &raw[expr_start..];
                    let lead = expr.len() - expr.trim_start().len();
                    let value = self.eval_line(
                        expr.trim(),
                        expr_start + lead,
                        scope,
                        line_number,
                        raw,
                        ctx,
                    )?;
                    tracing::trace!(variable = target, line = line_number, "script assignment");
                    scope.insert(target.to_string(), value);
                }
                None => {
                    let lead = raw.len() - raw.trim_start().len();
                    self.eval_line(statement, lead, scope, line_number, raw, ctx)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate `expr`, which starts at byte `column` of `line`.
    fn eval_line(
        &self,
        expr: &str,
        column: usize,
        scope: &Map<String, Value>,
        line_number: u32,
        line: &str,
        ctx: &ScriptContext,
    ) -> Result<Value, ScriptError> {
        let line_contents = line.trim_end().to_string();

        if let Some((name, at)) = root_identifiers(expr)
            .into_iter()
            .find(|(name, _)| !scope.contains_key(*name))
        {
            let mut message = format!("NameError: name '{name}' is not defined");
            if let Some(suggestion) = closest_name(name, scope.keys().map(String::as_str)) {
                message.push_str(&format!(". Did you mean '{suggestion}'?"));
            }
            let offset = line
                .get(..column + at)
                .map(|prefix| prefix.chars().count() as u32 + 1);
            return Err(ScriptError {
                kind: ScriptErrorKind::NameError,
                message,
                line_number,
                trace: ctx.trace(line_number, &line_contents),
                line_contents,
                offset,
            });
        }

        let context = Value::Object(scope.clone());
        self.evaluator
            .eval_in_context(expr, &context)
            .map_err(|e| ScriptError {
                kind: ScriptErrorKind::EvaluationError,
                message: format!("EvaluationError: {e}"),
                line_number,
                trace: ctx.trace(line_number, &line_contents),
                line_contents,
                offset: None,
            })
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Split `name = expr` into the target name and the byte offset of `expr`.
fn parse_assignment(line: &str) -> Option<(&str, usize)> {
    let start = line.len() - line.trim_start().len();
    let rest = &line[start..];
    let name_len = rest
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
        .map_or(rest.len(), |(i, _)| i);
    let name = &rest[..name_len];
    let first = name.chars().next()?;
    if !(first.is_alphabetic() || first == '_') || KEYWORDS.contains(&name) {
        return None;
    }

    let after = &rest[name_len..];
    let eq = after.len() - after.trim_start().len();
    let mut tail = after[eq..].chars();
    match (tail.next(), tail.next()) {
        (Some('='), Some('=')) | (Some('='), None) => None,
        (Some('='), _) => Some((name, start + name_len + eq + 1)),
        _ => None,
    }
}

/// Root identifiers referenced by an expression, with their byte offsets.
///
/// Skips string literals, numbers, member accesses (`a.b`), transform names
/// (`x|lower`), object literal keys and keywords.
fn root_identifiers(expr: &str) -> Vec<(&str, usize)> {
    let chars: Vec<(usize, char)> = expr.char_indices().collect();
    let mut found = Vec::new();
    let mut previous: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];

        if c == '\'' || c == '"' {
            i += 1;
            while i < chars.len() {
                let ch = chars[i].1;
                i += if ch == '\\' { 2 } else { 1 };
                if ch == c {
                    break;
                }
            }
            previous = Some(c);
            continue;
        }

        if c.is_ascii_digit() {
            while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '.') {
                i += 1;
            }
            previous = Some('0');
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            while i < chars.len()
                && (chars[i].1.is_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '$')
            {
                i += 1;
            }
            let end = chars.get(i).map_or(expr.len(), |(p, _)| *p);
            let word = &expr[pos..end];
            let next = chars[i..].iter().map(|(_, ch)| *ch).find(|ch| !ch.is_whitespace());

            let is_member = matches!(previous, Some('.') | Some('|'));
            let is_key = matches!(previous, Some('{') | Some(',')) && next == Some(':');
            if !is_member && !is_key && !KEYWORDS.contains(&word) {
                found.push((word, pos));
            }
            previous = Some('a');
            continue;
        }

        if !c.is_whitespace() {
            previous = Some(c);
        }
        i += 1;
    }
    found
}

/// The candidate closest to `name` by edit distance.
fn closest_name<'a>(name: &str, candidates: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    candidates.min_by_key(|candidate| (strsim::levenshtein(name, candidate), *candidate))
}
