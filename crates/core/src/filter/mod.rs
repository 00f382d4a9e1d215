//! Stream filter expression engine.
//!
//! Users supply a small boolean expression over the attributes of a stream
//! (`Resolution >= "1080p" && !IsPrivate`). Compilation parses the source
//! and rewrites comparisons on rank-typed fields (`Resolution`, `Quality`,
//! `Size`, `File.Size`) so both operands flow through the corresponding
//! rank table before comparison — `"2160p" > "720p"` holds even though it
//! fails lexically.
//!
//! Filtering is a refinement, not a gate: any evaluation error (undefined
//! field, type mismatch, non-boolean result) makes the record match, so a
//! bad filter can never suppress results.

mod parser;

use std::collections::HashMap;

use thiserror::Error;

use crate::rank;

/// Compile errors, surfaced to the caller unchanged.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("unexpected character `{ch}` at position {pos}")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { pos: usize, found: String },
    #[error("unterminated string starting at position {pos}")]
    UnterminatedString { pos: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected {found} after expression at position {pos}")]
    TrailingInput { pos: usize, found: String },
}

/// The projection of a stream that filter expressions evaluate against.
#[derive(Debug, Clone, Default)]
pub struct FilterRecord {
    pub resolution: String,
    pub quality: String,
    pub size: String,
    pub hdr: Vec<String>,
    pub seeders: i64,
    pub is_private: bool,
    pub file: FileRecord,
}

/// File attributes within a [`FilterRecord`].
#[derive(Debug, Clone, Default)]
pub struct FileRecord {
    pub name: String,
    pub size: String,
    pub index: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<String>),
    /// An identifier not present in the record. Undefined variables compile
    /// cleanly; using one in a comparison is a runtime error (= match).
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Value),
    Field(Vec<String>),
    /// Operand rewritten to flow through a named rank converter.
    Convert {
        converter: &'static str,
        inner: Box<Expr>,
    },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

type RankFn = fn(&str) -> i64;

struct EvalError;

/// A compiled filter expression.
pub struct FilterProgram {
    expr: Option<Expr>,
    converters: HashMap<&'static str, RankFn>,
}

/// Compile a filter source string. Empty source compiles to a program that
/// matches every record.
pub fn compile(source: &str) -> Result<FilterProgram, FilterError> {
    let mut converters: HashMap<&'static str, RankFn> = HashMap::new();
    converters.insert("resolution_rank", rank::resolution_rank);
    converters.insert("quality_rank", rank::quality_rank);
    converters.insert("size_rank", rank::size_rank);

    if source.trim().is_empty() {
        return Ok(FilterProgram {
            expr: None,
            converters,
        });
    }

    let expr = parser::parse(source)?;
    let expr = rewrite_ranked_comparisons(expr);
    Ok(FilterProgram {
        expr: Some(expr),
        converters,
    })
}

/// The converter for a rank-typed field path, if the path names one.
fn rank_converter(expr: &Expr) -> Option<&'static str> {
    let Expr::Field(path) = expr else {
        return None;
    };
    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
    match segments.as_slice() {
        ["Resolution"] => Some("resolution_rank"),
        ["Quality"] => Some("quality_rank"),
        ["Size"] | ["File", "Size"] => Some("size_rank"),
        _ => None,
    }
}

/// Visit binary comparison nodes and wrap both operands in the rank
/// converter when either side refers to a rank-typed field.
fn rewrite_ranked_comparisons(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { op, lhs, rhs } if op.is_comparison() => {
            let converter = rank_converter(&lhs).or_else(|| rank_converter(&rhs));
            match converter {
                Some(converter) => Expr::Binary {
                    op,
                    lhs: Box::new(Expr::Convert {
                        converter,
                        inner: lhs,
                    }),
                    rhs: Box::new(Expr::Convert {
                        converter,
                        inner: rhs,
                    }),
                },
                None => Expr::Binary { op, lhs, rhs },
            }
        }
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: Box::new(rewrite_ranked_comparisons(*lhs)),
            rhs: Box::new(rewrite_ranked_comparisons(*rhs)),
        },
        Expr::Not(inner) => Expr::Not(Box::new(rewrite_ranked_comparisons(*inner))),
        other => other,
    }
}

impl FilterProgram {
    /// Whether the record passes the filter. Evaluation errors count as a
    /// match.
    pub fn matches(&self, record: &FilterRecord) -> bool {
        let Some(expr) = &self.expr else {
            return true;
        };
        match self.eval(expr, record) {
            Ok(Value::Bool(matched)) => matched,
            Ok(_) | Err(EvalError) => true,
        }
    }

    fn eval(&self, expr: &Expr, record: &FilterRecord) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(path) => Ok(lookup_field(record, path)),
            Expr::Convert { converter, inner } => {
                let value = self.eval(inner, record)?;
                let rank_fn = self.converters.get(converter).ok_or(EvalError)?;
                match value {
                    Value::Str(s) => Ok(Value::Num(rank_fn(&s) as f64)),
                    Value::Num(n) => Ok(Value::Num(n)),
                    Value::Empty => Ok(Value::Empty),
                    _ => Err(EvalError),
                }
            }
            Expr::Not(inner) => match self.eval(inner, record)? {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                _ => Err(EvalError),
            },
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => {
                    match self.eval(lhs, record)? {
                        Value::Bool(false) => return Ok(Value::Bool(false)),
                        Value::Bool(true) => {}
                        _ => return Err(EvalError),
                    }
                    match self.eval(rhs, record)? {
                        Value::Bool(b) => Ok(Value::Bool(b)),
                        _ => Err(EvalError),
                    }
                }
                BinaryOp::Or => {
                    match self.eval(lhs, record)? {
                        Value::Bool(true) => return Ok(Value::Bool(true)),
                        Value::Bool(false) => {}
                        _ => return Err(EvalError),
                    }
                    match self.eval(rhs, record)? {
                        Value::Bool(b) => Ok(Value::Bool(b)),
                        _ => Err(EvalError),
                    }
                }
                _ => {
                    let lhs = self.eval(lhs, record)?;
                    let rhs = self.eval(rhs, record)?;
                    compare(*op, &lhs, &rhs)
                }
            },
        }
    }
}

fn lookup_field(record: &FilterRecord, path: &[String]) -> Value {
    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
    match segments.as_slice() {
        ["Resolution"] => Value::Str(record.resolution.clone()),
        ["Quality"] => Value::Str(record.quality.clone()),
        ["Size"] => Value::Str(record.size.clone()),
        ["HDR"] => Value::List(record.hdr.clone()),
        ["Seeders"] => Value::Num(record.seeders as f64),
        ["IsPrivate"] => Value::Bool(record.is_private),
        ["File", "Name"] => Value::Str(record.file.name.clone()),
        ["File", "Size"] => Value::Str(record.file.size.clone()),
        ["File", "Index"] => Value::Num(record.file.index as f64),
        _ => Value::Empty,
    }
}

fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    use std::cmp::Ordering;

    let ordering = match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => a.partial_cmp(b).ok_or(EvalError)?,
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => match op {
            BinaryOp::Eq => return Ok(Value::Bool(a == b)),
            BinaryOp::Ne => return Ok(Value::Bool(a != b)),
            _ => return Err(EvalError),
        },
        _ => return Err(EvalError),
    };

    let matched = match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::Ne => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::Le => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        BinaryOp::Ge => ordering != Ordering::Less,
        BinaryOp::And | BinaryOp::Or => return Err(EvalError),
    };
    Ok(Value::Bool(matched))
}
