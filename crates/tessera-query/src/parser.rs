//! Tessera Predicate Parser
//!
//! Parses dynamic string conditions such as `Age > 50` or
//! `UserName LIKE 'a%' AND Id IN (1, 2, 3)` into the typed predicate AST,
//! using sqlparser for tokenizing and expression precedence.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::predicate::Predicate;
use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;
use sqlparser::tokenizer::Token;
use tessera_common::{Result, TesseraError, Value};

// =============================================================================
// Entry Point
// =============================================================================

/// Parse a condition string into a predicate.
pub fn parse_predicate(text: &str) -> Result<Predicate> {
    if text.trim().is_empty() {
        return Err(TesseraError::Parse("empty condition".to_string()));
    }

    let dialect = GenericDialect {};
    let mut parser = SqlParser::new(&dialect)
        .try_with_sql(text)
        .map_err(|e| TesseraError::Parse(e.to_string()))?;
    let expr = parser
        .parse_expr()
        .map_err(|e| TesseraError::Parse(e.to_string()))?;

    let trailing = parser.peek_token();
    if trailing.token != Token::EOF {
        return Err(TesseraError::Parse(format!(
            "unexpected trailing input at '{}'",
            trailing.token
        )));
    }

    let predicate = convert_condition(expr)?;
    tracing::trace!(condition = text, predicate = %predicate, "parsed dynamic condition");
    Ok(predicate)
}

// =============================================================================
// Conversion
// =============================================================================

enum Operand {
    Field(String),
    Literal(Value),
}

#[derive(Clone, Copy)]
enum Comparison {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl Comparison {
    /// The same comparison with its operands swapped.
    fn flipped(self) -> Self {
        match self {
            Comparison::Eq => Comparison::Eq,
            Comparison::NotEq => Comparison::NotEq,
            Comparison::Lt => Comparison::Gt,
            Comparison::LtEq => Comparison::GtEq,
            Comparison::Gt => Comparison::Lt,
            Comparison::GtEq => Comparison::LtEq,
        }
    }

    fn build(self, field: String, value: Value) -> Predicate {
        match self {
            Comparison::Eq => Predicate::Eq { field, value },
            Comparison::NotEq => Predicate::Ne { field, value },
            Comparison::Lt => Predicate::Lt { field, value },
            Comparison::LtEq => Predicate::Lte { field, value },
            Comparison::Gt => Predicate::Gt { field, value },
            Comparison::GtEq => Predicate::Gte { field, value },
        }
    }
}

fn convert_condition(expr: sp::Expr) -> Result<Predicate> {
    match expr {
        sp::Expr::Nested(inner) => convert_condition(*inner),
        sp::Expr::BinaryOp { left, op, right } => match op {
            sp::BinaryOperator::And => Ok(convert_condition(*left)?.and(convert_condition(*right)?)),
            sp::BinaryOperator::Or => Ok(convert_condition(*left)?.or(convert_condition(*right)?)),
            other => {
                let comparison = convert_comparison(other)?;
                match (convert_operand(*left)?, convert_operand(*right)?) {
                    (Operand::Field(field), Operand::Literal(value)) => Ok(comparison.build(field, value)),
                    (Operand::Literal(value), Operand::Field(field)) => {
                        Ok(comparison.flipped().build(field, value))
                    }
                    _ => Err(TesseraError::Parse(
                        "comparison must have one field and one literal".to_string(),
                    )),
                }
            }
        },
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Not,
            expr,
        } => Ok(convert_condition(*expr)?.not()),
        sp::Expr::IsNull(inner) => Ok(Predicate::IsNull {
            field: expect_field(*inner)?,
        }),
        sp::Expr::IsNotNull(inner) => Ok(Predicate::IsNotNull {
            field: expect_field(*inner)?,
        }),
        sp::Expr::InList { expr, list, negated } => {
            let field = expect_field(*expr)?;
            let values = list
                .into_iter()
                .map(expect_literal)
                .collect::<Result<Vec<_>>>()?;
            Ok(if negated {
                Predicate::NotIn { field, values }
            } else {
                Predicate::In { field, values }
            })
        }
        sp::Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let field = expect_field(*expr)?;
            let range = Predicate::Gte {
                field: field.clone(),
                value: expect_literal(*low)?,
            }
            .and(Predicate::Lte {
                field,
                value: expect_literal(*high)?,
            });
            Ok(if negated { range.not() } else { range })
        }
        sp::Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let field = expect_field(*expr)?;
            let pattern = match expect_literal(*pattern)? {
                Value::String(s) => s,
                other => {
                    return Err(TesseraError::Parse(format!(
                        "LIKE pattern must be a string, got {}",
                        other.type_name()
                    )))
                }
            };
            let predicate = convert_like(field, &pattern)?;
            Ok(if negated { predicate.not() } else { predicate })
        }
        sp::Expr::Identifier(_) | sp::Expr::CompoundIdentifier(_) => Ok(Predicate::Eq {
            field: expect_field(expr)?,
            value: Value::Boolean(true),
        }),
        _ => Err(TesseraError::Parse(format!("unsupported condition: {}", expr))),
    }
}

fn convert_comparison(op: sp::BinaryOperator) -> Result<Comparison> {
    match op {
        sp::BinaryOperator::Eq => Ok(Comparison::Eq),
        sp::BinaryOperator::NotEq => Ok(Comparison::NotEq),
        sp::BinaryOperator::Lt => Ok(Comparison::Lt),
        sp::BinaryOperator::LtEq => Ok(Comparison::LtEq),
        sp::BinaryOperator::Gt => Ok(Comparison::Gt),
        sp::BinaryOperator::GtEq => Ok(Comparison::GtEq),
        other => Err(TesseraError::Parse(format!("unsupported operator: {}", other))),
    }
}

/// Translate a LIKE pattern with leading and/or trailing `%` wildcards.
fn convert_like(field: String, pattern: &str) -> Result<Predicate> {
    let mut core = pattern;
    let leading = core.starts_with('%');
    if leading {
        core = &core[1..];
    }
    let trailing = core.ends_with('%');
    if trailing {
        core = &core[..core.len() - 1];
    }

    if core.contains('%') || core.contains('_') {
        return Err(TesseraError::Parse(format!(
            "unsupported LIKE pattern '{}'",
            pattern
        )));
    }

    let value = core.to_string();
    Ok(match (leading, trailing) {
        (true, true) => Predicate::Contains { field, value },
        (false, true) => Predicate::StartsWith { field, value },
        (true, false) => Predicate::EndsWith { field, value },
        (false, false) => Predicate::Eq {
            field,
            value: Value::String(value),
        },
    })
}

fn convert_operand(expr: sp::Expr) -> Result<Operand> {
    match expr {
        sp::Expr::Identifier(ident) => Ok(Operand::Field(ident.value)),
        sp::Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(|i| Operand::Field(i.value.clone()))
            .ok_or_else(|| TesseraError::Parse("empty identifier".to_string())),
        sp::Expr::Nested(inner) => convert_operand(*inner),
        other => expect_literal(other).map(Operand::Literal),
    }
}

fn expect_field(expr: sp::Expr) -> Result<String> {
    match convert_operand(expr)? {
        Operand::Field(field) => Ok(field),
        Operand::Literal(value) => Err(TesseraError::Parse(format!(
            "expected a field name, found literal {}",
            value
        ))),
    }
}

fn expect_literal(expr: sp::Expr) -> Result<Value> {
    match expr {
        sp::Expr::Value(value) => convert_value(value),
        sp::Expr::Nested(inner) => expect_literal(*inner),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Minus,
            expr,
        } => match expect_literal(*expr)? {
            Value::Integer(i) => Ok(Value::Integer(-i)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(TesseraError::Parse(format!("cannot negate {}", other.type_name()))),
        },
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Plus,
            expr,
        } => expect_literal(*expr),
        other => Err(TesseraError::Parse(format!("expected a literal, found {}", other))),
    }
}

fn convert_value(value: sp::Value) -> Result<Value> {
    match value {
        sp::Value::Null => Ok(Value::Null),
        sp::Value::Boolean(b) => Ok(Value::Boolean(b)),
        sp::Value::Number(n, _) => {
            if n.contains('.') || n.contains('e') || n.contains('E') {
                n.parse()
                    .map(Value::Float)
                    .map_err(|_| TesseraError::Parse(format!("invalid float '{}'", n)))
            } else {
                n.parse()
                    .map(Value::Integer)
                    .map_err(|_| TesseraError::Parse(format!("invalid integer '{}'", n)))
            }
        }
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => Ok(Value::String(s)),
        other => Err(TesseraError::Parse(format!("unsupported literal {}", other))),
    }
}

// =============================================================================
// Tests
// =============================================================================
