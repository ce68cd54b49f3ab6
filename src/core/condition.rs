//! `if:` conditions for jobs and steps

use crate::core::{
    context::ExpressionContext,
    expression::{strip_wrapper, BinaryOp, Expr, ExpressionError},
};

/// A parsed `if:` condition
///
/// Without any status function the expression is implicitly
/// `success() && (<expr>)`, so a plain `if: matrix.os == 'x'` never runs a
/// step after the job has already failed.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Parse an `if:` value, with or without the `${{ }}` wrapper
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let inner = strip_wrapper(source);
        let parsed = Expr::parse(inner)?;

        let expr = if parsed.uses_status_function() {
            parsed
        } else {
            Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(Expr::Call {
                    name: "success".to_string(),
                    args: Vec::new(),
                }),
                rhs: Box::new(parsed),
            }
        };

        Ok(Self {
            source: inner.to_string(),
            expr,
        })
    }

    /// The condition used when `if:` is absent
    pub fn default_success() -> Self {
        Self {
            source: "success()".to_string(),
            expr: Expr::Call {
                name: "success".to_string(),
                args: Vec::new(),
            },
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, ctx: &ExpressionContext) -> Result<bool, ExpressionError> {
        Ok(self.expr.evaluate(ctx)?.is_truthy())
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::default_success()
    }
}
