//! Rate-law and amount expressions.
//!
//! Expressions arrive from the (external) front end as small arithmetic
//! trees over constants, parameter references, and observable references.
//! Evaluation is pure and synchronous; the only failure modes are unbound
//! references and division by zero, both reported with the offending
//! expression rendered back into text.
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::decl::DeclarationError;

/// A pure arithmetic expression over parameters and observables.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Literal constant.
    Const(f64),
    /// Reference to a named parameter.
    Param(String),
    /// Reference to a named observable (resolved by the simulation layer;
    /// unbound during network generation unless supplied).
    Observable(String),
    /// Unary negation.
    Neg(Box<Expr>),
    /// Sum.
    Add(Box<Expr>, Box<Expr>),
    /// Difference.
    Sub(Box<Expr>, Box<Expr>),
    /// Product.
    Mul(Box<Expr>, Box<Expr>),
    /// Quotient. Dividing by zero is an [`EvaluationError`].
    Div(Box<Expr>, Box<Expr>),
    /// Power.
    Pow(Box<Expr>, Box<Expr>),
}

/// Errors raised while evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvaluationError {
    /// The expression referenced a parameter or observable with no binding.
    #[error("unbound reference `{name}` in `{expr}`")]
    Unbound {
        /// The unresolved name.
        name: String,
        /// The full expression, rendered.
        expr: String,
    },
    /// The expression divided by zero.
    #[error("division by zero in `{expr}`")]
    DivisionByZero {
        /// The full expression, rendered.
        expr: String,
    },
}

/// Name-to-value bindings used during evaluation.
pub type Bindings = FxHashMap<String, f64>;

impl Expr {
    /// Convenience constructor for a constant.
    pub fn constant(v: f64) -> Self {
        Self::Const(v)
    }

    /// Convenience constructor for a parameter reference.
    pub fn param(name: &str) -> Self {
        Self::Param(name.to_owned())
    }

    /// Evaluates the expression against `bindings`.
    ///
    /// # Errors
    /// [`EvaluationError::Unbound`] for unresolved references and
    /// [`EvaluationError::DivisionByZero`] where a divisor evaluates to zero.
    pub fn eval(&self, bindings: &Bindings) -> Result<f64, EvaluationError> {
        self.eval_inner(bindings, self)
    }

    fn eval_inner(&self, bindings: &Bindings, root: &Expr) -> Result<f64, EvaluationError> {
        match self {
            Self::Const(v) => Ok(*v),
            Self::Param(name) | Self::Observable(name) => {
                bindings.get(name).copied().ok_or_else(|| EvaluationError::Unbound {
                    name: name.clone(),
                    expr: root.render(),
                })
            }
            Self::Neg(e) => Ok(-e.eval_inner(bindings, root)?),
            Self::Add(a, b) => Ok(a.eval_inner(bindings, root)? + b.eval_inner(bindings, root)?),
            Self::Sub(a, b) => Ok(a.eval_inner(bindings, root)? - b.eval_inner(bindings, root)?),
            Self::Mul(a, b) => Ok(a.eval_inner(bindings, root)? * b.eval_inner(bindings, root)?),
            Self::Div(a, b) => {
                let denom = b.eval_inner(bindings, root)?;
                if denom == 0.0 {
                    return Err(EvaluationError::DivisionByZero { expr: root.render() });
                }
                Ok(a.eval_inner(bindings, root)? / denom)
            }
            Self::Pow(a, b) => {
                Ok(a.eval_inner(bindings, root)?.powf(b.eval_inner(bindings, root)?))
            }
        }
    }

    /// Renders the expression back into infix text for error reports.
    pub fn render(&self) -> String {
        match self {
            Self::Const(v) => format!("{v}"),
            Self::Param(name) | Self::Observable(name) => name.clone(),
            Self::Neg(e) => format!("-({})", e.render()),
            Self::Add(a, b) => format!("({} + {})", a.render(), b.render()),
            Self::Sub(a, b) => format!("({} - {})", a.render(), b.render()),
            Self::Mul(a, b) => format!("({} * {})", a.render(), b.render()),
            Self::Div(a, b) => format!("({} / {})", a.render(), b.render()),
            Self::Pow(a, b) => format!("({} ^ {})", a.render(), b.render()),
        }
    }

    fn references(&self, out: &mut Vec<String>) {
        match self {
            Self::Const(_) => {}
            Self::Param(name) | Self::Observable(name) => out.push(name.clone()),
            Self::Neg(e) => e.references(out),
            Self::Add(a, b)
            | Self::Sub(a, b)
            | Self::Mul(a, b)
            | Self::Div(a, b)
            | Self::Pow(a, b) => {
                a.references(out);
                b.references(out);
            }
        }
    }
}

/// Resolves a set of named parameter expressions to concrete values.
///
/// Parameters may reference other parameters; references are resolved in
/// dependency order. A reference cycle is a [`DeclarationError`] because it
/// is a structural defect of the model, not a transient evaluation problem.
///
/// # Errors
/// [`DeclarationError::ParameterCycle`] on cyclic definitions; unbound or
/// zero-division failures inside a definition surface as
/// [`ParameterError::Evaluation`].
pub fn resolve_parameters(
    params: &[(String, Expr)],
) -> Result<Bindings, ParameterError> {
    let by_name: FxHashMap<&str, &Expr> =
        params.iter().map(|(n, e)| (n.as_str(), e)).collect();
    let mut resolved = Bindings::default();
    let mut in_progress: Vec<String> = Vec::new();

    fn resolve_one(
        name: &str,
        by_name: &FxHashMap<&str, &Expr>,
        resolved: &mut Bindings,
        in_progress: &mut Vec<String>,
    ) -> Result<f64, ParameterError> {
        if let Some(v) = resolved.get(name) {
            return Ok(*v);
        }
        if in_progress.iter().any(|n| n == name) {
            return Err(ParameterError::Declaration(DeclarationError::ParameterCycle(
                name.to_owned(),
            )));
        }
        let Some(expr) = by_name.get(name) else {
            return Err(ParameterError::Evaluation(EvaluationError::Unbound {
                name: name.to_owned(),
                expr: name.to_owned(),
            }));
        };
        in_progress.push(name.to_owned());
        let mut refs = Vec::new();
        expr.references(&mut refs);
        for r in refs {
            if !resolved.contains_key(&r) {
                let v = resolve_one(&r, by_name, resolved, in_progress)?;
                resolved.insert(r, v);
            }
        }
        in_progress.pop();
        let value = expr.eval(resolved).map_err(ParameterError::Evaluation)?;
        resolved.insert(name.to_owned(), value);
        Ok(value)
    }

    for (name, _) in params {
        resolve_one(name, &by_name, &mut resolved, &mut in_progress)?;
    }
    Ok(resolved)
}

/// Failure while resolving the global parameter block. Always fatal: global
/// parameters gate everything downstream.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    /// Structural defect (cycle).
    #[error(transparent)]
    Declaration(#[from] DeclarationError),
    /// A definition failed to evaluate.
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_and_references() {
        let params = vec![
            ("kp".to_owned(), Expr::constant(2.0)),
            (
                "km".to_owned(),
                Expr::Div(Box::new(Expr::param("kp")), Box::new(Expr::constant(4.0))),
            ),
        ];
        let bound = resolve_parameters(&params).unwrap();
        assert_eq!(bound["km"], 0.5);
    }

    #[test]
    fn division_by_zero_names_expression() {
        let e = Expr::Div(Box::new(Expr::constant(1.0)), Box::new(Expr::constant(0.0)));
        let err = e.eval(&Bindings::default()).unwrap_err();
        assert!(matches!(err, EvaluationError::DivisionByZero { .. }));
    }

    #[test]
    fn cycle_detected() {
        let params = vec![
            ("a".to_owned(), Expr::param("b")),
            ("b".to_owned(), Expr::param("a")),
        ];
        let err = resolve_parameters(&params).unwrap_err();
        assert!(matches!(
            err,
            ParameterError::Declaration(DeclarationError::ParameterCycle(_))
        ));
    }

    #[test]
    fn unbound_reference_names_offender() {
        let e = Expr::Mul(Box::new(Expr::param("missing")), Box::new(Expr::constant(3.0)));
        let err = e.eval(&Bindings::default()).unwrap_err();
        match err {
            EvaluationError::Unbound { name, .. } => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
