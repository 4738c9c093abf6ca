//! The expression tree produced by [`super::parser::FormulaParser`] and
//! evaluated against a binding table of named scalars.

use crate::error::CalculationError;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Abs,
    Min,
    Max,
    Log,
    Exp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// How a zero divisor is handled during evaluation. Division by zero
/// fails by default; a caller may opt in to treating it as a missing
/// result instead (propagated the same way a `NaN` operand is).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DivisionZeroPolicy {
    #[default]
    Error,
    PropagateMissing,
}

/// A parsed arithmetic expression. No variant executes arbitrary code;
/// the whitelist of [`Func`] is exhaustive and closed.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    /// `abs`/`log`/`exp` take one argument; `min`/`max` take two.
    Call(Func, Vec<Expr>),
    Compare(Cmp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluates the expression against a variable binding table.
    ///
    /// Returns [`CalculationError::UnboundVariable`] for any identifier
    /// not present in `bindings`. A zero divisor is handled per
    /// `division_policy`: [`DivisionZeroPolicy::Error`] (the default)
    /// fails with [`CalculationError::DivisionByZero`];
    /// [`DivisionZeroPolicy::PropagateMissing`] yields `NaN` instead,
    /// the same way a `NaN` operand already propagates a missing
    /// upstream input through the rest of the expression.
    pub fn eval(&self, bindings: &HashMap<String, f64>, division_policy: DivisionZeroPolicy) -> Result<f64, CalculationError> {
        match self {
            Expr::Number(n) => Ok(*n),
            Expr::Var(name) => bindings
                .get(name)
                .copied()
                .ok_or_else(|| CalculationError::UnboundVariable(name.clone())),
            Expr::Neg(inner) => inner.eval(bindings, division_policy).map(|v| -v),
            Expr::Bin(op, lhs, rhs) => {
                let l = lhs.eval(bindings, division_policy)?;
                let r = rhs.eval(bindings, division_policy)?;
                if l.is_nan() || r.is_nan() {
                    return Ok(f64::NAN);
                }
                match op {
                    BinOp::Add => Ok(l + r),
                    BinOp::Sub => Ok(l - r),
                    BinOp::Mul => Ok(l * r),
                    BinOp::Div => {
                        if r == 0.0 {
                            match division_policy {
                                DivisionZeroPolicy::Error => Err(CalculationError::DivisionByZero("formula".to_string())),
                                DivisionZeroPolicy::PropagateMissing => Ok(f64::NAN),
                            }
                        } else {
                            Ok(l / r)
                        }
                    }
                    BinOp::Pow => Ok(l.powf(r)),
                }
            }
            Expr::Call(func, args) => {
                let mut vals = Vec::with_capacity(args.len());
                for a in args {
                    vals.push(a.eval(bindings, division_policy)?);
                }
                if vals.iter().any(|v| v.is_nan()) {
                    return Ok(f64::NAN);
                }
                match (func, vals.as_slice()) {
                    (Func::Abs, [v]) => Ok(v.abs()),
                    (Func::Log, [v]) => Ok(v.ln()),
                    (Func::Exp, [v]) => Ok(v.exp()),
                    (Func::Min, [a, b]) => Ok(a.min(*b)),
                    (Func::Max, [a, b]) => Ok(a.max(*b)),
                    _ => Err(CalculationError::ArityMismatch {
                        strategy: format!("{:?}", func),
                        expected: expected_arity(*func),
                        actual: vals.len(),
                    }),
                }
            }
            Expr::Compare(cmp, lhs, rhs) => {
                let l = lhs.eval(bindings, division_policy)?;
                let r = rhs.eval(bindings, division_policy)?;
                if l.is_nan() || r.is_nan() {
                    return Ok(f64::NAN);
                }
                let truth = match cmp {
                    Cmp::Lt => l < r,
                    Cmp::Le => l <= r,
                    Cmp::Gt => l > r,
                    Cmp::Ge => l >= r,
                    Cmp::Eq => l == r,
                };
                Ok(if truth { 1.0 } else { 0.0 })
            }
        }
    }

    /// Names of free variables referenced by this expression, in
    /// first-occurrence order. Used to validate that a formula's
    /// `var_names` list covers everything the expression needs.
    pub fn free_vars(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut Vec<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Var(name) => {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_vars(out),
            Expr::Bin(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
            Expr::Call(_, args) => {
                for a in args {
                    a.collect_vars(out);
                }
            }
            Expr::Compare(_, l, r) => {
                l.collect_vars(out);
                r.collect_vars(out);
            }
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Pow => "^",
        })
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Func::Abs => "abs",
            Func::Min => "min",
            Func::Max => "max",
            Func::Log => "log",
            Func::Exp => "exp",
        })
    }
}

impl fmt::Display for Cmp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
            Cmp::Eq => "==",
        })
    }
}

/// Always fully parenthesizes, so the printed form re-parses to an
/// identical tree regardless of operator precedence — used by the
/// serialization boundary, not for human-facing display.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Var(name) => write!(f, "{name}"),
            Expr::Neg(inner) => write!(f, "(-{inner})"),
            Expr::Bin(op, l, r) => write!(f, "({l} {op} {r})"),
            Expr::Call(func, args) => {
                let rendered: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "{func}({})", rendered.join(", "))
            }
            Expr::Compare(cmp, l, r) => write!(f, "({l} {cmp} {r})"),
        }
    }
}

fn expected_arity(func: Func) -> usize {
    match func {
        Func::Abs | Func::Log | Func::Exp => 1,
        Func::Min | Func::Max => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn bindings(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn arithmetic_evaluates() {
        let e = Expr::Bin(
            BinOp::Add,
            Box::new(Expr::Var("a".into())),
            Box::new(Expr::Number(2.0)),
        );
        assert_eq!(e.eval(&bindings(&[("a", 3.0)]), DivisionZeroPolicy::Error).unwrap(), 5.0);
    }

    #[test]
    fn division_by_zero_errors_under_the_default_policy() {
        let e = Expr::Bin(BinOp::Div, Box::new(Expr::Number(1.0)), Box::new(Expr::Number(0.0)));
        assert_eq!(
            e.eval(&HashMap::new(), DivisionZeroPolicy::Error).unwrap_err(),
            CalculationError::DivisionByZero("formula".to_string())
        );
    }

    #[test]
    fn division_by_zero_propagates_missing_under_the_opt_in_policy() {
        let e = Expr::Bin(BinOp::Div, Box::new(Expr::Number(1.0)), Box::new(Expr::Number(0.0)));
        let result = e.eval(&HashMap::new(), DivisionZeroPolicy::PropagateMissing).unwrap();
        assert!(result.is_nan());
    }

    #[test]
    fn unbound_variable_errors() {
        let e = Expr::Var("missing".into());
        assert_eq!(
            e.eval(&HashMap::new(), DivisionZeroPolicy::Error).unwrap_err(),
            CalculationError::UnboundVariable("missing".to_string())
        );
    }

    #[test]
    fn nan_operand_propagates_without_erroring() {
        let e = Expr::Bin(BinOp::Add, Box::new(Expr::Var("a".into())), Box::new(Expr::Number(1.0)));
        let result = e.eval(&bindings(&[("a", f64::NAN)]), DivisionZeroPolicy::Error).unwrap();
        assert!(result.is_nan());
    }

    #[rstest]
    #[case(Cmp::Lt, 1.0, 2.0, 1.0)]
    #[case(Cmp::Gt, 1.0, 2.0, 0.0)]
    #[case(Cmp::Eq, 2.0, 2.0, 1.0)]
    fn comparisons_yield_zero_or_one(#[case] cmp: Cmp, #[case] l: f64, #[case] r: f64, #[case] expected: f64) {
        let e = Expr::Compare(cmp, Box::new(Expr::Number(l)), Box::new(Expr::Number(r)));
        assert_eq!(e.eval(&HashMap::new(), DivisionZeroPolicy::Error).unwrap(), expected);
    }

    #[test]
    fn display_output_reparses_to_an_equivalent_tree() {
        use crate::formula::parser::FormulaParser;
        let e = Expr::Bin(BinOp::Sub, Box::new(Expr::Var("Revenue".into())), Box::new(Expr::Var("COGS".into())));
        let rendered = e.to_string();
        let reparsed = FormulaParser::parse(&rendered).unwrap();
        let bindings = bindings(&[("Revenue", 100.0), ("COGS", 40.0)]);
        assert_eq!(
            e.eval(&bindings, DivisionZeroPolicy::Error).unwrap(),
            reparsed.eval(&bindings, DivisionZeroPolicy::Error).unwrap()
        );
    }

    #[test]
    fn free_vars_deduplicates_in_occurrence_order() {
        let e = Expr::Bin(
            BinOp::Add,
            Box::new(Expr::Var("a".into())),
            Box::new(Expr::Bin(BinOp::Mul, Box::new(Expr::Var("b".into())), Box::new(Expr::Var("a".into())))),
        );
        assert_eq!(e.free_vars(), vec!["a".to_string(), "b".to_string()]);
    }
}
