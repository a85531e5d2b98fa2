//!
//! symbolic transition-weight algebra
//!
//! `WeightExpr` is an immutable expression tree over named parameters and
//! constants, supporting exactly the operators needed for exponential-family
//! conjugate updates: sum, product, difference, quotient, log, and the
//! geometric series `1/(1-p)` used to normalize Kleene self-loops.
//!
//! Trees are structurally shared (`Arc`, so machines can cross the
//! E-step's thread boundary) and acyclic; constructors fold constant
//! subtrees so that derivative trees stay small.
//!
use crate::error::Result;
use crate::params::Params;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Const(f64),
    Param(String),
    Add(WeightExpr, WeightExpr),
    Sub(WeightExpr, WeightExpr),
    Mul(WeightExpr, WeightExpr),
    Div(WeightExpr, WeightExpr),
    Log(WeightExpr),
    /// geometric series `1/(1-p)`
    GeomSum(WeightExpr),
}

///
/// immutable, structurally-shared weight expression
///
#[derive(Debug, Clone, PartialEq)]
pub struct WeightExpr(Arc<Expr>);

impl WeightExpr {
    pub fn constant(c: f64) -> WeightExpr {
        WeightExpr(Arc::new(Expr::Const(c)))
    }
    pub fn param(name: &str) -> WeightExpr {
        WeightExpr(Arc::new(Expr::Param(name.to_string())))
    }
    pub fn zero() -> WeightExpr {
        WeightExpr::constant(0.0)
    }
    pub fn one() -> WeightExpr {
        WeightExpr::constant(1.0)
    }

    fn as_const(&self) -> Option<f64> {
        match &*self.0 {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }
    pub fn is_zero(&self) -> bool {
        self.as_const() == Some(0.0)
    }
    pub fn is_one(&self) -> bool {
        self.as_const() == Some(1.0)
    }

    pub fn add(l: &WeightExpr, r: &WeightExpr) -> WeightExpr {
        if l.is_zero() {
            return r.clone();
        }
        if r.is_zero() {
            return l.clone();
        }
        match (l.as_const(), r.as_const()) {
            (Some(a), Some(b)) => WeightExpr::constant(a + b),
            _ => WeightExpr(Arc::new(Expr::Add(l.clone(), r.clone()))),
        }
    }
    pub fn sub(l: &WeightExpr, r: &WeightExpr) -> WeightExpr {
        if r.is_zero() {
            return l.clone();
        }
        match (l.as_const(), r.as_const()) {
            (Some(a), Some(b)) => WeightExpr::constant(a - b),
            _ => WeightExpr(Arc::new(Expr::Sub(l.clone(), r.clone()))),
        }
    }
    pub fn mul(l: &WeightExpr, r: &WeightExpr) -> WeightExpr {
        if l.is_zero() || r.is_zero() {
            return WeightExpr::zero();
        }
        if l.is_one() {
            return r.clone();
        }
        if r.is_one() {
            return l.clone();
        }
        match (l.as_const(), r.as_const()) {
            (Some(a), Some(b)) => WeightExpr::constant(a * b),
            _ => WeightExpr(Arc::new(Expr::Mul(l.clone(), r.clone()))),
        }
    }
    pub fn div(l: &WeightExpr, r: &WeightExpr) -> WeightExpr {
        if l.is_zero() {
            return WeightExpr::zero();
        }
        if r.is_one() {
            return l.clone();
        }
        // note: constant zero denominators are kept as a Div node so that
        // evaluation yields IEEE infinity, not a folding-time panic
        match (l.as_const(), r.as_const()) {
            (Some(a), Some(b)) if b != 0.0 => WeightExpr::constant(a / b),
            _ => WeightExpr(Arc::new(Expr::Div(l.clone(), r.clone()))),
        }
    }
    pub fn log_of(e: &WeightExpr) -> WeightExpr {
        match e.as_const() {
            Some(c) => WeightExpr::constant(c.ln()),
            None => WeightExpr(Arc::new(Expr::Log(e.clone()))),
        }
    }
    /// `1/(1-p)`, the closed form of `sum_{n>=0} p^n`
    pub fn geometric_sum(p: &WeightExpr) -> WeightExpr {
        match p.as_const() {
            Some(c) => WeightExpr::constant(1.0 / (1.0 - c)),
            None => WeightExpr(Arc::new(Expr::GeomSum(p.clone()))),
        }
    }

    ///
    /// Evaluate against a parameter assignment.
    ///
    /// A referenced name absent from the assignment is
    /// `Error::UndefinedParameter`; division by an expression evaluating to
    /// exactly 0 yields +/-inf per IEEE semantics (impossible transitions),
    /// not an error.
    ///
    pub fn eval(&self, params: &Params) -> Result<f64> {
        match &*self.0 {
            Expr::Const(c) => Ok(*c),
            Expr::Param(name) => params.get(name),
            Expr::Add(l, r) => Ok(l.eval(params)? + r.eval(params)?),
            Expr::Sub(l, r) => Ok(l.eval(params)? - r.eval(params)?),
            Expr::Mul(l, r) => Ok(l.eval(params)? * r.eval(params)?),
            Expr::Div(l, r) => Ok(l.eval(params)? / r.eval(params)?),
            Expr::Log(e) => Ok(e.eval(params)?.ln()),
            Expr::GeomSum(p) => Ok(1.0 / (1.0 - p.eval(params)?)),
        }
    }

    ///
    /// Exact symbolic partial derivative with respect to `name`.
    ///
    /// ```text
    /// d(l*r)   = l'r + lr'
    /// d(l/r)   = (l'r - lr') / r^2
    /// d(log e) = e'/e
    /// d(1/(1-p)) = p'/(1-p)^2
    /// ```
    ///
    /// Returns the zero expression when the parameter does not occur.
    ///
    pub fn deriv(&self, name: &str) -> WeightExpr {
        match &*self.0 {
            Expr::Const(_) => WeightExpr::zero(),
            Expr::Param(n) => {
                if n == name {
                    WeightExpr::one()
                } else {
                    WeightExpr::zero()
                }
            }
            Expr::Add(l, r) => WeightExpr::add(&l.deriv(name), &r.deriv(name)),
            Expr::Sub(l, r) => WeightExpr::sub(&l.deriv(name), &r.deriv(name)),
            Expr::Mul(l, r) => WeightExpr::add(
                &WeightExpr::mul(&l.deriv(name), r),
                &WeightExpr::mul(l, &r.deriv(name)),
            ),
            Expr::Div(l, r) => WeightExpr::div(
                &WeightExpr::sub(
                    &WeightExpr::mul(&l.deriv(name), r),
                    &WeightExpr::mul(l, &r.deriv(name)),
                ),
                &WeightExpr::mul(r, r),
            ),
            Expr::Log(e) => WeightExpr::div(&e.deriv(name), e),
            Expr::GeomSum(p) => {
                let one_minus = WeightExpr::sub(&WeightExpr::one(), p);
                WeightExpr::div(&p.deriv(name), &WeightExpr::mul(&one_minus, &one_minus))
            }
        }
    }

    /// Collect the parameter names referenced by this expression.
    pub fn params(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        self.collect_params(&mut set);
        set
    }
    fn collect_params(&self, set: &mut BTreeSet<String>) {
        match &*self.0 {
            Expr::Const(_) => {}
            Expr::Param(n) => {
                set.insert(n.clone());
            }
            Expr::Add(l, r) | Expr::Sub(l, r) | Expr::Mul(l, r) | Expr::Div(l, r) => {
                l.collect_params(set);
                r.collect_params(set);
            }
            Expr::Log(e) | Expr::GeomSum(e) => e.collect_params(set),
        }
    }
}

impl fmt::Display for WeightExpr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0 {
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Param(n) => write!(f, "{}", n),
            Expr::Add(l, r) => write!(f, "({}+{})", l, r),
            Expr::Sub(l, r) => write!(f, "({}-{})", l, r),
            Expr::Mul(l, r) => write!(f, "({}*{})", l, r),
            Expr::Div(l, r) => write!(f, "({}/{})", l, r),
            Expr::Log(e) => write!(f, "log({})", e),
            Expr::GeomSum(e) => write!(f, "geomsum({})", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use rand::prelude::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn params_xy(x: f64, y: f64) -> Params {
        let mut p = Params::new();
        p.set("x", x);
        p.set("y", y);
        p
    }

    #[test]
    fn expr_eval_basic() {
        let p = params_xy(0.3, 2.0);
        let x = WeightExpr::param("x");
        let y = WeightExpr::param("y");
        let e = WeightExpr::add(&WeightExpr::mul(&x, &y), &WeightExpr::constant(1.0));
        assert_abs_diff_eq!(e.eval(&p).unwrap(), 1.6, epsilon = 1e-12);
        let g = WeightExpr::geometric_sum(&x);
        assert_abs_diff_eq!(g.eval(&p).unwrap(), 1.0 / 0.7, epsilon = 1e-12);
        let l = WeightExpr::log_of(&y);
        assert_abs_diff_eq!(l.eval(&p).unwrap(), 2f64.ln(), epsilon = 1e-12);
    }
    #[test]
    fn expr_eval_undefined_param() {
        let p = Params::new();
        let e = WeightExpr::param("missing");
        assert_eq!(
            e.eval(&p),
            Err(Error::UndefinedParameter("missing".to_string()))
        );
    }
    #[test]
    fn expr_eval_zero_denominator() {
        // division by exact zero is IEEE inf, not an error
        let p = params_xy(0.0, 1.0);
        let e = WeightExpr::div(&WeightExpr::one(), &WeightExpr::param("x"));
        assert_eq!(e.eval(&p).unwrap(), f64::INFINITY);
    }
    #[test]
    fn expr_constant_folding() {
        let x = WeightExpr::param("x");
        assert_eq!(WeightExpr::add(&x, &WeightExpr::zero()), x);
        assert_eq!(WeightExpr::mul(&x, &WeightExpr::one()), x);
        assert!(WeightExpr::mul(&x, &WeightExpr::zero()).is_zero());
        assert_eq!(
            WeightExpr::add(&WeightExpr::constant(2.0), &WeightExpr::constant(3.0)),
            WeightExpr::constant(5.0)
        );
    }
    #[test]
    fn expr_deriv_absent_param_is_zero() {
        let e = WeightExpr::mul(&WeightExpr::param("x"), &WeightExpr::constant(3.0));
        assert!(e.deriv("y").is_zero());
    }
    #[test]
    fn expr_deriv_geomsum() {
        // d/dx 1/(1-x) = 1/(1-x)^2
        let p = params_xy(0.4, 0.0);
        let e = WeightExpr::geometric_sum(&WeightExpr::param("x"));
        let d = e.deriv("x").eval(&p).unwrap();
        assert_abs_diff_eq!(d, 1.0 / (0.6 * 0.6), epsilon = 1e-12);
    }
    #[test]
    fn expr_deriv_matches_finite_difference() {
        // random expressions over {x, y}, checked against central differences
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let x = WeightExpr::param("x");
        let y = WeightExpr::param("y");
        let exprs = vec![
            WeightExpr::mul(&x, &y),
            WeightExpr::div(&x, &WeightExpr::add(&y, &WeightExpr::one())),
            WeightExpr::log_of(&WeightExpr::add(&WeightExpr::mul(&x, &x), &y)),
            WeightExpr::geometric_sum(&WeightExpr::mul(&x, &WeightExpr::constant(0.5))),
            WeightExpr::sub(&WeightExpr::mul(&x, &y), &WeightExpr::div(&y, &x)),
        ];
        let h = 1e-6;
        for e in &exprs {
            for _ in 0..10 {
                let xv: f64 = rng.gen_range(0.1..0.9);
                let yv: f64 = rng.gen_range(0.1..0.9);
                let exact = e.deriv("x").eval(&params_xy(xv, yv)).unwrap();
                let plus = e.eval(&params_xy(xv + h, yv)).unwrap();
                let minus = e.eval(&params_xy(xv - h, yv)).unwrap();
                let numeric = (plus - minus) / (2.0 * h);
                assert_abs_diff_eq!(exact, numeric, epsilon = 1e-4);
            }
        }
    }
    #[test]
    fn expr_params_collected() {
        let e = WeightExpr::add(
            &WeightExpr::mul(&WeightExpr::param("a"), &WeightExpr::param("b")),
            &WeightExpr::log_of(&WeightExpr::param("a")),
        );
        let names: Vec<String> = e.params().into_iter().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
