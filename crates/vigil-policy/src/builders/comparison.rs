//! Integer and string comparison helpers.
//!
//! The left operand is always the target field; the right operand is a single
//! literal or `$reference`. Integer literals are converted at build time, so
//! a bad literal is a build error, not a per-event failure. String ordering
//! is byte-lexicographic.

use std::sync::Arc;

use crate::builders::{
    check_arity, failure_trace, format_helper_name, parameter_not_found, success_trace,
    target_not_found,
};
use crate::error::{BuildError, RegistryError};
use crate::expression::Expression;
use crate::parameter::{parse_parameters, Parameter};
use crate::registry::{HelperDefinition, Registry};
use crate::result::EvalResult;

/// Comparison operators shared by both typed families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// String-only: left starts with right.
    StartsWith,
    /// String-only: left contains right; empty right never matches.
    Contains,
}

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register("int_equal", |d| int_comparison(d, Op::Eq))?;
    registry.register("int_not_equal", |d| int_comparison(d, Op::Ne))?;
    registry.register("int_greater", |d| int_comparison(d, Op::Gt))?;
    registry.register("int_greater_or_equal", |d| int_comparison(d, Op::Ge))?;
    registry.register("int_less", |d| int_comparison(d, Op::Lt))?;
    registry.register("int_less_or_equal", |d| int_comparison(d, Op::Le))?;

    registry.register("string_equal", |d| string_comparison(d, Op::Eq))?;
    registry.register("string_not_equal", |d| string_comparison(d, Op::Ne))?;
    registry.register("string_greater", |d| string_comparison(d, Op::Gt))?;
    registry.register("string_greater_or_equal", |d| string_comparison(d, Op::Ge))?;
    registry.register("string_less", |d| string_comparison(d, Op::Lt))?;
    registry.register("string_less_or_equal", |d| string_comparison(d, Op::Le))?;
    registry.register("starts_with", |d| string_comparison(d, Op::StartsWith))?;
    registry.register("contains", |d| string_comparison(d, Op::Contains))?;
    Ok(())
}

fn int_holds(op: Op, l: i64, r: i64) -> bool {
    match op {
        Op::Eq => l == r,
        Op::Ne => l != r,
        Op::Gt => l > r,
        Op::Ge => l >= r,
        Op::Lt => l < r,
        Op::Le => l <= r,
        Op::StartsWith | Op::Contains => false,
    }
}

fn string_holds(op: Op, l: &str, r: &str) -> bool {
    match op {
        Op::Eq => l == r,
        Op::Ne => l != r,
        Op::Gt => l > r,
        Op::Ge => l >= r,
        Op::Lt => l < r,
        Op::Le => l <= r,
        Op::StartsWith => l.starts_with(r),
        Op::Contains => !r.is_empty() && l.contains(r),
    }
}

enum IntRhs {
    Literal(i64),
    Reference(String),
}

fn int_comparison(def: &HelperDefinition, op: Op) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let rhs = match &params[0] {
        Parameter::Value(raw) => {
            IntRhs::Literal(raw.parse().map_err(|_| BuildError::Conversion {
                helper: def.helper.clone(),
                value: raw.clone(),
                target: "int",
            })?)
        }
        Parameter::Reference(path) => IntRhs::Reference(path.clone()),
    };

    let success = success_trace(&name);
    let no_target = target_not_found(&name, &def.target_field);
    let no_param = parameter_not_found(&name, &params[0]);
    let no_match = failure_trace(&name, "Comparison is false");
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let left = match event.get_int(&target) {
                Some(n) => n,
                None => return EvalResult::failure(event, Arc::clone(&no_target)),
            };
            let right = match &rhs {
                IntRhs::Literal(n) => *n,
                IntRhs::Reference(path) => match event.get_int(path) {
                    Some(n) => n,
                    None => return EvalResult::failure(event, Arc::clone(&no_param)),
                },
            };
            if int_holds(op, left, right) {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&no_match))
            }
        }),
    ))
}

fn string_comparison(def: &HelperDefinition, op: Op) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let rhs = params[0].clone();
    let success = success_trace(&name);
    let no_target = target_not_found(&name, &def.target_field);
    let no_param = parameter_not_found(&name, &params[0]);
    let no_match = failure_trace(&name, "Comparison is false");
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let left = match event.get_string(&target) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_target)),
            };
            let right = match &rhs {
                Parameter::Value(raw) => raw.clone(),
                Parameter::Reference(path) => match event.get_string(path) {
                    Some(s) => s,
                    None => return EvalResult::failure(event, Arc::clone(&no_param)),
                },
            };
            if string_holds(op, &left, &right) {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&no_match))
            }
        }),
    ))
}
