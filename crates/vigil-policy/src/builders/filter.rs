//! Field filters: regex, CIDR, existence, array membership and type tests.

use std::net::Ipv4Addr;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::builders::{
    check_arity, check_min_arity, expect_value, failure_trace, format_helper_name,
    success_trace, target_not_found,
};
use crate::error::{BuildError, RegistryError};
use crate::event::Event;
use crate::expression::Expression;
use crate::parameter::{parse_parameters, Parameter};
use crate::registry::{HelperDefinition, Registry};
use crate::result::EvalResult;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register("regex_match", |d| regex_filter(d, false))?;
    registry.register("regex_not_match", |d| regex_filter(d, true))?;
    registry.register("ip_cidr_match", ip_cidr_match)?;
    registry.register("exists", |d| existence(d, true))?;
    registry.register("not_exists", |d| existence(d, false))?;
    registry.register("array_contains", array_contains)?;

    registry.register("is_number", |d| type_test(d, Event::is_number, "a number", false))?;
    registry.register("is_not_number", |d| type_test(d, Event::is_number, "a number", true))?;
    registry.register("is_string", |d| type_test(d, Event::is_string, "a string", false))?;
    registry.register("is_not_string", |d| type_test(d, Event::is_string, "a string", true))?;
    registry.register("is_boolean", |d| type_test(d, Event::is_bool, "a boolean", false))?;
    registry.register("is_not_boolean", |d| type_test(d, Event::is_bool, "a boolean", true))?;
    registry.register("is_array", |d| type_test(d, Event::is_array, "an array", false))?;
    registry.register("is_not_array", |d| type_test(d, Event::is_array, "an array", true))?;
    registry.register("is_object", |d| type_test(d, Event::is_object, "an object", false))?;
    registry.register("is_not_object", |d| type_test(d, Event::is_object, "an object", true))?;
    registry.register("is_null", |d| type_test(d, Event::is_null, "null", false))?;
    registry.register("is_not_null", |d| type_test(d, Event::is_null, "null", true))?;
    registry.register("is_true", |d| bool_test(d, true))?;
    registry.register("is_false", |d| bool_test(d, false))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Regex
// ---------------------------------------------------------------------------

fn regex_filter(def: &HelperDefinition, negate: bool) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    let pattern = expect_value(&def.helper, &params[0])?;
    let regex = Regex::new(pattern).map_err(|source| BuildError::InvalidRegex {
        helper: def.helper.clone(),
        pattern: pattern.to_owned(),
        source,
    })?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_target = target_not_found(&name, &def.target_field);
    let no_match = failure_trace(
        &name,
        if negate { "Regex did match" } else { "Regex did not match" },
    );
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let value = match event.get_string(&target) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_target)),
            };
            // Partial match semantics: the pattern may land anywhere.
            if regex.is_match(&value) != negate {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&no_match))
            }
        }),
    ))
}

// ---------------------------------------------------------------------------
// IPv4 CIDR
// ---------------------------------------------------------------------------

fn parse_mask(raw: &str) -> Option<u32> {
    if let Ok(prefix) = raw.parse::<u8>() {
        return match prefix {
            0 => Some(0),
            1..=32 => Some(u32::MAX << (32 - u32::from(prefix))),
            _ => None,
        };
    }
    raw.parse::<Ipv4Addr>().ok().map(u32::from)
}

/// `ip_cidr_match/<network>/<mask>`; mask as prefix length or dotted quad.
fn ip_cidr_match(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 2)?;
    let network_raw = expect_value(&def.helper, &params[0])?;
    let mask_raw = expect_value(&def.helper, &params[1])?;

    let network: Ipv4Addr = network_raw.parse().map_err(|_| BuildError::InvalidAddress {
        helper: def.helper.clone(),
        what: "address",
        value: network_raw.to_owned(),
    })?;
    let mask = parse_mask(mask_raw).ok_or_else(|| BuildError::InvalidAddress {
        helper: def.helper.clone(),
        what: "mask",
        value: mask_raw.to_owned(),
    })?;

    let net_lower = u32::from(network) & mask;
    let net_upper = net_lower | !mask;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_target = target_not_found(&name, &def.target_field);
    let bad_address = failure_trace(&name, "Target field is not a valid IPv4 address");
    let no_match = failure_trace(&name, "IP address is not in CIDR");
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            let value = match event.get_string(&target) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_target)),
            };
            let ip = match value.parse::<Ipv4Addr>() {
                Ok(ip) => u32::from(ip),
                Err(_) => return EvalResult::failure(event, Arc::clone(&bad_address)),
            };
            if net_lower <= ip && ip <= net_upper {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&no_match))
            }
        }),
    ))
}

// ---------------------------------------------------------------------------
// Existence
// ---------------------------------------------------------------------------

fn existence(def: &HelperDefinition, expect: bool) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 0)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let failure = failure_trace(
        &name,
        &if expect {
            format!("Target field '{}' does not exist", def.target_field)
        } else {
            format!("Target field '{}' does exist", def.target_field)
        },
    );
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            if event.exists(&target) == expect {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&failure))
            }
        }),
    ))
}

// ---------------------------------------------------------------------------
// Array membership
// ---------------------------------------------------------------------------

/// `array_contains/v1/v2/...`: success if any parameter equals any element.
/// Missing references are skipped, not errors.
fn array_contains(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_min_arity(&def.helper, &params, 1)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let no_target = target_not_found(&name, &def.target_field);
    let not_array = failure_trace(
        &name,
        &format!("Target field '{}' is not an array", def.target_field),
    );
    let no_match = failure_trace(
        &name,
        &format!(
            "Target array '{}' does not contain any of the parameters",
            def.target_field
        ),
    );
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            if !event.exists(&target) {
                return EvalResult::failure(event, Arc::clone(&no_target));
            }
            let array = match event.get_array(&target) {
                Some(a) => a,
                None => return EvalResult::failure(event, Arc::clone(&not_array)),
            };
            for param in &params {
                let candidate = match param {
                    Parameter::Value(raw) => Value::String(raw.clone()),
                    Parameter::Reference(path) => match event.get_value(path) {
                        Some(v) => v,
                        None => continue,
                    },
                };
                if array.contains(&candidate) {
                    return EvalResult::success(event, Arc::clone(&success));
                }
            }
            EvalResult::failure(event, Arc::clone(&no_match))
        }),
    ))
}

// ---------------------------------------------------------------------------
// Type tests
// ---------------------------------------------------------------------------

fn type_test(
    def: &HelperDefinition,
    pred: fn(&Event, &str) -> bool,
    what: &'static str,
    negate: bool,
) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 0)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let not_found = target_not_found(&name, &def.target_field);
    let wrong_type = failure_trace(
        &name,
        &format!(
            "Target field '{}' is {}{}",
            def.target_field,
            if negate { "" } else { "not " },
            what
        ),
    );
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| {
            if !event.exists(&target) {
                return EvalResult::failure(event, Arc::clone(&not_found));
            }
            if pred(&event, &target) != negate {
                EvalResult::success(event, Arc::clone(&success))
            } else {
                EvalResult::failure(event, Arc::clone(&wrong_type))
            }
        }),
    ))
}

fn bool_test(def: &HelperDefinition, expect: bool) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 0)?;
    let name = format_helper_name(&def.helper, &def.target_field, &params);

    let success = success_trace(&name);
    let not_found = target_not_found(&name, &def.target_field);
    let wrong = failure_trace(
        &name,
        &format!(
            "Target field '{}' is {}",
            def.target_field,
            if expect { "false" } else { "true" }
        ),
    );
    let target = def.target_field.clone();

    Ok(Expression::term(
        name,
        Box::new(move |event| match event.get_bool(&target) {
            None => EvalResult::failure(event, Arc::clone(&not_found)),
            Some(value) if value == expect => EvalResult::success(event, Arc::clone(&success)),
            Some(_) => EvalResult::failure(event, Arc::clone(&wrong)),
        }),
    ))
}
