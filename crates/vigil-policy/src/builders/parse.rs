//! `parse_*` builders: typed field extraction.
//!
//! Argument 0 is the input: a literal or a `$reference` to a string field.
//! Remaining arguments configure the parser and must be literals. On success
//! the parsed, typed value is written to the target field; on failure the
//! event is left untouched and the term fails.

use std::sync::Arc;

use serde_json::Value;

use crate::builders::{
    check_arity, check_arity_range, check_min_arity, expect_char, expect_value, failure_trace,
    format_helper_name, parameter_not_found, resolve_string, success_trace,
};
use crate::error::{BuildError, RegistryError};
use crate::expression::Expression;
use crate::fieldparse;
use crate::parameter::{parse_parameters, Parameter};
use crate::registry::{HelperDefinition, Registry};
use crate::result::EvalResult;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.register("parse_bool", |d| {
        single_input(d, |s| fieldparse::boolean(s).map(Value::Bool))
    })?;
    registry.register("parse_byte", |d| {
        single_input(d, |s| fieldparse::byte(s).map(Value::from))
    })?;
    registry.register("parse_long", |d| {
        single_input(d, |s| fieldparse::long(s).map(Value::from))
    })?;
    registry.register("parse_float", |d| {
        single_input(d, |s| fieldparse::float(s).map(Value::from))
    })?;
    registry.register("parse_binary", |d| {
        single_input(d, |s| fieldparse::binary(s).map(Value::from))
    })?;
    registry.register("parse_ip", |d| {
        single_input(d, |s| fieldparse::ip(s).map(Value::from))
    })?;
    registry.register("parse_uri", |d| single_input(d, fieldparse::uri))?;
    registry.register("parse_useragent", |d| single_input(d, fieldparse::useragent))?;
    registry.register("parse_fqdn", |d| {
        single_input(d, |s| fieldparse::fqdn(s).map(Value::from))
    })?;
    registry.register("parse_file", |d| single_input(d, fieldparse::file_path))?;
    registry.register("parse_json", |d| single_input(d, fieldparse::json_value))?;
    registry.register("parse_date", parse_date)?;
    registry.register("parse_xml", parse_xml)?;
    registry.register("parse_csv", parse_csv)?;
    registry.register("parse_key_value", parse_key_value)?;
    registry.register("parse_quoted", parse_quoted)?;
    registry.register("parse_between", parse_between)?;
    Ok(())
}

/// Assemble a parse term once arity/config checks passed.
///
/// Owns the shared contract: resolve the input, run the parser, write on
/// success, leave the event untouched on failure.
fn parse_term(
    def: &HelperDefinition,
    params: Vec<Parameter>,
    apply: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
) -> Expression {
    let name = format_helper_name(&def.helper, &def.target_field, &params);
    let success = success_trace(&name);
    let no_param = parameter_not_found(&name, &params[0]);
    let no_parse = failure_trace(&name, "Input does not match the expected format");
    let input = params.into_iter().next().expect("arity checked by caller");
    let target = def.target_field.clone();

    Expression::term(
        name,
        Box::new(move |event| {
            let raw = match resolve_string(&event, &input) {
                Some(s) => s,
                None => return EvalResult::failure(event, Arc::clone(&no_param)),
            };
            match apply(&raw) {
                Some(value) => {
                    event.set_value(&target, value);
                    EvalResult::success(event, Arc::clone(&success))
                }
                None => EvalResult::failure(event, Arc::clone(&no_parse)),
            }
        }),
    )
}

/// The one-argument parsers: input only.
fn single_input(
    def: &HelperDefinition,
    apply: impl Fn(&str) -> Option<Value> + Send + Sync + 'static,
) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 1)?;
    Ok(parse_term(def, params, apply))
}

/// `parse_date/<input>/<format>[/<locale>]`. The locale argument is accepted
/// for compatibility and has no effect on the fixed output rendering.
fn parse_date(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity_range(&def.helper, &params, 2, 3)?;
    let format = expect_value(&def.helper, &params[1])?.to_owned();
    if let Some(locale) = params.get(2) {
        expect_value(&def.helper, locale)?;
    }
    Ok(parse_term(def, params, move |s| {
        fieldparse::date(s, &format).map(Value::String)
    }))
}

/// `parse_xml/<input>[/<dialect>]`. The dialect tag is accepted for
/// compatibility; only the default mapping is implemented.
fn parse_xml(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity_range(&def.helper, &params, 1, 2)?;
    if let Some(dialect) = params.get(1) {
        expect_value(&def.helper, dialect)?;
    }
    Ok(parse_term(def, params, fieldparse::xml))
}

/// `parse_csv/<input>/<col1>/<col2>/...`: at least two columns.
fn parse_csv(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_min_arity(&def.helper, &params, 3)?;
    let columns: Vec<String> = params[1..]
        .iter()
        .map(|p| expect_value(&def.helper, p).map(str::to_owned))
        .collect::<Result<_, _>>()?;
    Ok(parse_term(def, params, move |s| {
        fieldparse::csv(s, &columns)
    }))
}

/// `parse_key_value/<input>/<sep>/<delim>/<quote>/<esc>`: `sep` splits key
/// from value, `delim` splits pairs.
fn parse_key_value(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 5)?;
    let sep = expect_value(&def.helper, &params[1])?.to_owned();
    let delim = expect_value(&def.helper, &params[2])?.to_owned();
    if sep.is_empty() || delim.is_empty() {
        return Err(BuildError::Conversion {
            helper: def.helper.clone(),
            value: if sep.is_empty() { sep } else { delim },
            target: "a non-empty separator",
        });
    }
    let quote = expect_char(&def.helper, &params[3])?;
    let escape = expect_char(&def.helper, &params[4])?;
    Ok(parse_term(def, params, move |s| {
        fieldparse::key_value(s, &sep, &delim, quote, escape)
    }))
}

/// `parse_quoted/<input>[/<quote>[/<esc>]]`: defaults `"` and `\`.
fn parse_quoted(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity_range(&def.helper, &params, 1, 3)?;
    let quote = match params.get(1) {
        Some(p) => expect_char(&def.helper, p)?,
        None => '"',
    };
    let escape = match params.get(2) {
        Some(p) => expect_char(&def.helper, p)?,
        None => '\\',
    };
    Ok(parse_term(def, params, move |s| {
        fieldparse::quoted(s, quote, escape).map(Value::String)
    }))
}

/// `parse_between/<input>/<start>/<end>`.
fn parse_between(def: &HelperDefinition) -> Result<Expression, BuildError> {
    let params = parse_parameters(&def.arguments)?;
    check_arity(&def.helper, &params, 3)?;
    let start = expect_value(&def.helper, &params[1])?.to_owned();
    let end = expect_value(&def.helper, &params[2])?.to_owned();
    Ok(parse_term(def, params, move |s| {
        fieldparse::between(s, &start, &end).map(Value::from)
    }))
}
