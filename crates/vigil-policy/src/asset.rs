//! Asset compiler: one declarative document → one expression.
//!
//! An asset document carries an optional `check` section (conditions, ANDed),
//! optional stage sections (`parse`, `map`, `normalize`, chained in that
//! order) and graph metadata (`parents`, and `after` for filters). A value
//! string starting with `+` is a helper invocation `+name/arg1/arg2`; any
//! other value compiles to an equality condition in `check` or an
//! unconditional set in a stage.
//!
//! Decoders, rules and outputs compile to
//! `Implication(name, check, stages)`; filters compile to the check
//! conjunction alone and are wired as gates by the policy composer.

use std::sync::Arc;

use serde_json::Value;

use crate::error::CompilerError;
use crate::expression::Expression;
use crate::parameter::field_to_pointer;
use crate::registry::{HelperDefinition, Registry};
use crate::result::EvalResult;

/// Stage sections recognized in an asset document, in evaluation order.
const STAGES: [&str; 3] = ["parse", "map", "normalize"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetType {
    Decoder,
    Rule,
    Output,
    Filter,
}

impl AssetType {
    /// The policy-document section that enumerates assets of this type.
    pub fn section(self) -> &'static str {
        match self {
            AssetType::Decoder => "decoders",
            AssetType::Rule => "rules",
            AssetType::Output => "outputs",
            AssetType::Filter => "filters",
        }
    }
}

/// A compiled asset, ready for graph composition.
pub struct Asset {
    pub name: String,
    pub asset_type: AssetType,
    pub parents: Vec<String>,
    /// Targets this asset gates. Filters only.
    pub after: Vec<String>,
    pub expression: Expression,
}

/// Compile one asset document.
pub fn compile_asset(
    doc: &Value,
    asset_type: AssetType,
    registry: &Registry,
) -> Result<Asset, CompilerError> {
    let name = doc
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| CompilerError::InvalidDocument("asset has no name".to_owned()))?
        .to_owned();

    let parents = string_list(doc, "parents")?;
    let after = string_list(doc, "after")?;

    let check_terms = match doc.get("check") {
        Some(section) => compile_section(section, registry, true)?,
        None => Vec::new(),
    };

    if asset_type == AssetType::Filter {
        for stage in STAGES {
            if doc.get(stage).is_some() {
                return Err(CompilerError::InvalidDocument(format!(
                    "filter \"{name}\" cannot have a \"{stage}\" stage"
                )));
            }
        }
        let expression = Expression::and(name.clone(), check_terms);
        return Ok(Asset {
            name,
            asset_type,
            parents,
            after,
            expression,
        });
    }

    let check = Expression::and(format!("{name}.check"), check_terms);
    let mut stage_chains = Vec::new();
    for stage in STAGES {
        if let Some(section) = doc.get(stage) {
            let entries = compile_section(section, registry, false)?;
            stage_chains.push(Expression::chain(format!("{name}.{stage}"), entries));
        }
    }
    let stages = Expression::chain(format!("{name}.stages"), stage_chains);
    let expression = Expression::implication(name.clone(), check, stages);

    Ok(Asset {
        name,
        asset_type,
        parents,
        after,
        expression,
    })
}

fn string_list(doc: &Value, key: &str) -> Result<Vec<String>, CompilerError> {
    match doc.get(key) {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    CompilerError::InvalidDocument(format!("\"{key}\" entries must be strings"))
                })
            })
            .collect(),
        Some(_) => Err(CompilerError::InvalidDocument(format!(
            "\"{key}\" must be a list"
        ))),
    }
}

/// Compile one document section (a list of single-key `field: value` maps).
fn compile_section(
    section: &Value,
    registry: &Registry,
    in_check: bool,
) -> Result<Vec<Expression>, CompilerError> {
    let entries = section.as_array().ok_or_else(|| {
        CompilerError::InvalidDocument("asset sections must be lists".to_owned())
    })?;

    let mut compiled = Vec::with_capacity(entries.len());
    for entry in entries {
        let object = entry.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
            CompilerError::InvalidDocument(
                "section entries must be single-key maps".to_owned(),
            )
        })?;
        let (field, value) = object.iter().next().expect("length checked above");
        compiled.push(compile_entry(field, value, registry, in_check)?);
    }
    Ok(compiled)
}

fn compile_entry(
    field: &str,
    value: &Value,
    registry: &Registry,
    in_check: bool,
) -> Result<Expression, CompilerError> {
    let target = field_to_pointer(field)?;

    if let Some(invocation) = value.as_str().and_then(|s| s.strip_prefix('+')) {
        let mut parts = invocation.split('/');
        let helper = parts.next().unwrap_or_default();
        if helper.is_empty() {
            return Err(CompilerError::InvalidDocument(format!(
                "empty helper invocation on field \"{field}\""
            )));
        }
        let def = HelperDefinition {
            target_field: target,
            helper: helper.to_owned(),
            arguments: parts.map(str::to_owned).collect(),
        };
        let builder = registry.lookup(helper)?;
        return Ok(builder.as_ref()(&def)?);
    }

    if in_check {
        Ok(value_check_term(target, value.clone()))
    } else {
        Ok(map_value_term(target, value.clone()))
    }
}

/// Literal condition: the target field must equal the document value.
fn value_check_term(target: String, expected: Value) -> Expression {
    let name = format!("condition.value[{target}=={expected}]");
    let success: Arc<str> = Arc::from(format!("[{name}] -> Success"));
    let not_found: Arc<str> = Arc::from(format!(
        "[{name}] -> Failure: Target field '{target}' not found"
    ));
    let no_match: Arc<str> = Arc::from(format!("[{name}] -> Failure: Comparison is false"));

    Expression::term(
        name,
        Box::new(move |event| match event.get_value(&target) {
            None => EvalResult::failure(event, Arc::clone(&not_found)),
            Some(actual) if actual == expected => {
                EvalResult::success(event, Arc::clone(&success))
            }
            Some(_) => EvalResult::failure(event, Arc::clone(&no_match)),
        }),
    )
}

/// Literal mapping: write the document value into the target field.
fn map_value_term(target: String, value: Value) -> Expression {
    let name = format!("map.value[{target}={value}]");
    let success: Arc<str> = Arc::from(format!("[{name}] -> Success"));

    Expression::term(
        name,
        Box::new(move |event| {
            event.set_value(&target, value.clone());
            EvalResult::success(event, Arc::clone(&success))
        }),
    )
}
