//! Policy composer: asset graphs stitched into one root expression.
//!
//! Decoders cascade under `Or`: the first matching subtree wins and
//! traversal only descends below an ancestor that matched. Rules and outputs
//! fan out under `Broadcast`: every matching asset fires. A filter gates the
//! child collection of each of its targets. The composed root is
//! `Chain(policyRoot, decodersInput?, rulesInput?, outputsInput?)`.
//!
//! Sibling order is document order throughout; it decides `Or` short-circuit
//! winners and trace layout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use crate::asset::{compile_asset, Asset, AssetType};
use crate::error::CompilerError;
use crate::expression::Expression;
use crate::registry::Registry;
use crate::store::Store;

/// A composed policy.
pub struct Policy {
    pub name: String,
    pub expression: Expression,
}

/// Compiles assets from the store and composes policies.
#[derive(Clone)]
pub struct PolicyBuilder {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
}

impl PolicyBuilder {
    pub fn new(store: Arc<dyn Store>, registry: Arc<Registry>) -> Self {
        PolicyBuilder { store, registry }
    }

    /// Fetch and compose the named policy document.
    pub fn build_policy(&self, name: &str) -> Result<Policy, CompilerError> {
        let doc = self.store.get(name)?;
        self.build_policy_from_doc(&doc)
    }

    /// Compose a policy from an already-fetched document.
    pub fn build_policy_from_doc(&self, doc: &Value) -> Result<Policy, CompilerError> {
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CompilerError::InvalidDocument("policy has no name".to_owned()))?
            .to_owned();

        let mut sections: HashMap<AssetType, Vec<String>> = HashMap::new();
        let mut assets: HashMap<String, Asset> = HashMap::new();
        for asset_type in [
            AssetType::Decoder,
            AssetType::Rule,
            AssetType::Output,
            AssetType::Filter,
        ] {
            let names = self.load_section(doc, asset_type, &mut assets)?;
            sections.insert(asset_type, names);
        }

        // Filters gate targets; resolve and index them before graph building.
        let mut filters_by_target: HashMap<String, Vec<String>> = HashMap::new();
        for filter_name in &sections[&AssetType::Filter] {
            let filter = &assets[filter_name];
            if filter.after.is_empty() {
                return Err(CompilerError::OrphanFilter(filter_name.clone()));
            }
            for target in &filter.after {
                let gates_known_asset = assets
                    .get(target)
                    .is_some_and(|a| a.asset_type != AssetType::Filter);
                if !gates_known_asset {
                    return Err(CompilerError::OrphanFilter(filter_name.clone()));
                }
                filters_by_target
                    .entry(target.clone())
                    .or_default()
                    .push(filter_name.clone());
            }
        }

        let mut graphs = Vec::new();
        let decoder_roots = build_graph(
            &sections[&AssetType::Decoder],
            &assets,
            &filters_by_target,
            GraphVariant::Or,
        )?;
        if !decoder_roots.is_empty() {
            graphs.push(Expression::or("decodersInput", decoder_roots));
        }
        let rule_roots = build_graph(
            &sections[&AssetType::Rule],
            &assets,
            &filters_by_target,
            GraphVariant::Broadcast,
        )?;
        if !rule_roots.is_empty() {
            graphs.push(Expression::broadcast("rulesInput", rule_roots));
        }
        let output_roots = build_graph(
            &sections[&AssetType::Output],
            &assets,
            &filters_by_target,
            GraphVariant::Broadcast,
        )?;
        if !output_roots.is_empty() {
            graphs.push(Expression::broadcast("outputsInput", output_roots));
        }

        if graphs.is_empty() {
            return Err(CompilerError::EmptyPolicy(name));
        }

        Ok(Policy {
            name,
            expression: Expression::chain("policyRoot", graphs),
        })
    }

    /// Compile a standalone filter asset (used for route filters).
    pub fn build_filter(&self, name: &str) -> Result<Expression, CompilerError> {
        let doc = self.store.get(name)?;
        let asset = compile_asset(&doc, AssetType::Filter, &self.registry)?;
        Ok(asset.expression)
    }

    fn load_section(
        &self,
        doc: &Value,
        asset_type: AssetType,
        assets: &mut HashMap<String, Asset>,
    ) -> Result<Vec<String>, CompilerError> {
        let names = match doc.get(asset_type.section()) {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(CompilerError::InvalidDocument(format!(
                    "\"{}\" must be a list",
                    asset_type.section()
                )))
            }
        };

        let mut loaded = Vec::with_capacity(names.len());
        for item in names {
            let reference = item.as_str().ok_or_else(|| {
                CompilerError::InvalidDocument(format!(
                    "\"{}\" entries must be asset names",
                    asset_type.section()
                ))
            })?;
            let asset_doc = self.store.get(reference)?;
            let asset = compile_asset(&asset_doc, asset_type, &self.registry)?;
            if asset.name != reference {
                return Err(CompilerError::InvalidDocument(format!(
                    "asset \"{}\" is stored under \"{}\"",
                    asset.name, reference
                )));
            }
            loaded.push(asset.name.clone());
            assets.insert(asset.name.clone(), asset);
        }
        Ok(loaded)
    }
}

#[derive(Clone, Copy)]
enum GraphVariant {
    Or,
    Broadcast,
}

impl GraphVariant {
    fn make(self, name: String, operands: Vec<Expression>) -> Expression {
        match self {
            GraphVariant::Or => Expression::or(name, operands),
            GraphVariant::Broadcast => Expression::broadcast(name, operands),
        }
    }
}

/// Build the per-section DAG and return the root nodes, in document order.
fn build_graph(
    section: &[String],
    assets: &HashMap<String, Asset>,
    filters_by_target: &HashMap<String, Vec<String>>,
    variant: GraphVariant,
) -> Result<Vec<Expression>, CompilerError> {
    let in_section: HashSet<&str> = section.iter().map(String::as_str).collect();
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for name in section {
        for parent in &assets[name].parents {
            if !in_section.contains(parent.as_str()) {
                return Err(CompilerError::OrphanAsset {
                    child: name.clone(),
                    parent: parent.clone(),
                });
            }
            children.entry(parent.as_str()).or_default().push(name);
        }
    }

    let mut memo: HashMap<String, Expression> = HashMap::new();
    let mut in_progress: HashSet<String> = HashSet::new();
    let mut roots = Vec::new();
    for name in section {
        if assets[name].parents.is_empty() {
            roots.push(build_node(
                name,
                assets,
                &children,
                filters_by_target,
                variant,
                &mut memo,
                &mut in_progress,
            )?);
        }
    }
    Ok(roots)
}

fn build_node(
    name: &str,
    assets: &HashMap<String, Asset>,
    children: &HashMap<&str, Vec<&str>>,
    filters_by_target: &HashMap<String, Vec<String>>,
    variant: GraphVariant,
    memo: &mut HashMap<String, Expression>,
    in_progress: &mut HashSet<String>,
) -> Result<Expression, CompilerError> {
    if let Some(shared) = memo.get(name) {
        return Ok(shared.clone());
    }
    if !in_progress.insert(name.to_owned()) {
        return Err(CompilerError::InvalidDocument(format!(
            "asset graph cycle involving \"{name}\""
        )));
    }

    let asset = &assets[name];
    let kids = children.get(name).map(Vec::as_slice).unwrap_or_default();
    let gates = filters_by_target.get(name).map(Vec::as_slice).unwrap_or_default();

    let expr = if kids.is_empty() && gates.is_empty() {
        asset.expression.clone()
    } else {
        let mut child_nodes = Vec::with_capacity(kids.len());
        for kid in kids {
            child_nodes.push(build_node(
                kid,
                assets,
                children,
                filters_by_target,
                variant,
                memo,
                in_progress,
            )?);
        }
        let mut inner = variant.make(format!("{name}Children"), child_nodes);
        for gate in gates {
            inner = Expression::implication(
                format!("{gate}Node"),
                assets[gate].expression.clone(),
                inner,
            );
        }
        let container = if gates.is_empty() {
            inner
        } else {
            variant.make(format!("{name}Children"), vec![inner])
        };
        Expression::implication(format!("{name}Node"), asset.expression.clone(), container)
    };

    in_progress.remove(name);
    memo.insert(name.to_owned(), expr.clone());
    Ok(expr)
}
