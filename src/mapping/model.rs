use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{Error, Reason, Result};
use crate::ir::{parse_operator, BasicComparison, Operator, Value};

use super::transformers::run_transformer;

/// One node of a loaded OCSF-to-native mapping tree. Mirrors the shapes a
/// hand-written mapping YAML file actually takes: a bare string (1:1 field
/// rename), a list (one OCSF attribute fans out to several native fields, or
/// several mapping shapes for the same key), a detailed mapping (renames the
/// operator and/or transforms the value), or a nested map (one more path
/// segment before reaching a leaf).
///
/// `#[serde(untagged)]` lets one YAML shape match several variants; they are
/// tried in the order written below, so `Detailed` (which requires
/// `native_field`) is checked before the catch-all `Nested` map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MappingNode {
    Field(String),
    List(Vec<MappingNode>),
    Detailed(DetailedMapping),
    Nested(BTreeMap<String, MappingNode>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetailedMapping {
    pub native_field: String,
    #[serde(default)]
    pub native_op: Option<String>,
    #[serde(default)]
    pub native_value: Option<String>,
    #[serde(default)]
    pub ocsf_op: Option<String>,
    #[serde(default)]
    pub ocsf_value: Option<String>,
}

/// An OCSF -> native field mapping, as loaded straight from a mapping YAML
/// file: keyed by OCSF field path segment.
pub type ForwardMap = BTreeMap<String, MappingNode>;

/// A native -> OCSF field mapping, built by [reverse_mapping] from a
/// [ForwardMap]. Each native field name may resolve to one OCSF field or
/// several (an ambiguous native field shared across event types).
#[derive(Debug, Clone)]
pub enum ReverseMapping {
    Field(String),
    Multi(Vec<ReverseItem>),
}

#[derive(Debug, Clone)]
pub enum ReverseItem {
    Field(String),
    Detailed(ReverseDetailed),
}

#[derive(Debug, Clone)]
pub struct ReverseDetailed {
    pub ocsf_field: String,
    pub ocsf_op: Option<String>,
    pub ocsf_value: Option<String>,
}

pub type ReverseMap = BTreeMap<String, ReverseMapping>;

fn add_attr(result: &mut ReverseMap, native_key: String, ocsf_key: String) {
    match result.get_mut(&native_key) {
        None => {
            result.insert(native_key, ReverseMapping::Field(ocsf_key));
        }
        Some(ReverseMapping::Field(existing)) => {
            if *existing != ocsf_key {
                let existing = existing.clone();
                result.insert(
                    native_key,
                    ReverseMapping::Multi(vec![ReverseItem::Field(existing), ReverseItem::Field(ocsf_key)]),
                );
            }
        }
        Some(ReverseMapping::Multi(items)) => {
            let already = items.iter().any(|i| match i {
                ReverseItem::Field(f) => *f == ocsf_key,
                ReverseItem::Detailed(d) => d.ocsf_field == ocsf_key,
            });
            if !already {
                items.push(ReverseItem::Field(ocsf_key));
            }
        }
    }
}

fn add_detailed(result: &mut ReverseMap, native_key: String, ocsf_key: String, detailed: &DetailedMapping) {
    let item = ReverseItem::Detailed(ReverseDetailed {
        ocsf_field: ocsf_key,
        ocsf_op: detailed.ocsf_op.clone(),
        ocsf_value: detailed.ocsf_value.clone(),
    });
    match result.get_mut(&native_key) {
        None => {
            result.insert(native_key, ReverseMapping::Multi(vec![item]));
        }
        Some(ReverseMapping::Field(existing)) => {
            let existing = existing.clone();
            result.insert(
                native_key,
                ReverseMapping::Multi(vec![ReverseItem::Field(existing), item]),
            );
        }
        Some(ReverseMapping::Multi(items)) => items.push(item),
    }
}

/// Reverses an OCSF -> native mapping tree, loaded from disk, into a
/// flattened native -> OCSF mapping the frontend can use to rewrite raw
/// field names in a `WHERE` clause into OCSF field names.
pub fn reverse_mapping(map: &ForwardMap) -> ReverseMap {
    let mut result = ReverseMap::new();
    reverse_mapping_rec(map, None, &mut result);
    result
}

fn reverse_mapping_rec(map: &ForwardMap, prefix: Option<&str>, result: &mut ReverseMap) {
    for (k, v) in map {
        let path = match prefix {
            Some(p) => format!("{p}.{k}"),
            None => k.clone(),
        };
        reverse_node(v, &path, result);
    }
}

fn reverse_node(node: &MappingNode, path: &str, result: &mut ReverseMap) {
    match node {
        MappingNode::Field(native) => add_attr(result, native.clone(), path.to_string()),
        MappingNode::Detailed(d) => add_detailed(result, d.native_field.clone(), path.to_string(), d),
        MappingNode::List(items) => {
            for item in items {
                reverse_node(item, path, result);
            }
        }
        MappingNode::Nested(inner) => reverse_mapping_rec(inner, Some(path), result),
    }
}

fn parse_op(op: &str, fallback: Operator) -> Operator {
    parse_operator(op).unwrap_or(fallback)
}

/// Translates a single `(field, op, value)` comparison from OCSF field names
/// into one or more native-field comparisons, per a data source's data model
/// mapping. Returns more than one triple when the OCSF field fans out to
/// several native fields (the `MultiComp` case).
pub fn translate_comparison_to_native(
    dmm: &ForwardMap,
    field: &str,
    op: Operator,
    value: &Value,
) -> Result<Vec<BasicComparison>> {
    let mut result = Vec::new();
    if let Some(node) = dmm.get(field) {
        translate_node_to_native(node, op, value, &mut result)?;
        return Ok(result);
    }

    // Walk a dotted path through nested maps, e.g. `process.pid`.
    let mut cursor: &MappingNode = match dmm.get(field.split('.').next().unwrap_or(field)) {
        Some(n) => n,
        None => {
            // Pass-through: no mapping entry for this field at all.
            result.push(BasicComparison::literal(field, op, value.clone()));
            return Ok(result);
        }
    };
    let mut segments = field.split('.').skip(1).peekable();
    while let Some(seg) = segments.next() {
        match cursor {
            MappingNode::Nested(map) => match map.get(seg) {
                Some(next) => cursor = next,
                None => {
                    result.push(BasicComparison::literal(field, op, value.clone()));
                    return Ok(result);
                }
            },
            _ if segments.peek().is_none() => break,
            _ => {
                result.push(BasicComparison::literal(field, op, value.clone()));
                return Ok(result);
            }
        }
    }
    translate_node_to_native(cursor, op, value, &mut result)?;
    Ok(result)
}

fn translate_node_to_native(
    node: &MappingNode,
    op: Operator,
    value: &Value,
    result: &mut Vec<BasicComparison>,
) -> Result<()> {
    match node {
        MappingNode::Field(native) => {
            result.push(BasicComparison::literal(native, op, value.clone()));
        }
        MappingNode::Detailed(d) => {
            let new_op = d
                .native_op
                .as_deref()
                .map(|s| parse_op(s, op))
                .unwrap_or(op);
            let new_value = run_transformer(d.native_value.as_deref(), value)?;
            result.push(BasicComparison::literal(&d.native_field, new_op, new_value));
        }
        MappingNode::List(items) => {
            for item in items {
                translate_node_to_native(item, op, value, result)?;
            }
        }
        MappingNode::Nested(_) => {
            return Err(Error::new(Reason::InvalidMapping {
                message: "comparison field resolved to a nested mapping, not a leaf".to_string(),
            }))
        }
    }
    Ok(())
}

/// Translates a single `(field, op, value)` comparison from native field
/// names into one or more OCSF-field comparisons, using a flattened
/// native -> OCSF map built by [reverse_mapping]. Used by the frontend to
/// rewrite a `WHERE` clause written in STIX-style dotted field names.
pub fn translate_comparison_to_ocsf(
    reverse: &ReverseMap,
    field: &str,
    op: Operator,
    value: &Value,
) -> Vec<BasicComparison> {
    let mut result = Vec::new();
    match reverse.get(field) {
        Some(ReverseMapping::Field(ocsf)) => {
            result.push(BasicComparison::literal(ocsf, op, value.clone()));
        }
        Some(ReverseMapping::Multi(items)) => {
            for item in items {
                match item {
                    ReverseItem::Field(ocsf) => {
                        result.push(BasicComparison::literal(ocsf, op, value.clone()));
                    }
                    ReverseItem::Detailed(d) => {
                        let new_op = d.ocsf_op.as_deref().map(|s| parse_op(s, op)).unwrap_or(op);
                        let new_value =
                            run_transformer(d.ocsf_value.as_deref(), value).unwrap_or_else(|_| value.clone());
                        result.push(BasicComparison::literal(&d.ocsf_field, new_op, new_value));
                    }
                }
            }
        }
        None => {}
    }
    result
}

/// Verifies that every entity identifier a `Filter` may need (per OCSF
/// entity) is actually present in a data source's mapping, raising
/// `IncompleteDataMapping` early rather than failing with a confusing SQL
/// error at evaluation time.
pub fn check_entity_identifier_existence_in_mapping(
    dmm: &ForwardMap,
    entity_identifiers: &BTreeMap<String, Vec<String>>,
) -> Result<()> {
    for (entity_name, ids) in entity_identifiers {
        let Some(MappingNode::Nested(entity)) = dmm.get(entity_name) else {
            continue;
        };
        for idx in ids {
            let mut cursor = entity;
            let mut segments = idx.split('.').peekable();
            let mut found = true;
            while let Some(seg) = segments.next() {
                match cursor.get(seg) {
                    Some(MappingNode::Nested(inner)) if segments.peek().is_some() => {
                        cursor = inner;
                    }
                    Some(_) if segments.peek().is_none() => {}
                    _ => {
                        found = false;
                        break;
                    }
                }
            }
            if !found {
                return Err(Error::new(Reason::IncompleteDataMapping {
                    entity: entity_name.clone(),
                    identifier: idx.clone(),
                }));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> ForwardMap {
        let yaml = r#"
process:
  pid: proc_id
  name:
    native_field: proc_name
    native_op: "LIKE"
cmd_line: command_line
"#;
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn translates_nested_field_to_native() {
        let dmm = sample_map();
        let out =
            translate_comparison_to_native(&dmm, "process.pid", Operator::Eq, &Value::Int(4)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].field, "proc_id");
        assert_eq!(out[0].op, Operator::Eq);
    }

    #[test]
    fn detailed_mapping_overrides_operator() {
        let dmm = sample_map();
        let out = translate_comparison_to_native(
            &dmm,
            "process.name",
            Operator::Eq,
            &Value::Str("cmd.exe".into()),
        )
        .unwrap();
        assert_eq!(out[0].field, "proc_name");
        assert_eq!(out[0].op, Operator::Like);
    }

    #[test]
    fn reverse_mapping_round_trips_simple_field() {
        let dmm = sample_map();
        let rev = reverse_mapping(&dmm);
        let out = translate_comparison_to_ocsf(&rev, "command_line", Operator::Eq, &Value::Str("x".into()));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].field, "cmd_line");
    }

    #[test]
    fn missing_identifier_is_reported() {
        let dmm = sample_map();
        let mut ids = BTreeMap::new();
        ids.insert("process".to_string(), vec!["missing_id".to_string()]);
        let err = check_entity_identifier_existence_in_mapping(&dmm, &ids);
        assert!(err.is_err());
    }
}
