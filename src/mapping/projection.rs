use super::model::{reverse_mapping, ForwardMap, MappingNode, ReverseItem, ReverseMap, ReverseMapping};
use super::transformers::run_transformer;
use crate::ir::instruction::Row;
use crate::ir::Value;

fn leaves_native_field<'a>(node: &'a MappingNode, out: &mut Vec<&'a str>) {
    match node {
        MappingNode::Field(f) => out.push(f),
        MappingNode::Detailed(d) => out.push(&d.native_field),
        MappingNode::List(items) => {
            for item in items {
                leaves_native_field(item, out);
            }
        }
        MappingNode::Nested(_) => {}
    }
}

fn lookup_path<'a>(map: &'a ForwardMap, path: &str) -> Option<&'a MappingNode> {
    let mut segments = path.split('.');
    let mut cursor = map.get(segments.next()?)?;
    for seg in segments {
        match cursor {
            MappingNode::Nested(inner) => cursor = inner.get(seg)?,
            _ => return None,
        }
    }
    Some(cursor)
}

fn subtree<'a>(map: &'a ForwardMap, base: Option<&str>) -> Option<&'a ForwardMap> {
    match base {
        None => Some(map),
        Some(path) => match lookup_path(map, path)? {
            MappingNode::Nested(inner) => Some(inner),
            _ => None,
        },
    }
}

/// Resolves a `ProjectAttrs`/`ProjectEntity` projection into `(native_field,
/// ocsf_attr)` pairs for an OCSF entity base field. `attrs` being `None`
/// means "project everything known for the entity".
pub fn translate_projection_to_native(
    dmm: &ForwardMap,
    ocsf_base_field: Option<&str>,
    attrs: Option<&[String]>,
) -> Vec<(String, String)> {
    let Some(base) = subtree(dmm, ocsf_base_field) else {
        return Vec::new();
    };

    let mut result = Vec::new();
    let mut seen = std::collections::BTreeSet::new();

    if let Some(attrs) = attrs {
        for attr in attrs {
            match lookup_path(base, attr) {
                Some(node) => {
                    let mut natives = Vec::new();
                    leaves_native_field(node, &mut natives);
                    for native in natives {
                        let pair = (native.to_string(), attr.clone());
                        if seen.insert(pair.clone()) {
                            result.push(pair);
                        }
                    }
                }
                None => {
                    // Pass-through: no mapping entry, keep the attribute name as-is.
                    let pair = (attr.clone(), attr.clone());
                    if seen.insert(pair.clone()) {
                        result.push(pair);
                    }
                }
            }
        }
    } else {
        for (native, mapping) in reverse_mapping(base) {
            for ocsf in reverse_items_as_ocsf(&mapping) {
                let pair = (native.clone(), ocsf);
                if seen.insert(pair.clone()) {
                    result.push(pair);
                }
            }
        }
    }
    result
}

fn reverse_items_as_ocsf(mapping: &ReverseMapping) -> Vec<String> {
    match mapping {
        ReverseMapping::Field(f) => vec![f.clone()],
        ReverseMapping::Multi(items) => items
            .iter()
            .map(|i| match i {
                ReverseItem::Field(f) => f.clone(),
                ReverseItem::Detailed(d) => d.ocsf_field.clone(),
            })
            .collect(),
    }
}

/// Maps a native wildcard projection (e.g. `"process.*"`) back to the OCSF
/// entity name it came from, used when the translator needs to know which
/// entity a `SELECT *` against a native table corresponds to.
pub fn translate_projection_entity_to_ocsf(reverse: &ReverseMap, native_projection: &str) -> String {
    let key = if native_projection.ends_with('*') {
        native_projection.to_string()
    } else {
        format!("{native_projection}.*")
    };
    let ocsf = match reverse.get(&key) {
        Some(ReverseMapping::Field(f)) => f.clone(),
        Some(ReverseMapping::Multi(items)) => match items.first() {
            Some(ReverseItem::Field(f)) => f.clone(),
            Some(ReverseItem::Detailed(d)) => d.ocsf_field.clone(),
            None => key.clone(),
        },
        None => key.clone(),
    };
    ocsf.strip_suffix(".*").unwrap_or(&ocsf).to_string()
}

/// Maps a list of native attribute names to OCSF attribute names, trying a
/// STIX-style (`type:attr`) and ECS-style (`type.attr`) qualified lookup
/// before falling back to pass-through. If `entity_type` is given, strips
/// its prefix from the result so attributes read naturally inside a
/// `ProjectEntity` context.
pub fn translate_projection_attrs_to_ocsf(
    reverse: &ReverseMap,
    native_type: Option<&str>,
    entity_type: Option<&str>,
    attrs: &[String],
) -> Vec<String> {
    let mut result = Vec::new();
    for attr in attrs {
        let mapping = reverse.get(attr).or_else(|| {
            native_type.and_then(|t| {
                reverse
                    .get(&format!("{t}:{attr}"))
                    .or_else(|| reverse.get(&format!("{t}.{attr}")))
            })
        });
        match mapping {
            Some(m) => result.extend(reverse_items_as_ocsf(m)),
            None => result.push(attr.clone()),
        }
    }
    if let Some(entity_type) = entity_type {
        let prefix = format!("{entity_type}.");
        for field in &mut result {
            if let Some(stripped) = field.strip_prefix(&prefix) {
                *field = stripped.to_string();
            }
        }
    }
    result
}

/// Applies each column's `ocsf_value` transformer (if any) to every row of a
/// frame-native result set, turning native-format values into their OCSF
/// canonical form after rows are pulled out of a backend.
pub fn translate_rows(rows: &mut [Row], dmm: &ForwardMap) {
    for row in rows.iter_mut() {
        for (col, value) in row.iter_mut() {
            if let Some(node) = lookup_path(dmm, col) {
                if let MappingNode::Detailed(d) = node {
                    if let Some(transformer) = d.ocsf_value.as_deref() {
                        if let Ok(transformed) = run_transformer(Some(transformer), value) {
                            *value = transformed;
                        }
                    }
                }
            }
        }
    }
}
