use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::OnceCell;
use serde_yaml;

use crate::error::{Error, Reason, Result};

use super::model::{reverse_mapping, ForwardMap, ReverseMap};

/// A single data model's mapping, kept in both directions: `forward` as
/// loaded (OCSF -> native), and `reverse` derived from it once at load time
/// (native -> OCSF, flattened) so the frontend never has to re-derive it per
/// query.
pub struct LoadedMapping {
    pub forward: ForwardMap,
    pub reverse: ReverseMap,
    /// Native entity tag (as a user writes it in `GET <entity> FROM ds`) ->
    /// OCSF entity class name. An entity with no alias registered resolves
    /// to itself, which covers a mapping whose entity tags already match
    /// their OCSF name (e.g. the bundled `stix` mapping).
    pub entity_aliases: HashMap<String, String>,
}

impl LoadedMapping {
    /// Resolves a user-written native entity tag to its OCSF class name.
    pub fn ocsf_entity_name(&self, native: &str) -> String {
        self.entity_aliases.get(native).cloned().unwrap_or_else(|| native.to_string())
    }
}

/// Holds every data model mapping a session knows about, keyed by data
/// source interface name (e.g. `"stix_shifter"`, `"sqlite"`). Mappings are
/// supplied by the host, either as parsed maps or as YAML text matching the
/// on-disk shape; the core never reads mapping files off disk itself.
#[derive(Default)]
pub struct MappingRegistry {
    maps: RwLock<HashMap<String, Arc<LoadedMapping>>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_forward(&self, name: impl Into<String>, forward: ForwardMap) {
        self.register_forward_with_entities(name, forward, HashMap::new());
    }

    /// Like [Self::register_forward], additionally registering native entity
    /// tag -> OCSF class name aliases for data sources whose `GET`/`FIND`
    /// entity tags don't already match their OCSF name.
    pub fn register_forward_with_entities(
        &self,
        name: impl Into<String>,
        forward: ForwardMap,
        entity_aliases: HashMap<String, String>,
    ) {
        let reverse = reverse_mapping(&forward);
        let mut guard = self.maps.write().expect("mapping registry lock poisoned");
        guard.insert(
            name.into(),
            Arc::new(LoadedMapping {
                forward,
                reverse,
                entity_aliases,
            }),
        );
    }

    /// Adds (or overwrites) a single native entity tag -> OCSF alias on an
    /// already-registered mapping.
    pub fn register_entity_alias(&self, name: &str, native: impl Into<String>, ocsf: impl Into<String>) -> Result<()> {
        let mut guard = self.maps.write().expect("mapping registry lock poisoned");
        let loaded = guard.get(name).ok_or_else(|| {
            Error::new(Reason::SourceNotFound {
                name: name.to_string(),
            })
        })?;
        let mut entity_aliases = loaded.entity_aliases.clone();
        entity_aliases.insert(native.into(), ocsf.into());
        guard.insert(
            name.to_string(),
            Arc::new(LoadedMapping {
                forward: loaded.forward.clone(),
                reverse: loaded.reverse.clone(),
                entity_aliases,
            }),
        );
        Ok(())
    }

    pub fn register_yaml(&self, name: impl Into<String>, yaml: &str) -> Result<()> {
        let forward: ForwardMap = serde_yaml::from_str(yaml).map_err(|e| {
            Error::new(Reason::InvalidMapping {
                message: e.to_string(),
            })
        })?;
        self.register_forward(name, forward);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<LoadedMapping>> {
        self.maps.read().expect("mapping registry lock poisoned").get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.maps.read().expect("mapping registry lock poisoned").contains_key(name)
    }

    /// Process-wide registry pre-seeded with the bundled default mappings.
    /// Hosts needing a mapping not covered by the defaults call
    /// `register_yaml`/`register_forward` on this same instance; the lazy
    /// init only runs once per process, mirroring the original
    /// `load_default_mapping` cache.
    pub fn default_registry() -> &'static MappingRegistry {
        static INSTANCE: OnceCell<MappingRegistry> = OnceCell::new();
        INSTANCE.get_or_init(|| {
            let registry = MappingRegistry::new();
            for (name, yaml) in BUNDLED_DEFAULT_MAPPINGS {
                registry
                    .register_yaml(*name, yaml)
                    .expect("bundled default mapping must parse");
            }
            registry
        })
    }
}

/// Illustrative default mappings bundled with the crate, covering the most
/// common STIX-style process/network fields. Hosts with a richer OCSF schema
/// are expected to register their own mapping via `register_yaml`.
const BUNDLED_DEFAULT_MAPPINGS: &[(&str, &str)] = &[("stix", DEFAULT_STIX_MAPPING)];

const DEFAULT_STIX_MAPPING: &str = r#"
process:
  pid: pid
  name: name
  cmd_line: cmdline
  parent:
    pid: parent_pid
    name: parent_name
file:
  name: name
  path:
    native_field: path
  hashes:
    MD5: hash_md5
    SHA-256: hash_sha256
network:
  src_ref:
    value: src_ip
  dst_ref:
    value: dst_ip
  src_port: src_port
  dst_port: dst_port
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_stix_mapping() {
        let registry = MappingRegistry::default_registry();
        assert!(registry.contains("stix"));
        let mapping = registry.get("stix").unwrap();
        assert!(mapping.reverse.contains_key("pid"));
    }

    #[test]
    fn register_yaml_builds_reverse_map() {
        let registry = MappingRegistry::new();
        registry.register_yaml("custom", "foo: bar\n").unwrap();
        let loaded = registry.get("custom").unwrap();
        assert!(loaded.reverse.contains_key("bar"));
    }
}
