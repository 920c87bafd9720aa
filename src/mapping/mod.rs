//! The OCSF schema-mapping engine: translates comparisons and projections
//! between a data source's native field names and Kestrel's canonical OCSF
//! field names, in both directions.

mod model;
mod projection;
mod registry;
mod transformers;

pub use model::{
    check_entity_identifier_existence_in_mapping, reverse_mapping, translate_comparison_to_native,
    translate_comparison_to_ocsf, DetailedMapping, ForwardMap, MappingNode, ReverseDetailed, ReverseItem,
    ReverseMap, ReverseMapping,
};
pub use projection::{
    translate_projection_attrs_to_ocsf, translate_projection_entity_to_ocsf, translate_projection_to_native,
    translate_rows,
};
pub use registry::{LoadedMapping, MappingRegistry};
pub use transformers::run_transformer;
