//! Graph artifact persistence.
//!
//! The persisted artifact is a single serialized graph file under a fixed
//! default base name, at full precision, plus a sidecar configuration file
//! saved alongside.

mod artifact;
mod compact;

pub use artifact::{
    load_graph, save_graph, save_sidecar, SidecarConfig, CONFIG_FILE_NAME, MODEL_GRAPH_FILE_NAME,
};
pub use compact::fold_quantize_constants;
