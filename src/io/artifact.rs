//! Graph artifact save/load and the sidecar configuration file.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::QuantizeConfig;
use crate::error::{CuantizarError, Result};
use crate::graph::ModelGraph;

/// Default base name of the serialized graph artifact.
pub const MODEL_GRAPH_FILE_NAME: &str = "model.graph.json";

/// Base name of the sidecar configuration file.
pub const CONFIG_FILE_NAME: &str = "quantize_config.json";

/// Save a graph to a file at full precision.
pub fn save_graph(graph: &ModelGraph, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let data = serde_json::to_string_pretty(graph).map_err(|e| CuantizarError::Serialization {
        message: format!("graph serialization failed: {e}"),
    })?;
    let mut file = File::create(path)
        .map_err(|e| CuantizarError::io(format!("creating {}", path.display()), e))?;
    file.write_all(data.as_bytes())
        .map_err(|e| CuantizarError::io(format!("writing {}", path.display()), e))?;
    Ok(())
}

/// Load a graph artifact, rebuilding its name index.
pub fn load_graph(path: impl AsRef<Path>) -> Result<ModelGraph> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(CuantizarError::ModelNotFound { path: path.to_path_buf() });
    }
    let data = std::fs::read_to_string(path)
        .map_err(|e| CuantizarError::io(format!("reading {}", path.display()), e))?;
    let mut graph: ModelGraph =
        serde_json::from_str(&data).map_err(|e| CuantizarError::Serialization {
            message: format!("graph deserialization failed: {e}"),
        })?;
    graph.reindex()?;
    Ok(graph)
}

/// Configuration metadata saved alongside the model.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SidecarConfig {
    /// Task the model topology was exported for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// Whether the run was weight-only.
    pub weights_only: bool,
    /// The configuration the run consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<QuantizeConfig>,
}

/// Save the sidecar configuration next to the model artifact.
pub fn save_sidecar(sidecar: &SidecarConfig, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let data = serde_json::to_string_pretty(sidecar).map_err(|e| CuantizarError::Serialization {
        message: format!("config serialization failed: {e}"),
    })?;
    std::fs::write(path, data)
        .map_err(|e| CuantizarError::io(format!("writing {}", path.display()), e))?;
    Ok(())
}
