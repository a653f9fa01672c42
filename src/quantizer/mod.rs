//! Quantization orchestrator.
//!
//! Top-level coordinator for one `quantize` call: validates inputs before
//! any side effect, dispatches on the model representation (already-compiled
//! runtime graph vs. trainable model needing export), drives export when
//! needed, selects the quantization strategy, and persists the result.
//! Terminal states are a persisted model or a caller-visible error; there is
//! no partial success.

mod task;


use std::path::PathBuf;

use crate::calibration::{
    build_calibration_dataset, CalibrationDataset, CalibrationDatasetRequest, CalibrationLoader,
    CalibrationLoaderConfig, InferRequestRecorder, InferenceRunner, Preprocess, SampleBatch,
    DEFAULT_CAPTURE_BUDGET,
};
use crate::config::QuantizeConfig;
use crate::engine::{
    CompressionEngine, DatasetProvider, ExportRequest, ExportService, TaskInference,
    TextTokenizer, TrainableModel,
};
use crate::error::{CuantizarError, Result};
use crate::graph::ModelGraph;
use crate::io::{
    fold_quantize_constants, save_graph, save_sidecar, SidecarConfig, CONFIG_FILE_NAME,
    MODEL_GRAPH_FILE_NAME,
};
use crate::policy::{
    full_quantization, hybrid_quantization, weight_only_quantization, PolicySupport,
};

pub use task::Task;

/// Highest export opset the runtime accepts.
pub const MAX_EXPORT_OPSET: u32 = 16;

/// Lowest opset with quantize/dequantize support.
pub const MIN_QDQ_OPSET: u32 = 13;

/// Columns never passed through as export inputs.
const LABEL_COLUMNS: [&str; 3] = ["label", "labels", "label_ids"];

/// An already-compiled runtime model: a graph plus its execution metadata.
pub struct CompiledModel {
    /// The runtime graph.
    pub graph: ModelGraph,
    /// Task the model was compiled for.
    pub task: Option<Task>,
    /// Whether generation uses a cache.
    pub use_cache: bool,
    /// Live inference call path, when available; wrapped by the input
    /// recorder during generation calibration.
    pub runner: Option<Box<dyn InferenceRunner>>,
}

impl CompiledModel {
    /// Wrap a compiled graph.
    pub fn new(graph: ModelGraph) -> Self {
        Self { graph, task: None, use_cache: false, runner: None }
    }

    /// Set the compiled task.
    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    /// Set the generation-cache flag.
    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Attach the live inference call path.
    pub fn with_runner(mut self, runner: Box<dyn InferenceRunner>) -> Self {
        self.runner = Some(runner);
        self
    }
}

/// The model representation a quantizer operates on.
pub enum ModelSource {
    /// Already-compiled runtime graph; quantized in place.
    Compiled(CompiledModel),
    /// Trainable model; exported to the graph representation first.
    Trainable(Box<dyn TrainableModel>),
}

/// Caller-supplied configuration: a typed value or a JSON dict.
pub enum ConfigInput {
    /// Typed configuration.
    Config(QuantizeConfig),
    /// JSON dict, parsed and validated before use.
    Json(serde_json::Value),
}

/// Parameters of one `quantize` call.
pub struct QuantizeRequest {
    /// Calibration dataset for non-weights-only runs.
    pub calibration_dataset: Option<CalibrationDataset>,
    /// Directory the quantized model is persisted under.
    pub save_directory: Option<PathBuf>,
    /// Run configuration.
    pub config: Option<ConfigInput>,
    /// Model file name, overriding the fixed default.
    pub file_name: Option<String>,
    /// Calibration batch size.
    pub batch_size: usize,
    /// Compress weights only, keeping activations in floating point.
    pub weights_only: bool,
    /// Capture budget override for generation calibration.
    pub subset_size: Option<usize>,
    /// Filter dataset columns against the model's declared inputs.
    pub filter_columns: bool,
    /// De-duplicate captured tensors by content hash.
    pub dedup_captured: bool,
}

impl Default for QuantizeRequest {
    fn default() -> Self {
        Self {
            calibration_dataset: None,
            save_directory: None,
            config: None,
            file_name: None,
            batch_size: 1,
            weights_only: false,
            subset_size: None,
            filter_columns: true,
            dedup_captured: false,
        }
    }
}

impl QuantizeRequest {
    /// Create a request with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the save directory.
    pub fn with_save_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_directory = Some(dir.into());
        self
    }

    /// Set the calibration dataset.
    pub fn with_calibration_dataset(mut self, dataset: CalibrationDataset) -> Self {
        self.calibration_dataset = Some(dataset);
        self
    }

    /// Set a typed configuration.
    pub fn with_config(mut self, config: QuantizeConfig) -> Self {
        self.config = Some(ConfigInput::Config(config));
        self
    }

    /// Set a JSON dict configuration.
    pub fn with_config_json(mut self, value: serde_json::Value) -> Self {
        self.config = Some(ConfigInput::Json(value));
        self
    }

    /// Override the model file name.
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Set the calibration batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Toggle weights-only compression.
    pub fn weights_only(mut self, enabled: bool) -> Self {
        self.weights_only = enabled;
        self
    }

    /// Set the generation-capture budget.
    pub fn with_subset_size(mut self, n: usize) -> Self {
        self.subset_size = Some(n);
        self
    }

    /// Toggle column filtering.
    pub fn with_filter_columns(mut self, enabled: bool) -> Self {
        self.filter_columns = enabled;
        self
    }

    /// Toggle content-hash dedup of captured tensors.
    pub fn with_dedup_captured(mut self, enabled: bool) -> Self {
        self.dedup_captured = enabled;
        self
    }
}

/// External services one quantize call may draw on.
#[derive(Clone, Copy)]
pub struct QuantizeServices<'a> {
    /// Compression/quantization engine.
    pub engine: &'a dyn CompressionEngine,
    /// Export service, required for trainable models.
    pub export: Option<&'a dyn ExportService>,
    /// Dataset service.
    pub datasets: Option<&'a dyn DatasetProvider>,
    /// Tokenizer for named dataset references.
    pub tokenizer: Option<&'a dyn TextTokenizer>,
    /// Task-inference service.
    pub tasks: Option<&'a dyn TaskInference>,
}

impl<'a> QuantizeServices<'a> {
    /// Create a service set around an engine.
    pub fn new(engine: &'a dyn CompressionEngine) -> Self {
        Self { engine, export: None, datasets: None, tokenizer: None, tasks: None }
    }

    /// Attach an export service.
    pub fn with_export(mut self, export: &'a dyn ExportService) -> Self {
        self.export = Some(export);
        self
    }

    /// Attach a dataset service.
    pub fn with_datasets(mut self, datasets: &'a dyn DatasetProvider) -> Self {
        self.datasets = Some(datasets);
        self
    }

    /// Attach a tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: &'a dyn TextTokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Attach a task-inference service.
    pub fn with_tasks(mut self, tasks: &'a dyn TaskInference) -> Self {
        self.tasks = Some(tasks);
        self
    }

    fn policy_support(&self) -> PolicySupport<'a> {
        PolicySupport { datasets: self.datasets, tokenizer: self.tokenizer }
    }
}

/// Result of a successful quantize call.
#[derive(Clone, Debug)]
pub struct QuantizeOutcome {
    /// Path of the persisted model graph.
    pub model_path: PathBuf,
    /// Path of the sidecar configuration.
    pub config_path: PathBuf,
    /// Degraded-mode warnings raised during the run.
    pub warnings: Vec<String>,
}

/// Drives the quantization of one model.
pub struct Quantizer {
    model: ModelSource,
    task: Option<Task>,
    seed: u64,
}

impl Quantizer {
    /// Quantize an already-compiled runtime model.
    pub fn from_compiled(model: CompiledModel) -> Self {
        let task = model.task;
        Self { model: ModelSource::Compiled(model), task, seed: 42 }
    }

    /// Quantize a trainable model, exporting it first.
    pub fn from_trainable(model: Box<dyn TrainableModel>) -> Self {
        Self { model: ModelSource::Trainable(model), task: None, seed: 42 }
    }

    /// Set the task defining the model topology for the export.
    pub fn with_task(mut self, task: Task) -> Self {
        self.task = Some(task);
        self
    }

    /// Set the seed used when shuffling calibration data.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The resolved task, once known.
    pub fn task(&self) -> Option<Task> {
        self.task
    }

    /// The shuffle seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Access the underlying model.
    pub fn model(&self) -> &ModelSource {
        &self.model
    }

    /// Build a calibration dataset with this quantizer's seed.
    pub fn get_calibration_dataset(
        &self,
        provider: &dyn DatasetProvider,
        request: CalibrationDatasetRequest,
        preprocess: Option<Preprocess<'_>>,
    ) -> Result<CalibrationDataset> {
        build_calibration_dataset(provider, &request.with_seed(self.seed), preprocess)
    }

    /// Run one quantization pass and persist the result.
    pub fn quantize(
        &mut self,
        request: QuantizeRequest,
        services: &QuantizeServices<'_>,
    ) -> Result<QuantizeOutcome> {
        let mut warnings = Vec::new();

        // Validate-first: every usage error fires before any side effect.
        let save_directory =
            request.save_directory.clone().ok_or(CuantizarError::MissingSaveDirectory)?;
        if request.weights_only {
            if request.calibration_dataset.is_some() {
                warnings.push(
                    "`calibration_dataset` was provided but will not be used as `weights_only` is set to true"
                        .to_string(),
                );
            }
        } else if request.calibration_dataset.is_none() {
            return Err(CuantizarError::MissingCalibrationDataset);
        }
        let config = match &request.config {
            None => None,
            Some(ConfigInput::Config(c)) => {
                if let Some(wc) = &c.weight_config {
                    wc.validate()?;
                }
                Some(c.clone())
            }
            Some(ConfigInput::Json(value)) => Some(QuantizeConfig::from_json(value)?),
        };

        let seed = self.seed;
        let task_override = self.task;
        match &mut self.model {
            ModelSource::Compiled(model) => {
                let (model_path, config_path) = quantize_compiled(
                    model,
                    task_override,
                    seed,
                    &save_directory,
                    config,
                    &request,
                    services,
                    &mut warnings,
                )?;
                Ok(QuantizeOutcome { model_path, config_path, warnings })
            }
            ModelSource::Trainable(model) => {
                let (task, model_path, config_path) = quantize_trainable(
                    model.as_ref(),
                    task_override,
                    seed,
                    &save_directory,
                    config,
                    &request,
                    services,
                    &mut warnings,
                )?;
                self.task = Some(task);
                Ok(QuantizeOutcome { model_path, config_path, warnings })
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn quantize_compiled(
    model: &mut CompiledModel,
    task_override: Option<Task>,
    seed: u64,
    save_directory: &std::path::Path,
    config: Option<QuantizeConfig>,
    request: &QuantizeRequest,
    services: &QuantizeServices<'_>,
    warnings: &mut Vec<String>,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(save_directory)
        .map_err(|e| CuantizarError::io(format!("creating {}", save_directory.display()), e))?;

    let task = task_override.or(model.task);
    let config = config.unwrap_or_default();
    let support = services.policy_support();
    // The model keeps its graph until the transform succeeds; an engine
    // error leaves the caller's model untouched.
    let graph = model.graph.clone();

    let transformed = if request.weights_only {
        let wc = config.weight_config.clone().unwrap_or_default();
        weight_only_quantization(services.engine, graph, &wc, &support)?
    } else {
        let Some(dataset) = request.calibration_dataset.as_ref() else {
            return Err(CuantizarError::MissingCalibrationDataset);
        };
        let loader = CalibrationLoader::new(
            CalibrationLoaderConfig::new()
                .with_batch_size(request.batch_size)
                .with_seed(seed)
                .with_filter_columns(request.filter_columns),
        );
        let loaded = loader.load(dataset, &graph.parameter_names())?;
        warnings.extend(loaded.warnings);
        let mut batches = loaded.batches;

        // Generative compiled models calibrate on captured runtime inputs
        // rather than on the raw dataset.
        if task.is_some_and(|t| t.is_generative()) && model.use_cache {
            if let Some(runner) = model.runner.take() {
                batches = capture_generation_inputs(
                    runner,
                    &batches,
                    request.subset_size.unwrap_or(DEFAULT_CAPTURE_BUDGET),
                    request.dedup_captured,
                    model,
                )?;
            }
        }

        if let Some(wc) = &config.weight_config {
            hybrid_quantization(services.engine, graph, wc, &batches, &support)?
        } else {
            full_quantization(services.engine, graph, &config, &batches)?
        }
    };
    model.graph = transformed;

    let file_name = request.file_name.as_deref().unwrap_or(MODEL_GRAPH_FILE_NAME);
    let model_path = save_directory.join(file_name);
    save_graph(&model.graph, &model_path)?;

    let config_path = save_directory.join(CONFIG_FILE_NAME);
    save_sidecar(
        &SidecarConfig {
            task: task.map(|t| t.as_str().to_string()),
            weights_only: request.weights_only,
            config: Some(config),
        },
        &config_path,
    )?;
    Ok((model_path, config_path))
}

/// Run a short generation pass with the recorder wrapped around the live
/// inference path, returning the captured input batches.
fn capture_generation_inputs(
    runner: Box<dyn InferenceRunner>,
    batches: &[SampleBatch],
    budget: usize,
    dedup: bool,
    model: &mut CompiledModel,
) -> Result<Vec<SampleBatch>> {
    let mut recorder =
        InferRequestRecorder::new(runner).with_budget(budget).with_caching(dedup);
    for batch in batches {
        recorder.infer(batch)?;
        if recorder.is_full() {
            break;
        }
    }
    let (runner, collected) = recorder.into_parts();
    model.runner = Some(runner);
    Ok(collected)
}

#[allow(clippy::too_many_arguments)]
fn quantize_trainable(
    model: &dyn TrainableModel,
    task_override: Option<Task>,
    seed: u64,
    save_directory: &std::path::Path,
    config: Option<QuantizeConfig>,
    request: &QuantizeRequest,
    services: &QuantizeServices<'_>,
    warnings: &mut Vec<String>,
) -> Result<(Task, PathBuf, PathBuf)> {
    // Task resolution and rejection happen before export and before any
    // file is written.
    let mut task = match task_override {
        Some(task) => task,
        None => {
            let inferred = services.tasks.and_then(|t| t.infer_task(model.identifier()));
            match inferred {
                Some(label) => Task::parse(&label)?,
                None => {
                    return Err(CuantizarError::TaskInferenceFailed {
                        model_id: model.identifier().to_string(),
                    })
                }
            }
        }
    };
    task.ensure_supported()?;
    if task == Task::TextGeneration && model.uses_cache() {
        task = task.with_past();
    }

    let mut stateful = task.supports_stateful();
    if !request.weights_only && stateful {
        warnings.push(
            "the quantization algorithm does not support optimized stateful models; the model will be exported without the optimization"
                .to_string(),
        );
        stateful = false;
    }

    let export_input_names: Vec<String> = model
        .signature_columns()
        .into_iter()
        .filter(|c| !LABEL_COLUMNS.contains(&c.as_str()))
        .collect();
    if request.weights_only && !model.accepts_inputs(&export_input_names) {
        return Err(CuantizarError::ExportFailed {
            message: format!(
                "model '{}' does not accept the generated dummy inputs",
                model.identifier()
            ),
        });
    }

    let export = services.export.ok_or_else(|| CuantizarError::ExportFailed {
        message: "no export service available".to_string(),
    })?;

    std::fs::create_dir_all(save_directory)
        .map_err(|e| CuantizarError::io(format!("creating {}", save_directory.display()), e))?;

    let file_name = request.file_name.as_deref().unwrap_or(MODEL_GRAPH_FILE_NAME);
    let output = save_directory.join(file_name);
    let opset = model.default_opset().min(MAX_EXPORT_OPSET).max(MIN_QDQ_OPSET);

    let outcome =
        export.export(model, &ExportRequest { output: output.clone(), opset, stateful })?;

    let support = services.policy_support();
    let graph = if request.weights_only {
        let wc = config
            .as_ref()
            .and_then(|c| c.weight_config.clone())
            .unwrap_or_default();
        weight_only_quantization(services.engine, outcome.graph, &wc, &support)?
    } else {
        let Some(dataset) = request.calibration_dataset.as_ref() else {
            return Err(CuantizarError::MissingCalibrationDataset);
        };
        let loader = CalibrationLoader::new(
            CalibrationLoaderConfig::new()
                .with_batch_size(request.batch_size)
                .with_seed(seed)
                .with_filter_columns(request.filter_columns),
        );
        let loaded = loader.load(dataset, &outcome.input_names)?;
        warnings.extend(loaded.warnings);
        full_quantization(
            services.engine,
            outcome.graph,
            &config.clone().unwrap_or_default(),
            &loaded.batches,
        )?
    };

    let graph = fold_quantize_constants(graph)?;
    save_graph(&graph, &output)?;

    // Best-effort cleanup of temporary interchange-format files: a file
    // already absent is fine, anything else propagates.
    if outcome.used_fallback_format {
        for path in &outcome.artifact_paths {
            if path == &output {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CuantizarError::io(
                        format!("removing temporary export file {}", path.display()),
                        e,
                    ))
                }
            }
        }
    }

    let config_path = save_directory.join(CONFIG_FILE_NAME);
    save_sidecar(
        &SidecarConfig {
            task: Some(task.as_str().to_string()),
            weights_only: request.weights_only,
            config,
        },
        &config_path,
    )?;

    Ok((task, output, config_path))
}
