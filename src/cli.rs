//! Command-line interface.
//!
//! Quantizes serialized graph artifacts from the shell. The CLI drives the
//! weight-only path (full quantization needs a calibration dataset wired in
//! through the library API).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{IgnoredScope, QuantizeConfig, WeightCompressionConfig};
use crate::engine::ReferenceEngine;
use crate::error::Result;
use crate::graph::{collect_weight_ops, ConstantValue};
use crate::io::load_graph;
use crate::quantizer::{CompiledModel, QuantizeRequest, QuantizeServices, Quantizer};

/// Output verbosity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Quiet,
    Normal,
    Verbose,
}

/// Print a message when the active level admits it.
pub fn log(level: LogLevel, min: LogLevel, message: &str) {
    if level >= min {
        println!("{message}");
    }
}

/// cuantizar — post-training quantization for serialized model graphs.
#[derive(Parser)]
#[command(name = "cuantizar", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Print per-tensor details.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Compress the weights of a serialized model graph.
    Quantize(QuantizeArgs),
    /// Summarize the weight-bearing operations of a graph.
    Inspect {
        /// Path to the serialized graph artifact.
        model: PathBuf,
    },
}

#[derive(Args)]
struct QuantizeArgs {
    /// Path to the serialized graph artifact.
    model: PathBuf,

    /// Directory the quantized model is saved under.
    #[arg(short, long)]
    output: PathBuf,

    /// Bit width (4 or 8).
    #[arg(long, default_value_t = 8)]
    bits: u8,

    /// Use asymmetric quantization.
    #[arg(long)]
    asym: bool,

    /// Group width along the innermost weight axis.
    #[arg(long)]
    group_size: Option<usize>,

    /// Fraction of layers at the primary precision.
    #[arg(long)]
    ratio: Option<f32>,

    /// Compress embeddings and the final projection as well.
    #[arg(long)]
    all_layers: bool,

    /// Friendly names to exclude from compression.
    #[arg(long)]
    exclude: Vec<String>,

    /// Model file name, overriding the default.
    #[arg(long)]
    file_name: Option<String>,
}

/// Dispatch a parsed command line.
pub fn run_command(cli: Cli) -> Result<()> {
    let level = if cli.quiet {
        LogLevel::Quiet
    } else if cli.verbose {
        LogLevel::Verbose
    } else {
        LogLevel::Normal
    };

    match cli.command {
        Command::Quantize(args) => run_quantize(args, level),
        Command::Inspect { model } => run_inspect(&model, level),
    }
}

fn constant_footprint(graph: &crate::graph::ModelGraph) -> usize {
    graph
        .ops()
        .filter_map(|(_, op)| op.constant.as_ref())
        .map(|c| match c {
            ConstantValue::F32 { data, .. } => data.len() * 4,
            ConstantValue::I64 { data, .. } => data.len() * 8,
            ConstantValue::Quantized(q) => q.memory_bytes(),
        })
        .sum()
}

fn run_quantize(args: QuantizeArgs, level: LogLevel) -> Result<()> {
    log(
        level,
        LogLevel::Normal,
        &format!("Quantizing {} to {}-bit", args.model.display(), args.bits),
    );

    let mut weight_config = WeightCompressionConfig::new(args.bits, !args.asym)?;
    if let Some(group_size) = args.group_size {
        weight_config = weight_config.with_group_size(group_size);
    }
    if let Some(ratio) = args.ratio {
        weight_config = weight_config.with_ratio(ratio);
    }
    weight_config = weight_config.with_all_layers(args.all_layers);
    if !args.exclude.is_empty() {
        weight_config = weight_config
            .with_ignored_scope(IgnoredScope::new().with_added_names(args.exclude.clone()));
    }
    weight_config.validate()?;

    let graph = load_graph(&args.model)?;
    let before = constant_footprint(&graph);
    log(level, LogLevel::Verbose, &format!("  Operations: {}", graph.len()));
    log(level, LogLevel::Verbose, &format!("  Output: {}", args.output.display()));

    let engine = ReferenceEngine::new();
    let mut quantizer = Quantizer::from_compiled(CompiledModel::new(graph));
    let mut request = QuantizeRequest::new()
        .with_save_directory(&args.output)
        .with_config(QuantizeConfig::new().with_weight_config(weight_config))
        .weights_only(true);
    if let Some(file_name) = args.file_name {
        request = request.with_file_name(file_name);
    }
    let outcome = quantizer.quantize(request, &QuantizeServices::new(&engine))?;

    for warning in &outcome.warnings {
        log(level, LogLevel::Normal, &format!("Warning: {warning}"));
    }

    let after = load_graph(&outcome.model_path).map(|g| constant_footprint(&g)).unwrap_or(0);
    let ratio = if after > 0 { before as f64 / after as f64 } else { 1.0 };
    log(
        level,
        LogLevel::Normal,
        &format!("Quantization complete: {ratio:.1}x weight compression"),
    );
    log(level, LogLevel::Normal, &format!("  Output: {}", outcome.model_path.display()));
    Ok(())
}

fn run_inspect(model: &PathBuf, level: LogLevel) -> Result<()> {
    let graph = load_graph(model)?;
    let weight_ops = collect_weight_ops(&graph);

    log(level, LogLevel::Normal, &format!("{}: {} operations", model.display(), graph.len()));
    log(
        level,
        LogLevel::Normal,
        &format!("  Weight-bearing operations: {}", weight_ops.len()),
    );
    for name in &weight_ops {
        log(level, LogLevel::Verbose, &format!("    {name}"));
    }
    log(
        level,
        LogLevel::Normal,
        &format!("  Constant footprint: {} bytes", constant_footprint(&graph)),
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ElementType, InputEdge, ModelGraph, OpKind, ValueInfo};
    use crate::io::{save_graph, MODEL_GRAPH_FILE_NAME};
    use tempfile::TempDir;

    fn saved_toy_graph(dir: &TempDir) -> PathBuf {
        let mut g = ModelGraph::new();
        let w = g
            .add_constant(
                "w",
                ConstantValue::F32 { shape: vec![1, 4], data: vec![0.5, -0.5, 1.0, -1.0] },
            )
            .unwrap();
        let x = g
            .add_op(
                OpKind::Parameter,
                "x",
                vec![],
                vec![ValueInfo::new(ElementType::F32, vec![4])],
            )
            .unwrap();
        g.add_op(
            OpKind::MatMul,
            "proj",
            vec![InputEdge::new(x, 0), InputEdge::new(w, 0)],
            vec![ValueInfo::new(ElementType::F32, vec![1, 4])],
        )
        .unwrap();
        let path = dir.path().join("model.json");
        save_graph(&g, &path).unwrap();
        path
    }

    #[test]
    fn test_cli_quantize_round_trip() {
        let dir = TempDir::new().unwrap();
        let model = saved_toy_graph(&dir);
        let out_dir = dir.path().join("out");

        let cli = Cli::parse_from([
            "cuantizar",
            "--quiet",
            "quantize",
            model.to_str().unwrap(),
            "--output",
            out_dir.to_str().unwrap(),
        ]);
        run_command(cli).unwrap();

        assert!(out_dir.join(MODEL_GRAPH_FILE_NAME).exists());
    }

    #[test]
    fn test_cli_rejects_bad_bits() {
        let dir = TempDir::new().unwrap();
        let model = saved_toy_graph(&dir);
        let out_dir = dir.path().join("out");

        let cli = Cli::parse_from([
            "cuantizar",
            "--quiet",
            "quantize",
            model.to_str().unwrap(),
            "--output",
            out_dir.to_str().unwrap(),
            "--bits",
            "3",
        ]);
        assert!(run_command(cli).is_err());
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_cli_inspect_missing_model() {
        let cli = Cli::parse_from(["cuantizar", "--quiet", "inspect", "/nonexistent.json"]);
        assert!(run_command(cli).is_err());
    }

    #[test]
    fn test_cli_inspect_counts() {
        let dir = TempDir::new().unwrap();
        let model = saved_toy_graph(&dir);
        let cli = Cli::parse_from(["cuantizar", "--quiet", "inspect", model.to_str().unwrap()]);
        run_command(cli).unwrap();
    }
}
