//! cuantizar CLI
//!
//! Post-training quantization for serialized model graphs.
//!
//! # Usage
//!
//! ```bash
//! # Compress weights to 8-bit
//! cuantizar quantize model.graph.json --output quantized/
//!
//! # 4-bit grouped compression, keeping the head at full precision
//! cuantizar quantize model.graph.json --output quantized/ --bits 4 --group-size 128 --exclude lm_head
//!
//! # Summarize weight-bearing operations
//! cuantizar inspect model.graph.json
//! ```

use clap::Parser;
use cuantizar::cli::{run_command, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
