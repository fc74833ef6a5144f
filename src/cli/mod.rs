// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap, picks a backend and hands off to
// a Layer 2 use case. The JSON payload each use case returns is
// printed to stdout.
//
// Backends:
//   default      — NdArray (Autodiff<NdArray> for training)
//   --gpu        — Wgpu, when built with the `wgpu` feature;
//                  otherwise a warning and the CPU backend
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{ClearArgs, Commands, PredictArgs, TraceArgs, TrainArgs};
use serde_json::Value;

use crate::application::{
    config::ModelConfig,
    predict_use_case::{PredictRequest, PredictUseCase},
    trace_use_case::TraceUseCase,
    train_use_case::TrainUseCase,
};
use crate::data::loader::JsonlConnector;
use crate::infra::{checkpoint::ModelRepository, output::JsonOutput};
use crate::ml::{InferBackend, TrainBackend};

#[derive(Parser, Debug)]
#[command(
    name = "traced-classifier",
    version = "0.1.0",
    about = "Train and serve a linear classification head on top of a frozen traced graph."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)   => run_train(args),
            Commands::Predict(args) => run_predict(args),
            Commands::Clear(args)   => run_clear(args),
            Commands::Trace(args)   => run_trace(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let input  = JsonlConnector::from(&args.data);
    let output = JsonOutput::new(args.output);
    let model  = ModelConfig::from(args.model);
    tracing::info!("Training from '{}' into '{}'", args.data.data.display(), model.repository);

    let gpu      = model.gpu;
    let use_case = TrainUseCase::new(model, args.solver.into());
    print(train_on(&use_case, &input, &output, gpu)?)
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let input   = JsonlConnector::from(&args.data);
    let output  = JsonOutput::new(args.output.clone());
    let request = PredictRequest { best: args.best, measure: args.measure };
    let solver  = args.solver();
    let model   = ModelConfig::from(args.model);

    let gpu      = model.gpu;
    let use_case = PredictUseCase::new(model, solver);
    print(predict_on(&use_case, &input, &output, request, gpu)?)
}

fn run_clear(args: ClearArgs) -> Result<()> {
    let removed = ModelRepository::new(&args.repository)?.clear()?;
    println!("Removed {removed} files from '{}'", args.repository);
    Ok(())
}

fn run_trace(args: TraceArgs) -> Result<()> {
    let path = TraceUseCase::new(args.repository.clone()).execute(&(&args).into())?;
    println!("Trace written to '{}'", path.display());
    Ok(())
}

// ─── Backend selection ───────────────────────────────────────────────────────
#[cfg(feature = "wgpu")]
fn train_on(use_case: &TrainUseCase, input: &JsonlConnector, output: &JsonOutput, gpu: bool) -> Result<Value> {
    use crate::ml::GpuTrainBackend;
    if gpu {
        return use_case.execute::<GpuTrainBackend>(input, output, Default::default());
    }
    use_case.execute::<TrainBackend>(input, output, Default::default())
}

#[cfg(not(feature = "wgpu"))]
fn train_on(use_case: &TrainUseCase, input: &JsonlConnector, output: &JsonOutput, gpu: bool) -> Result<Value> {
    warn_no_gpu(gpu);
    use_case.execute::<TrainBackend>(input, output, Default::default())
}

#[cfg(feature = "wgpu")]
fn predict_on(
    use_case: &PredictUseCase,
    input:    &JsonlConnector,
    output:   &JsonOutput,
    request:  PredictRequest,
    gpu:      bool,
) -> Result<Value> {
    use crate::ml::GpuInferBackend;
    if gpu {
        return use_case.execute::<GpuInferBackend>(input, output, request, Default::default());
    }
    use_case.execute::<InferBackend>(input, output, request, Default::default())
}

#[cfg(not(feature = "wgpu"))]
fn predict_on(
    use_case: &PredictUseCase,
    input:    &JsonlConnector,
    output:   &JsonOutput,
    request:  PredictRequest,
    gpu:      bool,
) -> Result<Value> {
    warn_no_gpu(gpu);
    use_case.execute::<InferBackend>(input, output, request, Default::default())
}

#[cfg(not(feature = "wgpu"))]
fn warn_no_gpu(requested: bool) {
    if requested {
        tracing::warn!("--gpu requested but built without the `wgpu` feature, using the CPU");
    }
}

fn print(payload: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
