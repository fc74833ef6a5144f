// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All tensor code lives here.
//
//   value.rs     — DynTensor / GraphValue: runtime-typed values
//                  exchanged with a traced graph
//   traced.rs    — TracedGraph: frozen node program + weights
//   module.rs    — ComposedModule: traced graph + linear head
//   masking.rs   — MaskedBatchCorruptor for masked-LM batches
//   solver.rs    — SGD / Adam / RMSProp / AdaGrad behind one step
//   trainer.rs   — iteration-based loop with accumulation,
//                  periodic evaluation and checkpoints
//   evaluator.rs — eval-mode pass feeding a Measurer
//   predictor.rs — softmax + top-k ranking for one batch
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)

pub mod error;
pub mod value;
pub mod traced;
pub mod module;
pub mod masking;
pub mod solver;
pub mod trainer;
pub mod evaluator;
pub mod predictor;

/// Backend used for inference and evaluation
pub type InferBackend = burn::backend::NdArray;
/// Backend used for training
pub type TrainBackend = burn::backend::Autodiff<InferBackend>;

#[cfg(feature = "wgpu")]
pub type GpuInferBackend = burn::backend::Wgpu;
#[cfg(feature = "wgpu")]
pub type GpuTrainBackend = burn::backend::Autodiff<GpuInferBackend>;
