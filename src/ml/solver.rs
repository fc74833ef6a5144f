// ============================================================
// Layer 5 — Solver
// ============================================================
// Picks one of Burn's optimizers from a configured name and
// hides its concrete type behind one object-safe step call:
//
//   SGD      θ = θ - lr * g
//   ADAM     m = β1*m + (1-β1)*g ; v = β2*v + (1-β2)*g²
//            θ = θ - lr * m / (√v + ε)
//   RMSPROP  v = α*v + (1-α)*g²  ; θ = θ - lr * g / (√v + ε)
//   ADAGRAD  s = s + g²          ; θ = θ - lr * g / (√s + ε)
//
// Unknown names fall back to SGD with a warning.
//
// Reference: Burn Book §5 (Optimizers)

use burn::{
    module::AutodiffModule,
    optim::{AdaGradConfig, AdamConfig, GradientsParams, Optimizer, RmsPropConfig, SgdConfig},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SolverKind {
    #[default]
    Sgd,
    Adam,
    RmsProp,
    AdaGrad,
}

impl SolverKind {
    /// Case-insensitive name lookup; anything unknown becomes SGD.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "SGD"     => Self::Sgd,
            "ADAM"    => Self::Adam,
            "RMSPROP" => Self::RmsProp,
            "ADAGRAD" => Self::AdaGrad,
            other => {
                tracing::warn!("Solver type {} not found, using SGD", other);
                Self::Sgd
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Sgd     => "SGD",
            Self::Adam    => "ADAM",
            Self::RmsProp => "RMSPROP",
            Self::AdaGrad => "ADAGRAD",
        }
    }
}

/// Object-safe view of `burn::optim::Optimizer`.
trait SolverStep<M, B: AutodiffBackend> {
    fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M;
}

impl<M, B, O> SolverStep<M, B> for O
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    fn step(&mut self, lr: f64, module: M, grads: GradientsParams) -> M {
        <O as Optimizer<M, B>>::step(self, lr, module, grads)
    }
}

pub struct Solver<M, B: AutodiffBackend> {
    lr:    f64,
    steps: usize,
    inner: Box<dyn SolverStep<M, B>>,
}

impl<M, B> Solver<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + 'static,
{
    pub fn new(kind: SolverKind, base_lr: f64) -> Self {
        let inner: Box<dyn SolverStep<M, B>> = match kind {
            SolverKind::Sgd     => Box::new(SgdConfig::new().init::<B, M>()),
            SolverKind::Adam    => Box::new(AdamConfig::new().with_epsilon(1e-8).init::<B, M>()),
            SolverKind::RmsProp => Box::new(RmsPropConfig::new().init::<B, M>()),
            SolverKind::AdaGrad => Box::new(AdaGradConfig::new().init::<B, M>()),
        };
        tracing::info!("Solver {} with base_lr={}", kind.name(), base_lr);
        Self { lr: base_lr, steps: 0, inner }
    }

    /// Apply accumulated gradients and count the step.
    pub fn step(&mut self, module: M, grads: GradientsParams) -> M {
        self.steps += 1;
        self.inner.step(self.lr, module, grads)
    }

    pub fn steps(&self) -> usize {
        self.steps
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
        prelude::*,
    };

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_parse_names() {
        assert_eq!(SolverKind::parse("adam"),    SolverKind::Adam);
        assert_eq!(SolverKind::parse("RMSProp"), SolverKind::RmsProp);
        assert_eq!(SolverKind::parse("AdaGrad"), SolverKind::AdaGrad);
        assert_eq!(SolverKind::parse("lbfgs"),   SolverKind::Sgd);
    }

    #[test]
    fn test_serde_uses_upper_case() {
        assert_eq!(serde_json::to_string(&SolverKind::RmsProp).unwrap(), "\"RMSPROP\"");
        let k: SolverKind = serde_json::from_str("\"ADAM\"").unwrap();
        assert_eq!(k, SolverKind::Adam);
    }

    #[test]
    fn test_step_updates_weights() {
        let device = Default::default();
        let layer: Linear<TestBackend> = LinearConfig::new(2, 1).init(&device);
        let weights = |l: &Linear<TestBackend>| l.weight.val().into_data().to_vec::<f32>().unwrap();
        let before = weights(&layer);

        for kind in [SolverKind::Sgd, SolverKind::Adam, SolverKind::RmsProp, SolverKind::AdaGrad] {
            let x     = Tensor::<TestBackend, 2>::ones([4, 2], &device);
            let loss  = layer.forward(x).sum();
            let grads = GradientsParams::from_grads(loss.backward(), &layer);

            let mut solver = Solver::<Linear<TestBackend>, TestBackend>::new(kind, 0.1);
            let updated = solver.step(layer.clone(), grads);
            assert_eq!(solver.steps(), 1);
            assert_ne!(weights(&updated), before, "{kind:?}");
        }
    }
}
