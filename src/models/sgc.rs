use candle_core::{DType, Device, IndexOp, Result, Tensor, D};
use candle_nn::{loss, ops, Optimizer, ParamsAdamW, VarMap};
use rand::{rngs::StdRng, SeedableRng};
use tracing::info;

use crate::datasets::GraphData;
use crate::nn::{GnnModule, SgConv};
use crate::utils::accuracy;

#[derive(Debug, Clone)]
pub struct SgcParams {
    /// Number of propagation hops.
    pub k: usize,
    pub cached: bool,
    pub lr: f64,
    /// L2 penalty, applied the way `torch.optim.Adam(weight_decay=..)` does.
    pub weight_decay: f64,
    pub with_bias: bool,
    pub train_iters: usize,
    pub patience: usize,
    /// Seeds parameter initialisation.
    pub seed: u64,
}
impl Default for SgcParams {
    fn default() -> Self {
        Self {
            k: 3,
            cached: true,
            lr: 0.01,
            weight_decay: 5e-4,
            with_bias: true,
            train_iters: 200,
            patience: 500,
            seed: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSummary {
    /// Index of the last iteration that ran.
    pub stopped_at: usize,
    pub best_val_loss: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestReport {
    pub loss: f32,
    pub accuracy: f32,
}

/// Node classifier built from a single [`SgConv`] followed by log-softmax.
pub struct Sgc {
    conv1: SgConv,
    varmap: VarMap,
    params: SgcParams,
    device: Device,
    rng: StdRng,
    output: Option<Tensor>,
}

impl Sgc {
    pub fn new(num_features: usize, num_classes: usize, params: SgcParams, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let conv1 = SgConv::new(
            num_features,
            num_classes,
            params.k,
            params.cached,
            params.with_bias,
            &varmap,
            "conv1",
            device,
        )?;
        Ok(Self {
            conv1,
            varmap,
            rng: StdRng::seed_from_u64(params.seed),
            params,
            device: device.clone(),
            output: None,
        })
    }

    pub fn params(&self) -> &SgcParams {
        &self.params
    }

    /// Output of the best validation epoch of the last [`Self::fit`].
    pub fn output(&self) -> Option<&Tensor> {
        self.output.as_ref()
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.conv1.reset_parameters(&mut self.rng)
    }

    fn forward_propagated(&self, h: &Tensor) -> Result<Tensor> {
        ops::log_softmax(&self.conv1.linear(h)?, D::Minus1)
    }

    fn propagated(&mut self, graph: &GraphData) -> Result<Tensor> {
        self.conv1.propagate_cached(&graph.x, &graph.edge_index, graph.version())
    }

    fn l2_penalty(&self) -> Result<Tensor> {
        let mut sum = Tensor::zeros((), DType::F32, &self.device)?;
        for p in self.conv1.parameters() {
            sum = sum.add(&p.sqr()?.sum_all()?)?;
        }
        sum.affine(self.params.weight_decay / 2.0, 0.0)
    }

    /// Trains from freshly initialised parameters with Adam, keeping the
    /// weights of the epoch with the lowest validation loss.
    ///
    /// Stops early once `patience` epochs pass without improvement, but never
    /// before `patience` epochs have run in total.
    pub fn fit(&mut self, graph: &GraphData, verbose: bool) -> Result<FitSummary> {
        self.initialize()?;
        if verbose {
            info!("=== training SGC model ===");
        }
        let mut optimizer = candle_nn::AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: self.params.lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let h = self.propagated(graph)?;
        let y_train = graph.y.i(&graph.train_index)?;
        let y_val = graph.y.i(&graph.val_index)?;

        let early_stopping = self.params.patience;
        let mut patience = early_stopping;
        let mut best_loss_val = 100f32;
        let mut weights = self.conv1.state_dict()?;
        let mut stopped_at = 0;

        for i in 0..self.params.train_iters {
            stopped_at = i;
            let output = self.forward_propagated(&h)?;
            let loss_train = loss::nll(&output.i(&graph.train_index)?, &y_train)?;
            let objective = if self.params.weight_decay > 0.0 {
                loss_train.add(&self.l2_penalty()?)?
            } else {
                loss_train.clone()
            };
            optimizer.backward_step(&objective)?;
            if verbose && i % 10 == 0 {
                info!("Epoch {}, training loss: {}", i, loss_train.to_scalar::<f32>()?);
            }

            let output = self.forward_propagated(&h)?;
            let loss_val = loss::nll(&output.i(&graph.val_index)?, &y_val)?.to_scalar::<f32>()?;
            if best_loss_val > loss_val {
                best_loss_val = loss_val;
                self.output = Some(output);
                weights = self.conv1.state_dict()?;
                patience = early_stopping;
            } else {
                patience = patience.saturating_sub(1);
            }
            if i > early_stopping && patience == 0 {
                break;
            }
        }
        if verbose {
            info!("=== early stopping at {}, loss_val = {} ===", stopped_at, best_loss_val);
        }
        self.conv1.load_state_dict(&weights)?;
        Ok(FitSummary {
            stopped_at,
            best_val_loss: best_loss_val,
        })
    }

    /// NLL and accuracy of the current model on the nodes in `index`.
    pub fn evaluate(&mut self, graph: &GraphData, index: &Tensor) -> Result<TestReport> {
        let output = self.predict(graph)?.i(index)?;
        let labels = graph.y.i(index)?;
        Ok(TestReport {
            loss: loss::nll(&output, &labels)?.to_scalar::<f32>()?,
            accuracy: accuracy(&output, &labels)?,
        })
    }

    /// Evaluates on the test nodes and prints the result.
    pub fn test(&mut self, graph: &GraphData) -> Result<TestReport> {
        let report = self.evaluate(graph, &graph.test_index)?;
        println!(
            "Test set results: loss= {:.4} accuracy= {:.4}",
            report.loss, report.accuracy
        );
        Ok(report)
    }

    /// Log-probabilities for every node.
    pub fn predict(&mut self, graph: &GraphData) -> Result<Tensor> {
        let h = self.propagated(graph)?;
        self.forward_propagated(&h)
    }
}

impl GnnModule for Sgc {
    fn forward_t(&self, x: &Tensor, edge_index: &Tensor, train: bool) -> Result<Tensor> {
        ops::log_softmax(&self.conv1.forward_t(x, edge_index, train)?, D::Minus1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{CsrMatrix, Dataset, DatasetName, Setting};

    /// Two 4-cliques joined by a single edge; features mark the community
    /// with some noise so that propagation helps.
    fn two_communities() -> Dataset {
        let mut triplets = Vec::new();
        for block in [0, 4] {
            for i in block..block + 4 {
                for j in block..block + 4 {
                    if i != j {
                        triplets.push((i, j, 1.0));
                    }
                }
            }
        }
        triplets.push((3, 4, 1.0));
        triplets.push((4, 3, 1.0));
        let adj = CsrMatrix::from_triplets(8, 8, &triplets);
        let labels = vec![0, 0, 0, 0, 1, 1, 1, 1];
        let features = CsrMatrix::from_triplets(
            8,
            2,
            &[(0, 0, 1.0), (1, 0, 1.0), (2, 1, 1.0), (4, 1, 1.0), (5, 1, 1.0), (6, 0, 1.0)],
        );
        Dataset {
            name: DatasetName::Cora,
            setting: Setting::Nettack,
            adj,
            features,
            labels,
            idx_train: vec![0, 1, 4, 5],
            idx_val: vec![2, 6],
            idx_test: vec![3, 7],
        }
    }

    fn graph() -> GraphData {
        GraphData::from_dataset(&two_communities(), &Device::Cpu).unwrap()
    }

    #[test]
    fn fit_learns_the_communities() {
        let graph = graph();
        let params = SgcParams {
            lr: 0.1,
            ..Default::default()
        };
        let mut sgc = Sgc::new(2, 2, params, &Device::Cpu).unwrap();
        let summary = sgc.fit(&graph, false).unwrap();
        assert_eq!(summary.stopped_at, 199);
        assert!(summary.best_val_loss < 0.6931);

        let report = sgc.evaluate(&graph, &graph.train_index).unwrap();
        assert_eq!(report.accuracy, 1.0);
    }

    #[test]
    fn best_weights_are_restored() {
        let graph = graph();
        let mut sgc = Sgc::new(2, 2, SgcParams::default(), &Device::Cpu).unwrap();
        let summary = sgc.fit(&graph, false).unwrap();
        let report = sgc.evaluate(&graph, &graph.val_index).unwrap();
        assert!((report.loss - summary.best_val_loss).abs() < 1e-5);
        let best = sgc.output().unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(sgc.predict(&graph).unwrap().to_vec2::<f32>().unwrap(), best);
    }

    #[test]
    fn early_stopping_needs_more_than_patience_epochs() {
        let graph = graph();
        let params = SgcParams {
            lr: 0.0,
            patience: 5,
            train_iters: 100,
            ..Default::default()
        };
        // a zero learning rate freezes the weights, so the validation loss never improves
        let mut sgc = Sgc::new(2, 2, params, &Device::Cpu).unwrap();
        let summary = sgc.fit(&graph, false).unwrap();
        assert_eq!(summary.stopped_at, 6);
    }

    #[test]
    fn same_seed_gives_same_predictions() {
        let graph = graph();
        let run = || {
            let mut sgc = Sgc::new(2, 2, SgcParams::default(), &Device::Cpu).unwrap();
            sgc.fit(&graph, false).unwrap();
            sgc.predict(&graph).unwrap().to_vec2::<f32>().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn cached_prediction_matches_uncached_forward() {
        let graph = graph();
        let mut sgc = Sgc::new(2, 2, SgcParams::default(), &Device::Cpu).unwrap();
        sgc.initialize().unwrap();
        let cached = sgc.predict(&graph).unwrap().to_vec2::<f32>().unwrap();
        let direct = sgc.forward(&graph.x, &graph.edge_index).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(cached, direct);
    }
}
