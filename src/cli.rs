use std::path::PathBuf;

use anyhow::Result;
use candle_core::Device;
use clap::Parser;
use tracing::info;

use crate::datasets::{index_tensor, AttackMethod, Dataset, DatasetName, GraphData, PerturbedDataset, Setting};
use crate::models::{Sgc, SgcParams, TestReport};

/// Train SGC on a clean citation graph, then again on the same graph
/// perturbed by a pre-computed adversarial attack.
#[derive(Parser, Debug, Clone)]
#[command(name = "test_sgc")]
pub struct Cli {
    /// Random seed.
    #[arg(long, default_value_t = 15)]
    pub seed: u64,

    /// Dataset.
    #[arg(long, value_enum, default_value_t = DatasetName::Cora)]
    pub dataset: DatasetName,

    /// Perturbation rate.
    #[arg(long = "ptb_rate", default_value_t = 0.05)]
    pub ptb_rate: f64,

    /// Directory the datasets are cached in.
    #[arg(long, default_value = "/tmp/")]
    pub root: PathBuf,

    /// Seed of the train/val/test split; the pre-attacked graphs were
    /// generated under seed 15.
    #[arg(long, default_value_t = 15)]
    pub split_seed: u64,

    #[arg(long, value_enum, default_value_t = Setting::Nettack)]
    pub setting: Setting,

    /// Attack that produced the perturbed graph.
    #[arg(long, value_enum, default_value_t = AttackMethod::Meta)]
    pub attack: AttackMethod,

    /// Learning rate.
    #[arg(long, default_value_t = 0.1)]
    pub lr: f64,

    /// Run on the CPU even when CUDA is available.
    #[arg(long)]
    pub cpu: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub clean: TestReport,
    pub perturbed: TestReport,
    /// Accuracy on the attacked nodes, for targeted attacks.
    pub target_nodes: Option<TestReport>,
    /// Adjacency entries that differ between the clean and perturbed graphs.
    pub changed_entries: usize,
}

pub fn run(cli: &Cli) -> Result<RunSummary> {
    let device = if cli.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    info!("cuda: {}", device.is_cuda());

    let data = Dataset::load(&cli.root, cli.dataset, cli.setting, cli.split_seed)?;
    info!("{}", data);

    let params = SgcParams {
        lr: cli.lr,
        seed: cli.seed,
        ..Default::default()
    };
    let mut sgc = Sgc::new(data.num_features(), data.num_classes(), params, &device)?;

    // test on clean graph
    println!("==================");
    println!("=== train on clean graph ===");
    let mut graph = GraphData::from_dataset(&data, &device)?;
    sgc.fit(&graph, true)?;
    let clean = sgc.test(&graph)?;

    println!("==================");
    println!(
        "=== load graph perturbed by Zugner {} (under seed 15) ===",
        match cli.attack {
            AttackMethod::Meta => "metattack",
            AttackMethod::Nettack => "nettack",
        }
    );
    let perturbed = PerturbedDataset::load(&cli.root, cli.dataset, cli.attack, cli.ptb_rate)?;
    let changed_entries = data.adj.count_differences(&perturbed.adj)?;
    info!(
        "perturbed graph differs from the clean graph in {} adjacency entries",
        changed_entries
    );
    graph.update_edge_index(&perturbed.adj)?;
    sgc.fit(&graph, true)?;
    let perturbed_report = sgc.test(&graph)?;

    let target_nodes = match &perturbed.target_nodes {
        Some(nodes) => {
            let report = sgc.evaluate(&graph, &index_tensor(nodes, &device)?)?;
            println!(
                "Target nodes results: loss= {:.4} accuracy= {:.4}",
                report.loss, report.accuracy
            );
            Some(report)
        }
        None => None,
    };

    Ok(RunSummary {
        clean,
        perturbed: perturbed_report,
        target_nodes,
        changed_entries,
    })
}
