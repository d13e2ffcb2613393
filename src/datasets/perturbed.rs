use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

use super::{fetch_if_missing, format_rate, CsrMatrix, DatasetError, DatasetName, NpzReader};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum AttackMethod {
    #[default]
    #[value(alias = "mettack", alias = "metattack")]
    Meta,
    Nettack,
}
impl AttackMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackMethod::Meta => "meta",
            AttackMethod::Nettack => "nettack",
        }
    }
}
impl fmt::Display for AttackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for AttackMethod {
    type Err = DatasetError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "meta" | "mettack" | "metattack" => Ok(AttackMethod::Meta),
            "nettack" => Ok(AttackMethod::Nettack),
            _ => Err(DatasetError::UnknownAttack(s.to_owned())),
        }
    }
}

#[derive(Deserialize)]
struct NettackedNodes {
    attacked_test_nodes: Vec<usize>,
}

/// A pre-attacked adjacency matrix from the Pro-GNN repository.
///
/// The graphs were perturbed on the largest connected component, so the
/// adjacency lines up with a [`super::Dataset`] loaded in the nettack or
/// prognn setting.
#[derive(Debug, Clone)]
pub struct PerturbedDataset {
    pub name: DatasetName,
    pub attack_method: AttackMethod,
    pub ptb_rate: f64,
    pub adj: CsrMatrix,
    /// Nodes targeted by nettack; `None` for global attacks.
    pub target_nodes: Option<Vec<usize>>,
}

impl PerturbedDataset {
    const BASE_URL: &'static str = "https://raw.githubusercontent.com/ChandlerBang/Pro-GNN/master";

    pub fn load<P: AsRef<Path>>(
        root: P,
        name: DatasetName,
        attack_method: AttackMethod,
        ptb_rate: f64,
    ) -> Result<Self> {
        let root = root.as_ref();
        let filename = Self::adj_filename(name, attack_method, ptb_rate);
        fetch_if_missing(
            &format!("{}/{}/{}", Self::BASE_URL, attack_method, filename),
            root.join(&filename),
        )?;
        if attack_method == AttackMethod::Nettack {
            let filename = Self::target_nodes_filename(name);
            fetch_if_missing(
                &format!("{}/{}/{}", Self::BASE_URL, attack_method, filename),
                root.join(&filename),
            )?;
        }
        Self::from_files(root, name, attack_method, ptb_rate)
    }

    /// Loads from files already present under `root`.
    pub fn from_files<P: AsRef<Path>>(
        root: P,
        name: DatasetName,
        attack_method: AttackMethod,
        ptb_rate: f64,
    ) -> Result<Self> {
        let root = root.as_ref();
        info!(
            "Loading {} dataset perturbed by {} {}...",
            name,
            format_rate(ptb_rate),
            attack_method
        );
        let adj = NpzReader::open(root.join(Self::adj_filename(name, attack_method, ptb_rate)))?.read_scipy_csr()?;
        if adj.n_rows != adj.n_cols {
            return Err(DatasetError::ShapeMismatch {
                expected: (adj.n_rows, adj.n_rows),
                found: adj.shape(),
            }
            .into());
        }

        let target_nodes = match attack_method {
            AttackMethod::Meta => {
                warn!(
                    "The pre-attacked graph is perturbed under the data splits provided by ProGNN. \
                     To verify the attacking performance, use the same data splits (setting=prognn)."
                );
                None
            }
            AttackMethod::Nettack => {
                let reader = BufReader::new(File::open(root.join(Self::target_nodes_filename(name)))?);
                let nodes: NettackedNodes = serde_json::from_reader(reader)?;
                Some(nodes.attacked_test_nodes)
            }
        };

        Ok(Self {
            name,
            attack_method,
            ptb_rate,
            adj,
            target_nodes,
        })
    }

    pub fn adj_filename(name: DatasetName, attack_method: AttackMethod, ptb_rate: f64) -> String {
        format!(
            "{}_{}_adj_{}.npz",
            name,
            attack_method,
            format_rate(ptb_rate)
        )
    }

    pub fn target_nodes_filename(name: DatasetName) -> String {
        format!("{}_nettacked_nodes.json", name)
    }
}
