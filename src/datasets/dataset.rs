use std::{fmt, path::Path, str::FromStr};

use anyhow::Result;
use tracing::{debug, info};

use super::{fetch_if_missing, CsrMatrix, DatasetError, NpzReader, Split};

/// Citation and blog graphs shipped with the Zügner meta-attack data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum DatasetName {
    Cora,
    #[value(name = "cora_ml")]
    CoraMl,
    Citeseer,
    Polblogs,
    Pubmed,
}
impl DatasetName {
    pub const ALL: [DatasetName; 5] = [
        DatasetName::Cora,
        DatasetName::CoraMl,
        DatasetName::Citeseer,
        DatasetName::Polblogs,
        DatasetName::Pubmed,
    ];
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetName::Cora => "cora",
            DatasetName::CoraMl => "cora_ml",
            DatasetName::Citeseer => "citeseer",
            DatasetName::Polblogs => "polblogs",
            DatasetName::Pubmed => "pubmed",
        }
    }
    pub fn url(&self) -> String {
        match self {
            DatasetName::Pubmed => {
                "https://raw.githubusercontent.com/ChandlerBang/Pro-GNN/master/meta/pubmed.npz".to_owned()
            }
            _ => format!(
                "https://raw.githubusercontent.com/danielzuegner/gnn-meta-attack/master/data/{}.npz",
                self.as_str()
            ),
        }
    }
    pub fn splits_url(&self) -> String {
        format!(
            "https://raw.githubusercontent.com/ChandlerBang/Pro-GNN/master/splits/{}_prognn_splits.json",
            self.as_str()
        )
    }
}
impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl FromStr for DatasetName {
    type Err = DatasetError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or(DatasetError::UnknownDataset(s))
    }
}

/// How the graph is preprocessed and split.
///
/// `Nettack` and `Prognn` keep only the largest connected component;
/// `Gcn` keeps every node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Setting {
    #[default]
    Nettack,
    Gcn,
    Prognn,
}
impl Setting {
    pub fn require_lcc(&self) -> bool {
        !matches!(self, Setting::Gcn)
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: DatasetName,
    pub setting: Setting,
    pub adj: CsrMatrix,
    pub features: CsrMatrix,
    pub labels: Vec<usize>,
    pub idx_train: Vec<usize>,
    pub idx_val: Vec<usize>,
    pub idx_test: Vec<usize>,
}

impl Dataset {
    /// Loads `name` from `root`, downloading the archive (and the prognn
    /// split file when needed) on first use.
    pub fn load<P: AsRef<Path>>(root: P, name: DatasetName, setting: Setting, seed: u64) -> Result<Self> {
        let root = root.as_ref();
        let path = root.join(format!("{}.npz", name));
        fetch_if_missing(&name.url(), &path)?;
        if setting == Setting::Prognn {
            fetch_if_missing(&name.splits_url(), Self::splits_path(root, name))?;
        }
        Self::from_npz(root, name, setting, seed)
    }

    /// Loads from files already present under `root`.
    pub fn from_npz<P: AsRef<Path>>(root: P, name: DatasetName, setting: Setting, seed: u64) -> Result<Self> {
        let root = root.as_ref();
        info!("Loading {} dataset...", name);
        let (adj, features, labels) = read_graph(root.join(format!("{}.npz", name)), setting.require_lcc())?;

        let split = match setting {
            Setting::Nettack => Split::nettack(&labels, seed)?,
            Setting::Gcn => Split::gcn(&labels, seed)?,
            Setting::Prognn => Split::from_json(Self::splits_path(root, name))?,
        };
        split.validate(labels.len())?;
        debug!(
            train = split.train.len(),
            val = split.val.len(),
            test = split.test.len(),
            "split nodes"
        );

        Ok(Self {
            name,
            setting,
            adj,
            features,
            labels,
            idx_train: split.train,
            idx_val: split.val,
            idx_test: split.test,
        })
    }

    fn splits_path(root: &Path, name: DatasetName) -> std::path::PathBuf {
        root.join(format!("{}_prognn_splits.json", name))
    }

    pub fn num_nodes(&self) -> usize {
        self.adj.n_rows
    }
    pub fn num_features(&self) -> usize {
        self.features.n_cols
    }
    pub fn num_classes(&self) -> usize {
        self.labels.iter().max().map_or(0, |&c| c + 1)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (setting={:?}): {} nodes, {} edges, {} features, {} classes",
            self.name,
            self.setting,
            self.num_nodes(),
            self.adj.nnz() / 2,
            self.num_features(),
            self.num_classes()
        )
    }
}

/// Reads adjacency, features and labels, then symmetrises the graph,
/// optionally restricts it to its largest connected component and
/// removes self-loops.
fn read_graph<P: AsRef<Path>>(path: P, require_lcc: bool) -> Result<(CsrMatrix, CsrMatrix, Vec<usize>)> {
    let mut npz = NpzReader::open(path)?;
    let adj = npz.read_csr("adj")?;
    if adj.n_rows != adj.n_cols {
        return Err(DatasetError::ShapeMismatch {
            expected: (adj.n_rows, adj.n_rows),
            found: adj.shape(),
        }
        .into());
    }
    let mut features = if npz.contains("attr_data") {
        npz.read_csr("attr")?
    } else {
        CsrMatrix::identity(adj.n_rows)
    };
    let mut labels = npz.read("labels")?.to_usize_vec("labels")?;
    if features.n_rows != adj.n_rows || labels.len() != adj.n_rows {
        return Err(DatasetError::ShapeMismatch {
            expected: (adj.n_rows, features.n_cols),
            found: (features.n_rows.min(labels.len()), features.n_cols),
        }
        .into());
    }

    let mut adj = adj.add(&adj.transpose())?;
    adj.binarize();

    if require_lcc {
        let lcc = adj.largest_connected_component();
        adj = adj.select(&lcc);
        features = select_rows(&features, &lcc);
        labels = lcc.iter().map(|&i| labels[i]).collect();
        if adj.col_sums().iter().any(|&s| s <= 0.0) {
            return Err(DatasetError::SingletonNodes.into());
        }
    }

    adj.set_diag_zero();
    adj.eliminate_zeros();

    if !adj.is_symmetric() {
        return Err(DatasetError::NotSymmetric.into());
    }
    if adj.values().iter().any(|&v| v != 1.0) {
        return Err(DatasetError::Weighted.into());
    }
    Ok((adj, features, labels))
}

fn select_rows(m: &CsrMatrix, rows: &[usize]) -> CsrMatrix {
    let triplets: Vec<_> = rows
        .iter()
        .enumerate()
        .flat_map(|(new_i, &i)| m.row(i).map(move |(j, v)| (new_i, j, v)))
        .collect();
    CsrMatrix::from_triplets(rows.len(), m.n_cols, &triplets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_strings() {
        for name in DatasetName::ALL {
            assert_eq!(name.to_string().parse::<DatasetName>().unwrap(), name);
        }
        assert_eq!("CORA_ML".parse::<DatasetName>().unwrap(), DatasetName::CoraMl);
        assert!("reddit".parse::<DatasetName>().is_err());
    }

    #[test]
    fn urls_point_at_the_meta_attack_data() {
        assert_eq!(
            DatasetName::Cora.url(),
            "https://raw.githubusercontent.com/danielzuegner/gnn-meta-attack/master/data/cora.npz"
        );
        assert!(DatasetName::Pubmed.url().contains("Pro-GNN"));
    }

    #[test]
    fn only_gcn_keeps_every_node() {
        assert!(Setting::Nettack.require_lcc());
        assert!(Setting::Prognn.require_lcc());
        assert!(!Setting::Gcn.require_lcc());
    }

    #[test]
    fn select_rows_keeps_columns() {
        let m = CsrMatrix::from_triplets(3, 4, &[(0, 3, 1.0), (2, 1, 2.0)]);
        let s = select_rows(&m, &[2, 0]);
        assert_eq!(s.shape(), (2, 4));
        assert_eq!(s.to_dense(), vec![0.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }
}
