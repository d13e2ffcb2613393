use std::{fs::File, io::BufReader, path::Path};

use anyhow::Result;
use itertools::Itertools;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Deserialize;

use super::DatasetError;

/// Train / validation / test node indices.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Split {
    #[serde(rename = "idx_train")]
    pub train: Vec<usize>,
    #[serde(rename = "idx_val")]
    pub val: Vec<usize>,
    #[serde(rename = "idx_test")]
    pub test: Vec<usize>,
}

impl Split {
    /// Stratified random split used by the nettack setting: 10% train,
    /// 10% validation and 80% test.
    pub fn nettack(labels: &[usize], seed: u64) -> Result<Self> {
        Self::stratified(labels, 0.1, 0.8, seed)
    }

    /// Stratified split with the given validation and test fractions; the
    /// remainder is used for training.
    ///
    /// The test set is held out first, then the rest is split again into
    /// train and validation, each step stratified by label.
    pub fn stratified(labels: &[usize], val_size: f64, test_size: f64, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let train_size = 1.0 - val_size - test_size;
        let nodes = (0..labels.len()).collect_vec();

        let (train_and_val, test) = stratified_holdout(&nodes, labels, test_size, &mut rng)?;
        let (train, val) = stratified_holdout(
            &train_and_val,
            labels,
            val_size / (train_size + val_size),
            &mut rng,
        )?;
        if train.is_empty() || val.is_empty() || test.is_empty() {
            return Err(DatasetError::SplitTooSmall(labels.len(), "stratified").into());
        }
        Ok(Self { train, val, test })
    }

    /// Split of the gcn setting: 20 training nodes per class, then 500
    /// validation and 1000 test nodes drawn from the rest.
    pub fn gcn(labels: &[usize], seed: u64) -> Result<Self> {
        const TRAIN_PER_CLASS: usize = 20;
        const NUM_VAL: usize = 500;
        const NUM_TEST: usize = 1000;

        let mut rng = StdRng::seed_from_u64(seed);
        let num_classes = labels.iter().max().map_or(0, |&c| c + 1);
        let mut train = Vec::new();
        let mut unlabeled = Vec::new();
        for class in 0..num_classes {
            let mut members = (0..labels.len()).filter(|&i| labels[i] == class).collect_vec();
            members.shuffle(&mut rng);
            let k = TRAIN_PER_CLASS.min(members.len());
            train.extend_from_slice(&members[..k]);
            unlabeled.extend_from_slice(&members[k..]);
        }
        unlabeled.shuffle(&mut rng);
        let val = unlabeled.iter().take(NUM_VAL).copied().collect_vec();
        let test = unlabeled.iter().skip(NUM_VAL).take(NUM_TEST).copied().collect_vec();
        if train.is_empty() || val.is_empty() || test.is_empty() {
            return Err(DatasetError::SplitTooSmall(labels.len(), "gcn").into());
        }
        Ok(Self { train, val, test })
    }

    /// Reads a split file in the `{name}_prognn_splits.json` format.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Checks that every index is below `num_nodes` and that the three sets
    /// are disjoint.
    pub fn validate(&self, num_nodes: usize) -> Result<()> {
        let mut seen = vec![false; num_nodes];
        for &i in self.train.iter().chain(&self.val).chain(&self.test) {
            if i >= num_nodes || seen[i] {
                return Err(DatasetError::InvalidSplit(i).into());
            }
            seen[i] = true;
        }
        Ok(())
    }
}

/// Moves `ceil(fraction * n)` of `nodes` into the second set, keeping label
/// proportions. Both halves are returned sorted.
///
/// Every class needs at least two members.
fn stratified_holdout(
    nodes: &[usize],
    labels: &[usize],
    fraction: f64,
    rng: &mut StdRng,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_holdout = ((fraction * nodes.len() as f64).ceil() as usize).min(nodes.len());

    let grouped = nodes
        .iter()
        .map(|&i| (labels[i], i))
        .into_group_map()
        .into_iter()
        .sorted_by_key(|(class, _)| *class)
        .collect_vec();
    if let Some((class, _)) = grouped.iter().find(|(_, members)| members.len() < 2) {
        return Err(DatasetError::ClassTooSmall(*class).into());
    }
    let mut classes = grouped.into_iter().map(|(_, members)| members).collect_vec();

    // largest remainder apportionment of the holdout over the classes
    let quotas = classes
        .iter()
        .map(|m| fraction * m.len() as f64)
        .collect_vec();
    let mut counts = quotas.iter().map(|q| q.floor() as usize).collect_vec();
    let missing = n_holdout.saturating_sub(counts.iter().sum());
    let bumped = (0..classes.len())
        .filter(|&c| counts[c] < classes[c].len())
        .sorted_by(|&a, &b| {
            let (ra, rb) = (quotas[a] - quotas[a].floor(), quotas[b] - quotas[b].floor());
            rb.total_cmp(&ra).then(a.cmp(&b))
        })
        .take(missing)
        .collect_vec();
    for c in bumped {
        counts[c] += 1;
    }

    let mut keep = Vec::new();
    let mut holdout = Vec::new();
    for (members, count) in classes.iter_mut().zip(counts) {
        members.sort_unstable();
        members.shuffle(rng);
        holdout.extend_from_slice(&members[..count]);
        keep.extend_from_slice(&members[count..]);
    }
    keep.sort_unstable();
    holdout.sort_unstable();
    Ok((keep, holdout))
}
