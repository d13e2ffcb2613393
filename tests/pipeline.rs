use std::{fs::File, io::Write, path::Path};

use candle_sgc::cli::{run, Cli};
use candle_sgc::datasets::{
    AttackMethod, CsrMatrix, Dataset, DatasetError, DatasetName, PerturbedDataset, Setting, Split,
};
use clap::Parser;
use zip::write::FileOptions;

const COMMUNITY: usize = 30;
const NUM_NODES: usize = 2 * COMMUNITY + 1; // the last node is isolated
// big enough for the 20-per-class, 500 val, 1000 test gcn split to leave test nodes
const LARGE_COMMUNITY: usize = 300;
const NUM_FEATURES: usize = 4;

fn npy(descr: &str, shape: &[usize], payload: &[u8]) -> Vec<u8> {
    let shape = match shape {
        [] => "()".to_owned(),
        [n] => format!("({},)", n),
        _ => format!(
            "({})",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!("{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}", descr, shape);
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');
    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend((header.len() as u16).to_le_bytes());
    out.extend(header.as_bytes());
    out.extend(payload);
    out
}

fn f32s(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}
fn i32s(v: &[i32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}
fn i64s(v: &[i64]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn write_npz(path: &Path, entries: Vec<(String, Vec<u8>)>) {
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        zip.start_file(format!("{}.npy", name), FileOptions::default()).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// CSR arrays (data, indices, indptr) of an unweighted matrix.
fn csr(n: usize, entries: &[(usize, usize)]) -> (Vec<f32>, Vec<i32>, Vec<i32>) {
    let mut rows = vec![Vec::new(); n];
    for &(i, j) in entries {
        rows[i].push(j as i32);
    }
    let mut indptr = vec![0];
    let mut indices = Vec::new();
    for mut row in rows {
        row.sort_unstable();
        row.dedup();
        indices.extend(row);
        indptr.push(indices.len() as i32);
    }
    (vec![1.0; indices.len()], indices, indptr)
}

fn label(i: usize, community: usize) -> usize {
    if i < community || i == 2 * community {
        0
    } else {
        1
    }
}

/// Two ring-lattice communities with a few bridges, stored one direction
/// only, plus a self-loop and an isolated node.
fn clean_edges(community: usize) -> Vec<(usize, usize)> {
    let mut edges = Vec::new();
    for base in [0, community] {
        for i in 0..community {
            for d in 1..=3 {
                edges.push((base + i, base + (i + d) % community));
            }
        }
    }
    edges.extend([(0, community), (10, community + 15), (20, community + 25), (5, 5)]);
    edges
}

fn symmetric_lcc_edges() -> Vec<(usize, usize)> {
    clean_edges(COMMUNITY)
        .into_iter()
        .filter(|(i, j)| i != j)
        .flat_map(|(i, j)| [(i, j), (j, i)])
        .collect()
}

/// Adjacency, optional features and labels in the gnn-meta-attack layout.
fn write_graph_npz(
    path: &Path,
    n: usize,
    edges: &[(usize, usize)],
    features: Option<&[(usize, usize)]>,
    labels: &[i64],
) {
    let (data, indices, indptr) = csr(n, edges);
    let mut entries = vec![
        ("adj_data".to_owned(), npy("<f4", &[data.len()], &f32s(&data))),
        ("adj_indices".to_owned(), npy("<i4", &[indices.len()], &i32s(&indices))),
        ("adj_indptr".to_owned(), npy("<i4", &[indptr.len()], &i32s(&indptr))),
        ("adj_shape".to_owned(), npy("<i8", &[2], &i64s(&[n as i64; 2]))),
    ];
    if let Some(features) = features {
        let (attr_data, attr_indices, attr_indptr) = csr(n, features);
        entries.extend([
            ("attr_data".to_owned(), npy("<f4", &[attr_data.len()], &f32s(&attr_data))),
            ("attr_indices".to_owned(), npy("<i4", &[attr_indices.len()], &i32s(&attr_indices))),
            ("attr_indptr".to_owned(), npy("<i4", &[attr_indptr.len()], &i32s(&attr_indptr))),
            (
                "attr_shape".to_owned(),
                npy("<i8", &[2], &i64s(&[n as i64, NUM_FEATURES as i64])),
            ),
        ]);
    }
    entries.extend([
        ("labels".to_owned(), npy("<i8", &[labels.len()], &i64s(labels))),
        // pickled object arrays are never read
        ("node_names".to_owned(), npy("|O", &[1], &[0x80, 0x02, b'N', b'.'])),
    ]);
    write_npz(path, entries);
}

/// Two communities of `community` nodes plus one isolated node.
fn write_communities(root: &Path, name: DatasetName, community: usize, with_features: bool) {
    let n = 2 * community + 1;
    // the class feature, flipped for every fifth node, plus a parity feature
    let attr_entries: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| {
            let class = label(i, community);
            let class = if i % 5 == 0 { 1 - class } else { class };
            [(i, class), (i, 2 + i % 2)]
        })
        .collect();
    let labels: Vec<i64> = (0..n).map(|i| label(i, community) as i64).collect();
    write_graph_npz(
        &root.join(format!("{}.npz", name)),
        n,
        &clean_edges(community),
        with_features.then_some(attr_entries.as_slice()),
        &labels,
    );
}

fn write_clean(root: &Path) {
    write_communities(root, DatasetName::Cora, COMMUNITY, true);
}

fn write_perturbed(root: &Path, filename: &str, n: usize, extra: &[(usize, usize)]) {
    let mut edges = symmetric_lcc_edges();
    edges.extend(extra.iter().flat_map(|&(i, j)| [(i, j), (j, i)]));
    let (data, indices, indptr) = csr(n, &edges);
    write_npz(
        &root.join(filename),
        vec![
            ("indices".to_owned(), npy("<i4", &[indices.len()], &i32s(&indices))),
            ("indptr".to_owned(), npy("<i4", &[indptr.len()], &i32s(&indptr))),
            ("format".to_owned(), npy("|S3", &[], b"csr")),
            ("shape".to_owned(), npy("<i8", &[2], &i64s(&[n as i64; 2]))),
            ("data".to_owned(), npy("<f4", &[data.len()], &f32s(&data))),
        ],
    );
}

const ATTACK: [(usize, usize); 5] = [(1, 31), (2, 32), (3, 33), (4, 34), (6, 36)];

fn cli(root: &Path, args: &[&str]) -> Cli {
    let mut argv = vec!["test_sgc", "--cpu", "--root", root.to_str().unwrap()];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

#[test]
fn clean_graph_is_cleaned_up() {
    let dir = tempfile::tempdir().unwrap();
    write_clean(dir.path());
    let data = Dataset::from_npz(dir.path(), DatasetName::Cora, Setting::Nettack, 15).unwrap();

    // the isolated node is dropped with the largest connected component
    assert_eq!(data.num_nodes(), 2 * COMMUNITY);
    assert_eq!(data.labels.len(), 2 * COMMUNITY);
    assert_eq!(data.features.shape(), (2 * COMMUNITY, NUM_FEATURES));
    assert_eq!(data.num_classes(), 2);
    assert!(data.adj.is_symmetric());
    assert!(data.adj.values().iter().all(|&v| v == 1.0));
    assert!((0..data.num_nodes()).all(|i| data.adj.row(i).all(|(j, _)| j != i)));
    assert_eq!(data.adj.nnz(), symmetric_lcc_edges().len());

    let total = data.idx_train.len() + data.idx_val.len() + data.idx_test.len();
    assert_eq!(total, data.num_nodes());
    assert_eq!(data.idx_test.len(), 48);
}

#[test]
fn gcn_setting_keeps_every_node() {
    let dir = tempfile::tempdir().unwrap();
    write_communities(dir.path(), DatasetName::Cora, LARGE_COMMUNITY, true);
    let data = Dataset::from_npz(dir.path(), DatasetName::Cora, Setting::Gcn, 15).unwrap();

    let n = 2 * LARGE_COMMUNITY + 1;
    assert_eq!(data.num_nodes(), n);
    assert_eq!(data.labels.len(), n);
    assert_eq!(data.features.shape(), (n, NUM_FEATURES));
    // the isolated node stays, without edges
    assert_eq!(data.adj.row(n - 1).count(), 0);
    assert!(data.adj.row(5).all(|(j, _)| j != 5));

    let split = Split::gcn(&data.labels, 15).unwrap();
    assert_eq!(data.idx_train, split.train);
    assert_eq!(data.idx_val, split.val);
    assert_eq!(data.idx_test, split.test);
    assert_eq!(
        (data.idx_train.len(), data.idx_val.len(), data.idx_test.len()),
        (40, 500, n - 540)
    );
}

#[test]
fn missing_features_fall_back_to_identity() {
    let dir = tempfile::tempdir().unwrap();
    write_communities(dir.path(), DatasetName::Polblogs, LARGE_COMMUNITY, false);

    let data = Dataset::from_npz(dir.path(), DatasetName::Polblogs, Setting::Gcn, 15).unwrap();
    assert_eq!(data.features, CsrMatrix::identity(data.num_nodes()));
    assert_eq!(data.num_features(), data.num_nodes());

    // the identity is built before the largest component is taken, so the
    // dropped node keeps its column
    let data = Dataset::from_npz(dir.path(), DatasetName::Polblogs, Setting::Nettack, 15).unwrap();
    let n = 2 * LARGE_COMMUNITY;
    assert_eq!(data.features.shape(), (n, n + 1));
    assert!((0..n).all(|i| data.features.row(i).eq([(i, 1.0)])));
}

#[test]
fn edgeless_graph_has_singleton_nodes() {
    let dir = tempfile::tempdir().unwrap();
    write_graph_npz(&dir.path().join("cora.npz"), 3, &[], None, &[0, 1, 0]);
    let err = Dataset::from_npz(dir.path(), DatasetName::Cora, Setting::Nettack, 15).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::SingletonNodes)
    ));
}

#[test]
fn prognn_setting_reads_the_split_file() {
    let dir = tempfile::tempdir().unwrap();
    write_clean(dir.path());
    std::fs::write(
        dir.path().join("cora_prognn_splits.json"),
        r#"{"idx_train": [0, 1, 30, 31], "idx_val": [2, 32], "idx_test": [3, 4, 33, 34]}"#,
    )
    .unwrap();
    let data = Dataset::from_npz(dir.path(), DatasetName::Cora, Setting::Prognn, 15).unwrap();
    assert_eq!(data.idx_train, vec![0, 1, 30, 31]);
    assert_eq!(data.idx_val, vec![2, 32]);
}

#[test]
fn clean_then_perturbed_run_completes() {
    let dir = tempfile::tempdir().unwrap();
    write_clean(dir.path());
    write_perturbed(dir.path(), "cora_meta_adj_0.05.npz", 2 * COMMUNITY, &ATTACK);

    let summary = run(&cli(dir.path(), &[])).unwrap();
    assert_eq!(summary.changed_entries, 2 * ATTACK.len());
    assert!(summary.clean.accuracy > 0.8, "{:?}", summary.clean);
    assert!(summary.perturbed.loss.is_finite());
    assert!(summary.target_nodes.is_none());
}

#[test]
fn nettack_run_reports_target_nodes() {
    let dir = tempfile::tempdir().unwrap();
    write_clean(dir.path());
    write_perturbed(dir.path(), "cora_nettack_adj_1.0.npz", 2 * COMMUNITY, &ATTACK);
    std::fs::write(
        dir.path().join("cora_nettacked_nodes.json"),
        r#"{"attacked_test_nodes": [1, 2, 3, 4, 6]}"#,
    )
    .unwrap();

    let perturbed =
        PerturbedDataset::from_files(dir.path(), DatasetName::Cora, AttackMethod::Nettack, 1.0).unwrap();
    assert_eq!(perturbed.target_nodes.as_deref(), Some([1, 2, 3, 4, 6].as_slice()));

    let summary = run(&cli(dir.path(), &["--attack", "nettack", "--ptb_rate", "1.0"])).unwrap();
    assert!(summary.target_nodes.is_some());
}

#[test]
fn perturbed_graph_of_the_wrong_size_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    write_clean(dir.path());
    // perturbed on all nodes instead of the largest connected component
    write_perturbed(dir.path(), "cora_meta_adj_0.05.npz", NUM_NODES, &ATTACK);

    let err = run(&cli(dir.path(), &[])).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DatasetError>(),
        Some(DatasetError::ShapeMismatch { .. })
    ));
}
