//! Similarity graph and duplicate grouping.
//!
//! Nodes are fingerprinted files, edges join pairs whose estimated similarity
//! reaches the threshold. Groups are the connected components with two or more
//! members. Edge weights are computed once in `build`; removing files or
//! dissolving a group only deletes nodes and edges, it never re-estimates.

use log::{debug, info, warn};
use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use crate::error::{Error, Result};
use crate::fingerprint::MinHashParams;
use crate::types::{FileId, FileRecord};

/// A connected component of two or more similar files
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// Position in the current ordering, starting at 1
    pub id: usize,

    /// Members in discovery order
    pub members: Vec<FileRecord>,

    /// Pair similarity for two members, mean edge weight for larger groups
    pub similarity: f64,

    /// Number of edges inside the group
    pub edge_count: usize,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> Vec<FileId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn member(&self, id: FileId) -> Option<&FileRecord> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Similarity as a percentage rounded to one decimal, for display only
    pub fn similarity_percent(&self) -> f64 {
        (self.similarity * 1000.0).round() / 10.0
    }

    fn lowest_path(&self) -> Option<&Path> {
        self.members.iter().map(|m| m.path.as_path()).min()
    }
}

/// One stored edge inside a group
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PairSimilarity {
    pub first: FileId,
    pub second: FileId,
    pub similarity: f64,
}

#[derive(Debug, Clone)]
pub struct SimilarityGraph {
    graph: StableUnGraph<FileId, f64>,
    nodes: HashMap<FileId, NodeIndex>,
    records: HashMap<FileId, FileRecord>,
    threshold: f64,
    params: Option<MinHashParams>,
}

impl SimilarityGraph {
    /// Build the graph from fingerprinted records.
    ///
    /// Records without a signature are skipped. All signatures must share the
    /// same parameters.
    pub fn build(records: Vec<FileRecord>, threshold: f64) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Configuration(format!(
                "Threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        let mut signed = Vec::with_capacity(records.len());
        for record in records {
            if record.has_signature() {
                signed.push(record);
            } else {
                warn!(
                    "Skipping {} for grouping: no signature attached",
                    record.path.display()
                );
            }
        }

        let params = signed
            .first()
            .and_then(|r| r.signature())
            .map(|s| s.params());
        if let Some(params) = params {
            if let Some(other) = signed
                .iter()
                .filter_map(|r| r.signature())
                .find(|s| s.params() != params)
            {
                return Err(Error::Configuration(format!(
                    "signatures built with mixed parameters: {:?} and {:?}",
                    params,
                    other.params()
                )));
            }
        }

        let edges = estimate_pairs(&signed, threshold)?;

        let mut graph = StableUnGraph::with_capacity(signed.len(), edges.len());
        let mut nodes = HashMap::with_capacity(signed.len());
        let mut indices = Vec::with_capacity(signed.len());
        for record in &signed {
            let index = graph.add_node(record.id);
            nodes.insert(record.id, index);
            indices.push(index);
        }
        for &(i, j, similarity) in &edges {
            graph.add_edge(indices[i], indices[j], similarity);
        }

        info!(
            "Built similarity graph: {} files, {} edges at threshold {}",
            signed.len(),
            edges.len(),
            threshold
        );

        let records = signed.into_iter().map(|r| (r.id, r)).collect();
        Ok(Self {
            graph,
            nodes,
            records,
            threshold,
            params,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn params(&self) -> Option<MinHashParams> {
        self.params
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: FileId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn record(&self, id: FileId) -> Option<&FileRecord> {
        self.records.get(&id)
    }

    /// Stored similarity of an edge, if the two files are linked
    pub fn similarity(&self, a: FileId, b: FileId) -> Option<f64> {
        let (&ia, &ib) = (self.nodes.get(&a)?, self.nodes.get(&b)?);
        let edge = self.graph.find_edge(ia, ib)?;
        self.graph.edge_weight(edge).copied()
    }

    /// Every current group, ordered and numbered from 1
    pub fn groups(&self) -> Vec<DuplicateGroup> {
        let mut seen = HashSet::new();
        let mut groups = Vec::new();

        let mut starts: Vec<FileId> = self.nodes.keys().copied().collect();
        starts.sort();
        for id in starts {
            if seen.contains(&id) {
                continue;
            }
            let component = self.component(id, &mut seen);
            if let Some(group) = self.materialize(component) {
                groups.push(group);
            }
        }

        order(groups)
    }

    /// Delete nodes and their edges. Unknown ids are ignored.
    pub fn remove(&mut self, ids: &[FileId]) -> usize {
        let mut removed = 0;
        for id in ids {
            if let Some(index) = self.nodes.remove(id) {
                self.graph.remove_node(index);
                self.records.remove(id);
                removed += 1;
            }
        }
        debug!("Removed {} of {} requested nodes", removed, ids.len());
        removed
    }

    /// Remove `removed` from the graph and regroup only the groups that contained them.
    ///
    /// The result is identical to calling `groups()` on the reduced graph.
    pub fn update_groups(
        &mut self,
        current: &[DuplicateGroup],
        removed: &[FileId],
    ) -> Vec<DuplicateGroup> {
        self.remove(removed);
        let removed: HashSet<FileId> = removed.iter().copied().collect();

        let mut groups = Vec::with_capacity(current.len());
        let mut seen = HashSet::new();
        for group in current {
            if !group.members.iter().any(|m| removed.contains(&m.id)) {
                groups.push(group.clone());
                continue;
            }

            for member in &group.members {
                if seen.contains(&member.id) || !self.contains(member.id) {
                    continue;
                }
                let component = self.component(member.id, &mut seen);
                if let Some(regrouped) = self.materialize(component) {
                    groups.push(regrouped);
                }
            }
        }

        order(groups)
    }

    /// Stored edge weights among the group's members
    pub fn pair_similarities(&self, group: &DuplicateGroup) -> Vec<PairSimilarity> {
        let members: BTreeSet<FileId> = group.ids().into_iter().collect();
        let mut pairs = Vec::new();

        for &id in &members {
            let Some(&index) = self.nodes.get(&id) else {
                continue;
            };
            for edge in self.graph.edges(index) {
                let other = self.other_end(index, &edge);
                if other > id && members.contains(&other) {
                    pairs.push(PairSimilarity {
                        first: id,
                        second: other,
                        similarity: *edge.weight(),
                    });
                }
            }
        }

        pairs.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then(a.first.cmp(&b.first))
                .then(a.second.cmp(&b.second))
        });
        pairs
    }

    /// Drop the edges among a group's members so it is not offered again.
    ///
    /// Returns the number of edges removed.
    pub fn dissolve(&mut self, group: &DuplicateGroup) -> usize {
        let members: HashSet<FileId> = group.ids().into_iter().collect();
        let mut doomed = Vec::new();

        for id in &members {
            let Some(&index) = self.nodes.get(id) else {
                continue;
            };
            for edge in self.graph.edges(index) {
                let other = self.other_end(index, &edge);
                if members.contains(&other) {
                    doomed.push(edge.id());
                }
            }
        }
        doomed.sort();
        doomed.dedup();

        for edge in &doomed {
            self.graph.remove_edge(*edge);
        }
        debug!("Dissolved group {}: {} edges removed", group.id, doomed.len());
        doomed.len()
    }

    fn other_end<E: EdgeRef<NodeId = NodeIndex>>(&self, index: NodeIndex, edge: &E) -> FileId {
        let other = if edge.source() == index {
            edge.target()
        } else {
            edge.source()
        };
        self.graph[other]
    }

    fn component(&self, start: FileId, seen: &mut HashSet<FileId>) -> Vec<FileId> {
        let mut component = Vec::new();
        let Some(&start_index) = self.nodes.get(&start) else {
            return component;
        };

        let mut queue = VecDeque::from([start_index]);
        seen.insert(start);
        while let Some(index) = queue.pop_front() {
            component.push(self.graph[index]);
            for neighbor in self.graph.neighbors(index) {
                if seen.insert(self.graph[neighbor]) {
                    queue.push_back(neighbor);
                }
            }
        }
        component
    }

    fn materialize(&self, mut component: Vec<FileId>) -> Option<DuplicateGroup> {
        if component.len() < 2 {
            return None;
        }
        component.sort();

        let members: Vec<FileRecord> = component
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();

        let mut group = DuplicateGroup {
            id: 0,
            members,
            similarity: 0.0,
            edge_count: 0,
        };
        let pairs = self.pair_similarities(&group);
        group.edge_count = pairs.len();
        group.similarity = if pairs.is_empty() {
            0.0
        } else {
            pairs.iter().map(|p| p.similarity).sum::<f64>() / pairs.len() as f64
        };
        Some(group)
    }
}

/// Sort by score descending, then by lowest member path; renumber from 1
fn order(mut groups: Vec<DuplicateGroup>) -> Vec<DuplicateGroup> {
    groups.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.lowest_path().cmp(&b.lowest_path()))
    });
    for (i, group) in groups.iter_mut().enumerate() {
        group.id = i + 1;
    }
    groups
}

/// All pairs `(i, j, similarity)` with `i < j` at or above the threshold
fn estimate_pairs(records: &[FileRecord], threshold: f64) -> Result<Vec<(usize, usize, f64)>> {
    let signatures: Vec<_> = records.iter().filter_map(|r| r.signature()).collect();

    let rows: Vec<Vec<(usize, usize, f64)>> = (0..signatures.len())
        .into_par_iter()
        .map(|i| -> Result<Vec<(usize, usize, f64)>> {
            let mut row = Vec::new();
            for j in (i + 1)..signatures.len() {
                let similarity = signatures[i].similarity(signatures[j])?;
                if similarity >= threshold {
                    row.push((i, j, similarity));
                }
            }
            Ok(row)
        })
        .collect::<Result<_>>()?;

    Ok(rows.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Signature;
    use std::time::SystemTime;

    const PERM: usize = 10;

    fn params() -> MinHashParams {
        MinHashParams {
            num_perm: PERM,
            shingle_size: 5,
        }
    }

    fn record(id: u64, name: &str, values: Vec<u64>) -> FileRecord {
        let path = format!("/data/{}", name);
        FileRecord::new(FileId(id), &path, &path, 1, SystemTime::UNIX_EPOCH)
            .with_signature(Signature::from_values(values, params()).unwrap())
            .unwrap()
    }

    /// Base vector unique to `seed`, with `changed` leading positions replaced
    fn variant(seed: u64, changed: usize, tag: u64) -> Vec<u64> {
        (0..PERM as u64)
            .map(|i| {
                if (i as usize) < changed {
                    1_000_000 + tag * 100 + i
                } else {
                    seed * 1000 + i
                }
            })
            .collect()
    }

    /// A~B 0.9, B~C 0.9, A~C 0.8
    fn chain() -> Vec<FileRecord> {
        let a = variant(1, 0, 0);
        let mut b = a.clone();
        b[0] = 500;
        let mut c = b.clone();
        c[1] = 501;
        vec![record(0, "a.txt", a), record(1, "b.txt", b), record(2, "c.txt", c)]
    }

    fn summary(groups: &[DuplicateGroup]) -> Vec<(usize, Vec<FileId>, f64)> {
        groups
            .iter()
            .map(|g| (g.id, g.ids(), g.similarity))
            .collect()
    }

    fn mixed() -> Vec<FileRecord> {
        vec![
            record(0, "p1.txt", variant(1, 0, 0)),
            record(1, "p2.txt", variant(1, 1, 1)),
            record(2, "q1.txt", variant(2, 0, 0)),
            record(3, "q2.txt", variant(2, 0, 0)),
            record(4, "q3.txt", variant(2, 1, 2)),
            record(5, "lonely.txt", variant(3, 0, 0)),
            record(6, "r1.txt", variant(4, 1, 3)),
            record(7, "r2.txt", variant(4, 1, 4)),
        ]
    }

    #[test]
    fn test_transitive_group() {
        let graph = SimilarityGraph::build(chain(), 0.85).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.similarity(FileId(0), FileId(2)), None);

        let groups = graph.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ids(), vec![FileId(0), FileId(1), FileId(2)]);
        assert_eq!(groups[0].edge_count, 2);
        assert!((groups[0].similarity - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_singletons_dropped_and_ordering() {
        let graph = SimilarityGraph::build(mixed(), 0.85).unwrap();
        let groups = graph.groups();

        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(|g| !g.contains(FileId(5))));

        // q-group: 1.0, 0.9, 0.9 → mean 0.933; p-group 0.9; r-group 0.9
        assert_eq!(groups[0].ids(), vec![FileId(2), FileId(3), FileId(4)]);
        assert_eq!(groups[1].ids(), vec![FileId(0), FileId(1)]);
        assert_eq!(groups[2].ids(), vec![FileId(6), FileId(7)]);
        assert_eq!(
            groups.iter().map(|g| g.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_ordering_is_deterministic() {
        let first = summary(&SimilarityGraph::build(mixed(), 0.85).unwrap().groups());
        let mut reversed = mixed();
        reversed.reverse();
        let second = summary(&SimilarityGraph::build(reversed, 0.85).unwrap().groups());
        assert_eq!(first, second);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let thresholds = [0.5, 0.8, 0.85, 0.9, 0.95, 1.0];
        let membership = |t: f64| -> Vec<BTreeSet<FileId>> {
            SimilarityGraph::build(mixed(), t)
                .unwrap()
                .groups()
                .iter()
                .map(|g| g.ids().into_iter().collect())
                .collect()
        };

        for pair in thresholds.windows(2) {
            let (low, high) = (membership(pair[0]), membership(pair[1]));
            for group in &high {
                assert!(
                    low.iter().any(|g| group.is_subset(g)),
                    "group {:?} at {} not contained at {}",
                    group,
                    pair[1],
                    pair[0]
                );
            }
        }
    }

    #[test]
    fn test_update_groups_matches_recompute() {
        let removal_sets: Vec<Vec<FileId>> = vec![
            vec![FileId(1)],
            vec![FileId(3)],
            vec![FileId(2), FileId(6)],
            vec![FileId(5)],
            vec![FileId(0), FileId(1), FileId(7)],
            vec![],
        ];

        for removed in removal_sets {
            let mut graph = SimilarityGraph::build(mixed(), 0.85).unwrap();
            let current = graph.groups();
            let incremental = graph.update_groups(&current, &removed);
            let fresh = graph.groups();
            assert_eq!(summary(&incremental), summary(&fresh), "removed {:?}", removed);
        }
    }

    #[test]
    fn test_removing_bridge_splits_group() {
        let mut graph = SimilarityGraph::build(chain(), 0.85).unwrap();
        let current = graph.groups();
        let updated = graph.update_groups(&current, &[FileId(1)]);
        assert!(updated.is_empty());
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_pair_similarities() {
        let graph = SimilarityGraph::build(chain(), 0.85).unwrap();
        let group = &graph.groups()[0];
        let pairs = graph.pair_similarities(group);

        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.first < p.second));
        assert!(pairs.iter().all(|p| (p.similarity - 0.9).abs() < 1e-9));
    }

    #[test]
    fn test_dissolve() {
        let mut graph = SimilarityGraph::build(mixed(), 0.85).unwrap();
        let groups = graph.groups();
        let q_group = groups[0].clone();

        assert_eq!(graph.dissolve(&q_group), 3);
        let after = graph.groups();
        assert_eq!(after.len(), 2);
        assert!(after.iter().all(|g| !g.contains(FileId(2))));
        assert!(graph.contains(FileId(2)));
    }

    #[test]
    fn test_identical_signatures() {
        let records = vec![
            record(0, "x.txt", variant(9, 0, 0)),
            record(1, "y.txt", variant(9, 0, 0)),
        ];
        let groups = SimilarityGraph::build(records, 0.85).unwrap().groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].similarity, 1.0);
        assert_eq!(groups[0].similarity_percent(), 100.0);
    }

    #[test]
    fn test_unsigned_records_skipped() {
        let mut records = chain();
        records.push(FileRecord::new(
            FileId(9),
            "/data/raw.txt",
            "/data/raw.txt",
            1,
            SystemTime::UNIX_EPOCH,
        ));
        let graph = SimilarityGraph::build(records, 0.85).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert!(!graph.contains(FileId(9)));
    }

    #[test]
    fn test_mixed_params_rejected() {
        let mut records = chain();
        let other = MinHashParams {
            num_perm: PERM,
            shingle_size: 3,
        };
        records.push(
            FileRecord::new(FileId(9), "/data/z.txt", "/data/z.txt", 1, SystemTime::UNIX_EPOCH)
                .with_signature(Signature::from_values(variant(1, 0, 0), other).unwrap())
                .unwrap(),
        );
        assert!(matches!(
            SimilarityGraph::build(records, 0.85),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(SimilarityGraph::build(chain(), 0.0).is_err());
        assert!(SimilarityGraph::build(chain(), 1.5).is_err());
    }
}
