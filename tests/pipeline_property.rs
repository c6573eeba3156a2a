//! Property tests over randomly generated DAGs.

use flowline::graph::GraphModel;
use flowline::pipeline::{Edge, NodeSpec, Pipeline};
use proptest::prelude::*;
use rustc_hash::FxHashSet;

/// Build a pipeline from `node_count` nodes and edges `(i, j)` with
/// `i < j`, which makes any edge set acyclic by construction.
fn pipeline_from(node_count: usize, edges: &[(usize, usize)]) -> Pipeline {
    let mut pipeline = Pipeline::new("generated");
    for i in 0..node_count {
        pipeline = pipeline.add_node(NodeSpec::new(format!("n{i}"), "alg"));
    }
    for (from, to) in edges {
        pipeline = pipeline.add_edge(Edge::new(format!("n{from}"), format!("n{to}")));
    }
    pipeline
}

/// A random DAG: node count plus a subset of the forward edges.
fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..8).prop_flat_map(|node_count| {
        let pairs: Vec<(usize, usize)> = (0..node_count)
            .flat_map(|i| ((i + 1)..node_count).map(move |j| (i, j)))
            .collect();
        let len = pairs.len();
        (
            Just(node_count),
            proptest::sample::subsequence(pairs, 0..=len),
        )
    })
}

proptest! {
    #[test]
    fn forward_edge_dags_always_validate((node_count, edges) in dag_strategy()) {
        let pipeline = pipeline_from(node_count, &edges);
        prop_assert!(pipeline.validate().is_ok());
    }

    #[test]
    fn entry_nodes_are_exactly_the_parentless_set((node_count, edges) in dag_strategy()) {
        let pipeline = pipeline_from(node_count, &edges);
        let graph = GraphModel::new(&pipeline).unwrap();

        let with_parents: FxHashSet<String> =
            edges.iter().map(|(_, j)| format!("n{j}")).collect();
        let expected: Vec<String> = (0..node_count)
            .map(|i| format!("n{i}"))
            .filter(|name| !with_parents.contains(name))
            .collect();

        prop_assert_eq!(graph.entry_nodes(), expected);
    }
}
