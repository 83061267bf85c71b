//! Graph operations over edge records.
//!
//! An edge is any record with string `from` and `to` fields, an optional
//! `label` and an optional numeric `weight` (default 1).

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet, VecDeque};

use polystore_core::{
    Direction, GraphPath, PersistenceResult, ShortestPathResponse, TraversalResult, TraversedNode,
};
use serde_json::Value;

use crate::params::Params;
use crate::store::Table;

struct Edge {
    from: String,
    to: String,
    weight: f64,
}

fn edges(table: Option<&Table>, label: Option<&str>) -> Vec<Edge> {
    let Some(table) = table else {
        return Vec::new();
    };
    table
        .rows
        .values()
        .filter(|r| label.is_none_or(|l| r.data.get("label").and_then(Value::as_str) == Some(l)))
        .filter_map(|r| {
            Some(Edge {
                from: r.data.get("from")?.as_str()?.to_owned(),
                to: r.data.get("to")?.as_str()?.to_owned(),
                weight: r.data.get("weight").and_then(Value::as_f64).unwrap_or(1.0),
            })
        })
        .collect()
}

/// Adjacency in deterministic neighbour order.
fn adjacency(edges: &[Edge], direction: Direction) -> BTreeMap<&str, Vec<(&str, f64)>> {
    let mut adj: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for e in edges {
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            adj.entry(&e.from).or_default().push((&e.to, e.weight));
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            adj.entry(&e.to).or_default().push((&e.from, e.weight));
        }
    }
    for list in adj.values_mut() {
        list.sort_by(|a, b| a.0.cmp(b.0));
    }
    adj
}

pub(crate) fn traverse(table: Option<&Table>, params: &Params<'_>) -> PersistenceResult<Value> {
    let start = params.required_str("start")?;
    let max_depth = params.usize("max_depth").unwrap_or(3);
    let direction: Direction = params
        .get("direction")
        .map(|d| serde_json::from_value(d.clone()))
        .transpose()
        .map_err(|e| params.invalid(format!("bad direction: {e}")))?
        .unwrap_or_default();
    let edges = edges(table, params.str("edge_label"));
    let adj = adjacency(&edges, direction);

    let mut seen: HashSet<&str> = HashSet::from([start]);
    let mut queue = VecDeque::from([(start, 0_usize)]);
    let mut nodes = vec![TraversedNode {
        id: start.to_owned(),
        depth: 0,
        via: None,
    }];
    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for &(next, _) in adj.get(node).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(next) {
                let next_depth = depth.saturating_add(1);
                nodes.push(TraversedNode {
                    id: next.to_owned(),
                    depth: next_depth,
                    via: Some(node.to_owned()),
                });
                queue.push_back((next, next_depth));
            }
        }
    }

    serde_json::to_value(TraversalResult { nodes })
        .map_err(|e| params.invalid(format!("response encoding failed: {e}")))
}

#[derive(PartialEq)]
struct Frontier<'a> {
    cost: f64,
    hops: usize,
    node: &'a str,
}

impl Eq for Frontier<'_> {}

impl Ord for Frontier<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for a min-heap on cost.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.node.cmp(self.node))
    }
}

impl PartialOrd for Frontier<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) fn shortest_path(table: Option<&Table>, params: &Params<'_>) -> PersistenceResult<Value> {
    let from = params.required_str("from")?;
    let to = params.required_str("to")?;
    let max_depth = params.usize("max_depth");
    let edges = edges(table, params.str("edge_label"));
    if edges.iter().any(|e| e.weight < 0.0) {
        return Err(params.invalid("negative edge weight"));
    }
    let adj = adjacency(&edges, Direction::Outgoing);

    let mut best: HashMap<&str, f64> = HashMap::from([(from, 0.0)]);
    let mut prev: HashMap<&str, &str> = HashMap::new();
    let mut heap = BinaryHeap::from([Frontier {
        cost: 0.0,
        hops: 0,
        node: from,
    }]);
    let mut reached = None;
    while let Some(Frontier { cost, hops, node }) = heap.pop() {
        if node == to {
            reached = Some(cost);
            break;
        }
        if best.get(node).is_some_and(|&b| cost > b) {
            continue;
        }
        if max_depth.is_some_and(|m| hops >= m) {
            continue;
        }
        for &(next, weight) in adj.get(node).map(Vec::as_slice).unwrap_or_default() {
            let candidate = cost + weight;
            if best.get(next).is_none_or(|&b| candidate < b) {
                best.insert(next, candidate);
                prev.insert(next, node);
                heap.push(Frontier {
                    cost: candidate,
                    hops: hops.saturating_add(1),
                    node: next,
                });
            }
        }
    }

    let path = reached.map(|weight| {
        let mut nodes = vec![to.to_owned()];
        let mut cursor = to;
        while let Some(&p) = prev.get(cursor) {
            nodes.push(p.to_owned());
            cursor = p;
            if cursor == from {
                break;
            }
        }
        nodes.reverse();
        GraphPath { nodes, weight }
    });

    serde_json::to_value(ShortestPathResponse { path })
        .map_err(|e| params.invalid(format!("response encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::Record;
    use serde_json::json;

    fn graph() -> Table {
        let mut t = Table::default();
        for (id, from, to, w) in [
            ("e1", "a", "b", 1.0),
            ("e2", "b", "c", 1.0),
            ("e3", "a", "c", 5.0),
            ("e4", "c", "d", 1.0),
        ] {
            let rec = Record::from_value(
                json!({"id": id, "from": from, "to": to, "weight": w, "label": "knows"}),
            );
            t.rows.insert(rec.id.clone(), rec);
        }
        t
    }

    #[test]
    fn bfs_respects_depth() {
        let t = graph();
        let payload = json!({"start": "a", "max_depth": 1});
        let out = traverse(Some(&t), &Params::new("g", "graph_traversal", &payload)).unwrap();
        let result: TraversalResult = serde_json::from_value(out).unwrap();
        let ids: Vec<_> = result.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn incoming_direction() {
        let t = graph();
        let payload = json!({"start": "d", "max_depth": 1, "direction": "incoming"});
        let out = traverse(Some(&t), &Params::new("g", "graph_traversal", &payload)).unwrap();
        let result: TraversalResult = serde_json::from_value(out).unwrap();
        assert_eq!(result.nodes[1].id, "c");
        assert_eq!(result.nodes[1].via.as_deref(), Some("d"));
    }

    #[test]
    fn dijkstra_prefers_cheaper_longer_path() {
        let t = graph();
        let payload = json!({"from": "a", "to": "d"});
        let out = shortest_path(Some(&t), &Params::new("g", "shortest_path", &payload)).unwrap();
        let path = serde_json::from_value::<ShortestPathResponse>(out)
            .unwrap()
            .path
            .unwrap();
        assert_eq!(path.nodes, ["a", "b", "c", "d"]);
        assert!((path.weight - 3.0).abs() < 1e-9);
        assert_eq!(path.hops(), 3);
    }

    #[test]
    fn unreachable_is_none() {
        let t = graph();
        let payload = json!({"from": "d", "to": "a"});
        let out = shortest_path(Some(&t), &Params::new("g", "shortest_path", &payload)).unwrap();
        assert!(serde_json::from_value::<ShortestPathResponse>(out).unwrap().path.is_none());
    }
}
