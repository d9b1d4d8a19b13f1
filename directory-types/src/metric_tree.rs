//! Recover structure from flat metric names.
//!
//! Sparkplug metrics are a flat list, but cooperating publishers name them as
//! `/` delimited paths. [MetricTree] rebuilds the hierarchy so that
//! sub-objects (instances) can be found by looking for branches that carry
//! both a `Schema_UUID` and an `Instance_UUID` leaf.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::{
    constants::metrics::{INSTANCE_UUID, SCHEMA_UUID},
    payload::{Metric, Payload},
};

#[derive(Clone, Debug, PartialEq)]
pub enum MetricNode {
    Leaf(Metric),
    Branch(MetricBranch),
}

impl MetricNode {
    /// The metric this node stands for, if any.
    ///
    /// A branch has a metric of its own when a published metric name was
    /// also used as a path prefix by other metrics.
    pub fn metric(&self) -> Option<&Metric> {
        match self {
            MetricNode::Leaf(metric) => Some(metric),
            MetricNode::Branch(branch) => branch.metric.as_ref(),
        }
    }

    pub fn as_branch(&self) -> Option<&MetricBranch> {
        match self {
            MetricNode::Leaf(_) => None,
            MetricNode::Branch(branch) => Some(branch),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricBranch {
    pub children: BTreeMap<String, MetricNode>,
    pub metric: Option<Metric>,
}

/// The root of a reconstructed metric hierarchy
pub type MetricTree = MetricBranch;

/// A branch marked with `Schema_UUID` and `Instance_UUID`.
#[derive(Debug, Clone, Copy)]
pub struct Instance<'a> {
    pub schema: Uuid,
    pub uuid: Uuid,
    /// The nearest enclosing instance, if there is one.
    pub parent: Option<Uuid>,
    pub branch: &'a MetricBranch,
}

impl MetricBranch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_payload(payload: &Payload) -> Self {
        Self::from_metrics(payload.metrics.iter().cloned())
    }

    pub fn from_metrics<I: IntoIterator<Item = Metric>>(metrics: I) -> Self {
        let mut tree = Self::new();
        for metric in metrics {
            tree.insert(metric);
        }
        tree
    }

    /// Insert a metric at the position its name describes. Unnamed metrics are skipped.
    pub fn insert(&mut self, metric: Metric) {
        let Some(name) = metric.name.clone() else {
            return;
        };
        let mut path: Vec<&str> = name.split('/').collect();
        let Some(last) = path.pop() else {
            return;
        };

        let mut branch = self;
        for segment in path {
            let node = branch
                .children
                .entry(segment.to_string())
                .or_insert_with(|| MetricNode::Branch(MetricBranch::new()));

            if let MetricNode::Leaf(leaf) = node {
                let leaf = leaf.clone();
                *node = MetricNode::Branch(MetricBranch {
                    children: BTreeMap::new(),
                    metric: Some(leaf),
                });
            }
            let MetricNode::Branch(next) = node else {
                return;
            };
            branch = next;
        }

        match branch.children.get_mut(last) {
            Some(MetricNode::Branch(existing)) => existing.metric = Some(metric),
            _ => {
                branch
                    .children
                    .insert(last.to_string(), MetricNode::Leaf(metric));
            }
        }
    }

    /// Look up a node by a `/` delimited path relative to this branch
    pub fn get(&self, path: &str) -> Option<&MetricNode> {
        let mut segments = path.split('/');
        let first = segments.next()?;
        let mut node = self.children.get(first)?;
        for segment in segments {
            node = node.as_branch()?.children.get(segment)?;
        }
        Some(node)
    }

    /// The metric at `path`, whether it is a leaf or a branch's own metric
    pub fn leaf(&self, path: &str) -> Option<&Metric> {
        self.get(path)?.metric()
    }

    pub fn branch(&self, path: &str) -> Option<&MetricBranch> {
        self.get(path)?.as_branch()
    }

    pub fn string(&self, path: &str) -> Option<&str> {
        self.leaf(path)?.as_str()
    }

    /// A string valued metric parsed as a UUID. Unparseable values read as absent.
    pub fn uuid(&self, path: &str) -> Option<Uuid> {
        Uuid::parse_str(self.string(path)?).ok()
    }

    /// This branch's schema and instance UUIDs, if it is an instance.
    pub fn instance_marker(&self) -> Option<(Uuid, Uuid)> {
        Some((self.uuid(SCHEMA_UUID)?, self.uuid(INSTANCE_UUID)?))
    }

    /// Every instance in the tree, depth first, including this branch itself.
    pub fn instances(&self) -> Vec<Instance<'_>> {
        let mut found = Vec::new();
        self.collect_instances(None, &mut found);
        found
    }

    fn collect_instances<'a>(&'a self, parent: Option<Uuid>, found: &mut Vec<Instance<'a>>) {
        let mut parent = parent;
        if let Some((schema, uuid)) = self.instance_marker() {
            found.push(Instance {
                schema,
                uuid,
                parent,
                branch: self,
            });
            parent = Some(uuid);
        }
        for child in self.children.values() {
            if let MetricNode::Branch(branch) = child {
                branch.collect_instances(parent, found);
            }
        }
    }

    /// Every `Schema_UUID` value anywhere in the tree
    pub fn schemas(&self) -> BTreeSet<Uuid> {
        let mut schemas = BTreeSet::new();
        self.collect_schemas(&mut schemas);
        schemas
    }

    fn collect_schemas(&self, schemas: &mut BTreeSet<Uuid>) {
        if let Some(schema) = self.uuid(SCHEMA_UUID) {
            schemas.insert(schema);
        }
        for child in self.children.values() {
            if let MetricNode::Branch(branch) = child {
                branch.collect_schemas(schemas);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::DataType;

    fn string(name: &str, value: &str) -> Metric {
        Metric::with_value(name, DataType::String, value)
    }

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn builds_nested_branches() {
        let tree = MetricTree::from_metrics(vec![
            string("A/B/C", "c"),
            string("A/D", "d"),
            string("E", "e"),
        ]);
        assert_eq!(tree.string("A/B/C"), Some("c"));
        assert_eq!(tree.string("A/D"), Some("d"));
        assert_eq!(tree.string("E"), Some("e"));
        assert!(tree.branch("A/B").is_some());
        assert!(tree.leaf("A/B").is_none());
        assert!(tree.get("A/X").is_none());
        assert!(tree.get("E/F").is_none());
    }

    #[test]
    fn path_through_leaf_keeps_leaf_as_branch_metric() {
        let tree = MetricTree::from_metrics(vec![string("A", "self"), string("A/B", "child")]);
        assert_eq!(tree.string("A"), Some("self"));
        assert_eq!(tree.string("A/B"), Some("child"));

        let tree = MetricTree::from_metrics(vec![string("A/B", "child"), string("A", "self")]);
        assert_eq!(tree.string("A"), Some("self"));
        assert_eq!(tree.string("A/B"), Some("child"));
    }

    #[test]
    fn unnamed_metrics_are_skipped() {
        let mut unnamed = Metric::new();
        unnamed.set_alias(3);
        let tree = MetricTree::from_metrics(vec![unnamed]);
        assert!(tree.children.is_empty());
    }

    #[test]
    fn uuid_accessor_ignores_bad_values() {
        let tree = MetricTree::from_metrics(vec![
            string("Good", &uuid(7).to_string()),
            string("Bad", "not-a-uuid"),
        ]);
        assert_eq!(tree.uuid("Good"), Some(uuid(7)));
        assert_eq!(tree.uuid("Bad"), None);
    }

    #[test]
    fn instances_report_nearest_enclosing_parent() {
        let tree = MetricTree::from_metrics(vec![
            string("Schema_UUID", &uuid(1).to_string()),
            string("Instance_UUID", &uuid(100).to_string()),
            string("Alerts/Offline/Schema_UUID", &uuid(2).to_string()),
            string("Alerts/Offline/Instance_UUID", &uuid(200).to_string()),
            string("Alerts/Offline/Links/Node/Schema_UUID", &uuid(3).to_string()),
            string("Alerts/Offline/Links/Node/Instance_UUID", &uuid(300).to_string()),
            string("Links/Peer/Schema_UUID", &uuid(3).to_string()),
            string("Links/Peer/Instance_UUID", &uuid(301).to_string()),
            // no instance uuid, so not an instance
            string("Other/Schema_UUID", &uuid(4).to_string()),
        ]);

        let found: Vec<(Uuid, Option<Uuid>)> =
            tree.instances().iter().map(|i| (i.uuid, i.parent)).collect();
        assert_eq!(
            found,
            vec![
                (uuid(100), None),
                (uuid(200), Some(uuid(100))),
                (uuid(300), Some(uuid(200))),
                (uuid(301), Some(uuid(100))),
            ]
        );

        let schemas: Vec<Uuid> = tree.schemas().into_iter().collect();
        assert_eq!(schemas, vec![uuid(1), uuid(2), uuid(3), uuid(4)]);
    }
}
