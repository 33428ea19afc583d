//! Flattened chart tree
//!
//! Nodes are stored depth-first, parents before their children, each with the
//! values scoped to it. Rendering walks this arena instead of recursing over
//! the chart with a "current chart" variable.

use rudder_core::{Chart, Values};

/// One chart in the tree
#[derive(Debug)]
pub struct ChartNode<'a> {
    /// Path ID, e.g. `web` or `web/charts/common`
    pub path: String,
    pub chart: &'a Chart,
    pub parent: Option<usize>,
    pub depth: usize,
    /// Values visible to this chart's templates
    pub values: Values,
}

impl ChartNode<'_> {
    /// Path ID of this chart's templates directory
    pub fn templates_path(&self) -> String {
        format!("{}/templates", self.path)
    }
}

/// Arena of chart nodes indexed by position and path
#[derive(Debug)]
pub struct ChartArena<'a> {
    nodes: Vec<ChartNode<'a>>,
    missing: Vec<String>,
}

impl<'a> ChartArena<'a> {
    /// Build the arena from a chart and its coalesced values
    ///
    /// Disabled sub-charts are left out. Declared but absent sub-charts are
    /// recorded as `<parent path>/charts/<name>`.
    pub fn build(root: &'a Chart, values: &Values) -> Self {
        let mut arena = Self {
            nodes: Vec::new(),
            missing: Vec::new(),
        };
        arena.visit(root, root.name().to_string(), None, 0, values.clone());
        arena
    }

    fn visit(
        &mut self,
        chart: &'a Chart,
        path: String,
        parent: Option<usize>,
        depth: usize,
        values: Values,
    ) {
        for name in chart.missing_dependencies() {
            self.missing.push(format!("{}/charts/{}", path, name));
        }

        let children: Vec<(String, &'a Chart, Values)> = chart
            .resolved_subcharts()
            .into_iter()
            .filter(|(_, dep, _)| dep.is_none_or(|d| d.is_enabled(&values)))
            .map(|(name, _, sub)| {
                (
                    format!("{}/charts/{}", path, name),
                    sub,
                    values.scope_for_subchart(name),
                )
            })
            .collect();

        let index = self.nodes.len();
        self.nodes.push(ChartNode {
            path,
            chart,
            parent,
            depth,
            values,
        });

        for (child_path, sub, child_values) in children {
            self.visit(sub, child_path, Some(index), depth + 1, child_values);
        }
    }

    pub fn nodes(&self) -> &[ChartNode<'a>] {
        &self.nodes
    }

    pub fn root(&self) -> &ChartNode<'a> {
        &self.nodes[0]
    }

    pub fn get(&self, path: &str) -> Option<&ChartNode<'a>> {
        self.nodes.iter().find(|n| n.path == path)
    }

    pub fn parent_of(&self, node: &ChartNode<'a>) -> Option<&ChartNode<'a>> {
        node.parent.map(|i| &self.nodes[i])
    }

    /// Absent sub-charts across the whole tree
    pub fn missing_dependencies(&self) -> &[String] {
        &self.missing
    }
}
