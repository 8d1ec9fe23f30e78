//! Referral hierarchy: turns flat records carrying a parent key into a tree
//! and a depth-annotated table.
//!
//! Everything here is iterative so that a chain of any length, or a batch
//! full of cycles, can't blow the stack.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::Record;

#[derive(Debug, Clone)]
pub struct HierarchyConfig {
    pub id_field: String,
    pub parent_field: String,
    /// Generation assigned to roots: 0 or 1 depending on the report.
    pub base_depth: u32,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            parent_field: "parentId".to_string(),
            base_depth: 1,
        }
    }
}

/// Report figures carried on each node.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionMetrics {
    pub invested_amount: Option<f64>,
    pub commission: Option<f64>,
    pub join_date: Option<String>,
    pub tenure_months: Option<u32>,
}

impl CommissionMetrics {
    pub fn from_record(record: &Record) -> Self {
        Self {
            invested_amount: record.number("investedAmount"),
            commission: record.number("commission"),
            join_date: record.text("joinDate"),
            tenure_months: record
                .number("tenureMonths")
                .filter(|m| *m >= 0.0)
                .map(|m| m as u32),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyNode {
    pub id: String,
    /// Resolved parent; `None` for real and synthetic roots alike.
    pub parent_id: Option<String>,
    pub depth: u32,
    pub metrics: CommissionMetrics,
    pub record: Record,
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Preorder walk without recursion.
    pub fn walk(&self) -> Vec<&HierarchyNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

impl Drop for HierarchyNode {
    // Default drop glue recurses once per level; flatten it instead.
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// One line of the tabular projection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRow {
    pub id: String,
    pub parent_id: Option<String>,
    pub depth: u32,
    pub record: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// A parent chain looped back on itself; `id` was made a root to break it.
    CycleDetected { id: String, parent_id: String },
    /// The referenced parent is not in this batch; the record became a root.
    UnresolvedParent { id: String, parent_id: String },
    /// A second record reused an id; children attach to the first one.
    DuplicateId { id: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected { id, parent_id } => {
                write!(f, "cycle detected: {id} -> {parent_id}; {id} shown as a root")
            }
            Self::UnresolvedParent { id, parent_id } => {
                write!(f, "parent {parent_id} of {id} is outside this report")
            }
            Self::DuplicateId { id } => write!(f, "id {id} appears more than once"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Hierarchy {
    pub roots: Vec<HierarchyNode>,
    /// Preorder flattening of `roots`.
    pub rows: Vec<FlatRow>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Hierarchy {
    pub fn has_cycles(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::CycleDetected { .. }))
    }
}

pub fn build(records: Vec<Record>, config: &HierarchyConfig) -> Hierarchy {
    let n = records.len();
    let ids: Vec<String> = records
        .iter()
        .enumerate()
        .map(|(i, r)| r.text(&config.id_field).unwrap_or_else(|| format!("#{}", i + 1)))
        .collect();
    let mut diagnostics = Vec::new();

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(n);
    for (i, id) in ids.iter().enumerate() {
        if index.contains_key(id.as_str()) {
            diagnostics.push(Diagnostic::DuplicateId { id: id.clone() });
        } else {
            index.insert(id.as_str(), i);
        }
    }

    // parent[i] is the resolved parent position, None for roots.
    let mut parent: Vec<Option<usize>> = Vec::with_capacity(n);
    for (i, record) in records.iter().enumerate() {
        let resolved = match record.text(&config.parent_field) {
            None => None,
            Some(pid) => match index.get(pid.as_str()) {
                Some(&p) => Some(p),
                None => {
                    diagnostics.push(Diagnostic::UnresolvedParent {
                        id: ids[i].clone(),
                        parent_id: pid,
                    });
                    None
                }
            },
        };
        parent.push(resolved);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, p) in parent.iter().enumerate() {
        if let Some(p) = p {
            children[*p].push(i);
        }
    }

    let mut placed = vec![false; n];
    let mut depth = vec![0u32; n];
    let mut roots: Vec<usize> = Vec::new();

    for i in 0..n {
        if parent[i].is_none() {
            roots.push(i);
            place_subtree(i, config.base_depth, &children, &mut placed, &mut depth);
        }
    }

    // Whatever is left hangs in or under a cycle.
    let mut walk_mark = vec![usize::MAX; n];
    for start in 0..n {
        if placed[start] {
            continue;
        }
        let entry = cycle_entry(start, &parent, &mut walk_mark);
        let cut_from = parent[entry].map(|p| ids[p].clone()).unwrap_or_default();
        tracing::warn!(id = %ids[entry], parent = %cut_from, "breaking referral cycle");
        diagnostics.push(Diagnostic::CycleDetected {
            id: ids[entry].clone(),
            parent_id: cut_from,
        });
        if let Some(p) = parent[entry].take() {
            children[p].retain(|&c| c != entry);
        }
        roots.push(entry);
        place_subtree(entry, config.base_depth, &children, &mut placed, &mut depth);
    }

    // Roots were discovered in two passes; keep input order among them.
    roots.sort_unstable();
    let mut preorder = Vec::with_capacity(n);
    for &root in &roots {
        let mut stack = vec![root];
        while let Some(i) = stack.pop() {
            preorder.push(i);
            stack.extend(children[i].iter().rev());
        }
    }
    debug_assert_eq!(preorder.len(), n);

    let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
    let rows: Vec<FlatRow> = preorder
        .iter()
        .map(|&i| FlatRow {
            id: ids[i].clone(),
            parent_id: parent[i].map(|p| ids[p].clone()),
            depth: depth[i],
            record: slots[i].clone().unwrap_or_default(),
        })
        .collect();

    // Children always follow their parent in preorder, so assembling in
    // reverse finds every child already built.
    let mut built: Vec<Option<HierarchyNode>> = (0..n).map(|_| None).collect();
    for &i in preorder.iter().rev() {
        let kids = children[i]
            .iter()
            .filter_map(|&c| built[c].take())
            .collect();
        let record = slots[i].take().unwrap_or_default();
        built[i] = Some(HierarchyNode {
            id: ids[i].clone(),
            parent_id: parent[i].map(|p| ids[p].clone()),
            depth: depth[i],
            metrics: CommissionMetrics::from_record(&record),
            record,
            children: kids,
        });
    }
    let roots = roots.iter().filter_map(|&r| built[r].take()).collect();

    Hierarchy {
        roots,
        rows,
        diagnostics,
    }
}

fn place_subtree(
    root: usize,
    base: u32,
    children: &[Vec<usize>],
    placed: &mut [bool],
    depth: &mut [u32],
) {
    let mut stack = vec![(root, base)];
    while let Some((i, d)) = stack.pop() {
        if placed[i] {
            continue;
        }
        placed[i] = true;
        depth[i] = d;
        for &c in children[i].iter().rev() {
            stack.push((c, d + 1));
        }
    }
}

/// Follows parent links from `start` until a position repeats; that
/// position lies on the cycle. `mark` is shared across calls and stamped
/// with `start`, so repeated walks stay linear overall.
fn cycle_entry(start: usize, parent: &[Option<usize>], mark: &mut [usize]) -> usize {
    let mut cur = start;
    loop {
        if mark[cur] == start {
            return cur;
        }
        mark[cur] = start;
        match parent[cur] {
            Some(p) => cur = p,
            None => return cur,
        }
    }
}
