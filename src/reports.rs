use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde_json::{Map, Value};

use crate::error::{Result, SipError};
use crate::hierarchy::{self, FlatRow, Hierarchy, HierarchyConfig};
use crate::models::{Record, Scalar};
use crate::remote::ReportBackend;

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Immutable query for the reference-commission report. Blank strings are
/// treated as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportFilter {
    entity_id: Option<String>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    category_id: Option<String>,
}

fn non_blank(s: impl Into<String>) -> Option<String> {
    let s = s.into();
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl ReportFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, id: impl Into<String>) -> Self {
        self.entity_id = non_blank(id);
        self
    }

    pub fn from(mut self, date: NaiveDate) -> Self {
        self.start_date = Some(date);
        self
    }

    pub fn to(mut self, date: NaiveDate) -> Self {
        self.end_date = Some(date);
        self
    }

    pub fn category(mut self, id: impl Into<String>) -> Self {
        self.category_id = non_blank(id);
        self
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    pub fn start_date(&self) -> Option<NaiveDate> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<NaiveDate> {
        self.end_date
    }

    pub fn category_id(&self) -> Option<&str> {
        self.category_id.as_deref()
    }

    pub fn has_discriminator(&self) -> bool {
        self.entity_id.is_some()
            || self.start_date.is_some()
            || self.end_date.is_some()
            || self.category_id.is_some()
    }

    /// Request body; unset fields are omitted.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(id) = &self.entity_id {
            body.insert("entityId".into(), Value::String(id.clone()));
        }
        if let Some(d) = self.start_date {
            body.insert("startDate".into(), Value::String(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = self.end_date {
            body.insert("endDate".into(), Value::String(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(id) = &self.category_id {
            body.insert("categoryId".into(), Value::String(id.clone()));
        }
        Value::Object(body)
    }

    /// Human label for headings, e.g. "client C1002, 2024-04-01 to 2025-03-31".
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(id) = &self.entity_id {
            parts.push(format!("client {id}"));
        }
        match (self.start_date, self.end_date) {
            (Some(a), Some(b)) => parts.push(format!("{a} to {b}")),
            (Some(a), None) => parts.push(format!("from {a}")),
            (None, Some(b)) => parts.push(format!("until {b}")),
            (None, None) => {}
        }
        if let Some(id) = &self.category_id {
            parts.push(format!("category {id}"));
        }
        parts.join(", ")
    }
}

pub fn validate(filter: &ReportFilter) -> Result<()> {
    if !filter.has_discriminator() {
        return Err(SipError::InvalidFilter(
            "set at least one of client, date range or category".to_string(),
        ));
    }
    if let (Some(start), Some(end)) = (filter.start_date, filter.end_date) {
        if end < start {
            return Err(SipError::InvalidFilter(format!(
                "end date {end} is before start date {start}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Response normalization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReportConfig {
    /// Key holding the detail rows; the first array field is used if absent.
    pub rows_key: String,
    pub tree_key: String,
    pub hierarchy: HierarchyConfig,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            rows_key: "detailRows".to_string(),
            tree_key: "treeView".to_string(),
            hierarchy: HierarchyConfig::default(),
        }
    }
}

fn malformed(what: &str) -> SipError {
    SipError::Transport(format!("Malformed report response: {what}"))
}

/// Merges the detail rows and the tree view of a report response into one
/// flat list carrying parent keys. Rows come first in server order; tree
/// nodes missing from the rows are appended in tree preorder. A row with no
/// parent key takes the parent implied by the tree nesting.
pub fn normalize(response: &Value, config: &ReportConfig) -> Result<Vec<Record>> {
    let mut body = response.as_object().ok_or_else(|| malformed("expected an object"))?;
    if !body.contains_key(&config.rows_key) && !body.contains_key(&config.tree_key) {
        if let Some(Value::Object(inner)) = body.get("data") {
            body = inner;
        }
    }

    let rows_value = body.get(&config.rows_key).or_else(|| {
        body.iter()
            .find(|(k, v)| *k != &config.tree_key && v.is_array())
            .map(|(_, v)| v)
    });
    let mut records = Vec::new();
    match rows_value {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for item in items {
                let obj = item.as_object().ok_or_else(|| malformed("row is not an object"))?;
                records.push(Record::from_json_object(obj));
            }
        }
        Some(_) => return Err(malformed("detail rows are not a list")),
    }

    let id_field = config.hierarchy.id_field.as_str();
    let parent_field = config.hierarchy.parent_field.as_str();
    let tree = body.get(&config.tree_key).map(|v| flatten_tree(v, id_field, parent_field));

    if let Some(tree) = tree.transpose()? {
        let mut position: HashMap<String, usize> = HashMap::new();
        for (i, r) in records.iter().enumerate() {
            if let Some(id) = r.text(id_field) {
                position.entry(id).or_insert(i);
            }
        }
        let mut appended: HashSet<String> = HashSet::new();
        for node in tree {
            let Some(id) = node.text(id_field) else { continue };
            match position.get(&id) {
                Some(&i) => {
                    if records[i].text(parent_field).is_none() {
                        if let Some(p) = node.get(parent_field).cloned() {
                            records[i].set(parent_field, p);
                        }
                    }
                }
                None => {
                    if appended.insert(id) {
                        records.push(node);
                    }
                }
            }
        }
    }

    for (i, r) in records.iter_mut().enumerate() {
        if r.sr_no == 0 {
            r.sr_no = i as u32 + 1;
        }
    }
    Ok(records)
}

/// Preorder flattening of a nested `{..., children: [...]}` tree (one node
/// or a list of nodes), filling each child's parent key from its nesting.
fn flatten_tree(tree: &Value, id_field: &str, parent_field: &str) -> Result<Vec<Record>> {
    let mut stack: Vec<(&Value, Option<Scalar>)> = match tree {
        Value::Null => return Ok(Vec::new()),
        Value::Array(nodes) => nodes.iter().rev().map(|n| (n, None)).collect(),
        node => vec![(node, None)],
    };
    let mut out = Vec::new();
    while let Some((node, parent)) = stack.pop() {
        let obj = node.as_object().ok_or_else(|| malformed("tree node is not an object"))?;
        let mut fields = obj.clone();
        fields.remove("children");
        let mut record = Record::from_json_object(&fields);
        if let Some(p) = parent {
            if record.text(parent_field).is_none() {
                record.set(parent_field, p);
            }
        }
        let id = record.get(id_field).cloned().filter(|v| !v.is_blank());
        if let Some(Value::Array(kids)) = obj.get("children") {
            for kid in kids.iter().rev() {
                stack.push((kid, id.clone()));
            }
        }
        out.push(record);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Report {
    pub filter: ReportFilter,
    pub hierarchy: Hierarchy,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationTotal {
    pub depth: u32,
    pub members: usize,
    pub invested: f64,
    pub commission: f64,
}

impl Report {
    pub fn rows(&self) -> &[FlatRow] {
        &self.hierarchy.rows
    }

    /// Per-generation sums, shallowest first.
    pub fn totals(&self) -> Vec<GenerationTotal> {
        let mut by_depth: BTreeMap<u32, GenerationTotal> = BTreeMap::new();
        for node in self.hierarchy.roots.iter().flat_map(|r| r.walk()) {
            let t = by_depth.entry(node.depth).or_insert_with(|| GenerationTotal {
                depth: node.depth,
                ..GenerationTotal::default()
            });
            t.members += 1;
            t.invested += node.metrics.invested_amount.unwrap_or(0.0);
            t.commission += node.metrics.commission.unwrap_or(0.0);
        }
        by_depth.into_values().collect()
    }
}

pub struct ReportCoordinator<B> {
    backend: B,
    config: ReportConfig,
    current: Option<Report>,
}

impl<B: ReportBackend> ReportCoordinator<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, ReportConfig::default())
    }

    pub fn with_config(backend: B, config: ReportConfig) -> Self {
        Self {
            backend,
            config,
            current: None,
        }
    }

    /// The last report that loaded successfully.
    pub fn current(&self) -> Option<&Report> {
        self.current.as_ref()
    }

    /// Validates, dispatches and normalizes one query. On any failure the
    /// previous report stays current.
    pub async fn run(&mut self, filter: ReportFilter) -> Result<&Report> {
        validate(&filter)?;
        tracing::debug!(filter = %filter.describe(), "requesting reference commission report");
        let response = self.backend.reference_commission(&filter).await?;
        let records = normalize(&response, &self.config)?;
        let hierarchy = hierarchy::build(records, &self.config.hierarchy);
        for d in &hierarchy.diagnostics {
            tracing::warn!("{d}");
        }
        tracing::info!(
            rows = hierarchy.rows.len(),
            roots = hierarchy.roots.len(),
            "report loaded"
        );
        Ok(&*self.current.insert(Report { filter, hierarchy }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use crate::hierarchy::Diagnostic;

    #[derive(Default)]
    struct FakeReports {
        reply: Mutex<Option<Result<Value>>>,
        calls: AtomicUsize,
        last_filter: Mutex<Option<ReportFilter>>,
    }

    impl FakeReports {
        fn replying(value: Value) -> Self {
            let fake = Self::default();
            fake.set(Ok(value));
            fake
        }

        fn set(&self, reply: Result<Value>) {
            *self.reply.lock().unwrap() = Some(reply);
        }
    }

    #[async_trait]
    impl ReportBackend for FakeReports {
        async fn reference_commission(&self, filter: &ReportFilter) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_filter.lock().unwrap() = Some(filter.clone());
            self.reply
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(SipError::Transport("no scripted reply".into())))
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn four_clients() -> Value {
        json!({
            "detailRows": [
                {"id": "C1002", "name": "Asha", "investedAmount": 50000, "commission": 0},
                {"id": "C1010", "name": "Ravi", "parentId": "C1002", "investedAmount": 12000, "commission": 240},
                {"id": "C1011", "name": "Meena", "parentId": "C1002", "investedAmount": 8000, "commission": 160},
                {"id": "C1020", "name": "Kiran", "parentId": "C1010", "investedAmount": 6000, "commission": 60}
            ],
            "treeView": {"id": "C1002", "children": [
                {"id": "C1010", "children": [{"id": "C1020", "children": []}]},
                {"id": "C1011"}
            ]}
        })
    }

    #[tokio::test]
    async fn test_entity_filter_builds_hierarchy() {
        let mut rc = ReportCoordinator::new(FakeReports::replying(four_clients()));
        let report = rc.run(ReportFilter::new().entity("C1002")).await.unwrap();

        let rows = report.rows();
        assert_eq!(rows.len(), 4);
        let depth = |id: &str| rows.iter().find(|r| r.id == id).unwrap().depth;
        assert_eq!(depth("C1020"), depth("C1010") + 1);
        assert_eq!(depth("C1002"), 1);
        let root = &report.hierarchy.roots[0];
        assert_eq!(root.id, "C1002");
        assert_eq!(root.children[0].children[0].id, "C1020");
        assert!(report.hierarchy.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_filter_without_discriminator_makes_no_call_and_keeps_report() {
        let fake = std::sync::Arc::new(FakeReports::replying(four_clients()));
        let mut rc = ReportCoordinator::new(std::sync::Arc::clone(&fake));
        rc.run(ReportFilter::new().entity("C1002")).await.unwrap();

        let err = rc.run(ReportFilter::new().entity("   ").category("")).await.unwrap_err();
        assert!(matches!(err, SipError::InvalidFilter(_)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(rc.current().unwrap().rows().len(), 4);
    }

    #[tokio::test]
    async fn test_reversed_dates_are_invalid() {
        let fake = FakeReports::default();
        let mut rc = ReportCoordinator::new(fake);
        let filter = ReportFilter::new().from(date("2025-03-31")).to(date("2024-04-01"));
        assert!(matches!(rc.run(filter).await.unwrap_err(), SipError::InvalidFilter(_)));
        assert!(rc.current().is_none());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_previous_report() {
        let fake = std::sync::Arc::new(FakeReports::replying(four_clients()));
        let mut rc = ReportCoordinator::new(std::sync::Arc::clone(&fake));
        rc.run(ReportFilter::new().entity("C1002")).await.unwrap();
        fake.set(Err(SipError::Transport("HTTP 502".into())));

        let err = rc.run(ReportFilter::new().entity("C2000")).await.unwrap_err();
        assert!(matches!(err, SipError::Transport(_)));
        assert_eq!(rc.current().unwrap().filter.entity_id(), Some("C1002"));
    }

    #[tokio::test]
    async fn test_dates_only_filter_is_sent_as_iso() {
        let fake = std::sync::Arc::new(FakeReports::replying(json!({"detailRows": []})));
        let mut rc = ReportCoordinator::new(std::sync::Arc::clone(&fake));
        let filter = ReportFilter::new().from(date("2024-04-01")).to(date("2025-03-31"));
        let report = rc.run(filter).await.unwrap();
        assert!(report.rows().is_empty());

        let sent = fake.last_filter.lock().unwrap().clone().unwrap();
        assert_eq!(
            sent.to_json(),
            json!({"startDate": "2024-04-01", "endDate": "2025-03-31"})
        );
    }

    #[test]
    fn test_rows_and_tree_agree_on_ids() {
        let response = json!({
            "referenceCommissionList": [
                {"id": "A"},
                {"id": "B", "parentId": "A"},
                {"id": "X", "parentId": "gone"}
            ],
            "treeView": [
                {"id": "A", "children": [{"id": "B"}, {"id": "T", "commission": 10}]},
                {"id": "U"}
            ]
        });
        let records = normalize(&response, &ReportConfig::default()).unwrap();
        let h = hierarchy::build(records, &HierarchyConfig::default());

        let mut from_rows: Vec<String> = h.rows.iter().map(|r| r.id.clone()).collect();
        let mut from_tree: Vec<String> = h
            .roots
            .iter()
            .flat_map(|r| r.walk())
            .map(|n| n.id.clone())
            .collect();
        from_rows.sort();
        from_tree.sort();
        assert_eq!(from_rows, from_tree);
        assert_eq!(from_rows, vec!["A", "B", "T", "U", "X"]);
        let t = h.rows.iter().find(|r| r.id == "T").unwrap();
        assert_eq!(t.parent_id.as_deref(), Some("A"));
        assert_eq!(
            h.diagnostics,
            vec![Diagnostic::UnresolvedParent { id: "X".into(), parent_id: "gone".into() }]
        );
    }

    #[test]
    fn test_tree_fills_missing_parent_on_rows() {
        let response = json!({
            "detailRows": [{"id": "P"}, {"id": "K"}],
            "treeView": {"id": "P", "children": [{"id": "K"}]}
        });
        let records = normalize(&response, &ReportConfig::default()).unwrap();
        assert_eq!(records[1].text("parentId").as_deref(), Some("P"));
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].sr_no, 2);
    }

    #[test]
    fn test_tree_only_response_keeps_nesting_without_children_field() {
        let response = json!({
            "treeView": {"id": "A", "commission": 5, "children": [
                {"id": "B", "children": [
                    {"id": "C", "children": [{"id": "D"}]}
                ]},
                {"id": "E"}
            ]}
        });
        let records = normalize(&response, &ReportConfig::default()).unwrap();
        let ids: Vec<String> = records.iter().map(|r| r.text("id").unwrap()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D", "E"]);
        let parents: Vec<Option<String>> = records.iter().map(|r| r.text("parentId")).collect();
        assert_eq!(
            parents,
            vec![None, Some("A".into()), Some("B".into()), Some("C".into()), Some("A".into())]
        );
        assert!(records.iter().all(|r| r.get("children").is_none()));
        assert_eq!(records[0].number("commission"), Some(5.0));

        let h = hierarchy::build(records, &HierarchyConfig::default());
        let d = h.rows.iter().find(|r| r.id == "D").unwrap();
        assert_eq!(d.depth, 4);
    }

    #[test]
    fn test_wrapped_data_and_bad_shapes() {
        let wrapped = json!({"status": true, "data": {"detailRows": [{"id": "A"}]}});
        assert_eq!(normalize(&wrapped, &ReportConfig::default()).unwrap().len(), 1);

        assert!(normalize(&json!([1, 2]), &ReportConfig::default()).is_err());
        assert!(normalize(&json!({"detailRows": [1]}), &ReportConfig::default()).is_err());
        assert!(normalize(&json!({"detailRows": "x"}), &ReportConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_totals_by_generation() {
        let mut rc = ReportCoordinator::new(FakeReports::replying(four_clients()));
        let report = rc.run(ReportFilter::new().entity("C1002")).await.unwrap();
        let totals = report.totals();
        assert_eq!(totals.len(), 3);
        assert_eq!(totals[1].depth, 2);
        assert_eq!(totals[1].members, 2);
        assert_eq!(totals[1].invested, 20000.0);
        assert_eq!(totals[1].commission, 400.0);
    }

    #[test]
    fn test_describe_filter() {
        let f = ReportFilter::new()
            .entity("C1002")
            .from(date("2024-04-01"))
            .to(date("2025-03-31"));
        assert_eq!(f.describe(), "client C1002, 2024-04-01 to 2025-03-31");
        assert!(!ReportFilter::new().has_discriminator());
    }
}
