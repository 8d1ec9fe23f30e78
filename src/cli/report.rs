use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};

use sipdesk::error::Result;
use sipdesk::export;
use sipdesk::fmt::{money, optional_money};
use sipdesk::hierarchy::HierarchyNode;
use sipdesk::remote::HttpApi;
use sipdesk::reports::{self, Report, ReportCoordinator, ReportFilter};
use sipdesk::settings::{load_settings, SettingsSession};

fn print_table(report: &Report) {
    let mut table = Table::new();
    table.set_header(vec![
        "Gen",
        "Client Id",
        "Name",
        "Referred By",
        "Join Date",
        "Invested",
        "Commission",
        "Tenure",
    ]);
    for row in report.rows() {
        let record = &row.record;
        table.add_row(vec![
            Cell::new(row.depth),
            Cell::new(&row.id),
            Cell::new(record.text("name").unwrap_or_default()),
            Cell::new(row.parent_id.as_deref().unwrap_or("")),
            Cell::new(record.text("joinDate").unwrap_or_default()),
            Cell::new(optional_money(record.number("investedAmount"))),
            Cell::new(optional_money(record.number("commission"))),
            Cell::new(record.text("tenureMonths").unwrap_or_default()),
        ]);
    }
    println!("{table}");
}

fn print_tree(roots: &[HierarchyNode]) {
    for root in roots {
        for node in root.walk() {
            let indent = "  ".repeat((node.depth - root.depth) as usize);
            let name = node.record.text("name").unwrap_or_default();
            let commission = node
                .metrics
                .commission
                .map(|c| format!("  {}", money(c).green()))
                .unwrap_or_default();
            println!("{indent}{} {name}{commission}", node.id.bold());
        }
    }
}

fn print_totals(report: &Report) {
    let mut table = Table::new();
    table.set_header(vec!["Generation", "Members", "Invested", "Commission"]);
    let (mut invested, mut commission, mut members) = (0.0, 0.0, 0);
    for t in report.totals() {
        members += t.members;
        invested += t.invested;
        commission += t.commission;
        table.add_row(vec![
            Cell::new(t.depth),
            Cell::new(t.members),
            Cell::new(money(t.invested)),
            Cell::new(money(t.commission)),
        ]);
    }
    table.add_row(vec![
        Cell::new("Total".bold()),
        Cell::new(members),
        Cell::new(money(invested)),
        Cell::new(money(commission).bold()),
    ]);
    println!("Totals by generation\n{table}");
}

fn default_export_path(data_dir: &str) -> PathBuf {
    PathBuf::from(data_dir).join("exports").join(format!(
        "commission-{}.csv",
        chrono::Local::now().format("%Y-%m-%d")
    ))
}

pub async fn commission(
    client: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    category: Option<String>,
    tree: bool,
    export_to: Option<String>,
) -> Result<()> {
    let mut filter = ReportFilter::new();
    if let Some(c) = client {
        filter = filter.entity(c);
    }
    if let Some(d) = from {
        filter = filter.from(d);
    }
    if let Some(d) = to {
        filter = filter.to(d);
    }
    if let Some(c) = category {
        filter = filter.category(c);
    }
    // Reject a bad filter before settings or network are involved.
    reports::validate(&filter)?;

    let settings = load_settings();
    let api = HttpApi::new(
        &settings.api_base_url,
        settings.timeout(),
        Arc::new(SettingsSession::new(&settings)),
    )?;
    let mut coordinator = ReportCoordinator::new(api);
    let report = coordinator.run(filter).await?;

    println!("Reference commission: {}", report.filter.describe());
    if report.rows().is_empty() {
        println!("No referrals found.");
        return Ok(());
    }
    for d in &report.hierarchy.diagnostics {
        println!("{} {d}", "warning:".yellow().bold());
    }
    if tree {
        print_tree(&report.hierarchy.roots);
    } else {
        print_table(report);
    }
    print_totals(report);

    if let Some(path) = export_to {
        let path = if path.is_empty() {
            default_export_path(&settings.data_dir)
        } else {
            PathBuf::from(path)
        };
        export::save_csv(report.rows(), &export::commission_columns(), &path)?;
        println!("Exported {} rows to {}", report.rows().len(), path.display());
    }
    Ok(())
}
