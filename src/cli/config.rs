use comfy_table::{Cell, Table};

use sipdesk::error::Result;
use sipdesk::settings::{load_settings, save_settings, settings_path, shellexpand_path, Settings};

fn show(settings: &Settings) {
    let mut table = Table::new();
    table.set_header(vec!["Setting", "Value"]);
    let rows = [
        ("api_base_url", settings.api_base_url.clone()),
        ("data_dir", settings.data_dir.clone()),
        ("timeout_secs", settings.timeout_secs.to_string()),
        ("branch_id", settings.branch_id.clone().unwrap_or_default()),
        ("token_file", settings.token_file.clone().unwrap_or_default()),
    ];
    for (name, value) in rows {
        table.add_row(vec![Cell::new(name), Cell::new(value)]);
    }
    println!("{}\n{table}", settings_path().display());
}

pub fn run(
    api_url: Option<String>,
    data_dir: Option<String>,
    branch: Option<String>,
    token_file: Option<String>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut settings = load_settings();
    let changed =
        api_url.is_some() || data_dir.is_some() || branch.is_some() || token_file.is_some() || timeout.is_some();

    if let Some(url) = api_url {
        settings.api_base_url = url.trim().trim_end_matches('/').to_string();
    }
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(b) = branch {
        settings.branch_id = (!b.trim().is_empty()).then(|| b.trim().to_string());
    }
    if let Some(f) = token_file {
        settings.token_file = (!f.trim().is_empty()).then(|| shellexpand_path(f.trim()));
    }
    if let Some(t) = timeout {
        settings.timeout_secs = t;
    }

    if changed {
        save_settings(&settings)?;
        println!("Settings saved.");
    }
    show(&settings);
    Ok(())
}
