//! Project overview for `uplink list` and `uplink show`.

use anyhow::{bail, Result};
use uplink_core::convert::format_validation;
use uplink_core::models::Project;
use uplink_core::store::Store;

use crate::progress::format_number;

/// Print one line per project.
pub async fn run_list(store: &dyn Store) -> Result<()> {
    let projects = store.list_projects().await?;
    if projects.is_empty() {
        println!("No projects. Add one with `uplink add`.");
        return Ok(());
    }

    println!(
        "{:>4}  {:<20} {:<6} {:<18} {:>10} {:>8} {:>10}",
        "ID", "NAME", "MODE", "STATUS", "VALIDATED", "INVALID", "UPLOADED"
    );
    println!("{}", "-".repeat(84));
    for p in &projects {
        println!(
            "{:>4}  {:<20} {:<6} {:<18} {:>10} {:>8} {:>10}",
            p.id,
            truncate(&p.name, 20),
            p.source.kind(),
            status_text(p),
            format_number(p.records_validated),
            format_number(p.records_invalid),
            format_number(p.records_uploaded),
        );
    }
    Ok(())
}

/// Print everything known about one project and its chunks.
pub async fn run_show(store: &dyn Store, id: i64) -> Result<()> {
    let Some(p) = store.get_project(id).await? else {
        bail!("project {} not found", id);
    };
    let chunks = store.list_chunks(id).await?;
    let sent = chunks.iter().filter(|c| c.uploaded).count();

    println!("Project {}: {}", p.id, p.name);
    println!();
    println!("  Mode:        {}", p.source.kind());
    println!("  Location:    {}", p.source.location().display());
    println!("  Delimiter:   {:?}", char::from(p.source.delimiter()));
    println!("  Validation:  {}", format_validation(&p.validation));
    println!("  Status:      {}", status_text(&p));
    if let Some(err) = &p.last_error {
        println!("  Error:       {}", err);
    }
    println!();
    println!("  Validated:   {}", format_number(p.records_validated));
    println!("  Invalid:     {}", format_number(p.records_invalid));
    println!("  Uploaded:    {}", format_number(p.records_uploaded));
    println!("  Chunks:      {} ({} uploaded)", chunks.len(), sent);
    if let Some(path) = &p.errors_file {
        println!("  Errors file: {}", path.display());
    }
    println!("  Updated:     {}", format_ts(p.updated_at));
    Ok(())
}

fn status_text(p: &Project) -> String {
    if p.paused {
        format!("{} (paused)", p.status)
    } else {
        p.status.to_string()
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_names_are_truncated() {
        assert_eq!(truncate("short", 20), "short");
        assert_eq!(truncate("abcdefghij", 5).chars().count(), 5);
    }

    #[test]
    fn timestamps_format_as_minutes() {
        assert_eq!(format_ts(0), "1970-01-01 00:00");
    }
}
