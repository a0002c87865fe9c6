use anyhow::Result;
use console::style;

use crate::cli::OutputFormat;
use crate::store::Page;
use crate::utils::format_megabytes;

/// Render a page of records
pub fn format_page(page: &Page, format: &OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_as_text(page)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(page)?),
    }
}

/// Print a page of records to the console
pub fn print_page(page: &Page, format: &OutputFormat) -> Result<()> {
    println!("{}", format_page(page, format)?);
    Ok(())
}

fn format_as_text(page: &Page) -> String {
    if page.records.is_empty() {
        return if page.total == 0 {
            "No converted files yet.".to_string()
        } else {
            format!("Page {} is empty ({} page(s) in total).", page.page, page.total_pages)
        };
    }

    let mut lines = Vec::with_capacity(page.records.len() + 2);
    lines.push(
        style(format!(
            "Page {}/{} ({} file(s))",
            page.page, page.total_pages, page.total
        ))
        .bold()
        .to_string(),
    );
    for record in &page.records {
        lines.push(format!(
            "  {:>9}  {}  {}",
            format_megabytes(record.size),
            record.file,
            style(format!("[{}]", record.status)).dim()
        ));
    }
    lines.join("\n")
}
