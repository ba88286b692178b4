//! Identifier lists in, tabular reports out.

use crate::author::AuthorRecord;
use crate::error::Result;
use clap::ValueEnum;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

const MARKDOWN_HEADER: &str = "|ID|ФИО|Статей|Статей без цитирования|Индекс Хирша|";
const MARKDOWN_SEPARATOR: &str = "|---|---|---|---|---|";

/// Parse a comma-separated identifier list.
///
/// Blank tokens are skipped silently; anything that is not a positive
/// integer is skipped with a warning. Duplicates collapse.
pub fn parse_author_ids(text: &str) -> BTreeSet<u32> {
    text.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<u32>() {
            Ok(id) if id > 0 => Some(id),
            _ => {
                warn!(token, "Skipping invalid author id");
                None
            }
        })
        .collect()
}

/// Read an identifier list file
pub fn read_author_ids(path: &Path) -> Result<BTreeSet<u32>> {
    let text = std::fs::read_to_string(path)?;
    let ids = parse_author_ids(&text);
    info!(path = %path.display(), count = ids.len(), "Author ids loaded");
    Ok(ids)
}

/// Output table flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Csv,
}

impl ReportFormat {
    /// Guess from a file extension, falling back to Markdown
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => ReportFormat::Csv,
            _ => ReportFormat::Markdown,
        }
    }
}

/// Render the Markdown table; rows come out ordered by id
pub fn render_markdown(authors: &BTreeSet<AuthorRecord>) -> String {
    let mut out = String::new();
    out.push_str(MARKDOWN_HEADER);
    out.push('\n');
    out.push_str(MARKDOWN_SEPARATOR);
    out.push('\n');
    for a in authors {
        out.push_str(&format!(
            "|{}|{}|{}|{}|{}|\n",
            a.author_id,
            a.name.replace('|', "\\|"),
            a.publishes_count,
            a.zero_citt_publishes_count,
            a.hirsh_index
        ));
    }
    out
}

/// Write the report in `format` to any writer
pub fn write_report<W: Write>(
    writer: W,
    authors: &BTreeSet<AuthorRecord>,
    format: ReportFormat,
) -> Result<()> {
    match format {
        ReportFormat::Markdown => {
            let mut writer = writer;
            writer.write_all(render_markdown(authors).as_bytes())?;
            writer.flush()?;
        }
        ReportFormat::Csv => {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(true)
                .from_writer(writer);
            for author in authors {
                wtr.serialize(author)?;
            }
            wtr.flush()?;
        }
    }
    Ok(())
}

/// Write the report to `path`, replacing any existing file
pub fn save_report(path: &Path, authors: &BTreeSet<AuthorRecord>, format: ReportFormat) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_report(std::io::BufWriter::new(file), authors, format)?;
    info!(path = %path.display(), rows = authors.len(), ?format, "Report saved");
    Ok(())
}
