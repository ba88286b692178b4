//! Author records and their assembly from extracted fields.

use crate::error::{ElibError, OptionExt, Result};
use crate::extract::{parse_count, Field, RawExtraction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bibliometric summary for one author.
///
/// Once stored, a record is never updated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorRecord {
    /// External identifier on the site
    pub author_id: u32,
    /// Full name, `Неизвестно` when the strategy cannot read it
    pub name: String,
    /// Total publications
    pub publishes_count: u32,
    /// Publications never cited, `publishes_count - cited`
    pub zero_citt_publishes_count: u32,
    /// h-index
    pub hirsh_index: u32,
}

impl fmt::Display for AuthorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "authorId: {} ФИО: {} Кол-во статей: {} Кол-во статей с нулевым цитированием: {} Индекс Хирша: {}",
            self.author_id,
            self.name,
            self.publishes_count,
            self.zero_citt_publishes_count,
            self.hirsh_index
        )
    }
}

fn numeric(extraction: &RawExtraction, field: Field) -> Result<u32> {
    let raw = extraction
        .get(field)
        .ok_or_parse(&format!("{} is missing", field))?;
    parse_count(raw).ok_or_else(|| ElibError::Parse(format!("{} is not a number: '{}'", field, raw)))
}

/// Build a validated record from extracted fields.
///
/// Fails with [`ElibError::Parse`] when the name or any count is missing or
/// unparseable, or when more publications are cited than exist.
pub fn assemble(author_id: u32, extraction: &RawExtraction) -> Result<AuthorRecord> {
    let name = extraction
        .get(Field::Name)
        .filter(|n| !n.is_empty())
        .ok_or_parse(&format!("{} is missing", Field::Name))?
        .to_string();
    let publishes_count = numeric(extraction, Field::PublishesCount)?;
    let cited = numeric(extraction, Field::CitedPublishesCount)?;
    let hirsh_index = numeric(extraction, Field::HirshIndex)?;

    let zero_citt_publishes_count = publishes_count.checked_sub(cited).ok_or_else(|| {
        ElibError::Parse(format!(
            "cited publications ({}) exceed total ({})",
            cited, publishes_count
        ))
    })?;

    Ok(AuthorRecord {
        author_id,
        name,
        publishes_count,
        zero_citt_publishes_count,
        hirsh_index,
    })
}
