use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, str::FromStr};

use crate::error::{Error, Result};

/// Canonical column names as they appear in the data files.
pub mod fields {
    pub const NAME: &str = "名称";
    pub const CATEGORY: &str = "分类";
    pub const KIND: &str = "类型";
    pub const BRAND: &str = "品牌";
    pub const PRICE: &str = "价格";
    pub const PURCHASE_DATE: &str = "购买日期";
    pub const PURCHASE_CHANNEL: &str = "购买途径";
    pub const STATUS: &str = "状态";
    pub const SEASON: &str = "季节";
    pub const INTAKE_DATE: &str = "入库日期";
    pub const STORAGE_LOCATION: &str = "存放地点";
    pub const SEASON_CHANGE_DATE: &str = "换季日期";
    pub const DISPOSAL_DATE: &str = "处理日期";
    pub const IMAGE: &str = "图片";
    pub const PURCHASE_LINK: &str = "购买链接";
    pub const NOTE: &str = "备注";

    pub const CANONICAL: [&str; 16] = [
        NAME,
        CATEGORY,
        KIND,
        BRAND,
        PRICE,
        PURCHASE_DATE,
        PURCHASE_CHANNEL,
        STATUS,
        SEASON,
        INTAKE_DATE,
        STORAGE_LOCATION,
        SEASON_CHANGE_DATE,
        DISPOSAL_DATE,
        IMAGE,
        PURCHASE_LINK,
        NOTE,
    ];
}

/// One row of a collection. The schema is open: unknown fields are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: IndexMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Value of `key` with surrounding whitespace removed, `None` when blank.
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Removes `key` keeping the order of the remaining fields.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.non_empty(fields::NAME)
    }

    pub fn status(&self) -> &str {
        self.get(fields::STATUS).unwrap_or("")
    }

    /// Case-insensitive substring match against every value.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.fields
            .values()
            .any(|v| v.to_lowercase().contains(&needle))
    }

    /// Copies every field of `other` into this record, overwriting existing values.
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in other.iter() {
            self.set(k, v);
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Purchases,
    Inventory,
    Storage,
    Discard,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Purchases,
        Collection::Inventory,
        Collection::Storage,
        Collection::Discard,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Purchases => "purchases",
            Collection::Inventory => "inventory",
            Collection::Storage => "storage",
            Collection::Discard => "discard",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.as_str())
    }

    pub fn index(&self) -> usize {
        match self {
            Collection::Purchases => 0,
            Collection::Inventory => 1,
            Collection::Storage => 2,
            Collection::Discard => 3,
        }
    }

    /// Whether `record` belongs to this collection's active view.
    pub fn in_view(&self, record: &Record) -> bool {
        let status = record.status();
        match self {
            Collection::Purchases => true,
            Collection::Inventory => status == Status::InUse.as_str(),
            Collection::Storage => status.contains("收纳") || status.contains("换季"),
            Collection::Discard => status.contains("待处理") || status.contains("淘汰"),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "purchases" => Ok(Collection::Purchases),
            "inventory" => Ok(Collection::Inventory),
            "storage" => Ok(Collection::Storage),
            "discard" => Ok(Collection::Discard),
            other => Err(Error::NotFound(format!("collection '{}'", other))),
        }
    }
}

/// Status vocabulary. The status column itself stays free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ordered,
    InUse,
    Stored,
    IntakeComplete,
    PendingDisposal,
    Discarded,
    Presale,
    ListedForResale,
    Sold,
}

impl Status {
    pub const ALL: [Status; 9] = [
        Status::Ordered,
        Status::InUse,
        Status::Stored,
        Status::IntakeComplete,
        Status::PendingDisposal,
        Status::Discarded,
        Status::Presale,
        Status::ListedForResale,
        Status::Sold,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ordered => "已下单",
            Status::InUse => "正在使用",
            Status::Stored => "已收纳",
            Status::IntakeComplete => "已入库",
            Status::PendingDisposal => "待处理",
            Status::Discarded => "已淘汰",
            Status::Presale => "预售",
            Status::ListedForResale => "咸鱼在售",
            Status::Sold => "已售出",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        Status::ALL.into_iter().find(|st| st.as_str() == s.trim())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw decoded CSV: header names and positionally aligned rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Record>,
}

/// Decodes CSV text into records keyed by header.
///
/// Ragged rows are tolerated: missing trailing values read as empty strings and
/// extra values are dropped. Quoted fields may span lines.
pub fn decode_csv(text: &str) -> Result<RawTable> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr.headers()?.iter().map(clean_header).collect();
    let mut rows = Vec::new();

    for result in rdr.records() {
        let values = result?;
        if is_blank_line(text, &values) {
            continue;
        }
        let row = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.clone(), values.get(idx).unwrap_or("").to_owned()))
            .collect();
        rows.push(row);
    }

    Ok(RawTable { headers, rows })
}

/// Trims a header, then strips one pair of enclosing quotes. The parser keeps
/// quotes that follow leading whitespace as literal text.
fn clean_header(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|h| h.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_owned()
}

/// True for a line holding nothing but whitespace. A quoted empty field
/// (`""`) is a real row.
fn is_blank_line(text: &str, values: &csv::StringRecord) -> bool {
    if values.len() != 1 || values.get(0).is_some_and(|v| !v.trim().is_empty()) {
        return false;
    }
    let Some(start) = values.position().map(|p| p.byte() as usize) else {
        return true;
    };
    // The reported position may sit on empty lines skipped before the record.
    text.get(start..)
        .and_then(|rest| rest.trim_start_matches(['\r', '\n']).lines().next())
        .map_or(true, |line| line.trim().is_empty())
}

/// Encodes records under `columns`. A field is quoted only when it holds a
/// comma, a double quote or a line break; missing values are written empty.
pub fn encode_csv(columns: &[String], records: &[Record]) -> Result<String> {
    if columns.is_empty() {
        return Ok(String::new());
    }

    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());

    wtr.write_record(columns)?;
    for record in records {
        wtr.write_record(columns.iter().map(|c| record.get(c).unwrap_or("")))?;
    }

    let bytes = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Encodes a single data line (no header) aligned to `columns`.
pub fn encode_row(columns: &[String], record: &Record) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    wtr.write_record(columns.iter().map(|c| record.get(c).unwrap_or("")))?;
    let bytes = wtr.into_inner().map_err(|e| Error::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Union of the given base columns and every key of every record, first-seen order.
pub fn column_union<'a>(
    base: impl IntoIterator<Item = &'a String>,
    records: &[Record],
) -> Vec<String> {
    let mut columns: indexmap::IndexSet<String> = base.into_iter().cloned().collect();
    for record in records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.insert(key.to_owned());
            }
        }
    }
    columns.into_iter().collect()
}

pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<RawTable> {
    match std::fs::read_to_string(path) {
        Ok(text) => decode_csv(&text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RawTable::default()),
        Err(e) => Err(e.into()),
    }
}
