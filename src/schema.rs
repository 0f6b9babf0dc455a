//! Column normalization for legacy exports.
//!
//! Older spreadsheets used traditional characters, longer column titles and a
//! handful of "one-click action" columns. Everything is folded onto the
//! canonical names in [`crate::records::fields`].

use indexmap::IndexSet;

use crate::records::{fields, RawTable, Record};

/// Legacy spelling -> canonical name. Canonical names are never keys here, so
/// renaming is idempotent.
pub const RENAMES: [(&str, &str); 16] = [
    ("衣服名稱", fields::NAME),
    ("衣服名称", fields::NAME),
    ("衣服分类", fields::CATEGORY),
    ("衣服分類", fields::CATEGORY),
    ("價格", fields::PRICE),
    ("購買日期", fields::PURCHASE_DATE),
    ("購買途徑", fields::PURCHASE_CHANNEL),
    ("目前狀態", fields::STATUS),
    ("目前状态", fields::STATUS),
    ("入庫日期", fields::INTAKE_DATE),
    ("存放地點", fields::STORAGE_LOCATION),
    ("衣服类型", fields::KIND),
    ("換季日期", fields::SEASON_CHANGE_DATE),
    ("處理日期", fields::DISPOSAL_DATE),
    ("主图", fields::IMAGE),
    ("Image", fields::IMAGE),
];

/// Trigger columns from the spreadsheet workflow. Dropped on load.
pub const DENIED: [&str; 13] = [
    "一鍵換季",
    "一键换季",
    "一鍵處理",
    "一键處理",
    "一键处理",
    "一鍵丟棄",
    "一键丢弃",
    "一鍵入庫",
    "一键入库",
    "Place",
    "恢复状态",
    "恢復狀態",
    "操作",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

/// Canonical name for `key`, or `None` when the column is dropped.
pub fn canonical_key(key: &str) -> Option<&str> {
    let key = key.trim();
    if key.is_empty() || DENIED.contains(&key) {
        return None;
    }
    Some(
        RENAMES
            .iter()
            .find(|(legacy, _)| *legacy == key)
            .map_or(key, |&(_, canonical)| canonical),
    )
}

/// Normalizes one raw row.
///
/// When a row carries several spellings of the same field the canonical
/// spelling wins; among legacy spellings the first non-empty value wins.
pub fn normalize_record(raw: &Record) -> Record {
    let mut out = Record::new();
    let mut from_canonical: IndexSet<String> = IndexSet::new();

    for (key, value) in raw.iter() {
        let Some(target) = canonical_key(key) else {
            continue;
        };
        let is_canonical = key.trim() == target;

        if from_canonical.contains(target) {
            continue;
        }
        if is_canonical {
            out.set(target, value);
            from_canonical.insert(target.to_owned());
            continue;
        }
        match out.get(target) {
            Some(existing) if !existing.is_empty() => {}
            _ => out.set(target, value),
        }
    }

    out
}

pub fn normalize(raw: &[Record]) -> Normalized {
    let mut columns: IndexSet<String> = IndexSet::new();
    let records: Vec<Record> = raw
        .iter()
        .map(|r| {
            let n = normalize_record(r);
            for key in n.keys() {
                if !columns.contains(key) {
                    columns.insert(key.to_owned());
                }
            }
            n
        })
        .collect();

    Normalized {
        columns: columns.into_iter().collect(),
        records,
    }
}

/// Normalizes a decoded table. Header-only files still yield their columns.
pub fn normalize_table(table: &RawTable) -> Normalized {
    let mut normalized = normalize(&table.rows);
    let mut columns: IndexSet<String> = table
        .headers
        .iter()
        .filter_map(|h| canonical_key(h))
        .map(str::to_owned)
        .collect();
    columns.extend(normalized.columns.drain(..));
    normalized.columns = columns.into_iter().collect();
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::decode_csv;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn renames_legacy_columns() {
        let raw = vec![rec(&[
            ("衣服名稱", "羽绒服"),
            ("目前狀態", "已收纳"),
            ("存放地點", "床底"),
            ("Image", "http://x/y.jpg"),
        ])];
        let n = normalize(&raw);

        assert_eq!(n.columns, vec!["名称", "状态", "存放地点", "图片"]);
        assert_eq!(n.records[0].get("名称"), Some("羽绒服"));
        assert_eq!(n.records[0].get("存放地点"), Some("床底"));
    }

    #[test]
    fn drops_denied_and_empty_keys() {
        let raw = vec![rec(&[
            ("名称", "T恤"),
            ("一键换季", "TRUE"),
            ("Place", "x"),
            ("", "orphan"),
            ("  ", "blank"),
        ])];
        let n = normalize(&raw);

        assert_eq!(n.columns, vec!["名称"]);
        assert_eq!(n.records[0].len(), 1);
    }

    #[test]
    fn unknown_columns_pass_through() {
        let n = normalize(&[rec(&[("名称", "A"), ("尺码", "L")])]);
        assert_eq!(n.records[0].get("尺码"), Some("L"));
    }

    #[test]
    fn canonical_spelling_wins_collision() {
        let raw = rec(&[("衣服名稱", "old"), ("名称", "new")]);
        assert_eq!(normalize_record(&raw).get("名称"), Some("new"));

        let raw = rec(&[("名称", "new"), ("衣服名稱", "old")]);
        assert_eq!(normalize_record(&raw).get("名称"), Some("new"));
    }

    #[test]
    fn first_non_empty_alias_wins() {
        let raw = rec(&[("衣服名稱", ""), ("衣服名称", "second")]);
        assert_eq!(normalize_record(&raw).get("名称"), Some("second"));

        let raw = rec(&[("衣服名稱", "first"), ("衣服名称", "second")]);
        assert_eq!(normalize_record(&raw).get("名称"), Some("first"));
    }

    #[test]
    fn rename_table_is_injective_onto_canonical_names() {
        for (legacy, canonical) in RENAMES {
            assert!(fields::CANONICAL.contains(&canonical), "{canonical} not canonical");
            assert!(!fields::CANONICAL.contains(&legacy), "{legacy} is canonical");
            assert!(RENAMES.iter().all(|(l, _)| *l != canonical));
        }
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = vec![
            rec(&[("衣服名稱", "A"), ("價格", "10"), ("一鍵入庫", "")]),
            rec(&[("名称", "B"), ("备注", "gift")]),
        ];
        let once = normalize(&raw);
        let twice = normalize(&once.records);

        assert_eq!(once, twice);
    }

    #[test]
    fn header_only_table_keeps_columns() {
        let table = decode_csv("衣服名稱,一键处理,价格\n").unwrap();
        let n = normalize_table(&table);

        assert_eq!(n.columns, vec!["名称", "价格"]);
        assert!(n.records.is_empty());
    }
}
