//! Dashboard numbers: view counts and purchase spending.

use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::records::{fields, Collection, Record};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spend {
    pub name: String,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub inventory: usize,
    pub storage: usize,
    pub discard: usize,
    pub purchases: usize,
    pub total_cost: f64,
    pub year: i32,
    pub year_cost: f64,
    pub year_count: usize,
    pub previous_year_cost: f64,
    /// Percent change against the previous year; 0 when that year is empty.
    pub yoy_growth: f64,
    /// Twelve months ending at the current month when `year` is this year,
    /// otherwise January to December of `year`.
    pub monthly: [f64; 12],
    /// `YY/MM` label for each entry of `monthly`.
    pub monthly_labels: Vec<String>,
    /// Percent change of the last month of `monthly` over the one before it.
    pub mom_growth: f64,
    pub top_categories: Vec<Spend>,
    pub top_brands: Vec<Spend>,
    /// Years with at least one dated purchase, newest first.
    pub years: Vec<i32>,
}

const TOP: usize = 5;
const NO_CATEGORY: &str = "其他";
const NO_BRAND: &str = "无品牌";

/// Price text to a number. Thousands separators are ignored; anything
/// unparseable counts as zero.
pub fn parse_price(raw: &str) -> f64 {
    raw.replace([',', '，'], "")
        .trim()
        .trim_start_matches(['¥', '￥'])
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite())
        .unwrap_or(0.0)
}

fn cjk_date() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日?").expect("valid date regex"))
}

/// Accepts `2026-10-18`, `2026/10/18` and `2026年10月18日`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(caps) = cjk_date().captures(raw) {
        let y = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let d = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }
    let head = raw.split([' ', 'T']).next().unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(head, "%Y/%m/%d"))
        .ok()
}

fn growth(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else {
        0.0
    }
}

/// Largest totals first; equal totals keep first-seen order.
fn top(totals: IndexMap<String, f64>) -> Vec<Spend> {
    let mut spend: Vec<Spend> = totals
        .into_iter()
        .map(|(name, total)| Spend { name, total })
        .collect();
    spend.sort_by(|a, b| b.total.total_cmp(&a.total));
    spend.truncate(TOP);
    spend
}

/// (year, zero-based month) of the twelve months shown for `year`.
fn month_window(year: i32, today: NaiveDate) -> [(i32, u32); 12] {
    let mut window = [(year, 0); 12];
    for (slot, entry) in window.iter_mut().enumerate() {
        *entry = if year == today.year() {
            let back = 11 - slot as i32;
            let serial = today.year() * 12 + today.month0() as i32 - back;
            (serial.div_euclid(12), serial.rem_euclid(12) as u32)
        } else {
            (year, slot as u32)
        };
    }
    window
}

pub fn summarize(sets: &[(Collection, Vec<Record>)], year: i32, today: NaiveDate) -> Summary {
    let count = |collection: Collection| {
        sets.iter()
            .filter(|(c, _)| *c == collection)
            .flat_map(|(_, records)| records)
            .filter(|r| collection.in_view(r))
            .count()
    };

    let window = month_window(year, today);
    let mut summary = Summary {
        inventory: count(Collection::Inventory),
        storage: count(Collection::Storage),
        discard: count(Collection::Discard),
        purchases: count(Collection::Purchases),
        total_cost: 0.0,
        year,
        year_cost: 0.0,
        year_count: 0,
        previous_year_cost: 0.0,
        yoy_growth: 0.0,
        monthly: [0.0; 12],
        monthly_labels: window
            .iter()
            .map(|(y, m)| format!("{:02}/{:02}", y.rem_euclid(100), m + 1))
            .collect(),
        mom_growth: 0.0,
        top_categories: Vec::new(),
        top_brands: Vec::new(),
        years: Vec::new(),
    };

    let purchases = sets
        .iter()
        .filter(|(c, _)| *c == Collection::Purchases)
        .flat_map(|(_, records)| records);

    let mut categories: IndexMap<String, f64> = IndexMap::new();
    let mut brands: IndexMap<String, f64> = IndexMap::new();
    let mut years = BTreeSet::new();

    for record in purchases {
        let price = parse_price(record.get(fields::PRICE).unwrap_or(""));
        summary.total_cost += price;

        let category = record
            .non_empty(fields::CATEGORY)
            .or_else(|| record.non_empty(fields::KIND))
            .unwrap_or(NO_CATEGORY);
        *categories.entry(category.to_owned()).or_default() += price;
        let brand = record.non_empty(fields::BRAND).unwrap_or(NO_BRAND);
        *brands.entry(brand.to_owned()).or_default() += price;

        let Some(date) = record.get(fields::PURCHASE_DATE).and_then(parse_date) else {
            continue;
        };
        years.insert(date.year());
        if date.year() == year {
            summary.year_cost += price;
            summary.year_count += 1;
        }
        if date.year() == year - 1 {
            summary.previous_year_cost += price;
        }
        if let Some(slot) = window.iter().position(|&w| w == (date.year(), date.month0())) {
            summary.monthly[slot] += price;
        }
    }

    summary.yoy_growth = growth(summary.year_cost, summary.previous_year_cost);
    summary.mom_growth = growth(summary.monthly[11], summary.monthly[10]);
    summary.top_categories = top(categories);
    summary.top_brands = top(brands);
    summary.years = years.into_iter().rev().collect();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn parses_prices() {
        assert_eq!(parse_price("1,299.50"), 1299.5);
        assert_eq!(parse_price("¥88"), 88.0);
        assert_eq!(parse_price(""), 0.0);
        assert_eq!(parse_price("n/a"), 0.0);
    }

    #[test]
    fn parses_dates() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        assert_eq!(parse_date("2026-03-05"), Some(d));
        assert_eq!(parse_date("2026/3/5"), Some(d));
        assert_eq!(parse_date("2026年3月5日"), Some(d));
        assert_eq!(parse_date("2026-03-05T10:00:00"), Some(d));
        assert_eq!(parse_date("yesterday"), None);
        assert_eq!(parse_date("2026年13月5日"), None);
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Vec<(Collection, Vec<Record>)> {
        vec![
            (
                Collection::Purchases,
                vec![
                    rec(&[("价格", "100"), ("购买日期", "2026-01-15"), ("分类", "上衣"), ("品牌", "Muji")]),
                    rec(&[("价格", "1,000"), ("购买日期", "2026年3月2日"), ("类型", "外套"), ("品牌", "")]),
                    rec(&[("价格", "50"), ("购买日期", "2025-12-31"), ("分类", "上衣"), ("品牌", "Muji")]),
                    rec(&[("价格", "7")]),
                ],
            ),
            (
                Collection::Inventory,
                vec![
                    rec(&[("状态", "正在使用")]),
                    rec(&[("状态", "已售出")]),
                ],
            ),
            (Collection::Storage, vec![rec(&[("状态", "已收纳换季")])]),
            (Collection::Discard, vec![]),
        ]
    }

    #[test]
    fn summarizes_spending() {
        // A past year: calendar months.
        let s = summarize(&sample(), 2026, day(2027, 6, 1));

        assert_eq!(s.purchases, 4);
        assert_eq!(s.inventory, 1);
        assert_eq!(s.storage, 1);
        assert_eq!(s.discard, 0);
        assert_eq!(s.total_cost, 1157.0);
        assert_eq!(s.year_cost, 1100.0);
        assert_eq!(s.year_count, 2);
        assert_eq!(s.previous_year_cost, 50.0);
        assert_eq!(s.yoy_growth, 2100.0);
        assert_eq!(s.monthly[0], 100.0);
        assert_eq!(s.monthly[2], 1000.0);
        assert_eq!(s.monthly[11], 0.0);
        assert_eq!(s.monthly_labels[0], "26/01");
        assert_eq!(s.monthly_labels[11], "26/12");
        assert_eq!(s.years, vec![2026, 2025]);

        let categories: Vec<(&str, f64)> = s.top_categories.iter().map(|c| (c.name.as_str(), c.total)).collect();
        assert_eq!(categories, vec![("外套", 1000.0), ("上衣", 150.0), ("其他", 7.0)]);
        let brands: Vec<(&str, f64)> = s.top_brands.iter().map(|b| (b.name.as_str(), b.total)).collect();
        assert_eq!(brands, vec![("无品牌", 1007.0), ("Muji", 150.0)]);
    }

    #[test]
    fn current_year_uses_rolling_months() {
        let s = summarize(&sample(), 2026, day(2026, 3, 20));

        assert_eq!(s.monthly_labels[0], "25/04");
        assert_eq!(s.monthly_labels[11], "26/03");
        assert_eq!(s.monthly[8], 50.0);
        assert_eq!(s.monthly[9], 100.0);
        assert_eq!(s.monthly[11], 1000.0);
        assert_eq!(s.mom_growth, 0.0);
        assert_eq!(s.year_cost, 1100.0);
    }

    #[test]
    fn top_lists_keep_five() {
        let purchases: Vec<Record> = (0..7)
            .map(|i| {
                let price = (i + 1).to_string();
                let brand = format!("B{}", i);
                rec(&[("价格", price.as_str()), ("品牌", brand.as_str())])
            })
            .collect();

        let s = summarize(&[(Collection::Purchases, purchases)], 2026, day(2026, 1, 1));

        assert_eq!(s.top_brands.len(), 5);
        assert_eq!(s.top_brands[0].name, "B6");
        assert_eq!(s.top_brands[4].name, "B2");
        assert!(s.years.is_empty());
    }
}
