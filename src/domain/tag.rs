//! 发布标签
//!
//! 形如 `YY.MMDD.HHMM.SS[FFF]`，旧标签可带 `_name` 后缀。
//! 标签解析为日历时刻后构成全序，用于判断竞争的部署哪个更新。

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2})\.(\d{2})(\d{2})\.(\d{2})(\d{2})\.(\d{2})(\d{3})?(?:_([A-Za-z0-9-]+))?$")
        .expect("static tag pattern")
});

/// 发布标签
///
/// 排序先按解析出的时刻，再按原始文本，保证严格全序。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeployTag {
    instant: NaiveDateTime,
    raw: String,
}

/// 标签解析错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("'{tag}' is not a valid deploy tag (expected YY.MMDD.HHMM.SS[FFF][_name]): {reason}")]
pub struct TagParseError {
    pub tag: String,
    pub reason: &'static str,
}

impl DeployTag {
    pub fn parse(raw: &str) -> Result<Self, TagParseError> {
        let err = |reason| TagParseError {
            tag: raw.to_string(),
            reason,
        };

        let caps = TAG_PATTERN.captures(raw).ok_or_else(|| err("malformed"))?;
        let num = |i: usize| -> u32 { caps.get(i).map_or(0, |m| m.as_str().parse().unwrap_or(0)) };

        let year = 2000 + num(1) as i32;
        let date =
            NaiveDate::from_ymd_opt(year, num(2), num(3)).ok_or_else(|| err("invalid date"))?;
        let instant = date
            .and_hms_milli_opt(num(4), num(5), num(6), num(7))
            .ok_or_else(|| err("invalid time"))?;

        Ok(Self {
            instant,
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn instant(&self) -> NaiveDateTime {
        self.instant
    }

    /// 是否严格晚于另一个标签
    pub fn is_newer_than(&self, other: &DeployTag) -> bool {
        self.instant > other.instant
    }
}

impl FromStr for DeployTag {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeployTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_basic() {
        let tag = DeployTag::parse("25.0615.1000.00").unwrap();
        let t = tag.instant();
        assert_eq!((t.year(), t.month(), t.day()), (2025, 6, 15));
        assert_eq!((t.hour(), t.minute(), t.second()), (10, 0, 0));
        assert_eq!(tag.as_str(), "25.0615.1000.00");
    }

    #[test]
    fn test_parse_millis_and_legacy_suffix() {
        let tag = DeployTag::parse("24.1231.2359.59123_hotfix").unwrap();
        assert_eq!(tag.instant().nanosecond(), 123_000_000);
        assert_eq!(tag.to_string(), "24.1231.2359.59123_hotfix");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(DeployTag::parse("").is_err());
        assert!(DeployTag::parse("latest").is_err());
        assert!(DeployTag::parse("25.1315.1000.00").is_err());
        assert!(DeployTag::parse("25.0230.1000.00").is_err());
        assert!(DeployTag::parse("25.0615.2500.00").is_err());
        assert!(DeployTag::parse("25.0615.1000.00; rm -rf /").is_err());
    }

    #[test]
    fn test_newer_than() {
        let older = DeployTag::parse("25.0615.0900.00").unwrap();
        let newer = DeployTag::parse("25.0615.1000.00").unwrap();
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(!older.is_newer_than(&older));
    }

    #[test]
    fn test_order_matches_chronology() {
        let mut tags: Vec<(DeployTag, NaiveDateTime)> = Vec::new();
        for (yy, mo, dd, hh, mi, ss, ms) in [
            (24, 1, 31, 23, 59, 59, 999),
            (25, 1, 1, 0, 0, 0, 0),
            (25, 1, 1, 0, 0, 0, 1),
            (25, 6, 15, 9, 0, 0, 0),
            (25, 6, 15, 10, 0, 0, 0),
            (25, 12, 1, 0, 0, 30, 0),
            (26, 2, 28, 12, 30, 0, 500),
        ] {
            let raw = format!("{:02}.{:02}{:02}.{:02}{:02}.{:02}{:03}", yy, mo, dd, hh, mi, ss, ms);
            let expected = NaiveDate::from_ymd_opt(2000 + yy, mo, dd)
                .unwrap()
                .and_hms_milli_opt(hh, mi, ss, ms)
                .unwrap();
            tags.push((DeployTag::parse(&raw).unwrap(), expected));
        }

        for (a, ta) in &tags {
            for (b, tb) in &tags {
                assert_eq!(a.cmp(b), ta.cmp(tb), "{} vs {}", a, b);
                assert_eq!(a.is_newer_than(b), ta > tb);
            }
        }
    }

    #[test]
    fn test_same_instant_is_still_totally_ordered() {
        let plain = DeployTag::parse("25.0615.1000.00").unwrap();
        let named = DeployTag::parse("25.0615.1000.00_legacy").unwrap();
        assert_ne!(plain, named);
        assert_ne!(plain.cmp(&named), std::cmp::Ordering::Equal);
        assert!(!plain.is_newer_than(&named) && !named.is_newer_than(&plain));
    }
}
