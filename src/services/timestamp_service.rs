use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

static FILE_STAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\D|^)(?P<ymd>(?:19|20|21)\d{6})\D?(?P<hms>\d{6})(?:\D|$)").unwrap()
});

const OFFSET_DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%a %b %e %H:%M:%S %z %Y",
];

const NAIVE_DATETIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H.%M.%S",
    "%Y-%m-%d at %H.%M.%S",
    "Screenshot %Y-%m-%d at %H.%M.%S",
    "%Y-%m-%d_%H-%M-%S",
    "%Y-%m-%d-%H-%M-%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%B %d, %Y %H:%M:%S",
    "%B %d, %Y %H:%M",
    "%B %d %Y %H:%M:%S",
    "%d %B %Y %H:%M:%S",
    "%d %B %Y %H:%M",
    "%a %b %e %H:%M:%S %Y",
];

const DATE_LAYOUTS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
];

const MEDIA_PREFIXES: &[&str] = &["img_", "vid_"];

fn strip_prefix_ignore_case<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let head = name.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &name[prefix.len()..])
}

fn parse_layouts(stem: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(stem) {
        return Some(parsed.with_timezone(&Utc));
    }
    for layout in OFFSET_DATETIME_LAYOUTS {
        if let Ok(parsed) = DateTime::parse_from_str(stem, layout) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    for layout in NAIVE_DATETIME_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stem, layout) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(stem, layout) {
            return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

fn parse_file_stamp(stem: &str) -> Option<DateTime<Utc>> {
    let caps = FILE_STAMP.captures(stem)?;
    let stamp = format!("{}{}", &caps["ymd"], &caps["hms"]);
    NaiveDateTime::parse_from_str(&stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Best guess at when a media file was captured, judged from its name.
/// Falls back to `mod_time` when the name carries no usable date.
pub fn guess_file_created(file_name: &str, mod_time: DateTime<Utc>) -> DateTime<Utc> {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name);

    let mut name = base;
    for prefix in MEDIA_PREFIXES {
        if let Some(rest) = strip_prefix_ignore_case(name, prefix) {
            name = rest;
            break;
        }
    }
    let stem = match name.rfind('.') {
        Some(dot) => &name[..dot],
        None => name,
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(stem) {
        return parsed.with_timezone(&Utc);
    }
    if let Some(parsed) = parse_layouts(stem) {
        return parsed;
    }
    if let Some(parsed) = parse_file_stamp(stem) {
        return parsed;
    }
    mod_time
}
