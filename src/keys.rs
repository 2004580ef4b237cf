//! Canonical cache key generation.
//!
//! Every cached payload is addressed by a deterministic string key derived
//! from the query descriptor that produced it. Keys are built from delimited
//! segments rather than ambiguous concatenation:
//!
//! - each kind owns a disjoint namespace prefix (`filtered:`, `ranking:`, ...)
//! - segments are joined with `|`
//! - multi-valued fields are joined with `,` in caller-provided order
//! - range bounds render explicitly as `min~max`, an absent bound renders as
//!   an empty side
//! - absent optional fields render as empty segments, never a `null`-like
//!   literal that could collide with a real value
//!
//! Encoding never fails. Key strings are an internal contract between this
//! codec and the store; callers must not parse them.

use crate::query::{ CacheKind, DateRange, FilterQuery, NumericRange, QueryDescriptor, RankingQuery };

/// Fixed key of the persisted favorites identifier set.
pub const FAVORITES_KEY: &str = "favorites:ids";

const SEGMENT_DELIMITER: &str = "|";
const LIST_DELIMITER: &str = ",";
const RANGE_DELIMITER: &str = "~";
const DATE_FORMAT: &str = "%Y%m%d";

/// Key of the distinguished primary fund list entry.
pub fn fund_list_key() -> String {
    format!("{}all", CacheKind::FundList.prefix())
}

/// Encode a query descriptor into its canonical cache key.
pub fn encode(descriptor: &QueryDescriptor) -> String {
    match descriptor {
        QueryDescriptor::FundList => fund_list_key(),
        QueryDescriptor::Filtered(query) => {
            format!("{}{}", descriptor.kind().prefix(), filter_segments(query, true))
        }
        QueryDescriptor::Ranking(query) => {
            format!("{}{}", descriptor.kind().prefix(), ranking_segments(query))
        }
        QueryDescriptor::FilterOptions(query) => {
            format!("{}{}", descriptor.kind().prefix(), query.option_type)
        }
    }
}

/// Key for the cached result count of a filter. Counts describe the whole
/// filtered set, so page and page size are not part of the key.
pub fn filter_count_key(query: &FilterQuery) -> String {
    format!("{}{}", CacheKind::FilterCount.prefix(), filter_segments(query, false))
}

fn filter_segments(query: &FilterQuery, paged: bool) -> String {
    let mut segments = vec![
        query.fund_types.join(LIST_DELIMITER),
        query.companies.join(LIST_DELIMITER),
        numeric_range_segment(query.scale_range.as_ref()),
        date_range_segment(query.date_range.as_ref()),
        query.risk_levels.join(LIST_DELIMITER),
        numeric_range_segment(query.return_range.as_ref()),
        query.statuses.join(LIST_DELIMITER),
        query.sort_by.clone().unwrap_or_default(),
        query.sort_direction.as_str().to_string()
    ];

    if paged {
        segments.push(query.page.to_string());
        segments.push(query.page_size.to_string());
    }

    segments.join(SEGMENT_DELIMITER)
}

fn ranking_segments(query: &RankingQuery) -> String {
    [
        query.ranking_type.clone(),
        query.period.clone(),
        query.fund_type.clone().unwrap_or_default(),
        query.company.clone().unwrap_or_default(),
        query.sort_by.clone().unwrap_or_default(),
        query.page.to_string(),
        query.page_size.to_string(),
    ].join(SEGMENT_DELIMITER)
}

fn numeric_range_segment(range: Option<&NumericRange>) -> String {
    match range {
        Some(range) => {
            format!(
                "{}{}{}",
                range.min.map(|v| v.to_string()).unwrap_or_default(),
                RANGE_DELIMITER,
                range.max.map(|v| v.to_string()).unwrap_or_default()
            )
        }
        None => String::new(),
    }
}

fn date_range_segment(range: Option<&DateRange>) -> String {
    match range {
        Some(range) => {
            format!(
                "{}{}{}",
                range.start.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default(),
                RANGE_DELIMITER,
                range.end.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default()
            )
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{ FilterOptionsQuery, SortDirection };
    use chrono::NaiveDate;

    fn sample_filter() -> FilterQuery {
        FilterQuery {
            fund_types: vec!["股票型".to_string(), "混合型".to_string()],
            companies: vec!["华夏基金".to_string()],
            scale_range: Some(NumericRange::new(Some(0.5), Some(100.0))),
            date_range: Some(DateRange {
                start: NaiveDate::from_ymd_opt(2020, 1, 1),
                end: None,
            }),
            risk_levels: vec!["R3".to_string()],
            return_range: None,
            statuses: vec!["open".to_string()],
            sort_by: Some("return_1y".to_string()),
            sort_direction: SortDirection::Descending,
            page: 1,
            page_size: 20,
        }
    }

    #[test]
    fn test_key_determinism() {
        let a = QueryDescriptor::Filtered(sample_filter());
        let b = QueryDescriptor::Filtered(sample_filter());
        assert_eq!(a, b);
        assert_eq!(encode(&a), encode(&b));
    }

    #[test]
    fn test_page_changes_key() {
        let mut other = sample_filter();
        other.page = 2;
        assert_ne!(
            encode(&QueryDescriptor::Filtered(sample_filter())),
            encode(&QueryDescriptor::Filtered(other))
        );
    }

    #[test]
    fn test_field_order_is_significant() {
        let mut reordered = sample_filter();
        reordered.fund_types = vec!["混合型".to_string(), "股票型".to_string()];
        assert_ne!(
            encode(&QueryDescriptor::Filtered(sample_filter())),
            encode(&QueryDescriptor::Filtered(reordered))
        );
    }

    #[test]
    fn test_kind_prefixes_are_disjoint() {
        let keys = [
            encode(&QueryDescriptor::FundList),
            encode(&QueryDescriptor::Filtered(FilterQuery::default())),
            encode(&QueryDescriptor::Ranking(RankingQuery::default())),
            encode(
                &QueryDescriptor::FilterOptions(FilterOptionsQuery {
                    option_type: "company".to_string(),
                })
            ),
            filter_count_key(&FilterQuery::default()),
            FAVORITES_KEY.to_string(),
        ];

        for (i, a) in keys.iter().enumerate() {
            for (j, b) in keys.iter().enumerate() {
                if i != j {
                    let prefix_a = a.split(':').next().unwrap();
                    let prefix_b = b.split(':').next().unwrap();
                    assert_ne!(prefix_a, prefix_b, "{} and {} share a prefix", a, b);
                }
            }
        }
    }

    #[test]
    fn test_absent_fields_do_not_collide_with_literals() {
        let absent = FilterQuery::default();
        let mut literal = FilterQuery::default();
        literal.sort_by = Some("null".to_string());
        assert_ne!(
            encode(&QueryDescriptor::Filtered(absent)),
            encode(&QueryDescriptor::Filtered(literal))
        );
    }

    #[test]
    fn test_range_bounds_are_explicit() {
        let mut open_min = FilterQuery::default();
        open_min.scale_range = Some(NumericRange::new(None, Some(5.0)));
        let mut open_max = FilterQuery::default();
        open_max.scale_range = Some(NumericRange::new(Some(5.0), None));
        assert_ne!(
            encode(&QueryDescriptor::Filtered(open_min)),
            encode(&QueryDescriptor::Filtered(open_max))
        );
    }

    #[test]
    fn test_filter_count_key_is_page_independent() {
        let mut other = sample_filter();
        other.page = 7;
        assert_eq!(filter_count_key(&sample_filter()), filter_count_key(&other));
        assert_ne!(filter_count_key(&sample_filter()), encode(&QueryDescriptor::Filtered(sample_filter())));
    }
}
