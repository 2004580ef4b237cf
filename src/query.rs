// Query descriptors and cache entry kinds.
use chrono::NaiveDate;
use serde::{ Deserialize, Serialize };

/// Category of a cached payload. Determines the key prefix and the order in
/// which entries are sacrificed under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheKind {
    FundList,
    FilteredList,
    FilterCount,
    FilterOptions,
    Ranking,
    Favorites,
}

impl CacheKind {
    /// Key namespace prefix. Prefixes are disjoint so keys of different kinds
    /// can never collide even when their field segments coincide.
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheKind::FundList => "fund_list:",
            CacheKind::FilteredList => "filtered:",
            CacheKind::FilterCount => "filter_count:",
            CacheKind::FilterOptions => "filter_options:",
            CacheKind::Ranking => "ranking:",
            CacheKind::Favorites => "favorites:",
        }
    }

    /// Eviction tie-break order: cheap-to-recompute kinds go first, the full
    /// fund list last. Favorites are never selected at all.
    pub fn eviction_priority(&self) -> u8 {
        match self {
            CacheKind::FilteredList => 0,
            CacheKind::Ranking => 1,
            CacheKind::FilterCount => 2,
            CacheKind::FilterOptions => 3,
            CacheKind::FundList => 4,
            CacheKind::Favorites => 5,
        }
    }
}

/// Requested sort direction for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// Inclusive numeric interval with optional bounds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }
}

/// Inclusive date interval with optional bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

/// Parameters of a filtered fund list request.
///
/// Multi-valued fields are order-significant for key generation: callers that
/// want order-independent caching must normalize ordering upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterQuery {
    pub fund_types: Vec<String>,
    pub companies: Vec<String>,
    pub scale_range: Option<NumericRange>,
    pub date_range: Option<DateRange>,
    pub risk_levels: Vec<String>,
    pub return_range: Option<NumericRange>,
    pub statuses: Vec<String>,
    pub sort_by: Option<String>,
    pub sort_direction: SortDirection,
    pub page: u32,
    pub page_size: u32,
}

/// Parameters of a paginated ranking request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingQuery {
    pub ranking_type: String,
    pub period: String,
    pub fund_type: Option<String>,
    pub company: Option<String>,
    pub sort_by: Option<String>,
    pub page: u32,
    pub page_size: u32,
}

/// Parameters of a filter-option enumeration request (e.g. the list of
/// distinct fund companies offered in the filter UI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptionsQuery {
    pub option_type: String,
}

/// Immutable description of exactly what was requested from the data layer.
/// Structurally equal descriptors always map to the same cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryDescriptor {
    FundList,
    Filtered(FilterQuery),
    Ranking(RankingQuery),
    FilterOptions(FilterOptionsQuery),
}

impl QueryDescriptor {
    pub fn kind(&self) -> CacheKind {
        match self {
            QueryDescriptor::FundList => CacheKind::FundList,
            QueryDescriptor::Filtered(_) => CacheKind::FilteredList,
            QueryDescriptor::Ranking(_) => CacheKind::Ranking,
            QueryDescriptor::FilterOptions(_) => CacheKind::FilterOptions,
        }
    }
}
