//! Query tables built once at startup: the statement grammar, the instance
//! property table and the aggregate function table.
//!
//! Parsing and execution of full queries live outside the server core; these
//! tables only classify statements and expose lookups.

use std::collections::BTreeMap;

use crate::instance::Instance;

const KEYWORDS: [&str; 11] = [
    "alter", "count", "create", "drop", "grant", "help", "list", "revoke", "select", "show",
    "timeit",
];

/// Statement classifier keyed by leading keyword.
#[derive(Debug, Clone)]
pub struct Grammar {
    keywords: Vec<&'static str>,
}

impl Grammar {
    /// Builds the keyword table.
    #[must_use]
    pub fn compile() -> Self {
        let mut keywords = KEYWORDS.to_vec();
        keywords.sort_unstable();
        Self { keywords }
    }

    /// Leading keyword of `statement`, matched case-insensitively.
    #[must_use]
    pub fn classify(&self, statement: &str) -> Option<&'static str> {
        let word = statement.split_whitespace().next()?.to_ascii_lowercase();
        self.keywords
            .binary_search(&word.as_str())
            .ok()
            .and_then(|index| self.keywords.get(index).copied())
    }
}

/// Renders one instance property.
pub type PropertyFn = fn(&Instance) -> String;

/// Named instance properties answerable by `show`.
#[derive(Debug, Clone)]
pub struct PropertyTable {
    props: BTreeMap<&'static str, PropertyFn>,
}

impl PropertyTable {
    /// Table of every `show` property.
    #[must_use]
    pub fn new() -> Self {
        let entries: [(&'static str, PropertyFn); 15] = [
            ("buffer_path", |i| i.buffer_path().display().to_string()),
            ("buffer_size", |i| i.metadata().buffer_size.to_string()),
            ("dbname", |i| i.name().to_owned()),
            ("dbpath", |i| i.dbpath().display().to_string()),
            ("drop_threshold", |i| i.metadata().drop_threshold.to_string()),
            ("pool", |i| i.pools().local_pool.to_string()),
            ("pools", |i| i.pools().pool_count().to_string()),
            ("series", |i| i.series().len().to_string()),
            ("servers", |i| i.servers().len().to_string()),
            ("shard_duration", |i| i.metadata().shard_duration.to_string()),
            ("shards", |i| i.shards().len().to_string()),
            ("start_ts", |i| {
                i.start_ts().map_or_else(|| "-".to_owned(), |ts| ts.to_string())
            }),
            ("time_precision", |i| i.metadata().time_precision.as_str().to_owned()),
            ("timezone", |i| i.metadata().timezone.clone()),
            ("users", |i| i.users().len().to_string()),
        ];
        Self {
            props: entries.into_iter().collect(),
        }
    }

    /// Renderer for the property `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<PropertyFn> {
        self.props.get(name).copied()
    }

    /// Property names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.props.keys().copied()
    }
}

impl Default for PropertyTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Reduces a set of values to one.
pub type AggregateFn = fn(&[u64]) -> Option<u64>;

/// Named aggregate functions.
#[derive(Debug, Clone)]
pub struct AggregateTable {
    functions: BTreeMap<&'static str, AggregateFn>,
}

impl AggregateTable {
    /// Table of the built-in aggregates.
    #[must_use]
    pub fn new() -> Self {
        let entries: [(&'static str, AggregateFn); 6] = [
            ("count", |values| u64::try_from(values.len()).ok()),
            ("max", |values| values.iter().copied().max()),
            ("mean", mean),
            ("median", median),
            ("min", |values| values.iter().copied().min()),
            ("sum", |values| {
                values.iter().try_fold(0_u64, |total, value| total.checked_add(*value))
            }),
        ];
        Self {
            functions: entries.into_iter().collect(),
        }
    }

    /// Aggregate function `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<AggregateFn> {
        self.functions.get(name).copied()
    }

    /// Applies the aggregate `name` to `values`. `None` for unknown names,
    /// empty input, or overflow.
    #[must_use]
    pub fn apply(&self, name: &str, values: &[u64]) -> Option<u64> {
        self.get(name)?(values)
    }
}

impl Default for AggregateTable {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: &[u64]) -> Option<u64> {
    let total: u128 = values.iter().map(|value| u128::from(*value)).sum();
    let count = u128::try_from(values.len()).ok().filter(|count| *count > 0)?;
    u64::try_from(total.checked_div(count)?).ok()
}

fn median(values: &[u64]) -> Option<u64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let middle = sorted.len().checked_div(2)?;
    if !sorted.len().is_multiple_of(2) {
        return sorted.get(middle).copied();
    }
    let low = u128::from(*sorted.get(middle.checked_sub(1)?)?);
    let high = u128::from(*sorted.get(middle)?);
    u64::try_from((low + high).checked_div(2)?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::DatabaseMetadata;
    use rstest::rstest;
    use std::path::PathBuf;

    #[rstest]
    #[case("select * from 'cpu'", Some("select"))]
    #[case("  SHOW dbname", Some("show"))]
    #[case("list series", Some("list"))]
    #[case("explode now", None)]
    #[case("", None)]
    fn classifies_leading_keyword(#[case] statement: &str, #[case] expected: Option<&str>) {
        assert_eq!(Grammar::compile().classify(statement), expected);
    }

    #[test]
    fn properties_render_instance_state() {
        let path = PathBuf::from("/srv/tidewater/weather/");
        let instance = Instance::new(
            "weather",
            path.clone(),
            path,
            DatabaseMetadata::new("weather"),
        );
        let table = PropertyTable::new();
        let render = |name: &str| table.get(name).map(|prop| prop(&instance));
        assert_eq!(render("dbname").as_deref(), Some("weather"));
        assert_eq!(render("time_precision").as_deref(), Some("ms"));
        assert_eq!(render("start_ts").as_deref(), Some("-"));
        assert_eq!(render("uptime"), None);
        assert!(table.names().any(|name| name == "shards"));
    }

    #[rstest]
    #[case("count", &[4, 1, 3], Some(3))]
    #[case("sum", &[4, 1, 3], Some(8))]
    #[case("mean", &[4, 1, 3], Some(2))]
    #[case("median", &[4, 1, 3, 10], Some(3))]
    #[case("median", &[4, 1, 3], Some(3))]
    #[case("median", &[], None)]
    #[case("min", &[], None)]
    #[case("mean", &[], None)]
    #[case("sum", &[u64::MAX, 1], None)]
    #[case("stddev", &[1], None)]
    fn aggregates(#[case] name: &str, #[case] values: &[u64], #[case] expected: Option<u64>) {
        assert_eq!(AggregateTable::new().apply(name, values), expected);
    }
}
