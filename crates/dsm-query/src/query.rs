//! [`Query`] builder and its immutable [`FinalizedQuery`] form.

use std::collections::BTreeSet;
use std::fmt;

use dsm_types::{Cursor, Key, PropertyValue};

use crate::error::{QueryError, QueryResult};

/// Pseudo-property naming the entity key in filters and sort orders.
pub const KEY_PROPERTY: &str = "__key__";

/// Comparison operator of a [`Filter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    pub fn is_inequality(self) -> bool {
        !matches!(self, Self::Eq)
    }

    /// Does a value comparing `ordering` to the filter operand pass?
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ordering == Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        };
        f.write_str(s)
    }
}

/// `property op value` restriction.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub property: String,
    pub op: FilterOp,
    pub value: PropertyValue,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Sort order on one property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub property: String,
    pub direction: Direction,
}

impl Order {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}

/// Mutable query description. Every builder method consumes and returns the
/// query, so a base query can be cloned and specialized.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    kind: String,
    ancestor: Option<Key>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    projection: Vec<String>,
    distinct: bool,
    keys_only: bool,
    limit: Option<u32>,
    offset: Option<u32>,
    start: Option<Cursor>,
    end: Option<Cursor>,
    eventual_consistency: bool,
}

impl Query {
    /// A query over entities of `kind`. Pass `""` for a kindless query.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Restrict results to `ancestor` and its descendants.
    pub fn ancestor(mut self, ancestor: Key) -> Self {
        self.ancestor = Some(ancestor);
        self
    }

    pub fn filter(
        mut self,
        property: impl Into<String>,
        op: FilterOp,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.filters.push(Filter {
            property: property.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality filter.
    pub fn filter_eq(self, property: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.filter(property, FilterOp::Eq, value)
    }

    pub fn order(mut self, property: impl Into<String>) -> Self {
        self.orders.push(Order::asc(property));
        self
    }

    pub fn order_desc(mut self, property: impl Into<String>) -> Self {
        self.orders.push(Order::desc(property));
        self
    }

    /// Return only the named properties.
    pub fn project<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection.extend(properties.into_iter().map(Into::into));
        self
    }

    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn keys_only(mut self, keys_only: bool) -> Self {
        self.keys_only = keys_only;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Resume after the position `cursor` was taken at.
    pub fn start(mut self, cursor: Cursor) -> Self {
        self.start = Some(cursor);
        self
    }

    /// Stop at the position `cursor` was taken at.
    pub fn end(mut self, cursor: Cursor) -> Self {
        self.end = Some(cursor);
        self
    }

    pub fn eventual_consistency(mut self, eventual: bool) -> Self {
        self.eventual_consistency = eventual;
        self
    }

    /// Check the query for contradictions and produce its immutable form.
    ///
    /// The returned query has normalized sort orders: orders on properties
    /// pinned by an equality filter are dropped, an inequality property with
    /// no explicit order is sorted ascending, and `__key__` ascending is
    /// appended as the final tie-breaker.
    pub fn finalize(&self) -> QueryResult<FinalizedQuery> {
        self.check_names()?;
        self.check_kindless()?;
        self.check_key_filters()?;

        if let Some(ancestor) = &self.ancestor {
            if !ancestor.is_complete() {
                return Err(QueryError::IncompleteAncestor(ancestor.to_string()));
            }
        }
        if self.keys_only && !self.projection.is_empty() {
            return Err(QueryError::KeysOnlyProjection);
        }
        if self.distinct && self.projection.is_empty() {
            return Err(QueryError::DistinctWithoutProjection);
        }

        let inequality = self.inequality_property()?;
        if let (Some(ineq), Some(first)) = (&inequality, self.orders.first()) {
            if &first.property != ineq {
                return Err(QueryError::FirstOrderMismatch {
                    inequality: ineq.clone(),
                    order: first.property.clone(),
                });
            }
        }

        let equality: BTreeSet<&str> = self
            .filters
            .iter()
            .filter(|f| !f.op.is_inequality())
            .map(|f| f.property.as_str())
            .collect();
        self.check_projection(&equality)?;

        Ok(FinalizedQuery {
            kind: self.kind.clone(),
            ancestor: self.ancestor.clone(),
            filters: self.filters.clone(),
            orders: self.normalized_orders(inequality.as_deref(), &equality),
            projection: self.projection.clone(),
            distinct: self.distinct,
            keys_only: self.keys_only,
            limit: self.limit,
            offset: self.offset,
            start: self.start.clone(),
            end: self.end.clone(),
            eventual_consistency: self.eventual_consistency,
        })
    }

    fn check_names(&self) -> QueryResult<()> {
        if self.filters.iter().any(|f| f.property.is_empty()) {
            return Err(QueryError::EmptyPropertyName("filter"));
        }
        if self.orders.iter().any(|o| o.property.is_empty()) {
            return Err(QueryError::EmptyPropertyName("order"));
        }
        if self.projection.iter().any(String::is_empty) {
            return Err(QueryError::EmptyPropertyName("projection"));
        }
        Ok(())
    }

    fn check_kindless(&self) -> QueryResult<()> {
        if !self.kind.is_empty() {
            return Ok(());
        }
        if let Some(f) = self.filters.iter().find(|f| f.property != KEY_PROPERTY) {
            return Err(QueryError::Kindless(format!("filter on {}", f.property)));
        }
        if let Some(o) = self
            .orders
            .iter()
            .find(|o| o.property != KEY_PROPERTY || o.direction == Direction::Descending)
        {
            return Err(QueryError::Kindless(format!("order on {}", o.property)));
        }
        if !self.projection.is_empty() {
            return Err(QueryError::Kindless("project properties".to_string()));
        }
        Ok(())
    }

    fn check_key_filters(&self) -> QueryResult<()> {
        for f in self.filters.iter().filter(|f| f.property == KEY_PROPERTY) {
            if !matches!(f.value, PropertyValue::Key(_)) {
                return Err(QueryError::KeyFilterType(f.value.type_name()));
            }
        }
        Ok(())
    }

    fn inequality_property(&self) -> QueryResult<Option<String>> {
        let mut found: Option<&str> = None;
        for f in self.filters.iter().filter(|f| f.op.is_inequality()) {
            match found {
                None => found = Some(f.property.as_str()),
                Some(prev) if prev != f.property => {
                    return Err(QueryError::MultipleInequality {
                        first: prev.to_string(),
                        second: f.property.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(found.map(str::to_string))
    }

    fn check_projection(&self, equality: &BTreeSet<&str>) -> QueryResult<()> {
        let mut seen = BTreeSet::new();
        for p in &self.projection {
            if p == KEY_PROPERTY {
                return Err(QueryError::InvalidProjection(p.clone()));
            }
            if equality.contains(p.as_str()) {
                return Err(QueryError::ProjectedEqualityFilter(p.clone()));
            }
            if !seen.insert(p.as_str()) {
                return Err(QueryError::DuplicateProjection(p.clone()));
            }
        }
        Ok(())
    }

    fn normalized_orders(&self, inequality: Option<&str>, equality: &BTreeSet<&str>) -> Vec<Order> {
        let mut orders: Vec<Order> = Vec::with_capacity(self.orders.len() + 1);
        if let (Some(ineq), true) = (inequality, self.orders.is_empty()) {
            orders.push(Order::asc(ineq));
        }
        for order in &self.orders {
            if equality.contains(order.property.as_str()) {
                continue;
            }
            if orders.iter().any(|o| o.property == order.property) {
                continue;
            }
            orders.push(order.clone());
            if order.property == KEY_PROPERTY {
                // Keys are unique; later orders can never apply.
                return orders;
            }
        }
        orders.push(Order::asc(KEY_PROPERTY));
        orders
    }
}

/// Immutable, validated query ready for execution by a raw store.
///
/// Obtained from [`Query::finalize`]. A finalized query can be run any number
/// of times.
#[derive(Clone, Debug, PartialEq)]
pub struct FinalizedQuery {
    kind: String,
    ancestor: Option<Key>,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    projection: Vec<String>,
    distinct: bool,
    keys_only: bool,
    limit: Option<u32>,
    offset: Option<u32>,
    start: Option<Cursor>,
    end: Option<Cursor>,
    eventual_consistency: bool,
}

impl FinalizedQuery {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ancestor(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Normalized sort orders; always ends with an order on `__key__`.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> Option<u32> {
        self.offset
    }

    pub fn start(&self) -> Option<&Cursor> {
        self.start.as_ref()
    }

    pub fn end(&self) -> Option<&Cursor> {
        self.end.as_ref()
    }

    pub fn is_eventually_consistent(&self) -> bool {
        self.eventual_consistency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_key(id: &str) -> Key {
        Key::new("", "", "User", id, 0, None)
    }

    // -----------------------------------------------------------------------
    // Normalization
    // -----------------------------------------------------------------------

    #[test]
    fn plain_query_orders_by_key() {
        let fq = Query::new("User").finalize().unwrap();
        assert_eq!(fq.kind(), "User");
        assert_eq!(fq.orders(), &[Order::asc(KEY_PROPERTY)]);
        assert!(!fq.is_keys_only());
    }

    #[test]
    fn inequality_property_is_sorted_first() {
        let fq = Query::new("User")
            .filter("age", FilterOp::Gt, 18i64)
            .finalize()
            .unwrap();
        assert_eq!(fq.orders(), &[Order::asc("age"), Order::asc(KEY_PROPERTY)]);
    }

    #[test]
    fn orders_on_equality_properties_are_dropped() {
        let fq = Query::new("User")
            .filter_eq("name", "a")
            .order("name")
            .order_desc("age")
            .finalize()
            .unwrap();
        assert_eq!(fq.orders(), &[Order::desc("age"), Order::asc(KEY_PROPERTY)]);
    }

    #[test]
    fn orders_after_key_order_are_dropped() {
        let fq = Query::new("User")
            .order_desc(KEY_PROPERTY)
            .order("age")
            .finalize()
            .unwrap();
        assert_eq!(fq.orders(), &[Order::desc(KEY_PROPERTY)]);
    }

    #[test]
    fn finalized_query_keeps_bounds() {
        let cursor = Cursor::from_bytes(vec![1, 2]);
        let fq = Query::new("User")
            .limit(5)
            .offset(2)
            .start(cursor.clone())
            .keys_only(true)
            .eventual_consistency(true)
            .finalize()
            .unwrap();
        assert_eq!(fq.limit(), Some(5));
        assert_eq!(fq.offset(), Some(2));
        assert_eq!(fq.start(), Some(&cursor));
        assert!(fq.end().is_none());
        assert!(fq.is_keys_only());
        assert!(fq.is_eventually_consistent());
    }

    #[test]
    fn builder_is_reusable_after_finalize() {
        let base = Query::new("User").filter_eq("name", "a");
        let keys = base.clone().keys_only(true).finalize().unwrap();
        let full = base.finalize().unwrap();
        assert!(keys.is_keys_only());
        assert!(!full.is_keys_only());
        assert_eq!(keys.filters(), full.filters());
    }

    // -----------------------------------------------------------------------
    // Rejections
    // -----------------------------------------------------------------------

    #[test]
    fn keys_only_with_projection_is_rejected() {
        let err = Query::new("User")
            .project(["name"])
            .keys_only(true)
            .finalize()
            .unwrap_err();
        assert_eq!(err, QueryError::KeysOnlyProjection);
    }

    #[test]
    fn distinct_needs_projection() {
        let err = Query::new("User").distinct(true).finalize().unwrap_err();
        assert_eq!(err, QueryError::DistinctWithoutProjection);
    }

    #[test]
    fn two_inequality_properties_are_rejected() {
        let err = Query::new("User")
            .filter("age", FilterOp::Gt, 1i64)
            .filter("height", FilterOp::Lt, 2i64)
            .finalize()
            .unwrap_err();
        assert!(matches!(err, QueryError::MultipleInequality { .. }));
    }

    #[test]
    fn first_order_must_match_inequality() {
        let err = Query::new("User")
            .filter("age", FilterOp::Ge, 1i64)
            .order("name")
            .finalize()
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::FirstOrderMismatch {
                inequality: "age".into(),
                order: "name".into()
            }
        );
    }

    #[test]
    fn incomplete_ancestor_is_rejected() {
        let err = Query::new("Post")
            .ancestor(Key::incomplete("", "", "User", None))
            .finalize()
            .unwrap_err();
        assert!(matches!(err, QueryError::IncompleteAncestor(_)));
    }

    #[test]
    fn kindless_query_only_allows_key_filters() {
        assert!(Query::new("")
            .filter(KEY_PROPERTY, FilterOp::Gt, user_key("a"))
            .finalize()
            .is_ok());
        let err = Query::new("").filter_eq("name", "a").finalize().unwrap_err();
        assert!(matches!(err, QueryError::Kindless(_)));
    }

    #[test]
    fn key_filter_needs_key_value() {
        let err = Query::new("User")
            .filter(KEY_PROPERTY, FilterOp::Eq, "a")
            .finalize()
            .unwrap_err();
        assert_eq!(err, QueryError::KeyFilterType("string"));
    }

    #[test]
    fn projection_rules() {
        let err = Query::new("User")
            .filter_eq("name", "a")
            .project(["name"])
            .finalize()
            .unwrap_err();
        assert_eq!(err, QueryError::ProjectedEqualityFilter("name".into()));

        let err = Query::new("User")
            .project(["age", "age"])
            .finalize()
            .unwrap_err();
        assert_eq!(err, QueryError::DuplicateProjection("age".into()));

        let err = Query::new("User").project([KEY_PROPERTY]).finalize().unwrap_err();
        assert!(matches!(err, QueryError::InvalidProjection(_)));
    }

    #[test]
    fn empty_property_names_are_rejected() {
        let err = Query::new("User").order("").finalize().unwrap_err();
        assert_eq!(err, QueryError::EmptyPropertyName("order"));
    }

    #[test]
    fn filter_op_accepts() {
        use std::cmp::Ordering;
        assert!(FilterOp::Le.accepts(Ordering::Equal));
        assert!(!FilterOp::Lt.accepts(Ordering::Equal));
        assert!(FilterOp::Ge.accepts(Ordering::Greater));
        assert_eq!(FilterOp::Ge.to_string(), ">=");
    }
}
