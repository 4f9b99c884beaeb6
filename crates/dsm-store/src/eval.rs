//! Query evaluation over materialized rows, shared by in-process backends.

use std::cmp::Ordering;

use dsm_query::{Direction, Filter, FinalizedQuery, Order, KEY_PROPERTY};
use dsm_types::{Key, PropertyMap, PropertyValue};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

pub(crate) type Row = (Key, PropertyMap);

/// Position encoded inside cursors handed out by in-process backends.
#[derive(Serialize, Deserialize)]
struct CursorState {
    position: u64,
}

pub(crate) fn encode_cursor(position: usize) -> StoreResult<dsm_types::Cursor> {
    let bytes = bincode::serialize(&CursorState {
        position: position as u64,
    })
    .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(dsm_types::Cursor::from_bytes(bytes))
}

pub(crate) fn decode_cursor(cursor: &dsm_types::Cursor) -> StoreResult<usize> {
    let state: CursorState = bincode::deserialize(cursor.as_bytes())
        .map_err(|e| StoreError::InvalidCursor(format!("{cursor}: {e}")))?;
    usize::try_from(state.position)
        .map_err(|_| StoreError::InvalidCursor(format!("{cursor}: position out of range")))
}

/// Does the row satisfy the query's kind, ancestor and filters, and carry
/// every property the query sorts on or projects?
pub(crate) fn matches(query: &FinalizedQuery, key: &Key, props: &PropertyMap) -> bool {
    if !query.kind().is_empty() && key.kind() != query.kind() {
        return false;
    }
    if let Some(ancestor) = query.ancestor() {
        if !key.has_ancestor(ancestor) {
            return false;
        }
    }
    if !query.filters().iter().all(|f| filter_accepts(f, key, props)) {
        return false;
    }
    let sorted_present = query
        .orders()
        .iter()
        .all(|o| o.property == KEY_PROPERTY || props.first_value(&o.property).is_some());
    sorted_present && query.projection().iter().all(|p| props.contains(p))
}

fn filter_accepts(filter: &Filter, key: &Key, props: &PropertyMap) -> bool {
    if filter.property == KEY_PROPERTY {
        let value = PropertyValue::Key(key.clone());
        return filter.op.accepts(value.cmp_value(&filter.value));
    }
    // Multi-valued properties match if any value matches.
    match props.get(&filter.property) {
        Some(prop) => prop
            .values()
            .iter()
            .any(|v| filter.op.accepts(v.cmp_value(&filter.value))),
        None => false,
    }
}

/// Sort rows in place by the query's normalized orders.
pub(crate) fn sort(query: &FinalizedQuery, rows: &mut [Row]) {
    rows.sort_by(|a, b| {
        for order in query.orders() {
            let ord = compare(order, a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn compare(order: &Order, a: &Row, b: &Row) -> Ordering {
    let ord = if order.property == KEY_PROPERTY {
        a.0.cmp(&b.0)
    } else {
        match (sort_value(order, &a.1), sort_value(order, &b.1)) {
            (Some(x), Some(y)) => x.cmp_value(y),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    };
    match order.direction {
        Direction::Ascending => ord,
        Direction::Descending => ord.reverse(),
    }
}

/// Ascending orders sort a repeated property by its smallest value,
/// descending orders by its largest.
fn sort_value<'a>(order: &Order, props: &'a PropertyMap) -> Option<&'a PropertyValue> {
    let values = props.get(&order.property)?.values();
    match order.direction {
        Direction::Ascending => values.iter().min_by(|x, y| x.cmp_value(y)),
        Direction::Descending => values.iter().max_by(|x, y| x.cmp_value(y)),
    }
}

/// Apply projection and distinct to sorted rows.
pub(crate) fn project(query: &FinalizedQuery, rows: Vec<Row>) -> Vec<Row> {
    if query.projection().is_empty() {
        return rows;
    }
    let mut out: Vec<Row> = Vec::with_capacity(rows.len());
    for (key, props) in rows {
        let Some(projected) = props.project(query.projection()) else {
            continue;
        };
        if query.is_distinct() && out.iter().any(|(_, seen)| seen == &projected) {
            continue;
        }
        out.push((key, projected));
    }
    out
}

/// Index range `[begin, end)` of `total` sorted rows selected by the query's
/// cursors, offset and limit.
pub(crate) fn window(query: &FinalizedQuery, total: usize) -> StoreResult<(usize, usize)> {
    let start = match query.start() {
        Some(c) => decode_cursor(c)?.min(total),
        None => 0,
    };
    let mut end = match query.end() {
        Some(c) => decode_cursor(c)?.min(total),
        None => total,
    };
    let begin = start
        .saturating_add(query.offset().unwrap_or(0) as usize)
        .min(total);
    if let Some(limit) = query.limit() {
        end = end.min(begin.saturating_add(limit as usize));
    }
    Ok((begin, end.max(begin)))
}
