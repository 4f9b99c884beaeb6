//! Typed query execution.

use dsm_query::Query;
use dsm_store::CursorHandle;
use dsm_types::{Key, MultiError};
use tracing::debug;

use crate::datastore::Datastore;
use crate::entity::Entity;
use crate::error::{DatastoreError, DatastoreResult, MappingError};

type KeysFn<'a> = dyn FnMut(Key, &CursorHandle<'_>) -> bool + 'a;
type EntitiesFn<'a, T> = dyn FnMut(T, &CursorHandle<'_>) -> bool + 'a;

/// Per-result query callback. Returning `false` stops iteration.
pub enum Callback<'a, T> {
    /// Receives only keys. The query runs keys-only.
    Keys(Box<KeysFn<'a>>),
    /// Receives each result materialized as a `T`.
    Entities(Box<EntitiesFn<'a, T>>),
}

impl<'a, T> Callback<'a, T> {
    pub fn keys<F>(f: F) -> Self
    where
        F: FnMut(Key, &CursorHandle<'_>) -> bool + 'a,
    {
        Self::Keys(Box::new(f))
    }

    pub fn entities<F>(f: F) -> Self
    where
        F: FnMut(T, &CursorHandle<'_>) -> bool + 'a,
    {
        Self::Entities(Box::new(f))
    }
}

impl<T> std::fmt::Debug for Callback<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keys(_) => f.write_str("Callback::Keys"),
            Self::Entities(_) => f.write_str("Callback::Entities"),
        }
    }
}

impl Datastore {
    /// Run `query`, delivering each result to `callback`.
    ///
    /// A result that fails to load stops iteration; its error is returned
    /// unless the store itself failed.
    pub fn run<T: Entity>(&self, query: &Query, callback: Callback<'_, T>) -> DatastoreResult<()> {
        match callback {
            Callback::Keys(mut f) => {
                let fq = query.clone().keys_only(true).finalize()?;
                let mut delivered = 0usize;
                self.raw().run(&fq, &mut |key, _, cursor| {
                    delivered += 1;
                    f(key, cursor)
                })?;
                debug!(kind = fq.kind(), delivered, "keys query finished");
                Ok(())
            }
            Callback::Entities(mut f) => {
                let shape = self.inspect::<T>("run", false)?;
                let fq = query.finalize()?;
                let mut failure: Option<MappingError> = None;
                let mut delivered = 0usize;
                self.raw().run(&fq, &mut |key, props, cursor| {
                    let (entity, loaded) = shape.materialize(key, props.unwrap_or_default());
                    match loaded {
                        Ok(()) => {
                            delivered += 1;
                            f(entity, cursor)
                        }
                        Err(err) => {
                            failure = Some(err);
                            false
                        }
                    }
                })?;
                debug!(kind = fq.kind(), delivered, "query finished");
                match failure {
                    Some(err) => Err(err.into()),
                    None => Ok(()),
                }
            }
        }
    }

    /// Run `query` keys-only.
    pub fn run_keys<F>(&self, query: &Query, f: F) -> DatastoreResult<()>
    where
        F: FnMut(Key, &CursorHandle<'_>) -> bool,
    {
        self.run::<crate::GenericEntity>(query, Callback::keys(f))
    }

    /// Run `query`, materializing each result as a `T`.
    pub fn run_entities<T, F>(&self, query: &Query, f: F) -> DatastoreResult<()>
    where
        T: Entity,
        F: FnMut(T, &CursorHandle<'_>) -> bool,
    {
        self.run(query, Callback::entities(f))
    }

    /// Append every result of `query` to `dst`.
    ///
    /// Results that fail to load are still appended (blank, with their key
    /// set). Their errors are returned as a [`DatastoreError::Multi`] aligned
    /// with the final contents of `dst`.
    pub fn get_all<T: Entity>(&self, query: &Query, dst: &mut Vec<T>) -> DatastoreResult<()> {
        let shape = self.inspect::<T>("get_all", true)?;
        let fq = query.finalize()?;
        let mut errors: Vec<Option<DatastoreError>> =
            std::iter::repeat_with(|| None).take(dst.len()).collect();
        let mut failed = false;
        self.raw().run(&fq, &mut |key, props, _| {
            let (entity, loaded) = shape.materialize(key, props.unwrap_or_default());
            dst.push(entity);
            if let Err(err) = loaded {
                failed = true;
                errors.push(Some(err.into()));
            } else {
                errors.push(None);
            }
            true
        })?;
        debug!(kind = fq.kind(), total = dst.len(), failed, "get_all finished");
        if failed {
            return Err(DatastoreError::Multi(MultiError::from_vec(errors)));
        }
        Ok(())
    }

    /// Append the key of every result of `query` to `dst`.
    pub fn get_all_keys(&self, query: &Query, dst: &mut Vec<Key>) -> DatastoreResult<()> {
        let fq = query.clone().keys_only(true).finalize()?;
        self.raw().run(&fq, &mut |key, _, _| {
            dst.push(key);
            true
        })?;
        Ok(())
    }

    /// Number of results `query` matches.
    pub fn count(&self, query: &Query) -> DatastoreResult<usize> {
        let fq = query.clone().keys_only(true).finalize()?;
        Ok(self.raw().count(&fq)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Record;
    use crate::shape::EntityShape;
    use dsm_query::FilterOp;
    use dsm_store::{FailurePoint, InMemoryRawStore, RawStore, ResultArena, StoreError};
    use dsm_types::{Cursor, PropertyMap, PropertyValue};
    use serde::{Deserialize, Serialize};
    use std::borrow::Cow;
    use std::cell::Cell;
    use std::sync::Arc;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Post {
        #[serde(skip)]
        key: Option<Key>,
        title: String,
        votes: i64,
    }

    impl Record for Post {
        const KIND: &'static str = "Post";

        fn record_key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn set_record_key(&mut self, key: Key) {
            self.key = Some(key);
        }
    }

    thread_local! {
        static LOADS: Cell<usize> = const { Cell::new(0) };
    }

    /// Counts how often results are materialized.
    #[derive(Default)]
    struct Probe {
        key: Option<Key>,
    }

    impl Entity for Probe {
        const SHAPE: EntityShape = EntityShape::LoadSaver;

        fn new_blank() -> Self {
            Self::default()
        }

        fn kind(&self) -> Cow<'_, str> {
            Cow::Borrowed("Post")
        }

        fn key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn set_key(&mut self, key: Key) {
            self.key = Some(key);
        }

        fn save(&self) -> Result<PropertyMap, MappingError> {
            Ok(PropertyMap::new())
        }

        fn load(&mut self, _props: PropertyMap) -> Result<(), MappingError> {
            LOADS.with(|n| n.set(n.get() + 1));
            Ok(())
        }
    }

    fn loads() -> usize {
        LOADS.with(|n| n.get())
    }

    fn seeded() -> (Arc<InMemoryRawStore>, Datastore) {
        let store = Arc::new(InMemoryRawStore::new());
        let ds = Datastore::new(store.clone());
        let mut posts: Vec<Post> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, id)| Post {
                key: Some(ds.new_key("Post", *id, 0, None)),
                title: format!("post {id}"),
                votes: i as i64 * 10,
            })
            .collect();
        ds.put_multi(&mut posts).unwrap();
        (store, ds)
    }

    fn corrupt(store: &InMemoryRawStore, key: Key) {
        let mut out = ResultArena::new(1);
        store
            .put_multi(
                &[key],
                &[PropertyMap::new().with("votes", PropertyValue::from("many"))],
                &mut out,
            )
            .unwrap();
    }

    fn titles(posts: &[Post]) -> Vec<&str> {
        posts.iter().map(|p| p.title.as_str()).collect()
    }

    // -----------------------------------------------------------------------
    // Typed callbacks
    // -----------------------------------------------------------------------

    #[test]
    fn entities_are_materialized_in_order() {
        let (_, ds) = seeded();
        let mut seen = Vec::new();
        ds.run_entities(&Query::new("Post").order_desc("votes"), |p: Post, _| {
            assert!(p.key.is_some());
            seen.push(p);
            true
        })
        .unwrap();
        assert_eq!(
            titles(&seen),
            vec!["post e", "post d", "post c", "post b", "post a"]
        );
    }

    #[test]
    fn returning_false_stops_after_k_results() {
        let (_, ds) = seeded();
        let mut delivered = 0;
        ds.run(
            &Query::new("Post"),
            Callback::entities(|_: Post, _| {
                delivered += 1;
                delivered < 2
            }),
        )
        .unwrap();
        assert_eq!(delivered, 2);
    }

    #[test]
    fn cursor_resumes_where_iteration_stopped() {
        let (_, ds) = seeded();
        let query = Query::new("Post").order("votes");
        let mut cursor: Option<Cursor> = None;
        let mut first = Vec::new();
        ds.run_entities(&query, |p: Post, c| {
            first.push(p);
            if first.len() == 2 {
                cursor = Some(c.cursor().unwrap());
                return false;
            }
            true
        })
        .unwrap();

        let mut rest = Vec::new();
        ds.get_all(&query.clone().start(cursor.unwrap()), &mut rest)
            .unwrap();
        assert_eq!(titles(&first), vec!["post a", "post b"]);
        assert_eq!(titles(&rest), vec!["post c", "post d", "post e"]);
    }

    #[test]
    fn mapping_failure_stops_iteration_and_is_returned() {
        let (store, ds) = seeded();
        corrupt(&store, ds.new_key("Post", "b", 0, None));

        let mut seen = Vec::new();
        let err = ds
            .run_entities(&Query::new("Post"), |p: Post, _| {
                seen.push(p);
                true
            })
            .unwrap_err();
        assert!(matches!(
            err,
            DatastoreError::Mapping(MappingError::Decode { .. })
        ));
        assert_eq!(titles(&seen), vec!["post a"]);
    }

    #[test]
    fn store_failure_wins_over_mapping_failure() {
        let (store, ds) = seeded();
        corrupt(&store, ds.new_key("Post", "a", 0, None));
        store.fail_next_call(StoreError::Transport("gone".into()), FailurePoint::AfterItems);
        let err = ds
            .run_entities(&Query::new("Post"), |_: Post, _| true)
            .unwrap_err();
        assert_eq!(err, DatastoreError::Store(StoreError::Transport("gone".into())));
    }

    #[test]
    fn finalize_errors_surface_before_store_access() {
        let (store, ds) = seeded();
        let calls = store.call_count();
        let query = Query::new("Post")
            .filter("votes", FilterOp::Gt, 1i64)
            .order("title");
        let err = ds.run_entities(&query, |_: Post, _| true).unwrap_err();
        assert!(matches!(err, DatastoreError::Query(_)));
        assert_eq!(store.call_count(), calls);
    }

    // -----------------------------------------------------------------------
    // Key callbacks
    // -----------------------------------------------------------------------

    #[test]
    fn keys_callback_never_loads_properties() {
        let (_, ds) = seeded();
        let before = loads();
        let mut keys = Vec::new();
        ds.run::<Probe>(
            &Query::new("Post"),
            Callback::keys(|k, _| {
                keys.push(k);
                true
            }),
        )
        .unwrap();
        assert_eq!(keys.len(), 5);
        assert_eq!(loads(), before);

        ds.run_entities(&Query::new("Post"), |_: Probe, _| true)
            .unwrap();
        assert_eq!(loads(), before + 5);
    }

    #[test]
    fn run_keys_with_filter() {
        let (_, ds) = seeded();
        let mut keys = Vec::new();
        ds.run_keys(
            &Query::new("Post").filter("votes", FilterOp::Ge, 30i64),
            |k, _| {
                keys.push(k.string_id().to_string());
                true
            },
        )
        .unwrap();
        assert_eq!(keys, vec!["d", "e"]);
    }

    // -----------------------------------------------------------------------
    // get_all / get_all_keys / count
    // -----------------------------------------------------------------------

    #[test]
    fn get_all_appends_to_destination() {
        let (_, ds) = seeded();
        let mut dst = vec![Post::default()];
        ds.get_all(&Query::new("Post").limit(2), &mut dst).unwrap();
        assert_eq!(dst.len(), 3);
        assert_eq!(titles(&dst[1..]), vec!["post a", "post b"]);
    }

    #[test]
    fn get_all_aligns_errors_with_destination() {
        let (store, ds) = seeded();
        let bad = ds.new_key("Post", "c", 0, None);
        corrupt(&store, bad.clone());

        let mut dst = vec![Post::default()];
        let err = ds.get_all(&Query::new("Post"), &mut dst).unwrap_err();
        let multi = err.as_multi().unwrap();
        assert_eq!(dst.len(), 6);
        assert_eq!(multi.len(), dst.len());
        assert_eq!(multi.error_count(), 1);
        assert!(multi.get(3).is_some());
        assert_eq!(dst[3].key.as_ref(), Some(&bad));
        assert_eq!(dst[3].title, "");
        assert_eq!(dst[4].title, "post d");
    }

    #[test]
    fn get_all_keys_and_count() {
        let (_, ds) = seeded();
        let mut keys = Vec::new();
        let query = Query::new("Post").filter("votes", FilterOp::Lt, 20i64);
        ds.get_all_keys(&query, &mut keys).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(ds.count(&query).unwrap(), 2);
        assert_eq!(ds.count(&Query::new("Other")).unwrap(), 0);
    }

    #[test]
    fn same_query_returns_same_window() {
        let (_, ds) = seeded();
        let query = Query::new("Post").offset(1).limit(2);
        let mut first: Vec<Post> = Vec::new();
        let mut second: Vec<Post> = Vec::new();
        ds.get_all(&query, &mut first).unwrap();
        ds.get_all(&query, &mut second).unwrap();
        assert_eq!(first, second);
        assert_eq!(titles(&first), vec!["post b", "post c"]);
    }

    // -----------------------------------------------------------------------
    // Key-valued properties
    // -----------------------------------------------------------------------

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Seat {
        #[serde(skip)]
        key: Option<Key>,
        org: Option<Key>,
        holder: String,
    }

    impl Record for Seat {
        const KIND: &'static str = "Seat";

        fn record_key(&self) -> Option<&Key> {
            self.key.as_ref()
        }

        fn set_record_key(&mut self, key: Key) {
            self.key = Some(key);
        }
    }

    #[test]
    fn key_properties_can_be_filtered_on() {
        let store = Arc::new(InMemoryRawStore::new());
        let ds = Datastore::new(store.clone());
        let acme = ds.new_key("Org", "acme", 0, None);
        let globex = ds.new_key("Org", "globex", 0, None);
        let seat = |org: &Key, holder: &str| Seat {
            key: None,
            org: Some(org.clone()),
            holder: holder.into(),
        };
        let mut seats = vec![seat(&acme, "ann"), seat(&globex, "bob"), seat(&acme, "cid")];
        ds.put_multi(&mut seats).unwrap();

        let stored = store.peek(seats[0].key.as_ref().unwrap()).unwrap();
        assert_eq!(stored.first_value("org"), Some(&PropertyValue::Key(acme.clone())));

        let query = Query::new("Seat").filter_eq("org", acme.clone()).order("holder");
        assert_eq!(ds.count(&query).unwrap(), 2);

        let mut found: Vec<Seat> = Vec::new();
        ds.get_all(&query, &mut found).unwrap();
        let holders: Vec<&str> = found.iter().map(|s| s.holder.as_str()).collect();
        assert_eq!(holders, vec!["ann", "cid"]);
        assert_eq!(found[0].org.as_ref(), Some(&acme));
    }
}
