use super::*;
use crate::engine::data_service::DataService;
use crate::engine::index_key::IndexKey;
use crate::engine::index_service::IndexService;
use crate::engine::query::{self, NodeStream, Order, Query, RunMode, extract_field};
use bson::{Bson, Document};

impl BurrowEngine {
    /// Runs a query, resolving missing indexes on the fly: the first
    /// `IndexNotFound` for a field triggers one index build and a retry;
    /// when an index cannot be built the query re-runs in full-scan mode.
    fn with_query<T>(
        &self,
        collection: &str,
        query_ast: &Query,
        mut consume: impl FnMut(&mut Snapshot, &mut NodeStream) -> Result<T>,
    ) -> Result<Option<T>> {
        let mut built: Vec<String> = Vec::new();
        let mut mode = RunMode::Index;

        loop {
            let attempt = self.read_op(|shared| {
                let Some(mut snapshot) = Self::collection_snapshot(shared, collection)? else {
                    return Ok(None);
                };

                let mut stream = query::run(query_ast, mode)?;
                consume(&mut snapshot, &mut stream).map(Some)
            });

            match attempt {
                Err(Error::IndexNotFound { field, .. }) if mode == RunMode::Index => {
                    if built.contains(&field) || !self.auto_index_for_read(collection, &field)? {
                        mode = RunMode::FullScan;
                    } else {
                        built.push(field);
                    }
                }
                other => return other,
            }
        }
    }

    /// Matching documents in index-walk order, `skip` applied before
    /// `limit`, both over deduplicated documents.
    pub fn find(
        &self,
        collection: &str,
        query: &Query,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Document>> {
        log::debug!("find in `{collection}`");

        let limit = limit.unwrap_or(usize::MAX);

        let found = self.with_query(collection, query, |snapshot, stream| {
            let mut docs = Vec::new();
            let mut to_skip = skip;

            while docs.len() < limit {
                let Some(node) = stream.next(snapshot)? else {
                    break;
                };
                if to_skip > 0 {
                    to_skip -= 1;
                    continue;
                }

                let bytes = DataService::new(snapshot).read(node.data_block())?;
                docs.push(Document::from_reader(bytes.as_slice())?);
            }

            Ok(docs)
        })?;

        Ok(found.unwrap_or_default())
    }

    pub fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        log::debug!("count in `{collection}`");

        // All visits every document; the collection already keeps that count
        if matches!(query, Query::All { .. }) {
            return self.read_op(|shared| {
                Ok(match Self::collection_snapshot(shared, collection)? {
                    Some(mut snapshot) => snapshot.collection_page()?.document_count(),
                    None => 0,
                })
            });
        }

        let count = self.with_query(collection, query, |snapshot, stream| {
            let mut count = 0u64;
            while stream.next(snapshot)?.is_some() {
                count += 1;
            }
            Ok(count)
        })?;

        Ok(count.unwrap_or(0))
    }

    pub fn exists(&self, collection: &str, query: &Query) -> Result<bool> {
        log::debug!("exists in `{collection}`");

        let exists = self.with_query(collection, query, |snapshot, stream| {
            Ok(stream.next(snapshot)?.is_some())
        })?;

        Ok(exists.unwrap_or(false))
    }

    /// Smallest key on the field's index: HEAD's level-0 neighbor, O(1).
    pub fn min(&self, collection: &str, field: &str) -> Result<Option<Bson>> {
        self.min_max(collection, field, Order::Ascending)
    }

    /// Largest key: TAIL's back pointer, O(1).
    pub fn max(&self, collection: &str, field: &str) -> Result<Option<Bson>> {
        self.min_max(collection, field, Order::Descending)
    }

    fn min_max(&self, collection: &str, field: &str, order: Order) -> Result<Option<Bson>> {
        log::debug!("min/max on `{collection}.{field}`");

        let mut attempted = false;

        loop {
            let attempt = self.read_op(|shared| {
                let Some(mut snapshot) = Self::collection_snapshot(shared, collection)? else {
                    return Ok(None);
                };

                let collection_page = snapshot.collection_page()?;
                let name = collection_page.name().to_string();
                let Some(meta) = collection_page.get_index(field).cloned() else {
                    return Err(Error::index_not_found(&name, field));
                };

                let mut service = IndexService::new(&mut snapshot);
                let node = match order {
                    Order::Ascending => service.first(&meta)?,
                    Order::Descending => service.last(&meta)?,
                };

                Ok(if node.key().is_sentinel() {
                    None
                } else {
                    Some(node.key().clone().into_bson())
                })
            });

            match attempt {
                Err(Error::IndexNotFound { .. }) if !attempted => {
                    attempted = true;
                    if !self.auto_index_for_read(collection, field)? {
                        return self.scan_min_max(collection, field, order);
                    }
                }
                other => return other,
            }
        }
    }

    /// Fold over every document when the field cannot carry an index.
    fn scan_min_max(&self, collection: &str, field: &str, order: Order) -> Result<Option<Bson>> {
        self.read_op(|shared| {
            let Some(mut snapshot) = Self::collection_snapshot(shared, collection)? else {
                return Ok(None);
            };

            let mut stream = query::run(&Query::all(), RunMode::Index)?;
            let mut best: Option<IndexKey> = None;

            while let Some(node) = stream.next(&mut snapshot)? {
                let bytes = DataService::new(&mut snapshot).read(node.data_block())?;
                let doc = Document::from_reader(bytes.as_slice())?;

                let value = extract_field(&doc, field).cloned().unwrap_or(Bson::Null);
                let Ok(key) = IndexKey::from_bson(field, &value) else {
                    continue;
                };

                let better = match &best {
                    None => true,
                    Some(current) => match order {
                        Order::Ascending => key < *current,
                        Order::Descending => key > *current,
                    },
                };
                if better {
                    best = Some(key);
                }
            }

            Ok(best.map(IndexKey::into_bson))
        })
    }
}
