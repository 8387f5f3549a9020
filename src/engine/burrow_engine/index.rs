use super::*;
use crate::engine::INDEX_NAME_MAX_LENGTH;
use crate::engine::data_service::DataService;
use crate::engine::index_key::IndexKey;
use crate::engine::index_service::IndexService;
use crate::engine::query::extract_field;
use bson::{Bson, Document};

impl BurrowEngine {
    /// Creates an index on `field`, filling it from a full scan of the
    /// collection. Returns false when the index already existed.
    pub fn ensure_index(&self, collection: &str, field: &str, unique: bool) -> Result<bool> {
        self.write_op(|shared| Self::build_index(shared, collection, field, unique))
    }

    /// Removes an index and its pages. The `_id` index cannot be dropped.
    pub fn drop_index(&self, collection: &str, field: &str) -> Result<bool> {
        if field == "_id" {
            return Err(Error::invalid_format("cannot drop the _id index"));
        }

        self.write_op(|shared| {
            let Some(mut snapshot) = Self::collection_snapshot(shared, collection)? else {
                return Ok(false);
            };

            if snapshot.collection_page()?.get_index(field).is_none() {
                return Ok(false);
            }

            IndexService::new(&mut snapshot).drop_index(field)?;
            Ok(true)
        })
    }

    /// The build itself, shared with the auto-index-on-miss path (which
    /// already holds the exclusive lock through `write_op`).
    pub(super) fn build_index(
        shared: &mut EngineShared,
        collection: &str,
        field: &str,
        unique: bool,
    ) -> Result<bool> {
        if field.is_empty() || field.len() > INDEX_NAME_MAX_LENGTH || field.starts_with('$') {
            return Err(Error::invalid_format(format!("invalid index field `{field}`")));
        }

        let page_id =
            CollectionService::new(&mut shared.disk, &mut shared.cache).get_or_create(collection)?;
        let mut snapshot = Snapshot::new(&mut shared.disk, &mut shared.cache, page_id);

        if snapshot.collection_page()?.get_index(field).is_some() {
            return Ok(false);
        }

        log::debug!("building index on `{collection}.{field}`");

        IndexService::new(&mut snapshot).create_index(field, unique)?;

        // feed it with every existing document, walking _id level 0
        let pk = snapshot.collection_page()?.pk_index().clone();
        let mut node = IndexService::new(&mut snapshot).first(&pk)?;

        while !node.key().is_sentinel() {
            let data_block = node.data_block();

            let bytes = DataService::new(&mut snapshot).read(data_block)?;
            let doc = Document::from_reader(bytes.as_slice())?;

            let value = extract_field(&doc, field).cloned().unwrap_or(Bson::Null);
            let key = IndexKey::from_bson(field, &value)?;
            IndexService::new(&mut snapshot).add_node(field, key, data_block)?;

            node = IndexService::new(&mut snapshot).get_node(node.get_next(0))?;
        }

        Ok(true)
    }

    /// Builds a missing index for a read path, outside any read lock.
    /// `Ok(false)` means the index cannot exist (table full, unindexable
    /// values, read-only datafile) and the caller should fall back to
    /// scanning.
    pub(super) fn auto_index_for_read(&self, collection: &str, field: &str) -> Result<bool> {
        match self.auto_index_for_write(collection, field) {
            Ok(()) => Ok(true),
            Err(
                Error::CollectionLimitSize { .. }
                | Error::InvalidDataType { .. }
                | Error::IndexKeyTooLong { .. }
                | Error::ReadOnly,
            ) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// The same build for write paths, which must surface a failing build
    /// instead of degrading to a scan.
    pub(super) fn auto_index_for_write(&self, collection: &str, field: &str) -> Result<()> {
        self.write_op(|shared| Self::build_index(shared, collection, field, false))
            .map(|_| ())
    }
}
