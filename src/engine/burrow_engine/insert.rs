use super::*;
use crate::engine::MAX_DOCUMENT_DEPTH;
use crate::engine::data_service::DataService;
use crate::engine::index_key::IndexKey;
use crate::engine::index_service::IndexService;
use crate::engine::query::extract_field;
use bson::spec::BinarySubtype;
use bson::{Bson, Document};

/// Generator used for `_id` when a document arrives without one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AutoId {
    ObjectId,
    Guid,
    Int32,
    Int64,
}

impl BurrowEngine {
    /// Inserts documents, committing every `buffer_size` of them. When a
    /// buffer fails it rolls back alone; buffers committed before it stay.
    pub fn insert(
        &self,
        collection: &str,
        docs: Vec<Document>,
        auto_id: AutoId,
        buffer_size: usize,
    ) -> Result<usize> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let _scope = self.locker.enter_exclusive()?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        log::debug!("insert {} documents into `{collection}`", docs.len());

        let buffer_size = buffer_size.max(1);
        let mut count = 0usize;
        let mut docs = docs.into_iter().peekable();

        while docs.peek().is_some() {
            let chunk: Vec<Document> = docs.by_ref().take(buffer_size).collect();

            let result = chunk.into_iter().try_for_each(|doc| -> Result<()> {
                Self::insert_document(shared, collection, doc, auto_id)?;
                count += 1;
                Ok(())
            });

            match result {
                Ok(()) => self.commit_tx(shared)?,
                Err(err) => {
                    self.rollback_tx(shared);
                    return Err(err);
                }
            }
        }

        Ok(count)
    }

    /// One document: assign `_id` if absent, store the payload, then fan
    /// out into every index of the collection.
    pub(super) fn insert_document(
        shared: &mut EngineShared,
        collection: &str,
        mut doc: Document,
        auto_id: AutoId,
    ) -> Result<()> {
        if document_depth(&doc) > MAX_DOCUMENT_DEPTH {
            return Err(Error::document_max_depth());
        }

        let page_id =
            CollectionService::new(&mut shared.disk, &mut shared.cache).get_or_create(collection)?;
        let mut snapshot = Snapshot::new(&mut shared.disk, &mut shared.cache, page_id);

        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Self::generate_id(&mut snapshot, auto_id)?;
                doc.insert("_id", id.clone());
                id
            }
        };

        if matches!(id, Bson::Null | Bson::Undefined | Bson::Array(_) | Bson::Document(_)) {
            return Err(Error::invalid_data_type("_id", id));
        }
        let id_key = IndexKey::from_bson("_id", &id)?;

        let bytes = bson::to_vec(&doc)?;
        let data_block = DataService::new(&mut snapshot).insert(&bytes)?;

        // the _id node and the block reference each other
        let pk_node = IndexService::new(&mut snapshot).add_node("_id", id_key, data_block)?;
        DataService::new(&mut snapshot).set_index_ref(data_block, pk_node.position())?;

        let fields: Vec<String> = snapshot
            .collection_page()?
            .get_indexes()
            .map(|index| index.field().to_string())
            .filter(|field| field != "_id")
            .collect();

        for field in fields {
            let value = extract_field(&doc, &field).cloned().unwrap_or(Bson::Null);
            let key = IndexKey::from_bson(&field, &value)?;
            IndexService::new(&mut snapshot).add_node(&field, key, data_block)?;
        }

        let collection_page = snapshot.collection_page_mut()?;
        collection_page.set_document_count(collection_page.document_count() + 1);

        Ok(())
    }

    fn generate_id(snapshot: &mut Snapshot, auto_id: AutoId) -> Result<Bson> {
        let id = match auto_id {
            AutoId::ObjectId => Bson::ObjectId(bson::oid::ObjectId::new()),
            AutoId::Guid => Bson::Binary(bson::Binary {
                subtype: BinarySubtype::Uuid,
                bytes: uuid::Uuid::new_v4().as_bytes().to_vec(),
            }),
            AutoId::Int32 => {
                let next = match Self::max_id(snapshot)? {
                    Some(IndexKey::Int32(max)) => max.checked_add(1).unwrap_or(1),
                    Some(IndexKey::Int64(max)) => {
                        i32::try_from(max.saturating_add(1)).unwrap_or(1)
                    }
                    _ => 1,
                };
                Bson::Int32(next)
            }
            AutoId::Int64 => {
                let next = match Self::max_id(snapshot)? {
                    Some(IndexKey::Int64(max)) => max.checked_add(1).unwrap_or(1),
                    Some(IndexKey::Int32(max)) => max as i64 + 1,
                    _ => 1,
                };
                Bson::Int64(next)
            }
        };

        Ok(id)
    }

    /// Largest `_id` currently in the collection: TAIL's level-0 neighbor.
    fn max_id(snapshot: &mut Snapshot) -> Result<Option<IndexKey>> {
        let pk = snapshot.collection_page()?.pk_index().clone();
        let node = IndexService::new(snapshot).last(&pk)?;

        Ok(if node.key().is_sentinel() {
            None
        } else {
            Some(node.key().clone())
        })
    }
}

pub(super) fn document_depth(doc: &Document) -> usize {
    fn value_depth(value: &Bson) -> usize {
        match value {
            Bson::Document(doc) => 1 + doc.values().map(value_depth).max().unwrap_or(0),
            Bson::Array(array) => 1 + array.iter().map(value_depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    1 + doc.values().map(value_depth).max().unwrap_or(0)
}
