use super::insert::document_depth;
use super::*;
use crate::engine::MAX_DOCUMENT_DEPTH;
use crate::engine::data_service::DataService;
use crate::engine::index_key::IndexKey;
use crate::engine::index_service::IndexService;
use crate::engine::query::extract_field;
use bson::{Bson, Document};

impl BurrowEngine {
    /// Replaces documents whole, matching on `_id`. Returns how many were
    /// found and replaced; documents with an unknown `_id` are skipped.
    /// Commits every `buffer_size` documents like [`BurrowEngine::insert`].
    pub fn update(
        &self,
        collection: &str,
        docs: Vec<Document>,
        buffer_size: usize,
    ) -> Result<usize> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        let _scope = self.locker.enter_exclusive()?;
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        log::debug!("update {} documents in `{collection}`", docs.len());

        let buffer_size = buffer_size.max(1);
        let mut count = 0usize;
        let mut docs = docs.into_iter().peekable();

        while docs.peek().is_some() {
            let chunk: Vec<Document> = docs.by_ref().take(buffer_size).collect();

            let result = chunk.into_iter().try_for_each(|doc| -> Result<()> {
                if Self::update_document(shared, collection, doc)? {
                    count += 1;
                }
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

    fn update_document(
        shared: &mut EngineShared,
        collection: &str,
        doc: Document,
    ) -> Result<bool> {
        if document_depth(&doc) > MAX_DOCUMENT_DEPTH {
            return Err(Error::document_max_depth());
        }

        let id = doc
            .get("_id")
            .cloned()
            .ok_or_else(|| Error::invalid_data_type("_id", "(missing)"))?;
        let id_key = IndexKey::from_bson("_id", &id)?;

        let Some(mut snapshot) = Self::collection_snapshot(shared, collection)? else {
            return Ok(false);
        };

        // locate the _id node; no node, nothing to replace
        let pk = snapshot.collection_page()?.pk_index().clone();
        let node = IndexService::new(&mut snapshot).seek(&pk, &id_key, false)?;
        if node.key().is_sentinel() || node.key() != &id_key {
            return Ok(false);
        }

        let old_block = node.data_block();
        let old_bytes = DataService::new(&mut snapshot).read(old_block)?;
        let old_doc = Document::from_reader(old_bytes.as_slice())?;

        let new_bytes = bson::to_vec(&doc)?;
        let relocated = DataService::new(&mut snapshot).update(old_block, &new_bytes)?;
        let new_block = relocated.unwrap_or(old_block);

        if relocated.is_some() {
            // the block moved: re-point the preserved _id node
            IndexService::new(&mut snapshot).set_data_block(node.position(), new_block)?;
        }

        let fields: Vec<String> = snapshot
            .collection_page()?
            .get_indexes()
            .map(|index| index.field().to_string())
            .filter(|field| field != "_id")
            .collect();

        for field in fields {
            let old_value = extract_field(&old_doc, &field).cloned().unwrap_or(Bson::Null);
            let new_value = extract_field(&doc, &field).cloned().unwrap_or(Bson::Null);

            let old_key = IndexKey::from_bson(&field, &old_value)?;
            let new_key = IndexKey::from_bson(&field, &new_value)?;

            if old_key == new_key && relocated.is_none() {
                continue;
            }

            let mut service = IndexService::new(&mut snapshot);
            service.delete_node(&field, &old_key, old_block)?;
            service.add_node(&field, new_key, new_block)?;
        }

        Ok(true)
    }
}
