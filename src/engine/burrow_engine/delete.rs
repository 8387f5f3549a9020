use super::*;
use crate::engine::data_service::DataService;
use crate::engine::index_key::IndexKey;
use crate::engine::index_service::IndexService;
use crate::engine::query::{self, Query, RunMode, extract_field};
use bson::{Bson, Document};

impl BurrowEngine {
    /// Deletes every document matching the query, removing data blocks and
    /// all their index nodes. Retries once per missing index after
    /// building it; a failing build surfaces (this is a write path).
    pub fn delete(&self, collection: &str, query: &Query) -> Result<usize> {
        let mut built: Vec<String> = Vec::new();
        let mut mode = RunMode::Index;

        loop {
            let attempt =
                self.write_op(|shared| Self::delete_by_query(shared, collection, query, mode));

            match attempt {
                Err(Error::IndexNotFound { field, .. }) if mode == RunMode::Index => {
                    if built.contains(&field) {
                        mode = RunMode::FullScan;
                    } else {
                        self.auto_index_for_write(collection, &field)?;
                        built.push(field);
                    }
                }
                other => return other,
            }
        }
    }

    fn delete_by_query(
        shared: &mut EngineShared,
        collection: &str,
        query: &Query,
        mode: RunMode,
    ) -> Result<usize> {
        let Some(mut snapshot) = Self::collection_snapshot(shared, collection)? else {
            return Ok(0);
        };

        log::debug!("delete from `{collection}`");

        // materialize the targets before mutating anything the cursor walks
        let mut stream = query::run(query, mode)?;
        let mut blocks = Vec::new();
        while let Some(node) = stream.next(&mut snapshot)? {
            blocks.push(node.data_block());
        }

        let fields: Vec<String> = snapshot
            .collection_page()?
            .get_indexes()
            .map(|index| index.field().to_string())
            .collect();

        let mut count = 0usize;
        for block in blocks {
            let bytes = DataService::new(&mut snapshot).read(block)?;
            let doc = Document::from_reader(bytes.as_slice())?;

            for field in &fields {
                let value = extract_field(&doc, field).cloned().unwrap_or(Bson::Null);
                let key = IndexKey::from_bson(field, &value)?;
                IndexService::new(&mut snapshot).delete_node(field, &key, block)?;
            }

            DataService::new(&mut snapshot).delete(block)?;
            count += 1;
        }

        if count > 0 {
            let collection_page = snapshot.collection_page_mut()?;
            let remaining = collection_page.document_count() - count as u64;
            collection_page.set_document_count(remaining);
        }

        Ok(count)
    }
}
