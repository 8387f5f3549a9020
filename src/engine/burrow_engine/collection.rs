use super::*;
use itertools::Itertools;

impl BurrowEngine {
    pub fn get_collection_names(&self) -> Result<Vec<String>> {
        self.read_op(|shared| Ok(shared.cache.header(&mut shared.disk)?.collection_names()))
    }

    /// Frees every page of the collection. Returns false for an unknown
    /// name.
    pub fn drop_collection(&self, collection: &str) -> Result<bool> {
        self.write_op(|shared| {
            CollectionService::new(&mut shared.disk, &mut shared.cache).drop(collection)
        })
    }

    pub fn rename_collection(&self, old_name: &str, new_name: &str) -> Result<bool> {
        self.write_op(|shared| {
            CollectionService::new(&mut shared.disk, &mut shared.cache).rename(old_name, new_name)
        })
    }

    /// Page-level textual dump of the whole datafile, for diagnostics.
    pub fn dump(&self) -> Result<String> {
        self.read_op(|shared| {
            let last_page_id = shared.cache.header(&mut shared.disk)?.last_page_id();

            let lines = (0..=last_page_id)
                .map(|page_id| {
                    let page = shared.cache.get_base(&mut shared.disk, page_id)?;
                    Ok(format!(
                        "{:>6} {:<10} prev={:<10} next={:<10} items={:<4} free={}",
                        page.page_id(),
                        page.page_type().to_string(),
                        page.prev_page_id() as i32,
                        page.next_page_id() as i32,
                        page.items_count(),
                        page.free_bytes(),
                    ))
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(lines.iter().join("\n"))
        })
    }
}
