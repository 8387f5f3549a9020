use crate::engine::collection_index::CollectionIndex;
use crate::engine::data_service::DataService;
use crate::engine::index_key::IndexKey;
use crate::engine::index_node::IndexNode;
use crate::engine::index_service::IndexService;
use crate::engine::page_address::PageAddress;
use crate::engine::snapshot::Snapshot;
use crate::{Error, Result};
use bson::{Bson, Document};
use itertools::Itertools;
use std::collections::BTreeSet;

/// Traversal direction over an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending = 1,
    Descending = -1,
}

/// The query algebra. Leaves name a field and constrain its value; `And`,
/// `Or` and `Not` compose. Execution walks the field's skip-list index
/// (building it on demand) or falls back to scanning every document.
#[derive(Debug, Clone)]
pub enum Query {
    Eq { field: String, value: Bson },
    Gt { field: String, value: Bson },
    Gte { field: String, value: Bson },
    Lt { field: String, value: Bson },
    Lte { field: String, value: Bson },
    Between { field: String, from: Bson, to: Bson },
    StartsWith { field: String, prefix: String },
    In { field: String, values: Vec<Bson> },
    All { field: String, order: Order },
    And(Box<Query>, Box<Query>),
    Or(Box<Query>, Box<Query>),
    Not(Box<Query>),
}

impl Query {
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Query {
        Query::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Query {
        Query::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Query {
        Query::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Query {
        Query::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Query {
        Query::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn between(
        field: impl Into<String>,
        from: impl Into<Bson>,
        to: impl Into<Bson>,
    ) -> Query {
        Query::Between {
            field: field.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn starts_with(field: impl Into<String>, prefix: impl Into<String>) -> Query {
        Query::StartsWith {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    pub fn r#in(field: impl Into<String>, values: Vec<Bson>) -> Query {
        Query::In {
            field: field.into(),
            values,
        }
    }

    /// Every document, in `_id` order.
    pub fn all() -> Query {
        Query::all_by("_id", Order::Ascending)
    }

    pub fn all_by(field: impl Into<String>, order: Order) -> Query {
        Query::All {
            field: field.into(),
            order,
        }
    }

    pub fn and(left: Query, right: Query) -> Query {
        Query::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Query, right: Query) -> Query {
        Query::Or(Box::new(left), Box::new(right))
    }

    pub fn not(query: Query) -> Query {
        Query::Not(Box::new(query))
    }
}

/// Resolves a dotted path (`address.city`) through nested documents.
pub(crate) fn extract_field<'d>(doc: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;

    for part in parts {
        current = current.as_document()?.get(part)?;
    }

    Some(current)
}

/// The field's value as an index key; `None` when the value has no place in
/// the key order (arrays, nested documents).
fn doc_key(doc: &Document, field: &str) -> Option<IndexKey> {
    let value = extract_field(doc, field).unwrap_or(&Bson::Null);
    IndexKey::from_bson(field, value).ok()
}

impl Query {
    /// The single field this (sub)query constrains, if it is a leaf.
    pub(crate) fn target_field(&self) -> Option<&str> {
        match self {
            Query::Eq { field, .. }
            | Query::Gt { field, .. }
            | Query::Gte { field, .. }
            | Query::Lt { field, .. }
            | Query::Lte { field, .. }
            | Query::Between { field, .. }
            | Query::StartsWith { field, .. }
            | Query::In { field, .. }
            | Query::All { field, .. } => Some(field),
            Query::And(..) | Query::Or(..) | Query::Not(..) => None,
        }
    }

    /// Pure predicate over a decoded document; the full-scan half of every
    /// variant.
    pub(crate) fn execute_full_scan(&self, doc: &Document) -> bool {
        match self {
            Query::Eq { field, value } => {
                match (doc_key(doc, field), IndexKey::from_bson(field, value).ok()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            Query::Gt { field, value } => Self::compare(doc, field, value, |o| o.is_gt()),
            Query::Gte { field, value } => Self::compare(doc, field, value, |o| o.is_ge()),
            Query::Lt { field, value } => Self::compare(doc, field, value, |o| o.is_lt()),
            Query::Lte { field, value } => Self::compare(doc, field, value, |o| o.is_le()),
            Query::Between { field, from, to } => {
                Self::compare(doc, field, from, |o| o.is_ge())
                    && Self::compare(doc, field, to, |o| o.is_le())
            }
            Query::StartsWith { field, prefix } => matches!(
                extract_field(doc, field),
                Some(Bson::String(s)) if s.starts_with(prefix.as_str())
            ),
            Query::In { field, values } => values.iter().any(|value| {
                match (doc_key(doc, field), IndexKey::from_bson(field, value).ok()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }),
            Query::All { .. } => true,
            Query::And(left, right) => {
                left.execute_full_scan(doc) && right.execute_full_scan(doc)
            }
            Query::Or(left, right) => {
                left.execute_full_scan(doc) || right.execute_full_scan(doc)
            }
            Query::Not(inner) => !inner.execute_full_scan(doc),
        }
    }

    fn compare(
        doc: &Document,
        field: &str,
        value: &Bson,
        check: impl Fn(std::cmp::Ordering) -> bool,
    ) -> bool {
        match (doc_key(doc, field), IndexKey::from_bson(field, value).ok()) {
            (Some(a), Some(b)) => check(a.cmp(&b)),
            _ => false,
        }
    }
}

// --- execution ---------------------------------------------------------

fn to_key(field: &str, value: &Bson) -> Result<IndexKey> {
    IndexKey::from_bson(field, value)
}

/// Where an index walk begins.
enum Start {
    First,
    KeyGe(IndexKey),
    KeyGt(IndexKey),
}

/// When it ends (sentinels always end it).
enum Stop {
    Sentinel,
    KeyGe(IndexKey),
    KeyGt(IndexKey),
    NotPrefix(String),
}

#[derive(Clone, Copy)]
enum RangeState {
    NotStarted,
    At(PageAddress),
    Done,
}

/// Lazy level-0 walk over one field's index between a start bound and a
/// stop bound. The skip list only accelerates the seek; iteration itself
/// is plain pointer chasing.
struct RangeCursor {
    field: String,
    start: Start,
    stop: Stop,
    order: Order,
    index: Option<CollectionIndex>,
    state: RangeState,
}

impl RangeCursor {
    fn new(field: &str, start: Start, stop: Stop, order: Order) -> Self {
        RangeCursor {
            field: field.to_string(),
            start,
            stop,
            order,
            index: None,
            state: RangeState::NotStarted,
        }
    }

    fn all(field: &str, order: Order) -> Self {
        Self::new(field, Start::First, Stop::Sentinel, order)
    }

    fn resolve_index(&mut self, snapshot: &mut Snapshot) -> Result<CollectionIndex> {
        if self.index.is_none() {
            let collection = snapshot.collection_page()?;
            let name = collection.name().to_string();
            self.index = Some(
                collection
                    .get_index(&self.field)
                    .cloned()
                    .ok_or_else(|| Error::index_not_found(&name, &self.field))?,
            );
        }

        Ok(self.index.clone().unwrap())
    }

    fn stops(&self, key: &IndexKey) -> bool {
        if key.is_sentinel() {
            return true;
        }

        match &self.stop {
            Stop::Sentinel => false,
            Stop::KeyGe(bound) => key >= bound,
            Stop::KeyGt(bound) => key > bound,
            Stop::NotPrefix(prefix) => match key {
                IndexKey::String(s) => !s.starts_with(prefix.as_str()),
                _ => true,
            },
        }
    }

    fn next(&mut self, snapshot: &mut Snapshot) -> Result<Option<IndexNode>> {
        let node = match self.state {
            RangeState::Done => return Ok(None),
            RangeState::NotStarted => {
                let index = self.resolve_index(snapshot)?;
                let mut service = IndexService::new(snapshot);

                match &self.start {
                    Start::First => match self.order {
                        Order::Ascending => service.first(&index)?,
                        Order::Descending => service.last(&index)?,
                    },
                    Start::KeyGe(key) => service.seek(&index, key, false)?,
                    Start::KeyGt(key) => service.seek(&index, key, true)?,
                }
            }
            RangeState::At(address) => IndexService::new(snapshot).get_node(address)?,
        };

        if self.stops(node.key()) {
            self.state = RangeState::Done;
            return Ok(None);
        }

        self.state = RangeState::At(node.get_next_prev0(self.order));
        Ok(Some(node))
    }
}

/// Union of equality walks over a sorted, deduplicated value list.
struct InCursor {
    field: String,
    keys: Vec<IndexKey>,
    position: usize,
    current: Option<RangeCursor>,
}

impl InCursor {
    fn new(field: &str, values: &[Bson]) -> Result<Self> {
        let keys: Vec<IndexKey> = values
            .iter()
            .map(|value| to_key(field, value))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .sorted()
            .dedup()
            .collect();

        Ok(InCursor {
            field: field.to_string(),
            keys,
            position: 0,
            current: None,
        })
    }

    fn next(&mut self, snapshot: &mut Snapshot) -> Result<Option<IndexNode>> {
        loop {
            if self.current.is_none() {
                let Some(key) = self.keys.get(self.position) else {
                    return Ok(None);
                };
                self.position += 1;
                self.current = Some(RangeCursor::new(
                    &self.field,
                    Start::KeyGe(key.clone()),
                    Stop::KeyGt(key.clone()),
                    Order::Ascending,
                ));
            }

            match self.current.as_mut().unwrap().next(snapshot)? {
                Some(node) => return Ok(Some(node)),
                None => self.current = None,
            }
        }
    }
}

/// Pull-based producer of index nodes; composites combine children by
/// their `DataBlock` address, which identifies a document uniquely.
enum NodeCursor {
    Range(RangeCursor),
    In(InCursor),
    Union {
        left: Box<NodeCursor>,
        right: Box<NodeCursor>,
        left_done: bool,
        seen: BTreeSet<PageAddress>,
    },
    Intersect {
        left: Box<NodeCursor>,
        right: Option<Box<NodeCursor>>,
        right_blocks: BTreeSet<PageAddress>,
    },
    Difference {
        all: Box<NodeCursor>,
        excluded: Option<Box<NodeCursor>>,
        excluded_blocks: BTreeSet<PageAddress>,
    },
    FullScan {
        all: Box<NodeCursor>,
        query: Query,
    },
}

impl NodeCursor {
    fn next(&mut self, snapshot: &mut Snapshot) -> Result<Option<IndexNode>> {
        match self {
            NodeCursor::Range(cursor) => cursor.next(snapshot),
            NodeCursor::In(cursor) => cursor.next(snapshot),

            NodeCursor::Union {
                left,
                right,
                left_done,
                seen,
            } => {
                if !*left_done {
                    if let Some(node) = left.next(snapshot)? {
                        seen.insert(node.data_block());
                        return Ok(Some(node));
                    }
                    *left_done = true;
                }

                while let Some(node) = right.next(snapshot)? {
                    if seen.insert(node.data_block()) {
                        return Ok(Some(node));
                    }
                }
                Ok(None)
            }

            NodeCursor::Intersect {
                left,
                right,
                right_blocks,
            } => {
                if let Some(mut cursor) = right.take() {
                    while let Some(node) = cursor.next(snapshot)? {
                        right_blocks.insert(node.data_block());
                    }
                }

                while let Some(node) = left.next(snapshot)? {
                    if right_blocks.contains(&node.data_block()) {
                        return Ok(Some(node));
                    }
                }
                Ok(None)
            }

            NodeCursor::Difference {
                all,
                excluded,
                excluded_blocks,
            } => {
                if let Some(mut cursor) = excluded.take() {
                    while let Some(node) = cursor.next(snapshot)? {
                        excluded_blocks.insert(node.data_block());
                    }
                }

                while let Some(node) = all.next(snapshot)? {
                    if !excluded_blocks.contains(&node.data_block()) {
                        return Ok(Some(node));
                    }
                }
                Ok(None)
            }

            NodeCursor::FullScan { all, query } => {
                while let Some(node) = all.next(snapshot)? {
                    let bytes = DataService::new(snapshot).read(node.data_block())?;
                    let doc = Document::from_reader(bytes.as_slice())?;
                    if query.execute_full_scan(&doc) {
                        return Ok(Some(node));
                    }
                }
                Ok(None)
            }
        }
    }
}

/// How a run resolves leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Walk per-field indexes; a missing one raises `IndexNotFound`.
    Index,
    /// Emit every `_id` node and filter decoded documents.
    FullScan,
}

/// A running query: a deduplicating stream of index nodes. Documents are
/// only decoded by the caller (or the full-scan filter), never here.
pub(crate) struct NodeStream {
    inner: NodeCursor,
    seen: BTreeSet<PageAddress>,
}

impl NodeStream {
    pub fn next(&mut self, snapshot: &mut Snapshot) -> Result<Option<IndexNode>> {
        while let Some(node) = self.inner.next(snapshot)? {
            if self.seen.insert(node.data_block()) {
                return Ok(Some(node));
            }
        }
        Ok(None)
    }
}

/// Builds the cursor tree for a query.
pub(crate) fn run(query: &Query, mode: RunMode) -> Result<NodeStream> {
    let inner = match mode {
        RunMode::Index => plan_index(query)?,
        RunMode::FullScan => NodeCursor::FullScan {
            all: Box::new(NodeCursor::Range(RangeCursor::all("_id", Order::Ascending))),
            query: query.clone(),
        },
    };

    Ok(NodeStream {
        inner,
        seen: BTreeSet::new(),
    })
}

fn plan_index(query: &Query) -> Result<NodeCursor> {
    let cursor = match query {
        Query::Eq { field, value } => {
            let key = to_key(field, value)?;
            NodeCursor::Range(RangeCursor::new(
                field,
                Start::KeyGe(key.clone()),
                Stop::KeyGt(key),
                Order::Ascending,
            ))
        }
        Query::Gt { field, value } => NodeCursor::Range(RangeCursor::new(
            field,
            Start::KeyGt(to_key(field, value)?),
            Stop::Sentinel,
            Order::Ascending,
        )),
        Query::Gte { field, value } => NodeCursor::Range(RangeCursor::new(
            field,
            Start::KeyGe(to_key(field, value)?),
            Stop::Sentinel,
            Order::Ascending,
        )),
        Query::Lt { field, value } => NodeCursor::Range(RangeCursor::new(
            field,
            Start::First,
            Stop::KeyGe(to_key(field, value)?),
            Order::Ascending,
        )),
        Query::Lte { field, value } => NodeCursor::Range(RangeCursor::new(
            field,
            Start::First,
            Stop::KeyGt(to_key(field, value)?),
            Order::Ascending,
        )),
        Query::Between { field, from, to } => NodeCursor::Range(RangeCursor::new(
            field,
            Start::KeyGe(to_key(field, from)?),
            Stop::KeyGt(to_key(field, to)?),
            Order::Ascending,
        )),
        Query::StartsWith { field, prefix } => NodeCursor::Range(RangeCursor::new(
            field,
            Start::KeyGe(IndexKey::String(prefix.clone())),
            Stop::NotPrefix(prefix.clone()),
            Order::Ascending,
        )),
        Query::In { field, values } => NodeCursor::In(InCursor::new(field, values)?),
        Query::All { field, order } => NodeCursor::Range(RangeCursor::all(field, *order)),
        Query::And(left, right) => NodeCursor::Intersect {
            left: Box::new(plan_index(left)?),
            right: Some(Box::new(plan_index(right)?)),
            right_blocks: BTreeSet::new(),
        },
        Query::Or(left, right) => NodeCursor::Union {
            left: Box::new(plan_index(left)?),
            right: Box::new(plan_index(right)?),
            left_done: false,
            seen: BTreeSet::new(),
        },
        Query::Not(inner) => NodeCursor::Difference {
            all: Box::new(NodeCursor::Range(RangeCursor::all("_id", Order::Ascending))),
            excluded: Some(Box::new(plan_index(inner)?)),
            excluded_blocks: BTreeSet::new(),
        },
    };

    Ok(cursor)
}

/// Every field a query touches, for the auto-index machinery.
pub(crate) fn collect_fields<'q>(query: &'q Query, fields: &mut Vec<&'q str>) {
    match query {
        Query::And(left, right) | Query::Or(left, right) => {
            collect_fields(left, fields);
            collect_fields(right, fields);
        }
        Query::Not(inner) => collect_fields(inner, fields),
        leaf => {
            if let Some(field) = leaf.target_field() {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
    }
}
