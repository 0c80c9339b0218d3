//! Ordered, paged reads
//!
//! A page is one `SORT` projection over the identity index, fetching the
//! action, meta and position of up to [`PAGE_SIZE`] entries. When more
//! entries remain, the page carries a [`PageCursor`]: a one-shot,
//! forward-only continuation that runs the same query at the next offset.
//! Pages are not cached and writes between pages are not isolated.

use tracing::{instrument, trace, warn};

use crate::backend::{HashField, SortQuery};
use crate::error::StorageError;
use crate::model::{Entry, Order};
use crate::store::{FIELD_ACTION, FIELD_ADDED, FIELD_META, LogStore, decode_entry, parse_added};

/// Entries per page
pub const PAGE_SIZE: usize = 100;

/// One page of entries, newest first
#[derive(Debug)]
pub struct Page {
    pub entries: Vec<Entry>,
    pub next: Option<PageCursor>,
}

impl Page {
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            next: None,
        }
    }

    /// Whether another page follows
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// Continuation to the following page
///
/// Consumed by [`next`](Self::next), so each continuation runs at most once.
#[derive(Debug)]
pub struct PageCursor {
    store: LogStore,
    order: Order,
    offset: usize,
}

impl PageCursor {
    /// Offset the next page starts at
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Fetch the next page
    pub async fn next(self) -> Result<Page, StorageError> {
        self.store.page(self.order, self.offset).await
    }
}

impl LogStore {
    /// First page of entries in `order`
    pub async fn get(&self, order: Order) -> Result<Page, StorageError> {
        self.page(order, 0).await
    }

    /// Every entry in `order`, following continuations to the end
    pub async fn entries(&self, order: Order) -> Result<Vec<Entry>, StorageError> {
        let mut page = self.get(order).await?;
        let mut all = std::mem::take(&mut page.entries);
        while let Some(cursor) = page.next {
            page = cursor.next().await?;
            all.append(&mut page.entries);
        }
        Ok(all)
    }

    #[instrument(skip(self))]
    pub(crate) async fn page(&self, order: Order, offset: usize) -> Result<Page, StorageError> {
        let log_ids = self.keys.log_ids();
        let count = self.backend.scard(&log_ids).await?;
        if offset >= count {
            return Ok(Page::empty());
        }

        let prefix = self.keys.entry_prefix();
        let query = SortQuery::by(HashField::new(prefix.clone(), order.field()))
            .get(HashField::new(prefix.clone(), FIELD_ACTION))
            .get(HashField::new(prefix.clone(), FIELD_META))
            .get(HashField::new(prefix, FIELD_ADDED))
            .limit(offset, PAGE_SIZE)
            .descending()
            .alpha(order.is_alpha());
        let rows = self.backend.sort(&log_ids, &query).await?;

        let fetched = rows.len() / 3;
        let mut entries = Vec::with_capacity(fetched);
        for row in rows.chunks_exact(3) {
            match row {
                [Some(action), Some(meta), Some(added)] => {
                    let added = parse_added(added)?;
                    entries.push(decode_entry(action, meta, Some(added))?);
                }
                _ => warn!("Skipping partially written entry row"),
            }
        }
        trace!(count, offset, fetched, "Read page");

        let next = (fetched >= PAGE_SIZE && offset + fetched < count).then(|| PageCursor {
            store: self.clone(),
            order,
            offset: offset + fetched,
        });
        Ok(Page { entries, next })
    }
}
