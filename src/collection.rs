//! Lazily fetched, paginated collections.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::attribute::{AttributeKind, AttributeType};
use crate::data::Data;
use crate::error::Error;
use crate::link::Reply;
use crate::pagination::{total_count, PageLinks, PageRef};
use crate::proxy::{decode_element, LinkProxy};
use crate::types::{PAGE, PER_PAGE};

/// One fetched page.
#[derive(Debug, Clone)]
struct PageState {
    items: Vec<Value>,
    page: usize,
    per_page: usize,
    total: usize,
    links: PageLinks,
}

impl PageState {
    fn from_reply(reply: Reply, requested: Option<PageRef>) -> Result<Self, Error> {
        let items = match reply.value {
            Some(Value::Array(items)) => items,
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(Error::InvalidResponse {
                    url: reply.url,
                    message: format!(
                        "expected a JSON array, got {}",
                        crate::types::json_type_name(&other)
                    ),
                })
            }
        };

        let links = PageLinks::from_response(&reply.response);
        let current = links.current.or(requested);
        let page = current.map_or(1, |p| p.page.max(1));
        let per_page = current
            .map(|p| p.per_page)
            .unwrap_or(items.len())
            .max(1);
        let total = total_count(&reply.response).unwrap_or(items.len());

        Ok(Self {
            items,
            page,
            per_page,
            total,
            links,
        })
    }

    /// Absolute index of the first item on this page.
    fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    fn item(&self, index: usize) -> Option<&Value> {
        index
            .checked_sub(self.offset())
            .and_then(|i| self.items.get(i))
    }
}

/// The result of a collection link, fetched page by page on demand.
///
/// Nothing is requested until the length, an item, or an iterator is asked
/// for. Clones share the loaded page.
#[derive(Debug, Clone)]
pub struct LazyCollection {
    inner: Arc<CollectionInner>,
}

#[derive(Debug)]
struct CollectionInner {
    source: LinkProxy,
    loaded: Mutex<Option<PageState>>,
}

impl LazyCollection {
    pub(crate) fn new(source: LinkProxy) -> Self {
        Self {
            inner: Arc::new(CollectionInner {
                source,
                loaded: Mutex::new(None),
            }),
        }
    }

    /// The link call this collection comes from.
    pub fn source(&self) -> &LinkProxy {
        &self.inner.source
    }

    /// Whether the first page has been fetched.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.lock().is_some()
    }

    /// A new, unfetched collection with `name` set on the source link.
    pub fn param(&self, name: &str, value: impl Into<Data>) -> Result<LazyCollection, Error> {
        Ok(LazyCollection::new(self.inner.source.param(name, value)?))
    }

    pub fn per_page(&self, per_page: usize) -> Result<LazyCollection, Error> {
        self.param(PER_PAGE, per_page as u64)
    }

    /// Total number of items, fetching the first page if needed.
    ///
    /// Taken from `X-Total-Count`; without it, the size of the page.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.state()?.total)
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    /// Number of items in the loaded page.
    pub fn page_len(&self) -> Result<usize, Error> {
        Ok(self.state()?.items.len())
    }

    /// Item at absolute position `index`.
    ///
    /// Served from the loaded page when it covers `index`; otherwise the
    /// page holding it is fetched and replaces the loaded one.
    ///
    /// # Errors
    ///
    /// Returns `Error::IndexOutOfRange` for `index >= len()`.
    pub fn get(&self, index: usize) -> Result<Data, Error> {
        let state = self.state()?;
        if index >= state.total {
            return Err(Error::IndexOutOfRange {
                index,
                total: state.total,
            });
        }

        if let Some(raw) = state.item(index) {
            return self.decode(raw);
        }

        let target = PageRef {
            page: index / state.per_page + 1,
            per_page: state.per_page,
        };
        let fetched = self.fetch(Some(target))?;
        let raw = fetched.item(index).cloned();
        let total = fetched.total;
        *self.inner.loaded.lock() = Some(fetched);

        match raw {
            Some(raw) => self.decode(&raw),
            None => Err(Error::IndexOutOfRange { index, total }),
        }
    }

    /// Iterate from the first page, following `next` links.
    ///
    /// Every call starts over.
    pub fn iter(&self) -> CollectionIter {
        CollectionIter {
            collection: self.clone(),
            buffer: VecDeque::new(),
            next: None,
            yielded: 0,
            total: None,
            done: false,
        }
    }

    /// Fetch and decode every item.
    pub fn to_vec(&self) -> Result<Vec<Data>, Error> {
        self.iter().collect()
    }

    /// The loaded page, fetching the first one if nothing is loaded.
    fn state(&self) -> Result<PageState, Error> {
        if let Some(state) = self.inner.loaded.lock().as_ref() {
            return Ok(state.clone());
        }
        let fetched = self.fetch(None)?;
        let mut loaded = self.inner.loaded.lock();
        Ok(loaded.get_or_insert(fetched).clone())
    }

    fn fetch(&self, page: Option<PageRef>) -> Result<PageState, Error> {
        let source = match page {
            Some(page) => self.inner.source.with_page(page),
            None => self.inner.source.clone(),
        };
        let requested = page.or_else(|| requested_page(&source));
        debug!(
            rel = %source.link().rel(),
            page = requested.map(|p| p.page),
            "fetching collection page"
        );
        let reply = source.invoke_raw(None)?;
        PageState::from_reply(reply, requested)
    }

    fn decode(&self, raw: &Value) -> Result<Data, Error> {
        let client = self.inner.source.client()?;
        decode_element(&client, raw, self.item_type())
    }

    fn item_type(&self) -> Option<&AttributeType> {
        match self.inner.source.link().target_schema().attribute()?.kind() {
            AttributeKind::Array { items } => Some(items.as_ref()),
            _ => None,
        }
    }
}

fn requested_page(source: &LinkProxy) -> Option<PageRef> {
    let params = source.params();
    let page = params.get(PAGE).and_then(Value::as_u64)?;
    let per_page = params.get(PER_PAGE).and_then(Value::as_u64)?;
    Some(PageRef {
        page: page as usize,
        per_page: per_page as usize,
    })
}

/// Iterator over a [`LazyCollection`], fetching one page at a time.
///
/// Yields at most `len()` items and stops at the first error.
#[derive(Debug)]
pub struct CollectionIter {
    collection: LazyCollection,
    buffer: VecDeque<Value>,
    next: Option<PageRef>,
    yielded: usize,
    total: Option<usize>,
    done: bool,
}

impl CollectionIter {
    fn start(&mut self) -> Result<(), Error> {
        let loaded = self.collection.state()?;
        let first = loaded.links.first.unwrap_or(PageRef {
            page: 1,
            per_page: loaded.per_page,
        });
        let page = if loaded.page == first.page {
            loaded
        } else {
            self.collection.fetch(Some(first))?
        };
        self.total = Some(page.total);
        self.load(page);
        Ok(())
    }

    fn load(&mut self, page: PageState) {
        self.next = if page.links.is_last() {
            None
        } else {
            page.links.next
        };
        self.buffer = page.items.into();
    }

    fn advance(&mut self) -> Result<Option<Value>, Error> {
        if self.total.is_none() {
            self.start()?;
        }
        if self.total.is_some_and(|total| self.yielded >= total) {
            return Ok(None);
        }
        while self.buffer.is_empty() {
            let Some(next) = self.next.take() else {
                return Ok(None);
            };
            let page = self.collection.fetch(Some(next))?;
            self.load(page);
        }
        Ok(self.buffer.pop_front())
    }
}

impl Iterator for CollectionIter {
    type Item = Result<Data, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(raw)) => {
                self.yielded += 1;
                Some(self.collection.decode(&raw))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
