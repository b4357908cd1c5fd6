use crate::core::{DbError, Entry, KeyRange, Result};
use crate::encoding::{Datum, Encoding};
use crate::session::SessionInner;
use crate::snapshot::Snapshot;
use crate::state::State;
use crate::substrate::{Direction, TransactionMode};
use futures::Stream;
use std::collections::VecDeque;
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

/// Range iterator options
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    pub range: KeyRange,
    pub reverse: bool,
    pub limit: Option<usize>,
    /// Overrides the engine's key encoding for `next_decoded`
    pub key_encoding: Option<Encoding>,
    /// Overrides the engine's value encoding for `next_decoded`
    pub value_encoding: Option<Encoding>,
    pub snapshot: Option<Snapshot>,
    /// Family to iterate; defaults to the owner's
    pub column_family: Option<String>,
}

impl IteratorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn range(mut self, range: KeyRange) -> Self {
        self.range = range;
        self
    }

    pub fn gt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.range = self.range.gt(key);
        self
    }

    pub fn gte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.range = self.range.gte(key);
        self
    }

    pub fn lt(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.range = self.range.lt(key);
        self
    }

    pub fn lte(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.range = self.range.lte(key);
        self
    }

    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn key_encoding(mut self, encoding: Encoding) -> Self {
        self.key_encoding = Some(encoding);
        self
    }

    pub fn value_encoding(mut self, encoding: Encoding) -> Self {
        self.value_encoding = Some(encoding);
        self
    }

    pub fn snapshot(mut self, snapshot: &Snapshot) -> Self {
        self.snapshot = Some(snapshot.clone());
        self
    }

    pub fn column_family(mut self, name: &str) -> Self {
        self.column_family = Some(name.to_string());
        self
    }
}

/// Lazy, ordered walk over one column family.
///
/// Entries are fetched a page at a time, each page from its own short
/// read-only transaction, so an iterator never holds a handle between pages
/// and never keeps the State from suspending. Once exhausted it stays
/// exhausted.
pub struct RangeIterator {
    state: Arc<State>,
    store: String,
    range: KeyRange,
    direction: Direction,
    remaining: Option<usize>,
    page_size: usize,
    buffer: VecDeque<Entry>,
    last_key: Option<Vec<u8>>,
    exhausted: bool,
    key_encoding: Encoding,
    value_encoding: Encoding,
    snapshot: Option<Snapshot>,
    session: Option<Arc<SessionInner>>,
}

impl std::fmt::Debug for RangeIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeIterator")
            .field("store", &self.store)
            .field("range", &self.range)
            .field("direction", &self.direction)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl RangeIterator {
    pub(crate) fn new(
        state: Arc<State>,
        options: IteratorOptions,
        column_family: &str,
        session: Option<Arc<SessionInner>>,
    ) -> Result<Self> {
        if state.is_closed() {
            return Err(state.closed_error());
        }
        let family = options.column_family.as_deref().unwrap_or(column_family);
        let store = state.store_name(family)?;
        let config = state.config();

        Ok(Self {
            store,
            range: options.range,
            direction: if options.reverse {
                Direction::Prev
            } else {
                Direction::Next
            },
            remaining: options.limit,
            page_size: config.iterator_page_size,
            buffer: VecDeque::new(),
            last_key: None,
            exhausted: options.limit == Some(0),
            key_encoding: options.key_encoding.unwrap_or(config.key_encoding),
            value_encoding: options.value_encoding.unwrap_or(config.value_encoding),
            snapshot: options.snapshot,
            session,
            state,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(self.state.closed_error());
        }
        if let Some(session) = &self.session {
            if session.is_closed() {
                return Err(DbError::Closed("session is closed".into()));
            }
        }
        if let Some(snapshot) = &self.snapshot {
            if snapshot.is_closed() {
                return Err(DbError::Closed(format!("snapshot {} is closed", snapshot.id())));
            }
        }
        Ok(())
    }

    fn page_bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let lower = self.range.lower_bound();
        let upper = self.range.upper_bound();
        match (&self.last_key, self.direction) {
            (None, _) => (lower, upper),
            (Some(last), Direction::Next) => (Bound::Excluded(last.clone()), upper),
            (Some(last), Direction::Prev) => (lower, Bound::Excluded(last.clone())),
        }
    }

    async fn fill(&mut self) -> Result<()> {
        let want = match self.remaining {
            Some(remaining) => remaining.min(self.page_size),
            None => self.page_size,
        };
        if want == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let stores = [self.store.clone()];
        let mut access = self.state.begin(&stores, TransactionMode::ReadOnly).await?;
        if access.missing.contains(&self.store) {
            self.exhausted = true;
            return Ok(());
        }

        let (lower, upper) = self.page_bounds();
        let mut page = Vec::with_capacity(want);
        {
            let mut cursor = access.txn.open_cursor(&self.store, lower, upper, self.direction)?;
            while page.len() < want {
                match cursor.advance()? {
                    Some(entry) => page.push(entry),
                    None => break,
                }
            }
        }
        drop(access);

        if page.len() < want {
            self.exhausted = true;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= page.len();
            if *remaining == 0 {
                self.exhausted = true;
            }
        }
        if let Some(last) = page.last() {
            self.last_key = Some(last.key.clone());
        }
        debug!(store = %self.store, entries = page.len(), "iterator page fetched");
        self.buffer.extend(page);
        Ok(())
    }

    /// Next entry, or `None` once the range is exhausted
    pub async fn next(&mut self) -> Result<Option<Entry>> {
        self.check_open()?;
        if self.buffer.is_empty() && !self.exhausted {
            self.fill().await?;
        }
        Ok(self.buffer.pop_front())
    }

    /// Next entry decoded with the iterator's key and value encodings
    pub async fn next_decoded(&mut self) -> Result<Option<(Datum, Datum)>> {
        match self.next().await? {
            Some(entry) => Ok(Some((
                self.key_encoding.decode(&entry.key)?,
                self.value_encoding.decode(&entry.value)?,
            ))),
            None => Ok(None),
        }
    }

    pub async fn collect_all(mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Consume as a `Stream`. The stream ends after the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Entry>> {
        futures::stream::unfold(Some(self), |iterator| async move {
            let mut iterator = iterator?;
            match iterator.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(iterator))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::config::EngineConfig;
    use crate::core::BatchKind;
    use crate::substrate::MemorySubstrate;
    use futures::StreamExt;

    async fn seeded(page_size: usize) -> Arc<State> {
        let config = EngineConfig::new()
            .substrate(MemorySubstrate::new())
            .iterator_page_size(page_size);
        let state = State::new("iterator-tests", config).unwrap();

        let core = state.create_batch(BatchKind::Write).unwrap();
        let mut batch = Batch::new(Arc::clone(&state), core, "default", None, None);
        for key in ["a", "b", "c", "d", "e"] {
            batch.put(key, key.to_uppercase()).unwrap();
        }
        batch.flush().await.unwrap();
        state
    }

    fn keys(entries: &[Entry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| String::from_utf8(e.key.clone()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_pages_cover_whole_range() {
        let state = seeded(2).await;
        let iterator = RangeIterator::new(state, IteratorOptions::new(), "default", None).unwrap();
        let entries = iterator.collect_all().await.unwrap();
        assert_eq!(keys(&entries), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(entries[0].value, b"A");
    }

    #[tokio::test]
    async fn test_bounds_reverse_and_limit() {
        let state = seeded(2).await;
        let options = IteratorOptions::new().gt("a").lte("d").reverse(true).limit(2);
        let iterator = RangeIterator::new(state, options, "default", None).unwrap();
        let entries = iterator.collect_all().await.unwrap();
        assert_eq!(keys(&entries), vec!["d", "c"]);
    }

    #[tokio::test]
    async fn test_not_restartable() {
        let state = seeded(8).await;
        let mut iterator =
            RangeIterator::new(state, IteratorOptions::new().limit(1), "default", None).unwrap();
        assert!(iterator.next().await.unwrap().is_some());
        assert!(iterator.next().await.unwrap().is_none());
        assert!(iterator.is_exhausted());
        assert!(iterator.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_family_is_empty() {
        let state = seeded(8).await;
        let options = IteratorOptions::new().column_family("nothing-here");
        let iterator = RangeIterator::new(state, options, "default", None).unwrap();
        assert!(iterator.collect_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_state_fails() {
        let state = seeded(8).await;
        let mut iterator =
            RangeIterator::new(Arc::clone(&state), IteratorOptions::new(), "default", None)
                .unwrap();
        state.close().await.unwrap();
        assert!(matches!(iterator.next().await, Err(DbError::Closed(_))));
    }

    #[tokio::test]
    async fn test_stream() {
        let state = seeded(3).await;
        let iterator =
            RangeIterator::new(state, IteratorOptions::new().gte("c"), "default", None).unwrap();
        let entries: Vec<Entry> = iterator
            .into_stream()
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(keys(&entries), vec!["c", "d", "e"]);
    }
}
