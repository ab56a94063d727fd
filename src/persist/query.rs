use super::entity::{Entity, EntityRef};
use super::store::Store;
use crate::core::{Result, StoreError, compare_json};
use serde_json::Value;
use std::cmp::Ordering;
use std::marker::PhantomData;

/// Query over one entity type.
///
/// Unfiltered queries in id order are served from the maintained total and
/// the `by_type_id` index without loading the whole type. Any filter or other sort field materializes every
/// record of the type and works in memory.
///
/// Predicates on undeclared fields are reported as
/// [`StoreError::UnknownField`] when the query runs.
pub struct Query<E> {
    store: Store,
    filters: Vec<(String, Value)>,
    order: Option<(String, bool)>,
    unknown_field: Option<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            filters: self.filters.clone(),
            order: self.order.clone(),
            unknown_field: self.unknown_field.clone(),
            _entity: PhantomData,
        }
    }
}

/// One page of results plus the numbers needed to render pagination.
#[derive(Debug, Clone)]
pub struct Pagination<E: Entity> {
    pub items: Vec<EntityRef<E>>,
    /// Current page, 1-based, after clamping.
    pub page: usize,
    pub pages: usize,
    pub per_page: usize,
    pub total: usize,
    /// 1-based position of the first item, 0 when the page is empty.
    pub start: usize,
    /// 1-based position of the last item, 0 when the page is empty.
    pub end: usize,
}

impl<E: Entity> Pagination<E> {
    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }
}

/// Number of pages for `total` items, never less than one.
pub fn page_count(total: usize, per_page: usize) -> usize {
    if per_page == 0 {
        return 1;
    }
    total.div_ceil(per_page).max(1)
}

impl<E: Entity> Query<E> {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            filters: Vec::new(),
            order: None,
            unknown_field: None,
            _entity: PhantomData,
        }
    }

    /// Adds an equality predicate. A later predicate on the same field
    /// replaces the earlier one.
    pub fn filter_by(mut self, field: &str, value: impl Into<Value>) -> Self {
        if !E::has_field(field) && self.unknown_field.is_none() {
            self.unknown_field = Some(field.to_string());
        }
        let value = value.into();
        match self.filters.iter_mut().find(|(name, _)| name == field) {
            Some(existing) => existing.1 = value,
            None => self.filters.push((field.to_string(), value)),
        }
        self
    }

    /// Sorts by `field`. Records without a value come last in both directions.
    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        if !E::has_field(field) && self.unknown_field.is_none() {
            self.unknown_field = Some(field.to_string());
        }
        self.order = Some((field.to_string(), descending));
        self
    }

    fn check(&self) -> Result<()> {
        match &self.unknown_field {
            Some(field) => Err(StoreError::UnknownField {
                doc_type: E::DOC_TYPE.to_string(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }

    /// No sort field, or the sort field is `id`.
    fn is_default_order(&self) -> bool {
        self.order.as_ref().is_none_or(|(field, _)| field == "id")
    }

    fn uses_index(&self) -> bool {
        self.filters.is_empty() && self.is_default_order()
    }

    fn descending(&self) -> bool {
        self.order.as_ref().is_some_and(|(_, descending)| *descending)
    }

    fn matches(&self, entity: &E) -> bool {
        self.filters.iter().all(|(field, expected)| {
            let actual = entity.field(field).unwrap_or(Value::Null);
            compare_json(&actual, expected) == Ordering::Equal
        })
    }

    /// Every matching record, sorted.
    pub async fn all(&self) -> Result<Vec<EntityRef<E>>> {
        self.check()?;
        let mut items: Vec<EntityRef<E>> = self
            .store
            .all::<E>()
            .await?
            .into_iter()
            .filter(|entity| self.matches(&entity.read()))
            .collect();

        if let Some((field, descending)) = &self.order {
            let mut keyed: Vec<(Option<Value>, EntityRef<E>)> = items
                .into_iter()
                .map(|entity| {
                    let key = entity.read().field(field).filter(|v| !v.is_null());
                    (key, entity)
                })
                .collect();
            keyed.sort_by(|(a, _), (b, _)| compare_nulls_last(a.as_ref(), b.as_ref(), *descending));
            items = keyed.into_iter().map(|(_, entity)| entity).collect();
        }
        Ok(items)
    }

    pub async fn first(&self) -> Result<Option<EntityRef<E>>> {
        Ok(self.all().await?.into_iter().next())
    }

    /// Number of matching records, counted after materializing.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.all().await?.len())
    }

    /// Number of matching records.
    ///
    /// The unfiltered id-ordered case reads the maintained total in O(1)
    /// and falls back to counting the type's keys when the total is not
    /// maintained. Every other case materializes the query.
    pub async fn total(&self) -> Result<usize> {
        self.check()?;
        if !self.uses_index() {
            return self.count().await;
        }
        match self.store.total_count::<E>().await? {
            Some(total) => Ok(usize::try_from(total).unwrap_or(0)),
            None => self.store.count_docs::<E>().await,
        }
    }

    /// Range read over the index. Without a maintained total the requested
    /// range is read as is, and the type's keys are counted only when a page
    /// past the first comes back empty.
    async fn index_page(&self, page: usize, per_page: usize) -> Result<Vec<EntityRef<E>>> {
        let descending = self.descending();
        if let Some(total) = self.store.total_count::<E>().await? {
            let total = usize::try_from(total).unwrap_or(0);
            let page = page.clamp(1, page_count(total, per_page));
            return self.store.page::<E>(page, per_page, descending).await;
        }

        let page = page.max(1);
        let items = self.store.page::<E>(page, per_page, descending).await?;
        if !items.is_empty() || page == 1 {
            return Ok(items);
        }
        let last = page_count(self.store.count_docs::<E>().await?, per_page);
        if last >= page {
            return Ok(items);
        }
        self.store.page::<E>(last, per_page, descending).await
    }

    /// One page of results, 1-based. An out-of-range page clamps to the
    /// nearest valid page; `per_page == 0` yields an empty page.
    pub async fn page(&self, page: usize, per_page: usize) -> Result<Vec<EntityRef<E>>> {
        self.check()?;
        if per_page == 0 {
            return Ok(Vec::new());
        }

        if self.uses_index() {
            return self.index_page(page, per_page).await;
        }

        let items = self.all().await?;
        let page = page.clamp(1, page_count(items.len(), per_page));
        Ok(items
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect())
    }

    /// Page plus pagination metadata. `per_page == 0` puts everything on a
    /// single page.
    pub async fn paginate(&self, page: usize, per_page: usize) -> Result<Pagination<E>> {
        let total = self.total().await?;
        let per_page = if per_page == 0 { total.max(1) } else { per_page };
        let pages = page_count(total, per_page);
        let page = page.clamp(1, pages);
        let items = self.page(page, per_page).await?;

        let (start, end) = if items.is_empty() {
            (0, 0)
        } else {
            let start = (page - 1) * per_page + 1;
            (start, start + items.len() - 1)
        };

        Ok(Pagination {
            items,
            page,
            pages,
            per_page,
            total,
            start,
            end,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<EntityRef<E>>> {
        self.store.get::<E>(id).await
    }

    pub async fn get_or_404(&self, id: i64) -> Result<EntityRef<E>> {
        self.store.get_or_404::<E>(id).await
    }
}

/// Orders present values by JSON collation (reversed when descending) and
/// puts missing values after all present ones.
fn compare_nulls_last(a: Option<&Value>, b: Option<&Value>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ordering = compare_json(a, b);
            if descending { ordering.reverse() } else { ordering }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
