//! Fluent remote query for one model type.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::filter::{Boolean, Constraint, FilterValue, Operator, Where, build_filter, validate_field};
use super::paginator::Paginator;
use crate::cache::CacheOverride;
use crate::error::{Error, Result};
use crate::model::relations::load_relations;
use crate::model::{ModelContext, ModelDefinition, ModelEvent, SapB1Model};
use crate::service_layer::{EntityKey, ODataQuery, Record, SortDirection};

/// Builder methods validate field names eagerly, so an invalid name fails
/// before any remote call can be made.
#[derive(Clone)]
pub struct QueryBuilder {
    ctx: ModelContext,
    definition: Arc<ModelDefinition>,
    wheres: Vec<Where>,
    raw_filter: Option<String>,
    select: Vec<String>,
    order_by: Vec<(String, SortDirection)>,
    top: Option<u64>,
    skip: Option<u64>,
    relations: Vec<String>,
    cache: CacheOverride,
}

impl QueryBuilder {
    pub fn new(ctx: ModelContext, definition: Arc<ModelDefinition>) -> Self {
        Self {
            ctx,
            definition,
            wheres: Vec::new(),
            raw_filter: None,
            select: Vec::new(),
            order_by: Vec::new(),
            top: None,
            skip: None,
            relations: Vec::new(),
            cache: CacheOverride::Inherit,
        }
    }

    fn push(mut self, boolean: Boolean, constraint: Constraint) -> Self {
        self.wheres.push(Where {
            boolean,
            constraint,
        });
        self
    }

    fn basic(
        self,
        boolean: Boolean,
        field: &str,
        operator: &str,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        let constraint = Constraint::Basic {
            field: validate_field(field)?.to_string(),
            operator: Operator::parse(operator)?,
            value: value.into(),
        };
        Ok(self.push(boolean, constraint))
    }

    pub fn and_where(
        self,
        field: &str,
        operator: &str,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        self.basic(Boolean::And, field, operator, value)
    }

    pub fn or_where(
        self,
        field: &str,
        operator: &str,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        self.basic(Boolean::Or, field, operator, value)
    }

    pub fn where_eq(self, field: &str, value: impl Into<FilterValue>) -> Result<Self> {
        self.basic(Boolean::And, field, "eq", value)
    }

    fn in_list<I, V>(self, boolean: Boolean, field: &str, values: I, negated: bool) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        let constraint = Constraint::In {
            field: validate_field(field)?.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated,
        };
        Ok(self.push(boolean, constraint))
    }

    pub fn where_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.in_list(Boolean::And, field, values, false)
    }

    pub fn or_where_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.in_list(Boolean::Or, field, values, false)
    }

    pub fn where_not_in<I, V>(self, field: &str, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.in_list(Boolean::And, field, values, true)
    }

    fn between(
        self,
        boolean: Boolean,
        field: &str,
        low: impl Into<FilterValue>,
        high: impl Into<FilterValue>,
    ) -> Result<Self> {
        let constraint = Constraint::Between {
            field: validate_field(field)?.to_string(),
            low: low.into(),
            high: high.into(),
        };
        Ok(self.push(boolean, constraint))
    }

    pub fn where_between(
        self,
        field: &str,
        low: impl Into<FilterValue>,
        high: impl Into<FilterValue>,
    ) -> Result<Self> {
        self.between(Boolean::And, field, low, high)
    }

    pub fn or_where_between(
        self,
        field: &str,
        low: impl Into<FilterValue>,
        high: impl Into<FilterValue>,
    ) -> Result<Self> {
        self.between(Boolean::Or, field, low, high)
    }

    fn null_check(self, boolean: Boolean, field: &str, negated: bool) -> Result<Self> {
        let constraint = Constraint::Null {
            field: validate_field(field)?.to_string(),
            negated,
        };
        Ok(self.push(boolean, constraint))
    }

    pub fn where_null(self, field: &str) -> Result<Self> {
        self.null_check(Boolean::And, field, false)
    }

    pub fn where_not_null(self, field: &str) -> Result<Self> {
        self.null_check(Boolean::And, field, true)
    }

    pub fn or_where_null(self, field: &str) -> Result<Self> {
        self.null_check(Boolean::Or, field, false)
    }

    pub fn or_where_not_null(self, field: &str) -> Result<Self> {
        self.null_check(Boolean::Or, field, true)
    }

    /// Use `filter` verbatim. Replaces every structured constraint.
    pub fn raw_filter(mut self, filter: impl Into<String>) -> Self {
        self.raw_filter = Some(filter.into());
        self
    }

    pub fn select<I, S>(mut self, fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            self.select.push(validate_field(field.as_ref())?.to_string());
        }
        Ok(self)
    }

    pub fn order_by(mut self, field: &str, direction: SortDirection) -> Result<Self> {
        self.order_by
            .push((validate_field(field)?.to_string(), direction));
        Ok(self)
    }

    pub fn order_by_desc(self, field: &str) -> Result<Self> {
        self.order_by(field, SortDirection::Desc)
    }

    /// Newest first by `field`, typically `UpdateDate` or `DocDate`.
    pub fn latest(self, field: &str) -> Result<Self> {
        self.order_by_desc(field)
    }

    pub fn take(mut self, count: u64) -> Self {
        self.top = Some(count);
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count);
        self
    }

    /// Eager-load declared relations on every result.
    pub fn with<I, S>(mut self, relations: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in relations {
            let name = name.into();
            if self.definition.relation(&name).is_none() {
                return Err(Error::RelationNotDefined {
                    entity: self.definition.entity.clone(),
                    relation: name,
                });
            }
            self.relations.push(name);
        }
        Ok(self)
    }

    pub fn cache(mut self, ttl: Duration) -> Self {
        self.cache = CacheOverride::Ttl(ttl);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = CacheOverride::Disabled;
        self
    }

    pub fn entity(&self) -> &str {
        &self.definition.entity
    }

    pub fn to_filter(&self) -> Option<String> {
        match &self.raw_filter {
            Some(raw) => Some(raw.clone()),
            None => build_filter(&self.wheres),
        }
    }

    pub fn to_odata(&self) -> ODataQuery {
        ODataQuery {
            filter: self.to_filter(),
            select: self.select.clone(),
            order_by: self.order_by.clone(),
            top: self.top,
            skip: self.skip,
        }
    }

    /// An AND-only chain containing an empty `in` cannot match anything.
    fn is_unsatisfiable(&self) -> bool {
        self.raw_filter.is_none()
            && self.wheres.iter().skip(1).all(|w| w.boolean == Boolean::And)
            && self.wheres.iter().any(|w| w.constraint.is_unsatisfiable())
    }

    fn cache_ttl(&self) -> Option<Duration> {
        self.ctx
            .cache()
            .resolver()
            .resolve(&self.definition.cache, self.cache)
    }

    async fn fetch_records(&self, query: &ODataQuery) -> Result<Vec<Record>> {
        let entity = self.entity();
        let service = self.ctx.service().clone();
        let fetch = || async move { Ok::<_, Error>(service.query(entity, query).await?.value) };

        match self.cache_ttl() {
            Some(ttl) => {
                let key = self
                    .ctx
                    .cache()
                    .query_key(entity, "get", query, &self.relations)?;
                self.ctx.cache().remember(entity, &key, ttl, fetch).await
            }
            None => fetch().await,
        }
    }

    fn hydrate(&self, record: Record) -> SapB1Model {
        let model = SapB1Model::from_remote(self.definition.clone(), record);
        self.ctx.registry().fire(ModelEvent::Retrieved, &model);
        model
    }

    /// Results without relation loading.
    pub(crate) async fn fetch_models(&self) -> Result<Vec<SapB1Model>> {
        if self.is_unsatisfiable() {
            debug!(entity = %self.entity(), "query cannot match; skipping remote call");
            return Ok(Vec::new());
        }
        let records = self.fetch_records(&self.to_odata()).await?;
        Ok(records
            .into_iter()
            .map(|record| self.hydrate(record))
            .collect())
    }

    #[instrument(skip(self), fields(entity = %self.definition.entity))]
    pub async fn get(&self) -> Result<Vec<SapB1Model>> {
        let mut models = self.fetch_models().await?;
        if !self.relations.is_empty() {
            load_relations(&self.ctx, &mut models, &self.relations).await?;
        }
        Ok(models)
    }

    pub async fn first(&self) -> Result<Option<SapB1Model>> {
        Ok(self.clone().take(1).get().await?.into_iter().next())
    }

    pub async fn first_or_fail(&self) -> Result<SapB1Model> {
        self.first().await?.ok_or_else(|| Error::ModelNotFound {
            entity: self.entity().to_string(),
            key: self.to_filter().unwrap_or_else(|| "<any>".to_string()),
        })
    }

    /// Point lookup by primary key. Constraints on the builder are ignored.
    #[instrument(skip(self, key), fields(entity = %self.definition.entity))]
    pub async fn find(&self, key: impl Into<EntityKey>) -> Result<Option<SapB1Model>> {
        let key = key.into();
        let entity = self.entity();
        let service = self.ctx.service().clone();
        let lookup = &key;
        let fetch = || async move { Ok::<_, Error>(service.find(entity, lookup).await?) };

        let record: Option<Record> = match self.cache_ttl() {
            Some(ttl) => {
                let cache_key = self.ctx.cache().find_key(entity, &key);
                self.ctx.cache().remember(entity, &cache_key, ttl, fetch).await?
            }
            None => fetch().await?,
        };

        let Some(record) = record else {
            return Ok(None);
        };
        let mut models = vec![self.hydrate(record)];
        if !self.relations.is_empty() {
            load_relations(&self.ctx, &mut models, &self.relations).await?;
        }
        Ok(models.pop())
    }

    pub async fn find_or_fail(&self, key: impl Into<EntityKey>) -> Result<SapB1Model> {
        let key = key.into();
        self.find(key.clone())
            .await?
            .ok_or_else(|| Error::ModelNotFound {
                entity: self.entity().to_string(),
                key: key.to_string(),
            })
    }

    /// Count-only request; only the filter is sent.
    pub async fn count(&self) -> Result<u64> {
        if self.is_unsatisfiable() {
            return Ok(0);
        }
        let entity = self.entity();
        let query = ODataQuery {
            filter: self.to_filter(),
            ..ODataQuery::default()
        };
        let service = self.ctx.service().clone();
        let counted = &query;
        let fetch = || async move { Ok::<_, Error>(service.count(entity, counted).await?) };

        match self.cache_ttl() {
            Some(ttl) => {
                let key = self.ctx.cache().query_key(entity, "count", &query, &[])?;
                self.ctx.cache().remember(entity, &key, ttl, fetch).await
            }
            None => fetch().await,
        }
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    /// `page` is 1-based.
    pub async fn paginate(&self, per_page: u64, page: u64) -> Result<Paginator<SapB1Model>> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let total = self.count().await?;
        let items = self
            .clone()
            .take(per_page)
            .skip((page - 1).saturating_mul(per_page))
            .get()
            .await?;
        Ok(Paginator::new(items, total, per_page, page))
    }

    /// Values of a single field, fetched with a one-column `$select`.
    pub async fn pluck(&self, field: &str) -> Result<Vec<JsonValue>> {
        let field = validate_field(field)?;
        if self.is_unsatisfiable() {
            return Ok(Vec::new());
        }
        let mut query = self.to_odata();
        query.select = vec![field.to_string()];
        let records = self.fetch_records(&query).await?;
        Ok(records
            .into_iter()
            .map(|mut record| record.remove(field).unwrap_or(JsonValue::Null))
            .collect())
    }

    /// Walk the results `size` at a time. The callback returns `false` to stop.
    /// Without an explicit order the primary key is used so pages are stable.
    pub async fn chunk<F>(&self, size: u64, mut callback: F) -> Result<()>
    where
        F: FnMut(Vec<SapB1Model>) -> bool,
    {
        let size = size.max(1);
        let mut base = self.clone();
        if base.order_by.is_empty() {
            base.order_by
                .push((self.definition.primary_key.clone(), SortDirection::Asc));
        }
        let mut offset = self.skip.unwrap_or(0);

        loop {
            let page = base.clone().take(size).skip(offset).get().await?;
            let fetched = page.len() as u64;
            if fetched == 0 || !callback(page) || fetched < size {
                return Ok(());
            }
            offset += fetched;
        }
    }
}
