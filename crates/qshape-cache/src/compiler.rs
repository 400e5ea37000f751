//! Query compiler: shape extraction, plan lookup and execution entry points

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use qshape_expr::{Expr, Value};
use qshape_registry::QueryParser;

use crate::compiled::{CacheKey, CompiledQuery, MemoryPlanCache, NoPlanCache, PlanCache};
use crate::config::CacheConfig;
use crate::context::QueryContext;
use crate::extract;
use crate::nondeterminism::{self, NonDeterministicFunctions};
use crate::store::{DataStore, ExecutionError, ExecutionMode, QueryExecutor, Rows};
use crate::QueryError;

/// Shared entry point for running host query expressions against a store
///
/// Each call splits the query into a cache key and the current parameter
/// values. The store compiles a shape once; later calls with the same shape
/// reuse the artifact with their own parameters.
pub struct QueryCompiler {
    store: Arc<dyn DataStore>,
    cache: Arc<dyn PlanCache>,
    parser: QueryParser,
    non_deterministic: NonDeterministicFunctions,
}

impl QueryCompiler {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self::from_config(store, &CacheConfig::default())
    }

    pub fn from_config(store: Arc<dyn DataStore>, config: &CacheConfig) -> Self {
        let cache: Arc<dyn PlanCache> = if config.enabled {
            Arc::new(MemoryPlanCache::new(config.max_entries))
        } else {
            Arc::new(NoPlanCache::default())
        };
        Self {
            store,
            cache,
            parser: QueryParser::default(),
            non_deterministic: NonDeterministicFunctions::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn PlanCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Use a parser with custom node classification
    pub fn with_parser(mut self, parser: QueryParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_non_deterministic(mut self, functions: NonDeterministicFunctions) -> Self {
        self.non_deterministic = functions;
        self
    }

    pub fn cache(&self) -> &dyn PlanCache {
        self.cache.as_ref()
    }

    /// Look up or build the artifact for `query`'s shape.
    ///
    /// Extracted parameter values are appended to `context`.
    pub fn compile_and_get(
        &self,
        query: &Expr,
        context: &mut QueryContext,
        mode: ExecutionMode,
    ) -> Result<Arc<CompiledQuery>, QueryError> {
        let tagged = self.non_deterministic.tag(query);
        let extracted = extract::extract(&tagged, context.parameters_mut())?;
        let shape = nondeterminism::untag(&extracted);

        let key = CacheKey::new(self.store.model_identity(), mode, &shape);
        if let Some(compiled) = self.cache.get(&key) {
            debug!(fingerprint = %key.fingerprint(), "plan cache hit");
            return Ok(compiled);
        }
        debug!(fingerprint = %key.fingerprint(), shape = %key.shape_text(), "plan cache miss");

        let model = self.parser.parse(&shape)?;
        let element_type = model.element_type().clone();
        let executor = self
            .store
            .compile(&model, &element_type, mode)
            .map_err(QueryError::TargetCompilation)?;

        crate::log_event!(
            level: tracing::Level::INFO,
            event: "query_compiled",
            fingerprint: key.fingerprint(),
            mode: mode,
            operations: model.operations.len(),
            result_type: element_type.to_string()
        );

        let compiled = Arc::new(CompiledQuery::new(element_type, executor));
        let stored = self.cache.get_or_insert(key, compiled.clone());
        if !Arc::ptr_eq(&stored, &compiled) {
            warn!("discarding artifact from a racing compile of the same shape");
        }
        Ok(stored)
    }

    /// Run `query` and collect every row
    pub fn execute(&self, query: &Expr, context: &mut QueryContext) -> Result<Vec<Value>, QueryError> {
        self.rows(query, context)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(QueryError::Execution)
    }

    /// Run `query` and return its first row
    ///
    /// Rows after the first are never pulled from the store.
    pub fn execute_scalar(&self, query: &Expr, context: &mut QueryContext) -> Result<Value, QueryError> {
        match self.rows(query, context)?.next() {
            Some(row) => row.map_err(QueryError::Execution),
            None => Err(QueryError::EmptySequence),
        }
    }

    fn rows(&self, query: &Expr, context: &mut QueryContext) -> Result<Rows, QueryError> {
        let compiled = self.compile_and_get(query, context, ExecutionMode::Sync)?;
        match compiled.executor() {
            QueryExecutor::Sync(run) => run(context).map_err(QueryError::Execution),
            QueryExecutor::Async(_) => Err(QueryError::Execution(ExecutionError::from(
                "store returned a streaming executor for a synchronous query",
            ))),
        }
    }

    /// Run `query` as a stream of rows
    pub fn execute_stream(
        &self,
        query: &Expr,
        context: &mut QueryContext,
    ) -> Result<BoxStream<'static, Result<Value, QueryError>>, QueryError> {
        let compiled = self.compile_and_get(query, context, ExecutionMode::Async)?;
        let rows = match compiled.executor() {
            QueryExecutor::Async(run) => run(context)
                .map_err(QueryError::Execution)?
                .map_err(QueryError::Execution)
                .boxed(),
            QueryExecutor::Sync(run) => {
                let rows = run(context).map_err(QueryError::Execution)?;
                stream::iter(rows.map(|row| row.map_err(QueryError::Execution))).boxed()
            }
        };
        Ok(rows)
    }

    /// First row of the streamed result, abandoned when `cancel` completes first
    pub async fn execute_scalar_async<F>(
        &self,
        query: &Expr,
        context: &mut QueryContext,
        cancel: F,
    ) -> Result<Value, QueryError>
    where
        F: Future<Output = ()>,
    {
        let mut rows = self.execute_stream(query, context)?;
        tokio::select! {
            biased;
            _ = cancel => Err(QueryError::Cancelled),
            first = rows.next() => first.unwrap_or(Err(QueryError::EmptySequence)),
        }
    }
}
