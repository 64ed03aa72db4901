//! Resource facade
//!
//! The caller-facing surface: typed `get/post/put/patch/delete` plus the two
//! connection entry points. Reads go through the scoped [`Loader`]; writes
//! go straight to the transport and evict the written path from the cache.
//!
//! Build one `Resource` per inbound request and pass it down by reference.

use crate::bulk::{BulkConfig, BulkLoader, ConfigError};
use crate::loader::{LoadError, Loader, LoaderConfig};
use crate::pagination::{
    connection_from_collection, connection_from_page, paged_args, split_pagination_args,
    Connection, PageResult, PaginationError,
};
use crate::path::{build_path, CanonicalPath};
use crate::transport::{Method, Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ResourceError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub loader: LoaderConfig,
    pub bulk: BulkConfig,
}

pub struct Resource {
    transport: Arc<dyn Transport>,
    loader: Loader,
    config: ResourceConfig,
}

impl Resource {
    pub fn new(transport: Arc<dyn Transport>, config: ResourceConfig) -> Self {
        let loader = Loader::new(Arc::clone(&transport), config.loader);
        Self {
            transport,
            loader,
            config,
        }
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn config(&self) -> &ResourceConfig {
        &self.config
    }

    /// Fetch one entity. `Ok(None)` means not found.
    pub async fn get(&self, path: &str, args: Option<&Map<String, Value>>) -> Result<Option<Value>> {
        let path = build_path(path, args);
        Ok(self.loader.load(path).await?)
    }

    /// Connection over a backend that paginates itself.
    ///
    /// `Ok(None)` when the backend has nothing at `path`.
    pub async fn get_paginated_connection(
        &self,
        path: &str,
        args: &Map<String, Value>,
    ) -> Result<Option<Connection>> {
        let (page, filters) = split_pagination_args(args)?;
        let raw = self.get(path, Some(&paged_args(&page, &filters))).await?;

        let result = PageResult::classify(raw);
        if let PageResult::Malformed(reason) = &result {
            warn!(path, reason = %reason, "paged response violates contract");
        }
        Ok(connection_from_page(result, &page)?)
    }

    /// Connection over a backend that returns the whole collection.
    pub async fn get_unpaginated_connection(
        &self,
        path: &str,
        args: &Map<String, Value>,
    ) -> Result<Connection> {
        let (page, filters) = split_pagination_args(args)?;
        let raw = self.get(path, Some(&filters)).await?;

        connection_from_collection(raw, &page).map_err(|err| {
            warn!(path, error = %err, "unpaged response violates contract");
            err.into()
        })
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Option<Value>> {
        self.write(Method::Post, path, Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Option<Value>> {
        self.write(Method::Put, path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: &Value) -> Result<Option<Value>> {
        self.write(Method::Patch, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.write(Method::Delete, path, None).await?;
        Ok(())
    }

    /// A keyed bulk loader over the same transport and chunking config.
    pub fn bulk_loader<P, K>(&self, path_fn: P, key_fn: K) -> Result<BulkLoader>
    where
        P: Fn(&[String]) -> String + Send + Sync + 'static,
        K: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        Ok(BulkLoader::new(
            Arc::clone(&self.transport),
            path_fn,
            key_fn,
            self.config.bulk,
        )?)
    }

    async fn write(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let response = self.transport.request(method, path, body).await?;
        self.loader.clear(&CanonicalPath::from(path));
        Ok(response)
    }
}
