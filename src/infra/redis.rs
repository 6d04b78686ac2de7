//! Redis-backed shared page store.

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tracing::info;

use crate::cache::{RemoteError, RemoteStore};

use super::error::InfraError;

/// Reads page values with `GET key`, or `HGET key <field>` for hash layouts.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    hash_field: Option<String>,
}

impl RedisStore {
    /// Open a managed connection and verify the server answers `PING`.
    pub async fn connect(url: &str, hash_field: Option<String>) -> Result<Self, InfraError> {
        let client = Client::open(url).map_err(|err| InfraError::remote(err.to_string()))?;
        let mut connection = ConnectionManager::new(client)
            .await
            .map_err(|err| InfraError::remote(err.to_string()))?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|err| InfraError::remote(err.to_string()))?;
        info!(reply = %pong, hash_field = hash_field.as_deref().unwrap_or(""), "remote store reachable");

        Ok(Self {
            connection,
            hash_field,
        })
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        let mut connection = self.connection.clone();
        let result: redis::RedisResult<Option<Vec<u8>>> = match self.hash_field.as_deref() {
            Some(field) => connection.hget(key, field).await,
            None => connection.get(key).await,
        };
        result.map_err(|err| {
            if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
                RemoteError::unavailable(err.to_string())
            } else {
                RemoteError::command(err.to_string())
            }
        })
    }
}
