use crate::common::config::RedisConfig;
use crate::errors::{ConfigError, Result};

const DEFAULT_POOL_SIZE: usize = 16;

/// Builds a RESP3 connection pool for `config`. Connections are opened lazily,
/// so this does not touch the network.
///
/// Blocking reads each hold one connection for the length of the block and a
/// cancellation borrows a second one, so size the pool above the number of
/// concurrent readers.
pub fn create_redis_pool(config: &RedisConfig) -> Result<deadpool_redis::Pool> {
    let cfg = deadpool_redis::Config {
        connection: Some(deadpool_redis::ConnectionInfo {
            addr: deadpool_redis::ConnectionAddr::Tcp(config.redis_host.clone(), config.redis_port),
            redis: deadpool_redis::RedisConnectionInfo {
                db: config.redis_db as i64,
                username: config.redis_username.clone(),
                password: config.redis_password.clone(),
                protocol: deadpool_redis::ProtocolVersion::RESP3,
            },
        }),
        pool: Some(deadpool_redis::PoolConfig {
            max_size: config.pool_size.unwrap_or(DEFAULT_POOL_SIZE),
            ..Default::default()
        }),
        ..Default::default()
    };
    cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| ConfigError::Pool(e.into()).into())
}
