use redis::Client;

/// Usage-event publisher client. `None` when no Redis URL is configured.
pub fn create_client(redis_url: Option<&str>) -> Result<Option<Client>, redis::RedisError> {
    redis_url
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(Client::open)
        .transpose()
}
