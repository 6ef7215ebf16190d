use fred::interfaces::KeysInterface;

use crate::error::ApiError;

/// Fixed-window rate limiter backed by Valkey.
///
/// Increments `rate:{prefix}:{identifier}`, setting a TTL of `window_secs`
/// when the key is first created. Returns `ApiError::TooManyRequests` once
/// the counter exceeds `max_attempts`.
pub async fn check_rate(
    valkey: &fred::clients::Pool,
    prefix: &str,
    identifier: &str,
    max_attempts: u64,
    window_secs: i64,
) -> Result<(), ApiError> {
    let key = format!("rate:{prefix}:{identifier}");

    let count: u64 = valkey.incr(&key).await?;

    if count == 1 {
        let _: () = valkey.expire(&key, window_secs, None).await?;
    }

    if count > max_attempts {
        tracing::warn!(prefix, identifier, count, "rate limit exceeded");
        return Err(ApiError::TooManyRequests);
    }

    Ok(())
}
