use std::time::Duration;

/// Runs `attempt` up to 3 times with exponential backoff (1s, 2s), matching the
/// `backoff.expo`/`max_tries=3` policy used for heartbeat and webhook delivery.
///
/// Returns the last error if every attempt fails.
pub async fn with_backoff<T, E, F, Fut>(mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    const MAX_ATTEMPTS: u32 = 3;
    let mut delay = Duration::from_secs(1);
    let mut last_err = None;
    for attempt_no in 0..MAX_ATTEMPTS {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                last_err = Some(e);
                if attempt_no + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
    Err(last_err.expect("loop always records an error before exiting"))
}
