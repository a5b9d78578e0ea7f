use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use action_relay::{models::retry::RetryConfig, utils::retry_with_backoff};
use anyhow::{Result, anyhow};
use tokio::time::Instant;

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 20,
        max_delay_ms: 60,
        backoff_multiplier: 2,
    }
}

/// Test: Successful operations complete without retry
#[tokio::test]
async fn test_successful_operation_no_retry() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&fast_retry(3), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, anyhow::Error>("teams")
        }
    })
    .await?;

    assert_eq!(result, "teams");
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: Transient failures are retried until one succeeds
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&fast_retry(5), || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("directory unavailable"))
            } else {
                Ok("teams")
            }
        }
    })
    .await?;

    assert_eq!(result, "teams");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    Ok(())
}

/// Test: Permanent failures stop after max_attempts and return the last error
#[tokio::test]
async fn test_permanent_failure_exhausts_retries() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&fast_retry(4), || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(anyhow!("attempt {} failed", attempt))
        }
    })
    .await;

    let err = result.expect_err("should fail after max attempts");
    assert_eq!(err.to_string(), "attempt 4 failed");
    assert_eq!(attempts.load(Ordering::SeqCst), 4);

    Ok(())
}

/// Test: Backoff never waits longer than the configured cap
#[tokio::test]
async fn test_max_delay_cap_respected() -> Result<()> {
    let config = fast_retry(5);
    let start = Instant::now();

    let _ = retry_with_backoff(&config, || async { Err::<(), _>(anyhow!("Fail")) }).await;

    // 20 + 40 + 60 + 60 with at most 10% jitter each.
    let elapsed = start.elapsed().as_millis();
    assert!(elapsed >= 150, "backoff too short: {}ms", elapsed);
    assert!(elapsed < 1_000, "backoff ignored the cap: {}ms", elapsed);

    Ok(())
}
