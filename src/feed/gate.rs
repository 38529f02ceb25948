//! Rate gate: token-bucket throttling plus retry for every outbound call.
//!
//! The bucket starts full at capacity `C` and refills at `R` tokens/sec.
//! `acquire` suspends cooperatively; waiters go through a fair async mutex,
//! so grants are FIFO. Over any window of `t` seconds at most `C + R·t`
//! tokens are handed out.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{SyncError, SyncResult};
use crate::feed::MarketFeed;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::DataFrame;

pub struct RateGate {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

struct Bucket {
    /// May go negative: a waiter "borrows" its token and sleeps off the debt.
    available: f64,
    last_refill: Instant,
}

impl RateGate {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                available: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec,
        }
    }

    /// Take one token, suspending until the bucket can cover it.
    pub async fn acquire(&self) {
        let wait = {
            let mut b = self.bucket.lock().await;
            let now = Instant::now();
            let refilled = b.available
                + now.duration_since(b.last_refill).as_secs_f64() * self.refill_per_sec;
            b.available = refilled.min(self.capacity) - 1.0;
            b.last_refill = now;
            if b.available >= 0.0 {
                None
            } else {
                Some(Duration::from_secs_f64(
                    -b.available / self.refill_per_sec,
                ))
            }
        };
        if let Some(d) = wait {
            tokio::time::sleep(d).await;
        }
    }
}

/// Retry policy applied around a gated call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Total budget for all attempts of one logical call.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            deadline: Duration::from_secs(60),
        }
    }
}

/// Run `op` through the gate with exponential backoff on retryable kinds.
///
/// Delay before attempt `i+1` is `base·2^i + jitter(0, base)`, capped.
/// The whole call is bounded by `policy.deadline`.
pub async fn call_with_retry<T, Op, Fut>(
    gate: &RateGate,
    policy: &RetryPolicy,
    op: Op,
) -> SyncResult<T>
where
    Op: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = SyncResult<T>> + Send,
{
    let attempts = async {
        let mut last = SyncError::Unknown("no attempts made".into());
        for attempt in 0..policy.max_attempts {
            gate.acquire().await;
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                    let backoff = policy
                        .base
                        .checked_mul(1 << attempt)
                        .unwrap_or(policy.cap)
                        .min(policy.cap);
                    let jitter = policy.base.mul_f64(rand::random::<f64>());
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = policy.max_attempts,
                        "upstream call failed ({e}), retrying in {:?}",
                        backoff + jitter
                    );
                    tokio::time::sleep(backoff + jitter).await;
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    };
    match tokio::time::timeout(policy.deadline, attempts).await {
        Ok(res) => res,
        Err(_) => Err(SyncError::DeadlineExceeded),
    }
}

/// Decorator that forces every feed call through the gate and retry loop.
pub struct GatedFeed<F> {
    inner: F,
    gate: RateGate,
    policy: RetryPolicy,
}

impl<F: MarketFeed> GatedFeed<F> {
    pub fn new(inner: F, gate: RateGate, policy: RetryPolicy) -> Self {
        Self {
            inner,
            gate,
            policy,
        }
    }

    async fn guarded<T, Op, Fut>(&self, op: Op) -> SyncResult<T>
    where
        Op: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = SyncResult<T>> + Send,
    {
        call_with_retry(&self.gate, &self.policy, op).await
    }
}

#[async_trait]
impl<F: MarketFeed> MarketFeed for GatedFeed<F> {
    async fn symbol_list(&self) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.symbol_list()).await
    }

    async fn symbol_industry(&self) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.symbol_industry()).await
    }

    async fn daily_bars(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.daily_bars(code, start, end))
            .await
    }

    async fn minute_bars(&self, code: &str) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.minute_bars(code)).await
    }

    async fn realtime_quote(&self, code: &str) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.realtime_quote(code)).await
    }

    async fn financials(&self, code: &str) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.financials(code)).await
    }

    async fn valuation_snapshot(&self) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.valuation_snapshot()).await
    }

    async fn fund_flow_rank(&self) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.fund_flow_rank()).await
    }

    async fn margin_summary(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.margin_summary(date)).await
    }

    async fn dragon_tiger(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.dragon_tiger(date)).await
    }

    async fn northbound_flow(&self) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.northbound_flow()).await
    }

    async fn market_sentiment(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.market_sentiment(date)).await
    }

    async fn limit_up_pool(&self, date: NaiveDate) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.limit_up_pool(date)).await
    }

    async fn sector_quotes(&self) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.sector_quotes()).await
    }

    async fn news_since(&self, since: NaiveDateTime) -> SyncResult<DataFrame> {
        self.guarded(|| self.inner.news_since(since)).await
    }
}
