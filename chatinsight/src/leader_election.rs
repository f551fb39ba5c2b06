use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Background task for leader election.
///
/// Only the leader runs the analysis scheduler. Leadership is a PostgreSQL advisory lock; advisory
/// locks are session-based, so the connection that took the lock is held for as long as we lead.
/// On shutdown the lock is released explicitly because returning the connection to the pool
/// would otherwise keep it.
#[instrument(skip_all, fields(lock_id = lock_id))]
pub async fn leader_election_task<F1, F2, Fut1, Fut2>(
    pool: PgPool,
    check_interval: Duration,
    is_leader: Arc<AtomicBool>,
    lock_id: i64,
    shutdown: CancellationToken,
    on_gain_leadership: F1,
    on_lose_leadership: F2,
) where
    F1: Fn() -> Fut1 + Send + 'static,
    F2: Fn() -> Fut2 + Send + 'static,
    Fut1: Future<Output = anyhow::Result<()>> + Send + 'static,
    Fut2: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut interval = tokio::time::interval(check_interval);
    let mut leader_conn: Option<PoolConnection<Postgres>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if !is_leader.load(Ordering::Relaxed) {
            match try_acquire(&pool, lock_id).await {
                Ok(Some(conn)) => {
                    info!("Gained leadership");
                    is_leader.store(true, Ordering::Relaxed);
                    leader_conn = Some(conn);

                    if let Err(e) = on_gain_leadership().await {
                        error!("Failed to execute on_gain_leadership callback: {}", e);
                    }
                }
                Ok(None) => debug!("Following - will retry"),
                Err(e) => error!("Failed to check leader lock: {}", e),
            }
            continue;
        }

        let Some(conn) = leader_conn.as_mut() else {
            error!("Inconsistent state: is_leader=true but no connection");
            is_leader.store(false, Ordering::Relaxed);
            continue;
        };

        // the lock lives exactly as long as this connection
        match sqlx::query("SELECT 1").execute(&mut **conn).await {
            Ok(_) => debug!("Leadership renewed (connection alive)"),
            Err(e) => {
                warn!("Lost leadership (connection died): {}", e);
                is_leader.store(false, Ordering::Relaxed);
                leader_conn = None;

                if let Err(e) = on_lose_leadership().await {
                    error!("Failed to execute on_lose_leadership callback: {}", e);
                }
            }
        }
    }

    if let Some(mut conn) = leader_conn.take() {
        is_leader.store(false, Ordering::Relaxed);
        if let Err(e) = on_lose_leadership().await {
            error!("Failed to execute on_lose_leadership callback: {}", e);
        }
        match sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(lock_id)
            .fetch_one(&mut *conn)
            .await
        {
            Ok(_) => info!("Released leadership"),
            Err(e) => warn!("Failed to release leader lock: {}", e),
        }
    }
}

async fn try_acquire(pool: &PgPool, lock_id: i64) -> Result<Option<PoolConnection<Postgres>>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
        .bind(lock_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(acquired.then_some(conn))
}
