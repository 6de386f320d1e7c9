//! One-shot runs of the background jobs, for cron and for operators.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use atl_config::{resolve_secrets, WorkshopConfig};
use atl_notify::{
    BroadcastRealtime, Dispatcher, DrainReport, ExpoPushGateway, NoopPushGateway, PushGateway,
};
use atl_runtime::Sweep;
use atl_workflow::{Clock, SystemClock};

use super::open_store;

pub async fn sweep(config: &WorkshopConfig, once: bool) -> Result<()> {
    let store = open_store().await?;
    let sweep = Sweep::new(store, Arc::new(SystemClock), config)?;

    loop {
        let report = sweep.run_once().await.context("sweep pass failed")?;
        println!("{}", serde_json::to_string(&report)?);
        if once {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(config.sweep.interval_secs)).await;
    }
}

/// Drain until a pass claims nothing. Realtime has no subscribers here, so
/// only push reaches devices.
pub async fn drain_outbox(config: &WorkshopConfig) -> Result<()> {
    let store = open_store().await?;
    let secrets = resolve_secrets(config)?;
    let push: Arc<dyn PushGateway> = if config.push.enabled {
        Arc::new(ExpoPushGateway::new(
            config.push.base_url.clone(),
            secrets.push_access_token,
        ))
    } else {
        Arc::new(NoopPushGateway)
    };
    let dispatcher = Dispatcher::new(
        store,
        Arc::new(BroadcastRealtime::default()),
        push,
        config.outbox.clone(),
    )
    .with_dispatcher_id(format!("atl-cli-{}", std::process::id()));
    let clock = SystemClock;

    let mut total = DrainReport::default();
    loop {
        let r = dispatcher
            .drain_once(clock.now())
            .await
            .context("outbox drain failed")?;
        if r.is_idle() {
            break;
        }
        total.claimed += r.claimed;
        total.sent += r.sent;
        total.realtime_failures += r.realtime_failures;
        total.push_attempted += r.push_attempted;
        total.push_failures += r.push_failures;
        total.released += r.released;
        total.failed += r.failed;
        // Rows released for retry come back immediately; stop at one batch
        // with no delivery to avoid spinning on them.
        if r.sent == 0 {
            break;
        }
    }
    println!("{}", serde_json::to_string(&total)?);
    Ok(())
}
