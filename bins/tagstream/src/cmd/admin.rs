use std::time::Duration;

use tagstream_engine::{Backend, Group, StatTable, StreamConfig};

use crate::config::{AppConfig, ClaimArgs, PendingArgs, StatsArgs, StoreKind};
use crate::error::CliError;

fn warn_if_ephemeral(config: &AppConfig) {
    if config.store.kind == StoreKind::Memory {
        tracing::warn!("in-memory store starts empty; point [store] at redis to inspect a live topic");
    }
}

pub async fn stats(config: Option<&str>, args: StatsArgs) -> Result<(), CliError> {
    let (config, backend) = super::load(config).await?;
    warn_if_ephemeral(&config);
    show_stats(&backend, &config.stream, &args).await
}

async fn show_stats(backend: &Backend, stream: &StreamConfig, args: &StatsArgs) -> Result<(), CliError> {
    let table = StatTable::new(backend.hash.clone(), &args.topic);
    let now = chrono::Utc::now();
    println!(
        "{:<32} {:<12} {:>8} {:>10} {:<22} {:<22} {}",
        "name", "tag", "qps", "latency", "last read", "frontier", "state"
    );
    for (name, stat) in table.all().await? {
        let state = if stat.is_stale(now, stream.stat_alive()) {
            "stale"
        } else if stat.is_lagging(stream.latency_tolerance) {
            "lagging"
        } else {
            "ok"
        };
        println!(
            "{:<32} {:<12} {:>8} {:>10} {:<22} {:<22} {}",
            name, stat.tag_id, stat.qps, stat.latency_entries, stat.last_read_id, stat.last_entry_id, state
        );
    }
    if args.reset {
        table.clear().await?;
        tracing::info!(topic = %args.topic, "stats table cleared");
    }
    Ok(())
}

pub async fn pending(config: Option<&str>, args: PendingArgs) -> Result<(), CliError> {
    let (config, backend) = super::load(config).await?;
    warn_if_ephemeral(&config);
    show_pending(&backend, &args).await
}

/// Read-only: never creates the topic or the group.
async fn show_pending(backend: &Backend, args: &PendingArgs) -> Result<(), CliError> {
    let summary = backend.log.pending(&args.topic, &args.group).await?;
    let range = match (summary.lowest_id, summary.highest_id) {
        (Some(lo), Some(hi)) => format!("{lo} .. {hi}"),
        _ => "-".into(),
    };
    println!("pending: {}  ids: {range}", summary.count);
    for (member, count) in &summary.consumers {
        println!("  {member:<24} {count:>8}");
    }

    let entries = backend.log.pending_entries(&args.topic, &args.group, args.count).await?;
    if !entries.is_empty() {
        println!("{:<22} {:<24} {:>10} {:>10}", "id", "member", "idle", "deliveries");
    }
    for entry in entries {
        println!(
            "{:<22} {:<24} {:>10} {:>10}",
            entry.id.to_string(),
            entry.consumer,
            format!("{:.1?}", entry.idle),
            entry.delivery_count
        );
    }
    Ok(())
}

pub async fn claim(config: Option<&str>, args: ClaimArgs) -> Result<(), CliError> {
    let (config, backend) = super::load(config).await?;
    warn_if_ephemeral(&config);

    let group = Group::new(&backend, &args.topic, &args.group, &args.sweeper, config.stream).await?;
    let claimed = group
        .claim_idle(&args.sweeper, Duration::from_millis(args.min_idle_ms))
        .await?;
    println!("claimed {} entries for '{}'", claimed.len(), args.sweeper);
    for id in claimed {
        println!("  {id}");
    }
    Ok(())
}
