//! Handlers for every subcommand except `run`.

use anyhow::{bail, Result};
use mapcache_core::time::format_timestamp;
use mapcache_core::{MappingKey, SyncTarget};
use mapcache_db::MapCacheRepository;
use mapcache_sync::{CacheSynchronizer, OnDemandTrigger};
use serde_json::json;

use crate::cli::MapCommands;

pub async fn populate(
    synchronizer: CacheSynchronizer,
    key: &str,
    value: &str,
    device: &str,
) -> Result<()> {
    let output = OnDemandTrigger::new(synchronizer)
        .populate(key, value, device)
        .await;

    if !output.success {
        bail!("{}", output.message);
    }
    println!("{}", output.message);
    Ok(())
}

pub async fn set_enabled(repo: &MapCacheRepository, enabled: bool) -> Result<()> {
    repo.set_enabled(enabled).await?;
    println!("map cache {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}

pub async fn set_workers(repo: &MapCacheRepository, count: usize) -> Result<()> {
    repo.set_worker_threads(count).await?;
    println!("worker-threads set to {}", count);
    Ok(())
}

pub async fn status(repo: &MapCacheRepository, migrations: (usize, usize), json: bool) -> Result<()> {
    let settings = repo.settings().await?;
    let bindings = repo.bindings().await?;

    if json {
        let out = json!({
            "enabled": settings.enabled,
            "worker_threads": settings.worker_threads,
            "bindings": bindings.len(),
            "migrations": { "total": migrations.0, "applied": migrations.1 },
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("enabled:         {}", settings.enabled);
    println!("worker-threads:  {}", settings.worker_threads);
    println!("bindings:        {}", bindings.len());
    println!("migrations:      {}/{}", migrations.1, migrations.0);
    Ok(())
}

pub async fn map(repo: &MapCacheRepository, command: MapCommands) -> Result<()> {
    match command {
        MapCommands::Add {
            key,
            value,
            interval,
        } => {
            let mapping = MappingKey::new(key, value);
            repo.upsert_mapping(&mapping, interval).await?;
            println!("mapping {} saved", mapping);
        }
        MapCommands::Bind {
            key,
            value,
            device,
            interval,
        } => {
            let mapping = MappingKey::new(key, value);
            repo.add_device(&mapping, &device, interval).await?;
            println!("{} bound to {}", device, mapping);
        }
        MapCommands::Unbind { key, value, device } => {
            let target = SyncTarget::new(MappingKey::new(key, value), device);
            if !repo.remove_device(&target).await? {
                bail!("no binding {}", target);
            }
            println!("removed {}", target);
        }
        MapCommands::Remove { key, value } => {
            let mapping = MappingKey::new(key, value);
            if !repo.remove_mapping(&mapping).await? {
                bail!("no mapping {}", mapping);
            }
            println!("removed {}", mapping);
        }
        MapCommands::Show { json } => show(repo, json).await?,
    }
    Ok(())
}

async fn show(repo: &MapCacheRepository, as_json: bool) -> Result<()> {
    let definitions = repo.definitions().await?;

    let mut mappings = Vec::with_capacity(definitions.len());
    for definition in &definitions {
        let mut devices = Vec::with_capacity(definition.devices.len());
        for binding in &definition.devices {
            let target = SyncTarget::new(definition.mapping.clone(), binding.device.clone());
            let entries = repo.cache_table(&target).await?.len();
            let stats = repo.poll_stats(&target).await?;
            devices.push(json!({
                "device": binding.device,
                "update_interval": binding.update_interval_override.unwrap_or(definition.update_interval_secs),
                "entries": entries,
                "last_poll": stats.map(|s| json!({
                    "start": format_timestamp(&s.start_timestamp),
                    "end": format_timestamp(&s.end_timestamp),
                    "duration": s.duration,
                    "entries_polled": s.entries_polled,
                })),
            }));
        }
        mappings.push(json!({
            "key": definition.mapping.key_selector,
            "value": definition.mapping.value_selector,
            "update_interval": definition.update_interval_secs,
            "devices": devices,
        }));
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&mappings)?);
        return Ok(());
    }

    if mappings.is_empty() {
        println!("no mappings");
        return Ok(());
    }

    for mapping in &mappings {
        println!(
            "{} -> {} (every {}s)",
            mapping["key"].as_str().unwrap_or_default(),
            mapping["value"].as_str().unwrap_or_default(),
            mapping["update_interval"]
        );
        for device in mapping["devices"].as_array().into_iter().flatten() {
            let last = device["last_poll"]["start"].as_str().unwrap_or("never");
            println!(
                "    {:<24} {:>6} entries   last poll {}",
                device["device"].as_str().unwrap_or_default(),
                device["entries"],
                last
            );
        }
    }
    Ok(())
}
