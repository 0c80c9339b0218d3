use std::io::Write;

use anyhow::{Context, bail};
use keeplog_store::{Action, EntryId, LogStore, Meta, SweepCriteria, SyncUpdate};
use serde_json::json;
use tracing::info;

use crate::config::Command;

fn parse_id(raw: &str) -> anyhow::Result<EntryId> {
    raw.parse().with_context(|| format!("Bad entry id {raw:?}, expected time,node,seq"))
}

fn print_entry(out: &mut impl Write, action: &Action, meta: &Meta) -> anyhow::Result<()> {
    writeln!(out, "{}", json!({ "action": action, "meta": meta }))?;
    Ok(())
}

/// Meta of the entry with this id, for age bounds
async fn bound(store: &LogStore, raw: &str) -> anyhow::Result<Meta> {
    let id = parse_id(raw)?;
    match store.by_id(&id).await? {
        Some((_, meta)) => Ok(meta),
        None => bail!("No entry {id}"),
    }
}

/// Run one subcommand, writing JSON lines to `out`
pub async fn run(store: &LogStore, command: Command, out: &mut impl Write) -> anyhow::Result<()> {
    match command {
        Command::Add {
            action,
            reasons,
            node,
            seq,
            time,
        } => {
            let action: Action =
                serde_json::from_str(&action).context("Action must be valid JSON")?;
            let time = time.unwrap_or_else(|| chrono::Utc::now().timestamp_millis().max(0) as u64);
            let meta = Meta::new(EntryId::new(time, node, seq), time).with_reasons(reasons);
            let id = meta.id.clone();
            match store.add(action, meta).await? {
                Some(meta) => {
                    info!(%id, added = ?meta.added, "Added entry");
                    writeln!(out, "{}", json!({ "id": id, "added": meta.added }))?;
                }
                None => writeln!(out, "{}", json!({ "id": id, "duplicate": true }))?,
            }
        }

        Command::Get { id } => {
            let id = parse_id(&id)?;
            match store.by_id(&id).await? {
                Some((action, meta)) => print_entry(out, &action, &meta)?,
                None => bail!("No entry {id}"),
            }
        }

        Command::Remove { id } => {
            let id = parse_id(&id)?;
            match store.remove(&id).await? {
                Some((action, meta)) => print_entry(out, &action, &meta)?,
                None => bail!("No entry {id}"),
            }
        }

        Command::List { order, all } => {
            if all {
                for (action, meta) in store.entries(order).await? {
                    print_entry(out, &action, &meta)?;
                }
            } else {
                let page = store.get(order).await?;
                for (action, meta) in &page.entries {
                    print_entry(out, action, meta)?;
                }
                if let Some(next) = &page.next {
                    eprintln!("More entries follow at offset {}, use --all", next.offset());
                }
            }
        }

        Command::Sweep {
            reason,
            min_added,
            max_added,
            older_than,
            younger_than,
        } => {
            let mut criteria = SweepCriteria {
                min_added,
                max_added,
                ..SweepCriteria::default()
            };
            if let Some(raw) = older_than {
                criteria.older_than = Some(bound(store, &raw).await?);
            }
            if let Some(raw) = younger_than {
                criteria.younger_than = Some(bound(store, &raw).await?);
            }

            let mut removed = Vec::new();
            let report = store
                .remove_reason(&reason, &criteria, |action, meta| removed.push((action, meta)))
                .await?;
            for (action, meta) in &removed {
                print_entry(out, action, meta)?;
            }
            info!(
                reason = %reason,
                matched = report.matched,
                deleted = report.deleted,
                shrunk = report.shrunk,
                "Sweep finished"
            );
        }

        Command::Cursor { sent, received } => {
            let cursor = if sent.is_some() || received.is_some() {
                store.set_last_synced(SyncUpdate { sent, received }).await?
            } else {
                store.last_synced().await?
            };
            writeln!(out, "{}", serde_json::to_string(&cursor)?)?;
        }

        Command::Stats => {
            let (last_added, count, synced) = tokio::try_join!(
                store.last_added(),
                store.count(),
                store.last_synced(),
            )?;
            writeln!(
                out,
                "{}",
                json!({ "last_added": last_added, "entries": count, "last_synced": synced })
            )?;
        }

        Command::Destroy { yes } => {
            if !yes {
                bail!("Refusing to destroy the store without --yes");
            }
            store.destroy().await?;
            info!("Store destroyed");
        }
    }
    Ok(())
}
