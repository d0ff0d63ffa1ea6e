use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::{Value, json};
use stockpile_cache::cache::NULL_MARKER;
use stockpile_cache::{CacheSystem, InvalidateOptions, build_key};

use crate::cli::{GetArgs, InvalidateArgs, KeyArgs, OutputFormat};
use crate::output::{print_rows, print_success, print_value, print_warning};

pub async fn ping(system: &CacheSystem, format: OutputFormat) -> Result<()> {
    let store = system.store();
    let reachable = store.ping().await.is_ok();
    let info = json!({
        "store": store.name(),
        "distributed": system.is_distributed(),
        "reachable": reachable,
        "instanceId": system.instance_id(),
    });

    if matches!(format, OutputFormat::Json) {
        print_value(&info, format);
        return Ok(());
    }
    if !reachable {
        bail!("{} store did not answer PING", store.name());
    }
    if system.is_distributed() {
        print_success(&format!("{} store is reachable", store.name()));
    } else {
        print_warning("Redis unavailable or disabled; running on the in-process store");
    }
    Ok(())
}

pub async fn get(system: &CacheSystem, args: &GetArgs, format: OutputFormat) -> Result<()> {
    let raw = system
        .store()
        .get(&args.key)
        .await
        .with_context(|| format!("reading {}", args.key))?;

    match raw.as_deref() {
        None => print_warning(&format!("{} is not cached", args.key)),
        Some(NULL_MARKER) => {
            println!("{} {}", args.key.cyan(), "(null marker: confirmed absent)".dimmed())
        }
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)
                .unwrap_or_else(|_| Value::String(raw.to_string()));
            print_value(&value, format);
        }
    }
    Ok(())
}

pub fn key(args: &KeyArgs) -> Result<()> {
    let params: Value = serde_json::from_str(&args.params).context("params must be valid JSON")?;
    if !params.is_object() {
        bail!("params must be a JSON object");
    }
    println!("{}", build_key(&args.namespace, &params));
    Ok(())
}

pub async fn invalidate(
    system: &CacheSystem,
    args: &InvalidateArgs,
    format: OutputFormat,
) -> Result<()> {
    let opts = invalidate_options(args);
    let report = system.bus().invalidate_many(&args.tags, opts).await;

    if matches!(format, OutputFormat::Json) {
        print_value(
            &json!({ "tags": report.tags, "keysDeleted": report.keys_deleted }),
            format,
        );
        return Ok(());
    }

    let rows = report.tags.iter().map(|tag| vec![tag.clone()]).collect();
    print_rows(&["Cleared tag"], rows);
    print_success(&format!(
        "{} tag(s) invalidated, {} key(s) deleted",
        report.tags.len(),
        report.keys_deleted
    ));
    Ok(())
}

fn invalidate_options(args: &InvalidateArgs) -> InvalidateOptions {
    if args.local_only {
        return InvalidateOptions::local_only();
    }
    let mut opts = InvalidateOptions::default();
    if args.no_cascade {
        opts = opts.without_cascade();
    }
    if args.no_broadcast {
        opts = opts.without_broadcast();
    }
    opts
}
