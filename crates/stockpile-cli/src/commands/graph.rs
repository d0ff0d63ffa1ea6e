use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use stockpile_cache::CacheSystem;

use crate::cli::OutputFormat;
use crate::output::{print_rows, print_value};

pub fn graph(system: &CacheSystem, format: OutputFormat) -> Result<()> {
    let graph = system.bus().graph();

    if matches!(format, OutputFormat::Json) {
        let rules: serde_json::Map<_, _> = graph
            .rules()
            .keys()
            .map(|tag| {
                (
                    tag.clone(),
                    json!({
                        "dependents": graph.dependents(tag),
                        "namespaces": graph.namespaces(tag),
                    }),
                )
            })
            .collect();
        print_value(&json!({ "mode": graph.mode(), "rules": rules }), format);
        return Ok(());
    }

    println!("{}: {:?}", "Cascade mode".cyan(), graph.mode());
    let rows = graph
        .rules()
        .iter()
        .map(|(tag, targets)| vec![tag.clone(), targets.join(", ")])
        .collect();
    print_rows(&["Tag", "Invalidates"], rows);
    Ok(())
}
