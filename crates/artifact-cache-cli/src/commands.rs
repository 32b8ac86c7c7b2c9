//! Subcommand handlers. Each returns the JSON document printed to stdout.

use anyhow::Result;
use artifact_cache::{signature_of, ArtifactCache, Namespace, SaveOutcome};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

pub fn stats(cache: &ArtifactCache) -> Result<Value> {
    let rows = cache.namespace_rows()?;
    let namespaces: Vec<Value> = rows
        .iter()
        .map(|(table, count)| {
            json!({
                "namespace": table.namespace(),
                "table": table.as_str(),
                "rows": count,
            })
        })
        .collect();

    Ok(json!({
        "store": cache.location().display().to_string(),
        "max_rows": cache.config().max_rows,
        "namespaces": namespaces,
    }))
}

pub fn get(cache: &ArtifactCache, namespace: &str, source: &Path, entity: &str) -> Result<Value> {
    let ns = Namespace::new(namespace)?;
    let signature = signature_of(source);
    let payload = cache.load(&ns, source, entity);

    Ok(json!({
        "namespace": ns.as_str(),
        "entity": entity,
        "source_readable": signature.is_some(),
        "hit": payload.is_some(),
        "payload": payload,
    }))
}

pub fn put(
    cache: &ArtifactCache,
    namespace: &str,
    source: &Path,
    entity: &str,
    payload: &str,
) -> Result<Value> {
    let ns = Namespace::new(namespace)?;
    let outcome = match cache.save(&ns, source, entity, payload) {
        SaveOutcome::Skipped => "skipped",
        SaveOutcome::MemoryOnly => "memory_only",
        SaveOutcome::Persisted => "persisted",
    };

    Ok(json!({
        "namespace": ns.as_str(),
        "entity": entity,
        "outcome": outcome,
    }))
}

pub fn prune(cache: &ArtifactCache, namespace: &str, max_rows: Option<usize>) -> Result<Value> {
    let ns = Namespace::new(namespace)?;
    let keep = max_rows.unwrap_or(cache.config().max_rows);
    let deleted = cache.prune_namespace(&ns, keep)?;
    info!("Pruned {} rows from {}", deleted, ns);

    Ok(json!({
        "namespace": ns.as_str(),
        "kept_at_most": keep,
        "deleted": deleted,
    }))
}

pub fn purge(cache: &ArtifactCache, namespace: &str) -> Result<Value> {
    let ns = Namespace::new(namespace)?;
    let deleted = cache.purge_namespace(&ns)?;
    info!("Purged {} rows from {}", deleted, ns);

    Ok(json!({
        "namespace": ns.as_str(),
        "deleted": deleted,
    }))
}
