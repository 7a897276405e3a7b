//! Publish order JSON files onto the orderline message log.
//!
//! Usage: `orderline-publish <partition> <file.json>...`
//!
//! A file holding a JSON array is published one message per element;
//! anything else is published as a single message, byte for byte.

use orderline_api::telemetry::{init_tracing, TelemetryConfig};
use orderline_api::{ApiError, ApiResult, AppConfig, PgMessageLog};

#[tokio::main]
async fn main() -> ApiResult<()> {
    init_tracing(&TelemetryConfig::default())?;

    let mut args = std::env::args().skip(1);
    let partition = args
        .next()
        .ok_or_else(|| ApiError::invalid_input("usage: orderline-publish <partition> <file.json>..."))?;
    let partition: i32 = partition
        .parse()
        .map_err(|_| ApiError::invalid_input(format!("Invalid partition: {}", partition)))?;
    let files: Vec<String> = args.collect();
    if files.is_empty() {
        return Err(ApiError::missing_field("file"));
    }

    let config = AppConfig::load()?;
    let pool = config.database.create_pool()?;
    let log = PgMessageLog::new(pool.clone(), config.ingest.poll_interval);
    log.ensure_schema().await?;

    let mut published = 0usize;
    for file in &files {
        let bytes = std::fs::read(file)
            .map_err(|e| ApiError::invalid_input(format!("Failed to read {}: {}", file, e)))?;
        for payload in split_payloads(&bytes)? {
            let position = log.publish(partition, &payload).await?;
            tracing::info!(file = %file, %position, "Published");
            published += 1;
        }
    }

    tracing::info!(published, partition, "Done");
    pool.close();
    Ok(())
}

fn split_payloads(bytes: &[u8]) -> ApiResult<Vec<Vec<u8>>> {
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Array(values)) => values
            .iter()
            .map(|v| {
                serde_json::to_vec(v)
                    .map_err(|e| ApiError::internal_error(format!("Failed to encode: {}", e)))
            })
            .collect(),
        _ => Ok(vec![bytes.to_vec()]),
    }
}
