use std::error::Error;

use dictcache::{CacheConfig, DictCache};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .json()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };
    let keyword = args.next().unwrap_or_else(|| "asp".to_string());
    let cache = DictCache::from_config(&config)?;

    cache
        .store("western")
        .load(
            None,
            vec![
                json!({"itemCode": "A1", "itemName": "Aspirin", "inputCode": "ASPL", "type": "drug"}),
                json!({"itemCode": "A10", "itemName": "Amoxicillin", "inputCode": "AMX", "type": "drug"}),
                json!({"itemCode": "B2", "itemName": "Bandage", "inputCode": "BDG", "type": "supply"}),
            ],
        )
        .await?;
    cache
        .store("herbal")
        .load(
            None,
            vec![json!({"itemCode": "H2", "itemName": "Aspen bark", "inputCode": "ASB", "type": "herb"})],
        )
        .await?;

    let result = cache.stores(["western", "herbal"]).search(&keyword).await;
    println!("search `{keyword}` -> {} ({})", result.message, result.code());
    for hit in &result.records {
        println!("  {}", hit.tagged());
    }

    let codes = cache.store("western").match_codes(&["A1", "B2"]).await?;
    println!("codes A1, B2 -> {}", serde_json::to_string(&codes)?);

    Ok(())
}
