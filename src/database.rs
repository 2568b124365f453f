use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Client, Database, IndexModel,
};
use std::sync::OnceLock;

use crate::error::{Error, Result};

static DB: OnceLock<Database> = OnceLock::new();

pub async fn connect(uri: &str, name: &str) -> Result<()> {
    let client = Client::with_uri_str(uri).await?;
    let db = client.database(name);

    ensure_indexes(&db).await?;

    if DB.set(db).is_err() {
        tracing::warn!("database handle was already initialized");
    }
    tracing::info!(database = name, "connected to MongoDB");
    Ok(())
}

pub fn get_db() -> Result<Database> {
    DB.get()
        .cloned()
        .ok_or_else(|| Error::Upstream("DATABASE_NOT_CONNECTED".to_string()))
}

async fn ensure_indexes(db: &Database) -> Result<()> {
    let unique = || IndexOptions::builder().unique(true).build();
    let indexes = [
        ("occurrence-assessments", doc! { "occurrence_id": 1 }, true),
        ("investigations", doc! { "occurrence_id": 1 }, true),
        ("profiles", doc! { "email": 1 }, true),
        ("occurrence-details", doc! { "occurrence_id": 1 }, false),
        ("attachments", doc! { "occurrence_id": 1 }, false),
        ("interviews", doc! { "investigation_id": 1 }, false),
        ("communications", doc! { "investigation_id": 1 }, false),
    ];

    for (collection, keys, is_unique) in indexes {
        let mut model = IndexModel::builder().keys(keys).build();
        if is_unique {
            model.options = Some(unique());
        }
        db.collection::<mongodb::bson::Document>(collection)
            .create_index(model, None)
            .await?;
    }
    Ok(())
}

/// Next value of a named counter, starting at 1. Atomic across requests.
pub async fn next_sequence(key: &str) -> Result<i64> {
    let db: Database = get_db()?;
    let counters = db.collection::<mongodb::bson::Document>("counters");

    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();
    let counter = counters
        .find_one_and_update(doc! { "_id": key }, doc! { "$inc": { "seq": 1_i64 } }, options)
        .await?
        .ok_or_else(|| Error::Upstream("COUNTER_UPDATE_FAILED".to_string()))?;

    counter
        .get_i64("seq")
        .map_err(|error| Error::Upstream(error.to_string()))
}
