use crate::{database::get_db, error::Result};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::FindOptions,
    Collection, Database,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize, Serialize)]
pub struct Aircraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,
    pub registration: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}
#[derive(Debug, Deserialize)]
pub struct AircraftRequest {
    pub registration: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AircraftResponse {
    pub id: String,
    pub registration: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub model: String,
}

impl From<&Aircraft> for AircraftResponse {
    fn from(aircraft: &Aircraft) -> Self {
        AircraftResponse {
            id: aircraft._id.map(|id| id.to_hex()).unwrap_or_default(),
            registration: aircraft.registration.clone(),
            kind: aircraft.kind.clone(),
            model: aircraft.model.clone(),
        }
    }
}

impl Aircraft {
    pub async fn save(&mut self) -> Result<ObjectId> {
        let db: Database = get_db()?;
        let collection: Collection<Aircraft> = db.collection::<Aircraft>("aircraft");

        let id = ObjectId::new();
        self._id = Some(id);
        self.registration = self.registration.trim().to_uppercase();

        collection.insert_one(&*self, None).await?;
        Ok(id)
    }
    pub async fn find_many() -> Result<Vec<AircraftResponse>> {
        let db: Database = get_db()?;
        let collection: Collection<Aircraft> = db.collection::<Aircraft>("aircraft");

        let options = FindOptions::builder().sort(doc! { "registration": 1 }).build();
        let aircraft: Vec<Aircraft> = collection.find(None, options).await?.try_collect().await?;

        Ok(aircraft.iter().map(AircraftResponse::from).collect())
    }
    pub async fn find_by_id(_id: &ObjectId) -> Result<Option<Aircraft>> {
        let db: Database = get_db()?;
        let collection: Collection<Aircraft> = db.collection::<Aircraft>("aircraft");

        Ok(collection.find_one(doc! { "_id": _id }, None).await?)
    }
    pub async fn find_summaries(ids: &[ObjectId]) -> Result<HashMap<ObjectId, AircraftResponse>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let db: Database = get_db()?;
        let collection: Collection<Aircraft> = db.collection::<Aircraft>("aircraft");

        let aircraft: Vec<Aircraft> = collection
            .find(doc! { "_id": { "$in": ids.to_vec() } }, None)
            .await?
            .try_collect()
            .await?;

        Ok(aircraft
            .iter()
            .filter_map(|a| Some((a._id?, AircraftResponse::from(a))))
            .collect())
    }
}
