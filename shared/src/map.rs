//! GeoJSON for the listings map.
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;

use crate::collection::CollectionItem;
use crate::model::{Payload, RecordBase};

/// One point feature per item with map coordinates. Items without a pin are
/// skipped; order follows the input.
pub fn listing_features<P: Payload>(items: &[CollectionItem<P>]) -> FeatureCollection {
    let features = items
        .iter()
        .filter_map(|item| {
            let at = item.record.payload.coordinates()?;
            let id = item.record.id().as_str();

            let mut properties = JsonObject::new();
            properties.insert("id".into(), json!(id));
            properties.insert("kind".into(), json!(P::COLLECTION.table()));
            properties.insert("title".into(), json!(item.record.payload.title()));
            if let Some(price) = item.record.payload.price() {
                properties.insert("price".into(), json!(price.to_string()));
            }
            properties.insert("is_liked".into(), json!(item.derived.is_liked));

            Some(Feature {
                bbox: None,
                // GeoJSON positions are [longitude, latitude].
                geometry: Some(Geometry::new(Value::Point(vec![at.lon, at.lat]))),
                id: Some(Id::String(id.to_string())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}
