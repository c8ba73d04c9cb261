//! Observation types
//!
//! Two layers:
//! - `Raw*` structs mirror the upstream (iNaturalist v2) JSON. Every field is
//!   optional because the upstream only returns the fields it was asked for.
//! - [`Observation`] is the canonical, immutable record used everywhere else.
//!
//! [`Observation::from_raw`] is the single explicit parse step. Its
//! defaulting rules do not depend on which fields were requested:
//! - name: preferred common name → species guess → `"Unknown"`
//! - coordinates: `geojson.coordinates` is `[lng, lat]`; absent → `(0, 0)`
//! - category: lower-cased iconic taxon name; absent → `"unknown"`
//! - observed_at: `HH:MM:SS` taken from `created_at`

use chrono::{DateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::category::Category;
use crate::errors::ObservationError;
use crate::ids::ObservationId;

/// Display name used when the source offers nothing better
pub const UNKNOWN_NAME: &str = "Unknown";

/// Upstream response envelope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationsResponse {
    #[serde(default)]
    pub total_results: Option<u64>,
    pub results: Vec<RawObservation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub id: Option<u64>,
    #[serde(default)]
    pub species_guess: Option<String>,
    #[serde(default)]
    pub geojson: Option<RawGeometry>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub taxon: Option<RawTaxon>,
    #[serde(default)]
    pub photos: Option<Vec<RawPhoto>>,
}

/// GeoJSON point; `coordinates` is `[lng, lat]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGeometry {
    #[serde(default)]
    pub coordinates: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTaxon {
    #[serde(default)]
    pub preferred_common_name: Option<String>,
    #[serde(default)]
    pub wikipedia_url: Option<String>,
    #[serde(default)]
    pub iconic_taxon_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPhoto {
    #[serde(default)]
    pub url: Option<String>,
}

/// Canonical observation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: ObservationId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
    pub category: Category,
}

/// Everything in an observation except its id
///
/// This is the value side of the `{ <id>: <place> }` patch sent to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiki_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
    pub category: Category,
}

impl Observation {
    /// Normalize one upstream record
    pub fn from_raw(raw: RawObservation) -> Result<Self, ObservationError> {
        let id = raw.id.ok_or(ObservationError::MissingId)?;
        let (lat, lng) = coordinates(id, raw.geojson.as_ref())?;

        let taxon = raw.taxon.unwrap_or_default();
        let name = non_blank(taxon.preferred_common_name)
            .or_else(|| non_blank(raw.species_guess))
            .unwrap_or_else(|| UNKNOWN_NAME.to_string());

        let photo_url = raw
            .photos
            .unwrap_or_default()
            .into_iter()
            .find_map(|p| non_blank(p.url));

        Ok(Self {
            id: ObservationId::new(id),
            name,
            lat,
            lng,
            photo_url,
            wiki_url: non_blank(taxon.wikipedia_url),
            observed_at: raw.created_at.as_deref().and_then(time_of_day),
            category: Category::from_taxon(taxon.iconic_taxon_name.as_deref()),
        })
    }

    /// Normalize a whole batch, failing on the first bad record
    pub fn from_raw_batch(raw: Vec<RawObservation>) -> Result<Vec<Self>, ObservationError> {
        raw.into_iter().map(Self::from_raw).collect()
    }

    /// The patch value for this observation
    pub fn place(&self) -> Place {
        Place {
            name: self.name.clone(),
            lat: self.lat,
            lng: self.lng,
            photo_url: self.photo_url.clone(),
            wiki_url: self.wiki_url.clone(),
            observed_at: self.observed_at.clone(),
            category: self.category.clone(),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn coordinates(id: u64, geometry: Option<&RawGeometry>) -> Result<(f64, f64), ObservationError> {
    let coords = match geometry.and_then(|g| g.coordinates.as_ref()) {
        Some(c) => c,
        None => return Ok((0.0, 0.0)),
    };

    let invalid = |reason: &str| ObservationError::InvalidCoordinates {
        id,
        reason: reason.to_string(),
    };

    let [lng, lat] = coords.as_slice() else {
        return Err(invalid("expected [lng, lat]"));
    };
    if !lng.is_finite() || !lat.is_finite() {
        return Err(invalid("non-finite value"));
    }
    // Values are passed through as reported, in range or not
    Ok((*lat, *lng))
}

/// Extract the wall-clock `HH:MM:SS` from an upstream timestamp
///
/// The time is kept in the offset the source wrote it in.
fn time_of_day(created_at: &str) -> Option<String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(created_at) {
        return Some(ts.format("%H:%M:%S").to_string());
    }

    let (_, rest) = created_at.split_once('T')?;
    let candidate = rest.get(..8)?;
    NaiveTime::parse_from_str(candidate, "%H:%M:%S")
        .ok()
        .map(|t| t.format("%H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: u64) -> RawObservation {
        RawObservation {
            id: Some(id),
            ..RawObservation::default()
        }
    }

    #[test]
    fn test_defaults_when_source_is_sparse() {
        let obs = Observation::from_raw(raw(7)).unwrap();
        assert_eq!(obs.id, ObservationId::new(7));
        assert_eq!(obs.name, "Unknown");
        assert_eq!((obs.lat, obs.lng), (0.0, 0.0));
        assert_eq!(obs.category, Category::unknown());
        assert!(obs.photo_url.is_none());
        assert!(obs.wiki_url.is_none());
        assert!(obs.observed_at.is_none());
    }

    #[test]
    fn test_name_priority_chain() {
        let mut r = raw(1);
        r.species_guess = Some("robin?".to_string());
        assert_eq!(Observation::from_raw(r.clone()).unwrap().name, "robin?");

        r.taxon = Some(RawTaxon {
            preferred_common_name: Some("American Robin".to_string()),
            ..RawTaxon::default()
        });
        assert_eq!(Observation::from_raw(r.clone()).unwrap().name, "American Robin");

        // Blank common name falls through
        r.taxon = Some(RawTaxon {
            preferred_common_name: Some("".to_string()),
            ..RawTaxon::default()
        });
        assert_eq!(Observation::from_raw(r).unwrap().name, "robin?");
    }

    #[test]
    fn test_coordinates_are_lng_lat() {
        let mut r = raw(2);
        r.geojson = Some(RawGeometry {
            coordinates: Some(vec![-74.01, 40.71]),
        });
        let obs = Observation::from_raw(r).unwrap();
        assert_eq!(obs.lat, 40.71);
        assert_eq!(obs.lng, -74.01);
    }

    #[test]
    fn test_out_of_range_coordinates_pass_through() {
        let mut r = raw(4);
        r.geojson = Some(RawGeometry {
            coordinates: Some(vec![180.0001, 10.0]),
        });
        let obs = Observation::from_raw(r).unwrap();
        assert_eq!(obs.lng, 180.0001);
        assert_eq!(obs.lat, 10.0);
    }

    #[test]
    fn test_malformed_coordinates_rejected() {
        let mut r = raw(3);
        r.geojson = Some(RawGeometry {
            coordinates: Some(vec![1.0]),
        });
        assert!(matches!(
            Observation::from_raw(r),
            Err(ObservationError::InvalidCoordinates { id: 3, .. })
        ));
    }

    #[test]
    fn test_missing_id_rejected() {
        assert_eq!(
            Observation::from_raw(RawObservation::default()),
            Err(ObservationError::MissingId)
        );
    }

    #[test]
    fn test_observed_at_keeps_source_offset() {
        let mut r = raw(4);
        r.created_at = Some("2024-05-01T14:03:27+02:00".to_string());
        let obs = Observation::from_raw(r).unwrap();
        assert_eq!(obs.observed_at.as_deref(), Some("14:03:27"));
    }

    #[test]
    fn test_observed_at_without_offset() {
        let mut r = raw(5);
        r.created_at = Some("2024-05-01T09:15:00".to_string());
        let obs = Observation::from_raw(r).unwrap();
        assert_eq!(obs.observed_at.as_deref(), Some("09:15:00"));
    }

    #[test]
    fn test_parse_upstream_json() {
        let body = r#"{
            "total_results": 1,
            "results": [{
                "id": 5,
                "species_guess": "Owl",
                "geojson": { "type": "Point", "coordinates": [-75.5, 6.2] },
                "created_at": "2024-05-01T22:10:05-05:00",
                "taxon": {
                    "preferred_common_name": "Crested Owl",
                    "wikipedia_url": "https://en.wikipedia.org/wiki/Crested_owl",
                    "iconic_taxon_name": "Aves"
                },
                "photos": [{ "url": "https://example.org/square.jpg" }]
            }]
        }"#;
        let response: ObservationsResponse = serde_json::from_str(body).unwrap();
        let batch = Observation::from_raw_batch(response.results).unwrap();

        assert_eq!(batch.len(), 1);
        let obs = &batch[0];
        assert_eq!(obs.name, "Crested Owl");
        assert_eq!(obs.category.as_str(), "aves");
        assert_eq!(obs.photo_url.as_deref(), Some("https://example.org/square.jpg"));
        assert_eq!(obs.observed_at.as_deref(), Some("22:10:05"));
    }

    #[test]
    fn test_batch_fails_as_a_whole() {
        let batch = vec![raw(1), RawObservation::default(), raw(3)];
        assert!(Observation::from_raw_batch(batch).is_err());
    }

    #[test]
    fn test_place_serializes_camel_case_without_id() {
        let mut r = raw(9);
        r.photos = Some(vec![RawPhoto {
            url: Some("https://example.org/p.jpg".to_string()),
        }]);
        let place = Observation::from_raw(r).unwrap().place();
        let json = serde_json::to_value(&place).unwrap();

        assert!(json.get("id").is_none());
        assert_eq!(json["photoUrl"], "https://example.org/p.jpg");
        assert_eq!(json["category"], "unknown");
        assert!(json.get("wikiUrl").is_none());
    }
}
