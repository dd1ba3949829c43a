//! Seeds the target table from a JSON file of known businesses.
//!
//! The file maps a city name to its businesses. Target ids are derived from
//! the business name and zip code, so re-seeding the same file is a no-op.

use crate::store::{ScoringStore, Target};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct SeedBusiness {
    name: String,
    location: String,
    #[serde(rename = "zipCode")]
    zip_code: String,
}

/// Stable id derived from the business identity: lowercased name with
/// whitespace collapsed to underscores, suffixed with the zip code.
pub fn derive_target_id(name: &str, zip_code: &str) -> String {
    let slug = name
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_");
    format!("{}_{}", slug, zip_code)
}

/// Insert every business from the seed file that is not already present.
/// Returns the number of newly inserted targets.
pub fn seed_targets(store: &dyn ScoringStore, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file: {:?}", path))?;
    let cities: BTreeMap<String, Vec<SeedBusiness>> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse seed file: {:?}", path))?;

    let mut inserted = 0;
    for (city, businesses) in &cities {
        for business in businesses {
            let target = Target {
                id: derive_target_id(&business.name, &business.zip_code),
                name: business.name.clone(),
                address: business.location.clone(),
                city: Some(city.clone()),
                zip_code: Some(business.zip_code.clone()),
                created_at: Utc::now(),
            };
            if store
                .insert_target(&target)
                .with_context(|| format!("Failed to insert seed target {}", target.id))?
            {
                inserted += 1;
            }
        }
    }
    info!(inserted, total = store.target_count()?, "Seeded targets");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteScoringStore;
    use std::io::Write;
    use tempfile::TempDir;

    const SEED_JSON: &str = r#"{
        "atlanta": [
            {
                "type": "Coffee Shop",
                "name": "Octane Coffee",
                "location": "1009 Marietta St NW",
                "zipCode": "30318",
                "ratings": { "decoration": 3, "coffee": 3, "studySuitable": 3 },
                "parking": "free"
            },
            {
                "type": "Coffee Shop",
                "name": "Starbucks Reserve",
                "location": "999 Peachtree St NE",
                "zipCode": "30309",
                "ratings": { "decoration": 3, "coffee": 2, "studySuitable": 2 },
                "parking": "paid"
            }
        ]
    }"#;

    fn write_seed_file(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("seed.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SEED_JSON.as_bytes()).unwrap();
        path
    }

    #[test]
    fn derives_stable_ids() {
        assert_eq!(
            derive_target_id("Octane Coffee", "30318"),
            "octane_coffee_30318"
        );
        assert_eq!(
            derive_target_id("  Spaced   Out  Cafe ", "30309"),
            "spaced_out_cafe_30309"
        );
    }

    #[test]
    fn seeding_inserts_all_businesses() {
        let dir = TempDir::new().unwrap();
        let store = SqliteScoringStore::new(dir.path().join("scoring.db")).unwrap();
        let seed_path = write_seed_file(&dir);

        let inserted = seed_targets(&store, &seed_path).unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.target_count().unwrap(), 2);

        let targets = store.enriched_targets(Some("atlanta")).unwrap();
        assert_eq!(targets.len(), 2);
        let octane = targets
            .iter()
            .find(|t| t.target.id == "octane_coffee_30318")
            .unwrap();
        assert_eq!(octane.target.address, "1009 Marietta St NW");
        assert_eq!(octane.target.zip_code.as_deref(), Some("30318"));
    }

    #[test]
    fn reseeding_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let store = SqliteScoringStore::new(dir.path().join("scoring.db")).unwrap();
        let seed_path = write_seed_file(&dir);

        seed_targets(&store, &seed_path).unwrap();
        let inserted = seed_targets(&store, &seed_path).unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(store.target_count().unwrap(), 2);
    }
}
