use anyhow::{bail, Context, Result};
use geo::{MultiPolygon, Polygon};
use geojson::{Feature, GeoJson};
use radar_vision::DistrictGeometry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Which features of an administrative-boundary file belong to the deployment,
/// and which property names a district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionFilter {
    /// Property holding the region (state) name
    pub region_property: String,
    /// Accepted region names, compared trimmed and case-insensitively. Empty accepts all.
    pub regions: Vec<String>,
    /// Property holding the district name
    pub district_property: String,
}

impl Default for RegionFilter {
    fn default() -> Self {
        Self {
            region_property: "NAME_1".into(),
            regions: vec!["TamilNadu".into(), "Tamil Nadu".into()],
            district_property: "NAME_2".into(),
        }
    }
}

impl RegionFilter {
    fn accepts(&self, feature: &Feature) -> bool {
        if self.regions.is_empty() {
            return true;
        }
        let Some(region) = string_property(feature, &self.region_property) else {
            return false;
        };
        let region = normalize(region);
        self.regions.iter().any(|r| normalize(r) == region)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

fn string_property<'a>(feature: &'a Feature, key: &str) -> Option<&'a str> {
    feature.property(key).and_then(|v| v.as_str())
}

/// District boundaries of one deployment, keyed by district name.
#[derive(Debug, Clone, Default)]
pub struct DistrictCatalog {
    districts: BTreeMap<String, MultiPolygon<f64>>,
}

impl DistrictCatalog {
    /// Load district boundaries from a GeoJSON file (EPSG:4326).
    pub fn load(path: &Path, filter: &RegionFilter) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read geometry file {}", path.display()))?;
        let catalog = Self::from_geojson_str(&content, filter)
            .with_context(|| format!("Failed to load districts from {}", path.display()))?;
        info!(
            "Loaded {} district(s) from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parse a FeatureCollection. Features sharing a district name are merged.
    pub fn from_geojson_str(content: &str, filter: &RegionFilter) -> Result<Self> {
        let geojson: GeoJson = content.parse().context("Invalid GeoJSON")?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            bail!("Expected a GeoJSON FeatureCollection");
        };

        let mut districts: BTreeMap<String, MultiPolygon<f64>> = BTreeMap::new();
        for feature in collection.features {
            if !filter.accepts(&feature) {
                continue;
            }
            let Some(name) = string_property(&feature, &filter.district_property) else {
                debug!("Skipping feature without {}", filter.district_property);
                continue;
            };
            let name = name.trim().to_string();
            let Some(parts) = feature_polygons(&feature) else {
                warn!("Skipping non-polygon geometry for district {}", name);
                continue;
            };
            districts.entry(name).or_insert_with(|| MultiPolygon(vec![])).0.extend(parts);
        }

        if districts.is_empty() {
            bail!("No districts matched the region filter");
        }
        Ok(Self { districts })
    }

    pub fn from_districts(districts: impl IntoIterator<Item = DistrictGeometry>) -> Self {
        let mut map: BTreeMap<String, MultiPolygon<f64>> = BTreeMap::new();
        for d in districts {
            map.entry(d.name).or_insert_with(|| MultiPolygon(vec![])).0.extend(d.polygons.0);
        }
        Self { districts: map }
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }

    /// District names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.districts.keys().cloned().collect()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<DistrictGeometry> {
        let wanted = normalize(name);
        self.districts
            .iter()
            .find(|(n, _)| normalize(n) == wanted)
            .map(|(n, polygons)| DistrictGeometry::new(n.clone(), polygons.clone()))
    }

    /// Every district, sorted by name.
    pub fn districts(&self) -> Vec<DistrictGeometry> {
        self.districts
            .iter()
            .map(|(n, polygons)| DistrictGeometry::new(n.clone(), polygons.clone()))
            .collect()
    }

    /// Geometries for `names` in the given order. Unknown names come back with
    /// an empty geometry, which the classifier reports as missing.
    pub fn resolve(&self, names: &[String]) -> Vec<DistrictGeometry> {
        names
            .iter()
            .map(|name| self.get(name).unwrap_or_else(|| DistrictGeometry::missing(name.clone())))
            .collect()
    }
}

fn feature_polygons(feature: &Feature) -> Option<Vec<Polygon<f64>>> {
    let geometry = feature.geometry.clone()?;
    let geo_geom: geo::Geometry<f64> = geometry.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp.0),
        geo::Geometry::Polygon(p) => Some(vec![p]),
        _ => None,
    }
}

/// District names from the geometry file, or `fallback` when it can't be read.
pub fn available_district_names(path: &Path, filter: &RegionFilter, fallback: &[String]) -> Vec<String> {
    match DistrictCatalog::load(path, filter) {
        Ok(catalog) => catalog.names(),
        Err(e) => {
            warn!("{:#}. Falling back to default district list", e);
            fallback.to_vec()
        }
    }
}
