//! The municipality dimension: boundary loading, projected areas, centroids and point location.

use std::collections::{HashMap, HashSet};
use std::f64::consts::FRAC_PI_4;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use ::geo::{
    Area, BoundingRect, Centroid, Contains, Coord, Geometry, MapCoords, MultiPolygon, Point, Rect,
};
use geojson::GeoJson;
use log::{debug, info, warn};
use nonempty::NonEmpty;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use wkt::ToWkt;

use crate::config::BoundaryConfig;
use crate::error::{MunijoinError, MunijoinResult};
use crate::normalize::{clean_header, display_name, MunicipalityKey};
use crate::schema::find_header;
use crate::COL;

/// Radius of the sphere with the same surface area as WGS84, in metres.
const AUTHALIC_RADIUS: f64 = 6_371_007.181;
/// Radius used by EPSG:3857, in metres.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;
const WEB_MERCATOR_MAX_LAT: f64 = 85.051_128_78;

/// Planar system boundaries are projected into before their area is measured.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AreaProjection {
    /// Lambert cylindrical equal-area on the authalic sphere.
    #[default]
    EqualArea,
    /// Spherical Mercator. Inflates areas away from the equator.
    WebMercator,
}

impl AreaProjection {
    /// Project a longitude/latitude coordinate (degrees) to metres.
    pub fn project(&self, Coord { x, y }: Coord<f64>) -> Coord<f64> {
        match self {
            AreaProjection::EqualArea => Coord {
                x: AUTHALIC_RADIUS * x.to_radians(),
                y: AUTHALIC_RADIUS * y.to_radians().sin(),
            },
            AreaProjection::WebMercator => {
                let lat = y.clamp(-WEB_MERCATOR_MAX_LAT, WEB_MERCATOR_MAX_LAT);
                Coord {
                    x: WEB_MERCATOR_RADIUS * x.to_radians(),
                    y: WEB_MERCATOR_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
                }
            }
        }
    }

    /// Area in km². Empty, degenerate or non-finite results are `None`.
    pub fn area_km2(&self, boundary: &MultiPolygon<f64>) -> Option<f64> {
        let projected = boundary.map_coords(|c| self.project(c));
        let area = projected.unsigned_area() / 1_000_000.0;
        (area.is_finite() && area > 0.0).then_some(area)
    }
}

/// One entry of the dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Municipality {
    /// Cleaned boundary name, accents kept. `None` when the feature had no name.
    pub display_name: Option<String>,
    pub key: MunicipalityKey,
    /// `None` when the feature's geometry was missing or not polygonal.
    pub boundary: Option<MultiPolygon<f64>>,
    bounds: Option<Rect<f64>>,
}

impl Municipality {
    pub fn new(raw_name: Option<&str>, boundary: Option<MultiPolygon<f64>>) -> Self {
        let bounds = boundary.as_ref().and_then(|b| b.bounding_rect());
        Self {
            display_name: raw_name.map(display_name),
            key: MunicipalityKey::new(raw_name),
            boundary,
            bounds,
        }
    }

    pub fn area_km2(&self, projection: AreaProjection) -> Option<f64> {
        self.boundary.as_ref().and_then(|b| projection.area_km2(b))
    }

    /// Centroid in longitude/latitude.
    pub fn centroid(&self) -> Option<Point<f64>> {
        self.boundary
            .as_ref()
            .and_then(|b| b.centroid())
            .filter(|p| p.x().is_finite() && p.y().is_finite())
    }

    /// Fold another feature of the same municipality into this one.
    fn absorb(&mut self, other: Municipality) {
        if self.display_name.is_none() {
            self.display_name = other.display_name;
        }
        self.boundary = match (self.boundary.take(), other.boundary) {
            (Some(MultiPolygon(mut parts)), Some(MultiPolygon(more))) => {
                parts.extend(more);
                Some(MultiPolygon(parts))
            }
            (boundary, other) => boundary.or(other),
        };
        self.bounds = self.boundary.as_ref().and_then(|b| b.bounding_rect());
    }

    pub fn contains(&self, point: &Point<f64>) -> bool {
        let (Some(bounds), Some(boundary)) = (&self.bounds, &self.boundary) else {
            return false;
        };
        let (min, max) = (bounds.min(), bounds.max());
        let in_bounds =
            point.x() >= min.x && point.x() <= max.x && point.y() >= min.y && point.y() <= max.y;
        in_bounds && boundary.contains(point)
    }
}

/// The authoritative set of municipalities every fact source is joined against. Built once per
/// run and not modified afterwards.
#[derive(Debug, Clone)]
pub struct MunicipalityDimension {
    pub source: PathBuf,
    pub municipalities: Vec<Municipality>,
}

impl MunicipalityDimension {
    /// Features sharing a non-empty key (e.g. the parts of a split multipart shape) are merged
    /// into one municipality at the position of the first, so each key names at most one row.
    pub fn new(source: PathBuf, features: Vec<Municipality>) -> Self {
        let mut municipalities: Vec<Municipality> = Vec::with_capacity(features.len());
        let mut positions: HashMap<MunicipalityKey, usize> = HashMap::new();
        for feature in features {
            if feature.key.is_empty() {
                municipalities.push(feature);
                continue;
            }
            match positions.get(&feature.key) {
                Some(&idx) => {
                    warn!(
                        "Boundary key `{}` appears more than once in {}; merging its features",
                        feature.key,
                        source.display()
                    );
                    municipalities[idx].absorb(feature);
                }
                None => {
                    positions.insert(feature.key.clone(), municipalities.len());
                    municipalities.push(feature);
                }
            }
        }
        Self {
            source,
            municipalities,
        }
    }

    pub fn len(&self) -> usize {
        self.municipalities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.municipalities.is_empty()
    }

    pub fn keys(&self) -> HashSet<&str> {
        self.municipalities.iter().map(|m| m.key.as_str()).collect()
    }

    /// Key of the first municipality whose boundary contains the point.
    pub fn locate(&self, longitude: f64, latitude: f64) -> Option<&MunicipalityKey> {
        let point = Point::new(longitude, latitude);
        self.municipalities
            .iter()
            .find(|m| m.contains(&point))
            .map(|m| &m.key)
    }

    /// Keys for a pair of coordinate columns. Points that are unparseable or outside every
    /// boundary get the empty key.
    pub fn locate_series(
        &self,
        longitude: &Series,
        latitude: &Series,
        name: &str,
    ) -> PolarsResult<Series> {
        let longitude = longitude.cast(&DataType::Float64)?;
        let latitude = latitude.cast(&DataType::Float64)?;
        let mut outside = 0usize;
        let keys: Vec<&str> = longitude
            .f64()?
            .into_iter()
            .zip(latitude.f64()?)
            .map(|(lon, lat)| {
                let key = lon.zip(lat).and_then(|(lon, lat)| self.locate(lon, lat));
                if key.is_none() {
                    outside += 1;
                }
                key.map(MunicipalityKey::as_str).unwrap_or_default()
            })
            .collect();
        if outside > 0 {
            info!("{outside} point(s) fall outside every boundary");
        }
        Ok(Series::new(name, keys))
    }

    /// Tabular form of the dimension: display name, key, area, centroid and WKT boundary, one
    /// row per municipality in boundary file order.
    pub fn to_dataframe(&self, projection: AreaProjection) -> PolarsResult<DataFrame> {
        let names: Vec<Option<&str>> = self
            .municipalities
            .iter()
            .map(|m| m.display_name.as_deref())
            .collect();
        let keys: Vec<&str> = self.municipalities.iter().map(|m| m.key.as_str()).collect();
        let areas: Vec<Option<f64>> = self
            .municipalities
            .iter()
            .map(|m| m.area_km2(projection))
            .collect();
        let centroids: Vec<Option<Point<f64>>> =
            self.municipalities.iter().map(|m| m.centroid()).collect();
        let geometries: Vec<Option<String>> = self
            .municipalities
            .iter()
            .map(|m| m.boundary.as_ref().map(|b| b.wkt_string()))
            .collect();

        DataFrame::new(vec![
            Series::new(COL::MUNICIPIO, names),
            Series::new(COL::MUNI_KEY, keys),
            Series::new(COL::AREA_KM2, areas),
            Series::new(
                COL::CENTROID_LON,
                centroids.iter().map(|p| p.map(|p| p.x())).collect::<Vec<_>>(),
            ),
            Series::new(
                COL::CENTROID_LAT,
                centroids.iter().map(|p| p.map(|p| p.y())).collect::<Vec<_>>(),
            ),
            Series::new(COL::GEOMETRY, geometries),
        ])
    }
}

/// Attributes and geometries read from a boundary file before the name column is chosen.
struct RawBoundaries {
    attributes: Vec<String>,
    features: Vec<(HashMap<String, String>, Option<MultiPolygon<f64>>)>,
}

fn to_multi_polygon(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(polygon) => Some(MultiPolygon(vec![polygon])),
        Geometry::MultiPolygon(multi) => Some(multi),
        _ => None,
    }
}

fn read_geojson(path: &Path) -> MunijoinResult<RawBoundaries> {
    let text = std::fs::read_to_string(path)?;
    let collection = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(_) => vec![],
    };

    let mut attributes: Vec<String> = vec![];
    let mut features = Vec::with_capacity(collection.len());
    for feature in collection {
        let mut props = HashMap::new();
        for (name, value) in feature.properties.iter().flatten() {
            let name = clean_header(name);
            if !attributes.contains(&name) {
                attributes.push(name.clone());
            }
            let value = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            props.insert(name, value);
        }
        let geometry = feature
            .geometry
            .and_then(|g| Geometry::<f64>::try_from(g.value).ok())
            .and_then(to_multi_polygon);
        features.push((props, geometry));
    }
    Ok(RawBoundaries {
        attributes,
        features,
    })
}

fn read_fgb(path: &Path) -> MunijoinResult<RawBoundaries> {
    use flatgeobuf::geozero::ToGeo;
    use flatgeobuf::*;

    let mut file = BufReader::new(File::open(path)?);
    let fgb = FgbReader::open(&mut file)?;
    let attributes: Vec<String> = fgb
        .header()
        .columns()
        .map(|columns| columns.iter().map(|c| clean_header(c.name())).collect())
        .unwrap_or_default();
    let mut fgb = fgb.select_all()?;

    let mut features = vec![];
    while let Some(feature) = fgb.next()? {
        let props = feature
            .properties()?
            .into_iter()
            .map(|(name, value)| (clean_header(&name), value))
            .collect();
        let geometry = feature.to_geo().ok().and_then(to_multi_polygon);
        features.push((props, geometry));
    }
    Ok(RawBoundaries {
        attributes,
        features,
    })
}

/// Load the dimension from a GeoJSON (`.geojson`, `.json`) or FlatGeobuf (`.fgb`) file.
///
/// The display name comes from `boundary.name_column` when set, otherwise from the first of
/// `boundary.name_candidates` present (case-insensitive). Features without polygonal geometry
/// are kept with a null boundary.
pub fn load_dimension(
    path: &Path,
    boundary: &BoundaryConfig,
) -> MunijoinResult<MunicipalityDimension> {
    if !path.exists() {
        return Err(MunijoinError::MissingBoundaryFile(path.to_path_buf()));
    }
    info!("Loading boundaries from {}", path.display());
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let raw = match extension.as_deref() {
        Some("geojson" | "json") => read_geojson(path)?,
        Some("fgb") => read_fgb(path)?,
        _ => return Err(MunijoinError::UnsupportedBoundaryFormat(path.to_path_buf())),
    };

    let candidates = match &boundary.name_column {
        Some(column) => NonEmpty::new(column.as_str()),
        None => NonEmpty::from_vec(boundary.name_candidates.iter().map(String::as_str).collect())
            .ok_or_else(|| {
                MunijoinError::InvalidConfig("`boundary.name_candidates` is empty".into())
            })?,
    };
    let name_column = find_header(&raw.attributes, &candidates, &HashSet::new())
        .map(|idx| raw.attributes[idx].clone())
        .ok_or_else(|| MunijoinError::MissingRequiredField {
            field: candidates.head.to_string(),
            file: path.to_path_buf(),
            found: raw.attributes.clone(),
        })?;
    debug!("Using boundary attribute `{name_column}` as the municipality name");

    let municipalities: Vec<Municipality> = raw
        .features
        .into_iter()
        .map(|(props, geometry)| {
            Municipality::new(props.get(&name_column).map(String::as_str), geometry)
        })
        .collect();

    let failures = municipalities
        .iter()
        .filter(|m| m.boundary.is_none())
        .count();
    if failures > 0 {
        warn!(
            "{failures} boundary feature(s) in {} have no polygon geometry; their area and centroid will be null",
            path.display()
        );
    }
    info!(
        "Loaded {} municipalities from {}",
        municipalities.len(),
        path.display()
    );
    Ok(MunicipalityDimension::new(path.to_path_buf(), municipalities))
}
