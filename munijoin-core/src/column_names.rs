//! This module stores the column names of the merged table and of the canonical fields used by
//! the default deployment. Downstream consumers depend on these names, so they must not change
//! from run to run.

/// Display name of the municipality (accents preserved).
pub const MUNICIPIO: &str = "Municipio";
/// Normalized join key of the municipality.
pub const MUNI_KEY: &str = "MUNI_KEY";

pub const AREA_KM2: &str = "area_km2";
pub const CENTROID_LON: &str = "centroid_lon";
pub const CENTROID_LAT: &str = "centroid_lat";
pub const GEOMETRY: &str = "geometry";

/// Internal helper column used to restore the spine order after the joins.
pub(crate) const ROW_INDEX: &str = "__row_index";

// Boundary attribute candidates for the display name, in priority order.
pub const BOUNDARY_NAME_CANDIDATES: [&str; 8] = [
    "NAME_2",
    "NAME_1",
    "NAME",
    "NOM_MUN",
    "MUNICIPIO",
    "NOMBRE",
    "NOM_ENT",
    "MUN_NAME",
];

// Population points summarised per municipality
pub const MEAN_POPULATION_DENSITY: &str = "mean_population_density";
pub const SUM_POPULATION_DENSITY: &str = "sum_population_density";
pub const POINT_COUNT: &str = "point_count";
pub const POPULATION_DENSITY: &str = "population_density";
pub const LONGITUDE: &str = "longitude";
pub const LATITUDE: &str = "latitude";

// Medical units
pub const TOTAL: &str = "Total";

// Census (ITER) housing and electricity indicators
pub const TVIVHAB: &str = "TVIVHAB";
pub const TVIVPAR: &str = "TVIVPAR";
pub const VIVPAR_DES: &str = "VIVPAR_DES";
pub const VPH_C_ELEC: &str = "VPH_C_ELEC";
pub const VPH_S_ELEC: &str = "VPH_S_ELEC";
pub const VPH_AGUADV: &str = "VPH_AGUADV";
pub const VPH_AEASP: &str = "VPH_AEASP";
pub const VPH_AGUAFV: &str = "VPH_AGUAFV";
pub const VPH_DRENAJ: &str = "VPH_DRENAJ";
pub const VPH_NODREN: &str = "VPH_NODREN";
pub const VPH_C_SERV: &str = "VPH_C_SERV";

// Climate, emissions and green space
pub const TEMPERATURA_MEDIA: &str = "temperatura_media";
pub const EMISIONES_CO2: &str = "emisiones_co2";
pub const AREA_VERDE_KM2: &str = "area_verde_km2";

// Derived metrics
pub const POP_PER_KM2: &str = "pop_per_km2";
pub const UNIDADES_POR_KM2: &str = "unidades_por_km2";
pub const EMISIONES_POR_KM2: &str = "emisiones_por_km2";
pub const PCT_SIN_ELECTRICIDAD: &str = "pct_sin_electricidad";
pub const PCT_AREA_VERDE: &str = "pct_area_verde";
