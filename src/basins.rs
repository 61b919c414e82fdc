/// Basin registry for the anticipatory-action flood trigger service.
///
/// Defines the canonical list of monitored river basins along with their
/// per-source parameters: the GLOFAS reporting-point bounding box and station
/// grid indices (I, J), DHM telemetry series ids, and the GFH station id
/// where one exists. This is the single source of truth for basin keys — all
/// other modules should reference basins from here rather than hardcoding
/// names.

// ---------------------------------------------------------------------------
// Basin metadata
// ---------------------------------------------------------------------------

/// GLOFAS reporting-point parameters for a basin.
pub struct GlofasStation {
    /// Request bounding box, `[min_lon, min_lat, max_lon, max_lat]` (WGS84).
    pub bounding_box: [f64; 4],
    /// Station grid column index within the reporting-point raster.
    pub i: u32,
    /// Station grid row index within the reporting-point raster.
    pub j: u32,
}

/// DHM telemetry series ids for a basin, plus the official river warning and
/// danger levels in metres where DHM publishes them.
pub struct DhmStation {
    pub rainfall_series: &'static str,
    pub water_level_series: &'static str,
    pub warning_level_m: Option<f64>,
    pub danger_level_m: Option<f64>,
}

/// Metadata for a single monitored river basin.
pub struct BasinConfig {
    /// Canonical basin key, e.g. `"Karnali at Chisapani"`.
    pub river_basin: &'static str,
    /// Human-readable description of the basin's role in the protocol.
    pub description: &'static str,
    pub glofas: GlofasStation,
    pub dhm: DhmStation,
    /// GFH station id. Not every basin is covered by the feed.
    pub gfh_station: Option<&'static str>,
}

/// All basins covered by the anticipatory-action protocol, ordered west to
/// east along the Terai.
///
/// Sources:
///   - Station series ids and river levels: DHM hydrology portal
///   - Reporting-point indices: GLOFAS station metadata
pub static BASIN_REGISTRY: &[BasinConfig] = &[
    BasinConfig {
        river_basin: "Karnali at Chisapani",
        description: "Primary protocol basin. The Chisapani gauge sits where \
                      the Karnali leaves the hills; readings here lead the \
                      vulnerable downstream municipalities by 6-10 hours.",
        glofas: GlofasStation {
            bounding_box: [80.80, 28.50, 81.20, 28.80],
            i: 21,
            j: 13,
        },
        dhm: DhmStation {
            rainfall_series: "KAR-280-RF",
            water_level_series: "KAR-280-WL",
            warning_level_m: Some(10.0),
            danger_level_m: Some(10.8),
        },
        gfh_station: Some("hybas_4121051890"),
    },
    BasinConfig {
        river_basin: "Babai at Chepang",
        description: "Flashy rain-fed basin between the Karnali and the West \
                      Rapti. Responds to monsoon bursts within hours, so the \
                      rainfall series carries more signal than the forecast.",
        glofas: GlofasStation {
            bounding_box: [81.20, 28.20, 81.55, 28.45],
            i: 24,
            j: 15,
        },
        dhm: DhmStation {
            rainfall_series: "BAB-295-RF",
            water_level_series: "BAB-295-WL",
            warning_level_m: Some(5.5),
            danger_level_m: Some(6.2),
        },
        gfh_station: None,
    },
    BasinConfig {
        river_basin: "West Rapti at Kusum",
        description: "Eastern protocol basin. The Kusum gauge anchors both \
                      the telemetry triggers and the GLOFAS reporting point \
                      for the lower Rapti floodplain.",
        glofas: GlofasStation {
            bounding_box: [81.95, 27.85, 82.30, 28.10],
            i: 28,
            j: 17,
        },
        dhm: DhmStation {
            rainfall_series: "RAP-350-RF",
            water_level_series: "RAP-350-WL",
            warning_level_m: Some(4.9),
            danger_level_m: Some(5.4),
        },
        gfh_station: Some("hybas_4121052110"),
    },
];

/// Returns the canonical keys of all monitored basins.
pub fn all_basin_keys() -> Vec<&'static str> {
    BASIN_REGISTRY.iter().map(|b| b.river_basin).collect()
}

/// Looks up a basin by its canonical key. Returns `None` if not found.
pub fn find_basin(river_basin: &str) -> Option<&'static BasinConfig> {
    BASIN_REGISTRY.iter().find(|b| b.river_basin == river_basin)
}

/// Basins covered by the GFH feed.
pub fn basins_with_gfh() -> Vec<&'static BasinConfig> {
    BASIN_REGISTRY.iter().filter(|b| b.gfh_station.is_some()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_duplicate_basin_keys() {
        let mut seen = std::collections::HashSet::new();
        for basin in BASIN_REGISTRY {
            assert!(
                seen.insert(basin.river_basin),
                "duplicate basin key '{}' found in BASIN_REGISTRY",
                basin.river_basin
            );
        }
    }

    #[test]
    fn test_registry_contains_all_protocol_basins() {
        let expected = [
            "Karnali at Chisapani",
            "Babai at Chepang",
            "West Rapti at Kusum",
        ];
        let keys = all_basin_keys();
        for expected_key in &expected {
            assert!(
                keys.contains(expected_key),
                "BASIN_REGISTRY missing expected basin '{}'",
                expected_key
            );
        }
    }

    #[test]
    fn test_find_basin_returns_correct_entry() {
        let basin = find_basin("Karnali at Chisapani").expect("Karnali should be in registry");
        assert_eq!(basin.river_basin, "Karnali at Chisapani");
        assert_eq!(basin.glofas.i, 21);
    }

    #[test]
    fn test_find_basin_returns_none_for_unknown_key() {
        assert!(find_basin("Koshi at Chatara").is_none());
    }

    #[test]
    fn test_bounding_boxes_are_well_formed() {
        // [min_lon, min_lat, max_lon, max_lat] — a degenerate or inverted box
        // would make the GLOFAS request silently return the wrong station.
        for basin in BASIN_REGISTRY {
            let [min_lon, min_lat, max_lon, max_lat] = basin.glofas.bounding_box;
            assert!(
                min_lon < max_lon && min_lat < max_lat,
                "bounding box for '{}' is inverted",
                basin.river_basin
            );
            assert!(
                (80.0..89.0).contains(&min_lon) && (26.0..31.0).contains(&min_lat),
                "bounding box for '{}' falls outside the protocol region",
                basin.river_basin
            );
        }
    }

    #[test]
    fn test_river_levels_are_ordered_where_defined() {
        // warning < danger — violating this order would invert the meaning
        // of any statement comparing against these levels.
        for basin in BASIN_REGISTRY {
            if let (Some(warning), Some(danger)) =
                (basin.dhm.warning_level_m, basin.dhm.danger_level_m)
            {
                assert!(
                    warning < danger,
                    "warning level must be below danger level for '{}'",
                    basin.river_basin
                );
            }
        }
    }

    #[test]
    fn test_dhm_series_ids_are_distinct_per_basin() {
        for basin in BASIN_REGISTRY {
            assert_ne!(
                basin.dhm.rainfall_series, basin.dhm.water_level_series,
                "rainfall and water level series must differ for '{}'",
                basin.river_basin
            );
        }
    }

    #[test]
    fn test_basins_with_gfh_have_station_ids() {
        let covered = basins_with_gfh();
        assert!(!covered.is_empty(), "at least one basin should be GFH-covered");
        for basin in covered {
            let station = basin.gfh_station.expect("filter guarantees a station id");
            assert!(
                station.starts_with("hybas_"),
                "GFH station id for '{}' should be a HydroBASINS id, got '{}'",
                basin.river_basin,
                station
            );
        }
    }
}
