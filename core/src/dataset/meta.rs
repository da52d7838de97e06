/// Per-variable metadata attached to serialized output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarMeta {
    pub long_name: String,
    pub units: String,
}

impl VarMeta {
    pub fn new(long_name: &str, units: &str) -> Self {
        Self {
            long_name: long_name.to_string(),
            units: units.to_string(),
        }
    }
}

/// Canonical metadata, or a bare entry for names outside the table.
pub fn meta_for(name: &str) -> VarMeta {
    canonical_meta(name).unwrap_or_else(|| VarMeta::new(name, "1"))
}

/// Metadata for the canonical variables of the profile data model.
pub fn canonical_meta(name: &str) -> Option<VarMeta> {
    let (long_name, units) = match name {
        "time" => ("time", "days since 1970-01-01 00:00:00"),
        "time_bnds" => ("time bounds", "days since 1970-01-01 00:00:00"),
        "zfull" => ("height above mean sea level", "m"),
        "altitude" => ("instrument altitude", "m"),
        "lon" => ("longitude", "degrees_east"),
        "lat" => ("latitude", "degrees_north"),
        "backscatter" => ("attenuated volume backscattering coefficient", "m-1 sr-1"),
        "backscatter_mol" => (
            "molecular attenuated volume backscattering coefficient",
            "m-1 sr-1",
        ),
        "backscatter_sd" => (
            "attenuated volume backscattering coefficient standard deviation",
            "m-1 sr-1",
        ),
        "cloud_mask" => ("cloud mask", "1"),
        "cbh" => ("cloud base height", "m"),
        "lr" => ("effective lidar ratio", "sr"),
        "cloud_occurrence" => ("cloud occurrence", "%"),
        "n" => ("number of profiles", "1"),
        "couple_backscatter" => (
            "coupled attenuated volume backscattering coefficient",
            "m-1 sr-1",
        ),
        _ => return None,
    };
    Some(VarMeta::new(long_name, units))
}
