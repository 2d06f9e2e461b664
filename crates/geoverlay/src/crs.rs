use std::fmt;

/// A coordinate reference system, held as a PROJ.4 definition string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs {
    proj4: String,
}

impl Crs {
    /// USA Contiguous Albers Equal Area Conic (ESRI:102003), the default working CRS.
    pub const ALBERS_CONUS: &'static str =
        "+proj=aea +lat_1=29.5 +lat_2=45.5 +lat_0=37.5 +lon_0=-96 +x_0=0 +y_0=0 +datum=NAD83 +units=m +no_defs +type=crs";

    pub fn new(proj4: impl Into<String>) -> Self {
        Self { proj4: proj4.into().trim().to_string() }
    }

    pub fn albers_conus() -> Self { Self::new(Self::ALBERS_CONUS) }

    pub fn nad83() -> Self { Self::new("+proj=longlat +datum=NAD83 +no_defs +type=crs") }

    pub fn wgs84() -> Self { Self::new("+proj=longlat +datum=WGS84 +no_defs +type=crs") }

    #[inline] pub fn proj4(&self) -> &str { &self.proj4 }

    /// True for lon/lat (degree) systems.
    #[inline]
    pub fn is_geographic(&self) -> bool {
        self.proj4.contains("+proj=longlat") || self.proj4.contains("+proj=latlong")
    }

    /// Best-effort CRS detection from an ESRI `.prj` WKT string.
    ///
    /// Geographic NAD83/WGS84 systems map to their lon/lat definitions, Albers
    /// CONUS maps to [`Crs::albers_conus`]. Anything else is unknown (`None`)
    /// and must be supplied by the caller.
    pub fn from_prj_wkt(wkt: &str) -> Option<Self> {
        let upper = wkt.trim().to_ascii_uppercase();
        if upper.starts_with("GEOGCS") {
            if upper.contains("NORTH_AMERICAN_1983") || upper.contains("NAD83") || upper.contains("NAD_1983") {
                return Some(Self::nad83());
            }
            if upper.contains("WGS_1984") || upper.contains("WGS84") || upper.contains("WGS 84") {
                return Some(Self::wgs84());
            }
            return None;
        }
        if upper.starts_with("PROJCS") && upper.contains("ALBERS")
            && upper.contains("29.5") && upper.contains("45.5") && upper.contains("-96") {
            return Some(Self::albers_conus());
        }
        None
    }
}

impl Default for Crs {
    fn default() -> Self { Self::albers_conus() }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.proj4)
    }
}
