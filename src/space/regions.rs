//! Birth-entity table for the registry search form
//!
//! The ordered list below defines the region axis of the combination space.
//! Order is load-bearing: combination indices encode a position in this table,
//! so reordering entries would silently remap every saved checkpoint.

/// Ordered list of birth-entity options accepted by the registry form
pub const REGIONS: &[&str] = &[
    "Aguascalientes",
    "Baja California",
    "Baja California Sur",
    "Campeche",
    "Chiapas",
    "Chihuahua",
    "Coahuila",
    "Colima",
    "Durango",
    "Guanajuato",
    "Guerrero",
    "Hidalgo",
    "Jalisco",
    "Michoacán",
    "Morelos",
    "Nayarit",
    "Nuevo León",
    "Oaxaca",
    "Puebla",
    "Querétaro",
    "Quintana Roo",
    "San Luis Potosí",
    "Sinaloa",
    "Sonora",
    "Tabasco",
    "Tamaulipas",
    "Tlaxcala",
    "Veracruz",
    "Yucatán",
    "Zacatecas",
    "Ciudad de México",
    "Nacido en el extranjero",
];

/// Two-letter form codes, indexed in lockstep with [`REGIONS`]
const REGION_CODES: &[&str] = &[
    "AS", "BC", "BS", "CC", "CS", "CH", "CL", "CM", "DG", "GT", "GR", "HG", "JC", "MN", "MS",
    "NT", "NL", "OC", "PL", "QT", "QR", "SP", "SL", "SR", "TC", "TS", "TL", "VZ", "YN", "ZS",
    "DF", "NE",
];

/// Look up the form code for a region name
pub fn region_code(name: &str) -> Option<&'static str> {
    REGIONS
        .iter()
        .position(|r| *r == name)
        .map(|i| REGION_CODES[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_same_length() {
        assert_eq!(REGIONS.len(), REGION_CODES.len());
    }

    #[test]
    fn test_region_code_lookup() {
        assert_eq!(region_code("Aguascalientes"), Some("AS"));
        assert_eq!(region_code("Ciudad de México"), Some("DF"));
        assert_eq!(region_code("Nacido en el extranjero"), Some("NE"));
        assert_eq!(region_code("Atlantis"), None);
    }
}
