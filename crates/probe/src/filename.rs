//! Metadata embedded in export file names.
//!
//! ERP exports are written as `Выгрузка_<Type>_<Config>_<...>_<timestamp>.db`,
//! e.g. `Выгрузка_Номенклатура_ERPWE_Unknown_Unknown_2025_11_20_10_18_55.db`.
//! When a database gives no hint about what its generic tables contain, the
//! file name is the last signal left.

use std::path::Path;

const TYPE_NOMENCLATURE: &str = "Номенклатура";
const TYPE_COUNTERPARTIES: &str = "Контрагенты";
const UNKNOWN: &str = "Unknown";

/// The two record kinds counted across the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Product catalog items.
    Nomenclature,
    /// Business partner records.
    Counterparties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFileName {
    /// Human-readable name, e.g. `"Accounting Kazakhstan Контрагенты"`.
    pub display_name: String,
    /// ERP configuration the export came from.
    pub config_name: Option<String>,
    /// Export type segment exactly as written in the file name.
    pub database_type: Option<String>,
    pub data_type: Option<DataType>,
}

impl ExportFileName {
    /// Parse a bare file name (with or without extension).
    pub fn parse(file_name: &str) -> Self {
        let stem = Path::new(file_name).file_stem().and_then(|s| s.to_str()).unwrap_or(file_name);
        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() < 3 {
            return Self {
                display_name: stem.to_string(),
                config_name: None,
                database_type: None,
                data_type: None,
            };
        }

        let database_type = parts[1];
        let config_name = match parts[2] {
            UNKNOWN if parts.len() > 3 => parts[3],
            other => other,
        };
        let data_type = match database_type {
            TYPE_NOMENCLATURE => Some(DataType::Nomenclature),
            TYPE_COUNTERPARTIES => Some(DataType::Counterparties),
            _ => None,
        };

        let mut display_name = String::new();
        if !config_name.is_empty() && config_name != UNKNOWN {
            display_name.push_str(&split_camel_case(config_name));
            display_name.push(' ');
        }
        display_name.push_str(database_type);

        Self {
            display_name: display_name.trim().to_string(),
            config_name: Some(config_name.to_string()),
            database_type: Some(database_type.to_string()),
            data_type,
        }
    }

    /// Parse the file-name component of a path.
    pub fn from_path(path: &Path) -> Self {
        Self::parse(&path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default())
    }
}

/// Insert a space at every lower-to-upper case boundary of a Latin identifier
/// (`"AccountingKazakhstan"` → `"Accounting Kazakhstan"`). Runs of capitals
/// such as `"ERPWE"` are left alone.
fn split_camel_case(name: &str) -> String {
    let mut result = String::with_capacity(name.len() + 4);
    let mut previous: Option<char> = None;
    for c in name.chars() {
        if c.is_ascii_uppercase() && previous.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
            result.push(' ');
        }
        result.push(c);
        previous = Some(c);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        "Выгрузка_Номенклатура_ERPWE_Unknown_Unknown_2025_11_20_10_18_55.db",
        "ERPWE Номенклатура",
        Some(DataType::Nomenclature)
    )]
    #[case(
        "Выгрузка_Контрагенты_AccountingKazakhstan_Unknown_2025.db",
        "Accounting Kazakhstan Контрагенты",
        Some(DataType::Counterparties)
    )]
    #[case(
        "Выгрузка_Контрагенты_БухгалтерияДляКазахстана_Unknown.db",
        "БухгалтерияДляКазахстана Контрагенты",
        Some(DataType::Counterparties)
    )]
    #[case("Выгрузка_Номенклатура_Unknown_Retail_2025.db", "Retail Номенклатура", Some(DataType::Nomenclature))]
    #[case("Выгрузка_Склады_ERP.db", "ERP Склады", None)]
    fn test_parse_export_names(
        #[case] file_name: &str,
        #[case] display_name: &str,
        #[case] data_type: Option<DataType>,
    ) {
        let parsed = ExportFileName::parse(file_name);
        assert_eq!(parsed.display_name, display_name);
        assert_eq!(parsed.data_type, data_type);
    }

    #[test]
    fn test_short_names_keep_the_stem() {
        let parsed = ExportFileName::parse("upload_42.db");
        assert_eq!(parsed.display_name, "upload_42");
        assert_eq!(parsed.config_name, None);
        assert_eq!(parsed.data_type, None);
    }

    #[test]
    fn test_trailing_unknown_config_is_kept() {
        let parsed = ExportFileName::parse("Выгрузка_Номенклатура_Unknown.db");
        assert_eq!(parsed.config_name.as_deref(), Some("Unknown"));
        assert_eq!(parsed.display_name, "Номенклатура");
    }

    #[test]
    fn test_from_path_uses_file_name_only() {
        let parsed = ExportFileName::from_path(Path::new("/srv/uploads/Выгрузка_Контрагенты_ERP_1.db"));
        assert_eq!(parsed.data_type, Some(DataType::Counterparties));
    }
}
