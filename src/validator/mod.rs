//! Result content validation and identifier extraction
//!
//! Inspects raw response content from the registry service and extracts a
//! structured match, independent of how the content was obtained. Pure:
//! no I/O, safe to call from any worker.
//!
//! Extraction order mirrors the result page structure: the no-match modal is
//! checked first, then the results table (identifier, birth date and
//! birth-entity cells), then a whole-text pattern scan as a fallback.

use chrono::NaiveDate;
use regex::Regex;
use scraper::{Html, Selector};

/// Structured outcome of validating one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    /// A record was present in the response
    pub found: bool,

    /// The extracted identifier is structurally and calendrically valid
    pub valid: bool,

    /// The 18-character identifier, uppercased
    pub extracted_id: Option<String>,

    /// Birth date, from the result table when present, else decoded from
    /// the identifier
    pub birth_date: Option<NaiveDate>,

    /// Two-letter region code embedded in the identifier
    pub region_code: Option<String>,

    /// Region name as printed in the result table, when present
    pub region_name: Option<String>,
}

impl Validation {
    /// A usable match: present and valid
    pub fn is_match(&self) -> bool {
        self.found && self.valid
    }
}

/// Markers that identify the no-match modal, matched case-insensitively.
/// Any of these wins over identifier-looking substrings elsewhere in the page.
const NO_MATCH_MARKERS: &[&str] = &[
    "los datos ingresados no son correctos",
    "aviso importante",
    "warningmenssage",
    "estimado/a usuario/a",
];

/// Validator for registry result pages
pub struct ResultValidator {
    /// Full-string identifier pattern
    id_pattern: Regex,

    /// Unanchored variant for scanning page text
    id_scan: Regex,

    row_selector: Selector,
    cell_selector: Selector,
}

impl Default for ResultValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultValidator {
    pub fn new() -> Self {
        Self {
            id_pattern: Regex::new(r"^[A-Z]{4}\d{6}[HM][A-Z]{5}[0-9A-Z]\d$")
                .expect("Invalid identifier pattern"),
            id_scan: Regex::new(r"[A-Z]{4}\d{6}[HM][A-Z]{5}[0-9A-Z]\d")
                .expect("Invalid identifier scan pattern"),
            row_selector: Selector::parse("tr").expect("Invalid CSS selector: tr"),
            cell_selector: Selector::parse("td").expect("Invalid CSS selector: td"),
        }
    }

    /// Check identifier format: 18 characters, standard pattern
    pub fn is_valid_id(&self, id: &str) -> bool {
        let clean = id.trim().to_uppercase();
        clean.len() == 18 && self.id_pattern.is_match(&clean)
    }

    /// Decode the birth date embedded at positions 5-10 (YYMMDD)
    ///
    /// Two-digit years 00-30 map to 2000-2030, 31-99 to 1931-1999. Returns
    /// `None` when the embedded month/day is not a real calendar date, in
    /// which case the identifier as a whole must be rejected.
    pub fn birth_date_from_id(&self, id: &str) -> Option<NaiveDate> {
        if !self.is_valid_id(id) {
            return None;
        }
        let clean = id.trim().to_uppercase();

        let yy: i32 = clean[4..6].parse().ok()?;
        let month: u32 = clean[6..8].parse().ok()?;
        let day: u32 = clean[8..10].parse().ok()?;

        let year = if yy <= 30 { 2000 + yy } else { 1900 + yy };

        NaiveDate::from_ymd_opt(year, month, day)
    }

    /// Extract the two-letter region code at positions 12-13
    pub fn region_code_from_id(&self, id: &str) -> Option<String> {
        if !self.is_valid_id(id) {
            return None;
        }
        Some(id.trim().to_uppercase()[11..13].to_string())
    }

    /// Scan free text for the first identifier-shaped substring
    pub fn extract_id_from_text(&self, text: &str) -> Option<String> {
        self.id_scan
            .find(&text.to_uppercase())
            .map(|m| m.as_str().to_string())
    }

    /// Validate a response and extract match information
    ///
    /// `expected_region` is the region of the combination that produced the
    /// response; it fills `region_name` when the result table omits one.
    pub fn validate(&self, content: &str, expected_region: &str) -> Validation {
        let mut result = Validation::default();

        if content.is_empty() {
            return result;
        }

        let lower = content.to_lowercase();
        if NO_MATCH_MARKERS.iter().any(|m| lower.contains(m)) {
            return result;
        }

        let document = Html::parse_document(content);

        // Results table first: label cell followed by a value cell
        let mut table_id = None;
        let mut table_date = None;
        let mut table_region = None;

        for row in document.select(&self.row_selector) {
            let cells: Vec<String> = row
                .select(&self.cell_selector)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            if cells.len() < 2 {
                continue;
            }

            let label = cells[0].to_lowercase();
            let value = cells[1].trim().to_string();

            if label.starts_with("curp") {
                table_id = Some(value);
            } else if label.starts_with("fecha de nacimiento") {
                table_date = NaiveDate::parse_from_str(&value, "%d/%m/%Y").ok();
            } else if label.starts_with("entidad de nacimiento") {
                table_region = Some(value);
            }
        }

        let candidate = table_id
            .filter(|id| self.is_valid_id(id))
            .or_else(|| self.extract_id_from_text(content));

        if let Some(id) = candidate {
            let id = id.trim().to_uppercase();

            // Pattern-valid identifiers with an impossible embedded date are
            // rejected outright.
            let embedded_date = self.birth_date_from_id(&id);
            if self.is_valid_id(&id) && embedded_date.is_some() {
                result.found = true;
                result.valid = true;
                result.birth_date = table_date.or(embedded_date);
                result.region_code = self.region_code_from_id(&id);
                result.region_name =
                    Some(table_region.unwrap_or_else(|| expected_region.to_string()));
                result.extracted_id = Some(id);
            }
        }

        result
    }
}
