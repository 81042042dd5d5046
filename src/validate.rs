//! Form-shape validation for document metadata.
//!
//! Validation is advisory and side-effect-free: it checks field presence,
//! lengths, and date formats without any database round-trip, so it can run
//! before any network call. Blocking problems go in `errors`; non-blocking
//! ones in `warnings`.

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::models::FileCategory;

/// Maximum title length; longer titles are a blocking error.
pub const MAX_TITLE_LEN: usize = 200;

/// Descriptions beyond this length draw a warning but do not block.
pub const LONG_DESCRIPTION_THRESHOLD: usize = 2000;

/// The metadata form submitted alongside an uploaded file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub issuing_organ: String,
    #[serde(default)]
    pub responsible: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub confidentiality: Option<String>,
    #[serde(default)]
    pub legal_basis: Option<String>,
    /// Document date in `YYYY-MM-DD` form, if any.
    #[serde(default)]
    pub document_date: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Explicit category override; normally derived from the file's MIME type.
    #[serde(default)]
    pub category: Option<FileCategory>,
}

/// Outcome of validating a [`DocumentForm`].
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_blocking(&self) -> bool {
        !self.valid
    }
}

/// Validate required fields, lengths, and date formats.
pub fn validate(form: &DocumentForm) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let required: [(&str, &str); 6] = [
        (form.title.trim(), "title is required"),
        (form.document_type.trim(), "document type is required"),
        (form.issuing_organ.trim(), "issuing organ is required"),
        (form.responsible.trim(), "responsible party is required"),
        (form.subject.trim(), "subject is required"),
        (form.description.trim(), "description is required"),
    ];
    for (value, message) in required {
        if value.is_empty() {
            errors.push(message.to_string());
        }
    }

    if form.title.chars().count() > MAX_TITLE_LEN {
        errors.push(format!("title must be at most {} characters", MAX_TITLE_LEN));
    }

    if form.description.chars().count() > LONG_DESCRIPTION_THRESHOLD {
        warnings.push(format!(
            "description exceeds {} characters and may be truncated in listings",
            LONG_DESCRIPTION_THRESHOLD
        ));
    }

    if let Some(date) = form.document_date.as_deref() {
        if !date.trim().is_empty() && NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").is_err() {
            errors.push(format!("document date '{}' is not a valid YYYY-MM-DD date", date));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Generate a human-distinguishable digital identifier for a new document:
/// a UTC timestamp plus a short random token. Practically unique at this
/// system's scale; not hardened against adversarial collision.
pub fn generate_digital_id() -> String {
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("DOC-{}-{}", stamp, &token[..6].to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_form() -> DocumentForm {
        DocumentForm {
            title: "Decreto 001/2024".to_string(),
            description: "Municipal decree on archival policy".to_string(),
            document_type: "decree".to_string(),
            issuing_organ: "City Hall".to_string(),
            responsible: "Records Office".to_string(),
            subject: "archival policy".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn all_required_fields_present_is_valid() {
        let report = validate(&filled_form());
        assert!(report.valid, "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn each_missing_required_field_is_an_error() {
        let mutations: Vec<Box<dyn Fn(&mut DocumentForm)>> = vec![
            Box::new(|f| f.title.clear()),
            Box::new(|f| f.document_type.clear()),
            Box::new(|f| f.issuing_organ.clear()),
            Box::new(|f| f.responsible.clear()),
            Box::new(|f| f.subject.clear()),
            Box::new(|f| f.description.clear()),
        ];
        for mutate in mutations {
            let mut form = filled_form();
            mutate(&mut form);
            let report = validate(&form);
            assert!(!report.valid);
            assert_eq!(report.errors.len(), 1);
        }
    }

    #[test]
    fn empty_title_names_the_title_field() {
        let mut form = filled_form();
        form.title = "   ".to_string();
        let report = validate(&form);
        assert!(report.errors.iter().any(|e| e.contains("title")));
    }

    #[test]
    fn overlong_title_is_blocking() {
        let mut form = filled_form();
        form.title = "x".repeat(MAX_TITLE_LEN + 1);
        let report = validate(&form);
        assert!(!report.valid);
    }

    #[test]
    fn long_description_only_warns() {
        let mut form = filled_form();
        form.description = "d".repeat(LONG_DESCRIPTION_THRESHOLD + 1);
        let report = validate(&form);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn bad_date_is_blocking_and_good_date_passes() {
        let mut form = filled_form();
        form.document_date = Some("2024-13-40".to_string());
        assert!(!validate(&form).valid);

        form.document_date = Some("2024-02-29".to_string());
        assert!(validate(&form).valid);
    }

    #[test]
    fn digital_ids_are_distinct() {
        let a = generate_digital_id();
        let b = generate_digital_id();
        assert_ne!(a, b);
        assert!(a.starts_with("DOC-"));
    }
}
