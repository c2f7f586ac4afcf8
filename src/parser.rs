// Row Parser - one raw CSV record → one typed MemberFact
//
// All free-text normalization happens here, at the ingestion boundary.
// Downstream components (diff, aggregation, reporting) only ever see the
// closed StatusKind enum, never raw status strings.

use serde::Deserialize;

// ============================================================================
// STATUS NORMALIZATION
// ============================================================================

/// Status labels that count as "active" after trim + lowercase.
pub const ACTIVE_LABELS: [&str; 3] = ["active", "active patron", "active_patron"];

/// Closed classification of the free-text status label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Active,
    Inactive,
}

impl StatusKind {
    /// Normalize a raw status label (trim + lowercase) and classify it.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase();
        if ACTIVE_LABELS.contains(&normalized.as_str()) {
            StatusKind::Active
        } else {
            StatusKind::Inactive
        }
    }
}

/// The active predicate: recognized active status AND a positive pledge.
///
/// An "Active patron" row with a $0 pledge is not an actively contributing
/// member, so it does not count toward active totals.
pub fn is_active(status_label: &str, pledge_amount: f64) -> bool {
    StatusKind::from_label(status_label) == StatusKind::Active && pledge_amount > 0.0
}

// ============================================================================
// RAW ROW (CSV shape)
// ============================================================================

/// One record as it appears in the export, keyed by the export's headers.
/// Every field is free text; all typing happens in `MemberFact::from_raw`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRow {
    #[serde(rename = "User ID", default)]
    pub user_id: String,

    #[serde(rename = "Email", default)]
    pub email: String,

    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "Patron Status", default)]
    pub status: String,

    #[serde(rename = "Pledge Amount", default)]
    pub pledge_amount: String,
}

// ============================================================================
// MEMBER FACT (typed row)
// ============================================================================

/// One member's observed state in the current batch, fully typed.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberFact {
    pub external_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Original status label, persisted verbatim in the snapshot.
    pub status_label: String,
    pub status: StatusKind,
    pub pledge_amount: f64,
}

impl MemberFact {
    /// Parse a raw record into a fact.
    ///
    /// Returns `None` when the external identifier is missing: such rows are
    /// skippable (logged by the caller, excluded from all counts), not fatal.
    pub fn from_raw(row: &RawRow) -> Option<MemberFact> {
        let external_id = row.user_id.trim();
        if external_id.is_empty() {
            return None;
        }

        let (first_name, last_name) = parse_name(&row.name);
        let pledge_amount = parse_pledge(&row.pledge_amount);

        Some(MemberFact {
            external_id: external_id.to_string(),
            email: row.email.trim().to_string(),
            first_name,
            last_name,
            status_label: row.status.clone(),
            status: StatusKind::from_label(&row.status),
            pledge_amount,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == StatusKind::Active && self.pledge_amount > 0.0
    }
}

/// Split a full name into (first, last): first whitespace-delimited token is
/// the first name, the rest joined with single spaces is the last name.
pub fn parse_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or("").to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

/// Parse a free-form pledge amount ("$10.00", "$1,234.56", "N/A", "").
///
/// Strips everything except digits, '.' and '-', then parses as f64.
/// Unparseable or absent values yield 0.
pub fn parse_pledge(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().unwrap_or(0.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_row(user_id: &str, name: &str, status: &str, pledge: &str) -> RawRow {
        RawRow {
            user_id: user_id.to_string(),
            email: "member@example.com".to_string(),
            name: name.to_string(),
            status: status.to_string(),
            pledge_amount: pledge.to_string(),
        }
    }

    #[test]
    fn test_status_normalization() {
        assert_eq!(StatusKind::from_label("Active patron"), StatusKind::Active);
        assert_eq!(StatusKind::from_label("  ACTIVE  "), StatusKind::Active);
        assert_eq!(StatusKind::from_label("active_patron"), StatusKind::Active);
        assert_eq!(StatusKind::from_label("Former patron"), StatusKind::Inactive);
        assert_eq!(StatusKind::from_label("Declined"), StatusKind::Inactive);
        assert_eq!(StatusKind::from_label(""), StatusKind::Inactive);
    }

    #[test]
    fn test_active_requires_positive_pledge() {
        assert!(is_active("Active patron", 10.0));
        assert!(!is_active("Active patron", 0.0));
        assert!(!is_active("Active patron", -1.0));
        assert!(!is_active("Former patron", 10.0));
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name("Ada Lovelace"), ("Ada".into(), "Lovelace".into()));
        assert_eq!(
            parse_name("Mary Jane  Watson"),
            ("Mary".into(), "Jane Watson".into())
        );
        assert_eq!(parse_name("Prince"), ("Prince".into(), "".into()));
        assert_eq!(parse_name(""), ("".into(), "".into()));
        assert_eq!(parse_name("   "), ("".into(), "".into()));
    }

    #[test]
    fn test_parse_pledge() {
        assert_eq!(parse_pledge("$10.00"), 10.0);
        assert_eq!(parse_pledge("$1,234.56"), 1234.56);
        assert_eq!(parse_pledge("N/A"), 0.0);
        assert_eq!(parse_pledge(""), 0.0);
        assert_eq!(parse_pledge("-$5.25"), -5.25);
        assert_eq!(parse_pledge("5"), 5.0);
    }

    #[test]
    fn test_fact_from_raw() {
        let row = raw_row("pat_123", "Ada Lovelace", "Active patron", "$10.00");
        let fact = MemberFact::from_raw(&row).unwrap();

        assert_eq!(fact.external_id, "pat_123");
        assert_eq!(fact.first_name, "Ada");
        assert_eq!(fact.last_name, "Lovelace");
        assert_eq!(fact.status, StatusKind::Active);
        assert_eq!(fact.status_label, "Active patron");
        assert_eq!(fact.pledge_amount, 10.0);
        assert!(fact.is_active());
    }

    #[test]
    fn test_missing_external_id_is_skippable() {
        assert!(MemberFact::from_raw(&raw_row("", "Ada", "Active", "$1")).is_none());
        assert!(MemberFact::from_raw(&raw_row("   ", "Ada", "Active", "$1")).is_none());
    }
}
