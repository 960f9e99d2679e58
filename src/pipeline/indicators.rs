//! Binary outcome indicators derived from raw survey responses

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::linkage::ExposureKind;

/// Binary indicator built from one or more response fields.
///
/// Any-of logic over three values: positive if any source carries a positive
/// code, negative only if every source carries a negative code, undefined
/// otherwise. Missing and unrecognized codes never count as negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRule {
    pub name: String,
    pub sources: Vec<String>,
    pub positive_codes: Vec<String>,
    pub negative_codes: Vec<String>,
}

impl IndicatorRule {
    pub fn new(name: &str, sources: &[&str], positive_codes: &[&str], negative_codes: &[&str]) -> Self {
        let owned = |v: &[&str]| v.iter().map(|s| s.to_string()).collect();
        Self {
            name: name.to_string(),
            sources: owned(sources),
            positive_codes: owned(positive_codes),
            negative_codes: owned(negative_codes),
        }
    }

    fn matches(codes: &[String], value: &str) -> bool {
        codes.iter().any(|c| c.eq_ignore_ascii_case(value.trim()))
    }

    /// Evaluate against a child's responses
    pub fn evaluate(&self, responses: &BTreeMap<String, Option<String>>) -> Option<bool> {
        let mut all_negative = !self.sources.is_empty();
        for source in &self.sources {
            match responses.get(source).and_then(|v| v.as_deref()) {
                Some(code) if Self::matches(&self.positive_codes, code) => return Some(true),
                Some(code) if Self::matches(&self.negative_codes, code) => {}
                _ => all_negative = false,
            }
        }
        all_negative.then_some(false)
    }
}

/// Group of indicators analysed against one exposure window family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPanel {
    pub name: String,
    pub exposure: ExposureKind,
    pub indicators: Vec<IndicatorRule>,
}

const YES: &[&str] = &["Yes", "1"];
const NO: &[&str] = &["No", "2"];
const ON_TRACK: &[&str] = &["Yes", "1", "On track"];
const OFF_TRACK: &[&str] = &["No", "0", "Not on track"];

/// Child discipline methods grouped as in the UNICEF 2017 report
pub fn discipline_panel() -> AnalysisPanel {
    AnalysisPanel {
        name: "discipline".to_string(),
        exposure: ExposureKind::Windowed,
        indicators: vec![
            IndicatorRule::new("physical_punishment", &["discshook", "discspank"], YES, NO),
            IndicatorRule::new(
                "severe_physical",
                &["discstrike", "dischithead", "dischitlimb", "discbeathard"],
                YES,
                NO,
            ),
            IndicatorRule::new("psychological_aggression", &["discshout", "disccallname"], YES, NO),
            IndicatorRule::new(
                "nonviolent_discipline",
                &["discprivileges", "discwhywrong", "discnewtask"],
                YES,
                NO,
            ),
        ],
    }
}

/// Early childhood development on-track flags
pub fn ecdi_panel() -> AnalysisPanel {
    let flags = [
        "ecdi_track",
        "ecdi_litnum_track",
        "ecdi_physical_track",
        "ecdi_se_track",
        "ecdi_learning_track",
    ];
    AnalysisPanel {
        name: "ecdi".to_string(),
        exposure: ExposureKind::Cumulative,
        indicators: flags
            .iter()
            .map(|f| IndicatorRule::new(f, &[*f], ON_TRACK, OFF_TRACK))
            .collect(),
    }
}

pub fn default_panels() -> Vec<AnalysisPanel> {
    vec![discipline_panel(), ecdi_panel()]
}

/// Every response field referenced by the panels, sorted and deduplicated
pub fn response_fields(panels: &[AnalysisPanel]) -> Vec<String> {
    panels
        .iter()
        .flat_map(|p| p.indicators.iter())
        .flat_map(|r| r.sources.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(|s| s.to_string())))
            .collect()
    }

    #[test]
    fn test_any_positive_source_is_true() {
        let rule = IndicatorRule::new("physical_punishment", &["discshook", "discspank"], YES, NO);
        let r = responses(&[("discshook", Some("No")), ("discspank", Some("yes"))]);
        assert_eq!(rule.evaluate(&r), Some(true));
    }

    #[test]
    fn test_all_negative_is_false() {
        let rule = IndicatorRule::new("physical_punishment", &["discshook", "discspank"], YES, NO);
        let r = responses(&[("discshook", Some("No")), ("discspank", Some("2"))]);
        assert_eq!(rule.evaluate(&r), Some(false));
    }

    #[test]
    fn test_missing_is_undefined_not_false() {
        let rule = IndicatorRule::new("physical_punishment", &["discshook", "discspank"], YES, NO);
        let r = responses(&[("discshook", Some("No")), ("discspank", None)]);
        assert_eq!(rule.evaluate(&r), None);
        let unknown = responses(&[("discshook", Some("No")), ("discspank", Some("DK"))]);
        assert_eq!(rule.evaluate(&unknown), None);
        assert_eq!(rule.evaluate(&BTreeMap::new()), None);
    }

    #[test]
    fn test_missing_source_does_not_mask_positive() {
        let rule = IndicatorRule::new("physical_punishment", &["discshook", "discspank"], YES, NO);
        let r = responses(&[("discshook", None), ("discspank", Some("Yes"))]);
        assert_eq!(rule.evaluate(&r), Some(true));
    }

    #[test]
    fn test_default_panels_fields() {
        let fields = response_fields(&default_panels());
        assert!(fields.contains(&"discbeathard".to_string()));
        assert!(fields.contains(&"ecdi_se_track".to_string()));
        assert_eq!(fields.len(), 11 + 5);
    }
}
