//! Certificate form drafts and their auto-fill rules.
//!
//! Every field update runs through [`FormState::apply_update`], which writes the value
//! and then evaluates the rule table for the form kind once. Rules are data:
//! a trigger list plus a pure function from the new value and the form to
//! the fields it derives. Derived writes never re-trigger rules.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FormKind {
    MinorWorks,
    Eic,
    Eicr,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Flag(_) => None,
        }
    }

    pub fn is_filled(&self) -> bool {
        match self {
            FieldValue::Flag(b) => *b,
            FieldValue::Text(s) => !s.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormError {
    #[error("field `{field}` does not exist on a {kind:?} form")]
    UnknownField { kind: FormKind, field: String },
    #[error("field `{field}` expects a {expected} value")]
    WrongType { field: String, expected: &'static str },
}

pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, Serialize)]
pub struct FormState {
    kind: FormKind,
    fields: FieldMap,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChanges {
    pub derived: FieldMap,
    pub warnings: Vec<String>,
}

pub struct DerivedRule {
    pub name: &'static str,
    pub triggers: &'static [&'static str],
    pub derive: fn(&str, &FieldValue, &FormState) -> FieldMap,
}

const SINGLE_PHASE_VOLTAGE: &str = "230V";
const THREE_PHASE_VOLTAGE: &str = "400V";

fn phase_count(value: &FieldValue) -> Option<u8> {
    let v = value.as_str()?.trim().to_ascii_lowercase();
    match v.as_str() {
        "1" | "single" | "single phase" | "single-phase" => Some(1),
        "3" | "three" | "three phase" | "three-phase" => Some(3),
        _ => None,
    }
}

fn derive_supply_voltage(_: &str, value: &FieldValue, form: &FormState) -> FieldMap {
    let mut out = FieldMap::new();
    let (wanted, other) = match phase_count(value) {
        Some(1) => (SINGLE_PHASE_VOLTAGE, THREE_PHASE_VOLTAGE),
        Some(3) => (THREE_PHASE_VOLTAGE, SINGLE_PHASE_VOLTAGE),
        _ => return out,
    };
    let current = form.text("supplyVoltage").trim();
    if current.is_empty() || current == other {
        out.insert("supplyVoltage".into(), FieldValue::text(wanted));
    }
    out
}

fn derive_phase_rotation(_: &str, value: &FieldValue, form: &FormState) -> FieldMap {
    let mut out = FieldMap::new();
    match phase_count(value) {
        Some(1) => {
            out.insert("phaseRotation".into(), FieldValue::text("na"));
        }
        Some(3) if form.text("phaseRotation") == "na" => {
            out.insert("phaseRotation".into(), FieldValue::text(""));
        }
        _ => {}
    }
    out
}

fn derive_pme(_: &str, value: &FieldValue, _: &FormState) -> FieldMap {
    let mut out = FieldMap::new();
    if value
        .as_str()
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("tn-c-s"))
    {
        out.insert("supplyPme".into(), FieldValue::text("yes"));
    }
    out
}

// BS 7671 Table 41.3 maximum earth fault loop impedance (ohms) by rating.
static ZS_LIMITS: Lazy<HashMap<&'static str, BTreeMap<u32, f64>>> = Lazy::new(|| {
    const RATINGS: [u32; 11] = [6, 10, 16, 20, 25, 32, 40, 50, 63, 80, 100];
    let type_b = [7.28, 4.37, 2.73, 2.19, 1.75, 1.37, 1.09, 0.87, 0.69, 0.55, 0.44];
    let type_c = [3.64, 2.19, 1.37, 1.09, 0.87, 0.68, 0.55, 0.44, 0.35, 0.27, 0.22];
    let type_d = [1.82, 1.09, 0.68, 0.55, 0.44, 0.34, 0.27, 0.22, 0.17, 0.14, 0.11];
    let table = |values: [f64; 11]| RATINGS.into_iter().zip(values).collect::<BTreeMap<_, _>>();
    HashMap::from([
        ("mcb-b", table(type_b)),
        ("mcb-c", table(type_c)),
        ("mcb-d", table(type_d)),
        ("rcbo", table(type_b)),
    ])
});

fn zs_key(device_type: &str) -> Option<&'static str> {
    let t = device_type.to_ascii_lowercase();
    if t.contains("rcbo") {
        return Some("rcbo");
    }
    if !t.contains("mcb") {
        return None;
    }
    if t.contains("type b") || t.contains("mcb-b") {
        Some("mcb-b")
    } else if t.contains("type c") || t.contains("mcb-c") {
        Some("mcb-c")
    } else if t.contains("type d") || t.contains("mcb-d") {
        Some("mcb-d")
    } else {
        None
    }
}

pub fn max_permitted_zs(device_type: &str, rating: &str) -> Option<f64> {
    let rating: u32 = rating.trim().trim_end_matches(['A', 'a']).trim().parse().ok()?;
    ZS_LIMITS.get(zs_key(device_type)?)?.get(&rating).copied()
}

fn derive_max_zs(_: &str, _: &FieldValue, form: &FormState) -> FieldMap {
    let mut out = FieldMap::new();
    let device = form.text("protectiveDeviceType");
    let rating = form.text("protectiveDeviceRating");
    if let Some(limit) = max_permitted_zs(device, rating) {
        out.insert("maxPermittedZs".into(), FieldValue::text(limit.to_string()));
    }
    out
}

fn derive_custom_equipment(_: &str, value: &FieldValue, form: &FormState) -> FieldMap {
    let mut out = FieldMap::new();
    if value.as_str() != Some("Other") && !form.text("customTestEquipment").is_empty() {
        out.insert("customTestEquipment".into(), FieldValue::text(""));
    }
    out
}

fn derive_spd_checks(_: &str, value: &FieldValue, _: &FormState) -> FieldMap {
    let (indicator, button, visual) = match value.as_str() {
        Some("all-ok") => ("normal", "satisfactory", "satisfactory"),
        Some("na") => ("na", "na", "na"),
        _ => return FieldMap::new(),
    };
    FieldMap::from([
        ("spdIndicatorStatus".into(), FieldValue::text(indicator)),
        ("spdTestButton".into(), FieldValue::text(button)),
        ("spdVisualInspection".into(), FieldValue::text(visual)),
    ])
}

static SUPPLY_RULES: [DerivedRule; 3] = [
    DerivedRule {
        name: "supply-voltage-from-phases",
        triggers: &["supplyPhases"],
        derive: derive_supply_voltage,
    },
    DerivedRule {
        name: "phase-rotation-from-phases",
        triggers: &["supplyPhases"],
        derive: derive_phase_rotation,
    },
    DerivedRule {
        name: "pme-from-earthing",
        triggers: &["earthingArrangement"],
        derive: derive_pme,
    },
];

static MINOR_WORKS_RULES: [DerivedRule; 3] = [
    DerivedRule {
        name: "max-zs-from-device",
        triggers: &["protectiveDeviceType", "protectiveDeviceRating"],
        derive: derive_max_zs,
    },
    DerivedRule {
        name: "clear-custom-test-equipment",
        triggers: &["testEquipmentModel"],
        derive: derive_custom_equipment,
    },
    DerivedRule {
        name: "spd-bulk-result",
        triggers: &["spdOverall"],
        derive: derive_spd_checks,
    },
];

const SUPPLY_FIELDS: &[(&str, &str)] = &[
    ("earthingArrangement", ""),
    ("supplyPme", ""),
    ("supplyPhases", ""),
    ("supplyVoltage", SINGLE_PHASE_VOLTAGE),
    ("supplyFrequency", "50"),
    ("phaseRotation", ""),
];

const MINOR_WORKS_TEXT: &[(&str, &str)] = &[
    ("certificateNumber", ""),
    ("propertyAddress", ""),
    ("clientName", ""),
    ("workDate", ""),
    ("workType", ""),
    ("workDescription", ""),
    ("circuitDesignation", ""),
    ("protectiveDeviceType", ""),
    ("protectiveDeviceRating", ""),
    ("maxPermittedZs", ""),
    ("earthFaultLoopImpedance", ""),
    ("insulationResistance", ""),
    ("polarity", ""),
    ("testEquipmentModel", ""),
    ("customTestEquipment", ""),
    ("testEquipmentSerial", ""),
    ("testEquipmentCalDate", ""),
    ("spdOverall", ""),
    ("spdIndicatorStatus", ""),
    ("spdTestButton", ""),
    ("spdVisualInspection", ""),
    ("electricianName", ""),
    ("position", ""),
    ("signatureDate", ""),
];

const MINOR_WORKS_FLAGS: &[&str] = &["bs7671Compliance", "testResultsAccurate", "workSafety"];

const EICR_TEXT: &[(&str, &str)] = &[
    ("clientName", ""),
    ("clientAddress", ""),
    ("installationAddress", ""),
    ("description", ""),
    ("purposeOfInspection", ""),
    ("inspectionDate", ""),
    ("extentOfInspection", ""),
    ("limitationsOfInspection", ""),
    ("mainProtectiveDevice", ""),
    ("mainEarthingConductorSize", ""),
    ("mainBondingSize", ""),
    ("testInstrumentMake", ""),
    ("testInstrumentSerial", ""),
    ("inspectorName", ""),
    ("overallAssessment", ""),
];

const EIC_TEXT: &[(&str, &str)] = &[
    ("clientName", ""),
    ("installationAddress", ""),
    ("descriptionOfWork", ""),
    ("designerName", ""),
    ("installerName", ""),
    ("inspectorName", ""),
    ("mainProtectiveDevice", ""),
    ("mainEarthingConductorSize", ""),
    ("mainBondingSize", ""),
    ("testInstrumentMake", ""),
];

impl FormKind {
    pub fn rules(self) -> impl Iterator<Item = &'static DerivedRule> {
        let extra: &'static [DerivedRule] = match self {
            FormKind::MinorWorks => &MINOR_WORKS_RULES,
            FormKind::Eic | FormKind::Eicr => &[],
        };
        SUPPLY_RULES.iter().chain(extra.iter())
    }

    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            FormKind::MinorWorks => &[
                "propertyAddress",
                "clientName",
                "workDate",
                "workDescription",
                "earthingArrangement",
                "circuitDesignation",
                "protectiveDeviceType",
                "protectiveDeviceRating",
                "polarity",
                "electricianName",
                "position",
                "signatureDate",
                "bs7671Compliance",
                "testResultsAccurate",
                "workSafety",
            ],
            FormKind::Eicr => &[
                "clientName",
                "installationAddress",
                "purposeOfInspection",
                "inspectionDate",
                "earthingArrangement",
                "inspectorName",
                "overallAssessment",
            ],
            FormKind::Eic => &[
                "clientName",
                "installationAddress",
                "descriptionOfWork",
                "earthingArrangement",
                "installerName",
            ],
        }
    }

    fn defaults(self) -> FieldMap {
        let text = match self {
            FormKind::MinorWorks => MINOR_WORKS_TEXT,
            FormKind::Eicr => EICR_TEXT,
            FormKind::Eic => EIC_TEXT,
        };
        let flags: &[&str] = match self {
            FormKind::MinorWorks => MINOR_WORKS_FLAGS,
            FormKind::Eic | FormKind::Eicr => &[],
        };
        SUPPLY_FIELDS
            .iter()
            .chain(text)
            .map(|(name, value)| (name.to_string(), FieldValue::text(*value)))
            .chain(flags.iter().map(|name| (name.to_string(), FieldValue::Flag(false))))
            .collect()
    }
}

impl FormState {
    pub fn new(kind: FormKind) -> Self {
        Self {
            kind,
            fields: kind.defaults(),
        }
    }

    pub fn kind(&self) -> FormKind {
        self.kind
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Text content of a field, empty for flags and unknown fields.
    pub fn text(&self, field: &str) -> &str {
        self.fields
            .get(field)
            .and_then(FieldValue::as_str)
            .unwrap_or("")
    }

    /// Share of filled fields, the derived Zs limit excluded.
    pub fn completion_percentage(&self) -> u32 {
        let counted: Vec<_> = self
            .fields
            .iter()
            .filter(|(name, _)| name.as_str() != "maxPermittedZs")
            .collect();
        let filled = counted.iter().filter(|(_, v)| v.is_filled()).count();
        crate::summary::percentage(filled, counted.len())
    }

    pub fn missing_required(&self) -> Vec<&'static str> {
        self.kind
            .required_fields()
            .iter()
            .copied()
            .filter(|f| !self.fields.get(*f).is_some_and(FieldValue::is_filled))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    /// Measured Zs against the derived limit; `None` until both parse.
    pub fn zs_within_limit(&self) -> Option<bool> {
        let measured: f64 = self.text("earthFaultLoopImpedance").trim().parse().ok()?;
        let limit: f64 = self.text("maxPermittedZs").trim().parse().ok()?;
        Some(measured <= limit)
    }

    /// Writes `value` into `field`, then applies the derived rules the field
    /// triggers.
    pub fn apply_update(&mut self, field: &str, value: FieldValue) -> Result<FieldChanges, FormError> {
        let existing = self.fields.get(field).ok_or_else(|| FormError::UnknownField {
            kind: self.kind,
            field: field.to_string(),
        })?;
        match (existing, &value) {
            (FieldValue::Flag(_), FieldValue::Text(_)) => {
                return Err(FormError::WrongType {
                    field: field.to_string(),
                    expected: "boolean",
                })
            }
            (FieldValue::Text(_), FieldValue::Flag(_)) => {
                return Err(FormError::WrongType {
                    field: field.to_string(),
                    expected: "text",
                })
            }
            _ => {}
        }
        self.fields.insert(field.to_string(), value.clone());

        let mut changes = FieldChanges::default();
        let mut derived = FieldMap::new();
        for rule in self.kind.rules().filter(|r| r.triggers.iter().any(|t| *t == field)) {
            let produced = (rule.derive)(field, &value, self);
            if !produced.is_empty() {
                tracing::debug!(rule = rule.name, field, "derived fields");
            }
            derived.extend(produced);
        }
        for (name, derived_value) in derived {
            if self.fields.get(&name) != Some(&derived_value) {
                self.fields.insert(name.clone(), derived_value.clone());
                changes.derived.insert(name, derived_value);
            }
        }

        let touches_zs = ["earthFaultLoopImpedance", "maxPermittedZs"]
            .iter()
            .any(|f| *f == field || changes.derived.contains_key(*f));
        if touches_zs && self.zs_within_limit() == Some(false) {
            changes.warnings.push(format!(
                "measured Zs {} exceeds maximum permitted {}",
                self.text("earthFaultLoopImpedance"),
                self.text("maxPermittedZs")
            ));
        }
        Ok(changes)
    }
}
