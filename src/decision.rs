//! Signal decision engine.
//!
//! Filters a detection set to vehicle classes, counts, and maps the count
//! through an ordered threshold table to a green-time recommendation.
//! Everything here is pure: no I/O, no state beyond the immutable tables.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;

use crate::detect::DetectionSet;
use crate::error::{SignalError, SignalResult};

/// COCO ids counted as traffic: car, motorcycle, bus, truck.
pub const VEHICLE_CLASS_IDS: [u32; 4] = [2, 3, 5, 7];
const VEHICLE_CLASS_NAMES: [&str; 4] = ["car", "motorcycle", "bus", "truck"];

/// Qualitative traffic density bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DensityLabel {
    Low,
    Medium,
    High,
}

impl fmt::Display for DensityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DensityLabel::Low => "LOW",
            DensityLabel::Medium => "MEDIUM",
            DensityLabel::High => "HIGH",
        })
    }
}

/// Presentation severity paired with each density bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityTag {
    Success,
    Warning,
    Danger,
}

impl fmt::Display for SeverityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SeverityTag::Success => "success",
            SeverityTag::Warning => "warning",
            SeverityTag::Danger => "danger",
        })
    }
}

/// Class ids considered vehicles. Must track the detector's taxonomy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VehicleClassSet {
    ids: BTreeSet<u32>,
}

impl VehicleClassSet {
    pub fn new<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Process-wide COCO vehicle set.
    pub fn standard() -> &'static VehicleClassSet {
        static SET: OnceLock<VehicleClassSet> = OnceLock::new();
        SET.get_or_init(|| VehicleClassSet::new(VEHICLE_CLASS_IDS))
    }

    pub fn contains(&self, class_id: u32) -> bool {
        self.ids.contains(&class_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    /// Check every id against a detector's declared class names.
    ///
    /// Each id must exist in `taxonomy` and name a known vehicle category.
    pub fn validate_against(&self, taxonomy: &[&str]) -> SignalResult<()> {
        for id in &self.ids {
            let name = taxonomy.get(*id as usize).ok_or_else(|| {
                SignalError::ConfigurationError(format!(
                    "vehicle class id {} is outside the detector taxonomy ({} classes)",
                    id,
                    taxonomy.len()
                ))
            })?;
            if !VEHICLE_CLASS_NAMES.contains(name) {
                return Err(SignalError::ConfigurationError(format!(
                    "class id {} is '{}' in the detector taxonomy, not a vehicle",
                    id, name
                )));
            }
        }
        Ok(())
    }
}

/// One row of the threshold table. `max` is inclusive; `None` is unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ThresholdRow {
    pub min: u32,
    pub max: Option<u32>,
    pub signal_seconds: u32,
    pub density: DensityLabel,
    pub severity: SeverityTag,
}

impl ThresholdRow {
    pub fn contains(&self, count: u32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

/// Ordered, contiguous, disjoint partition of the non-negative integers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThresholdTable {
    rows: Vec<ThresholdRow>,
}

impl ThresholdTable {
    /// Validate and build a table.
    ///
    /// Rows must start at 0, each following row must start right after the
    /// previous row's `max`, only the last row may be unbounded, and every
    /// `signal_seconds` must be positive.
    pub fn new(rows: Vec<ThresholdRow>) -> SignalResult<Self> {
        let err = |msg: String| Err(SignalError::ConfigurationError(msg));
        let Some(first) = rows.first() else {
            return err("threshold table is empty".to_string());
        };
        if first.min != 0 {
            return err(format!("threshold table starts at {}, not 0", first.min));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.signal_seconds == 0 {
                return err(format!("row {} has a zero signal duration", i));
            }
            let is_last = i + 1 == rows.len();
            match (row.max, is_last) {
                (None, true) => {}
                (None, false) => {
                    return err(format!("row {} is unbounded but not last", i));
                }
                (Some(_), true) => {
                    return err("last row must be unbounded".to_string());
                }
                (Some(max), false) => {
                    if max < row.min {
                        return err(format!("row {} has max {} below min {}", i, max, row.min));
                    }
                    let next = rows[i + 1].min;
                    if max.checked_add(1) != Some(next) {
                        return err(format!(
                            "rows {} and {} are not contiguous ({} then {})",
                            i,
                            i + 1,
                            max,
                            next
                        ));
                    }
                }
            }
        }
        Ok(Self { rows })
    }

    /// Process-wide standard table: [0,10) LOW 30s, [10,25] MEDIUM 60s, (25,inf) HIGH 90s.
    pub fn standard() -> &'static ThresholdTable {
        static TABLE: OnceLock<ThresholdTable> = OnceLock::new();
        TABLE.get_or_init(|| ThresholdTable {
            rows: vec![
                ThresholdRow {
                    min: 0,
                    max: Some(9),
                    signal_seconds: 30,
                    density: DensityLabel::Low,
                    severity: SeverityTag::Success,
                },
                ThresholdRow {
                    min: 10,
                    max: Some(25),
                    signal_seconds: 60,
                    density: DensityLabel::Medium,
                    severity: SeverityTag::Warning,
                },
                ThresholdRow {
                    min: 26,
                    max: None,
                    signal_seconds: 90,
                    density: DensityLabel::High,
                    severity: SeverityTag::Danger,
                },
            ],
        })
    }

    pub fn rows(&self) -> &[ThresholdRow] {
        &self.rows
    }

    /// The unique row containing `count`.
    pub fn lookup(&self, count: u32) -> &ThresholdRow {
        // Validated tables start at 0 and are contiguous, so the last row
        // whose min is <= count is the match.
        self.rows
            .iter()
            .rev()
            .find(|row| row.min <= count)
            .unwrap_or(&self.rows[0])
    }
}

/// Outcome of one decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub vehicle_count: u32,
    pub density: DensityLabel,
    pub signal_seconds: u32,
    pub severity: SeverityTag,
}

/// Filter + count + classify over explicit tables.
#[derive(Clone, Debug)]
pub struct SignalDecisionEngine {
    vehicles: VehicleClassSet,
    table: ThresholdTable,
}

impl SignalDecisionEngine {
    pub fn new(vehicles: VehicleClassSet, table: ThresholdTable) -> Self {
        Self { vehicles, table }
    }

    /// Engine over the standard vehicle set and threshold table.
    pub fn standard() -> &'static SignalDecisionEngine {
        static ENGINE: OnceLock<SignalDecisionEngine> = OnceLock::new();
        ENGINE.get_or_init(|| {
            SignalDecisionEngine::new(
                VehicleClassSet::standard().clone(),
                ThresholdTable::standard().clone(),
            )
        })
    }

    pub fn vehicles(&self) -> &VehicleClassSet {
        &self.vehicles
    }

    pub fn table(&self) -> &ThresholdTable {
        &self.table
    }

    /// Number of detections whose class is a vehicle. Confidence is not re-checked.
    pub fn count_vehicles(&self, detections: &DetectionSet) -> u32 {
        let n = detections
            .iter()
            .filter(|d| self.vehicles.contains(d.class_id))
            .count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    pub fn classify(&self, vehicle_count: u32) -> Decision {
        let row = self.table.lookup(vehicle_count);
        Decision {
            vehicle_count,
            density: row.density,
            signal_seconds: row.signal_seconds,
            severity: row.severity,
        }
    }

    pub fn decide(&self, detections: &DetectionSet) -> Decision {
        self.classify(self.count_vehicles(detections))
    }

    /// Classify a caller-supplied count.
    ///
    /// Negative counts and counts beyond `u32::MAX` are rejected rather than
    /// clamped, so the reported `vehicle_count` always equals the input.
    pub fn classify_count(&self, count: i64) -> SignalResult<Decision> {
        let count = u32::try_from(count).map_err(|_| SignalError::InvalidCount(count))?;
        Ok(self.classify(count))
    }
}

/// Decide over the standard tables.
pub fn decide(detections: &DetectionSet) -> Decision {
    SignalDecisionEngine::standard().decide(detections)
}

/// Classify a raw count over the standard tables.
pub fn classify_count(count: i64) -> SignalResult<Decision> {
    SignalDecisionEngine::standard().classify_count(count)
}
