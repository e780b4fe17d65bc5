use serde::{Deserialize, Serialize};

/// A classroom with a fixed seating capacity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Room {
    pub id: String,
    pub capacity: u32,
}

/// A student cohort requiring a single placement.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Group {
    pub name: String,
    pub enrollment: u32,
}

/// Tuning knobs for the underutilization penalty.
///
/// `delta` is the fraction of a room's capacity that may sit empty before an
/// assignment counts as underutilized; `lambda` weights the penalty against
/// the enrollment benefit in the objective.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Parameters {
    pub delta: f64,
    pub lambda: f64,
}

/// The complete input for one optimization request.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub rooms: Vec<Room>,
    pub groups: Vec<Group>,
    pub parameters: Parameters,
    pub slots: Vec<String>,
}

impl OptimizeRequest {
    /// Structural validation, run by the request layer before the engine.
    pub fn validate(&self) -> Result<(), String> {
        for room in &self.rooms {
            if room.capacity == 0 {
                return Err(format!("room '{}' must have a positive capacity", room.id));
            }
        }
        for group in &self.groups {
            if group.enrollment == 0 {
                return Err(format!(
                    "group '{}' must have a positive enrollment",
                    group.name
                ));
            }
        }
        if !(0.0..=0.5).contains(&self.parameters.delta) {
            return Err("parameter 'delta' must be between 0.0 and 0.5".to_string());
        }
        if self.parameters.lambda < 0.0 || !self.parameters.lambda.is_finite() {
            return Err("parameter 'lambda' must be a non-negative number".to_string());
        }
        Ok(())
    }
}

/// One chosen (group, room, slot) placement, in domain terms.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub group: String,
    pub room: String,
    pub slot: String,
    pub enrollment: u32,
    pub capacity: u32,
    pub utilization_pct: f64,
    pub penalty_applied: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// A metric that may be unavailable when the solve failed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metric {
    Float(f64),
    Int(u64),
    Unavailable(&'static str),
}

impl Metric {
    pub const NA: Metric = Metric::Unavailable("N/A");
}

/// Reporting metrics. All fields are omitted on the insufficient-data path,
/// serializing as an empty object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub objective_value: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_utilization: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_penalty: Option<Metric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms_used: Option<u32>,
}

impl Metrics {
    /// Empty metrics object for requests rejected before any solve.
    pub fn empty() -> Self {
        Metrics::default()
    }

    /// "N/A" placeholders for requests where the solver found no solution.
    pub fn unavailable() -> Self {
        Metrics {
            objective_value: Some(Metric::NA),
            avg_utilization: Some(Metric::NA),
            total_penalty: Some(Metric::NA),
            rooms_used: Some(0),
        }
    }
}

/// The full result of one optimization request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    pub status: Status,
    pub message: String,
    pub assignments: Vec<Assignment>,
    pub metrics: Metrics,
    pub unassigned_groups: Vec<String>,
    pub parameters_used: Parameters,
}
