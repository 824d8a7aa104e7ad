use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::week::WeekId;

/// A cached weekly report row. `report_json` is the serialized report document,
/// returned verbatim on cache hits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub id: i64,
    pub week: WeekId,
    pub report_json: String,
    pub generated_at: NaiveDateTime,
}
