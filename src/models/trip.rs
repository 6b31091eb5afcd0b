use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Trip {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub destination: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub budget: Option<f64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Stop {
    pub id: i64,
    pub trip_id: i64,
    pub city_name: String,
    pub city_country: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
    pub order_index: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Activity {
    pub id: i64,
    pub stop_id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub cost: f64,
    pub icon: Option<String>,
    pub location: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub notes: Option<String>,
    pub is_custom: bool,
    pub order_index: i64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SuggestedActivity {
    pub id: i64,
    pub trip_id: i64,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub cost: f64,
    pub icon: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Expense {
    pub id: i64,
    pub trip_id: i64,
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: f64,
    pub spent_at: Option<NaiveDate>,
}

/// A trip as the API returns it: the row plus its ordered stop/activity tree.
#[derive(Debug, Clone, Serialize)]
pub struct TripDetail {
    #[serde(flatten)]
    pub trip: Trip,
    pub stops: Vec<StopDetail>,
    pub suggested_activities: Vec<SuggestedActivity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopDetail {
    #[serde(flatten)]
    pub stop: Stop,
    pub activities: Vec<Activity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetBreakdown {
    pub trip_id: i64,
    pub budget: Option<f64>,
    pub activity_cost_total: f64,
    pub expense_total: f64,
    pub expenses: Vec<Expense>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripPayload {
    #[serde(alias = "title")]
    pub name: String,
    pub destination: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub budget: Option<f64>,
    pub status: Option<String>,
    #[serde(default)]
    pub stops: Vec<StopPayload>,
    #[serde(default)]
    pub suggested_activities: Vec<SuggestedActivityPayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopPayload {
    pub city: CityRef,
    pub arrival_date: Option<String>,
    pub departure_date: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub activities: Vec<ActivityPayload>,
}

/// Clients send either a bare city name or the full geocoded descriptor.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CityRef {
    Name(String),
    Detailed {
        name: String,
        country: Option<String>,
        lat: Option<f64>,
        lng: Option<f64>,
    },
}

impl CityRef {
    pub fn name(&self) -> &str {
        match self {
            CityRef::Name(name) => name,
            CityRef::Detailed { name, .. } => name,
        }
    }

    pub fn country(&self) -> Option<&str> {
        match self {
            CityRef::Name(_) => None,
            CityRef::Detailed { country, .. } => country.as_deref(),
        }
    }

    pub fn lat(&self) -> Option<f64> {
        match self {
            CityRef::Name(_) => None,
            CityRef::Detailed { lat, .. } => *lat,
        }
    }

    pub fn lng(&self) -> Option<f64> {
        match self {
            CityRef::Name(_) => None,
            CityRef::Detailed { lng, .. } => *lng,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub cost: Option<f64>,
    pub icon: Option<String>,
    pub location: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedActivityPayload {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub cost: Option<f64>,
    pub icon: Option<String>,
    pub location: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePayload {
    pub category: Option<String>,
    pub description: Option<String>,
    pub amount: f64,
    pub spent_at: Option<String>,
}

/// Accepts `YYYY-MM-DD` or a full timestamp and keeps only the calendar day.
pub fn normalize_date(raw: &str) -> Result<NaiveDate, AppError> {
    let trimmed = raw.trim();
    let day = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|_| AppError::BadRequest(format!("invalid date: {raw}")))
}

pub fn normalize_optional_date(raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    raw.map(normalize_date).transpose()
}
