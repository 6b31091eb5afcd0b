use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use sqlx::{Sqlite, Transaction};

use crate::{
    db::DbPool,
    error::AppError,
    models::trip::{
        normalize_optional_date, Activity, ActivityPayload, BudgetBreakdown, Expense,
        ExpensePayload, Stop, StopDetail, StopPayload, SuggestedActivity, Trip, TripDetail,
        TripPayload,
    },
};

/// All trip persistence lives here. Handlers stay thin; every method is scoped
/// to the owning user so a foreign id behaves exactly like a missing one.
#[derive(Clone)]
pub struct TripStore {
    db: DbPool,
}

impl TripStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn list_trips(&self, user_id: i64) -> Result<Vec<TripDetail>, AppError> {
        let trips = sqlx::query_as::<_, Trip>(
            "SELECT * FROM trips WHERE user_id = ?1
             ORDER BY start_date IS NULL, start_date DESC, created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        let mut details = Vec::with_capacity(trips.len());
        for trip in trips {
            details.push(self.load_detail(trip).await?);
        }
        Ok(details)
    }

    pub async fn fetch_trip(&self, user_id: i64, trip_id: i64) -> Result<TripDetail, AppError> {
        let trip = self.owned_trip(user_id, trip_id).await?;
        self.load_detail(trip).await
    }

    /// Inserts the trip and its whole stop/activity tree in one transaction.
    /// Validation happens before the first write so a bad stop leaves no row.
    pub async fn create_trip(
        &self,
        user_id: i64,
        payload: &TripPayload,
    ) -> Result<TripDetail, AppError> {
        let stop_dates = validate_stop_dates(&payload.stops)?;
        let start_date = normalize_optional_date(payload.start_date.as_deref())?;
        let end_date = normalize_optional_date(payload.end_date.as_deref())?;

        let mut tx = self.db.begin().await?;
        let trip_id = sqlx::query(
            "INSERT INTO trips (user_id, name, destination, start_date, end_date, budget, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(user_id)
        .bind(payload.name.trim())
        .bind(payload.destination.as_deref())
        .bind(start_date)
        .bind(end_date)
        .bind(payload.budget)
        .bind(payload.status.as_deref().unwrap_or("planning"))
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        insert_itinerary(&mut tx, trip_id, &payload.stops, &stop_dates).await?;
        insert_suggestions(&mut tx, trip_id, payload).await?;
        tx.commit().await?;

        self.fetch_trip(user_id, trip_id).await
    }

    /// Wholesale itinerary replace: scalars updated, stops deleted (cascade
    /// clears activities), tree re-inserted. Stops absent from the payload are
    /// gone for good and all stop/activity ids change.
    pub async fn replace_trip(
        &self,
        user_id: i64,
        trip_id: i64,
        payload: &TripPayload,
    ) -> Result<TripDetail, AppError> {
        self.owned_trip(user_id, trip_id).await?;
        let stop_dates = validate_stop_dates(&payload.stops)?;
        let start_date = normalize_optional_date(payload.start_date.as_deref())?;
        let end_date = normalize_optional_date(payload.end_date.as_deref())?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "UPDATE trips SET name = ?1, destination = ?2, start_date = ?3, end_date = ?4,
             budget = ?5, status = COALESCE(?6, status) WHERE id = ?7",
        )
        .bind(payload.name.trim())
        .bind(payload.destination.as_deref())
        .bind(start_date)
        .bind(end_date)
        .bind(payload.budget)
        .bind(payload.status.as_deref())
        .bind(trip_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM stops WHERE trip_id = ?1")
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM suggested_activities WHERE trip_id = ?1")
            .bind(trip_id)
            .execute(&mut *tx)
            .await?;

        insert_itinerary(&mut tx, trip_id, &payload.stops, &stop_dates).await?;
        insert_suggestions(&mut tx, trip_id, payload).await?;
        tx.commit().await?;

        self.fetch_trip(user_id, trip_id).await
    }

    pub async fn update_budget(
        &self,
        user_id: i64,
        trip_id: i64,
        budget: f64,
    ) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE trips SET budget = ?1 WHERE id = ?2 AND user_id = ?3")
            .bind(budget)
            .bind(trip_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn delete_trip(&self, user_id: i64, trip_id: i64) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM trips WHERE id = ?1 AND user_id = ?2")
            .bind(trip_id)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn add_stop(
        &self,
        user_id: i64,
        trip_id: i64,
        payload: &StopPayload,
    ) -> Result<Stop, AppError> {
        self.owned_trip(user_id, trip_id).await?;
        let (arrival, departure) = require_stop_dates(payload)?;

        let order_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM stops WHERE trip_id = ?1",
        )
        .bind(trip_id)
        .fetch_one(&self.db)
        .await?;

        let stop_id = sqlx::query(
            "INSERT INTO stops (trip_id, city_name, city_country, lat, lng, arrival_date, departure_date, order_index, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(trip_id)
        .bind(payload.city.name())
        .bind(payload.city.country())
        .bind(payload.city.lat())
        .bind(payload.city.lng())
        .bind(arrival)
        .bind(departure)
        .bind(order_index)
        .bind(payload.notes.as_deref())
        .execute(&self.db)
        .await?
        .last_insert_rowid();

        let stop = sqlx::query_as::<_, Stop>("SELECT * FROM stops WHERE id = ?1")
            .bind(stop_id)
            .fetch_one(&self.db)
            .await?;
        Ok(stop)
    }

    pub async fn delete_stop(&self, user_id: i64, stop_id: i64) -> Result<(), AppError> {
        let result = sqlx::query(
            "DELETE FROM stops WHERE id = ?1
             AND trip_id IN (SELECT id FROM trips WHERE user_id = ?2)",
        )
        .bind(stop_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    pub async fn add_activity(
        &self,
        user_id: i64,
        stop_id: i64,
        payload: &ActivityPayload,
    ) -> Result<Activity, AppError> {
        // Ownership walks activity's stop up to the trip's user.
        let owned: Option<i64> = sqlx::query_scalar(
            "SELECT s.id FROM stops s JOIN trips t ON t.id = s.trip_id
             WHERE s.id = ?1 AND t.user_id = ?2",
        )
        .bind(stop_id)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        if owned.is_none() {
            return Err(AppError::NotFound);
        }

        let order_index: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(order_index) + 1, 0) FROM activities WHERE stop_id = ?1",
        )
        .bind(stop_id)
        .fetch_one(&self.db)
        .await?;

        let date = normalize_optional_date(payload.date.as_deref())?;
        let activity_id = sqlx::query(
            "INSERT INTO activities (stop_id, name, type, cost, icon, location, date, time, notes, is_custom, order_index)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(stop_id)
        .bind(payload.name.trim())
        .bind(payload.kind.as_deref())
        .bind(payload.cost.unwrap_or(0.0))
        .bind(payload.icon.as_deref())
        .bind(payload.location.as_deref())
        .bind(date)
        .bind(payload.time.as_deref())
        .bind(payload.notes.as_deref())
        .bind(payload.is_custom)
        .bind(order_index)
        .execute(&self.db)
        .await?
        .last_insert_rowid();

        let activity = sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE id = ?1")
            .bind(activity_id)
            .fetch_one(&self.db)
            .await?;
        Ok(activity)
    }

    pub async fn delete_activity(&self, user_id: i64, activity_id: i64) -> Result<(), AppError> {
        let result = sqlx::query(
            "DELETE FROM activities WHERE id = ?1
             AND stop_id IN (SELECT s.id FROM stops s JOIN trips t ON t.id = s.trip_id WHERE t.user_id = ?2)",
        )
        .bind(activity_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    /// Read-side aggregation, recomputed on every call.
    pub async fn budget_breakdown(
        &self,
        user_id: i64,
        trip_id: i64,
    ) -> Result<BudgetBreakdown, AppError> {
        let trip = self.owned_trip(user_id, trip_id).await?;

        let activity_cost_total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(a.cost), 0.0) FROM activities a
             JOIN stops s ON s.id = a.stop_id WHERE s.trip_id = ?1",
        )
        .bind(trip_id)
        .fetch_one(&self.db)
        .await?;

        let expense_total: f64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(amount), 0.0) FROM expenses WHERE trip_id = ?1")
                .bind(trip_id)
                .fetch_one(&self.db)
                .await?;

        let expenses = self.list_expenses_unchecked(trip_id).await?;

        Ok(BudgetBreakdown {
            trip_id,
            budget: trip.budget,
            activity_cost_total,
            expense_total,
            expenses,
        })
    }

    pub async fn add_expense(
        &self,
        user_id: i64,
        trip_id: i64,
        payload: &ExpensePayload,
    ) -> Result<Expense, AppError> {
        self.owned_trip(user_id, trip_id).await?;
        let spent_at = normalize_optional_date(payload.spent_at.as_deref())?;

        let expense_id = sqlx::query(
            "INSERT INTO expenses (trip_id, category, description, amount, spent_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(trip_id)
        .bind(payload.category.as_deref())
        .bind(payload.description.as_deref())
        .bind(payload.amount)
        .bind(spent_at)
        .execute(&self.db)
        .await?
        .last_insert_rowid();

        let expense = sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE id = ?1")
            .bind(expense_id)
            .fetch_one(&self.db)
            .await?;
        Ok(expense)
    }

    pub async fn list_expenses(
        &self,
        user_id: i64,
        trip_id: i64,
    ) -> Result<Vec<Expense>, AppError> {
        self.owned_trip(user_id, trip_id).await?;
        self.list_expenses_unchecked(trip_id).await
    }

    async fn list_expenses_unchecked(&self, trip_id: i64) -> Result<Vec<Expense>, AppError> {
        let expenses =
            sqlx::query_as::<_, Expense>("SELECT * FROM expenses WHERE trip_id = ?1 ORDER BY id")
                .bind(trip_id)
                .fetch_all(&self.db)
                .await?;
        Ok(expenses)
    }

    async fn owned_trip(&self, user_id: i64, trip_id: i64) -> Result<Trip, AppError> {
        sqlx::query_as::<_, Trip>("SELECT * FROM trips WHERE id = ?1 AND user_id = ?2")
            .bind(trip_id)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// One pass over stops, one join over activities, grouped in memory.
    async fn load_detail(&self, trip: Trip) -> Result<TripDetail, AppError> {
        let stops = sqlx::query_as::<_, Stop>(
            "SELECT * FROM stops WHERE trip_id = ?1 ORDER BY order_index",
        )
        .bind(trip.id)
        .fetch_all(&self.db)
        .await?;

        let activities = sqlx::query_as::<_, Activity>(
            "SELECT a.* FROM activities a JOIN stops s ON s.id = a.stop_id
             WHERE s.trip_id = ?1 ORDER BY s.order_index, a.order_index",
        )
        .bind(trip.id)
        .fetch_all(&self.db)
        .await?;

        let mut grouped: HashMap<i64, Vec<Activity>> = HashMap::new();
        for activity in activities {
            grouped.entry(activity.stop_id).or_default().push(activity);
        }

        let stops = stops
            .into_iter()
            .map(|stop| {
                let activities = grouped.remove(&stop.id).unwrap_or_default();
                StopDetail { stop, activities }
            })
            .collect();

        let suggested_activities = sqlx::query_as::<_, SuggestedActivity>(
            "SELECT * FROM suggested_activities WHERE trip_id = ?1 ORDER BY id",
        )
        .bind(trip.id)
        .fetch_all(&self.db)
        .await?;

        Ok(TripDetail {
            trip,
            stops,
            suggested_activities,
        })
    }
}

/// Every stop needs both dates before anything is written.
fn validate_stop_dates(stops: &[StopPayload]) -> Result<Vec<(NaiveDate, NaiveDate)>, AppError> {
    stops.iter().map(require_stop_dates).collect()
}

fn require_stop_dates(stop: &StopPayload) -> Result<(NaiveDate, NaiveDate), AppError> {
    let arrival = normalize_optional_date(stop.arrival_date.as_deref())?.ok_or_else(|| {
        AppError::BadRequest(format!(
            "stop {} is missing its arrival date",
            stop.city.name()
        ))
    })?;
    let departure = normalize_optional_date(stop.departure_date.as_deref())?.ok_or_else(|| {
        AppError::BadRequest(format!(
            "stop {} is missing its departure date",
            stop.city.name()
        ))
    })?;
    Ok((arrival, departure))
}

async fn insert_itinerary(
    tx: &mut Transaction<'_, Sqlite>,
    trip_id: i64,
    stops: &[StopPayload],
    stop_dates: &[(NaiveDate, NaiveDate)],
) -> Result<(), AppError> {
    for (stop_index, (stop, (arrival, departure))) in
        stops.iter().zip(stop_dates.iter()).enumerate()
    {
        let stop_id = sqlx::query(
            "INSERT INTO stops (trip_id, city_name, city_country, lat, lng, arrival_date, departure_date, order_index, notes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(trip_id)
        .bind(stop.city.name())
        .bind(stop.city.country())
        .bind(stop.city.lat())
        .bind(stop.city.lng())
        .bind(arrival)
        .bind(departure)
        .bind(stop_index as i64)
        .bind(stop.notes.as_deref())
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

        for (activity_index, activity) in stop.activities.iter().enumerate() {
            let date = normalize_optional_date(activity.date.as_deref())?;
            sqlx::query(
                "INSERT INTO activities (stop_id, name, type, cost, icon, location, date, time, notes, is_custom, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(stop_id)
            .bind(activity.name.trim())
            .bind(activity.kind.as_deref())
            .bind(activity.cost.unwrap_or(0.0))
            .bind(activity.icon.as_deref())
            .bind(activity.location.as_deref())
            .bind(date)
            .bind(activity.time.as_deref())
            .bind(activity.notes.as_deref())
            .bind(activity.is_custom)
            .bind(activity_index as i64)
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

async fn insert_suggestions(
    tx: &mut Transaction<'_, Sqlite>,
    trip_id: i64,
    payload: &TripPayload,
) -> Result<(), AppError> {
    for suggestion in &payload.suggested_activities {
        sqlx::query(
            "INSERT INTO suggested_activities (trip_id, name, type, cost, icon, location, image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(trip_id)
        .bind(suggestion.name.trim())
        .bind(suggestion.kind.as_deref())
        .bind(suggestion.cost.unwrap_or(0.0))
        .bind(suggestion.icon.as_deref())
        .bind(suggestion.location.as_deref())
        .bind(suggestion.image.as_deref())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
