use std::{collections::HashMap, fmt, fs::File, net::SocketAddr};

use anyhow::Context;
use axum::extract::FromRequestParts;
use cucumber::{given, then, when, World as _};
use globetrotter::{
    auth::{self, AuthUser},
    config::AppConfig,
    db::init_pool,
    error::AppError,
    models::trip::{
        ActivityPayload, CityRef, ExpensePayload, StopPayload, SuggestedActivityPayload,
        TripDetail, TripPayload,
    },
    models::user::User,
    state::AppState,
};
use tempfile::TempDir;

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    users: HashMap<String, User>,
    owner_email: Option<String>,
    trips: HashMap<String, i64>,
    last_error: Option<AppError>,
    reset_token: Option<String>,
}

impl AppWorld {
    fn app_state(&self) -> &AppState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
            .app()
    }

    fn owner(&self) -> &User {
        let email = self
            .owner_email
            .as_ref()
            .expect("a user must be registered first");
        &self.users[email]
    }

    fn trip_id(&self, name: &str) -> i64 {
        *self
            .trips
            .get(name)
            .unwrap_or_else(|| panic!("unknown trip {name}"))
    }

    async fn fetch(&self, name: &str) -> TripDetail {
        self.app_state()
            .trips
            .fetch_trip(self.owner().id, self.trip_id(name))
            .await
            .expect("fetch trip")
    }
}

struct TestState {
    app: AppState,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: "bdd-jwt-secret".into(),
            token_ttl_hours: 1,
        };

        let db = init_pool(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let app = AppState::new(config, db);
        Ok(Self { app, _root: root })
    }

    fn app(&self) -> &AppState {
        &self.app
    }
}

fn stop_payload(city: &str) -> StopPayload {
    StopPayload {
        city: CityRef::Name(city.to_string()),
        arrival_date: Some("2026-03-01".into()),
        departure_date: Some("2026-03-03".into()),
        notes: None,
        activities: Vec::new(),
    }
}

fn trip_payload(name: &str, stops: Vec<StopPayload>) -> TripPayload {
    TripPayload {
        name: name.to_string(),
        destination: None,
        start_date: None,
        end_date: None,
        budget: None,
        status: None,
        stops,
        suggested_activities: Vec::new(),
    }
}

fn activity_payload(name: &str, cost: f64) -> ActivityPayload {
    ActivityPayload {
        name: name.to_string(),
        kind: None,
        cost: Some(cost),
        icon: None,
        location: None,
        date: None,
        time: None,
        notes: None,
        is_custom: false,
    }
}

fn request_parts(auth_header: Option<String>) -> axum::http::request::Parts {
    let mut builder = axum::http::Request::builder().uri("/api/trips");
    if let Some(value) = auth_header {
        builder = builder.header(axum::http::header::AUTHORIZATION, value);
    }
    builder.body(()).expect("request").into_parts().0
}

async fn try_register(world: &mut AppWorld, name: String, email: String, password: String) {
    match auth::register_user(world.app_state(), &name, &email, &password).await {
        Ok(user) => {
            world.users.insert(email.clone(), user);
            world.owner_email.get_or_insert(email);
        }
        Err(err) => world.last_error = Some(err),
    }
}

async fn create_named_trip(world: &mut AppWorld, name: &str, payload: &TripPayload) {
    let owner_id = world.owner().id;
    let detail = world
        .app_state()
        .trips
        .create_trip(owner_id, payload)
        .await
        .expect("create trip");
    world.trips.insert(name.to_string(), detail.trip.id);
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.users.clear();
    world.owner_email = None;
    world.trips.clear();
    world.last_error = None;
    world.reset_token = None;
}

#[given(regex = r#"^a registered user "([^"]+)" with email "([^"]+)" and password "([^"]+)"$"#)]
async fn given_registered_user(world: &mut AppWorld, name: String, email: String, password: String) {
    try_register(world, name, email.clone(), password).await;
    assert!(
        world.users.contains_key(&email),
        "registration failed: {:?}",
        world.last_error
    );
}

#[when(regex = r#"^I register "([^"]+)" with email "([^"]+)" and password "([^"]+)"$"#)]
async fn when_register(world: &mut AppWorld, name: String, email: String, password: String) {
    try_register(world, name, email, password).await;
}

#[then(regex = r#"^I can log in as "([^"]+)" with password "([^"]+)"$"#)]
async fn then_can_login(world: &mut AppWorld, email: String, password: String) {
    let user = auth::authenticate_user(world.app_state(), &email, &password)
        .await
        .expect("authentication");
    assert_eq!(user.email, email);
}

#[then(regex = r#"^logging in as "([^"]+)" with password "([^"]+)" is rejected$"#)]
async fn then_login_rejected(world: &mut AppWorld, email: String, password: String) {
    let result = auth::authenticate_user(world.app_state(), &email, &password).await;
    assert!(matches!(result, Err(AppError::Unauthorized(_))));
}

#[then(regex = r#"^a token issued for "([^"]+)" passes verification$"#)]
async fn then_token_verifies(world: &mut AppWorld, email: String) {
    let user = &world.users[&email];
    let config = &world.app_state().config;
    let token = auth::issue_token(config, user).expect("issue token");
    let claims = auth::verify_token(config, &token).expect("verify token");
    assert_eq!(claims.sub, user.id);
    assert_eq!(claims.email, user.email);
}

#[then(regex = r#"^an expired token for "([^"]+)" is rejected as expired$"#)]
async fn then_expired_token_rejected(world: &mut AppWorld, email: String) {
    let user = &world.users[&email];
    let mut config = world.app_state().config.clone();
    config.token_ttl_hours = -2;
    let token = auth::issue_token(&config, user).expect("issue token");
    let result = auth::verify_token(&config, &token);
    assert!(matches!(result, Err(AppError::Unauthorized("expired token"))));
}

#[then("a request without authorization is rejected as missing a token")]
async fn then_missing_header_rejected(world: &mut AppWorld) {
    let mut parts = request_parts(None);
    let result = AuthUser::from_request_parts(&mut parts, world.app_state()).await;
    assert!(matches!(result, Err(AppError::Unauthorized("missing token"))));
}

#[then(regex = r#"^a request with authorization "([^"]+)" is rejected as invalid$"#)]
async fn then_non_bearer_rejected(world: &mut AppWorld, header_value: String) {
    let mut parts = request_parts(Some(header_value));
    let result = AuthUser::from_request_parts(&mut parts, world.app_state()).await;
    assert!(matches!(result, Err(AppError::Unauthorized("invalid token"))));
}

#[when(regex = r#"^the account "([^"]+)" is deactivated$"#)]
async fn when_account_deactivated(world: &mut AppWorld, email: String) {
    sqlx::query("UPDATE users SET is_active = 0 WHERE email = ?1")
        .bind(&email)
        .execute(&world.app_state().db)
        .await
        .expect("deactivate account");
}

#[then(regex = r#"^a request bearing a token for "([^"]+)" is forbidden$"#)]
async fn then_bearer_request_forbidden(world: &mut AppWorld, email: String) {
    let state = world.app_state();
    let token = auth::issue_token(&state.config, &world.users[&email]).expect("issue token");
    let mut parts = request_parts(Some(format!("Bearer {token}")));
    let result = AuthUser::from_request_parts(&mut parts, state).await;
    assert!(matches!(result, Err(AppError::Forbidden)));
}

#[then(regex = r#"^logging in as "([^"]+)" with password "([^"]+)" is forbidden$"#)]
async fn then_login_forbidden(world: &mut AppWorld, email: String, password: String) {
    let result = auth::authenticate_user(world.app_state(), &email, &password).await;
    assert!(matches!(result, Err(AppError::Forbidden)));
}

#[then("the registration fails with a bad request")]
async fn then_registration_fails(world: &mut AppWorld) {
    assert!(matches!(world.last_error, Some(AppError::BadRequest(_))));
}

#[when(regex = r#"^I request a password reset for "([^"]+)"$"#)]
async fn when_request_reset(world: &mut AppWorld, email: String) {
    let token = auth::create_password_reset(world.app_state(), &email)
        .await
        .expect("create reset token");
    world.reset_token = Some(token);
}

#[when(regex = r#"^I reset the password using that token to "([^"]+)"$"#)]
async fn when_reset_password(world: &mut AppWorld, password: String) {
    let token = world.reset_token.clone().expect("a reset token was issued");
    auth::reset_password(world.app_state(), &token, &password)
        .await
        .expect("reset password");
}

#[when(
    regex = r#"^I create a trip "([^"]+)" with a stop in "([^"]+)" arriving "([^"]+)" departing "([^"]+)" and an activity "([^"]+)" costing (\d+)$"#
)]
async fn when_create_nested_trip(
    world: &mut AppWorld,
    name: String,
    city: String,
    arrival: String,
    departure: String,
    activity: String,
    cost: f64,
) {
    let mut stop = stop_payload(&city);
    stop.arrival_date = Some(arrival);
    stop.departure_date = Some(departure);
    stop.activities.push(activity_payload(&activity, cost));
    let payload = trip_payload(&name, vec![stop]);
    create_named_trip(world, &name, &payload).await;
}

#[when(regex = r#"^I try to create a trip "([^"]+)" with a stop in "([^"]+)" missing its dates$"#)]
async fn when_create_trip_missing_dates(world: &mut AppWorld, name: String, city: String) {
    let mut stop = stop_payload(&city);
    stop.arrival_date = None;
    stop.departure_date = None;
    let payload = trip_payload(&name, vec![stop]);
    let owner_id = world.owner().id;
    match world.app_state().trips.create_trip(owner_id, &payload).await {
        Ok(_) => panic!("trip creation should have failed"),
        Err(err) => world.last_error = Some(err),
    }
}

#[when(regex = r#"^I create a trip "([^"]+)" with suggested activity "([^"]+)" costing (\d+)$"#)]
async fn when_create_trip_with_suggestion(
    world: &mut AppWorld,
    name: String,
    suggestion: String,
    cost: f64,
) {
    let mut payload = trip_payload(&name, Vec::new());
    payload.suggested_activities.push(SuggestedActivityPayload {
        name: suggestion,
        kind: None,
        cost: Some(cost),
        icon: None,
        location: None,
        image: None,
    });
    create_named_trip(world, &name, &payload).await;
}

#[given(regex = r#"^a trip "([^"]+)" with stops "([^"]+)"$"#)]
async fn given_trip_with_stops(world: &mut AppWorld, name: String, cities: String) {
    let stops = cities.split(", ").map(stop_payload).collect();
    let payload = trip_payload(&name, stops);
    create_named_trip(world, &name, &payload).await;
}

#[when(regex = r#"^I replace the itinerary of "([^"]+)" with stops "([^"]+)"$"#)]
async fn when_replace_itinerary(world: &mut AppWorld, name: String, cities: String) {
    let stops = cities.split(", ").map(stop_payload).collect();
    let payload = trip_payload(&name, stops);
    let owner_id = world.owner().id;
    let trip_id = world.trip_id(&name);
    world
        .app_state()
        .trips
        .replace_trip(owner_id, trip_id, &payload)
        .await
        .expect("replace trip");
}

#[when(regex = r#"^I delete the trip "([^"]+)"$"#)]
async fn when_delete_trip(world: &mut AppWorld, name: String) {
    let owner_id = world.owner().id;
    let trip_id = world.trip_id(&name);
    world
        .app_state()
        .trips
        .delete_trip(owner_id, trip_id)
        .await
        .expect("delete trip");
}

#[when(regex = r#"^I set the budget of "([^"]+)" to (\d+)$"#)]
async fn when_set_budget(world: &mut AppWorld, name: String, budget: f64) {
    let owner_id = world.owner().id;
    let trip_id = world.trip_id(&name);
    world
        .app_state()
        .trips
        .update_budget(owner_id, trip_id, budget)
        .await
        .expect("update budget");
}

#[when(regex = r#"^I add an activity "([^"]+)" costing (\d+) to stop (\d+) of "([^"]+)"$"#)]
async fn when_add_activity(
    world: &mut AppWorld,
    activity: String,
    cost: f64,
    stop_number: usize,
    name: String,
) {
    let detail = world.fetch(&name).await;
    let stop_id = detail.stops[stop_number - 1].stop.id;
    let owner_id = world.owner().id;
    world
        .app_state()
        .trips
        .add_activity(owner_id, stop_id, &activity_payload(&activity, cost))
        .await
        .expect("add activity");
}

#[when(regex = r#"^I record an expense of (\d+) for "([^"]+)" on "([^"]+)"$"#)]
async fn when_record_expense(world: &mut AppWorld, amount: f64, category: String, name: String) {
    let owner_id = world.owner().id;
    let trip_id = world.trip_id(&name);
    let payload = ExpensePayload {
        category: Some(category),
        description: None,
        amount,
        spent_at: None,
    };
    world
        .app_state()
        .trips
        .add_expense(owner_id, trip_id, &payload)
        .await
        .expect("add expense");
}

#[when(regex = r#"^I remove stop (\d+) of "([^"]+)"$"#)]
async fn when_remove_stop(world: &mut AppWorld, stop_number: usize, name: String) {
    let detail = world.fetch(&name).await;
    let stop_id = detail.stops[stop_number - 1].stop.id;
    let owner_id = world.owner().id;
    world
        .app_state()
        .trips
        .delete_stop(owner_id, stop_id)
        .await
        .expect("delete stop");
}

#[then(regex = r#"^the trip "([^"]+)" has (\d+) stops$"#)]
async fn then_trip_has_stops(world: &mut AppWorld, name: String, expected: usize) {
    let detail = world.fetch(&name).await;
    assert_eq!(detail.stops.len(), expected);
}

#[then(regex = r#"^stop (\d+) of "([^"]+)" is "([^"]+)" with (\d+) activities$"#)]
async fn then_stop_matches(
    world: &mut AppWorld,
    stop_number: usize,
    name: String,
    city: String,
    activity_count: usize,
) {
    let detail = world.fetch(&name).await;
    let stop = &detail.stops[stop_number - 1];
    assert_eq!(stop.stop.city_name, city);
    assert_eq!(stop.stop.order_index, (stop_number - 1) as i64);
    assert_eq!(stop.activities.len(), activity_count);
}

#[then(regex = r#"^activity "([^"]+)" in "([^"]+)" costs (\d+)$"#)]
async fn then_activity_costs(world: &mut AppWorld, activity: String, name: String, cost: f64) {
    let detail = world.fetch(&name).await;
    let found = detail
        .stops
        .iter()
        .flat_map(|stop| stop.activities.iter())
        .find(|item| item.name == activity)
        .unwrap_or_else(|| panic!("activity {activity} not found"));
    assert_eq!(found.cost, cost);
}

#[then("the trip creation fails with a bad request")]
async fn then_creation_fails(world: &mut AppWorld) {
    assert!(matches!(world.last_error, Some(AppError::BadRequest(_))));
}

#[then(regex = r#"^the user has (\d+) trips$"#)]
async fn then_user_has_trips(world: &mut AppWorld, expected: usize) {
    let owner_id = world.owner().id;
    let trips = world
        .app_state()
        .trips
        .list_trips(owner_id)
        .await
        .expect("list trips");
    assert_eq!(trips.len(), expected);
}

#[then(regex = r#"^the stops of "([^"]+)" are ordered "([^"]+)"$"#)]
async fn then_stops_ordered(world: &mut AppWorld, name: String, cities: String) {
    let detail = world.fetch(&name).await;
    let actual: Vec<&str> = detail
        .stops
        .iter()
        .map(|stop| stop.stop.city_name.as_str())
        .collect();
    let expected: Vec<&str> = cities.split(", ").collect();
    assert_eq!(actual, expected);
}

#[then(regex = r#"^fetching "([^"]+)" twice yields identical JSON$"#)]
async fn then_fetch_idempotent(world: &mut AppWorld, name: String) {
    let first = serde_json::to_string(&world.fetch(&name).await).expect("serialize");
    let second = serde_json::to_string(&world.fetch(&name).await).expect("serialize");
    assert_eq!(first, second);
}

#[then("no stops or activities remain in the database")]
async fn then_no_orphans(world: &mut AppWorld) {
    let db = &world.app_state().db;
    let stops: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stops")
        .fetch_one(db)
        .await
        .expect("count stops");
    let activities: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM activities")
        .fetch_one(db)
        .await
        .expect("count activities");
    assert_eq!(stops, 0);
    assert_eq!(activities, 0);
}

#[then(regex = r#"^the trip "([^"]+)" has budget (\d+)$"#)]
async fn then_trip_has_budget(world: &mut AppWorld, name: String, budget: f64) {
    let detail = world.fetch(&name).await;
    assert_eq!(detail.trip.budget, Some(budget));
}

#[then(regex = r#"^the trip "([^"]+)" has (\d+) suggested activities$"#)]
async fn then_trip_has_suggestions(world: &mut AppWorld, name: String, expected: usize) {
    let detail = world.fetch(&name).await;
    assert_eq!(detail.suggested_activities.len(), expected);
}

#[then(
    regex = r#"^the budget breakdown of "([^"]+)" shows activity total (\d+) and expense total (\d+)$"#
)]
async fn then_budget_breakdown(
    world: &mut AppWorld,
    name: String,
    activity_total: f64,
    expense_total: f64,
) {
    let owner_id = world.owner().id;
    let trip_id = world.trip_id(&name);
    let breakdown = world
        .app_state()
        .trips
        .budget_breakdown(owner_id, trip_id)
        .await
        .expect("budget breakdown");
    assert_eq!(breakdown.activity_cost_total, activity_total);
    assert_eq!(breakdown.expense_total, expense_total);
}

#[then(regex = r#"^fetching "([^"]+)" as "([^"]+)" is not found$"#)]
async fn then_fetch_as_other_not_found(world: &mut AppWorld, name: String, email: String) {
    let other = &world.users[&email];
    let trip_id = world.trip_id(&name);
    let result = world.app_state().trips.fetch_trip(other.id, trip_id).await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[then(regex = r#"^replacing "([^"]+)" as "([^"]+)" is not found$"#)]
async fn then_replace_as_other_not_found(world: &mut AppWorld, name: String, email: String) {
    let other_id = world.users[&email].id;
    let trip_id = world.trip_id(&name);
    let payload = trip_payload(&name, vec![stop_payload("Lisbon")]);
    let result = world
        .app_state()
        .trips
        .replace_trip(other_id, trip_id, &payload)
        .await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[then(regex = r#"^deleting "([^"]+)" as "([^"]+)" is not found$"#)]
async fn then_delete_as_other_not_found(world: &mut AppWorld, name: String, email: String) {
    let other_id = world.users[&email].id;
    let trip_id = world.trip_id(&name);
    let result = world.app_state().trips.delete_trip(other_id, trip_id).await;
    assert!(matches!(result, Err(AppError::NotFound)));
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
