mod common;

use chrono::{DateTime, TimeDelta, Utc};
use common::{TestApp, bearer, create_project, register_and_login, setup_test_app};
use http::StatusCode;
use kogase_core::{
    DeviceRepository, EventRepository, SessionRepository,
    domain::{
        analytics::CohortPeriod,
        device::{Device, RegisterDevice},
        event::{Event, EventRecord},
        session::Session,
    },
};
use serde_json::Value;
use uuid::Uuid;

async fn seed_device(app: &TestApp, project_id: Uuid, identifier: &str, first_seen: DateTime<Utc>) -> Device {
    let report = RegisterDevice {
        project_id,
        identifier: identifier.to_string(),
        platform: "Android".into(),
        platform_version: "14".into(),
        app_version: "2.0.0".into(),
        client_ip: "198.51.100.1".into(),
    };
    let device = Device::first_sighting(&report, "SE".into(), first_seen);
    app.store
        .insert_with_install(&device, &Event::install(&device))
        .await
        .unwrap();
    device
}

async fn seed_closed_session(app: &TestApp, device: &Device, begin_at: DateTime<Utc>) {
    let mut session = Session::open(device.project_id, device.id, begin_at);
    session.close(begin_at + TimeDelta::seconds(60));
    SessionRepository::create(app.store.as_ref(), &session)
        .await
        .unwrap();
}

#[tokio::test]
async fn aggregate_counts_recent_sessions_and_installs() {
    let app = setup_test_app();
    let account = register_and_login(&app.server).await;
    let (project_id, _) = create_project(&app.server, &account, "Space Miner").await;
    let now = Utc::now();

    for i in 0..160 {
        let device = seed_device(&app, project_id, &format!("device-{i}"), now).await;
        let begin_at = match i {
            0..10 => now - TimeDelta::hours(23),
            10..60 => now - TimeDelta::days(25),
            _ => now - TimeDelta::days(40),
        };
        seed_closed_session(&app, &device, begin_at).await;
    }

    let (name, value) = bearer(&account.token);
    let response = app
        .server
        .get("/api/v1/analytics")
        .add_query_param("project_id", project_id)
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.json::<Value>();
    assert_eq!(body["dau"], 10);
    assert_eq!(body["mau"], 60);
    assert_eq!(body["total_duration"], 160 * 60_000_000_000_i64);
    assert_eq!(body["total_installs"], 160);
}

#[tokio::test]
async fn aggregate_is_limited_to_owned_projects() {
    let app = setup_test_app();
    let owner = register_and_login(&app.server).await;
    let stranger = register_and_login(&app.server).await;
    let (project_id, _) = create_project(&app.server, &owner, "Space Miner").await;
    let device = seed_device(&app, project_id, "abc", Utc::now()).await;
    seed_closed_session(&app, &device, Utc::now() - TimeDelta::hours(1)).await;

    let (name, value) = bearer(&stranger.token);
    let foreign = app
        .server
        .get("/api/v1/analytics")
        .add_query_param("project_id", project_id)
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(foreign.status_code(), StatusCode::FORBIDDEN);

    let missing = app
        .server
        .get("/api/v1/analytics")
        .add_query_param("project_id", Uuid::new_v4())
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

    // Without a project filter the stranger sees only their own (empty) data.
    let everything = app
        .server
        .get("/api/v1/analytics")
        .add_header(name, value)
        .await;
    assert_eq!(everything.status_code(), StatusCode::OK);
    let body = everything.json::<Value>();
    assert_eq!(body["dau"], 0);
    assert_eq!(body["total_installs"], 0);
}

#[tokio::test]
async fn retention_groups_devices_into_cohorts() {
    let app = setup_test_app();
    let account = register_and_login(&app.server).await;
    let (project_id, _) = create_project(&app.server, &account, "Space Miner").await;
    let first_seen = Utc::now() - TimeDelta::days(20);
    let cohort_end = CohortPeriod::Weekly.align(first_seen) + TimeDelta::days(7);

    let mut devices = Vec::new();
    for i in 0..4 {
        devices.push(seed_device(&app, project_id, &format!("player-{i}"), first_seen).await);
    }
    for device in devices.iter().take(2) {
        let record = EventRecord {
            identifier: device.identifier.clone(),
            event_type: "custom".into(),
            event_name: "level_up".into(),
            payloads: None,
            timestamp: Some(cohort_end + TimeDelta::hours(2)),
        };
        EventRepository::record(app.store.as_ref(), project_id, &record, Utc::now())
            .await
            .unwrap();
    }

    let (name, value) = bearer(&account.token);
    let response = app
        .server
        .get("/api/v1/analytics/retention")
        .add_query_param("project_id", project_id)
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.json::<Value>();
    assert_eq!(body["cohort_period"], "weekly");
    let cohorts = body["cohorts"].as_array().expect("cohorts");
    assert_eq!(cohorts.len(), 1);
    assert_eq!(cohorts[0]["new_users"], 4);
    assert_eq!(cohorts[0]["retention"][0]["day"], 0);
    assert_eq!(cohorts[0]["retention"][0]["percentage"], 100.0);
    assert_eq!(cohorts[0]["retention"][1]["day"], 1);
    assert_eq!(cohorts[0]["retention"][1]["users"], 2);
    assert_eq!(cohorts[0]["retention"][1]["percentage"], 50.0);

    let unknown_period = app
        .server
        .get("/api/v1/analytics/retention")
        .add_query_param("cohort_period", "hourly")
        .add_header(name, value)
        .await;
    assert_eq!(unknown_period.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn active_users_reports_series_and_current_figures() {
    let app = setup_test_app();
    let account = register_and_login(&app.server).await;
    let (project_id, _) = create_project(&app.server, &account, "Space Miner").await;
    let now = Utc::now();
    let device = seed_device(&app, project_id, "abc", now - TimeDelta::days(3)).await;

    let record = EventRecord {
        identifier: device.identifier.clone(),
        event_type: "custom".into(),
        event_name: "match_start".into(),
        payloads: None,
        timestamp: Some(now - TimeDelta::minutes(1)),
    };
    EventRepository::record(app.store.as_ref(), project_id, &record, now)
        .await
        .unwrap();

    let (name, value) = bearer(&account.token);
    let response = app
        .server
        .get("/api/v1/analytics/active-users")
        .add_query_param("project_id", project_id)
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.json::<Value>();
    let daily = body["daily_active_users"].as_array().expect("daily series");
    assert!(daily.len() >= 28);
    assert!(daily.iter().all(|d| d["date"].is_string() && d["count"].is_i64()));
    assert!(!body["monthly_active_users"].as_array().expect("monthly series").is_empty());
    assert_eq!(body["current"]["dau"], 1);
    assert_eq!(body["current"]["mau"], 1);
    assert_eq!(body["current"]["ratio"], 1.0);

    let other_platform = app
        .server
        .get("/api/v1/analytics/active-users")
        .add_query_param("project_id", project_id)
        .add_query_param("platform", "iOS")
        .add_header(name, value)
        .await;
    assert_eq!(other_platform.json::<Value>()["current"]["dau"], 0);
}

#[tokio::test]
async fn oversized_ranges_are_rejected() {
    let app = setup_test_app();
    let account = register_and_login(&app.server).await;
    let (project_id, _) = create_project(&app.server, &account, "Space Miner").await;

    let (name, value) = bearer(&account.token);
    let retention = app
        .server
        .get("/api/v1/analytics/retention")
        .add_query_param("project_id", project_id)
        .add_query_param("from", "1970-01-01T00:00:00Z")
        .add_query_param("cohort_period", "daily")
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(retention.status_code(), StatusCode::BAD_REQUEST);

    let active = app
        .server
        .get("/api/v1/analytics/active-users")
        .add_query_param("project_id", project_id)
        .add_query_param("from", "1970-01-01T00:00:00Z")
        .add_header(name, value)
        .await;
    assert_eq!(active.status_code(), StatusCode::BAD_REQUEST);
}
