use axum::{
    Extension, Json,
    extract::State,
};
use chrono::{DateTime, Months, Utc};
use kogase_core::domain::analytics::{
    ActiveUsers, AnalyticsSummary, CohortPeriod, CohortRetention, SummaryWindow, active_users,
    cohort_retention,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::authz::owned_scope;
use super::middleware::AuthenticatedUser;
use super::{ApiError, ApiQuery};
use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct AnalyticsQuery {
    pub project_id: Option<Uuid>,
    #[serde(alias = "from_date")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "to_date")]
    pub to: Option<DateTime<Utc>>,
}

// GET /api/v1/analytics
pub async fn handle_aggregate(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiQuery(query): ApiQuery<AnalyticsQuery>,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let scope = owned_scope(state.projects.as_ref(), query.project_id, ctx.user_id).await?;
    let window = SummaryWindow {
        from: query.from,
        to: query.to,
        now: Utc::now(),
    };
    let summary = state.analytics.summary(&scope, &window).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize, Default)]
pub struct RetentionQuery {
    pub project_id: Option<Uuid>,
    #[serde(alias = "from_date")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "to_date")]
    pub to: Option<DateTime<Utc>>,
    pub cohort_period: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetentionResponse {
    pub cohort_period: CohortPeriod,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub cohorts: Vec<CohortRetention>,
}

// GET /api/v1/analytics/retention
pub async fn handle_retention(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiQuery(query): ApiQuery<RetentionQuery>,
) -> Result<Json<RetentionResponse>, ApiError> {
    let period = match query.cohort_period.as_deref().map(str::trim) {
        None | Some("") => CohortPeriod::Weekly,
        Some(raw) => raw.parse::<CohortPeriod>()?,
    };
    let now = Utc::now();
    let to = query.to.unwrap_or(now);
    let from = query
        .from
        .unwrap_or_else(|| now.checked_sub_months(Months::new(3)).unwrap_or(now));

    let scope = owned_scope(state.projects.as_ref(), query.project_id, ctx.user_id).await?;
    let cohorts = cohort_retention(state.analytics.as_ref(), &scope, from, to, period).await?;

    Ok(Json(RetentionResponse {
        cohort_period: period,
        from,
        to,
        cohorts,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct ActiveUsersQuery {
    pub project_id: Option<Uuid>,
    #[serde(alias = "from_date")]
    pub from: Option<DateTime<Utc>>,
    #[serde(alias = "to_date")]
    pub to: Option<DateTime<Utc>>,
    pub platform: Option<String>,
}

// GET /api/v1/analytics/active-users
pub async fn handle_active_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthenticatedUser>,
    ApiQuery(query): ApiQuery<ActiveUsersQuery>,
) -> Result<Json<ActiveUsers>, ApiError> {
    let now = Utc::now();
    let to = query.to.unwrap_or(now);
    let from = query
        .from
        .unwrap_or_else(|| now.checked_sub_months(Months::new(1)).unwrap_or(now));
    let platform = query
        .platform
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());

    let scope = owned_scope(state.projects.as_ref(), query.project_id, ctx.user_id).await?;
    let series = active_users(state.analytics.as_ref(), &scope, from, to, platform, now).await?;
    Ok(Json(series))
}
