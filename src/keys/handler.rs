use super::KeyRegistry;
use crate::auth::{require_any_role, Principal};
use crate::error::{GatewayError, Result};
use crate::plan::PricingPlan;
use axum::{
    extract::{Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    Extension,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// State for the key issuance endpoint
#[derive(Clone)]
pub struct KeyEndpointState {
    pub registry: KeyRegistry,
    pub privileged_roles: Arc<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct IssueKeyParams {
    /// `FREE`, `BASIC` or `PRO`
    pub plan: String,
}

/// `GET /key?plan=PRO`: issue a key and return it once as plain text.
///
/// The role check runs before the query is looked at, so anonymous callers get
/// 401 whatever the query string holds.
pub async fn issue_key_handler(
    State(state): State<KeyEndpointState>,
    principal: Option<Extension<Principal>>,
    params: Option<Query<IssueKeyParams>>,
) -> Result<impl IntoResponse> {
    let principal = principal.map(|Extension(p)| p);
    require_any_role(principal.as_ref(), &state.privileged_roles)?;

    let Some(Query(params)) = params else {
        return Err(GatewayError::InvalidPlan("missing plan parameter".to_string()));
    };
    let plan: PricingPlan = params.plan.parse()?;
    info!(plan = %plan, "Generating key");

    let issued = state.registry.issue(plan).await?;

    Ok((
        StatusCode::CREATED,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        issued.raw_key,
    ))
}
