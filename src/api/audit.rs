//! Audit trail helpers and the admin audit log endpoint.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, Query, State},
    http::{request::Parts, HeaderMap},
    Json,
};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use super::auth::AdminUser;
use super::error::ApiError;
use super::rate_limit::client_ip;
use crate::db::{list_audit_logs, log_audit, AuditEntry, AuditLogListResponse, AuditLogQuery};
use crate::AppState;

/// Caller IP for audit entries, resolved like the rate limiter resolves it
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let conn = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(ClientIp(extract_client_ip(
            &parts.headers,
            conn.as_ref(),
            state.config.rate_limit.trust_proxy_headers,
        )))
    }
}

pub fn extract_client_ip(
    headers: &HeaderMap,
    conn_info: Option<&SocketAddr>,
    trust_proxy: bool,
) -> Option<String> {
    client_ip(headers, conn_info, trust_proxy).map(|ip| ip.to_string())
}

/// Record an audit entry. Failures are logged and never fail the request.
pub async fn audit_log(state: &AppState, entry: AuditEntry<'_>) {
    let action = entry.action;
    let resource_type = entry.resource_type;
    if let Err(e) = log_audit(&state.db, entry).await {
        tracing::warn!(
            action = action,
            resource_type = resource_type,
            error = %e,
            "Failed to create audit log entry"
        );
    }
}

/// GET /api/admin/audit
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogListResponse>, ApiError> {
    let result = list_audit_logs(&state.db, &query).await?;
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_uses_socket_unless_proxy_trusted() {
        let addr: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(extract_client_ip(&headers, Some(&addr), false).as_deref(), Some("10.0.0.9"));

        headers.insert("x-real-ip", "172.16.0.2".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, Some(&addr), false).as_deref(), Some("10.0.0.9"));
        assert_eq!(extract_client_ip(&headers, Some(&addr), true).as_deref(), Some("172.16.0.2"));

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, None, true).as_deref(), Some("203.0.113.7"));
        assert_eq!(extract_client_ip(&headers, None, false), None);
    }

    #[test]
    fn test_client_ip_missing() {
        assert_eq!(extract_client_ip(&HeaderMap::new(), None, true), None);
    }
}
