use axum::http::{HeaderMap, StatusCode, header};

/// Check the access token presented on an upgrade request, either as an
/// `Authorization: Bearer <t>` / `Token <t>` header or as an
/// `access_token` query parameter.
///
/// An empty configured token means open access. Absent credentials reject
/// with 401 and wrong credentials with 403, both before the upgrade, so no
/// connection object ever exists for a rejected request.
pub fn check_token(
    configured: &str,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<(), StatusCode> {
    if configured.is_empty() {
        return Ok(());
    }
    match header_token(headers).or(query_token) {
        None => Err(StatusCode::UNAUTHORIZED),
        Some(presented) if presented == configured => Ok(()),
        Some(_) => Err(StatusCode::FORBIDDEN),
    }
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("Token "))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, StatusCode};

    use super::check_token;

    fn headers_with_auth(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(value).unwrap_or(HeaderValue::from_static("")),
        );
        headers
    }

    #[test]
    fn empty_configured_token_is_open_access() {
        assert!(check_token("", &HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn missing_token_is_unauthorized() {
        assert_eq!(
            check_token("secret", &HeaderMap::new(), None),
            Err(StatusCode::UNAUTHORIZED)
        );
    }

    #[test]
    fn wrong_token_is_forbidden() {
        assert_eq!(
            check_token("secret", &headers_with_auth("Bearer nope"), None),
            Err(StatusCode::FORBIDDEN)
        );
        assert_eq!(
            check_token("secret", &HeaderMap::new(), Some("nope")),
            Err(StatusCode::FORBIDDEN)
        );
    }

    #[test]
    fn bearer_token_and_query_param_both_accepted() {
        assert!(check_token("secret", &headers_with_auth("Bearer secret"), None).is_ok());
        assert!(check_token("secret", &headers_with_auth("Token secret"), None).is_ok());
        assert!(check_token("secret", &HeaderMap::new(), Some("secret")).is_ok());
    }
}
