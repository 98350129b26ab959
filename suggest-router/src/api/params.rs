use crate::errors::SuggestRouterError;
use crate::request::{Location, SuggestionRequest};
use http::header::{ACCEPT_LANGUAGE, HeaderMap, HeaderName};
use std::collections::HashMap;
use url::form_urlencoded;

pub const GEO_COUNTRY: HeaderName = HeaderName::from_static("x-geo-country");
pub const GEO_REGION: HeaderName = HeaderName::from_static("x-geo-region");
pub const GEO_CITY: HeaderName = HeaderName::from_static("x-geo-city");

/// Builds a [`SuggestionRequest`] from the query string and headers of a
/// `GET /api/v1/suggest` call.
pub fn parse_suggest_request(
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<SuggestionRequest, SuggestRouterError> {
    let params: HashMap<String, String> = form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect();

    let q = params
        .get("q")
        .ok_or_else(|| SuggestRouterError::BadRequest("missing query parameter `q`".into()))?;

    let mut request = SuggestionRequest::new(q.as_str())
        .with_location(parse_location(headers))
        .with_languages(parse_accept_language(headers));

    if let Some(providers) = params.get("providers").map(|p| split_list(p))
        && !providers.is_empty()
    {
        request = request.with_providers(providers);
    }

    if let Some(variants) = params.get("client_variants") {
        request = request.with_client_variants(split_list(variants));
    }

    if let Some(request_id) = params.get("request_id") {
        request = request.with_request_id(request_id.as_str());
    }

    if let Some(session_id) = params.get("sid").filter(|sid| !sid.is_empty()) {
        request = request.with_session_id(session_id.as_str());
    }

    if let Some(limit) = params.get("limit") {
        let limit = limit
            .parse::<usize>()
            .map_err(|_| SuggestRouterError::BadRequest(format!("invalid limit `{limit}`")))?;
        request = request.with_limit(limit);
    }

    Ok(request)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn parse_location(headers: &HeaderMap) -> Location {
    Location {
        country: header_str(headers, &GEO_COUNTRY),
        region: header_str(headers, &GEO_REGION),
        city: header_str(headers, &GEO_CITY),
    }
}

/// Language tags in the order the client listed them. Quality values are
/// dropped, as is the `*` wildcard.
fn parse_accept_language(headers: &HeaderMap) -> Vec<String> {
    let Some(value) = header_str(headers, &ACCEPT_LANGUAGE) else {
        return Vec::new();
    };
    value
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn test_parse_full_request() {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("de-DE, en;q=0.8, *;q=0.1"),
        );
        headers.insert(GEO_COUNTRY, HeaderValue::from_static("DE"));
        headers.insert(GEO_CITY, HeaderValue::from_static("Berlin"));

        let request = parse_suggest_request(
            Some("q=rust%20book&providers=top_picks,%20remote,&client_variants=a,b&request_id=r1&sid=s1&limit=4"),
            &headers,
        )
        .unwrap();

        assert_eq!(request.query(), "rust book");
        assert_eq!(
            request.providers(),
            Some(&["top_picks".to_string(), "remote".to_string()][..])
        );
        assert_eq!(request.client_variants(), &["a".to_string(), "b".to_string()]);
        assert_eq!(request.request_id(), Some("r1"));
        assert_eq!(request.session_id(), Some("s1"));
        assert_eq!(request.limit(), Some(4));
        assert_eq!(request.languages(), &["de-DE".to_string(), "en".to_string()]);
        assert_eq!(
            request.location(),
            Some(&Location {
                country: Some("DE".into()),
                region: None,
                city: Some("Berlin".into()),
            })
        );
    }

    #[test]
    fn test_parse_minimal_request() {
        let request = parse_suggest_request(Some("q=amaz&providers="), &HeaderMap::new()).unwrap();
        assert_eq!(request.query(), "amaz");
        assert_eq!(request.providers(), None);
        assert!(request.languages().is_empty());
        assert!(request.location().is_none());
        assert_eq!(request.limit(), None);
    }

    #[test]
    fn test_bad_requests() {
        assert!(matches!(
            parse_suggest_request(None, &HeaderMap::new()),
            Err(SuggestRouterError::BadRequest(_))
        ));
        assert!(matches!(
            parse_suggest_request(Some("providers=a"), &HeaderMap::new()),
            Err(SuggestRouterError::BadRequest(_))
        ));
        assert!(matches!(
            parse_suggest_request(Some("q=x&limit=-1"), &HeaderMap::new()),
            Err(SuggestRouterError::BadRequest(_))
        ));
    }
}
