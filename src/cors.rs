//! Cross-origin handling: the fixed-origin CORS headers attached to every
//! response, and the allow-list the error responder checks.

use http::header;
use http::HeaderMap;
use http::HeaderValue;

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

#[derive(Clone, Debug)]
pub struct CorsPolicy {
    origin: HeaderValue,
}

impl CorsPolicy {
    pub fn new(origin: &str) -> anyhow::Result<CorsPolicy> {
        let origin = HeaderValue::from_str(origin).map_err(|error| {
            anyhow::anyhow!("invalid CORS origin {:?}: {:#}", origin, error)
        })?;
        Ok(CorsPolicy { origin })
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            self.origin.clone(),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }

    /// Headers for a preflight answer. Requested headers are echoed back.
    pub fn apply_preflight(
        &self,
        request: &HeaderMap,
        headers: &mut HeaderMap,
    ) {
        self.apply(headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        if let Some(requested) =
            request.get(header::ACCESS_CONTROL_REQUEST_HEADERS)
        {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                requested.clone(),
            );
            headers.append(
                header::VARY,
                HeaderValue::from_static("Access-Control-Request-Headers"),
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OriginAllowList {
    origins: Vec<String>,
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> OriginAllowList
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OriginAllowList {
            origins: origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Requests without an `Origin` header are always admitted.
    pub fn admits(&self, request: &HeaderMap) -> bool {
        match request.get(header::ORIGIN) {
            None => true,
            Some(origin) => origin
                .to_str()
                .map(|o| self.origins.iter().any(|allowed| allowed == o))
                .unwrap_or(false),
        }
    }
}
