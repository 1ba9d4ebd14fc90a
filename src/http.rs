use crate::cors::CorsPolicy;
use crate::cors::OriginAllowList;
use crate::model::VisitorCounter;
use crate::store::CounterStore;
use anyhow::anyhow;
use cookie::time::Duration;
use cookie::time::OffsetDateTime;
use cookie::Cookie;
use cookie::SameSite;
use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::ConfigDropshot;
use dropshot::HttpError;
use dropshot::HttpServerStarter;
use dropshot::RequestContext;
use http::header;
use http::HeaderMap;
use http::HeaderValue;
use http::Response;
use http::StatusCode;
use hyper::Body;
use serde::Serialize;
use slog::debug;
use slog::error;
use slog::info;
use slog::warn;
use std::sync::Arc;

const VISITED_COOKIE: &str = "visited";
const VISITED_COOKIE_DAYS: i64 = 50;

/// The server-wide context: the counter store plus the cross-origin rules
pub struct VisitorContext {
    store: Arc<dyn CounterStore>,
    cors: CorsPolicy,
    allowed_origins: OriginAllowList,
}

impl VisitorContext {
    pub fn new(
        store: Arc<dyn CounterStore>,
        cors: CorsPolicy,
        allowed_origins: OriginAllowList,
    ) -> VisitorContext {
        VisitorContext { store, cors, allowed_origins }
    }
}

#[derive(Serialize)]
struct AlreadyVisited {
    message: &'static str,
}

#[derive(Serialize)]
struct VisitCounted<'a> {
    success: bool,
    message: &'static str,
    data: &'a VisitorCounter,
}

#[derive(Serialize)]
struct Failure {
    success: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// A store failure on its way to becoming an HTTP response.
struct ErrorWrap(anyhow::Error);

impl ErrorWrap {
    /// Disallowed origins get a 403, everything else a 500 that carries the
    /// underlying message.
    fn into_response(
        self,
        allowed_origins: &OriginAllowList,
        request: &HeaderMap,
        log: &slog::Logger,
    ) -> Result<Response<Body>, HttpError> {
        let message = format!("{:#}", self.0);
        if !allowed_origins.admits(request) {
            warn!(log, "rejecting request from disallowed origin";
                "origin" => ?request.get(header::ORIGIN),
                "error_message" => &message);
            return json_response(
                StatusCode::FORBIDDEN,
                &Failure {
                    success: false,
                    message: "Access forbidden: Invalid origin.",
                    error: None,
                },
            );
        }
        error!(log, "failed to record visit"; "error_message" => &message);
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &Failure {
                success: false,
                message: "An error occurred.",
                error: Some(message),
            },
        )
    }
}

pub async fn create_dropshot_server(
    config_dropshot: ConfigDropshot,
    log: slog::Logger,
    api_context: VisitorContext,
) -> anyhow::Result<dropshot::HttpServer<VisitorContext>> {
    let mut api = ApiDescription::new();
    api.register(api_visitors)
        .map_err(|error| anyhow!("registering visitors endpoint: {}", error))?;
    api.register(api_visitors_preflight)
        .map_err(|error| anyhow!("registering preflight endpoint: {}", error))?;

    Ok(HttpServerStarter::new(&config_dropshot, api, api_context, &log)
        .map_err(|error| anyhow!("creating Dropshot server: {:#}", error))?
        .start())
}

/// Count this client's visit, once per `visited` cookie.
#[endpoint {
    method = GET,
    path = "/api/v1/visitors",
}]
async fn api_visitors(
    rqctx: RequestContext<VisitorContext>,
) -> Result<Response<Body>, HttpError> {
    let api_context = rqctx.context();
    record_visit(api_context, rqctx.request.headers(), &rqctx.log).await
}

/// CORS preflight for the visitors endpoint.
#[endpoint {
    method = OPTIONS,
    path = "/api/v1/visitors",
}]
async fn api_visitors_preflight(
    rqctx: RequestContext<VisitorContext>,
) -> Result<Response<Body>, HttpError> {
    let api_context = rqctx.context();
    let mut response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())
        .map_err(|error| HttpError::for_internal_error(error.to_string()))?;
    api_context
        .cors
        .apply_preflight(rqctx.request.headers(), response.headers_mut());
    Ok(response)
}

async fn record_visit(
    api_context: &VisitorContext,
    request: &HeaderMap,
    log: &slog::Logger,
) -> Result<Response<Body>, HttpError> {
    let mut response = if has_visited(request) {
        debug!(log, "repeat visit, counter left alone");
        json_response(
            StatusCode::OK,
            &AlreadyVisited { message: "You have already visited the site." },
        )?
    } else {
        match api_context.store.increment().await {
            Ok(counter) => {
                info!(log, "counted visit"; "visits" => counter.visits);
                let mut response = json_response(
                    StatusCode::OK,
                    &VisitCounted {
                        success: true,
                        message: "Visits count incremented successfully.",
                        data: &counter,
                    },
                )?;
                let cookie =
                    HeaderValue::from_str(&visited_cookie().to_string())
                        .map_err(|error| {
                            HttpError::for_internal_error(error.to_string())
                        })?;
                response.headers_mut().append(header::SET_COOKIE, cookie);
                response
            }
            Err(error) => ErrorWrap(error).into_response(
                &api_context.allowed_origins,
                request,
                log,
            )?,
        }
    };
    api_context.cors.apply(response.headers_mut());
    Ok(response)
}

/// Only the first `visited` pair counts, and an empty value does not count as
/// a previous visit.
fn has_visited(request: &HeaderMap) -> bool {
    request
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value))
        .filter_map(Result::ok)
        .find(|c| c.name() == VISITED_COOKIE)
        .map(|c| !c.value().is_empty())
        .unwrap_or(false)
}

fn visited_cookie() -> Cookie<'static> {
    let lifetime = Duration::days(VISITED_COOKIE_DAYS);
    Cookie::build(VISITED_COOKIE, "true")
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .max_age(lifetime)
        .expires(OffsetDateTime::now_utc() + lifetime)
        .finish()
}

fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Body>, HttpError> {
    let body = serde_json::to_vec(body)
        .map_err(|error| HttpError::for_internal_error(error.to_string()))?;
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(|error| HttpError::for_internal_error(error.to_string()))
}
