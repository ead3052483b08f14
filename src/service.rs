use crate::browser::read_bridge_reply;
use crate::config::Config;
use crate::controller::{Outcome, PageController};
use crate::header_tools::client_ip;
use crate::ip_geo::IpResolver;
use crate::page::{render_page, PageView};
use crate::session::{Consent, Session, SessionId, SessionStore};
use crate::store::LocationStore;

use hyper::header::{HeaderMap, HeaderValue, CONTENT_TYPE, LOCATION, SET_COOKIE};
use hyper::{Body, Method, Request, Response, StatusCode, Uri};
use serde_json::json;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

const MAX_FORM_BYTES: usize = 1024;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Requested URI {0:?} is not found")]
    NotFound(Uri),
    #[error("Method {0} is not allowed")]
    MethodNotAllowed(Method),
    #[error("Request body is invalid: {0}")]
    BadRequest(String),
    #[error(r#"Internal server error: "{0:?}""#)]
    InternalServerError(#[from] hyper::http::Error),
}

impl From<hyper::Error> for ServiceError {
    fn from(error: hyper::Error) -> Self {
        Self::BadRequest(error.to_string())
    }
}

pub struct CheckinService {
    ip_headers: Vec<String>,
    ip_headers_recursive: bool,
    bridge_timeout: Duration,
    response_headers: HeaderMap,
    sessions: SessionStore,
    controller: PageController,
}

impl CheckinService {
    /// Builds the service; a database that cannot be reached leaves the service running
    /// without storage
    pub async fn from_config(config: Config) -> Self {
        let Config {
            ip_headers,
            ip_headers_recursive,
            bridge_timeout,
            response_headers,
            ip_lookup,
            database,
            ..
        } = config;

        let store = match LocationStore::connect(&database).await {
            Ok(store) => {
                log::info!(r#"storing locations in collection "{}""#, database.collection);
                Some(store)
            }
            Err(err) => {
                log::error!("location database is unavailable, nothing will be stored: {err}");
                None
            }
        };

        Self {
            ip_headers,
            ip_headers_recursive,
            bridge_timeout: bridge_timeout.into(),
            response_headers,
            sessions: SessionStore::default(),
            controller: PageController::new(IpResolver::from_config(ip_lookup), store),
        }
    }
}

fn is_known_path(path: &str) -> bool {
    matches!(
        path,
        "/" | "/consent" | "/consent/withdraw" | "/api/browser-location" | "/health"
    )
}

impl CheckinService {
    pub async fn response(
        &self,
        socket_ip_addr: IpAddr,
        request: Request<Body>,
    ) -> Result<Response<Body>, ServiceError> {
        let mut response = match (request.method(), request.uri().path()) {
            (&Method::GET, "/") => self.page(socket_ip_addr, request).await?,
            (&Method::POST, "/consent") => self.consent(request).await?,
            (&Method::POST, "/consent/withdraw") => self.withdraw(request)?,
            (&Method::POST, "/api/browser-location") => self.browser_location(request).await?,
            (&Method::GET, "/health") => self.health().await?,
            (method, path) if is_known_path(path) => {
                return Err(ServiceError::MethodNotAllowed(method.clone()))
            }
            _ => return Err(ServiceError::NotFound(request.uri().clone())),
        };
        let headers = response.headers_mut();
        for (name, value) in &self.response_headers {
            headers.insert(name, value.clone());
        }
        Ok(response)
    }

    fn session(&self, headers: &HeaderMap) -> (SessionId, Session, Option<HeaderValue>) {
        let (id, session, is_new) = self.sessions.load(SessionId::from_headers(headers));
        let cookie = if is_new {
            HeaderValue::from_str(&id.set_cookie()).ok()
        } else {
            None
        };
        (id, session, cookie)
    }

    async fn page(
        &self,
        socket_ip_addr: IpAddr,
        request: Request<Body>,
    ) -> Result<Response<Body>, ServiceError> {
        let (_, session, cookie) = self.session(request.headers());
        let remote_ip = client_ip(
            request.headers(),
            Some(socket_ip_addr),
            &self.ip_headers,
            self.ip_headers_recursive,
        );

        let page_load = self.controller.on_page_load(&session, remote_ip).await;
        let html = render_page(&PageView {
            consent: session.consent(),
            ip: &page_load.ip,
            auto_browser: page_load.auto_browser,
            store_available: self.controller.store().is_some(),
            bridge_timeout: self.bridge_timeout,
        });

        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/html; charset=utf-8");
        if let Some(cookie) = cookie {
            builder = builder.header(SET_COOKIE, cookie);
        }
        Ok(builder.body(html.into())?)
    }

    async fn consent(&self, request: Request<Body>) -> Result<Response<Body>, ServiceError> {
        let (id, mut session, cookie) = self.session(request.headers());
        let body = hyper::body::to_bytes(request.into_body()).await?;
        if body.len() > MAX_FORM_BYTES {
            return Err(ServiceError::BadRequest("form is too large".into()));
        }
        let mut consent = Consent::default();
        for (name, value) in url::form_urlencoded::parse(&body) {
            let checked = value == "on" || value == "true";
            match name.as_ref() {
                "ip" => consent.ip = checked,
                "browser" => consent.browser = checked,
                _ => {}
            }
        }
        session.grant(consent);
        log::debug!("consent for {}: {consent:?}", id.as_str());
        self.sessions.save(id, session);
        redirect_home(cookie)
    }

    fn withdraw(&self, request: Request<Body>) -> Result<Response<Body>, ServiceError> {
        let (id, mut session, cookie) = self.session(request.headers());
        session.withdraw();
        self.sessions.save(id, session);
        redirect_home(cookie)
    }

    async fn browser_location(
        &self,
        request: Request<Body>,
    ) -> Result<Response<Body>, ServiceError> {
        let (id, mut session, cookie) = self.session(request.headers());
        let reply = read_bridge_reply(request.into_body(), self.bridge_timeout).await;
        let outcome = self.controller.on_browser_report(&mut session, reply).await;
        self.sessions.save(id, session);

        let (status, body) = match &outcome {
            Outcome::Idle => (
                StatusCode::FORBIDDEN,
                json!({
                    "status": "idle",
                    "message": "Sharing your precise location is not enabled. Tick it in the form above first.",
                }),
            ),
            Outcome::Stored { id, .. } => (
                StatusCode::OK,
                json!({"status": "stored", "id": id.0, "message": outcome.message()}),
            ),
            Outcome::Failed(failure) => (
                StatusCode::OK,
                json!({
                    "status": "failed",
                    "reason": failure.to_string(),
                    "message": outcome.message(),
                }),
            ),
        };
        let mut builder = Response::builder()
            .status(status)
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(SET_COOKIE, cookie);
        }
        Ok(builder.body(body.to_string().into())?)
    }

    async fn health(&self) -> Result<Response<Body>, ServiceError> {
        let (status, body) = match self.controller.store() {
            Some(store) => match store.ping().await {
                Ok(()) => (StatusCode::OK, "ok".to_owned()),
                Err(err) => (StatusCode::SERVICE_UNAVAILABLE, err.to_string()),
            },
            None => (StatusCode::SERVICE_UNAVAILABLE, "no database connection".to_owned()),
        };
        Ok(Response::builder().status(status).body(body.into())?)
    }
}

fn redirect_home(cookie: Option<HeaderValue>) -> Result<Response<Body>, ServiceError> {
    let mut builder = Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(LOCATION, "/");
    if let Some(cookie) = cookie {
        builder = builder.header(SET_COOKIE, cookie);
    }
    Ok(builder.body(Body::empty())?)
}

pub fn make_error_response(error: ServiceError) -> Response<Body> {
    let status = match error {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
        ServiceError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut response = Response::new(Body::from(error.to_string()));
    *response.status_mut() = status;
    response
}

pub fn log_response(
    socket_ip_addr: IpAddr,
    method: &Method,
    uri: &Uri,
    response: &Response<Body>,
) {
    log::info!(
        "{} {} {} {} {}",
        socket_ip_addr,
        method,
        uri,
        response.status(),
        response
            .headers()
            .get(LOCATION)
            .map(|header_value| header_value.to_str().unwrap_or("-"))
            .unwrap_or("-"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::PERMISSION_INSTRUCTIONS;
    use crate::record::Method as RecordMethod;
    use crate::test_server::TestServer;
    use hyper::header::COOKIE;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    const NEW_YORK: &str = r#"{"loc": "40.7128,-74.0060", "city": "New York", "region": "NY", "country": "US", "ip": "1.2.3.4"}"#;
    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn service(upstream: &TestServer, dir: &TempDir) -> CheckinService {
        let config: Config = toml::from_str(&format!(
            r#"
            bridge_timeout = 2
            [response_headers]
            Cache-Control = "no-store"
            [ip_lookup]
            request_timeout = 1
            echo = "{upstream}/echo"
            providers = [{{ type = "ipinfo", uri = "{upstream}" }}]
            [database]
            url = "sqlite://{db}"
            "#,
            upstream = upstream.uri(),
            db = dir.path().join("checkins.db").display(),
        ))
        .unwrap();
        CheckinService::from_config(config).await
    }

    fn request(method: Method, path: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("X-Forwarded-For", "1.2.3.4");
        if let Some(cookie) = cookie {
            builder = builder.header(COOKIE, cookie);
        }
        builder.body(body.to_owned().into()).unwrap()
    }

    fn session_cookie(response: &Response<Body>) -> String {
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_owned()
    }

    async fn body_string(response: Response<Body>) -> String {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn first_visit_asks_for_consent_only() {
        let upstream = TestServer::start(|_| (StatusCode::OK, NEW_YORK.into()));
        let dir = TempDir::new().unwrap();
        let service = service(&upstream, &dir).await;

        let response = service
            .response(LOOPBACK, request(Method::GET, "/", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(session_cookie(&response).starts_with("geocheckin_session="));
        assert_eq!(response.headers()["cache-control"], "no-store");
        let html = body_string(response).await;
        assert!(html.contains("Save my choices"));
        assert_eq!(upstream.hits(), 0);
        assert!(service.controller.store().unwrap().documents().await.is_empty());
    }

    #[tokio::test]
    async fn ip_consent_records_on_next_page_load() {
        let upstream = TestServer::start(|path| match path {
            "/1.2.3.4/json" => (StatusCode::OK, NEW_YORK.into()),
            _ => (StatusCode::NOT_FOUND, "{}".into()),
        });
        let dir = TempDir::new().unwrap();
        let service = service(&upstream, &dir).await;

        let response = service
            .response(LOOPBACK, request(Method::GET, "/", None, ""))
            .await
            .unwrap();
        let cookie = session_cookie(&response);

        let response = service
            .response(LOOPBACK, request(Method::POST, "/consent", Some(&cookie), "ip=on"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], "/");

        let response = service
            .response(LOOPBACK, request(Method::GET, "/", Some(&cookie), ""))
            .await
            .unwrap();
        assert!(response.headers().get(SET_COOKIE).is_none());
        let html = body_string(response).await;
        assert!(html.contains("Location recorded: New York, NY, US"));
        assert!(!html.contains("id=\"share\""));
        assert_eq!(upstream.hits(), 1);

        let documents = service.controller.store().unwrap().documents().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].method(), RecordMethod::Ip);

        service
            .response(LOOPBACK, request(Method::POST, "/consent/withdraw", Some(&cookie), ""))
            .await
            .unwrap();
        service
            .response(LOOPBACK, request(Method::GET, "/", Some(&cookie), ""))
            .await
            .unwrap();
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn browser_report_needs_consent() {
        let upstream = TestServer::start(|_| (StatusCode::OK, NEW_YORK.into()));
        let dir = TempDir::new().unwrap();
        let service = service(&upstream, &dir).await;

        let body = r#"{"latitude": 10.0, "longitude": 20.0, "accuracy": 5.0}"#;
        let response = service
            .response(LOOPBACK, request(Method::POST, "/api/browser-location", None, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(service.controller.store().unwrap().documents().await.is_empty());
    }

    #[tokio::test]
    async fn browser_report_denied_then_shared() {
        let upstream = TestServer::start(|_| (StatusCode::OK, NEW_YORK.into()));
        let dir = TempDir::new().unwrap();
        let service = service(&upstream, &dir).await;

        let response = service
            .response(LOOPBACK, request(Method::POST, "/consent", None, "browser=on"))
            .await
            .unwrap();
        let cookie = session_cookie(&response);

        let denied = r#"{"error": {"code": 1, "message": "User denied Geolocation"}}"#;
        let response = service
            .response(
                LOOPBACK,
                request(Method::POST, "/api/browser-location", Some(&cookie), denied),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let reply: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(reply["status"], "failed");
        assert_eq!(reply["message"], PERMISSION_INSTRUCTIONS);
        assert!(service.controller.store().unwrap().documents().await.is_empty());

        let shared = r#"{"latitude": 10.0, "longitude": 20.0, "accuracy": 5.0}"#;
        let response = service
            .response(
                LOOPBACK,
                request(Method::POST, "/api/browser-location", Some(&cookie), shared),
            )
            .await
            .unwrap();
        let reply: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(reply["status"], "stored");

        let documents = service.controller.store().unwrap().documents().await;
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].method(), RecordMethod::Browser);
        assert_eq!(documents[0].accuracy(), Some(5.0));

        // IP lookup was never agreed to
        let response = service
            .response(LOOPBACK, request(Method::GET, "/", Some(&cookie), ""))
            .await
            .unwrap();
        let html = body_string(response).await;
        assert!(html.contains("const autoShare = true;"));
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn health_and_routing() {
        let upstream = TestServer::start(|_| (StatusCode::OK, NEW_YORK.into()));
        let dir = TempDir::new().unwrap();
        let service = service(&upstream, &dir).await;

        let response = service
            .response(LOOPBACK, request(Method::GET, "/health", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let error = service
            .response(LOOPBACK, request(Method::GET, "/invoice", None, ""))
            .await
            .unwrap_err();
        assert_eq!(make_error_response(error).status(), StatusCode::NOT_FOUND);

        let error = service
            .response(LOOPBACK, request(Method::DELETE, "/consent", None, ""))
            .await
            .unwrap_err();
        assert_eq!(
            make_error_response(error).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }
}
