use std::sync::Arc;

use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::{StatusCode, header};
use actix_web::{HttpRequest, HttpResponse, Responder, web};
use chrono::Utc;
use tracing::{debug, error, trace};

use crate::config::RedirectConfig;
use crate::services::{RedirectEngine, RedirectOutcome, ScanRequest};
use crate::utils::ip::{Cidr, extract_client_ip, parse_cidrs};

/// 跳转接口的静态设置（来自 `[redirect]` 配置段）
#[derive(Debug, Clone)]
pub struct RedirectSettings {
    pub error_page_url: String,
    pub cookie_name: String,
    pub cookie_max_age_days: i64,
    pub cookie_secure: bool,
    pub trusted_proxies: Vec<Cidr>,
}

impl RedirectSettings {
    pub fn from_config(config: &RedirectConfig) -> Self {
        Self {
            error_page_url: config.error_page_url.clone(),
            cookie_name: config.cookie_name.clone(),
            cookie_max_age_days: config.cookie_max_age_days,
            cookie_secure: config.cookie_secure,
            trusted_proxies: parse_cidrs(&config.trusted_proxies),
        }
    }

    /// 访客 cookie，每次成功扫码都重新下发（滚动过期）
    pub fn visitor_cookie(&self, visitor_id: &str) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.cookie_name.clone(), visitor_id.to_string());
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie.set_secure(self.cookie_secure);
        cookie.set_same_site(SameSite::Lax);
        cookie.set_max_age(actix_web::cookie::time::Duration::days(
            self.cookie_max_age_days,
        ));
        cookie
    }
}

impl Default for RedirectSettings {
    fn default() -> Self {
        Self::from_config(&RedirectConfig::default())
    }
}

pub struct RedirectService;

impl RedirectService {
    pub async fn handle_redirect(
        req: HttpRequest,
        path: web::Path<String>,
        engine: web::Data<Arc<RedirectEngine>>,
        settings: web::Data<RedirectSettings>,
    ) -> impl Responder {
        let request = Self::scan_request(&req, path.into_inner(), &settings);
        trace!("Scan request for code {:?} from {:?}", request.code, request.ip);

        match engine.resolve(&request).await {
            Ok(outcome) => Self::respond(outcome, &settings),
            Err(e) => {
                error!("Storage failure while resolving {}: {}", request.code, e);
                Self::error_response()
            }
        }
    }

    /// 从 HTTP 请求中提取扫码信号
    pub fn scan_request(req: &HttpRequest, code: String, settings: &RedirectSettings) -> ScanRequest {
        let header_value = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(String::from)
        };

        let password = url::form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, _)| key == "password")
            .map(|(_, value)| value.into_owned());

        ScanRequest {
            code,
            ip: extract_client_ip(req, &settings.trusted_proxies),
            user_agent: header_value(header::USER_AGENT),
            accept_language: header_value(header::ACCEPT_LANGUAGE),
            accept_encoding: header_value(header::ACCEPT_ENCODING),
            referrer: header_value(header::REFERER),
            password,
            visitor_cookie: req
                .cookie(&settings.cookie_name)
                .map(|c| c.value().to_string()),
            received_at: Utc::now(),
        }
    }

    pub fn respond(outcome: RedirectOutcome, settings: &RedirectSettings) -> HttpResponse {
        match outcome {
            RedirectOutcome::Redirect {
                location,
                visitor_id,
            } => HttpResponse::build(StatusCode::TEMPORARY_REDIRECT)
                .insert_header((header::LOCATION, location))
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .cookie(settings.visitor_cookie(&visitor_id))
                .finish(),
            RedirectOutcome::Relay { html, visitor_id } => HttpResponse::Ok()
                .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
                .insert_header((header::CACHE_CONTROL, "no-store"))
                .cookie(settings.visitor_cookie(&visitor_id))
                .body(html),
            RedirectOutcome::Rejected(rejection) => {
                debug!("Scan rejected: {}", rejection.kind.as_ref());
                HttpResponse::build(StatusCode::TEMPORARY_REDIRECT)
                    .insert_header((
                        header::LOCATION,
                        rejection.error_page_location(&settings.error_page_url),
                    ))
                    .insert_header((header::CACHE_CONTROL, "no-store"))
                    .finish()
            }
            RedirectOutcome::RateLimited { retry_after_secs } => {
                HttpResponse::build(StatusCode::TOO_MANY_REQUESTS)
                    .insert_header((header::RETRY_AFTER, retry_after_secs.to_string()))
                    .insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"))
                    .body("Too Many Requests")
            }
        }
    }

    #[inline]
    fn error_response() -> HttpResponse {
        HttpResponse::build(StatusCode::INTERNAL_SERVER_ERROR)
            .insert_header((header::CONTENT_TYPE, "text/html; charset=utf-8"))
            .body("Internal Server Error")
    }
}

/// Redirect 路由配置，挂在 `route_prefix` 下
pub fn redirect_routes(prefix: &str) -> actix_web::Scope {
    web::scope(prefix.trim_end_matches('/'))
        .route("/{code}", web::get().to(RedirectService::handle_redirect))
        .route("/{code}", web::head().to(RedirectService::handle_redirect))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{Rejection, RejectionKind};
    use actix_web::test::TestRequest;

    #[test]
    fn test_visitor_cookie_attributes() {
        let settings = RedirectSettings::default();
        let cookie = settings.visitor_cookie("0123456789abcdef0123456789abcdef");
        assert_eq!(cookie.name(), "qr_vid");
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.max_age(),
            Some(actix_web::cookie::time::Duration::days(30))
        );
    }

    #[test]
    fn test_scan_request_extraction() {
        let req = TestRequest::get()
            .uri("/r/menu?password=p%40ss&lang=en")
            .peer_addr("198.51.100.4:5000".parse().unwrap())
            .insert_header((header::USER_AGENT, "TestAgent/1.0"))
            .insert_header((header::ACCEPT_LANGUAGE, "en-US,en;q=0.9"))
            .insert_header((header::REFERER, "https://social.example/post"))
            .cookie(Cookie::new("qr_vid", "0123456789abcdef0123456789abcdef"))
            .to_http_request();

        let scan = RedirectService::scan_request(&req, "menu".into(), &RedirectSettings::default());
        assert_eq!(scan.code, "menu");
        assert_eq!(scan.ip.as_deref(), Some("198.51.100.4"));
        assert_eq!(scan.password.as_deref(), Some("p@ss"));
        assert_eq!(scan.user_agent.as_deref(), Some("TestAgent/1.0"));
        assert_eq!(scan.accept_language.as_deref(), Some("en-US,en;q=0.9"));
        assert_eq!(scan.referrer.as_deref(), Some("https://social.example/post"));
        assert_eq!(
            scan.visitor_cookie.as_deref(),
            Some("0123456789abcdef0123456789abcdef")
        );
    }

    #[test]
    fn test_respond_mapping() {
        let settings = RedirectSettings::default();

        let limited = RedirectService::respond(
            RedirectOutcome::RateLimited {
                retry_after_secs: 12,
            },
            &settings,
        );
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers().get(header::RETRY_AFTER).unwrap(), "12");

        let rejected = RedirectService::respond(
            RedirectOutcome::Rejected(Rejection::new(RejectionKind::Limit)),
            &settings,
        );
        assert_eq!(rejected.status(), StatusCode::TEMPORARY_REDIRECT);
        let location = rejected.headers().get(header::LOCATION).unwrap();
        assert!(location.to_str().unwrap().starts_with("/scan-error?type=limit"));
        // 被拒绝的扫码不下发访客 cookie
        assert!(rejected.cookies().next().is_none());

        let relay = RedirectService::respond(
            RedirectOutcome::Relay {
                html: "<html></html>".into(),
                visitor_id: "0123456789abcdef0123456789abcdef".into(),
            },
            &settings,
        );
        assert_eq!(relay.status(), StatusCode::OK);
        assert_eq!(
            relay.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store"
        );
        assert_eq!(relay.cookies().count(), 1);
    }
}
