use actix_web::{HttpResponse, Responder, web};
use serde::Serialize;
use tracing::trace;

// 应用启动时间结构体
#[derive(Clone, Debug)]
pub struct AppStartTime {
    pub start_datetime: chrono::DateTime<chrono::Utc>,
}

/// 健康检查中展示的组件名称
#[derive(Clone, Debug, Serialize)]
pub struct ComponentInfo {
    pub storage: String,
    pub blocklist: String,
    pub geoip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime: u64,
    pub components: ComponentInfo,
}

pub struct HealthService;

impl HealthService {
    pub async fn health_check(
        app_start_time: web::Data<AppStartTime>,
        components: web::Data<ComponentInfo>,
    ) -> impl Responder {
        trace!("Received health check request");

        let now = chrono::Utc::now();
        let uptime = (now - app_start_time.start_datetime).num_seconds().max(0) as u64;

        HttpResponse::Ok().json(HealthResponse {
            status: "healthy",
            timestamp: now.to_rfc3339(),
            uptime,
            components: components.get_ref().clone(),
        })
    }

    // 活跃性检查，检查基本服务可用性
    pub async fn liveness_check() -> impl Responder {
        trace!("Received liveness check request");

        HttpResponse::NoContent().finish()
    }
}

/// Health 路由配置
pub fn health_routes() -> actix_web::Scope {
    web::scope("/health")
        .route("", web::get().to(HealthService::health_check))
        .route("", web::head().to(HealthService::health_check))
        .route("/live", web::get().to(HealthService::liveness_check))
        .route("/live", web::head().to(HealthService::liveness_check))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, test};

    #[actix_rt::test]
    async fn test_health_reports_components() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(AppStartTime {
                    start_datetime: chrono::Utc::now() - chrono::Duration::seconds(42),
                }))
                .app_data(web::Data::new(ComponentInfo {
                    storage: "memory".into(),
                    blocklist: "memory".into(),
                    geoip: None,
                }))
                .service(health_routes()),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["uptime"].as_u64().unwrap() >= 42);
        assert_eq!(body["components"]["storage"], "memory");

        let req = test::TestRequest::get().uri("/health/live").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NO_CONTENT);
    }
}
