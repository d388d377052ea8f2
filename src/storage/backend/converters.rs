use std::str::FromStr;

use tracing::warn;

use crate::storage::{
    PixelConfig, PixelProvider, RoutingRule, RuleType, ScanEvent, ShortLink, UtmParams,
};
use migration::entities::{pixel_config, routing_rule, scan_event, short_link};

/// 将 Sea-ORM Model 转换为 ShortLink
pub fn model_to_shortlink(model: short_link::Model) -> ShortLink {
    let utm = model.utm_params.as_deref().and_then(|raw| {
        serde_json::from_str::<UtmParams>(raw)
            .map_err(|e| warn!("短链接 {} 的 UTM 参数无法解析: {}", model.short_code, e))
            .ok()
    });

    ShortLink {
        id: model.id,
        code: model.short_code,
        destination: model.destination_url,
        password: model.password,
        expires_at: model.expires_at,
        max_scans: model.max_scans.map(|v| v.max(0) as u64),
        scan_count: model.scan_count.max(0) as u64,
        last_scanned_at: model.last_scanned_at,
        fallback_url: model.fallback_url,
        utm,
        is_active: model.is_active,
        created_at: model.created_at,
    }
}

/// 将 ShortLink 转换为 ActiveModel（仅用于插入）
pub fn shortlink_to_active_model(link: &ShortLink) -> short_link::ActiveModel {
    use sea_orm::ActiveValue::*;

    short_link::ActiveModel {
        id: NotSet,
        short_code: Set(link.code.clone()),
        destination_url: Set(link.destination.clone()),
        password: Set(link.password.clone()),
        expires_at: Set(link.expires_at),
        max_scans: Set(link.max_scans.map(|v| v as i64)),
        scan_count: Set(link.scan_count as i64),
        last_scanned_at: Set(link.last_scanned_at),
        fallback_url: Set(link.fallback_url.clone()),
        utm_params: Set(link
            .utm
            .as_ref()
            .and_then(|utm| serde_json::to_string(utm).ok())),
        is_active: Set(link.is_active),
        created_at: Set(link.created_at),
    }
}

/// 规则类型未知时返回 None；条件 JSON 损坏时保留 Null，由引擎按不匹配处理
pub fn model_to_rule(model: routing_rule::Model) -> Option<RoutingRule> {
    let rule_type = match RuleType::from_str(&model.rule_type) {
        Ok(t) => t,
        Err(_) => {
            warn!(
                "Skipping routing rule {} with unknown type '{}'",
                model.id, model.rule_type
            );
            return None;
        }
    };

    let condition = serde_json::from_str(&model.condition).unwrap_or_else(|e| {
        warn!("Routing rule {} has malformed condition: {}", model.id, e);
        serde_json::Value::Null
    });

    Some(RoutingRule {
        id: model.id,
        short_link_id: model.short_link_id,
        rule_type,
        condition,
        destination: model.destination,
        priority: model.priority,
        is_active: model.is_active,
    })
}

pub fn model_to_pixel(model: pixel_config::Model) -> Option<PixelConfig> {
    let provider = PixelProvider::from_str(&model.provider)
        .map_err(|_| {
            warn!(
                "Skipping pixel {} with unknown provider '{}'",
                model.id, model.provider
            )
        })
        .ok()?;

    Some(PixelConfig {
        id: model.id,
        short_link_id: model.short_link_id,
        provider,
        tracking_id: model.tracking_id,
        events: serde_json::from_str(&model.events).unwrap_or_default(),
        delay_redirect_ms: model.delay_redirect_ms.max(0) as u32,
        is_active: model.is_active,
        custom_script: model.custom_script,
    })
}

pub fn model_to_scan_event(model: scan_event::Model) -> ScanEvent {
    ScanEvent {
        short_link_id: model.short_link_id,
        ip_address: model.ip_address,
        user_agent: model.user_agent,
        device: model.device,
        browser: model.browser,
        os: model.os,
        referrer: model.referrer,
        country: model.country,
        city: model.city,
        visitor_id: model.visitor_id,
        is_unique: model.is_unique,
        is_bot: model.is_bot,
        scanned_at: model.scanned_at,
    }
}

pub fn scan_event_to_active_model(event: &ScanEvent) -> scan_event::ActiveModel {
    use sea_orm::ActiveValue::*;

    scan_event::ActiveModel {
        id: NotSet,
        short_link_id: Set(event.short_link_id),
        ip_address: Set(event.ip_address.clone()),
        user_agent: Set(event.user_agent.clone()),
        device: Set(event.device.clone()),
        browser: Set(event.browser.clone()),
        os: Set(event.os.clone()),
        referrer: Set(event.referrer.clone()),
        country: Set(event.country.clone()),
        city: Set(event.city.clone()),
        visitor_id: Set(event.visitor_id.clone()),
        is_unique: Set(event.is_unique),
        is_bot: Set(event.is_bot),
        scanned_at: Set(event.scanned_at),
    }
}
