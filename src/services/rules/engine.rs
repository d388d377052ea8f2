//! 路由规则引擎
//!
//! 只看激活的规则，按 priority 降序稳定排序（同优先级保持原顺序），
//! 返回第一条命中规则的目标地址；都不命中时返回默认地址。

use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};

use super::conditions::{Condition, PatternCache};
use crate::services::context::RedirectContext;
use crate::services::geoip::{GeoInfo, GeoIpProvider};
use crate::storage::{RoutingRule, RuleType};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleEvaluation {
    pub destination: String,
    pub matched: bool,
    pub matched_rule: Option<RoutingRule>,
    pub reason: String,
}

/// 激活规则的求值顺序
pub fn ordered_active_rules(rules: &[RoutingRule]) -> Vec<&RoutingRule> {
    let mut active: Vec<&RoutingRule> = rules.iter().filter(|r| r.is_active).collect();
    // sort_by 是稳定排序
    active.sort_by(|a, b| b.priority.cmp(&a.priority));
    active
}

/// 指定类型中优先级最高的激活规则
pub fn top_rule_of_type(rules: &[RoutingRule], rule_type: RuleType) -> Option<&RoutingRule> {
    ordered_active_rules(rules)
        .into_iter()
        .find(|r| r.rule_type == rule_type)
}

/// 目标地址必须是可解析的 http(s) URL
pub fn is_valid_destination(destination: &str) -> bool {
    url::Url::parse(destination).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

pub struct RuleEngine {
    geo: Option<GeoIpProvider>,
    patterns: PatternCache,
}

impl RuleEngine {
    /// `geo` 为 None 时 geo 规则一律不命中
    pub fn new(geo: Option<GeoIpProvider>) -> Self {
        Self {
            geo,
            patterns: PatternCache::default(),
        }
    }

    pub async fn evaluate(
        &self,
        rules: &[RoutingRule],
        context: &RedirectContext,
        default_destination: &str,
    ) -> RuleEvaluation {
        let ordered = ordered_active_rules(rules);
        if ordered.is_empty() {
            return Self::fallback(default_destination, "no active rules");
        }

        // 地理位置最多查询一次，且只在遇到 geo 规则时查询
        let geo_cell: OnceCell<Option<GeoInfo>> = OnceCell::new();

        for rule in ordered {
            let condition = match Condition::parse(rule.rule_type, &rule.condition, &self.patterns)
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(
                        "Routing rule {} ({}) has malformed condition, skipping: {}",
                        rule.id,
                        rule.rule_type.as_ref(),
                        e
                    );
                    continue;
                }
            };

            if !is_valid_destination(&rule.destination) {
                warn!(
                    "Routing rule {} has invalid destination {:?}, skipping",
                    rule.id, rule.destination
                );
                continue;
            }

            let matched = match condition {
                Condition::Device(ref allowed) => {
                    Condition::matches_device(allowed, context.user_agent())
                }
                Condition::Time {
                    ref timezone,
                    ref schedules,
                } => Condition::matches_time(timezone, schedules, context.timestamp),
                Condition::Language(ref allowed) => {
                    Condition::matches_language(allowed, context.accept_language.as_deref())
                }
                Condition::ScanLimit(threshold) => context.scan_count >= threshold,
                Condition::Geo {
                    ref countries,
                    ref cities,
                    exclude,
                } => match geo_cell.get_or_init(|| self.resolve_geo(context)).await {
                    Some(geo) => Condition::matches_geo(countries, cities, exclude, geo),
                    None => false,
                },
                Condition::UserAgent(ref patterns) => {
                    Condition::matches_user_agent(patterns, context.user_agent())
                }
            };

            trace!(
                "Rule {} ({}) evaluated: {}",
                rule.id,
                rule.rule_type.as_ref(),
                matched
            );

            if matched {
                debug!(
                    "Routing rule {} ({}, priority {}) matched",
                    rule.id,
                    rule.rule_type.as_ref(),
                    rule.priority
                );
                return RuleEvaluation {
                    destination: rule.destination.clone(),
                    matched: true,
                    matched_rule: Some(rule.clone()),
                    reason: format!("matched {} rule {}", rule.rule_type.as_ref(), rule.id),
                };
            }
        }

        Self::fallback(default_destination, "no rule matched")
    }

    /// 查询失败或结果未知时返回 None，geo 规则视为不命中
    async fn resolve_geo(&self, context: &RedirectContext) -> Option<GeoInfo> {
        let geo = self.geo.as_ref()?;
        let ip = context.ip.as_deref()?;
        let info = geo.resolve(ip).await;
        (!info.is_unknown()).then_some(info)
    }

    fn fallback(default_destination: &str, reason: &str) -> RuleEvaluation {
        RuleEvaluation {
            destination: default_destination.to_string(),
            matched: false,
            matched_rule: None,
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn ctx(ua: &str) -> RedirectContext {
        RedirectContext {
            user_agent: Some(ua.to_string()),
            ..RedirectContext::at(Utc::now())
        }
    }

    #[test]
    fn test_ordering_is_stable() {
        let mut rules = vec![
            RoutingRule::new(RuleType::Device, json!({}), "https://a.example", 1),
            RoutingRule::new(RuleType::Device, json!({}), "https://b.example", 5),
            RoutingRule::new(RuleType::Device, json!({}), "https://c.example", 5),
            RoutingRule::new(RuleType::Device, json!({}), "https://d.example", 9),
        ];
        rules[3].is_active = false;
        let order: Vec<&str> = ordered_active_rules(&rules)
            .iter()
            .map(|r| r.destination.as_str())
            .collect();
        assert_eq!(order, vec!["https://b.example", "https://c.example", "https://a.example"]);
    }

    #[test]
    fn test_destination_validation() {
        assert!(is_valid_destination("https://example.com/x?y=1"));
        assert!(!is_valid_destination("javascript:alert(1)"));
        assert!(!is_valid_destination("/relative"));
        assert!(!is_valid_destination(""));
    }

    #[tokio::test]
    async fn test_no_rules_returns_default() {
        let engine = RuleEngine::new(None);
        let result = engine.evaluate(&[], &ctx("x"), "https://example.com").await;
        assert_eq!(result.destination, "https://example.com");
        assert!(!result.matched);
        assert!(result.matched_rule.is_none());
    }

    #[tokio::test]
    async fn test_invalid_destination_is_skipped() {
        let engine = RuleEngine::new(None);
        let rules = vec![
            RoutingRule::new(RuleType::Device, json!({"devices": ["other"]}), "not a url", 10),
            RoutingRule::new(
                RuleType::Device,
                json!({"devices": ["other"]}),
                "https://fallback-rule.example",
                1,
            ),
        ];
        let result = engine.evaluate(&rules, &ctx("Nokia"), "https://example.com").await;
        assert_eq!(result.destination, "https://fallback-rule.example");
    }

    #[tokio::test]
    async fn test_geo_without_resolver_never_matches() {
        let engine = RuleEngine::new(None);
        let rules = vec![RoutingRule::new(
            RuleType::Geo,
            json!({"countries": ["US"], "exclude": true}),
            "https://geo.example",
            1,
        )];
        let context = RedirectContext {
            ip: Some("8.8.8.8".to_string()),
            ..ctx("x")
        };
        let result = engine.evaluate(&rules, &context, "https://example.com").await;
        assert!(!result.matched);
    }
}
