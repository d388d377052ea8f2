//! 路由规则：条件解析与按优先级求值

mod conditions;
mod engine;

pub use conditions::{
    Condition, DevicePlatform, PatternCache, detect_platform, parse_accept_language,
};
pub use engine::{
    RuleEngine, RuleEvaluation, is_valid_destination, ordered_active_rules, top_rule_of_type,
};
