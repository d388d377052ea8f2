use woothee::parser::Parser;

use crate::services::fraud::is_bot_user_agent;

/// UA 解析结果，未识别的字段为 None
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedUserAgent {
    /// woothee 类别：pc / smartphone / mobilephone / crawler / appliance / misc
    pub device: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub is_bot: bool,
}

fn known(value: &str) -> Option<String> {
    if value.is_empty() || value == "UNKNOWN" {
        None
    } else {
        Some(value.to_string())
    }
}

/// 解析 User-Agent；crawler 类别或命中爬虫词表都算作 bot
pub fn parse_user_agent(user_agent: Option<&str>) -> ParsedUserAgent {
    let Some(ua) = user_agent.filter(|ua| !ua.trim().is_empty()) else {
        return ParsedUserAgent::default();
    };

    let result = Parser::new().parse(ua).unwrap_or_default();

    ParsedUserAgent {
        device: known(result.category),
        browser: known(result.name),
        os: known(result.os),
        is_bot: result.category == "crawler" || is_bot_user_agent(ua),
    }
}
