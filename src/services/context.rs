use chrono::{DateTime, Utc};

/// 单次扫码的请求信号，构造后只读
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub accept_language: Option<String>,
    pub accept_encoding: Option<String>,
    pub referrer: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// 门控检查时读取的扫码计数
    pub scan_count: u64,
    pub visitor_id: String,
}

impl RedirectContext {
    /// 仅含时间戳的空上下文，其他字段通过结构体更新语法补充
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            ip: None,
            user_agent: None,
            accept_language: None,
            accept_encoding: None,
            referrer: None,
            timestamp,
            scan_count: 0,
            visitor_id: String::new(),
        }
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("")
    }
}
