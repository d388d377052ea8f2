use std::fmt;

#[derive(Debug, Clone)]
pub enum QrLinkerError {
    DatabaseConfig(String),
    DatabaseConnection(String),
    DatabaseOperation(String),
    Validation(String),
    NotFound(String),
    Serialization(String),
    Cache(String),
    Dependency(String),
}

impl QrLinkerError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            QrLinkerError::DatabaseConfig(_) => "E001",
            QrLinkerError::DatabaseConnection(_) => "E002",
            QrLinkerError::DatabaseOperation(_) => "E003",
            QrLinkerError::Validation(_) => "E004",
            QrLinkerError::NotFound(_) => "E005",
            QrLinkerError::Serialization(_) => "E006",
            QrLinkerError::Cache(_) => "E007",
            QrLinkerError::Dependency(_) => "E008",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            QrLinkerError::DatabaseConfig(_) => "Database Configuration Error",
            QrLinkerError::DatabaseConnection(_) => "Database Connection Error",
            QrLinkerError::DatabaseOperation(_) => "Database Operation Error",
            QrLinkerError::Validation(_) => "Validation Error",
            QrLinkerError::NotFound(_) => "Resource Not Found",
            QrLinkerError::Serialization(_) => "Serialization Error",
            QrLinkerError::Cache(_) => "Cache Error",
            QrLinkerError::Dependency(_) => "Dependency Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            QrLinkerError::DatabaseConfig(msg)
            | QrLinkerError::DatabaseConnection(msg)
            | QrLinkerError::DatabaseOperation(msg)
            | QrLinkerError::Validation(msg)
            | QrLinkerError::NotFound(msg)
            | QrLinkerError::Serialization(msg)
            | QrLinkerError::Cache(msg)
            | QrLinkerError::Dependency(msg) => msg,
        }
    }

    /// 格式化为彩色输出（用于启动失败时打印到终端）
    pub fn format_colored(&self) -> String {
        use colored::Colorize;
        format!(
            "{} {} {}\n  {}",
            "[ERROR]".red().bold(),
            self.code().yellow(),
            self.error_type().red(),
            self.message().white()
        )
    }

    /// 格式化为简洁输出
    pub fn format_simple(&self) -> String {
        format!("{}: {}", self.error_type(), self.message())
    }
}

impl fmt::Display for QrLinkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_simple())
    }
}

impl std::error::Error for QrLinkerError {}

// 便捷的构造函数
impl QrLinkerError {
    pub fn database_config<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::DatabaseConfig(msg.into())
    }

    pub fn database_connection<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::DatabaseConnection(msg.into())
    }

    pub fn database_operation<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::DatabaseOperation(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::Validation(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::NotFound(msg.into())
    }

    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::Serialization(msg.into())
    }

    pub fn cache<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::Cache(msg.into())
    }

    pub fn dependency<T: Into<String>>(msg: T) -> Self {
        QrLinkerError::Dependency(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<sea_orm::DbErr> for QrLinkerError {
    fn from(err: sea_orm::DbErr) -> Self {
        QrLinkerError::DatabaseOperation(err.to_string())
    }
}

impl From<std::io::Error> for QrLinkerError {
    fn from(err: std::io::Error) -> Self {
        QrLinkerError::Dependency(err.to_string())
    }
}

impl From<serde_json::Error> for QrLinkerError {
    fn from(err: serde_json::Error) -> Self {
        QrLinkerError::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for QrLinkerError {
    fn from(err: redis::RedisError) -> Self {
        QrLinkerError::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, QrLinkerError>;
