//! 节点运行时错误类型定义

use servolink_bus::BusError;
use thiserror::Error;

/// 节点运行时错误类型
///
/// 只有启动阶段的错误会沿 `Result` 传播（外设打开失败、线程创建失败、
/// 配置非法）；稳态循环中的错误在各自任务内记录并消化，绝不越过任务边界。
#[derive(Error, Debug)]
pub enum NodeError {
    /// 总线适配器错误
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// 配置不合法（取值域、周期等）
    #[error("Invalid node configuration: {0}")]
    Config(String),

    /// 配置文件解析失败
    #[error("Failed to parse config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// IO 错误（配置文件读取、线程创建）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 角色缺少必需的协作者（传感器/执行器）
    #[error("Missing collaborator for this role: {0}")]
    MissingCollaborator(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::Config("duty_min > duty_max".to_string());
        assert!(format!("{}", err).contains("duty_min > duty_max"));

        let err = NodeError::MissingCollaborator("actuator");
        assert!(format!("{}", err).contains("actuator"));
    }

    #[test]
    fn test_from_bus_error() {
        let err: NodeError = BusError::Timeout.into();
        assert!(matches!(err, NodeError::Bus(BusError::Timeout)));
    }
}
