//! 总线标识符常量定义
//!
//! 标识符集合是封闭且带版本语义的：新增消息类型必须分配新的标识符，
//! 绝不允许在已有标识符上做长度区分的重载。
//!
//! 两个标识符族对应两代协议：
//! - 0x101–0x103：设定值/反馈/电机指令族（小端字节序）
//! - 0x110–0x111：编码器报告族（大端字节序）

/// 期望角度设定值，指挥节点 → 执行节点（i16, 小端）
pub const ID_SETPOINT: u16 = 0x101;

/// 实测角度反馈，执行节点 → 指挥节点（i16, 小端）
pub const ID_FEEDBACK: u16 = 0x102;

/// 直接电机指令：方向 + 占空比，指挥节点 → 执行节点
pub const ID_MOTOR_CMD: u16 = 0x103;

/// 期望编码器报告，指挥节点广播（u16, 大端）
pub const ID_DESIRED_ENCODER: u16 = 0x110;

/// 当前编码器报告，执行节点广播（u16, 大端）
pub const ID_CURRENT_ENCODER: u16 = 0x111;

/// 角度类载荷长度（字节）
pub const LEN_ANGLE_PAYLOAD: usize = 2;

/// 电机指令载荷长度（字节）：方向 1 字节 + 占空比 2 字节
pub const LEN_MOTOR_CMD_PAYLOAD: usize = 3;
