//! 消息编码/解码
//!
//! 负责 `Message` 值与原始帧之间的双向映射。编码对合法的 `Message`
//! 是全函数且确定的；解码是偏函数：`decode(frame) -> Option<Message>`，
//! 未识别的标识符或长度不匹配的帧返回 `None` —— 这不是错误，
//! 接收循环必须静默跳过这类帧。
//!
//! 字节序按消息族区分（见 crate 文档），解码端对占空比重新钳位。

use crate::constants::clamp_duty;
use crate::ids::*;
use crate::Frame;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// 角度值（有符号整数，单位度）
///
/// 取值域由节点配置钳位（默认 `[0, 180]`），协议层只保证位宽。
pub type Angle = i16;

/// 电机转动方向
///
/// 线上编码：0 = 反转，1 = 正转。其他字节值不是合法方向，
/// 携带非法方向字节的电机指令帧整帧视为不可识别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Direction {
    /// 反转（误差为负，向角度减小方向运动）
    Backward = 0,
    /// 正转（误差为正，向角度增大方向运动）
    Forward = 1,
}

/// 总线消息（五种类型，每种对应一个固定标识符和固定载荷长度）
///
/// # 编码示例
///
/// ```rust
/// use servolink_protocol::{Frame, Message, Direction};
///
/// let msg = Message::MotorCmd {
///     direction: Direction::Forward,
///     duty: 500,
/// };
/// let frame = msg.encode();
/// assert_eq!(frame.id, 0x103);
/// assert_eq!(Message::decode(&frame), Some(msg));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// 期望角度设定值（指挥节点 → 执行节点，小端 i16）
    Setpoint { angle: Angle },
    /// 实测角度反馈（执行节点 → 指挥节点，小端 i16）
    Feedback { angle: Angle },
    /// 直接电机指令（方向 + 占空比，小端 u16，占空比 ≤ 1023）
    MotorCmd { direction: Direction, duty: u16 },
    /// 期望编码器报告（大端 u16，旧一代协议族）
    DesiredEncoder { angle: u16 },
    /// 当前编码器报告（大端 u16，旧一代协议族）
    CurrentEncoder { angle: u16 },
}

impl Message {
    /// 本消息对应的总线标识符
    pub fn id(&self) -> u16 {
        match self {
            Message::Setpoint { .. } => ID_SETPOINT,
            Message::Feedback { .. } => ID_FEEDBACK,
            Message::MotorCmd { .. } => ID_MOTOR_CMD,
            Message::DesiredEncoder { .. } => ID_DESIRED_ENCODER,
            Message::CurrentEncoder { .. } => ID_CURRENT_ENCODER,
        }
    }

    /// 编码为原始帧
    ///
    /// 占空比在此处钳位到 `[0, 1023]`，保证线上永远不出现超域值。
    pub fn encode(&self) -> Frame {
        match *self {
            Message::Setpoint { angle } => Frame::new(ID_SETPOINT, &angle.to_le_bytes()),
            Message::Feedback { angle } => Frame::new(ID_FEEDBACK, &angle.to_le_bytes()),
            Message::MotorCmd { direction, duty } => {
                let duty = clamp_duty(duty);
                let duty_bytes = duty.to_le_bytes();
                Frame::new(
                    ID_MOTOR_CMD,
                    &[u8::from(direction), duty_bytes[0], duty_bytes[1]],
                )
            },
            Message::DesiredEncoder { angle } => Frame::new(ID_DESIRED_ENCODER, &angle.to_be_bytes()),
            Message::CurrentEncoder { angle } => Frame::new(ID_CURRENT_ENCODER, &angle.to_be_bytes()),
        }
    }

    /// 从原始帧解码
    ///
    /// 返回 `None` 的情况（均为静默跳过，不是错误）：
    /// - 标识符不在封闭集合内
    /// - 载荷长度与该标识符规定的长度不符
    /// - 电机指令的方向字节不是 0/1
    pub fn decode(frame: &Frame) -> Option<Message> {
        let data = frame.data_slice();
        match frame.id {
            ID_SETPOINT if data.len() == LEN_ANGLE_PAYLOAD => Some(Message::Setpoint {
                angle: i16::from_le_bytes([data[0], data[1]]),
            }),
            ID_FEEDBACK if data.len() == LEN_ANGLE_PAYLOAD => Some(Message::Feedback {
                angle: i16::from_le_bytes([data[0], data[1]]),
            }),
            ID_MOTOR_CMD if data.len() == LEN_MOTOR_CMD_PAYLOAD => {
                let direction = Direction::try_from(data[0]).ok()?;
                let duty = clamp_duty(u16::from_le_bytes([data[1], data[2]]));
                Some(Message::MotorCmd { direction, duty })
            },
            ID_DESIRED_ENCODER if data.len() == LEN_ANGLE_PAYLOAD => Some(Message::DesiredEncoder {
                angle: u16::from_be_bytes([data[0], data[1]]),
            }),
            ID_CURRENT_ENCODER if data.len() == LEN_ANGLE_PAYLOAD => Some(Message::CurrentEncoder {
                angle: u16::from_be_bytes([data[0], data[1]]),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setpoint_little_endian_layout() {
        let frame = Message::Setpoint { angle: 0x1234 }.encode();
        assert_eq!(frame.id, ID_SETPOINT);
        assert_eq!(frame.data_slice(), &[0x34, 0x12]);
    }

    #[test]
    fn test_desired_encoder_big_endian_layout() {
        // 编码器报告族与电机指令族字节序相反，必须逐族验证
        let frame = Message::DesiredEncoder { angle: 0x1234 }.encode();
        assert_eq!(frame.id, ID_DESIRED_ENCODER);
        assert_eq!(frame.data_slice(), &[0x12, 0x34]);
    }

    #[test]
    fn test_current_encoder_big_endian_layout() {
        let frame = Message::CurrentEncoder { angle: 90 }.encode();
        assert_eq!(frame.data_slice(), &[0x00, 90]);
    }

    #[test]
    fn test_motor_cmd_layout() {
        let frame = Message::MotorCmd {
            direction: Direction::Forward,
            duty: 0x0234,
        }
        .encode();
        assert_eq!(frame.id, ID_MOTOR_CMD);
        assert_eq!(frame.data_slice(), &[0x01, 0x34, 0x02]);
    }

    #[test]
    fn test_motor_cmd_duty_clamped_on_encode() {
        let frame = Message::MotorCmd {
            direction: Direction::Backward,
            duty: 5000,
        }
        .encode();
        let decoded = Message::decode(&frame).unwrap();
        assert_eq!(
            decoded,
            Message::MotorCmd {
                direction: Direction::Backward,
                duty: 1023,
            }
        );
    }

    #[test]
    fn test_motor_cmd_duty_reclamped_on_decode() {
        // 手工构造超域占空比的载荷，模拟传输中损坏的帧
        let frame = Frame::new(ID_MOTOR_CMD, &[0x01, 0xFF, 0xFF]);
        let decoded = Message::decode(&frame).unwrap();
        assert_eq!(
            decoded,
            Message::MotorCmd {
                direction: Direction::Forward,
                duty: 1023,
            }
        );
    }

    #[test]
    fn test_negative_angle_roundtrip() {
        let msg = Message::Feedback { angle: -17 };
        assert_eq!(Message::decode(&msg.encode()), Some(msg));
    }

    #[test]
    fn test_roundtrip_all_variants() {
        let messages = [
            Message::Setpoint { angle: 100 },
            Message::Feedback { angle: 40 },
            Message::MotorCmd {
                direction: Direction::Forward,
                duty: 507,
            },
            Message::DesiredEncoder { angle: 100 },
            Message::CurrentEncoder { angle: 40 },
        ];
        for msg in messages {
            assert_eq!(Message::decode(&msg.encode()), Some(msg), "roundtrip {:?}", msg);
        }
    }

    #[test]
    fn test_unknown_id_is_not_a_message() {
        let frame = Frame::new(0x2A5, &[0x12, 0x34]);
        assert_eq!(Message::decode(&frame), None);
    }

    #[test]
    fn test_wrong_length_is_not_a_message() {
        // 已知标识符 + 错误长度：不允许按长度重载，整帧丢弃
        assert_eq!(Message::decode(&Frame::new(ID_SETPOINT, &[0x12])), None);
        assert_eq!(Message::decode(&Frame::new(ID_SETPOINT, &[1, 2, 3])), None);
        assert_eq!(Message::decode(&Frame::new(ID_MOTOR_CMD, &[0x01, 0x34])), None);
        assert_eq!(Message::decode(&Frame::new(ID_CURRENT_ENCODER, &[])), None);
    }

    #[test]
    fn test_invalid_direction_byte_is_not_a_message() {
        let frame = Frame::new(ID_MOTOR_CMD, &[0x02, 0x00, 0x01]);
        assert_eq!(Message::decode(&frame), None);
    }

    #[test]
    fn test_direction_byte_conversion() {
        assert_eq!(u8::from(Direction::Backward), 0);
        assert_eq!(u8::from(Direction::Forward), 1);
        assert_eq!(Direction::try_from(1).unwrap(), Direction::Forward);
        assert!(Direction::try_from(7).is_err());
    }
}
