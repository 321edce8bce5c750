//! 协议性质测试（proptest）
//!
//! 覆盖编解码的两条核心性质：合法消息的往返恒等，
//! 以及任意未识别帧的解码安全性。

use proptest::prelude::*;
use servolink_protocol::{
    Direction, Frame, Message, ID_CURRENT_ENCODER, ID_DESIRED_ENCODER, ID_FEEDBACK, ID_MOTOR_CMD,
    ID_SETPOINT,
};

const KNOWN_IDS: [u16; 5] = [
    ID_SETPOINT,
    ID_FEEDBACK,
    ID_MOTOR_CMD,
    ID_DESIRED_ENCODER,
    ID_CURRENT_ENCODER,
];

fn arb_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        any::<i16>().prop_map(|angle| Message::Setpoint { angle }),
        any::<i16>().prop_map(|angle| Message::Feedback { angle }),
        (any::<bool>(), 0u16..=1023).prop_map(|(forward, duty)| Message::MotorCmd {
            direction: if forward {
                Direction::Forward
            } else {
                Direction::Backward
            },
            duty,
        }),
        any::<u16>().prop_map(|angle| Message::DesiredEncoder { angle }),
        any::<u16>().prop_map(|angle| Message::CurrentEncoder { angle }),
    ]
}

proptest! {
    /// 合法域内的任意消息经 encode/decode 往返后不变
    #[test]
    fn roundtrip_is_identity(msg in arb_message()) {
        prop_assert_eq!(Message::decode(&msg.encode()), Some(msg));
    }

    /// 未识别标识符的帧无论载荷内容如何都解码为 None
    #[test]
    fn unknown_id_never_decodes(
        id in any::<u16>().prop_filter("must not be a protocol id", |id| !KNOWN_IDS.contains(id)),
        payload in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        prop_assert_eq!(Message::decode(&Frame::new(id, &payload)), None);
    }

    /// 已知标识符但载荷长度错误的帧解码为 None
    #[test]
    fn wrong_length_never_decodes(
        id in proptest::sample::select(&KNOWN_IDS[..]),
        payload in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        let expected_len = if id == ID_MOTOR_CMD { 3 } else { 2 };
        prop_assume!(payload.len() != expected_len);
        prop_assert_eq!(Message::decode(&Frame::new(id, &payload)), None);
    }

    /// 解码得到的电机指令占空比永远在合法域内
    #[test]
    fn decoded_duty_is_always_clamped(payload in proptest::collection::vec(any::<u8>(), 3..=3)) {
        if let Some(Message::MotorCmd { duty, .. }) = Message::decode(&Frame::new(ID_MOTOR_CMD, &payload)) {
            prop_assert!(duty <= 1023);
        }
    }
}
