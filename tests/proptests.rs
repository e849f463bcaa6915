//! Property tests for the frame codec.

use harp_client::protocol::{
    decode_frame, ElementType, FrameBuffer, Message, MessageType, MAX_PAYLOAD_SIZE,
    TIMESTAMP_SIZE,
};
use harp_client::HarpError;
use proptest::prelude::*;

fn s32_frame(address: u8, value: i32) -> Vec<u8> {
    Message::from_payload(address, MessageType::Write, &value)
        .unwrap()
        .encode()
}

const MAX_TIMESTAMPED_PAYLOAD: usize = MAX_PAYLOAD_SIZE - TIMESTAMP_SIZE;

fn through_wire(message: Message) -> Message {
    decode_frame(&message.encode()).unwrap()
}

/// Device times with a fraction exact in 32.32 fixed point.
fn seconds() -> impl Strategy<Value = f64> {
    (any::<u32>(), any::<u16>()).prop_map(|(whole, fraction)| whole as f64 + fraction as f64 / 65536.0)
}

fn finite_f32() -> impl Strategy<Value = f32> {
    use prop::num::f32::{INFINITE, NEGATIVE, NORMAL, POSITIVE, SUBNORMAL, ZERO};
    POSITIVE | NEGATIVE | NORMAL | SUBNORMAL | ZERO | INFINITE
}

/// Encoded messages decode to the same address, type, value and time, for
/// single values and arrays of every element kind.
macro_rules! round_trip {
    ($($name:ident: $ty:ty => $kind:ident, $strategy:expr;)*) => {
        proptest! {
            $(
                #[test]
                fn $name(
                    address in any::<u8>(),
                    event in any::<bool>(),
                    scalar in $strategy,
                    values in prop::collection::vec(
                        $strategy,
                        1..=MAX_TIMESTAMPED_PAYLOAD / std::mem::size_of::<$ty>(),
                    ),
                    seconds in seconds(),
                ) {
                    let message_type = if event { MessageType::Event } else { MessageType::Write };

                    let decoded = through_wire(Message::from_payload(address, message_type, &scalar).unwrap());
                    prop_assert_eq!(decoded.address(), address);
                    prop_assert_eq!(decoded.message_type(), message_type);
                    prop_assert_eq!(decoded.payload_type().element, ElementType::$kind);
                    prop_assert!(decoded.timestamp().is_none());
                    prop_assert_eq!(decoded.payload::<$ty>().unwrap(), scalar);

                    let decoded = through_wire(
                        Message::from_timestamped_payload(address, seconds, message_type, &scalar).unwrap(),
                    );
                    let timed = decoded.timestamped_payload::<$ty>().unwrap();
                    prop_assert_eq!(timed.value, scalar);
                    prop_assert_eq!(timed.seconds, seconds);

                    let decoded = through_wire(Message::from_payload(address, message_type, &values).unwrap());
                    prop_assert_eq!(decoded.payload::<Vec<$ty>>().unwrap(), values.clone());

                    let decoded = through_wire(
                        Message::from_timestamped_payload(address, seconds, message_type, &values).unwrap(),
                    );
                    prop_assert_eq!(decoded.address(), address);
                    prop_assert_eq!(decoded.element_count(), values.len());
                    let timed = decoded.timestamped_payload::<Vec<$ty>>().unwrap();
                    prop_assert_eq!(timed.value, values);
                    prop_assert_eq!(timed.seconds, seconds);
                }
            )*
        }
    };
}

round_trip! {
    prop_round_trip_u8: u8 => U8, any::<u8>();
    prop_round_trip_i8: i8 => S8, any::<i8>();
    prop_round_trip_u16: u16 => U16, any::<u16>();
    prop_round_trip_i16: i16 => S16, any::<i16>();
    prop_round_trip_u32: u32 => U32, any::<u32>();
    prop_round_trip_i32: i32 => S32, any::<i32>();
    prop_round_trip_u64: u64 => U64, any::<u64>();
    prop_round_trip_i64: i64 => S64, any::<i64>();
    prop_round_trip_f32: f32 => Float, finite_f32();
}

proptest! {
    /// Arbitrary input never panics the decoder.
    #[test]
    fn prop_decode_is_total(bytes in prop::collection::vec(any::<u8>(), 0..300)) {
        let _ = decode_frame(&bytes);
    }

    /// Arbitrary chunked input never panics reassembly, and every byte is
    /// either buffered, skipped, or part of a reported candidate.
    #[test]
    fn prop_frame_buffer_is_total(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..20)
    ) {
        let mut buffer = FrameBuffer::new();
        for chunk in &chunks {
            let _ = buffer.push(chunk);
        }
        prop_assert!(buffer.len() <= chunks.iter().map(Vec::len).sum::<usize>());
    }

    /// Any proper prefix of a valid frame is malformed.
    #[test]
    fn prop_truncated_frame_is_malformed(address in any::<u8>(), value in any::<i32>(), cut in 0usize..10) {
        let frame = s32_frame(address, value);
        let cut = cut % frame.len();
        let result = decode_frame(&frame[..cut]);
        prop_assert!(matches!(result, Err(HarpError::MalformedFrame(_))), "{:?}", result);
    }

    /// Corrupting any byte other than the length yields a checksum mismatch.
    #[test]
    fn prop_single_byte_corruption_is_detected(
        address in any::<u8>(),
        value in any::<i32>(),
        index in 0usize..10,
        mask in 1u8..=255,
    ) {
        prop_assume!(index != 1);
        let mut frame = s32_frame(address, value);
        frame[index] ^= mask;
        let result = decode_frame(&frame);
        prop_assert!(matches!(result, Err(HarpError::ChecksumMismatch { .. })), "{:?}", result);
    }

    /// Frames survive being split at arbitrary points.
    #[test]
    fn prop_reassembly_any_split(values in prop::collection::vec(any::<u32>(), 1..8), split in any::<prop::sample::Index>()) {
        let mut stream = Vec::new();
        for (i, value) in values.iter().enumerate() {
            stream.extend(Message::from_payload(i as u8, MessageType::Read, value).unwrap().encode());
        }
        let at = split.index(stream.len());

        let mut buffer = FrameBuffer::new();
        let mut decoded = buffer.push(&stream[..at]);
        decoded.extend(buffer.push(&stream[at..]));

        let decoded: Vec<u32> = decoded.into_iter().map(|r| r.unwrap().payload::<u32>().unwrap()).collect();
        prop_assert_eq!(decoded, values);
    }
}
