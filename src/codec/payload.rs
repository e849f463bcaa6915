//! Typed payload encoding and decoding.
//!
//! [`Element`] covers the scalar kinds the protocol knows. [`PayloadValue`]
//! is what register reads and writes are generic over: single elements,
//! fixed arrays, vectors, and bit-set flag types.

use bytes::Bytes;

use super::timestamped::Timestamped;
use crate::error::{HarpError, Result};
use crate::protocol::{ElementType, Message, MessageType, PayloadType, Timestamp};

/// A scalar that can be stored in a payload.
pub trait Element: Copy + Default + Send + Sync + 'static {
    /// Wire element kind.
    const TYPE: ElementType;

    /// Append the little endian encoding.
    fn write_le(self, buf: &mut Vec<u8>);

    /// Read from exactly `TYPE.size()` little endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl Element for $ty {
                const TYPE: ElementType = ElementType::$kind;

                #[inline]
                fn write_le(self, buf: &mut Vec<u8>) {
                    buf.extend_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    const SIZE: usize = std::mem::size_of::<$ty>();
                    let mut raw = [0u8; SIZE];
                    raw.copy_from_slice(&bytes[..SIZE]);
                    <$ty>::from_le_bytes(raw)
                }
            }

            impl PayloadValue for $ty {
                const ELEMENT: ElementType = ElementType::$kind;
                const COUNT: Option<usize> = Some(1);

                fn to_payload(&self) -> Bytes {
                    Bytes::copy_from_slice(&self.to_le_bytes())
                }

                fn from_elements(bytes: &[u8]) -> Self {
                    <$ty as Element>::read_le(bytes)
                }
            }
        )*
    };
}

impl_element! {
    u8 => U8,
    i8 => S8,
    u16 => U16,
    i16 => S16,
    u32 => U32,
    i32 => S32,
    u64 => U64,
    i64 => S64,
    f32 => Float,
}

/// A value that can be carried as a message payload.
pub trait PayloadValue: Sized {
    /// Element kind of the payload.
    const ELEMENT: ElementType;

    /// Required element count, or `None` for any non-zero count.
    const COUNT: Option<usize>;

    /// Encode as payload bytes.
    fn to_payload(&self) -> Bytes;

    /// Decode from payload bytes already checked with [`PayloadValue::accepts`].
    fn from_elements(bytes: &[u8]) -> Self;

    /// Payload type for this value, without timestamp.
    fn payload_type() -> PayloadType {
        PayloadType::new(Self::ELEMENT)
    }

    /// Check if a payload of `count` elements of `element` decodes as `Self`.
    fn accepts(element: ElementType, count: usize) -> bool {
        element == Self::ELEMENT
            && match Self::COUNT {
                Some(n) => n == count,
                None => count > 0,
            }
    }
}

impl<T: Element, const N: usize> PayloadValue for [T; N] {
    const ELEMENT: ElementType = T::TYPE;
    const COUNT: Option<usize> = Some(N);

    fn accepts(element: ElementType, count: usize) -> bool {
        N > 0 && element == Self::ELEMENT && count == N
    }

    fn to_payload(&self) -> Bytes {
        let mut buf = Vec::with_capacity(N * T::TYPE.size());
        for v in self {
            v.write_le(&mut buf);
        }
        Bytes::from(buf)
    }

    fn from_elements(bytes: &[u8]) -> Self {
        let mut chunks = bytes.chunks_exact(T::TYPE.size());
        std::array::from_fn(|_| chunks.next().map(T::read_le).unwrap_or_default())
    }
}

impl<T: Element> PayloadValue for Vec<T> {
    const ELEMENT: ElementType = T::TYPE;
    const COUNT: Option<usize> = None;

    fn to_payload(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.len() * T::TYPE.size());
        for v in self {
            v.write_le(&mut buf);
        }
        Bytes::from(buf)
    }

    fn from_elements(bytes: &[u8]) -> Self {
        bytes.chunks_exact(T::TYPE.size()).map(T::read_le).collect()
    }
}

/// Implement [`PayloadValue`] for a `bitflags` type by delegating to its bits.
macro_rules! flags_payload {
    ($flags:ty, $bits:ty) => {
        impl $crate::codec::PayloadValue for $flags {
            const ELEMENT: $crate::protocol::ElementType =
                <$bits as $crate::codec::Element>::TYPE;
            const COUNT: Option<usize> = Some(1);

            fn to_payload(&self) -> ::bytes::Bytes {
                $crate::codec::PayloadValue::to_payload(&self.bits())
            }

            fn from_elements(bytes: &[u8]) -> Self {
                Self::from_bits_retain(<$bits as $crate::codec::PayloadValue>::from_elements(
                    bytes,
                ))
            }
        }
    };
}
pub(crate) use flags_payload;

impl Message {
    /// Decode the payload as `T`.
    ///
    /// Fails with `PayloadTypeMismatch` if the declared payload type or
    /// element count disagrees with `T`.
    pub fn payload<T: PayloadValue>(&self) -> Result<T> {
        let element = self.payload_type().element;
        let count = self.element_count();
        if !T::accepts(element, count) {
            return Err(HarpError::PayloadTypeMismatch(format!(
                "register {} carries {count} x {element}, requested {}",
                self.address(),
                describe::<T>()
            )));
        }
        Ok(T::from_elements(self.payload_bytes()))
    }

    /// Decode the payload as `T` together with the message timestamp.
    pub fn timestamped_payload<T: PayloadValue>(&self) -> Result<Timestamped<T>> {
        let timestamp = self.timestamp().ok_or_else(|| {
            HarpError::PayloadTypeMismatch(format!(
                "register {} message carries no timestamp",
                self.address()
            ))
        })?;
        let value = self.payload::<T>()?;
        Ok(Timestamped::new(value, timestamp.as_seconds()))
    }

    /// Build a message carrying `value`.
    pub fn from_payload<T: PayloadValue>(
        address: u8,
        message_type: MessageType,
        value: &T,
    ) -> Result<Self> {
        Message::new(
            address,
            message_type,
            T::payload_type(),
            value.to_payload(),
            None,
        )
    }

    /// Build a timestamped message carrying `value`.
    pub fn from_timestamped_payload<T: PayloadValue>(
        address: u8,
        seconds: f64,
        message_type: MessageType,
        value: &T,
    ) -> Result<Self> {
        Message::new(
            address,
            message_type,
            T::payload_type(),
            value.to_payload(),
            Some(Timestamp::from_seconds(seconds)),
        )
    }
}

fn describe<T: PayloadValue>() -> String {
    match T::COUNT {
        Some(n) => format!("{n} x {}", T::ELEMENT),
        None => format!("N x {}", T::ELEMENT),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;

    fn through_wire(message: Message) -> Message {
        decode_frame(&message.encode()).unwrap()
    }

    #[test]
    fn test_scalar_payloads() {
        let m = through_wire(Message::from_payload(33, MessageType::Write, &-150i32).unwrap());
        assert_eq!(m.payload::<i32>().unwrap(), -150);
        assert_eq!(m.payload_type().element, ElementType::S32);

        let m = through_wire(Message::from_payload(1, MessageType::Write, &u64::MAX).unwrap());
        assert_eq!(m.payload::<u64>().unwrap(), u64::MAX);

        let m = through_wire(Message::from_payload(2, MessageType::Write, &-1.5f32).unwrap());
        assert_eq!(m.payload::<f32>().unwrap(), -1.5);

        let m = through_wire(Message::from_payload(3, MessageType::Write, &i8::MIN).unwrap());
        assert_eq!(m.payload::<i8>().unwrap(), i8::MIN);
    }

    #[test]
    fn test_array_payload() {
        let value = [1u16, 2, 0xFFFF];
        let m = through_wire(Message::from_payload(12, MessageType::Write, &value).unwrap());
        assert_eq!(m.element_count(), 3);
        assert_eq!(m.payload::<[u16; 3]>().unwrap(), value);
        assert_eq!(m.payload::<Vec<u16>>().unwrap(), value.to_vec());
    }

    #[test]
    fn test_vec_payload() {
        let name: Vec<u8> = b"FastStepper".to_vec();
        let m = through_wire(Message::from_payload(12, MessageType::Write, &name).unwrap());
        assert_eq!(m.payload::<Vec<u8>>().unwrap(), name);
    }

    #[test]
    fn test_element_mismatch() {
        let m = Message::from_payload(33, MessageType::Write, &5i32).unwrap();
        assert!(matches!(
            m.payload::<u32>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
        assert!(matches!(
            m.payload::<i16>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
    }

    #[test]
    fn test_count_mismatch() {
        let m = Message::from_payload(12, MessageType::Write, &[1u8, 2]).unwrap();
        assert!(matches!(
            m.payload::<u8>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
        assert!(matches!(
            m.payload::<[u8; 3]>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
    }

    #[test]
    fn test_empty_read_is_not_a_value() {
        let m = Message::read_request(0, PayloadType::new(ElementType::U16));
        assert!(m.payload::<u16>().is_err());
        assert!(m.payload::<Vec<u16>>().is_err());
    }

    #[test]
    fn test_timestamped_payload() {
        let m = through_wire(
            Message::from_timestamped_payload(38, 101.25, MessageType::Event, &-42i16).unwrap(),
        );
        let ts = m.timestamped_payload::<i16>().unwrap();
        assert_eq!(ts.value, -42);
        assert_eq!(ts.seconds, 101.25);

        // Timestamped messages still decode as plain values.
        assert_eq!(m.payload::<i16>().unwrap(), -42);
    }

    #[test]
    fn test_timestamped_payload_requires_timestamp() {
        let m = Message::from_payload(38, MessageType::Read, &7i16).unwrap();
        assert!(matches!(
            m.timestamped_payload::<i16>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
    }

    #[test]
    fn test_oversized_vec_rejected() {
        let too_big = vec![0u32; 64];
        assert!(matches!(
            Message::from_payload(12, MessageType::Write, &too_big),
            Err(HarpError::InvalidPayloadLength { .. })
        ));
    }

    #[test]
    fn test_accepts() {
        assert!(u8::accepts(ElementType::U8, 1));
        assert!(!u8::accepts(ElementType::S8, 1));
        assert!(<[i16; 2]>::accepts(ElementType::S16, 2));
        assert!(!<[i16; 2]>::accepts(ElementType::S16, 1));
        assert!(Vec::<u8>::accepts(ElementType::U8, 25));
        assert!(!Vec::<u8>::accepts(ElementType::U8, 0));
        assert!(!<[u8; 0]>::accepts(ElementType::U8, 0));
    }

    #[test]
    fn test_empty_payload_is_not_a_zero_length_array() {
        let request = Message::read_request(12, PayloadType::new(ElementType::U8));
        assert!(matches!(
            request.payload::<[u8; 0]>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
        assert!(matches!(
            request.payload::<Vec<u8>>(),
            Err(HarpError::PayloadTypeMismatch(_))
        ));
    }
}
