use bytes::{Bytes, BytesMut};
use std::any::Any;
use std::fmt;

/// Represents an object flowing through a pipeline.
///
/// Transports only ever produce and consume [`Message::Buffer`]; everything between
/// the head and the tail of a pipeline may transform buffers into typed objects
/// (a decoded frame, a parsed record) and back.
pub enum Message {
    /// A chunk of raw bytes
    Buffer(BytesMut),
    /// Any typed object produced by a handler
    Object(Box<dyn Any + Send>),
}

impl Message {
    /// Wraps a typed object into a message
    pub fn object<T: Any + Send>(value: T) -> Self {
        Self::Object(Box::new(value))
    }

    /// Returns true if this message is a byte buffer
    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self, Message::Buffer(_))
    }

    /// Returns true if this message is a typed object
    #[inline]
    pub fn is_object(&self) -> bool {
        matches!(self, Message::Object(_))
    }

    /// Returns a reference to the contained bytes if this is a Buffer
    pub fn as_buffer(&self) -> Option<&BytesMut> {
        match self {
            Message::Buffer(buf) => Some(buf),
            Message::Object(_) => None,
        }
    }

    /// Consumes the message and returns the contained bytes if this is a Buffer
    pub fn into_buffer(self) -> Option<BytesMut> {
        match self {
            Message::Buffer(buf) => Some(buf),
            Message::Object(_) => None,
        }
    }

    /// Returns a reference to the contained object if it is of type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Message::Buffer(_) => None,
            Message::Object(object) => object.downcast_ref::<T>(),
        }
    }

    /// Consumes the message and returns the contained object if it is of type `T`
    ///
    /// On mismatch the original message is handed back so it can keep flowing.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self {
            Message::Object(object) => match object.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(object) => Err(Message::Object(object)),
            },
            buffer @ Message::Buffer(_) => Err(buffer),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Buffer(buf) => f.debug_tuple("Buffer").field(&buf.len()).finish(),
            Message::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<BytesMut> for Message {
    fn from(buf: BytesMut) -> Self {
        Self::Buffer(buf)
    }
}

impl From<Bytes> for Message {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(BytesMut::from(&bytes[..]))
    }
}

impl From<&'static [u8]> for Message {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Buffer(BytesMut::from(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_mismatch_returns_message() {
        let message = Message::object(42_u32);
        let message = message.downcast::<String>().unwrap_err();
        assert_eq!(message.downcast_ref::<u32>(), Some(&42));
        assert_eq!(message.downcast::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_buffer_is_not_object() {
        let message = Message::from(&b"hello"[..]);
        assert!(message.is_buffer());
        assert!(!message.is_object());
        assert_eq!(message.downcast_ref::<BytesMut>(), None);
        assert_eq!(&message.into_buffer().unwrap()[..], b"hello");
    }
}
