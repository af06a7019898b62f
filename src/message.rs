use std::any::Any;
use std::fmt;

/// A single message, dynamically typed.
///
/// Actors exchange values of any `Send` type; the receiving side picks
/// messages apart again with the pattern constructors in [`crate::receive`].
pub struct Payload(Box<dyn Any + Send>);

impl Payload {
    pub fn new<M: Any + Send>(msg: M) -> Payload {
        Payload(Box::new(msg))
    }

    /// Tests whether the contained message is of type `M`.
    pub fn is<M: Any>(&self) -> bool {
        self.0.is::<M>()
    }

    /// Takes the message out if it is of type `M`, otherwise hands the
    /// payload back untouched.
    pub fn downcast<M: Any>(self) -> Result<M, Payload> {
        match self.0.downcast::<M>() {
            Ok(msg) => Ok(*msg),
            Err(other) => Err(Payload(other)),
        }
    }

    pub fn downcast_ref<M: Any>(&self) -> Option<&M> {
        self.0.downcast_ref::<M>()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Payload")
    }
}

/// Sentinel delivered to a `receive_within`/`react_within` handler when the
/// deadline elapses before any matching message arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_round_trip() {
        let payload = Payload::new(42u32);
        assert!(payload.is::<u32>());
        assert!(!payload.is::<String>());
        assert_eq!(payload.downcast::<u32>().unwrap(), 42u32);
    }

    #[test]
    fn failed_downcast_returns_payload() {
        let payload = Payload::new("hello".to_string());
        let payload = payload.downcast::<u32>().unwrap_err();
        assert_eq!(payload.downcast::<String>().unwrap(), "hello");
    }
}
