//! Extension validation against an [`ExtensionPolicy`].
//!
//! Validation looks only at the extension field. Payload presence is a
//! separate concern: absent and empty payloads both pass through unchanged
//! and are never treated as "missing extension".

use super::policy::{ExtensionPolicy, ExtensionRequirement};
use crate::error::{HalfDuplexError, Rejection, Result};
use crate::protocol::{Direction, Frame, FrameType};

/// Outcome of validating one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Accepted,
    Rejected(Rejection),
}

impl Validation {
    #[inline]
    pub fn is_accepted(self) -> bool {
        matches!(self, Validation::Accepted)
    }

    /// Convert into a typed error for callers that propagate with `?`.
    pub fn into_result(self, frame_type: FrameType, direction: Direction) -> Result<()> {
        match self {
            Validation::Accepted => Ok(()),
            Validation::Rejected(Rejection::UnexpectedExtension) => {
                Err(HalfDuplexError::UnexpectedExtension {
                    frame_type,
                    direction,
                })
            }
            Validation::Rejected(_) => Err(HalfDuplexError::MissingExtension {
                frame_type,
                direction,
            }),
        }
    }
}

/// Checks extension presence against a policy fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct ExtensionValidator {
    policy: ExtensionPolicy,
}

impl ExtensionValidator {
    pub fn new(policy: ExtensionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ExtensionPolicy {
        &self.policy
    }

    /// Validate an extension field. An empty-but-present extension counts as
    /// present.
    pub fn validate(
        &self,
        frame_type: FrameType,
        direction: Direction,
        extension: Option<&[u8]>,
    ) -> Validation {
        match (self.policy.requirement(frame_type, direction), extension) {
            (ExtensionRequirement::Required, None) => {
                Validation::Rejected(Rejection::MissingExtension)
            }
            (ExtensionRequirement::Forbidden, Some(_)) => {
                Validation::Rejected(Rejection::UnexpectedExtension)
            }
            _ => Validation::Accepted,
        }
    }

    pub fn validate_frame(&self, frame: &Frame) -> Validation {
        self.validate(frame.frame_type(), frame.direction, frame.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StreamId;
    use bytes::Bytes;

    const I2A: Direction = Direction::InitiatorToAcceptor;
    const A2I: Direction = Direction::AcceptorToInitiator;

    fn validator() -> ExtensionValidator {
        ExtensionValidator::new(
            ExtensionPolicy::new()
                .require(FrameType::Data, I2A)
                .require(FrameType::Flush, I2A)
                .forbid(FrameType::Data, A2I),
        )
    }

    #[test]
    fn test_required_missing_is_rejected() {
        assert_eq!(
            validator().validate(FrameType::Data, I2A, None),
            Validation::Rejected(Rejection::MissingExtension)
        );
    }

    #[test]
    fn test_required_present_is_accepted() {
        assert!(validator().validate(FrameType::Data, I2A, Some(b"ext")).is_accepted());
        // empty but present still satisfies the requirement
        assert!(validator().validate(FrameType::Data, I2A, Some(b"")).is_accepted());
    }

    #[test]
    fn test_forbidden_present_is_rejected() {
        assert_eq!(
            validator().validate(FrameType::Data, A2I, Some(b"x")),
            Validation::Rejected(Rejection::UnexpectedExtension)
        );
        assert!(validator().validate(FrameType::Data, A2I, None).is_accepted());
    }

    #[test]
    fn test_optional_accepts_both() {
        let v = validator();
        assert!(v.validate(FrameType::End, I2A, None).is_accepted());
        assert!(v.validate(FrameType::End, I2A, Some(b"e")).is_accepted());
    }

    #[test]
    fn test_payload_shape_does_not_affect_validation() {
        let v = validator();
        let sid = StreamId(1);
        let shapes = [None, Some(Bytes::new()), Some(Bytes::from_static(b"hello"))];

        for payload in shapes {
            let with_ext = Frame::flush(sid, I2A, payload.clone()).with_extension(Bytes::from_static(b"e"));
            let without_ext = Frame::flush(sid, I2A, payload);
            assert!(v.validate_frame(&with_ext).is_accepted());
            assert_eq!(
                v.validate_frame(&without_ext),
                Validation::Rejected(Rejection::MissingExtension)
            );
        }
    }

    #[test]
    fn test_into_result_maps_errors() {
        let err = Validation::Rejected(Rejection::MissingExtension)
            .into_result(FrameType::Data, I2A)
            .unwrap_err();
        assert!(matches!(err, HalfDuplexError::MissingExtension { .. }));

        let err = Validation::Rejected(Rejection::UnexpectedExtension)
            .into_result(FrameType::Data, A2I)
            .unwrap_err();
        assert!(matches!(err, HalfDuplexError::UnexpectedExtension { .. }));

        assert!(Validation::Accepted.into_result(FrameType::End, I2A).is_ok());
    }
}
