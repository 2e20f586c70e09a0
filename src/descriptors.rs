//! Light-weight descriptor parsing
//!
//! The writer treats descriptors as opaque strings for serialization purposes, but needs three
//! facts out of them: that they are well formed, how many variable slots their types occupy, and
//! (for frames) which verification type each parameter maps to.

use crate::class_file::{ConstantPool, VerificationType};
use crate::errors::Error;

/// Parse one field type starting at `at`, returning the index just past it
fn parse_field_type(descriptor: &str, at: usize) -> Option<usize> {
    let bytes = descriptor.as_bytes();
    match bytes.get(at)? {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => Some(at + 1),
        b'[' => parse_field_type(descriptor, at + 1),
        b'L' => {
            let semicolon = descriptor[at + 1..].find(';')?;
            if semicolon == 0 {
                None
            } else {
                Some(at + 1 + semicolon + 1)
            }
        }
        _ => None,
    }
}

/// Check that a string is exactly one field descriptor
pub fn check_field_descriptor(descriptor: &str) -> Result<(), Error> {
    match parse_field_type(descriptor, 0) {
        Some(end) if end == descriptor.len() => Ok(()),
        _ => Err(Error::InvalidDescriptor(descriptor.to_owned())),
    }
}

/// Check that a string is exactly one method descriptor
pub fn check_method_descriptor(descriptor: &str) -> Result<(), Error> {
    let err = || Error::InvalidDescriptor(descriptor.to_owned());

    if !descriptor.starts_with('(') {
        return Err(err());
    }
    let close = descriptor.find(')').ok_or_else(err)?;

    let mut at = 1;
    while at < close {
        at = parse_field_type(descriptor, at).ok_or_else(err)?;
    }
    if at != close {
        return Err(err());
    }

    let return_at = close + 1;
    if &descriptor[return_at..] == "V" {
        return Ok(());
    }
    match parse_field_type(descriptor, return_at) {
        Some(end) if end == descriptor.len() => Ok(()),
        _ => Err(err()),
    }
}

/// Number of variable slots a single field type occupies (2 for `J` and `D`, else 1)
pub fn field_slots(descriptor: &str) -> i32 {
    match descriptor.as_bytes().first() {
        Some(b'J') | Some(b'D') => 2,
        _ => 1,
    }
}

/// Slots occupied by the arguments of a method descriptor (receiver not included)
pub fn argument_slots(descriptor: &str) -> u16 {
    let close = descriptor.find(')').unwrap_or(descriptor.len());
    let mut slots = 0u16;
    let mut at = 1;
    while at < close {
        let end = match parse_field_type(descriptor, at) {
            Some(end) => end,
            None => break,
        };
        slots += field_slots(&descriptor[at..]) as u16;
        at = end;
    }
    slots
}

/// Slots occupied by the return value of a method descriptor (0, 1 or 2)
pub fn return_slots(descriptor: &str) -> u16 {
    match descriptor.rfind(')') {
        Some(close) => match descriptor.as_bytes().get(close + 1) {
            Some(b'V') => 0,
            Some(b'J') | Some(b'D') => 2,
            _ => 1,
        },
        None => 0,
    }
}

/// Stack height change of invoking a method with this descriptor (receiver not included)
pub fn invoke_stack_delta(descriptor: &str) -> i32 {
    return_slots(descriptor) as i32 - argument_slots(descriptor) as i32
}

/// Verification types of the parameters, in declaration order
///
/// One entry per parameter; `Long`/`Double` cover their phantom slot implicitly. Class names
/// referenced by object types are interned into the pool.
pub fn argument_verification_types(
    descriptor: &str,
    pool: &mut ConstantPool,
) -> Result<Vec<VerificationType>, Error> {
    let close = descriptor
        .find(')')
        .ok_or_else(|| Error::InvalidDescriptor(descriptor.to_owned()))?;

    let mut types = vec![];
    let mut at = 1;
    while at < close {
        let end = parse_field_type(descriptor, at)
            .ok_or_else(|| Error::InvalidDescriptor(descriptor.to_owned()))?;
        let argument = &descriptor[at..end];
        types.push(match argument.as_bytes()[0] {
            b'B' | b'C' | b'I' | b'S' | b'Z' => VerificationType::Integer,
            b'F' => VerificationType::Float,
            b'J' => VerificationType::Long,
            b'D' => VerificationType::Double,
            // `Lfoo/Bar;` names the class `foo/Bar`; array types use the whole descriptor
            b'L' => {
                VerificationType::Object(pool.intern_class(&argument[1..argument.len() - 1])?)
            }
            _ => VerificationType::Object(pool.intern_class(argument)?),
        });
        at = end;
    }
    Ok(types)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn well_formed_field_descriptors() {
        for descriptor in ["I", "J", "Ljava/lang/String;", "[[D", "[Ljava/lang/Object;"] {
            assert!(check_field_descriptor(descriptor).is_ok(), "{}", descriptor);
        }
    }

    #[test]
    fn malformed_field_descriptors() {
        for descriptor in ["", "II", "L;", "Ljava/lang/String", "[", "Q"] {
            assert!(check_field_descriptor(descriptor).is_err(), "{}", descriptor);
        }
    }

    #[test]
    fn well_formed_method_descriptors() {
        for descriptor in ["()V", "(IJ)I", "(Ljava/lang/String;[B)Ljava/lang/Object;"] {
            assert!(
                check_method_descriptor(descriptor).is_ok(),
                "{}",
                descriptor
            );
        }
    }

    #[test]
    fn malformed_method_descriptors() {
        for descriptor in ["", "()", "(V)V", "I", "(I", "()VV"] {
            assert!(
                check_method_descriptor(descriptor).is_err(),
                "{}",
                descriptor
            );
        }
    }

    #[test]
    fn slot_accounting() {
        assert_eq!(argument_slots("(IJD)V"), 5);
        assert_eq!(argument_slots("()D"), 0);
        assert_eq!(return_slots("(IJD)V"), 0);
        assert_eq!(return_slots("()D"), 2);
        assert_eq!(invoke_stack_delta("(IJD)V"), -5);
        assert_eq!(invoke_stack_delta("(I)J"), 1);
    }
}
