//! Helper argument parsing: literal values vs `$field` references.
//!
//! A raw argument starting with `$` is a reference to an event field; the
//! remainder is translated from dotted form to a JSON pointer path once, at
//! build time (`a.b.c` → `/a/b/c`, with `/` and `~` escaped per RFC 6901).
//! Every other argument is an opaque literal. Quoting conventions belong to
//! the document parser, not this layer.

use crate::error::BuildError;

/// Marker that turns an argument into a field reference.
pub const REFERENCE_ANCHOR: char = '$';

/// A parsed helper argument, immutable after parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parameter {
    /// A literal value, kept verbatim.
    Value(String),
    /// A reference, carrying the translated pointer path.
    Reference(String),
}

impl Parameter {
    /// The carried string: the literal for values, the pointer path for
    /// references. This is what trace formatting shows.
    pub fn raw(&self) -> &str {
        match self {
            Parameter::Value(s) | Parameter::Reference(s) => s,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Parameter::Reference(_))
    }
}

/// Parse a list of raw arguments into parameters.
pub fn parse_parameters(args: &[String]) -> Result<Vec<Parameter>, BuildError> {
    args.iter()
        .map(|arg| {
            if let Some(rest) = arg.strip_prefix(REFERENCE_ANCHOR) {
                Ok(Parameter::Reference(reference_to_pointer(rest)?))
            } else {
                Ok(Parameter::Value(arg.clone()))
            }
        })
        .collect()
}

/// Translate a dotted field reference (without its `$`) to a pointer path.
///
/// Fails on an empty reference or empty segments (`a..b`).
pub fn reference_to_pointer(field: &str) -> Result<String, BuildError> {
    if field.is_empty() {
        return Err(BuildError::InvalidReference(field.to_owned()));
    }
    let mut path = String::with_capacity(field.len() + 1);
    for segment in field.split('.') {
        if segment.is_empty() {
            return Err(BuildError::InvalidReference(field.to_owned()));
        }
        path.push('/');
        path.push_str(&segment.replace('~', "~0").replace('/', "~1"));
    }
    Ok(path)
}

/// Translate an asset-document field key (dotted, no `$`) to a pointer path.
///
/// Same translation as references; exposed separately because document keys
/// and reference arguments arrive through different layers.
pub fn field_to_pointer(field: &str) -> Result<String, BuildError> {
    reference_to_pointer(field)
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        // Any dotted reference built from clean segments translates to the
        // slash-joined pointer path.
        #[test]
        fn translation_joins_segments(
            segments in prop::collection::vec("[A-Za-z0-9_]{1,8}", 1..5)
        ) {
            let reference = segments.join(".");
            let pointer = reference_to_pointer(&reference).unwrap();
            prop_assert_eq!(pointer, format!("/{}", segments.join("/")));
        }
    }
}
