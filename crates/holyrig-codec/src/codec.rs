//! The template codec: parameter bindings in, frame bytes out, and back.
//!
//! [`encode`] and [`decode`] are a pure function pair over a
//! [`FrameTemplate`]. All model-specific knowledge arrives as data: the
//! template itself, the enum member-to-wire-value tables, and the transform
//! order. The codec holds no state, so compiled templates can be shared
//! freely between rig tasks.

use std::collections::BTreeMap;

use holyrig_core::{Error, Result, Value, ValueType};

use crate::frame::FrameTemplate;

/// Enum member-to-wire-value tables, keyed by enum name then member name.
///
/// A member missing from its table is unsupported by the model; encoding it
/// fails with [`Error::UnsupportedEnumMember`].
pub type EnumValues = BTreeMap<String, BTreeMap<String, u32>>;

/// Which way the add/multiply transform composes.
///
/// Radio definition files disagree on the order; a model file selects the
/// variant it was written against via `general.transform`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransformOrder {
    /// Encode as `round(round(value + add) * multiply)`.
    #[default]
    AddThenMultiply,
    /// Encode as `round(round(value * multiply) + add)`.
    MultiplyThenAdd,
}

impl TransformOrder {
    /// Apply the forward (encode-direction) transform. Rounds half-to-even
    /// at each step.
    pub fn apply(&self, value: i64, add: f64, multiply: f64) -> Result<i64> {
        let raw = match self {
            TransformOrder::AddThenMultiply => {
                ((value as f64 + add).round_ties_even() * multiply).round_ties_even()
            }
            TransformOrder::MultiplyThenAdd => {
                ((value as f64 * multiply).round_ties_even() + add).round_ties_even()
            }
        };
        checked_to_i64(raw)
    }

    /// Invert the transform for a decoded wire value.
    pub fn invert(&self, raw: i64, add: f64, multiply: f64) -> Result<i64> {
        if multiply == 0.0 {
            return Err(Error::Protocol("multiply factor of zero".into()));
        }
        let value = match self {
            TransformOrder::AddThenMultiply => (raw as f64 / multiply - add).round_ties_even(),
            TransformOrder::MultiplyThenAdd => ((raw as f64 - add) / multiply).round_ties_even(),
        };
        checked_to_i64(value)
    }
}

fn checked_to_i64(value: f64) -> Result<i64> {
    if !value.is_finite() || value < i64::MIN as f64 || value > i64::MAX as f64 {
        return Err(Error::ValueOutOfRange(format!(
            "transformed value {value} is not representable"
        )));
    }
    Ok(value as i64)
}

/// Build the outbound frame for `template` from typed parameter bindings.
///
/// Every field in the template must be bound, and every binding must name a
/// field. Unknown slots not covered by a field are emitted as 0x00.
pub fn encode(
    template: &FrameTemplate,
    bindings: &BTreeMap<String, Value>,
    enums: &EnumValues,
    order: TransformOrder,
) -> Result<Vec<u8>> {
    for name in bindings.keys() {
        if !template.fields.contains_key(name) {
            return Err(Error::InvalidParameter(format!("unknown parameter: {name}")));
        }
    }

    let mut frame = template.pattern.to_bytes();
    for (name, spec) in &template.fields {
        let value = bindings
            .get(name)
            .ok_or_else(|| Error::InvalidParameter(format!("missing parameter: {name}")))?;
        let ty = template
            .types
            .get(name)
            .ok_or_else(|| Error::Protocol(format!("field {name} has no declared type")))?;
        let raw = raw_value(name, value, ty, enums)?;
        let raw = order.apply(raw, spec.add, spec.multiply)?;
        let bytes = spec.format.encode(raw, spec.width())?;

        let end = spec.index + spec.width();
        if end > frame.len() {
            return Err(Error::Protocol(format!(
                "field {name} extends past the frame ({end} > {})",
                frame.len()
            )));
        }
        frame[spec.index..end].copy_from_slice(&bytes);
    }
    Ok(frame)
}

/// Check `reply` against the template's reply spec and extract its fields.
///
/// Validation happens before extraction: a mask mismatch fails the whole
/// reply with [`Error::ReplyValidationFailed`] and nothing is decoded.
pub fn decode(
    template: &FrameTemplate,
    reply: &[u8],
    enums: &EnumValues,
    order: TransformOrder,
) -> Result<BTreeMap<String, Value>> {
    if let Some(spec) = &template.reply {
        spec.check(reply)?;
    }

    let mut values = BTreeMap::new();
    for (name, spec) in &template.fields {
        let end = spec.index + spec.width();
        if end > reply.len() {
            return Err(Error::ReplyValidationFailed(format!(
                "field {name} extends past the reply ({end} > {})",
                reply.len()
            )));
        }
        let raw = spec.format.decode(&reply[spec.index..end])?;
        let raw = order.invert(raw, spec.add, spec.multiply)?;
        let ty = template
            .types
            .get(name)
            .ok_or_else(|| Error::Protocol(format!("field {name} has no declared type")))?;
        values.insert(name.clone(), typed_value(raw, ty, enums)?);
    }
    Ok(values)
}

/// Resolve a typed binding to the raw integer the wire format carries.
fn raw_value(name: &str, value: &Value, ty: &ValueType, enums: &EnumValues) -> Result<i64> {
    if !value.matches(ty) {
        return Err(Error::InvalidParameter(format!(
            "parameter {name} expects {ty}, got {value}"
        )));
    }
    match value {
        Value::Int(n) => Ok(i64::from(*n)),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Member(member) => {
            let ValueType::Enum(enum_name) = ty else {
                unreachable!("matches() guarantees the enum shape");
            };
            enums
                .get(enum_name)
                .and_then(|table| table.get(member))
                .map(|raw| i64::from(*raw))
                .ok_or_else(|| Error::UnsupportedEnumMember {
                    enum_name: enum_name.clone(),
                    member: member.clone(),
                })
        }
    }
}

/// Coerce a decoded raw integer back to the declared type.
fn typed_value(raw: i64, ty: &ValueType, enums: &EnumValues) -> Result<Value> {
    match ty {
        ValueType::Int => u32::try_from(raw).map(Value::Int).map_err(|_| {
            Error::ValueOutOfRange(format!("decoded value {raw} does not fit an unsigned 32-bit integer"))
        }),
        ValueType::Bool => Ok(Value::Bool(raw != 0)),
        ValueType::Enum(enum_name) => {
            let wire = u32::try_from(raw).map_err(|_| {
                Error::ValueOutOfRange(format!("decoded value {raw} is not a valid enum wire value"))
            })?;
            let table = enums.get(enum_name).ok_or_else(|| Error::Protocol(format!(
                "no value table for enum {enum_name}"
            )))?;
            table
                .iter()
                .find(|(_, v)| **v == wire)
                .map(|(member, _)| Value::Member(member.clone()))
                .ok_or(Error::UnknownEnumValue {
                    enum_name: enum_name.clone(),
                    value: wire,
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataFormat;
    use crate::frame::{FieldSpec, FramePattern, ReplySpec};

    fn field(index: usize, length: usize, format: DataFormat) -> FieldSpec {
        FieldSpec {
            index,
            length: Some(length),
            format,
            add: 0.0,
            multiply: 1.0,
        }
    }

    fn vfo_enums() -> EnumValues {
        EnumValues::from([(
            "Vfo".to_string(),
            BTreeMap::from([("A".to_string(), 1), ("B".to_string(), 2)]),
        )])
    }

    fn set_freq_template(add: f64, multiply: f64) -> FrameTemplate {
        FrameTemplate {
            pattern: FramePattern::parse("1122.33.????????").unwrap(),
            reply: None,
            fields: BTreeMap::from([(
                "freq".to_string(),
                FieldSpec {
                    index: 3,
                    length: Some(4),
                    format: DataFormat::BcdLu,
                    add,
                    multiply,
                },
            )]),
            types: BTreeMap::from([("freq".to_string(), ValueType::Int)]),
        }
    }

    // ---------------------------------------------------------------
    // Encode
    // ---------------------------------------------------------------

    #[test]
    fn encode_set_freq_with_offset() {
        let template = set_freq_template(100.0, 1.0);
        let bindings = BTreeMap::from([("freq".to_string(), Value::Int(14_250_000))]);
        let frame = encode(&template, &bindings, &EnumValues::new(), TransformOrder::default())
            .unwrap();
        // 14_250_000 + 100 = 14_250_100, little-endian BCD in 4 bytes.
        assert_eq!(frame, vec![0x11, 0x22, 0x33, 0x00, 0x01, 0x25, 0x14]);
    }

    #[test]
    fn encode_set_freq_overflows_bcd_field() {
        // Scaling by 1000 pushes the raw value to 11 digits, past what a
        // 4-byte BCD field can carry.
        let template = set_freq_template(100.0, 1000.0);
        let bindings = BTreeMap::from([("freq".to_string(), Value::Int(14_250_000))]);
        let result = encode(&template, &bindings, &EnumValues::new(), TransformOrder::default());
        assert!(matches!(result, Err(Error::ValueOutOfRange(_))));
    }

    #[test]
    fn encode_enum_member() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("FEFE94E0.07.??.FD").unwrap(),
            reply: None,
            fields: BTreeMap::from([("target".to_string(), field(5, 1, DataFormat::IntLu))]),
            types: BTreeMap::from([("target".to_string(), ValueType::Enum("Vfo".to_string()))]),
        };
        let bindings = BTreeMap::from([("target".to_string(), Value::Member("B".to_string()))]);
        let frame = encode(&template, &bindings, &vfo_enums(), TransformOrder::default()).unwrap();
        assert_eq!(frame, vec![0xFE, 0xFE, 0x94, 0xE0, 0x07, 0x02, 0xFD]);
    }

    #[test]
    fn encode_unmapped_enum_member() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("??").unwrap(),
            reply: None,
            fields: BTreeMap::from([("target".to_string(), field(0, 1, DataFormat::IntLu))]),
            types: BTreeMap::from([("target".to_string(), ValueType::Enum("Vfo".to_string()))]),
        };
        let bindings =
            BTreeMap::from([("target".to_string(), Value::Member("Current".to_string()))]);
        let result = encode(&template, &bindings, &vfo_enums(), TransformOrder::default());
        assert!(matches!(result, Err(Error::UnsupportedEnumMember { .. })));
    }

    #[test]
    fn encode_bool_as_byte() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("1C.00.??").unwrap(),
            reply: None,
            fields: BTreeMap::from([("transmit".to_string(), field(2, 1, DataFormat::IntLu))]),
            types: BTreeMap::from([("transmit".to_string(), ValueType::Bool)]),
        };
        let on = BTreeMap::from([("transmit".to_string(), Value::Bool(true))]);
        let off = BTreeMap::from([("transmit".to_string(), Value::Bool(false))]);
        let empty = EnumValues::new();
        assert_eq!(
            encode(&template, &on, &empty, TransformOrder::default()).unwrap(),
            vec![0x1C, 0x00, 0x01]
        );
        assert_eq!(
            encode(&template, &off, &empty, TransformOrder::default()).unwrap(),
            vec![0x1C, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_missing_and_unknown_parameters() {
        let template = set_freq_template(0.0, 1.0);
        let empty = EnumValues::new();
        let result = encode(&template, &BTreeMap::new(), &empty, TransformOrder::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));

        let extra = BTreeMap::from([
            ("freq".to_string(), Value::Int(1)),
            ("vfo".to_string(), Value::Int(1)),
        ]);
        let result = encode(&template, &extra, &empty, TransformOrder::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn encode_type_mismatch() {
        let template = set_freq_template(0.0, 1.0);
        let bindings = BTreeMap::from([("freq".to_string(), Value::Bool(true))]);
        let result = encode(&template, &bindings, &EnumValues::new(), TransformOrder::default());
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    // ---------------------------------------------------------------
    // Decode
    // ---------------------------------------------------------------

    fn status_template() -> FrameTemplate {
        FrameTemplate {
            pattern: FramePattern::parse("FEFE94E0.03.FD").unwrap(),
            reply: Some(ReplySpec::Validate(
                FramePattern::parse("FEFEE094.03.????????.FD").unwrap(),
            )),
            fields: BTreeMap::from([("freq".to_string(), field(5, 4, DataFormat::BcdLu))]),
            types: BTreeMap::from([("freq".to_string(), ValueType::Int)]),
        }
    }

    #[test]
    fn decode_status_reply() {
        let template = status_template();
        let reply = [
            0xFE, 0xFE, 0xE0, 0x94, 0x03, 0x00, 0x01, 0x25, 0x14, 0xFD,
        ];
        let values =
            decode(&template, &reply, &EnumValues::new(), TransformOrder::default()).unwrap();
        assert_eq!(values["freq"], Value::Int(14_250_100));
    }

    #[test]
    fn decode_rejects_mask_mismatch() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("00").unwrap(),
            reply: Some(ReplySpec::Validate(FramePattern::parse("AA.BB.??.DD").unwrap())),
            fields: BTreeMap::new(),
            types: BTreeMap::new(),
        };
        let result = decode(
            &template,
            &[0xAA, 0xBB, 0x10, 0xDE],
            &EnumValues::new(),
            TransformOrder::default(),
        );
        assert!(matches!(result, Err(Error::ReplyValidationFailed(_))));
    }

    #[test]
    fn decode_rejects_wrong_reply_length() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("00").unwrap(),
            reply: Some(ReplySpec::Length(4)),
            fields: BTreeMap::new(),
            types: BTreeMap::new(),
        };
        let result = decode(&template, &[0x01, 0x02], &EnumValues::new(), TransformOrder::default());
        assert!(matches!(result, Err(Error::ReplyValidationFailed(_))));
    }

    #[test]
    fn decode_rejects_missing_terminator() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("00").unwrap(),
            reply: Some(ReplySpec::Terminator(b';')),
            fields: BTreeMap::new(),
            types: BTreeMap::new(),
        };
        assert!(decode(&template, b"IF000", &EnumValues::new(), TransformOrder::default()).is_err());
        assert!(decode(&template, b"IF000;", &EnumValues::new(), TransformOrder::default()).is_ok());
    }

    #[test]
    fn decode_enum_status_field() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("AA").unwrap(),
            reply: Some(ReplySpec::Length(1)),
            fields: BTreeMap::from([("vfo".to_string(), field(0, 1, DataFormat::IntLu))]),
            types: BTreeMap::from([("vfo".to_string(), ValueType::Enum("Vfo".to_string()))]),
        };
        let values = decode(&template, &[0x02], &vfo_enums(), TransformOrder::default()).unwrap();
        assert_eq!(values["vfo"], Value::Member("B".to_string()));

        let result = decode(&template, &[0x07], &vfo_enums(), TransformOrder::default());
        assert!(matches!(
            result,
            Err(Error::UnknownEnumValue { value: 7, .. })
        ));
    }

    #[test]
    fn decode_bool_status_field() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("AA").unwrap(),
            reply: Some(ReplySpec::Length(1)),
            fields: BTreeMap::from([("transmit".to_string(), field(0, 1, DataFormat::IntLu))]),
            types: BTreeMap::from([("transmit".to_string(), ValueType::Bool)]),
        };
        let empty = EnumValues::new();
        let values = decode(&template, &[0x01], &empty, TransformOrder::default()).unwrap();
        assert_eq!(values["transmit"], Value::Bool(true));
        let values = decode(&template, &[0x00], &empty, TransformOrder::default()).unwrap();
        assert_eq!(values["transmit"], Value::Bool(false));
    }

    // ---------------------------------------------------------------
    // Transforms
    // ---------------------------------------------------------------

    #[test]
    fn transform_orders_differ() {
        let add_first = TransformOrder::AddThenMultiply;
        let mul_first = TransformOrder::MultiplyThenAdd;
        assert_eq!(add_first.apply(10, 5.0, 2.0).unwrap(), 30);
        assert_eq!(mul_first.apply(10, 5.0, 2.0).unwrap(), 25);
    }

    #[test]
    fn transform_round_trips_for_integers() {
        for order in [TransformOrder::AddThenMultiply, TransformOrder::MultiplyThenAdd] {
            for value in [0i64, 1, 418, 14_250_000] {
                for (add, multiply) in [(0.0, 1.0), (100.0, 1.0), (-127.0, 4.0), (3.0, 10.0)] {
                    let raw = order.apply(value, add, multiply).unwrap();
                    assert_eq!(order.invert(raw, add, multiply).unwrap(), value);
                }
            }
        }
    }

    #[test]
    fn transform_rounds_half_to_even() {
        // 0.5 cases round toward the even neighbor.
        let order = TransformOrder::AddThenMultiply;
        assert_eq!(order.apply(0, 0.5, 1.0).unwrap(), 0);
        assert_eq!(order.apply(1, 0.5, 1.0).unwrap(), 2);
        assert_eq!(order.apply(2, 0.5, 1.0).unwrap(), 2);
        assert_eq!(order.apply(1, 0.0, 0.5).unwrap(), 0);
        assert_eq!(order.apply(3, 0.0, 0.5).unwrap(), 2);
    }

    #[test]
    fn invert_rejects_zero_multiply() {
        let order = TransformOrder::AddThenMultiply;
        assert!(order.invert(10, 0.0, 0.0).is_err());
    }

    // ---------------------------------------------------------------
    // Round trip through a template
    // ---------------------------------------------------------------

    #[test]
    fn encode_decode_round_trip() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("(FA)????????(;)").unwrap(),
            reply: Some(ReplySpec::Validate(
                FramePattern::parse("(FA)????????(;)").unwrap(),
            )),
            fields: BTreeMap::from([("freq".to_string(), field(2, 8, DataFormat::Text))]),
            types: BTreeMap::from([("freq".to_string(), ValueType::Int)]),
        };
        let bindings = BTreeMap::from([("freq".to_string(), Value::Int(14_074_000))]);
        let empty = EnumValues::new();
        let frame = encode(&template, &bindings, &empty, TransformOrder::default()).unwrap();
        assert_eq!(frame, b"FA14074000;".to_vec());
        let values = decode(&template, &frame, &empty, TransformOrder::default()).unwrap();
        assert_eq!(values["freq"], Value::Int(14_074_000));
    }

    #[test]
    fn enum_encode_decode_idempotent() {
        let template = FrameTemplate {
            pattern: FramePattern::parse("??").unwrap(),
            reply: Some(ReplySpec::Length(1)),
            fields: BTreeMap::from([("vfo".to_string(), field(0, 1, DataFormat::IntLu))]),
            types: BTreeMap::from([("vfo".to_string(), ValueType::Enum("Vfo".to_string()))]),
        };
        let enums = vfo_enums();
        let bindings = BTreeMap::from([("vfo".to_string(), Value::Member("A".to_string()))]);
        let frame = encode(&template, &bindings, &enums, TransformOrder::default()).unwrap();
        let values = decode(&template, &frame, &enums, TransformOrder::default()).unwrap();
        assert_eq!(values["vfo"], Value::Member("A".to_string()));
    }
}
