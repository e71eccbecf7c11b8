//! The model compiler.
//!
//! A model file implements a schema for one concrete radio: which enum
//! members map to which wire values, which commands are supported and what
//! their frames look like, which polls read the status vector. The format
//! is TOML:
//!
//! ```toml
//! [general]
//! type = "transceiver"
//! version = 1
//!
//! [enums.Vfo]
//! values = [["A", 0], ["B", 1]]
//!
//! [[init]]
//! command = "FEFE94E0.1A.05.00.92.00.FD"
//! validate = "FEFEE094.FB.FD"
//!
//! [commands.set_freq]
//! command = "FEFE94E0.25.00.????????.FD"
//! validate = "FEFEE094.FB.FD"
//!
//! [commands.set_freq.params.freq]
//! index = 6
//! format = "bcd_lu"
//!
//! [status.read_freq]
//! command = "FEFE94E0.25.00.FD"
//! validate = "FEFEE094.25.00.????????.FD"
//!
//! [status.read_freq.fields.freq]
//! index = 6
//! format = "bcd_lu"
//! ```
//!
//! Compilation validates the model against its schema and produces
//! ready-to-run [`FrameTemplate`]s. Errors reuse the schema compiler's
//! diagnostic rendering; positions are located by searching the source for
//! the offending section or key.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;

use holyrig_codec::{EnumValues, FieldSpec, FramePattern, FrameTemplate, ReplySpec, TransformOrder};
use holyrig_core::ValueType;

use crate::diag::{Diagnostic, Diagnostics};
use crate::schema::Schema;

/// A compiled model: one radio's implementation of a schema.
#[derive(Debug, Clone)]
pub struct Model {
    /// The schema this model implements.
    pub schema: Arc<Schema>,
    /// Which way the add/multiply transform composes for this model.
    pub transform: TransformOrder,
    /// Enum member-to-wire-value tables, keyed by canonical enum name.
    pub enums: EnumValues,
    /// Init frames, sent in order during rig initialization.
    pub init: Vec<FrameTemplate>,
    /// Supported commands. Always a subset of the schema's commands.
    pub commands: BTreeMap<String, FrameTemplate>,
    /// Status polls, keyed by poll name. Field specs apply to the reply.
    pub status: BTreeMap<String, FrameTemplate>,
}

impl Model {
    /// The status fields this model can observe, in schema order.
    pub fn status_fields(&self) -> Vec<&str> {
        self.schema
            .status
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| {
                self.status
                    .values()
                    .any(|poll| poll.fields.contains_key(*name))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Raw file form
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawModel {
    general: RawGeneral,
    #[serde(default)]
    enums: BTreeMap<String, RawEnum>,
    #[serde(default)]
    init: Vec<RawFrame>,
    #[serde(default)]
    commands: BTreeMap<String, RawCommand>,
    #[serde(default)]
    status: BTreeMap<String, RawPoll>,
}

#[derive(Debug, Deserialize)]
struct RawGeneral {
    r#type: String,
    version: u32,
    transform: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEnum {
    values: Vec<(String, u32)>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    command: String,
    reply_length: Option<usize>,
    reply_end: Option<String>,
    validate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    #[serde(flatten)]
    frame: RawFrame,
    #[serde(default)]
    params: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Deserialize)]
struct RawPoll {
    #[serde(flatten)]
    frame: RawFrame,
    #[serde(default)]
    fields: BTreeMap<String, FieldSpec>,
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a model source against its schema.
pub fn compile(source: &str, schema: &Arc<Schema>) -> Result<Model, Diagnostics> {
    let raw: RawModel = toml::from_str(source).map_err(|err| {
        let offset = err.span().map(|span| span.start).unwrap_or(0);
        let mut diags = Diagnostics::default();
        diags.push(Diagnostic::new(source, offset, err.message().to_string()));
        diags
    })?;

    let mut diags = Diagnostics::default();
    let diag = |diags: &mut Diagnostics, needle: &str, message: String| {
        diags.push(Diagnostic::new(source, locate(source, needle), message));
    };

    if !raw.general.r#type.eq_ignore_ascii_case(&schema.kind) {
        diag(
            &mut diags,
            "type",
            format!(
                "model type {:?} does not match schema {:?}",
                raw.general.r#type, schema.kind
            ),
        );
    }
    if raw.general.version != schema.version {
        diag(
            &mut diags,
            "version",
            format!(
                "model version {} does not match schema version {}",
                raw.general.version, schema.version
            ),
        );
    }
    let transform = match raw.general.transform.as_deref() {
        None | Some("add-first") => TransformOrder::AddThenMultiply,
        Some("multiply-first") => TransformOrder::MultiplyThenAdd,
        Some(other) => {
            diag(
                &mut diags,
                "transform",
                format!("unknown transform order {other:?} (expected \"add-first\" or \"multiply-first\")"),
            );
            TransformOrder::AddThenMultiply
        }
    };

    // Enum tables. Members may be omitted; unknown names may not.
    let mut enums = EnumValues::new();
    for (name, raw_enum) in &raw.enums {
        let Some(canonical) = schema.resolve_enum(name) else {
            diag(
                &mut diags,
                name,
                format!("enum {name} is not declared by schema {}", schema.kind),
            );
            continue;
        };
        let declared = &schema.enums[canonical];
        let mut table = BTreeMap::new();
        for (member, value) in &raw_enum.values {
            if !declared.contains(member) {
                diag(
                    &mut diags,
                    member,
                    format!("enum {canonical} has no member {member}"),
                );
                continue;
            }
            if table.insert(member.clone(), *value).is_some() {
                diag(
                    &mut diags,
                    member,
                    format!("member {member} mapped twice in enum {canonical}"),
                );
            }
        }
        enums.insert(canonical.to_string(), table);
    }

    // Init frames carry no parameters.
    let mut init = Vec::new();
    for (i, frame) in raw.init.iter().enumerate() {
        let owner = format!("init frame {i}");
        if let Some(template) =
            compile_frame(source, &mut diags, frame, &owner, BTreeMap::new(), BTreeMap::new())
        {
            init.push(template);
        }
    }

    // Commands: subset of the schema, each schema parameter bound once.
    let mut commands = BTreeMap::new();
    for (name, raw_command) in &raw.commands {
        let owner = format!("command {name}");
        let Some(signature) = schema.commands.get(name) else {
            diag(
                &mut diags,
                name,
                format!("command {name} is not declared by schema {}", schema.kind),
            );
            continue;
        };

        let mut fields = BTreeMap::new();
        let mut types = BTreeMap::new();
        for (param, ty) in signature {
            match raw_command.params.get(param) {
                Some(spec) => {
                    fields.insert(param.clone(), spec.clone());
                    types.insert(param.clone(), ty.clone());
                }
                None => diag(
                    &mut diags,
                    name,
                    format!("{owner} does not bind parameter {param}"),
                ),
            }
        }
        for param in raw_command.params.keys() {
            if !signature.iter().any(|(declared, _)| declared == param) {
                diag(
                    &mut diags,
                    param,
                    format!("{owner} binds unknown parameter {param}"),
                );
            }
        }

        if let Some(template) =
            compile_frame(source, &mut diags, &raw_command.frame, &owner, fields, types)
        {
            commands.insert(name.clone(), template);
        }
    }

    // Status polls: fields extract from the reply.
    let mut status = BTreeMap::new();
    let mut providers: BTreeMap<String, String> = BTreeMap::new();
    for (poll_name, raw_poll) in &raw.status {
        let owner = format!("status poll {poll_name}");

        let mut fields = BTreeMap::new();
        let mut types = BTreeMap::new();
        for (field, spec) in &raw_poll.fields {
            let Some(ty) = schema.status_field(field) else {
                diag(
                    &mut diags,
                    field,
                    format!("status field {field} is not declared by schema {}", schema.kind),
                );
                continue;
            };
            if let Some(previous) = providers.insert(field.clone(), poll_name.clone()) {
                diag(
                    &mut diags,
                    field,
                    format!("status field {field} is provided by both {previous} and {poll_name}"),
                );
                continue;
            }
            fields.insert(field.clone(), spec.clone());
            types.insert(field.clone(), ty.clone());
        }

        if let Some(template) =
            compile_poll(source, &mut diags, &raw_poll.frame, &owner, fields, types)
        {
            status.insert(poll_name.clone(), template);
        }
    }

    diags.into_result(Model {
        schema: Arc::clone(schema),
        transform,
        enums,
        init,
        commands,
        status,
    })
}

/// Compile one frame whose fields splice into the *outbound* pattern.
fn compile_frame(
    source: &str,
    diags: &mut Diagnostics,
    raw: &RawFrame,
    owner: &str,
    fields: BTreeMap<String, FieldSpec>,
    types: BTreeMap<String, ValueType>,
) -> Option<FrameTemplate> {
    let pattern = match FramePattern::parse(&raw.command) {
        Ok(pattern) => pattern,
        Err(err) => {
            diags.push(Diagnostic::new(
                source,
                locate(source, &raw.command),
                format!("{owner}: {err}"),
            ));
            return None;
        }
    };

    let reply = compile_reply(source, diags, raw, owner)?;

    let mut resolved = BTreeMap::new();
    for (name, spec) in fields {
        if let Some(spec) = resolve_field(source, diags, &pattern, owner, &name, spec) {
            resolved.insert(name, spec);
        }
    }

    Some(FrameTemplate {
        pattern,
        reply,
        fields: resolved,
        types,
    })
}

/// Compile one status poll whose fields extract from the *reply*.
fn compile_poll(
    source: &str,
    diags: &mut Diagnostics,
    raw: &RawFrame,
    owner: &str,
    fields: BTreeMap<String, FieldSpec>,
    types: BTreeMap<String, ValueType>,
) -> Option<FrameTemplate> {
    let pattern = match FramePattern::parse(&raw.command) {
        Ok(pattern) => pattern,
        Err(err) => {
            diags.push(Diagnostic::new(
                source,
                locate(source, &raw.command),
                format!("{owner}: {err}"),
            ));
            return None;
        }
    };

    let reply = compile_reply(source, diags, raw, owner)?;

    let mut resolved = BTreeMap::new();
    match &reply {
        Some(ReplySpec::Validate(mask)) => {
            for (name, spec) in fields {
                if let Some(spec) = resolve_field(source, diags, mask, owner, &name, spec) {
                    resolved.insert(name, spec);
                }
            }
        }
        Some(ReplySpec::Length(length)) => {
            for (name, spec) in fields {
                let Some(width) = spec.length else {
                    diags.push(Diagnostic::new(
                        source,
                        locate(source, &name),
                        format!("{owner}: field {name} needs an explicit length"),
                    ));
                    continue;
                };
                if spec.index + width > *length {
                    diags.push(Diagnostic::new(
                        source,
                        locate(source, &name),
                        format!(
                            "{owner}: field {name} extends past the {length}-byte reply"
                        ),
                    ));
                    continue;
                }
                resolved.insert(name, spec);
            }
        }
        Some(ReplySpec::Terminator(_)) | None => {
            if !fields.is_empty() {
                diags.push(Diagnostic::new(
                    source,
                    locate(source, &raw.command),
                    format!("{owner}: field extraction needs a sized reply (validate or reply_length)"),
                ));
                return None;
            }
        }
    }

    Some(FrameTemplate {
        pattern,
        reply,
        fields: resolved,
        types,
    })
}

/// Turn the three optional reply keys into at most one [`ReplySpec`].
fn compile_reply(
    source: &str,
    diags: &mut Diagnostics,
    raw: &RawFrame,
    owner: &str,
) -> Option<Option<ReplySpec>> {
    let mut present = 0;
    present += usize::from(raw.reply_length.is_some());
    present += usize::from(raw.reply_end.is_some());
    present += usize::from(raw.validate.is_some());
    if present > 1 {
        diags.push(Diagnostic::new(
            source,
            locate(source, &raw.command),
            format!("{owner}: reply_length, reply_end, and validate are mutually exclusive"),
        ));
        return None;
    }

    if let Some(length) = raw.reply_length {
        return Some(Some(ReplySpec::Length(length)));
    }
    if let Some(end) = &raw.reply_end {
        let pattern = match FramePattern::parse(end) {
            Ok(pattern) => pattern,
            Err(err) => {
                diags.push(Diagnostic::new(
                    source,
                    locate(source, end),
                    format!("{owner}: {err}"),
                ));
                return None;
            }
        };
        let bytes = pattern.to_bytes();
        if bytes.len() != 1 || pattern.hole_length_at(0).is_some() {
            diags.push(Diagnostic::new(
                source,
                locate(source, end),
                format!("{owner}: reply_end must be a single fixed byte"),
            ));
            return None;
        }
        return Some(Some(ReplySpec::Terminator(bytes[0])));
    }
    if let Some(mask) = &raw.validate {
        let pattern = match FramePattern::parse(mask) {
            Ok(pattern) => pattern,
            Err(err) => {
                diags.push(Diagnostic::new(
                    source,
                    locate(source, mask),
                    format!("{owner}: {err}"),
                ));
                return None;
            }
        };
        return Some(Some(ReplySpec::Validate(pattern)));
    }
    Some(None)
}

/// Check one field spec against the pattern it indexes into, inferring the
/// length from the hole when omitted.
fn resolve_field(
    source: &str,
    diags: &mut Diagnostics,
    pattern: &FramePattern,
    owner: &str,
    name: &str,
    mut spec: FieldSpec,
) -> Option<FieldSpec> {
    let length = match spec.length {
        Some(length) => length,
        None => match pattern.hole_length_at(spec.index) {
            Some(length) => length,
            None => {
                diags.push(Diagnostic::new(
                    source,
                    locate(source, name),
                    format!(
                        "{owner}: field {name} needs an explicit length (index {} does not start a hole)",
                        spec.index
                    ),
                ));
                return None;
            }
        },
    };

    if !pattern.is_hole(spec.index, length) {
        diags.push(Diagnostic::new(
            source,
            locate(source, name),
            format!(
                "{owner}: field {name} ({}..{}) covers fixed bytes of pattern {pattern}",
                spec.index,
                spec.index + length
            ),
        ));
        return None;
    }

    spec.length = Some(length);
    Some(spec)
}

/// Best-effort source position for a model validation error: the first
/// occurrence of the offending name or literal.
fn locate(source: &str, needle: &str) -> usize {
    source.find(needle).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use holyrig_codec::DataFormat;

    fn test_schema() -> Arc<Schema> {
        Arc::new(
            schema::compile(
                r#"
                version = 1;
                schema Transceiver {
                    enum Vfo { A, B, Current, }

                    fn set_freq(int freq, Vfo target);
                    fn set_ptt(bool transmit);

                    status {
                        int freq;
                        bool transmit;
                        Vfo vfo;
                    }
                }
                "#,
            )
            .unwrap(),
        )
    }

    const VALID_MODEL: &str = r#"
        [general]
        type = "transceiver"
        version = 1

        [enums.Vfo]
        values = [["A", 0], ["B", 1]]

        [[init]]
        command = "FEFE94E0.18.01.FD"
        validate = "FEFEE094.FB.FD"

        [commands.set_freq]
        command = "FEFE94E0.25.??.????????.FD"
        validate = "FEFEE094.FB.FD"

        [commands.set_freq.params.target]
        index = 5
        length = 1
        format = "int_lu"

        [commands.set_freq.params.freq]
        index = 6
        length = 4
        format = "bcd_lu"

        [commands.set_ptt]
        command = "FEFE94E0.1C.00.??.FD"
        reply_length = 6

        [commands.set_ptt.params.transmit]
        index = 6
        length = 1
        format = "int_lu"

        [status.read_freq]
        command = "FEFE94E0.25.00.FD"
        validate = "FEFEE094.25.00.????????.FD"

        [status.read_freq.fields.freq]
        index = 6
        format = "bcd_lu"

        [status.read_state]
        command = "FEFE94E0.1C.00.FD"
        validate = "FEFEE094.1C.00.??.??.FD"

        [status.read_state.fields.transmit]
        index = 6
        length = 1
        format = "int_lu"

        [status.read_state.fields.vfo]
        index = 7
        length = 1
        format = "int_lu"
    "#;

    #[test]
    fn compile_valid_model() {
        let schema = test_schema();
        let model = compile(VALID_MODEL, &schema).unwrap();

        assert_eq!(model.transform, TransformOrder::AddThenMultiply);
        assert_eq!(model.enums["Vfo"]["A"], 0);
        assert_eq!(model.enums["Vfo"]["B"], 1);
        assert!(!model.enums["Vfo"].contains_key("Current"));

        assert_eq!(model.init.len(), 1);
        assert!(model.init[0].fields.is_empty());

        let set_freq = &model.commands["set_freq"];
        assert_eq!(set_freq.fields["freq"].length, Some(4));
        assert_eq!(set_freq.fields["freq"].format, DataFormat::BcdLu);
        assert_eq!(set_freq.types["freq"], ValueType::Int);
        assert_eq!(set_freq.types["target"], ValueType::Enum("Vfo".into()));

        let read_freq = &model.status["read_freq"];
        // Length inferred from the 4-byte hole in the validate mask.
        assert_eq!(read_freq.fields["freq"].length, Some(4));

        let read_state = &model.status["read_state"];
        assert_eq!(read_state.fields.len(), 2);
        assert_eq!(read_state.types["vfo"], ValueType::Enum("Vfo".into()));

        assert_eq!(model.status_fields(), vec!["freq", "transmit", "vfo"]);
    }

    #[test]
    fn model_type_mismatch() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "receiver"
            version = 1
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match schema"));
    }

    #[test]
    fn model_version_mismatch() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 2
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match schema version"));
    }

    #[test]
    fn transform_override() {
        let schema = test_schema();
        let model = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1
            transform = "multiply-first"
            "#,
            &schema,
        )
        .unwrap();
        assert_eq!(model.transform, TransformOrder::MultiplyThenAdd);
    }

    #[test]
    fn unknown_transform_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1
            transform = "backwards"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown transform order"));
    }

    #[test]
    fn unknown_enum_and_member_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [enums.Mode]
            values = [["USB", 0]]

            [enums.Vfo]
            values = [["C", 9]]
            "#,
            &schema,
        )
        .unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("enum Mode is not declared"));
        assert!(rendered.contains("enum Vfo has no member C"));
    }

    #[test]
    fn command_not_in_schema_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [commands.set_mode]
            command = "00"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("command set_mode is not declared"));
    }

    #[test]
    fn missing_and_extra_parameters_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [commands.set_freq]
            command = "FEFE94E0.25.00.????????.FD"

            [commands.set_freq.params.channel]
            index = 6
            format = "int_lu"
            "#,
            &schema,
        )
        .unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("does not bind parameter freq"));
        assert!(rendered.contains("does not bind parameter target"));
        assert!(rendered.contains("binds unknown parameter channel"));
    }

    #[test]
    fn field_covering_fixed_bytes_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [commands.set_ptt]
            command = "FEFE94E0.1C.00.??.FD"

            [commands.set_ptt.params.transmit]
            index = 5
            length = 2
            format = "int_lu"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("covers fixed bytes"));
    }

    #[test]
    fn length_required_off_hole_start() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [commands.set_ptt]
            command = "FEFE94E0.1C.00.????.FD"

            [commands.set_ptt.params.transmit]
            index = 7
            format = "int_lu"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("needs an explicit length"));
    }

    #[test]
    fn multiple_reply_validators_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [[init]]
            command = "FEFE94E0.18.01.FD"
            reply_length = 6
            validate = "FEFEE094.FB.FD"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn reply_end_must_be_single_byte() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [[init]]
            command = "(FA;)"
            reply_end = "AABB"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("single fixed byte"));
    }

    #[test]
    fn status_field_conflict_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [status.poll_a]
            command = "01"
            validate = "??"

            [status.poll_a.fields.freq]
            index = 0
            format = "int_lu"

            [status.poll_b]
            command = "02"
            validate = "??"

            [status.poll_b.fields.freq]
            index = 0
            format = "int_lu"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("provided by both"));
    }

    #[test]
    fn status_extraction_needs_sized_reply() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [status.read_freq]
            command = "FEFE94E0.25.00.FD"
            reply_end = "FD"

            [status.read_freq.fields.freq]
            index = 5
            length = 4
            format = "bcd_lu"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sized reply"));
    }

    #[test]
    fn status_field_not_in_schema_rejected() {
        let schema = test_schema();
        let err = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [status.read_swr]
            command = "01"
            validate = "??"

            [status.read_swr.fields.swr]
            index = 0
            format = "int_lu"
            "#,
            &schema,
        )
        .unwrap_err();
        assert!(err.to_string().contains("status field swr is not declared"));
    }

    #[test]
    fn toml_syntax_error_carries_position() {
        let schema = test_schema();
        let err = compile("[general\ntype = \"transceiver\"", &schema).unwrap_err();
        assert!(err.to_string().contains("line 1"), "{err}");
    }

    #[test]
    fn write_only_command_allowed() {
        let schema = test_schema();
        let model = compile(
            r#"
            [general]
            type = "transceiver"
            version = 1

            [commands.set_ptt]
            command = "FEFE94E0.1C.00.??.FD"

            [commands.set_ptt.params.transmit]
            index = 6
            format = "int_lu"
            "#,
            &schema,
        )
        .unwrap();
        assert!(model.commands["set_ptt"].reply.is_none());
    }
}
