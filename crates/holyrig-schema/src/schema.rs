//! The schema compiler.
//!
//! A schema declares the command surface of a class of radios, without any
//! byte-level detail:
//!
//! ```text
//! version = 1;
//!
//! schema Transceiver {
//!     enum Vfo {
//!         A,
//!         B,
//!     }
//!
//!     fn set_freq(int freq, Vfo target);
//!     fn clear_rit();
//!
//!     status {
//!         int freq;
//!         bool transmit;
//!         Vfo vfo;
//!     }
//! }
//! ```
//!
//! Structural errors abort at the first failure so the message points at
//! one precise token; semantic errors (duplicates, unknown types, bad
//! version) are accumulated across the whole block.

use std::collections::BTreeMap;

use holyrig_core::ValueType;

use crate::diag::{Diagnostic, Diagnostics};
use crate::lexer::{self, Spanned, Token};

/// An ordered parameter or status-field list.
pub type Signature = Vec<(String, ValueType)>;

/// A compiled schema: the command surface of one class of radios.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Schema format version. Always 1.
    pub version: u32,
    /// The declared kind, e.g. `Transceiver`.
    pub kind: String,
    /// Enum types, keyed by canonical name, with ordered members.
    pub enums: BTreeMap<String, Vec<String>>,
    /// Command signatures, keyed by command name.
    pub commands: BTreeMap<String, Signature>,
    /// The ordered status vector.
    pub status: Signature,
}

impl Schema {
    /// Resolve an enum name case-insensitively to its canonical spelling.
    pub fn resolve_enum(&self, name: &str) -> Option<&str> {
        self.enums
            .keys()
            .find(|canonical| canonical.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    /// The declared type of a status field.
    pub fn status_field(&self, name: &str) -> Option<&ValueType> {
        self.status
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}

// ---------------------------------------------------------------------------
// Raw parse tree
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum RawType {
    Int,
    Bool,
    Named(String),
}

#[derive(Debug)]
struct RawParam {
    pos: usize,
    ty: RawType,
    name: String,
}

#[derive(Debug)]
enum RawMember {
    Enum {
        pos: usize,
        name: String,
        members: Vec<(usize, String)>,
    },
    Command {
        pos: usize,
        name: String,
        params: Vec<RawParam>,
    },
    Status {
        fields: Vec<RawParam>,
    },
}

#[derive(Debug)]
struct RawSchema {
    version_pos: usize,
    version: u32,
    name: String,
    members: Vec<RawMember>,
}

peg::parser! {
    grammar schema_grammar<'source>() for [Token<'source>] {
        rule integer() -> u32
            = [Token::Integer(text)] {?
                text.parse::<u32>().or(Err("integer"))
            }

        rule ident() -> String
            = [Token::Ident(name)] { name.to_string() }

        rule data_type() -> RawType
            = [Token::Int] { RawType::Int }
            / [Token::Bool] { RawType::Bool }
            / name:ident() { RawType::Named(name) }

        rule parameter() -> RawParam
            = pos:position!() ty:data_type() name:ident() {
                RawParam { pos, ty, name }
            }

        rule parameter_list() -> Vec<RawParam>
            = [Token::ParenOpen]
              params:(parameter() ** [Token::Comma]) [Token::Comma]?
              [Token::ParenClose] {
                params
            }

        rule command() -> RawMember
            = pos:position!() [Token::Fn] name:ident() params:parameter_list()? [Token::Semicolon] {
                RawMember::Command { pos, name, params: params.unwrap_or_default() }
            }

        rule enum_member() -> (usize, String)
            = pos:position!() name:ident() [Token::Comma]? { (pos, name) }

        rule enum_block() -> RawMember
            = pos:position!() [Token::Enum] name:ident()
              [Token::BraceOpen] members:enum_member()* [Token::BraceClose] {
                RawMember::Enum { pos, name, members }
            }

        rule status_field() -> RawParam
            = pos:position!() ty:data_type() name:ident() [Token::Semicolon] {
                RawParam { pos, ty, name }
            }

        rule status_block() -> RawMember
            = [Token::Status] [Token::BraceOpen] fields:status_field()* [Token::BraceClose] {
                RawMember::Status { fields }
            }

        rule member() -> RawMember
            = enum_block() / command() / status_block()

        rule version_setting() -> (usize, u32)
            = pos:position!() keyword:ident() [Token::Equals] version:integer() [Token::Semicolon] {?
                if keyword == "version" {
                    Ok((pos, version))
                } else {
                    Err("'version'")
                }
            }

        pub rule schema_file() -> RawSchema
            = version:version_setting()
              [Token::Schema] name:ident()
              [Token::BraceOpen] members:member()* [Token::BraceClose] {
                RawSchema {
                    version_pos: version.0,
                    version: version.1,
                    name,
                    members,
                }
            }
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Compile a schema source into a [`Schema`].
pub fn compile(source: &str) -> Result<Schema, Diagnostics> {
    let spanned = lexer::tokenize(source)?;
    let tokens: Vec<Token> = spanned.iter().map(|t| t.token).collect();

    let raw = schema_grammar::schema_file(&tokens).map_err(|err| {
        let offset = offset_of(source, &spanned, err.location);
        let expected: Vec<String> = err.expected.tokens().map(str::to_string).collect();
        let mut diags = Diagnostics::default();
        diags.push(Diagnostic::new(
            source,
            offset,
            format!("expected {}", expected.join(" or ")),
        ));
        diags
    })?;

    let mut diags = Diagnostics::default();
    let diag_at = |diags: &mut Diagnostics, token_pos: usize, message: String| {
        diags.push(Diagnostic::new(
            source,
            offset_of(source, &spanned, token_pos),
            message,
        ));
    };

    if raw.version != 1 {
        diag_at(
            &mut diags,
            raw.version_pos,
            format!("unsupported schema version {} (expected 1)", raw.version),
        );
    }

    // Enums first: command and status types resolve against them.
    let mut enums: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for member in &raw.members {
        let RawMember::Enum { pos, name, members } = member else {
            continue;
        };
        if enums.contains_key(name) {
            diag_at(&mut diags, *pos, format!("duplicate enum {name}"));
            continue;
        }
        if members.is_empty() {
            diag_at(&mut diags, *pos, format!("enum {name} has no members"));
        }
        let mut seen = Vec::new();
        for (member_pos, member_name) in members {
            if seen.contains(member_name) {
                diag_at(
                    &mut diags,
                    *member_pos,
                    format!("duplicate member {member_name} in enum {name}"),
                );
            } else {
                seen.push(member_name.clone());
            }
        }
        enums.insert(name.clone(), seen);
    }

    let resolve = |diags: &mut Diagnostics, param: &RawParam, owner: &str| match &param.ty {
        RawType::Int => Some(ValueType::Int),
        RawType::Bool => Some(ValueType::Bool),
        RawType::Named(name) => {
            let canonical = enums
                .keys()
                .find(|canonical| canonical.eq_ignore_ascii_case(name));
            match canonical {
                Some(canonical) => Some(ValueType::Enum(canonical.clone())),
                None => {
                    diag_at(
                        diags,
                        param.pos,
                        format!("unknown type {name} for {} in {owner}", param.name),
                    );
                    None
                }
            }
        }
    };

    let mut commands: BTreeMap<String, Signature> = BTreeMap::new();
    let mut status: Signature = Vec::new();
    for member in &raw.members {
        match member {
            RawMember::Enum { .. } => {}
            RawMember::Command { pos, name, params } => {
                if commands.contains_key(name) {
                    diag_at(&mut diags, *pos, format!("duplicate command {name}"));
                    continue;
                }
                let mut signature = Signature::new();
                for param in params {
                    if signature.iter().any(|(existing, _)| existing == &param.name) {
                        diag_at(
                            &mut diags,
                            param.pos,
                            format!("duplicate parameter {} in command {name}", param.name),
                        );
                        continue;
                    }
                    if let Some(ty) = resolve(&mut diags, param, &format!("command {name}")) {
                        signature.push((param.name.clone(), ty));
                    }
                }
                commands.insert(name.clone(), signature);
            }
            RawMember::Status { fields } => {
                for field in fields {
                    if status.iter().any(|(existing, _)| existing == &field.name) {
                        diag_at(
                            &mut diags,
                            field.pos,
                            format!("duplicate status field {}", field.name),
                        );
                        continue;
                    }
                    if let Some(ty) = resolve(&mut diags, field, "status") {
                        status.push((field.name.clone(), ty));
                    }
                }
            }
        }
    }

    diags.into_result(Schema {
        version: raw.version,
        kind: raw.name,
        enums,
        commands,
        status,
    })
}

/// Map a token index (as reported by the grammar) back to a byte offset.
fn offset_of(source: &str, spanned: &[Spanned], token_pos: usize) -> usize {
    spanned
        .get(token_pos)
        .map(|t| t.offset)
        .unwrap_or(source.len())
}
