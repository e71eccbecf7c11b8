//! # holyrig -- Schema-Driven CAT Control for Amateur Radio
//!
//! `holyrig` is an asynchronous CAT (Computer-Aided Transceiver) control
//! engine. Instead of compiling in per-manufacturer drivers, every radio is
//! described by data: a *schema* declares the command surface of a class of
//! radios, and a *model* file implements it for one concrete radio down to
//! the byte layout of every frame. Adding a new radio means writing a TOML
//! file, not code.
//!
//! ## Architecture
//!
//! The workspace is organized as focused crates:
//!
//! | Crate                  | Purpose                                       |
//! |------------------------|-----------------------------------------------|
//! | `holyrig-core`         | Shared types, errors, the [`Transport`] trait |
//! | `holyrig-codec`        | Frame templates and the binary data codec     |
//! | `holyrig-schema`       | Schema DSL and model file compilers           |
//! | `holyrig-transport`    | Serial port transport (tokio-serial)          |
//! | `holyrig-engine`       | Rig runtime, dispatcher, subscriptions        |
//! | `holyrig-rpc`          | JSON-RPC 2.0 over UDP surface                 |
//! | **`holyrig`**          | This facade crate -- re-exports everything    |
//!
//! ## Describing a radio
//!
//! A schema declares what a transceiver can do:
//!
//! ```text
//! version = 1;
//!
//! schema Transceiver {
//!     enum Vfo { A, B, }
//!
//!     fn set_freq(int freq, Vfo target);
//!
//!     status {
//!         int freq;
//!         bool transmit;
//!     }
//! }
//! ```
//!
//! A model maps it onto one radio's wire protocol:
//!
//! ```toml
//! [general]
//! type = "transceiver"
//! version = 1
//!
//! [enums.Vfo]
//! values = [["A", 0], ["B", 1]]
//!
//! [commands.set_freq]
//! command = "FEFE94E0.25.??.????????.FD"
//! validate = "FEFEE094.FB.FD"
//!
//! [commands.set_freq.params.target]
//! index = 5
//! length = 1
//! format = "int_lu"
//!
//! [commands.set_freq.params.freq]
//! index = 6
//! length = 4
//! format = "bcd_lu"
//! ```
//!
//! ## Runtime shape
//!
//! One task per rig owns the serial channel and drives init, polling, and
//! the command FIFO; a dispatcher routes JSON-RPC requests; a subscription
//! manager fans out status changes with per-subscriber bounded queues. See
//! the `holyrigd` daemon for the ready-made wiring.

pub use holyrig_core::{
    Connector, Error, LinkEvent, Result, RigSettings, RigState, StatusEvent, Transport, Value,
    ValueType,
};

/// Frame templates and the binary data codec.
pub mod codec {
    pub use holyrig_codec::*;
}

/// Schema DSL and model file compilers.
pub mod schema {
    pub use holyrig_schema::*;
}

/// Serial transport implementation.
pub mod transport {
    pub use holyrig_transport::*;
}

/// Rig runtime, dispatcher, and subscription manager.
pub mod engine {
    pub use holyrig_engine::*;
}

/// JSON-RPC 2.0 over UDP surface.
pub mod rpc {
    pub use holyrig_rpc::*;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::Value;

    const SCHEMA: &str = include_str!("../../../schemas/transceiver.schema");
    const IC7300: &str = include_str!("../../../models/IC-7300.toml");

    #[test]
    fn shipped_schema_and_model_compile() {
        let schema = Arc::new(crate::schema::compile_schema(SCHEMA).unwrap());
        let model = crate::schema::compile_model(IC7300, &schema).unwrap();

        assert_eq!(model.commands.len(), 4);
        assert_eq!(model.init.len(), 1);
        assert_eq!(model.status.len(), 3);
        assert_eq!(model.status_fields(), vec!["freq", "mode", "transmit"]);
    }

    #[test]
    fn shipped_model_encodes_a_frequency() {
        let schema = Arc::new(crate::schema::compile_schema(SCHEMA).unwrap());
        let model = crate::schema::compile_model(IC7300, &schema).unwrap();

        let bindings = BTreeMap::from([("freq".to_string(), Value::Int(14_250_000))]);
        let frame = crate::codec::encode(
            &model.commands["set_freq"],
            &bindings,
            &model.enums,
            model.transform,
        )
        .unwrap();
        assert_eq!(
            frame,
            vec![0xFE, 0xFE, 0x94, 0xE0, 0x05, 0x00, 0x00, 0x25, 0x14, 0x00, 0xFD]
        );
    }

    #[test]
    fn shipped_model_decodes_a_mode_poll() {
        let schema = Arc::new(crate::schema::compile_schema(SCHEMA).unwrap());
        let model = crate::schema::compile_model(IC7300, &schema).unwrap();

        let reply = [0xFE, 0xFE, 0xE0, 0x94, 0x04, 0x01, 0x02, 0xFD];
        let values = crate::codec::decode(
            &model.status["read_mode"],
            &reply,
            &model.enums,
            model.transform,
        )
        .unwrap();
        assert_eq!(values["mode"], Value::Member("USB".to_string()));
    }
}
