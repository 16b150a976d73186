//! # protoforge: Template-Driven Protocol Message Generator
//!
//! Describe a protocol message as a tree of fields in a small markup template, register the
//! functions that compute derived fields (lengths, checksums, flags, payload selection), and
//! generate randomized but well-formed messages from it.
//!
//! ## Template structure
//!
//! - **`<text>`**: the message, serialized in document order
//! - **`<data>`**: a catalogue of sub-trees that reference fields splice into the message
//! - **`<priority>`**: optional order in which functions run (function names as element names)
//!
//! ## Field kinds
//!
//! - `literal`: fixed text, 8 bits per character
//! - `choice`: one of `a|b|c`, uniformly
//! - `bytes`: `<count>:<range>[<range>...]`, e.g. `[1~8]:[0x61~0x7a]`
//! - `bits`: `<count>:<range>...` or `<count>:<value>`, one value in `count` bits
//! - `function`: `name:[arg][arg]`, computed by a registered function
//! - `group`: any element with children
//!
//! ## Example template
//!
//! ```text
//! <template encoding="ascii">
//!   <text>
//!     <magic kind="literal" spec="PF"/>
//!     <version kind="bits" spec="4:1"/>
//!     <flags kind="bits" spec="4:[0~15]"/>
//!     <length kind="function" spec="byte_count:[payload]"/>
//!     <payload kind="bytes" spec="[1~16]:[0x00~0xff]"/>
//!   </text>
//! </template>
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use protoforge::{mqtt, parse, FunctionRegistry, Generator};
//! use rand::SeedableRng;
//!
//! let doc = protoforge::load_file("templates/mqtt.xml")?;
//! let mut registry = FunctionRegistry::new();
//! mqtt::register(&mut registry)?;
//! let mut generator = Generator::new(doc, registry)?;
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let bytes = generator.generate(&mut rng)?;
//! # let _ = (bytes, parse);
//! # Ok::<(), protoforge::Error>(())
//! ```
//!
//! See `tests/integration.rs` for complete scenarios.

pub mod ast;
pub mod builtins;
pub mod codec;
pub mod dump;
pub mod engine;
pub mod error;
pub mod generate;
pub mod lint;
pub mod mqtt;
pub mod parser;
pub mod registry;
pub mod transport;
pub mod value;

pub use ast::{ChoiceLength, DataKind, Document, Field, NodeId, Section, TextEncoding};
pub use engine::{EntryKind, Generator, GeneratorOptions, ScheduleEntry};
pub use error::Error;
pub use parser::{load_file, parse};
pub use registry::{FieldFunction, FunctionContext, FunctionRegistry};
pub use value::{BitPattern, ContentIndex, ContentStore, Value};
