//! Schema-directed JSON codec core.
//!
//! Two cooperating halves: [`compile_head`] lowers a registered type
//! descriptor into a linked opcode program an encoding VM can walk, and
//! [`SliceDecoder`] streams JSON sequences into raw typed destinations by
//! delegating element parsing to per-type [`Decode`] implementations.

pub mod alloc;
pub mod compile;
pub mod decode;
pub mod error;
pub mod opcode;
pub mod pool;
pub mod schema;
pub mod stream;
pub mod value;

use std::sync::OnceLock;

pub use compile::{CompiledEncoder, Compiler};
pub use decode::{Decode, MAX_DECODE_NESTING_DEPTH, SliceDecoder};
pub use error::{Error, ErrorKind};
pub use schema::{Field, Kind, Ty, Types};

static DUMP_CODE: OnceLock<bool> = OnceLock::new();

/// Read once from `OPJSON_DUMP_CODE`, then cached. When set, every program
/// published by [`compile_head`] is printed to stderr.
fn dump_code() -> bool {
    *DUMP_CODE.get_or_init(|| std::env::var_os("OPJSON_DUMP_CODE").is_some())
}

/// Compile the encode program for a top-level value of type `ty`.
pub fn compile_head(types: &Types, ty: Ty, with_indent: bool) -> Result<CompiledEncoder, Error> {
    let compiled = Compiler::new(types).compile_head(ty, with_indent)?;
    if dump_code() {
        eprintln!("{}", compiled.dump());
    }
    Ok(compiled)
}
