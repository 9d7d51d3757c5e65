//! TGSI to hardware-intrinsic program translation.
//!
//! The pipeline for one shader variant:
//!
//! 1. [`scan::ShaderInfo::scan`] collects static usage of the token stream.
//! 2. [`abi::ParamLayout::build`] fixes the calling convention for the stage.
//! 3. [`preload::ResourceBindings::preload`] loads constants and descriptors up front.
//! 4. [`translate::translate`] walks the tokens, binding inputs and lowering texture opcodes.
//! 5. The export epilogue terminates the program with exactly one `done` export.
//! 6. [`shader::compile`] hands the program to a [`backend::CodeGenerator`] and parses its
//!    resource usage.
//!
//! [`eval`] interprets emitted programs for one invocation.

pub mod abi;
pub mod backend;
pub mod builder;
pub mod eval;
pub mod export;
pub mod input;
pub mod ir;
pub mod key;
pub mod limits;
pub mod options;
pub mod preload;
pub mod scan;
pub mod shader;
mod texture;
pub mod tgsi;
pub mod translate;

pub use backend::{BackendError, CodeGenerator, ShaderBinary, ShaderConfig};
pub use key::{FragmentKey, ShaderKey, StreamOutput, StreamOutputInfo, VertexKey};
pub use options::{Capabilities, CompilerOptions, DebugFlags};
pub use scan::ShaderInfo;
pub use shader::{
    compile, CompileError, CompiledShader, ShaderSelector, ShaderSlot, VariantLookup,
    VariantLookupSource,
};
pub use translate::{translate, TranslateError, Translation};
