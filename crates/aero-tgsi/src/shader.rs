//! Compile driver: translation, code generation, publication and per-key variants.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, trace};

use crate::abi::ParamLayout;
use crate::backend::{BackendError, CodeGenerator, ShaderConfig};
use crate::export::OutputSummary;
use crate::input::InputBinding;
use crate::key::{ShaderKey, StreamOutputInfo};
use crate::options::{CompilerOptions, DebugFlags};
use crate::scan::ShaderInfo;
use crate::tgsi::TgsiShader;
use crate::translate::{translate, TranslateError};

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("failed to allocate {bytes} bytes for shader code")]
    OutOfMemory { bytes: usize },
}

/// A shader variant ready for the hardware.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub key: ShaderKey,
    pub code: Arc<[u8]>,
    pub config: ShaderConfig,
    pub layout: ParamLayout,
    pub inputs: Vec<InputBinding>,
    pub outputs: OutputSummary,
}

/// Translates `shader` for `key` and lowers the result through `backend`.
///
/// # Panics
///
/// Panics if the shader exceeds a fixed per-stage capacity (inputs, outputs, texture units,
/// parameter exports).
pub fn compile(
    shader: &TgsiShader,
    info: &ShaderInfo,
    key: &ShaderKey,
    streamout: &StreamOutputInfo,
    options: &CompilerOptions,
    backend: &mut dyn CodeGenerator,
) -> Result<CompiledShader, CompileError> {
    let translation = translate(shader, info, key, streamout, options)?;
    let binary = backend.compile(&translation.function)?;

    let mut code = Vec::new();
    code.try_reserve_exact(binary.code.len())
        .map_err(|_| CompileError::OutOfMemory {
            bytes: binary.code.len(),
        })?;
    code.extend_from_slice(&binary.code);

    let config = ShaderConfig::from_registers(&binary.config);
    if options.debug.contains(DebugFlags::DUMP_CONFIG) {
        trace!(target: "aero_tgsi::dump", ?config, registers = ?binary.config, "shader config");
    }
    debug!(
        code_bytes = code.len(),
        sgprs = config.num_sgprs,
        vgprs = config.num_vgprs,
        "compiled shader"
    );

    Ok(CompiledShader {
        key: *key,
        code: code.into(),
        config,
        layout: translation.layout,
        inputs: translation.inputs,
        outputs: translation.outputs,
    })
}

/// The binary currently bound for a shader.
///
/// A new binary replaces the old one only after it compiled successfully, so a failed recompile
/// never leaves the slot empty or half-written.
#[derive(Debug, Default)]
pub struct ShaderSlot {
    current: RwLock<Option<Arc<CompiledShader>>>,
}

impl ShaderSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<CompiledShader>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swaps in `shader` and returns the previously published binary.
    pub fn publish(&self, shader: Arc<CompiledShader>) -> Option<Arc<CompiledShader>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(shader)
    }

    /// Compiles and publishes; on error the slot keeps its previous binary.
    pub fn compile_into(
        &self,
        shader: &TgsiShader,
        info: &ShaderInfo,
        key: &ShaderKey,
        streamout: &StreamOutputInfo,
        options: &CompilerOptions,
        backend: &mut dyn CodeGenerator,
    ) -> Result<Arc<CompiledShader>, CompileError> {
        let compiled = Arc::new(compile(shader, info, key, streamout, options, backend)?);
        self.publish(Arc::clone(&compiled));
        Ok(compiled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantLookupSource {
    /// The variant was already compiled for this key.
    Memory,
    /// The compiler ran and the variant was inserted into the cache.
    Compiled,
}

#[derive(Debug, Clone)]
pub struct VariantLookup {
    pub source: VariantLookupSource,
    pub shader: Arc<CompiledShader>,
}

impl std::ops::Deref for VariantLookup {
    type Target = CompiledShader;

    fn deref(&self) -> &Self::Target {
        &self.shader
    }
}

/// One token stream and its compiled variants, keyed by draw state.
pub struct ShaderSelector {
    tokens: TgsiShader,
    info: ShaderInfo,
    streamout: StreamOutputInfo,
    options: CompilerOptions,
    variants: HashMap<ShaderKey, Arc<CompiledShader>>,
}

impl ShaderSelector {
    pub fn new(tokens: TgsiShader, streamout: StreamOutputInfo, options: CompilerOptions) -> Self {
        let info = ShaderInfo::scan(&tokens);
        Self {
            tokens,
            info,
            streamout,
            options,
            variants: HashMap::new(),
        }
    }

    pub fn info(&self) -> &ShaderInfo {
        &self.info
    }

    pub fn tokens(&self) -> &TgsiShader {
        &self.tokens
    }

    pub fn num_variants(&self) -> usize {
        self.variants.len()
    }

    /// Returns the variant for `key`, compiling it on first use. Failed compiles are not cached.
    pub fn get_or_compile(
        &mut self,
        key: &ShaderKey,
        backend: &mut dyn CodeGenerator,
    ) -> Result<VariantLookup, CompileError> {
        use std::collections::hash_map::Entry;

        match self.variants.entry(*key) {
            Entry::Occupied(e) => Ok(VariantLookup {
                source: VariantLookupSource::Memory,
                shader: Arc::clone(e.get()),
            }),
            Entry::Vacant(e) => {
                let compiled = compile(
                    &self.tokens,
                    &self.info,
                    key,
                    &self.streamout,
                    &self.options,
                    backend,
                )?;
                debug!(key = ?key, "new shader variant");
                Ok(VariantLookup {
                    source: VariantLookupSource::Compiled,
                    shader: Arc::clone(e.insert(Arc::new(compiled))),
                })
            }
        }
    }
}
