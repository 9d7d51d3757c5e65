//! Contract with the external code generator.
//!
//! The generator lowers a [`Function`] to machine code and reports its resource usage as a list
//! of `(register address, value)` configuration pairs. [`ShaderConfig::from_registers`] extracts
//! the fields the driver needs from those pairs.

use thiserror::Error;
use tracing::warn;

use crate::ir::Function;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code generation failed: {message}")]
pub struct BackendError {
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Output of the code generator for one function.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShaderBinary {
    pub code: Vec<u8>,
    pub config: Vec<(u32, u32)>,
}

impl ShaderBinary {
    /// Decodes a stream of little-endian `(register, value)` dword pairs; a trailing partial
    /// pair is ignored.
    pub fn config_from_le_bytes(bytes: &[u8]) -> Vec<(u32, u32)> {
        bytes
            .chunks_exact(8)
            .map(|pair| {
                let reg = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                let value = u32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                (reg, value)
            })
            .collect()
    }
}

pub trait CodeGenerator {
    fn compile(&mut self, function: &Function) -> Result<ShaderBinary, BackendError>;
}

/// Resource-usage registers.
pub mod regs {
    pub const SPI_SHADER_PGM_RSRC1_PS: u32 = 0xB028;
    pub const SPI_SHADER_PGM_RSRC2_PS: u32 = 0xB02C;
    pub const SPI_SHADER_PGM_RSRC1_VS: u32 = 0xB128;
    pub const SPI_SHADER_PGM_RSRC1_GS: u32 = 0xB228;
    pub const COMPUTE_PGM_RSRC1: u32 = 0xB848;
    pub const COMPUTE_PGM_RSRC2: u32 = 0xB84C;
    pub const SPI_PS_INPUT_ENA: u32 = 0x286CC;
}

/// Resource usage of a compiled shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShaderConfig {
    pub num_sgprs: u32,
    pub num_vgprs: u32,
    /// Local memory size field, maximum over every register that reports one.
    pub lds_size: u32,
    /// Fragment input-enable mask.
    pub spi_ps_input_ena: u32,
}

impl ShaderConfig {
    pub fn from_registers(config: &[(u32, u32)]) -> Self {
        let mut out = ShaderConfig::default();
        for &(reg, value) in config {
            match reg {
                regs::SPI_SHADER_PGM_RSRC1_PS
                | regs::SPI_SHADER_PGM_RSRC1_VS
                | regs::SPI_SHADER_PGM_RSRC1_GS
                | regs::COMPUTE_PGM_RSRC1 => {
                    out.num_sgprs = (((value >> 6) & 0xf) + 1) * 8;
                    out.num_vgprs = ((value & 0x3f) + 1) * 4;
                }
                regs::SPI_SHADER_PGM_RSRC2_PS => {
                    out.lds_size = out.lds_size.max((value >> 8) & 0xff);
                }
                regs::COMPUTE_PGM_RSRC2 => {
                    out.lds_size = out.lds_size.max((value >> 15) & 0x1ff);
                }
                regs::SPI_PS_INPUT_ENA => out.spi_ps_input_ena = value,
                other => warn!(reg = other, value, "unknown shader config register"),
            }
        }
        out
    }
}
