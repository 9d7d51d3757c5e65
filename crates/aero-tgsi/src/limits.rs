//! Fixed capacities of the export/intrinsic target.
//!
//! Declarations that exceed these limits are caller contract violations: the translator asserts
//! on them instead of returning an error.

/// Maximum number of declared shader inputs (attributes or interpolants) per stage.
pub const MAX_SHADER_INPUTS: u32 = 32;

/// Maximum number of declared shader outputs per stage.
pub const MAX_SHADER_OUTPUTS: u32 = 32;

/// Number of constant buffers addressable through the constant table.
///
/// The entry at index `MAX_CONST_BUFFERS` holds the user clip planes.
pub const MAX_CONST_BUFFERS: u32 = 16;

/// Number of texture units (sampler + resource pairs) per stage.
pub const MAX_TEXTURE_UNITS: u32 = 16;

/// Number of vertex buffer descriptors in the vertex buffer table.
pub const MAX_VERTEX_ATTRIBS: usize = 16;

/// Number of streamout buffers.
pub const MAX_STREAMOUT_BUFFERS: usize = 4;

/// Number of color render targets.
pub const MAX_COLOR_BUFFERS: u32 = 8;

/// Number of position-class export slots (position, misc vector, two clip-distance vectors).
pub const MAX_POSITION_EXPORTS: usize = 4;

/// Number of parameter (varying) export slots.
pub const MAX_PARAM_EXPORTS: u32 = 32;

/// Maximum address-vector width accepted by the sampling intrinsics.
pub const MAX_TEXTURE_ADDRESS_WIDTH: usize = 16;

/// Index offset of the multisample auxiliary ("fmask") descriptors inside the resource table.
///
/// The translator keeps those descriptors in their own map; the offset only applies to the
/// table address they are loaded from.
pub const FMASK_RESOURCE_OFFSET: u32 = MAX_TEXTURE_UNITS;

/// Default thread-group width used to size the derivative scratch area.
pub const DEFAULT_WAVE_SIZE: u32 = 64;
