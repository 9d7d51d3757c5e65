//! Draw-state dependent inputs to a compile.
//!
//! A [`ShaderKey`] selects one variant of a shader: the same token stream compiles to different
//! programs depending on instance divisors, clip planes, color-buffer formats and so on.

use crate::limits::{MAX_COLOR_BUFFERS, MAX_STREAMOUT_BUFFERS, MAX_VERTEX_ATTRIBS};
use crate::tgsi::Processor;

/// Comparison function used by the alpha test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    #[default]
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct VertexKey {
    /// Per-attribute instance divisor; `0` means the attribute is fetched per vertex.
    pub instance_divisors: [u32; MAX_VERTEX_ATTRIBS],
    /// Bit `i` enables clip-distance vector `i` (user clip planes `4*i..4*i+3`).
    pub clip_distance_enable: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    /// Bit `i` requests 16-bit (compressed) export for color buffer `i`.
    pub export_16bpc: u8,
    pub nr_cbufs: u8,
    pub color_two_side: bool,
    pub alpha_func: CompareFunc,
    pub alpha_to_one: bool,
    pub flatshade: bool,
}

impl Default for FragmentKey {
    fn default() -> Self {
        Self {
            export_16bpc: 0,
            nr_cbufs: 1,
            color_two_side: false,
            alpha_func: CompareFunc::Always,
            alpha_to_one: false,
            flatshade: false,
        }
    }
}

impl FragmentKey {
    pub fn exports_16bpc(&self, cbuf: u32) -> bool {
        cbuf < MAX_COLOR_BUFFERS && (self.export_16bpc >> cbuf) & 1 != 0
    }
}

/// Variant key, tagged by stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKey {
    Vertex(VertexKey),
    Fragment(FragmentKey),
}

impl ShaderKey {
    pub fn processor(&self) -> Processor {
        match self {
            ShaderKey::Vertex(_) => Processor::Vertex,
            ShaderKey::Fragment(_) => Processor::Fragment,
        }
    }

    /// Default key for `processor`, or `None` for stages this backend does not compile.
    pub fn default_for(processor: Processor) -> Option<Self> {
        match processor {
            Processor::Vertex => Some(ShaderKey::Vertex(VertexKey::default())),
            Processor::Fragment => Some(ShaderKey::Fragment(FragmentKey::default())),
            Processor::Geometry | Processor::Compute => None,
        }
    }
}

/// One vertex output captured by streamout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamOutput {
    pub register_index: u32,
    pub start_component: u8,
    pub num_components: u8,
    pub output_buffer: u8,
    /// Offset inside the buffer's vertex record, in dwords.
    pub dst_offset: u32,
}

/// Streamout layout of a vertex shader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct StreamOutputInfo {
    /// Vertex stride of each buffer in dwords; `0` disables the buffer.
    pub stride: [u32; MAX_STREAMOUT_BUFFERS],
    pub outputs: Vec<StreamOutput>,
}

impl StreamOutputInfo {
    pub fn is_enabled(&self) -> bool {
        !self.outputs.is_empty()
    }

    pub fn enabled_buffers(&self) -> impl Iterator<Item = usize> + '_ {
        self.stride
            .iter()
            .enumerate()
            .filter(|(_, &stride)| stride != 0)
            .map(|(i, _)| i)
    }
}
