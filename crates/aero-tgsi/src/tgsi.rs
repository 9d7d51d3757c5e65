//! TGSI token model.
//!
//! This is the form in which the external parser hands a shader to the translator: an ordered
//! list of declarations, immediates, properties and instructions. Nothing here validates the
//! program beyond what the types encode; the translator reports problems as it walks the stream.

use std::fmt;

/// Pipeline stage a token stream was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Processor {
    Vertex,
    Fragment,
    Geometry,
    Compute,
}

/// Register file of a declaration or operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum File {
    Constant,
    Input,
    Output,
    Temporary,
    Sampler,
    Address,
    Immediate,
    SystemValue,
}

impl File {
    pub const COUNT: usize = 8;

    pub fn index(self) -> usize {
        match self {
            File::Constant => 0,
            File::Input => 1,
            File::Output => 2,
            File::Temporary => 3,
            File::Sampler => 4,
            File::Address => 5,
            File::Immediate => 6,
            File::SystemValue => 7,
        }
    }

    fn short_name(self) -> &'static str {
        match self {
            File::Constant => "CONST",
            File::Input => "IN",
            File::Output => "OUT",
            File::Temporary => "TEMP",
            File::Sampler => "SAMP",
            File::Address => "ADDR",
            File::Immediate => "IMM",
            File::SystemValue => "SV",
        }
    }
}

impl fmt::Display for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Semantic role attached to an input or output declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    Position,
    Color,
    BColor,
    Fog,
    PSize,
    Generic,
    Normal,
    Face,
    EdgeFlag,
    PrimId,
    InstanceId,
    VertexId,
    Stencil,
    ClipDist,
    ClipVertex,
    /// A semantic name the translator does not know about (raw token value).
    Other(u32),
}

/// Semantic name plus index, e.g. `COLOR[1]` or `GENERIC[7]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemanticDecl {
    pub name: Semantic,
    pub index: u32,
}

impl SemanticDecl {
    pub fn new(name: Semantic, index: u32) -> Self {
        Self { name, index }
    }
}

/// Interpolation mode of a fragment input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interpolate {
    Constant,
    Linear,
    #[default]
    Perspective,
    /// Perspective unless flat shading is enabled for the draw.
    Color,
    Other(u32),
}

/// Where inside the pixel an interpolant is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InterpLocation {
    #[default]
    Center,
    Centroid,
    Sample,
}

/// Texture dimensionality of a sampling instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Buffer,
    Tex1D,
    Tex2D,
    Tex3D,
    Cube,
    Rect,
    Shadow1D,
    Shadow2D,
    ShadowRect,
    Array1D,
    Array2D,
    Shadow1DArray,
    Shadow2DArray,
    ShadowCube,
    Tex2DMsaa,
    Array2DMsaa,
    CubeArray,
    ShadowCubeArray,
}

impl TextureTarget {
    /// Number of coordinate lanes packed into the address vector (cube targets count the
    /// remapped `s, t, face` triple).
    pub fn coord_dim(self) -> usize {
        match self {
            TextureTarget::Buffer | TextureTarget::Tex1D | TextureTarget::Shadow1D => 1,
            TextureTarget::Tex2D
            | TextureTarget::Rect
            | TextureTarget::Shadow2D
            | TextureTarget::ShadowRect
            | TextureTarget::Array1D
            | TextureTarget::Shadow1DArray
            | TextureTarget::Tex2DMsaa => 2,
            TextureTarget::Tex3D
            | TextureTarget::Cube
            | TextureTarget::ShadowCube
            | TextureTarget::Array2D
            | TextureTarget::Shadow2DArray
            | TextureTarget::Array2DMsaa
            | TextureTarget::CubeArray
            | TextureTarget::ShadowCubeArray => 3,
        }
    }

    /// Source lane holding the depth reference value for shadow targets.
    ///
    /// `ShadowCubeArray` carries its reference in the second source operand instead and returns
    /// `None` here.
    pub fn shadow_ref_lane(self) -> Option<usize> {
        match self {
            TextureTarget::Shadow1D
            | TextureTarget::Shadow2D
            | TextureTarget::ShadowRect
            | TextureTarget::Shadow1DArray => Some(2),
            TextureTarget::ShadowCube | TextureTarget::Shadow2DArray => Some(3),
            _ => None,
        }
    }

    pub fn is_cube(self) -> bool {
        matches!(
            self,
            TextureTarget::Cube
                | TextureTarget::ShadowCube
                | TextureTarget::CubeArray
                | TextureTarget::ShadowCubeArray
        )
    }

    pub fn is_msaa(self) -> bool {
        matches!(self, TextureTarget::Tex2DMsaa | TextureTarget::Array2DMsaa)
    }

    /// Stable small integer passed to the sampling intrinsics as the dimension operand.
    pub fn code(self) -> u32 {
        match self {
            TextureTarget::Buffer => 0,
            TextureTarget::Tex1D => 1,
            TextureTarget::Tex2D => 2,
            TextureTarget::Tex3D => 3,
            TextureTarget::Cube => 4,
            TextureTarget::Rect => 5,
            TextureTarget::Shadow1D => 6,
            TextureTarget::Shadow2D => 7,
            TextureTarget::ShadowRect => 8,
            TextureTarget::Array1D => 9,
            TextureTarget::Array2D => 10,
            TextureTarget::Shadow1DArray => 11,
            TextureTarget::Shadow2DArray => 12,
            TextureTarget::ShadowCube => 13,
            TextureTarget::Tex2DMsaa => 14,
            TextureTarget::Array2DMsaa => 15,
            TextureTarget::CubeArray => 16,
            TextureTarget::ShadowCubeArray => 17,
        }
    }
}

/// Instruction opcodes understood by the translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Mov,
    Add,
    Mul,
    Mad,
    Dp3,
    Dp4,
    Rcp,
    Min,
    Max,
    /// Float to integer (floor) move into an address register.
    Arl,
    /// Unconditional kill.
    Kill,
    /// Kill when any source component is negative.
    KillIf,
    Ddx,
    Ddy,
    Tex,
    Txb,
    Txd,
    Txl,
    Txp,
    Txf,
    Txq,
    End,
    Other(u32),
}

impl Opcode {
    pub fn is_texture(self) -> bool {
        matches!(
            self,
            Opcode::Tex
                | Opcode::Txb
                | Opcode::Txd
                | Opcode::Txl
                | Opcode::Txp
                | Opcode::Txf
                | Opcode::Txq
        )
    }

    pub fn name(self) -> String {
        match self {
            Opcode::Mov => "MOV".into(),
            Opcode::Add => "ADD".into(),
            Opcode::Mul => "MUL".into(),
            Opcode::Mad => "MAD".into(),
            Opcode::Dp3 => "DP3".into(),
            Opcode::Dp4 => "DP4".into(),
            Opcode::Rcp => "RCP".into(),
            Opcode::Min => "MIN".into(),
            Opcode::Max => "MAX".into(),
            Opcode::Arl => "ARL".into(),
            Opcode::Kill => "KILL".into(),
            Opcode::KillIf => "KILL_IF".into(),
            Opcode::Ddx => "DDX".into(),
            Opcode::Ddy => "DDY".into(),
            Opcode::Tex => "TEX".into(),
            Opcode::Txb => "TXB".into(),
            Opcode::Txd => "TXD".into(),
            Opcode::Txl => "TXL".into(),
            Opcode::Txp => "TXP".into(),
            Opcode::Txf => "TXF".into(),
            Opcode::Txq => "TXQ".into(),
            Opcode::End => "END".into(),
            Opcode::Other(op) => format!("OPCODE_{op}"),
        }
    }
}

/// Component write mask (x=1, y=2, z=4, w=8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteMask(pub u8);

impl WriteMask {
    pub const XYZW: Self = Self(0b1111);
    pub const X: Self = Self(0b0001);

    pub fn contains(self, chan: usize) -> bool {
        chan < 4 && (self.0 >> chan) & 1 != 0
    }
}

impl Default for WriteMask {
    fn default() -> Self {
        Self::XYZW
    }
}

/// One declared register range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub file: File,
    pub first: u32,
    pub last: u32,
    /// Constant buffer index for `File::Constant` declarations.
    pub dimension: u32,
    pub semantic: Option<SemanticDecl>,
    pub interpolate: Interpolate,
    pub location: InterpLocation,
    pub usage_mask: WriteMask,
}

impl Declaration {
    fn new(file: File, first: u32, last: u32) -> Self {
        Self {
            file,
            first,
            last,
            dimension: 0,
            semantic: None,
            interpolate: Interpolate::default(),
            location: InterpLocation::default(),
            usage_mask: WriteMask::XYZW,
        }
    }

    pub fn input(index: u32, name: Semantic, semantic_index: u32) -> Self {
        Self {
            semantic: Some(SemanticDecl::new(name, semantic_index)),
            ..Self::new(File::Input, index, index)
        }
    }

    pub fn output(index: u32, name: Semantic, semantic_index: u32) -> Self {
        Self {
            semantic: Some(SemanticDecl::new(name, semantic_index)),
            ..Self::new(File::Output, index, index)
        }
    }

    pub fn system_value(index: u32, name: Semantic) -> Self {
        Self {
            semantic: Some(SemanticDecl::new(name, 0)),
            ..Self::new(File::SystemValue, index, index)
        }
    }

    pub fn constants(buffer: u32, first: u32, last: u32) -> Self {
        Self {
            dimension: buffer,
            ..Self::new(File::Constant, first, last)
        }
    }

    pub fn temporaries(first: u32, last: u32) -> Self {
        Self::new(File::Temporary, first, last)
    }

    pub fn sampler(index: u32) -> Self {
        Self::new(File::Sampler, index, index)
    }

    pub fn address(index: u32) -> Self {
        Self::new(File::Address, index, index)
    }

    pub fn with_interpolate(mut self, interpolate: Interpolate) -> Self {
        self.interpolate = interpolate;
        self
    }

    pub fn with_location(mut self, location: InterpLocation) -> Self {
        self.location = location;
        self
    }

    pub fn with_usage_mask(mut self, mask: WriteMask) -> Self {
        self.usage_mask = mask;
        self
    }

    pub fn semantic_name(&self) -> Option<Semantic> {
        self.semantic.map(|s| s.name)
    }

    pub fn registers(&self) -> std::ops::RangeInclusive<u32> {
        self.first..=self.last
    }
}

/// Indirect register reference (`CONST[ADDR[index].chan + n]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirectRef {
    pub file: File,
    pub index: u32,
    pub swizzle: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcRegister {
    pub file: File,
    pub index: u32,
    /// Constant buffer index for `File::Constant`.
    pub dimension: u32,
    pub indirect: Option<IndirectRef>,
    pub swizzle: [u8; 4],
    pub negate: bool,
    pub absolute: bool,
}

impl SrcRegister {
    pub fn new(file: File, index: u32) -> Self {
        Self {
            file,
            index,
            dimension: 0,
            indirect: None,
            swizzle: [0, 1, 2, 3],
            negate: false,
            absolute: false,
        }
    }

    pub fn swizzled(mut self, swizzle: [u8; 4]) -> Self {
        self.swizzle = swizzle;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    pub fn absolute(mut self) -> Self {
        self.absolute = true;
        self
    }

    pub fn in_buffer(mut self, buffer: u32) -> Self {
        self.dimension = buffer;
        self
    }

    pub fn indirect(mut self, addr_index: u32, swizzle: u8) -> Self {
        self.indirect = Some(IndirectRef {
            file: File::Address,
            index: addr_index,
            swizzle,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DstRegister {
    pub file: File,
    pub index: u32,
    pub write_mask: WriteMask,
    pub saturate: bool,
}

impl DstRegister {
    pub fn new(file: File, index: u32) -> Self {
        Self {
            file,
            index,
            write_mask: WriteMask::XYZW,
            saturate: false,
        }
    }

    pub fn masked(mut self, mask: WriteMask) -> Self {
        self.write_mask = mask;
        self
    }

    pub fn saturated(mut self) -> Self {
        self.saturate = true;
        self
    }
}

/// Texel offset operand of `TXF`, taken from an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexOffset {
    pub immediate: u32,
    pub swizzle: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: Vec<DstRegister>,
    pub src: Vec<SrcRegister>,
    pub texture: Option<TextureTarget>,
    pub offsets: Vec<TexOffset>,
}

impl Instruction {
    pub fn new(opcode: Opcode, dst: Vec<DstRegister>, src: Vec<SrcRegister>) -> Self {
        Self {
            opcode,
            dst,
            src,
            texture: None,
            offsets: Vec::new(),
        }
    }

    /// Texture instruction; the sampler operand is always the last source.
    pub fn texture(
        opcode: Opcode,
        target: TextureTarget,
        dst: DstRegister,
        src: Vec<SrcRegister>,
    ) -> Self {
        Self {
            opcode,
            dst: vec![dst],
            src,
            texture: Some(target),
            offsets: Vec::new(),
        }
    }

    pub fn with_offset(mut self, offset: TexOffset) -> Self {
        self.offsets.push(offset);
        self
    }
}

/// Shader-wide properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Color output 0 is broadcast to every bound color buffer.
    FsColor0WritesAllCbufs(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Declaration(Declaration),
    /// Four raw 32-bit lanes; float immediates are stored as their bit patterns.
    Immediate([u32; 4]),
    Property(Property),
    Instruction(Instruction),
}

/// A complete token stream for one shader.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TgsiShader {
    pub processor: Option<Processor>,
    pub tokens: Vec<Token>,
}

impl TgsiShader {
    pub fn new(processor: Processor) -> Self {
        Self {
            processor: Some(processor),
            tokens: Vec::new(),
        }
    }

    pub fn declare(&mut self, decl: Declaration) -> &mut Self {
        self.tokens.push(Token::Declaration(decl));
        self
    }

    pub fn immediate_f32(&mut self, values: [f32; 4]) -> &mut Self {
        self.tokens.push(Token::Immediate(values.map(f32::to_bits)));
        self
    }

    pub fn immediate_u32(&mut self, values: [u32; 4]) -> &mut Self {
        self.tokens.push(Token::Immediate(values));
        self
    }

    pub fn property(&mut self, property: Property) -> &mut Self {
        self.tokens.push(Token::Property(property));
        self
    }

    pub fn push(&mut self, inst: Instruction) -> &mut Self {
        self.tokens.push(Token::Instruction(inst));
        self
    }

    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Declaration(d) => Some(d),
            _ => None,
        })
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Instruction(i) => Some(i),
            _ => None,
        })
    }
}
