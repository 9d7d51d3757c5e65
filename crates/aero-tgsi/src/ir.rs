//! The hardware-intrinsic program handed to the external code generator.
//!
//! Values are SSA: parameters and constants are value kinds of their own, every other value is
//! the result of exactly one instruction. The only control flow is a structured `If` without an
//! else branch, which is all the export epilogue needs (streamout gating).

use std::fmt;

use bitflags::bitflags;

use crate::abi::ParamRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Value(pub(crate) u32);

impl Value {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Kind of descriptor a table holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescKind {
    /// 4-dword buffer descriptor (constant, vertex and streamout buffers).
    Buffer,
    /// 4-dword sampler state.
    Sampler,
    /// 8-dword image resource descriptor.
    Image,
}

impl DescKind {
    pub fn words(self) -> usize {
        match self {
            DescKind::Buffer | DescKind::Sampler => 4,
            DescKind::Image => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    Bool,
    I32,
    F32,
    VecI32(u8),
    VecF32(u8),
    Desc(DescKind),
    /// Pointer to a table of descriptors, indexed with [`Op::IndexedLoad`].
    Table(DescKind),
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => f.write_str("void"),
            Ty::Bool => f.write_str("i1"),
            Ty::I32 => f.write_str("i32"),
            Ty::F32 => f.write_str("f32"),
            Ty::VecI32(n) => write!(f, "v{n}i32"),
            Ty::VecF32(n) => write!(f, "v{n}f32"),
            Ty::Desc(kind) => write!(f, "desc<{kind:?}>"),
            Ty::Table(kind) => write!(f, "table<{kind:?}>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Param(u32),
    /// Float constant, stored as its bit pattern.
    ConstF32(u32),
    ConstI32(u32),
    Undef,
    Inst,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueDef {
    pub ty: Ty,
    pub kind: ValueKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    FNeg,
    FAbs,
    BitcastToI32,
    BitcastToF32,
    /// Round toward negative infinity and convert to a signed integer.
    FloorToI32,
    /// Narrow an image descriptor to the buffer descriptor in its first four dwords.
    TruncateDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMin,
    FMax,
    IAdd,
    IMul,
    UDiv,
    LShr,
    And,
}

/// Comparison predicate. Float compares are ordered, integer compares unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleVariant {
    Plain,
    Bias,
    Deriv,
    Lod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivAxis {
    X,
    Y,
}

/// Opaque hardware operations with fixed argument conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// `(buffer_desc, byte_offset: i32) -> f32`
    LoadConst,
    /// `(buffer_desc, attr_offset: i32, index: i32) -> v4f32`
    VertexFetch,
    /// `(chan: i32, attr: i32, prim_mask: i32, ij: v2i32) -> f32`
    Interp,
    /// `(chan: i32, attr: i32, prim_mask: i32) -> f32`
    InterpConstant,
    /// `(address: vNi32, image_desc, sampler_desc, target: i32) -> v4f32`
    Sample {
        variant: SampleVariant,
        address_width: u8,
    },
    /// `(address: vNi32, image_desc, target: i32) -> v4i32`
    ImageLoad { address_width: u8 },
    /// `(lod: f32, image_desc, target: i32) -> v4i32`
    ResInfo,
    /// `(buffer_desc, base: i32, index: i32) -> v4`, typed fetch from a buffer texture.
    BufferLoad,
    /// `(v4f32) -> v4f32` returning `(t, s, major_axis, face)`.
    Cube,
    /// `() -> i32`, the invocation's lane inside the thread group.
    ThreadId,
    /// `(f32)`, kills the invocation when the argument is negative.
    Kill,
    /// `()`, kills unconditionally.
    KillAll,
    /// `(f32, f32) -> i32`
    PackF16,
    /// `(buffer_desc, data, voffset: i32, soffset: i32, inst_offset: i32)`
    BufferStore { num_channels: u8 },
    /// `(f32) -> f32`, used when no derivative scratch area is available.
    Derivative(DerivAxis),
}

impl Intrinsic {
    pub fn name(&self) -> String {
        match self {
            Intrinsic::LoadConst => "hw.load.const".to_owned(),
            Intrinsic::VertexFetch => "hw.vs.load.input".to_owned(),
            Intrinsic::Interp => "hw.fs.interp".to_owned(),
            Intrinsic::InterpConstant => "hw.fs.constant".to_owned(),
            Intrinsic::Sample {
                variant,
                address_width,
            } => {
                let base = match variant {
                    SampleVariant::Plain => "hw.sample",
                    SampleVariant::Bias => "hw.sampleb",
                    SampleVariant::Deriv => "hw.sampled",
                    SampleVariant::Lod => "hw.samplel",
                };
                format!("{base}.v{address_width}i32")
            }
            Intrinsic::ImageLoad { address_width } => {
                format!("hw.imageload.v{address_width}i32")
            }
            Intrinsic::ResInfo => "hw.resinfo".to_owned(),
            Intrinsic::BufferLoad => "hw.buffer.load".to_owned(),
            Intrinsic::Cube => "hw.cube".to_owned(),
            Intrinsic::ThreadId => "hw.tid".to_owned(),
            Intrinsic::Kill => "hw.kill".to_owned(),
            Intrinsic::KillAll => "hw.kill.all".to_owned(),
            Intrinsic::PackF16 => "hw.packf16".to_owned(),
            Intrinsic::BufferStore { num_channels } => {
                format!("hw.buffer.store.x{num_channels}")
            }
            Intrinsic::Derivative(DerivAxis::X) => "hw.ddx".to_owned(),
            Intrinsic::Derivative(DerivAxis::Y) => "hw.ddy".to_owned(),
        }
    }
}

/// Downstream consumer of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportTarget {
    /// Color render target.
    Mrt(u8),
    /// Combined depth/stencil export.
    MrtZ,
    /// Position-class export (position, misc vector, clip distances).
    Pos(u8),
    /// Parameter (varying) export read back by the fragment stage.
    Param(u8),
}

impl ExportTarget {
    pub fn is_position(self) -> bool {
        matches!(self, ExportTarget::Pos(_))
    }
}

impl fmt::Display for ExportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportTarget::Mrt(i) => write!(f, "mrt{i}"),
            ExportTarget::MrtZ => f.write_str("mrtz"),
            ExportTarget::Pos(i) => write!(f, "pos{i}"),
            ExportTarget::Param(i) => write!(f, "param{i}"),
        }
    }
}

/// One export instruction: four data lanes plus control flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Export {
    pub enabled_mask: u8,
    /// The execution mask doubles as the pixel valid mask.
    pub valid_mask: bool,
    /// Last export of the invocation.
    pub done: bool,
    pub target: ExportTarget,
    /// Lanes hold packed 16-bit pairs.
    pub compressed: bool,
    pub data: [Value; 4],
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ParamAttrs: u8 {
        /// Lives in a uniform (scalar) register.
        const IN_REG = 1 << 0;
        /// Pointer argument whose pointee is passed by value.
        const BY_VAL = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    pub role: ParamRole,
    pub ty: Ty,
    pub attrs: ParamAttrs,
}

/// Stage-local scratch memory, in 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchAlloc {
    pub words: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Invariant load of `table[index]`.
    IndexedLoad { table: Value, index: Value },
    Unary { op: UnaryOp, src: Value },
    Binary { op: BinaryOp, lhs: Value, rhs: Value },
    FCmp { op: CmpOp, lhs: Value, rhs: Value },
    ICmp { op: CmpOp, lhs: Value, rhs: Value },
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },
    Extract { vector: Value, lane: u8 },
    Gather { elems: Vec<Value> },
    Call {
        intrinsic: Intrinsic,
        args: Vec<Value>,
    },
    Export(Export),
    ScratchStore { index: Value, value: Value },
    ScratchLoad { index: Value },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub result: Option<Value>,
    pub op: Op,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Inst(Inst),
    If { cond: Value, then_block: Block },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

impl Block {
    pub fn new() -> Self {
        Self::default()
    }

    fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Inst)) {
        for stmt in &self.stmts {
            match stmt {
                Stmt::Inst(inst) => f(inst),
                Stmt::If { then_block, .. } => then_block.visit(f),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub stage: Stage,
    pub params: Vec<Param>,
    pub scratch: Option<ScratchAlloc>,
    pub(crate) values: Vec<ValueDef>,
    pub body: Block,
}

impl Function {
    pub fn value(&self, value: Value) -> &ValueDef {
        &self.values[value.index()]
    }

    pub fn ty(&self, value: Value) -> Ty {
        self.value(value).ty
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// Float constant behind `value`, if it is one.
    pub fn const_f32(&self, value: Value) -> Option<f32> {
        match self.value(value).kind {
            ValueKind::ConstF32(bits) => Some(f32::from_bits(bits)),
            _ => None,
        }
    }

    pub fn const_i32(&self, value: Value) -> Option<u32> {
        match self.value(value).kind {
            ValueKind::ConstI32(v) => Some(v),
            _ => None,
        }
    }

    /// Parameter slot behind `value`, if it is a parameter.
    pub fn param_index(&self, value: Value) -> Option<u32> {
        match self.value(value).kind {
            ValueKind::Param(i) => Some(i),
            _ => None,
        }
    }

    /// All instructions in program order, descending into `If` bodies.
    pub fn insts(&self) -> Vec<&Inst> {
        let mut out = Vec::new();
        self.body.visit(&mut |inst| out.push(inst));
        out
    }

    /// The instruction producing `value`.
    pub fn def(&self, value: Value) -> Option<&Inst> {
        self.insts().into_iter().find(|i| i.result == Some(value))
    }

    pub fn exports(&self) -> Vec<&Export> {
        self.insts()
            .into_iter()
            .filter_map(|inst| match &inst.op {
                Op::Export(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Calls of intrinsics matching `pred`, in program order.
    pub fn calls(&self, mut pred: impl FnMut(&Intrinsic) -> bool) -> Vec<&Inst> {
        self.insts()
            .into_iter()
            .filter(|inst| matches!(&inst.op, Op::Call { intrinsic, .. } if pred(intrinsic)))
            .collect()
    }

    fn fmt_value(&self, value: Value) -> String {
        match self.value(value).kind {
            ValueKind::ConstF32(bits) => format!("{:?}", f32::from_bits(bits)),
            ValueKind::ConstI32(v) => format!("{v}u"),
            ValueKind::Undef => "undef".to_owned(),
            ValueKind::Param(_) | ValueKind::Inst => format!("%{}", value.0),
        }
    }

    fn fmt_values(&self, values: &[Value]) -> String {
        values
            .iter()
            .map(|v| self.fmt_value(*v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn fmt_op(&self, op: &Op) -> String {
        let v = |value: Value| self.fmt_value(value);
        match op {
            Op::IndexedLoad { table, index } => format!("load {}[{}]", v(*table), v(*index)),
            Op::Unary { op, src } => format!("{op:?} {}", v(*src)),
            Op::Binary { op, lhs, rhs } => format!("{op:?} {}, {}", v(*lhs), v(*rhs)),
            Op::FCmp { op, lhs, rhs } => format!("fcmp.{op:?} {}, {}", v(*lhs), v(*rhs)),
            Op::ICmp { op, lhs, rhs } => format!("icmp.{op:?} {}, {}", v(*lhs), v(*rhs)),
            Op::Select {
                cond,
                on_true,
                on_false,
            } => format!("select {}, {}, {}", v(*cond), v(*on_true), v(*on_false)),
            Op::Extract { vector, lane } => format!("extract {}[{lane}]", v(*vector)),
            Op::Gather { elems } => format!("gather [{}]", self.fmt_values(elems)),
            Op::Call { intrinsic, args } => {
                format!("call {}({})", intrinsic.name(), self.fmt_values(args))
            }
            Op::Export(e) => format!(
                "export {} mask=0x{:x}{}{}{} [{}]",
                e.target,
                e.enabled_mask,
                if e.valid_mask { " vm" } else { "" },
                if e.done { " done" } else { "" },
                if e.compressed { " compr" } else { "" },
                self.fmt_values(&e.data)
            ),
            Op::ScratchStore { index, value } => {
                format!("scratch_store [{}], {}", v(*index), v(*value))
            }
            Op::ScratchLoad { index } => format!("scratch_load [{}]", v(*index)),
        }
    }

    fn fmt_block(&self, f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        for stmt in &block.stmts {
            match stmt {
                Stmt::Inst(inst) => match inst.result {
                    Some(r) => writeln!(
                        f,
                        "{indent}%{}: {} = {}",
                        r.0,
                        self.ty(r),
                        self.fmt_op(&inst.op)
                    )?,
                    None => writeln!(f, "{indent}{}", self.fmt_op(&inst.op))?,
                },
                Stmt::If { cond, then_block } => {
                    writeln!(f, "{indent}if {} {{", self.fmt_value(*cond))?;
                    self.fmt_block(f, then_block, depth + 1)?;
                    writeln!(f, "{indent}}}")?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self.stage {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        };
        writeln!(f, "{stage} (")?;
        for (i, p) in self.params.iter().enumerate() {
            let mut attrs = String::new();
            if p.attrs.contains(ParamAttrs::IN_REG) {
                attrs.push_str(" inreg");
            }
            if p.attrs.contains(ParamAttrs::BY_VAL) {
                attrs.push_str(" byval");
            }
            writeln!(f, "  %{i}: {}{attrs} ; {:?}", p.ty, p.role)?;
        }
        match self.scratch {
            Some(s) => writeln!(f, ") scratch[{}] {{", s.words)?,
            None => writeln!(f, ") {{")?,
        }
        self.fmt_block(f, &self.body, 1)?;
        writeln!(f, "}}")
    }
}
