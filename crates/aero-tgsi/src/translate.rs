//! Token stream walker.
//!
//! [`translate`] builds the calling convention, preloads resources, then walks the token stream
//! in order: input declarations go to the input binder, texture opcodes to the texture builder,
//! everything else is lowered here. The export epilogue runs once after the walk.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::abi::{FragmentParams, ParamLayout, StageParams, VertexParams};
use crate::builder::IrBuilder;
use crate::export::OutputSummary;
use crate::input::InputBinding;
use crate::ir::{BinaryOp, DerivAxis, Function, Intrinsic, Stage, Ty, UnaryOp, Value};
use crate::key::{FragmentKey, ShaderKey, StreamOutputInfo, VertexKey};
use crate::limits::{MAX_SHADER_INPUTS, MAX_SHADER_OUTPUTS};
use crate::options::{CompilerOptions, DebugFlags};
use crate::preload::ResourceBindings;
use crate::scan::ShaderInfo;
use crate::tgsi::{
    Declaration, DstRegister, File, Instruction, Opcode, Processor, Semantic, SrcRegister,
    TgsiShader, Token,
};

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("unsupported shader stage {0:?}")]
    UnsupportedStage(Option<Processor>),
    #[error("{key:?} shader key used with a {processor:?} token stream")]
    KeyMismatch {
        key: Processor,
        processor: Option<Processor>,
    },
    #[error("unsupported opcode {0}")]
    UnsupportedOpcode(String),
    #[error("{file}[{index}] is not declared")]
    UndeclaredRegister { file: File, index: u32 },
    #[error("{0} cannot be used as a source operand")]
    InvalidSource(File),
    #[error("cannot write to {0}")]
    UnsupportedDestination(File),
    #[error("indirect addressing of {0} is not supported")]
    UnsupportedIndirect(File),
    #[error("{opcode} is missing operand {operand}")]
    MissingOperand { opcode: String, operand: usize },
    #[error("texture unit {0} was not preloaded")]
    SamplerNotPreloaded(u32),
    #[error("CONST[{buffer}][{index}] is outside the preloaded range")]
    ConstantOutOfRange { buffer: u32, index: u32 },
}

/// Result of translating one token stream.
#[derive(Debug, Clone)]
pub struct Translation {
    pub function: Function,
    pub layout: ParamLayout,
    pub inputs: Vec<InputBinding>,
    pub outputs: OutputSummary,
}

pub(crate) struct VertexState<'a> {
    pub(crate) key: VertexKey,
    pub(crate) params: VertexParams,
    pub(crate) streamout: &'a StreamOutputInfo,
}

pub(crate) struct FragmentState {
    pub(crate) key: FragmentKey,
    pub(crate) params: FragmentParams,
    /// Next interpolated parameter slot.
    pub(crate) ninterp: u32,
}

pub(crate) enum StageState<'a> {
    Vertex(VertexState<'a>),
    Fragment(FragmentState),
}

/// In-progress translation of one shader. Dropped at the end of [`translate`].
pub(crate) struct ShaderContext<'a> {
    pub(crate) b: IrBuilder,
    pub(crate) info: &'a ShaderInfo,
    pub(crate) bindings: ResourceBindings,
    pub(crate) stage: StageState<'a>,
    has_scratch: bool,
    temps: HashMap<u32, [Value; 4]>,
    addrs: HashMap<u32, [Value; 4]>,
    system_values: HashMap<u32, [Value; 4]>,
    pub(crate) immediates: Vec<[u32; 4]>,
    pub(crate) inputs: BTreeMap<u32, [Value; 4]>,
    pub(crate) input_bindings: Vec<InputBinding>,
    pub(crate) outputs: BTreeMap<u32, [Value; 4]>,
    pub(crate) output_decls: Vec<Declaration>,
}

/// Translates `shader` into a hardware-intrinsic program for the variant selected by `key`.
///
/// # Panics
///
/// Panics if the shader declares more inputs or outputs than the fixed per-stage capacity.
pub fn translate(
    shader: &TgsiShader,
    info: &ShaderInfo,
    key: &ShaderKey,
    streamout: &StreamOutputInfo,
    options: &CompilerOptions,
) -> Result<Translation, TranslateError> {
    let mut b = IrBuilder::new();
    let layout = ParamLayout::build(
        shader.processor,
        info,
        streamout,
        &options.capabilities,
        &mut b,
    )?;
    let bindings = ResourceBindings::preload(&mut b, &layout, info, streamout);

    let stage = match (layout.stage, key) {
        (StageParams::Vertex(params), ShaderKey::Vertex(key)) => StageState::Vertex(VertexState {
            key: *key,
            params,
            streamout,
        }),
        (StageParams::Fragment(params), ShaderKey::Fragment(key)) => {
            StageState::Fragment(FragmentState {
                key: *key,
                params,
                ninterp: 0,
            })
        }
        _ => {
            return Err(TranslateError::KeyMismatch {
                key: key.processor(),
                processor: shader.processor,
            })
        }
    };

    let mut ctx = ShaderContext::new(b, info, bindings, stage, layout.scratch.is_some());
    ctx.walk(shader)?;
    let outputs = ctx.emit_epilogue();

    let ShaderContext {
        b, input_bindings, ..
    } = ctx;
    let (values, body) = b.finish();
    let function = Function {
        stage: layout.ir_stage(),
        params: layout.params.clone(),
        scratch: layout.scratch,
        values,
        body,
    };

    debug!(
        stage = ?function.stage,
        params = function.params.len(),
        inputs = input_bindings.len(),
        exports = function.exports().len(),
        "translated shader"
    );
    let dump = match function.stage {
        Stage::Vertex => DebugFlags::DUMP_VS,
        Stage::Fragment => DebugFlags::DUMP_FS,
    };
    if options.debug.contains(dump) {
        trace!(target: "aero_tgsi::dump", "\n{function}");
    }

    Ok(Translation {
        function,
        layout,
        inputs: input_bindings,
        outputs,
    })
}

fn missing(inst: &Instruction, operand: usize) -> TranslateError {
    TranslateError::MissingOperand {
        opcode: inst.opcode.name(),
        operand,
    }
}

impl<'a> ShaderContext<'a> {
    fn new(
        b: IrBuilder,
        info: &'a ShaderInfo,
        bindings: ResourceBindings,
        stage: StageState<'a>,
        has_scratch: bool,
    ) -> Self {
        Self {
            b,
            info,
            bindings,
            stage,
            has_scratch,
            temps: HashMap::new(),
            addrs: HashMap::new(),
            system_values: HashMap::new(),
            immediates: Vec::new(),
            inputs: BTreeMap::new(),
            input_bindings: Vec::new(),
            outputs: BTreeMap::new(),
            output_decls: Vec::new(),
        }
    }

    fn walk(&mut self, shader: &TgsiShader) -> Result<(), TranslateError> {
        for token in &shader.tokens {
            match token {
                Token::Declaration(decl) => self.declare(decl),
                Token::Immediate(values) => self.immediates.push(*values),
                Token::Property(_) => {}
                Token::Instruction(inst) if inst.opcode == Opcode::End => break,
                Token::Instruction(inst) => self.emit_instruction(inst)?,
            }
        }
        Ok(())
    }

    fn declare(&mut self, decl: &Declaration) {
        match decl.file {
            File::Input => {
                for reg in decl.registers() {
                    assert!(
                        reg < MAX_SHADER_INPUTS,
                        "input register {reg} exceeds the limit of {MAX_SHADER_INPUTS}"
                    );
                    self.bind_input(decl, reg);
                }
            }
            File::Output => {
                assert!(
                    decl.last < MAX_SHADER_OUTPUTS,
                    "output register {} exceeds the limit of {MAX_SHADER_OUTPUTS}",
                    decl.last
                );
                self.output_decls.push(decl.clone());
            }
            File::SystemValue => self.declare_system_value(decl),
            // Constants and samplers are preloaded; temporaries and addresses are created on
            // first write.
            _ => {}
        }
    }

    fn declare_system_value(&mut self, decl: &Declaration) {
        let vs = match &self.stage {
            StageState::Vertex(vs) => Some(vs.params),
            StageState::Fragment(_) => None,
        };
        let value = match (decl.semantic_name(), vs) {
            // Raw instance id; start instance only applies to instanced vertex fetches.
            (Some(Semantic::InstanceId), Some(vs)) => vs.instance_id,
            (Some(Semantic::VertexId), Some(vs)) => vs.vertex_id,
            (name, _) => {
                warn!(?name, "unhandled system value");
                self.b.undef(Ty::I32)
            }
        };
        let value = self.b.unary(UnaryOp::BitcastToF32, value);
        for reg in decl.registers() {
            self.system_values.insert(reg, [value; 4]);
        }
    }

    fn dst_operand(&self, inst: &Instruction) -> Result<DstRegister, TranslateError> {
        inst.dst.first().copied().ok_or_else(|| missing(inst, 0))
    }

    pub(crate) fn src_operand(
        &self,
        inst: &Instruction,
        index: usize,
    ) -> Result<SrcRegister, TranslateError> {
        inst.src.get(index).copied().ok_or_else(|| missing(inst, index))
    }

    /// Fetches channel `chan` of `src` after swizzle and modifiers, as an `f32` value.
    pub(crate) fn fetch(&mut self, src: &SrcRegister, chan: usize) -> Result<Value, TranslateError> {
        let swizzle = (src.swizzle[chan] & 3) as usize;
        let mut value = self.fetch_register(src, swizzle)?;
        if src.absolute {
            value = self.b.unary(UnaryOp::FAbs, value);
        }
        if src.negate {
            value = self.b.unary(UnaryOp::FNeg, value);
        }
        Ok(value)
    }

    fn fetch_register(&mut self, src: &SrcRegister, chan: usize) -> Result<Value, TranslateError> {
        let undeclared = TranslateError::UndeclaredRegister {
            file: src.file,
            index: src.index,
        };

        if let Some(indirect) = src.indirect {
            if src.file != File::Constant {
                return Err(TranslateError::UnsupportedIndirect(src.file));
            }
            let addr = self
                .addrs
                .get(&indirect.index)
                .map(|a| a[(indirect.swizzle & 3) as usize])
                .ok_or(TranslateError::UndeclaredRegister {
                    file: File::Address,
                    index: indirect.index,
                })?;
            let desc = self.bindings.const_descriptor(src.dimension).ok_or(
                TranslateError::ConstantOutOfRange {
                    buffer: src.dimension,
                    index: src.index,
                },
            )?;
            // Registers are 16 bytes apart.
            let sixteen = self.b.const_i32(16);
            let scaled = self.b.imul(addr, sixteen);
            let base = self.b.const_i32((src.index * 4 + chan as u32) * 4);
            let offset = self.b.iadd(scaled, base);
            return Ok(self
                .b
                .call(Intrinsic::LoadConst, vec![desc, offset], Ty::F32));
        }

        let index = src.index;
        match src.file {
            File::Constant => self.bindings.constant(src.dimension, index, chan).ok_or(
                TranslateError::ConstantOutOfRange {
                    buffer: src.dimension,
                    index,
                },
            ),
            File::Input => self.inputs.get(&index).map(|r| r[chan]).ok_or(undeclared),
            File::SystemValue => self
                .system_values
                .get(&index)
                .map(|r| r[chan])
                .ok_or(undeclared),
            File::Temporary => Ok(match self.temps.get(&index) {
                Some(r) => r[chan],
                None => self.b.undef(Ty::F32),
            }),
            File::Output => Ok(match self.outputs.get(&index) {
                Some(r) => r[chan],
                None => self.b.undef(Ty::F32),
            }),
            File::Immediate => {
                let bits = self
                    .immediates
                    .get(index as usize)
                    .map(|imm| imm[chan])
                    .ok_or(undeclared)?;
                Ok(self.b.const_f32(f32::from_bits(bits)))
            }
            File::Address => {
                let addr = self.addrs.get(&index).map(|r| r[chan]).ok_or(undeclared)?;
                Ok(self.b.unary(UnaryOp::BitcastToF32, addr))
            }
            File::Sampler => Err(TranslateError::InvalidSource(File::Sampler)),
        }
    }

    fn store(&mut self, dst: &DstRegister, chan: usize, value: Value) -> Result<(), TranslateError> {
        let value = if dst.saturate {
            let zero = self.b.const_f32(0.0);
            let one = self.b.const_f32(1.0);
            let clamped = self.b.binary(BinaryOp::FMax, value, zero);
            self.b.binary(BinaryOp::FMin, clamped, one)
        } else {
            value
        };

        let undef = self.b.undef(Ty::F32);
        let file = match dst.file {
            File::Temporary => &mut self.temps,
            File::Output => {
                let reg = self.outputs.entry(dst.index).or_insert([undef; 4]);
                reg[chan] = value;
                return Ok(());
            }
            File::Address => &mut self.addrs,
            other => return Err(TranslateError::UnsupportedDestination(other)),
        };
        file.entry(dst.index).or_insert([undef; 4])[chan] = value;
        Ok(())
    }

    fn store_masked(&mut self, dst: &DstRegister, values: [Value; 4]) -> Result<(), TranslateError> {
        for chan in (0..4).filter(|c| dst.write_mask.contains(*c)) {
            self.store(dst, chan, values[chan])?;
        }
        Ok(())
    }

    fn emit_instruction(&mut self, inst: &Instruction) -> Result<(), TranslateError> {
        match inst.opcode {
            Opcode::Mov
            | Opcode::Add
            | Opcode::Mul
            | Opcode::Mad
            | Opcode::Min
            | Opcode::Max
            | Opcode::Arl => self.emit_componentwise(inst),
            Opcode::Dp3 | Opcode::Dp4 | Opcode::Rcp => self.emit_scalar(inst),
            Opcode::Kill => {
                self.b.call_void(Intrinsic::KillAll, Vec::new());
                Ok(())
            }
            Opcode::KillIf => self.emit_kill_if(inst),
            Opcode::Ddx => self.emit_derivative(inst, DerivAxis::X),
            Opcode::Ddy => self.emit_derivative(inst, DerivAxis::Y),
            op if op.is_texture() => {
                let dst = self.dst_operand(inst)?;
                let result = self.emit_texture(inst)?;
                self.store_masked(&dst, result)
            }
            Opcode::End => Ok(()),
            other => Err(TranslateError::UnsupportedOpcode(other.name())),
        }
    }

    fn emit_componentwise(&mut self, inst: &Instruction) -> Result<(), TranslateError> {
        let dst = self.dst_operand(inst)?;
        for chan in (0..4).filter(|c| dst.write_mask.contains(*c)) {
            let a = self.src_operand(inst, 0)?;
            let a = self.fetch(&a, chan)?;
            let value = match inst.opcode {
                Opcode::Mov => a,
                Opcode::Arl => self.b.unary(UnaryOp::FloorToI32, a),
                Opcode::Add | Opcode::Mul | Opcode::Min | Opcode::Max => {
                    let b = self.src_operand(inst, 1)?;
                    let b = self.fetch(&b, chan)?;
                    let op = match inst.opcode {
                        Opcode::Add => BinaryOp::FAdd,
                        Opcode::Mul => BinaryOp::FMul,
                        Opcode::Min => BinaryOp::FMin,
                        _ => BinaryOp::FMax,
                    };
                    self.b.binary(op, a, b)
                }
                _ => {
                    let b = self.src_operand(inst, 1)?;
                    let c = self.src_operand(inst, 2)?;
                    let b = self.fetch(&b, chan)?;
                    let c = self.fetch(&c, chan)?;
                    let product = self.b.fmul(a, b);
                    self.b.fadd(product, c)
                }
            };
            self.store(&dst, chan, value)?;
        }
        Ok(())
    }

    /// Opcodes producing one scalar replicated to every written channel.
    fn emit_scalar(&mut self, inst: &Instruction) -> Result<(), TranslateError> {
        let dst = self.dst_operand(inst)?;
        let a = self.src_operand(inst, 0)?;
        let value = match inst.opcode {
            Opcode::Rcp => {
                let x = self.fetch(&a, 0)?;
                let one = self.b.const_f32(1.0);
                self.b.binary(BinaryOp::FDiv, one, x)
            }
            _ => {
                let b = self.src_operand(inst, 1)?;
                let n = if inst.opcode == Opcode::Dp3 { 3 } else { 4 };
                let mut sum = None;
                for chan in 0..n {
                    let x = self.fetch(&a, chan)?;
                    let y = self.fetch(&b, chan)?;
                    let p = self.b.fmul(x, y);
                    sum = Some(match sum {
                        Some(s) => self.b.fadd(s, p),
                        None => p,
                    });
                }
                match sum {
                    Some(s) => s,
                    None => self.b.const_f32(0.0),
                }
            }
        };
        self.store_masked(&dst, [value; 4])
    }

    fn emit_kill_if(&mut self, inst: &Instruction) -> Result<(), TranslateError> {
        let src = self.src_operand(inst, 0)?;
        let mut seen = [false; 4];
        for chan in 0..4 {
            let component = (src.swizzle[chan] & 3) as usize;
            if std::mem::replace(&mut seen[component], true) {
                continue;
            }
            let value = self.fetch(&src, chan)?;
            self.b.call_void(Intrinsic::Kill, vec![value]);
        }
        Ok(())
    }

    /// DDX/DDY through the scratch area: every lane stores its value, then reads back the
    /// top-left lane of its 2x2 quad and the right (DDX) or bottom (DDY) neighbour.
    fn emit_derivative(&mut self, inst: &Instruction, axis: DerivAxis) -> Result<(), TranslateError> {
        let dst = self.dst_operand(inst)?;
        let src = self.src_operand(inst, 0)?;

        if !self.has_scratch {
            for chan in (0..4).filter(|c| dst.write_mask.contains(*c)) {
                let value = self.fetch(&src, chan)?;
                let d = self
                    .b
                    .call(Intrinsic::Derivative(axis), vec![value], Ty::F32);
                self.store(&dst, chan, d)?;
            }
            return Ok(());
        }

        let tid = self.b.call(Intrinsic::ThreadId, Vec::new(), Ty::I32);
        let quad_mask = self.b.const_i32(!3);
        let top_left = self.b.binary(BinaryOp::And, tid, quad_mask);
        let step = self.b.const_i32(match axis {
            DerivAxis::X => 1,
            DerivAxis::Y => 2,
        });
        let neighbour = self.b.iadd(top_left, step);

        let mut results: [Option<Value>; 4] = [None; 4];
        for chan in (0..4).filter(|c| dst.write_mask.contains(*c)) {
            let component = (src.swizzle[chan] & 3) as usize;
            let result = match results[component] {
                Some(r) => r,
                None => {
                    let value = self.fetch(&src, chan)?;
                    self.b.scratch_store(tid, value);
                    let tl = self.b.scratch_load(top_left);
                    let other = self.b.scratch_load(neighbour);
                    let r = self.b.binary(BinaryOp::FSub, other, tl);
                    results[component] = Some(r);
                    r
                }
            };
            self.store(&dst, chan, result)?;
        }
        Ok(())
    }
}
