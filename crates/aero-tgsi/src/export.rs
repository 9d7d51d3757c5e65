//! Output export epilogue.
//!
//! Runs once after the token walk. The order of emitted exports is fixed:
//!
//! - streamout stores (vertex stage, when streamout is enabled), gated on the thread id;
//! - parameter exports, in declaration order, as they are reached;
//! - fragment color exports, held back one at a time so the last one can carry `done`;
//! - the combined depth/stencil export;
//! - position-class exports (vertex stage), renumbered densely, the last one flagged `done`.
//!
//! Every shader ends with exactly one `done` export. A fragment shader without color or depth
//! outputs still emits an empty export.

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::abi::VertexParams;
use crate::builder::IrBuilder;
use crate::ir::{BinaryOp, CmpOp, DescKind, Export, ExportTarget, Intrinsic, Ty, UnaryOp, Value};
use crate::key::{CompareFunc, FragmentKey, StreamOutputInfo};
use crate::limits::{
    MAX_COLOR_BUFFERS, MAX_CONST_BUFFERS, MAX_PARAM_EXPORTS, MAX_POSITION_EXPORTS,
    MAX_SHADER_OUTPUTS, MAX_STREAMOUT_BUFFERS,
};
use crate::tgsi::{Semantic, WriteMask};
use crate::translate::{ShaderContext, StageState};

/// Render-target export format selected per color buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorExportFormat {
    /// Color buffer not written.
    #[default]
    Zero,
    F32Abgr,
    Fp16Abgr,
}

bitflags! {
    /// Contents of the vertex stage's position-class exports.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct MiscWrites: u8 {
        const POSITION = 1 << 0;
        const POINT_SIZE = 1 << 1;
        /// The misc vector (position slot 1) is exported.
        const MISC_VECTOR = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexOutputs {
    pub param_exports: u32,
    pub pos_exports: u32,
    /// Bit `4*i + c` is set when clip distance `c` of vector `i` is written.
    pub clip_dist_write: u8,
    pub misc: MiscWrites,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentOutputs {
    pub color_formats: [ColorExportFormat; MAX_COLOR_BUFFERS as usize],
    /// Four bits per color buffer written by the shader.
    pub cb_shader_mask: u32,
    pub writes_z: bool,
    pub writes_stencil: bool,
    /// Number of interpolated parameter slots read.
    pub num_interp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSummary {
    Vertex(VertexOutputs),
    Fragment(FragmentOutputs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    NotStarted,
    StreamoutEmitted,
    WalkingDeclarations,
    DepthStencilPending,
    FinalExportsEmitted,
    Done,
}

struct Epilogue {
    phase: Phase,
    /// Fragment export held back until the next one arrives.
    pending: Option<Export>,
    positions: [Option<Export>; MAX_POSITION_EXPORTS],
    param_count: u32,
    depth_index: Option<u32>,
    stencil_index: Option<u32>,
    misc: MiscWrites,
    clip_dist_write: u8,
    color_formats: [ColorExportFormat; MAX_COLOR_BUFFERS as usize],
    cb_shader_mask: u32,
}

impl Epilogue {
    fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            pending: None,
            positions: [None; MAX_POSITION_EXPORTS],
            param_count: 0,
            depth_index: None,
            stencil_index: None,
            misc: MiscWrites::empty(),
            clip_dist_write: 0,
            color_formats: [ColorExportFormat::Zero; MAX_COLOR_BUFFERS as usize],
            cb_shader_mask: 0,
        }
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "epilogue moved from {:?} to {next:?}", self.phase);
        trace!(from = ?self.phase, to = ?next, "epilogue phase");
        self.phase = next;
    }
}

fn export(target: ExportTarget, enabled_mask: u8, data: [Value; 4]) -> Export {
    Export {
        enabled_mask,
        valid_mask: false,
        done: false,
        target,
        compressed: false,
        data,
    }
}

fn alpha_compare(func: CompareFunc) -> Option<CmpOp> {
    match func {
        CompareFunc::Less => Some(CmpOp::Lt),
        CompareFunc::Equal => Some(CmpOp::Eq),
        CompareFunc::LessEqual => Some(CmpOp::Le),
        CompareFunc::Greater => Some(CmpOp::Gt),
        CompareFunc::NotEqual => Some(CmpOp::Ne),
        CompareFunc::GreaterEqual => Some(CmpOp::Ge),
        CompareFunc::Never | CompareFunc::Always => None,
    }
}

impl<'a> ShaderContext<'a> {
    /// Emits every export of the shader and summarizes what was written.
    pub(crate) fn emit_epilogue(&mut self) -> OutputSummary {
        let mut ep = Epilogue::new();

        if let StageState::Vertex(vs) = &self.stage {
            let streamout: &'a StreamOutputInfo = vs.streamout;
            let params = vs.params;
            if streamout.is_enabled() {
                self.emit_streamout(streamout, &params);
                ep.advance(Phase::StreamoutEmitted);
            }
        }

        ep.advance(Phase::WalkingDeclarations);
        let decls = std::mem::take(&mut self.output_decls);
        for decl in &decls {
            for reg in decl.registers() {
                let values = self.output_values(reg);
                let semantic = decl.semantic.map(|s| (s.name, s.index + (reg - decl.first)));
                let (name, index) = match semantic {
                    Some((name, index)) => (Some(name), index),
                    None => (None, 0),
                };
                self.export_output(&mut ep, reg, name, index, decl.usage_mask, values);
            }
        }
        self.output_decls = decls;

        if ep.depth_index.is_some() || ep.stencil_index.is_some() {
            ep.advance(Phase::DepthStencilPending);
            self.export_depth_stencil(&mut ep);
        }

        let summary = match &self.stage {
            StageState::Vertex(_) => {
                let pos_exports = self.emit_position_exports(&mut ep);
                OutputSummary::Vertex(VertexOutputs {
                    param_exports: ep.param_count,
                    pos_exports,
                    clip_dist_write: ep.clip_dist_write,
                    misc: ep.misc,
                })
            }
            StageState::Fragment(fs) => {
                let num_interp = fs.ninterp;
                self.emit_last_fragment_export(&mut ep);
                OutputSummary::Fragment(FragmentOutputs {
                    color_formats: ep.color_formats,
                    cb_shader_mask: ep.cb_shader_mask,
                    writes_z: ep.depth_index.is_some(),
                    writes_stencil: ep.stencil_index.is_some(),
                    num_interp,
                })
            }
        };
        ep.advance(Phase::FinalExportsEmitted);

        debug!(
            params = ep.param_count,
            clip_dist_write = ep.clip_dist_write,
            cb_shader_mask = ep.cb_shader_mask,
            "emitted exports"
        );
        ep.advance(Phase::Done);
        summary
    }

    fn output_values(&mut self, reg: u32) -> [Value; 4] {
        match self.outputs.get(&reg) {
            Some(values) => *values,
            None => [self.b.undef(Ty::F32); 4],
        }
    }

    fn export_output(
        &mut self,
        ep: &mut Epilogue,
        reg: u32,
        name: Option<Semantic>,
        index: u32,
        usage: WriteMask,
        values: [Value; 4],
    ) {
        let vertex = matches!(self.stage, StageState::Vertex(_));
        match name {
            Some(Semantic::Position) if vertex => {
                ep.misc |= MiscWrites::POSITION;
                ep.positions[0] = Some(export(ExportTarget::Pos(0), 0xf, values));
            }
            Some(Semantic::Position) => ep.depth_index = Some(reg),
            Some(Semantic::Stencil) if !vertex => ep.stencil_index = Some(reg),
            Some(Semantic::PSize) if vertex => {
                ep.misc |= MiscWrites::POINT_SIZE | MiscWrites::MISC_VECTOR;
                ep.positions[1] = Some(export(ExportTarget::Pos(1), 0xf, values));
            }
            Some(Semantic::Color | Semantic::BColor) if vertex => self.export_param(ep, values),
            Some(Semantic::Color | Semantic::BColor) => self.export_color(ep, index, values),
            Some(Semantic::ClipDist) if vertex => {
                let enabled = match &self.stage {
                    StageState::Vertex(vs) => vs.key.clip_distance_enable,
                    StageState::Fragment(_) => 0,
                };
                if index < 2 && enabled & (1 << index) != 0 {
                    ep.clip_dist_write |= (usage.0 & 0xf) << (4 * index);
                    let slot = 2 + index as u8;
                    ep.positions[slot as usize] =
                        Some(export(ExportTarget::Pos(slot), 0xf, values));
                }

                // Enabled or not, the value is also passed on to the fragment stage.
                self.export_output(ep, reg, Some(Semantic::Generic), index, usage, values);
            }
            Some(Semantic::ClipVertex) if vertex => self.export_clip_vertex(ep, values),
            Some(Semantic::Fog | Semantic::Generic) if vertex => self.export_param(ep, values),
            other => {
                warn!(semantic = ?other, register = reg, "unhandled output semantic");
                let e = export(ExportTarget::Mrt(0), 0xf, values);
                if vertex {
                    self.b.export(e);
                } else {
                    self.queue_fragment_export(ep, e);
                }
            }
        }
    }

    /// # Panics
    ///
    /// Panics when more than [`MAX_PARAM_EXPORTS`] parameters are exported.
    fn export_param(&mut self, ep: &mut Epilogue, values: [Value; 4]) {
        assert!(
            ep.param_count < MAX_PARAM_EXPORTS,
            "more than {MAX_PARAM_EXPORTS} parameter exports"
        );
        let target = ExportTarget::Param(ep.param_count as u8);
        ep.param_count += 1;
        self.b.export(export(target, 0xf, values));
    }

    fn queue_fragment_export(&mut self, ep: &mut Epilogue, e: Export) {
        if let Some(previous) = ep.pending.replace(e) {
            self.b.export(previous);
        }
    }

    /// # Panics
    ///
    /// Panics if `index` is not a valid color buffer.
    fn export_color(&mut self, ep: &mut Epilogue, index: u32, mut values: [Value; 4]) {
        let StageState::Fragment(fs) = &self.stage else {
            return;
        };
        let key = fs.key;
        let alpha_ref = fs.params.alpha_ref;
        assert!(
            index < MAX_COLOR_BUFFERS,
            "color output {index} exceeds the limit of {MAX_COLOR_BUFFERS}"
        );

        if key.alpha_to_one {
            values[3] = self.b.const_f32(1.0);
        }
        if index == 0 && key.alpha_func != CompareFunc::Always {
            self.emit_alpha_test(key.alpha_func, values[3], alpha_ref);
        }

        if index == 0 && self.info.color0_writes_all_cbufs {
            for cbuf in 1..u32::from(key.nr_cbufs).min(MAX_COLOR_BUFFERS) {
                let e = self.color_export(ep, &key, cbuf, values);
                self.b.export(e);
            }
        }

        let e = self.color_export(ep, &key, index, values);
        self.queue_fragment_export(ep, e);
    }

    fn color_export(
        &mut self,
        ep: &mut Epilogue,
        key: &FragmentKey,
        cbuf: u32,
        values: [Value; 4],
    ) -> Export {
        ep.cb_shader_mask |= 0xf << (4 * cbuf);
        let target = ExportTarget::Mrt(cbuf as u8);

        if !key.exports_16bpc(cbuf) {
            ep.color_formats[cbuf as usize] = ColorExportFormat::F32Abgr;
            return export(target, 0xf, values);
        }

        ep.color_formats[cbuf as usize] = ColorExportFormat::Fp16Abgr;
        let [r, g, b, a] = values;
        let rg = self.b.call(Intrinsic::PackF16, vec![r, g], Ty::I32);
        let ba = self.b.call(Intrinsic::PackF16, vec![b, a], Ty::I32);
        let rg = self.b.unary(UnaryOp::BitcastToF32, rg);
        let ba = self.b.unary(UnaryOp::BitcastToF32, ba);
        Export {
            compressed: true,
            ..export(target, 0xf, [rg, ba, rg, ba])
        }
    }

    fn emit_alpha_test(&mut self, func: CompareFunc, alpha: Value, alpha_ref: Value) {
        let Some(op) = alpha_compare(func) else {
            if func == CompareFunc::Never {
                self.b.call_void(Intrinsic::KillAll, Vec::new());
            }
            return;
        };
        let pass = self.b.fcmp(op, alpha, alpha_ref);
        let keep = self.b.const_f32(1.0);
        let kill = self.b.const_f32(-1.0);
        let arg = self.b.select(pass, keep, kill);
        self.b.call_void(Intrinsic::Kill, vec![arg]);
    }

    /// Depth comes from the z channel of its output, stencil from the y channel. A missing
    /// value is filled from the other one so all lanes carry data.
    fn export_depth_stencil(&mut self, ep: &mut Epilogue) {
        let depth = ep.depth_index.map(|reg| self.output_values(reg)[2]);
        let stencil = ep.stencil_index.map(|reg| self.output_values(reg)[1]);

        let mut mask = 0;
        if depth.is_some() {
            mask |= 0x1;
        }
        if stencil.is_some() {
            mask |= 0x3;
        }
        let (z, s) = match (depth, stencil) {
            (Some(z), Some(s)) => (z, s),
            (Some(z), None) => (z, z),
            (None, Some(s)) => (s, s),
            (None, None) => return,
        };

        let e = export(ExportTarget::MrtZ, mask, [z, s, z, z]);
        if ep.pending.is_some() {
            self.b.export(e);
        } else {
            ep.pending = Some(e);
        }
    }

    /// Without any color or depth output an empty 32-bit export to color buffer 0 is still
    /// emitted, and color buffer 0 is marked as written so the export is accepted.
    fn emit_last_fragment_export(&mut self, ep: &mut Epilogue) {
        let mut last = match ep.pending.take() {
            Some(e) => e,
            None => {
                ep.color_formats[0] = ColorExportFormat::F32Abgr;
                ep.cb_shader_mask |= 0xf;
                let undef = self.b.undef(Ty::F32);
                export(ExportTarget::Mrt(0), 0, [undef; 4])
            }
        };
        last.valid_mask = true;
        last.done = true;
        self.b.export(last);
    }

    /// Emits the buffered position-class exports and returns how many there were.
    fn emit_position_exports(&mut self, ep: &mut Epilogue) -> u32 {
        if ep.positions[0].is_none() {
            let zero = self.b.const_f32(0.0);
            let one = self.b.const_f32(1.0);
            ep.positions[0] = Some(export(ExportTarget::Pos(0), 0xf, [zero, zero, zero, one]));
        }

        let mut exports: Vec<Export> = ep.positions.iter().flatten().copied().collect();
        let count = exports.len();
        for (i, e) in exports.iter_mut().enumerate() {
            e.target = ExportTarget::Pos(i as u8);
            e.done = i + 1 == count;
        }
        for e in exports {
            self.b.export(e);
        }
        count as u32
    }

    /// User clip planes live in constant table entry [`MAX_CONST_BUFFERS`]; distance `c` of
    /// vector `r` is the dot product of plane `4*r + c` with the clip vertex.
    fn export_clip_vertex(&mut self, ep: &mut Epilogue, values: [Value; 4]) {
        let (enabled, const_table) = match &self.stage {
            StageState::Vertex(vs) => (vs.key.clip_distance_enable, vs.params.common.const_table),
            StageState::Fragment(_) => return,
        };
        if enabled & 0x3 == 0 {
            return;
        }

        let b = &mut self.b;
        let index = b.const_i32(MAX_CONST_BUFFERS);
        let planes = b.indexed_load(const_table, index, Ty::Desc(DescKind::Buffer));

        for r in 0..2u32 {
            if enabled & (1 << r) == 0 {
                continue;
            }
            let term = |b: &mut IrBuilder, c: u32, k: u32| {
                let offset = b.const_i32(((r * 4 + c) * 4 + k) * 4);
                let coeff = b.call(Intrinsic::LoadConst, vec![planes, offset], Ty::F32);
                b.fmul(coeff, values[k as usize])
            };
            let mut lanes = values;
            for (c, lane) in lanes.iter_mut().enumerate() {
                let mut sum = term(b, c as u32, 0);
                for k in 1..4 {
                    let t = term(b, c as u32, k);
                    sum = b.fadd(sum, t);
                }
                *lane = sum;
            }
            let slot = 2 + r as u8;
            ep.positions[slot as usize] = Some(export(ExportTarget::Pos(slot), 0xf, lanes));
            ep.clip_dist_write |= 0xf << (4 * r);
        }
    }

    fn emit_streamout(&mut self, so: &StreamOutputInfo, params: &VertexParams) {
        let Some(so_params) = params.streamout else {
            return;
        };

        let b = &mut self.b;
        let sixteen = b.const_i32(16);
        let count_mask = b.const_i32(0x7f);
        let shifted = b.binary(BinaryOp::LShr, so_params.config, sixteen);
        let vertex_count = b.binary(BinaryOp::And, shifted, count_mask);
        let tid = b.call(Intrinsic::ThreadId, Vec::new(), Ty::I32);
        let can_emit = b.icmp(CmpOp::Lt, tid, vertex_count);
        b.begin_if(can_emit);

        let write_index = b.iadd(so_params.write_index, tid);
        let four = b.const_i32(4);
        let mut offsets = [None; MAX_STREAMOUT_BUFFERS];
        for i in so.enabled_buffers() {
            let Some(base) = so_params.offsets[i] else {
                continue;
            };
            let base = b.imul(base, four);
            let stride = b.const_i32(so.stride[i] * 4);
            let rel = b.imul(write_index, stride);
            offsets[i] = Some(b.iadd(base, rel));
        }

        for output in &so.outputs {
            let buffer = output.output_buffer as usize;
            let desc = self.bindings.streamout_buffer(buffer);
            let offset = offsets.get(buffer).copied().flatten();
            let start = output.start_component as usize;
            let count = output.num_components as usize;
            let (Some(desc), Some(offset)) = (desc, offset) else {
                warn!(buffer, "streamout output targets a disabled buffer");
                continue;
            };
            if count == 0 || start + count > 4 || output.register_index >= MAX_SHADER_OUTPUTS {
                warn!(
                    register = output.register_index,
                    start, count, "degenerate streamout output"
                );
                continue;
            }

            let values = self.output_values(output.register_index);
            let mut lanes: Vec<Value> = values[start..start + count]
                .iter()
                .map(|v| self.b.unary(UnaryOp::BitcastToI32, *v))
                .collect();
            let vdata = match count {
                1 => lanes[0],
                2 => self.b.gather(lanes),
                _ => {
                    let undef = self.b.undef(Ty::I32);
                    lanes.resize(4, undef);
                    self.b.gather(lanes)
                }
            };
            let soffset = self.b.const_i32(0);
            let inst_offset = self.b.const_i32(output.dst_offset * 4);
            self.b.call_void(
                Intrinsic::BufferStore {
                    num_channels: count as u8,
                },
                vec![desc, vdata, offset, soffset, inst_offset],
            );
        }

        self.b.end_if();
    }
}
