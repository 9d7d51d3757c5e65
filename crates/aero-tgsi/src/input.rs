//! Input binding: vertex fetches and fragment interpolation.

use tracing::warn;

use crate::abi::{FragmentParams, VertexParams};
use crate::builder::IrBuilder;
use crate::ir::{BinaryOp, CmpOp, DescKind, Intrinsic, Ty, Value};
use crate::key::{FragmentKey, VertexKey};
use crate::limits::MAX_VERTEX_ATTRIBS;
use crate::tgsi::{Declaration, InterpLocation, Interpolate, Semantic, SemanticDecl};
use crate::translate::{ShaderContext, StageState};

/// How one input register was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputBinding {
    pub register: u32,
    pub semantic: Option<SemanticDecl>,
    /// Effective interpolation mode after flat-shading is applied.
    pub interpolate: Interpolate,
    /// First interpolated parameter slot consumed by this input, if any.
    pub param_offset: Option<u32>,
}

impl ShaderContext<'_> {
    pub(crate) fn bind_input(&mut self, decl: &Declaration, reg: u32) {
        let (lanes, binding) = match &self.stage {
            StageState::Vertex(vs) => {
                let (key, params) = (vs.key, vs.params);
                (Some(self.fetch_vertex_input(&key, &params, reg)), None)
            }
            StageState::Fragment(fs) => {
                let key = fs.key;
                let params = fs.params;
                let ninterp = fs.ninterp;
                let (lanes, interpolate, used) =
                    self.interpolate_input(&key, &params, decl, ninterp);
                let param_offset = (used > 0).then_some(ninterp);
                if let StageState::Fragment(fs) = &mut self.stage {
                    fs.ninterp += used;
                }
                (lanes, Some((interpolate, param_offset)))
            }
        };

        let lanes = lanes.unwrap_or_else(|| [self.b.undef(Ty::F32); 4]);
        self.inputs.insert(reg, lanes);
        let (interpolate, param_offset) = binding.unwrap_or((decl.interpolate, None));
        self.input_bindings.push(InputBinding {
            register: reg,
            semantic: decl.semantic,
            interpolate,
            param_offset,
        });
    }

    /// # Panics
    ///
    /// Panics if `reg` is outside the vertex buffer table.
    fn fetch_vertex_input(&mut self, key: &VertexKey, params: &VertexParams, reg: u32) -> [Value; 4] {
        let attr = reg as usize;
        assert!(
            attr < MAX_VERTEX_ATTRIBS,
            "vertex input {attr} exceeds the limit of {MAX_VERTEX_ATTRIBS}"
        );

        let b = &mut self.b;
        let index = b.const_i32(reg);
        let desc = b.indexed_load(params.vertex_buffer_table, index, Ty::Desc(DescKind::Buffer));

        let divisor = key.instance_divisors[attr];
        let buffer_index = if divisor != 0 {
            let instance = b.iadd(params.instance_id, params.start_instance);
            if divisor > 1 {
                let d = b.const_i32(divisor);
                b.binary(BinaryOp::UDiv, instance, d)
            } else {
                instance
            }
        } else {
            params.vertex_id
        };

        let zero = b.const_i32(0);
        let fetched = b.call(
            Intrinsic::VertexFetch,
            vec![desc, zero, buffer_index],
            Ty::VecF32(4),
        );
        [0, 1, 2, 3].map(|lane| b.extract(fetched, lane))
    }

    /// Returns the channel values, the effective interpolation mode and the number of
    /// parameter slots consumed.
    fn interpolate_input(
        &mut self,
        key: &FragmentKey,
        params: &FragmentParams,
        decl: &Declaration,
        attr: u32,
    ) -> (Option<[Value; 4]>, Interpolate, u32) {
        let semantic = decl.semantic_name();
        let b = &mut self.b;

        match semantic {
            Some(Semantic::Position) => {
                let one = b.const_f32(1.0);
                let w = b.binary(BinaryOp::FDiv, one, params.pos[3]);
                let lanes = [params.pos[0], params.pos[1], params.pos[2], w];
                return (Some(lanes), decl.interpolate, 0);
            }
            Some(Semantic::Face) => {
                let zero = b.const_f32(0.0);
                let one = b.const_f32(1.0);
                let is_front = b.fcmp(CmpOp::Gt, params.front_face, zero);
                let face = b.select(is_front, one, zero);
                return (Some([face, zero, zero, one]), decl.interpolate, 0);
            }
            _ => {}
        }

        let interpolate = match decl.interpolate {
            Interpolate::Color if key.flatshade => Interpolate::Constant,
            Interpolate::Color => Interpolate::Perspective,
            other => other,
        };
        let ij = match (interpolate, decl.location) {
            (Interpolate::Constant, _) => None,
            (Interpolate::Linear, InterpLocation::Sample) => Some(params.linear_sample),
            (Interpolate::Linear, InterpLocation::Centroid) => Some(params.linear_centroid),
            (Interpolate::Linear, InterpLocation::Center) => Some(params.linear_center),
            (Interpolate::Perspective, InterpLocation::Sample) => Some(params.persp_sample),
            (Interpolate::Perspective, InterpLocation::Centroid) => Some(params.persp_centroid),
            (Interpolate::Perspective, InterpLocation::Center) => Some(params.persp_center),
            (mode, _) => {
                // The slot is still consumed so later inputs keep their attributes.
                warn!(?mode, register = decl.first, "unhandled interpolation mode");
                return (None, interpolate, 1);
            }
        };

        let interp = |b: &mut IrBuilder, chan: u32, attr: u32| {
            let chan = b.const_i32(chan);
            let attr = b.const_i32(attr);
            match ij {
                Some(ij) => b.call(
                    Intrinsic::Interp,
                    vec![chan, attr, params.prim_mask, ij],
                    Ty::F32,
                ),
                None => b.call(
                    Intrinsic::InterpConstant,
                    vec![chan, attr, params.prim_mask],
                    Ty::F32,
                ),
            }
        };

        if semantic == Some(Semantic::Color) && key.color_two_side {
            let zero = b.const_f32(0.0);
            let is_front = b.fcmp(CmpOp::Gt, params.front_face, zero);
            let lanes = [0, 1, 2, 3].map(|chan| {
                let front = interp(b, chan, attr);
                let back = interp(b, chan, attr + 1);
                b.select(is_front, front, back)
            });
            return (Some(lanes), interpolate, 2);
        }

        if semantic == Some(Semantic::Fog) {
            let fog = interp(b, 0, attr);
            let zero = b.const_f32(0.0);
            let one = b.const_f32(1.0);
            return (Some([fog, zero, zero, one]), interpolate, 1);
        }

        let lanes = [0, 1, 2, 3].map(|chan| interp(b, chan, attr));
        (Some(lanes), interpolate, 1)
    }
}

