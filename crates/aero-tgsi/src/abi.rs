//! Per-stage calling convention of the emitted program.
//!
//! Every stage starts with a contiguous run of uniform parameters (descriptor tables, streamout
//! state, start instance, alpha reference, primitive mask) followed by the per-invocation
//! hardware inputs. Uniform parameters are register-resident (`inreg`), table pointers are also
//! passed by value; per-invocation parameters carry no attributes.

use crate::builder::IrBuilder;
use crate::ir::{DescKind, Param, ParamAttrs, ScratchAlloc, Stage, Ty, Value};
use crate::key::StreamOutputInfo;
use crate::limits::MAX_STREAMOUT_BUFFERS;
use crate::options::Capabilities;
use crate::scan::ShaderInfo;
use crate::tgsi::Processor;
use crate::translate::TranslateError;

/// Semantic name of a parameter slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamRole {
    ConstTable,
    SamplerTable,
    ResourceTable,
    VertexBufferTable,
    StreamoutBufferTable,
    StartInstance,
    StreamoutConfig,
    StreamoutWriteIndex,
    StreamoutOffset(u8),
    VertexId,
    /// Hardware-provided per-vertex input the translator never reads.
    Unused(u8),
    InstanceId,
    AlphaRef,
    PrimMask,
    PerspSample,
    PerspCenter,
    PerspCentroid,
    PerspPullModel,
    LinearSample,
    LinearCenter,
    LinearCentroid,
    LineStippleTex,
    PosX,
    PosY,
    PosZ,
    PosW,
    FrontFace,
    Ancillary,
    SampleCoverage,
    PosFixedPt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonParams {
    pub const_table: Value,
    pub sampler_table: Value,
    pub resource_table: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamoutParams {
    /// Bits [22:16] hold the number of valid vertices in the thread group.
    pub config: Value,
    pub write_index: Value,
    /// Per-buffer write offset in dwords, present only for buffers with a nonzero stride.
    pub offsets: [Option<Value>; MAX_STREAMOUT_BUFFERS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexParams {
    pub common: CommonParams,
    pub vertex_buffer_table: Value,
    pub streamout_buffer_table: Value,
    pub start_instance: Value,
    pub streamout: Option<StreamoutParams>,
    pub vertex_id: Value,
    pub instance_id: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentParams {
    pub common: CommonParams,
    pub alpha_ref: Value,
    pub prim_mask: Value,
    pub persp_sample: Value,
    pub persp_center: Value,
    pub persp_centroid: Value,
    pub persp_pull_model: Value,
    pub linear_sample: Value,
    pub linear_center: Value,
    pub linear_centroid: Value,
    pub line_stipple_tex: Value,
    pub pos: [Value; 4],
    pub front_face: Value,
    pub ancillary: Value,
    pub sample_coverage: Value,
    pub pos_fixed_pt: Value,
}

/// Stage-tagged view of the parameter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageParams {
    Vertex(VertexParams),
    Fragment(FragmentParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    pub params: Vec<Param>,
    /// Length of the uniform prefix of `params`.
    pub num_uniform: usize,
    pub stage: StageParams,
    /// Derivative scratch area, `wave_size` words of stage-local memory.
    pub scratch: Option<ScratchAlloc>,
}

struct Slots<'a> {
    builder: &'a mut IrBuilder,
    params: Vec<Param>,
}

impl Slots<'_> {
    fn uniform(&mut self, role: ParamRole, ty: Ty) -> Value {
        let mut attrs = ParamAttrs::IN_REG;
        if matches!(ty, Ty::Table(_)) {
            attrs |= ParamAttrs::BY_VAL;
        }
        self.add(role, ty, attrs)
    }

    fn varying(&mut self, role: ParamRole, ty: Ty) -> Value {
        self.add(role, ty, ParamAttrs::empty())
    }

    fn add(&mut self, role: ParamRole, ty: Ty, attrs: ParamAttrs) -> Value {
        let value = self.builder.param(self.params.len() as u32, ty);
        self.params.push(Param { role, ty, attrs });
        value
    }

    fn common(&mut self) -> CommonParams {
        CommonParams {
            const_table: self.uniform(ParamRole::ConstTable, Ty::Table(DescKind::Buffer)),
            sampler_table: self.uniform(ParamRole::SamplerTable, Ty::Table(DescKind::Sampler)),
            resource_table: self.uniform(ParamRole::ResourceTable, Ty::Table(DescKind::Image)),
        }
    }
}

impl ParamLayout {
    /// Builds the parameter list for `processor` and declares the parameters in `builder`.
    pub fn build(
        processor: Option<Processor>,
        info: &ShaderInfo,
        streamout: &StreamOutputInfo,
        caps: &Capabilities,
        builder: &mut IrBuilder,
    ) -> Result<Self, TranslateError> {
        let mut slots = Slots {
            builder,
            params: Vec::new(),
        };

        let stage = match processor {
            Some(Processor::Vertex) => {
                StageParams::Vertex(Self::build_vertex(&mut slots, streamout))
            }
            Some(Processor::Fragment) => StageParams::Fragment(Self::build_fragment(&mut slots)),
            other => return Err(TranslateError::UnsupportedStage(other)),
        };

        let num_uniform = slots
            .params
            .iter()
            .take_while(|p| p.attrs.contains(ParamAttrs::IN_REG))
            .count();

        let scratch = (caps.derivatives && info.uses_derivatives()).then_some(ScratchAlloc {
            words: caps.wave_size,
        });

        Ok(Self {
            params: slots.params,
            num_uniform,
            stage,
            scratch,
        })
    }

    fn build_vertex(slots: &mut Slots<'_>, streamout: &StreamOutputInfo) -> VertexParams {
        let common = slots.common();
        let vertex_buffer_table =
            slots.uniform(ParamRole::VertexBufferTable, Ty::Table(DescKind::Buffer));
        let streamout_buffer_table =
            slots.uniform(ParamRole::StreamoutBufferTable, Ty::Table(DescKind::Buffer));
        let start_instance = slots.uniform(ParamRole::StartInstance, Ty::I32);

        let streamout = streamout.is_enabled().then(|| {
            let config = slots.uniform(ParamRole::StreamoutConfig, Ty::I32);
            let write_index = slots.uniform(ParamRole::StreamoutWriteIndex, Ty::I32);
            let mut offsets = [None; MAX_STREAMOUT_BUFFERS];
            for i in streamout.enabled_buffers() {
                offsets[i] = Some(slots.uniform(ParamRole::StreamoutOffset(i as u8), Ty::I32));
            }
            StreamoutParams {
                config,
                write_index,
                offsets,
            }
        });

        let vertex_id = slots.varying(ParamRole::VertexId, Ty::I32);
        slots.varying(ParamRole::Unused(0), Ty::I32);
        slots.varying(ParamRole::Unused(1), Ty::I32);
        let instance_id = slots.varying(ParamRole::InstanceId, Ty::I32);

        VertexParams {
            common,
            vertex_buffer_table,
            streamout_buffer_table,
            start_instance,
            streamout,
            vertex_id,
            instance_id,
        }
    }

    fn build_fragment(slots: &mut Slots<'_>) -> FragmentParams {
        let common = slots.common();
        let alpha_ref = slots.uniform(ParamRole::AlphaRef, Ty::F32);
        let prim_mask = slots.uniform(ParamRole::PrimMask, Ty::I32);

        let ij = Ty::VecI32(2);
        let persp_sample = slots.varying(ParamRole::PerspSample, ij);
        let persp_center = slots.varying(ParamRole::PerspCenter, ij);
        let persp_centroid = slots.varying(ParamRole::PerspCentroid, ij);
        let persp_pull_model = slots.varying(ParamRole::PerspPullModel, Ty::VecI32(3));
        let linear_sample = slots.varying(ParamRole::LinearSample, ij);
        let linear_center = slots.varying(ParamRole::LinearCenter, ij);
        let linear_centroid = slots.varying(ParamRole::LinearCentroid, ij);
        let line_stipple_tex = slots.varying(ParamRole::LineStippleTex, Ty::F32);
        let pos = [
            slots.varying(ParamRole::PosX, Ty::F32),
            slots.varying(ParamRole::PosY, Ty::F32),
            slots.varying(ParamRole::PosZ, Ty::F32),
            slots.varying(ParamRole::PosW, Ty::F32),
        ];
        let front_face = slots.varying(ParamRole::FrontFace, Ty::F32);
        let ancillary = slots.varying(ParamRole::Ancillary, Ty::I32);
        let sample_coverage = slots.varying(ParamRole::SampleCoverage, Ty::F32);
        let pos_fixed_pt = slots.varying(ParamRole::PosFixedPt, Ty::F32);

        FragmentParams {
            common,
            alpha_ref,
            prim_mask,
            persp_sample,
            persp_center,
            persp_centroid,
            persp_pull_model,
            linear_sample,
            linear_center,
            linear_centroid,
            line_stipple_tex,
            pos,
            front_face,
            ancillary,
            sample_coverage,
            pos_fixed_pt,
        }
    }

    pub fn ir_stage(&self) -> Stage {
        match self.stage {
            StageParams::Vertex(_) => Stage::Vertex,
            StageParams::Fragment(_) => Stage::Fragment,
        }
    }

    pub fn common(&self) -> &CommonParams {
        match &self.stage {
            StageParams::Vertex(vs) => &vs.common,
            StageParams::Fragment(fs) => &fs.common,
        }
    }

    /// Slot index of the parameter with `role`.
    pub fn index_of(&self, role: ParamRole) -> Option<usize> {
        self.params.iter().position(|p| p.role == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::StreamOutput;
    use crate::tgsi::{DstRegister, File, Instruction, Opcode, SrcRegister, TgsiShader};

    fn layout(
        processor: Option<Processor>,
        info: &ShaderInfo,
        streamout: &StreamOutputInfo,
        caps: &Capabilities,
    ) -> Result<ParamLayout, TranslateError> {
        let mut builder = IrBuilder::new();
        ParamLayout::build(processor, info, streamout, caps, &mut builder)
    }

    #[test]
    fn vertex_layout_without_streamout() {
        let l = layout(
            Some(Processor::Vertex),
            &ShaderInfo::default(),
            &StreamOutputInfo::default(),
            &Capabilities::default(),
        )
        .unwrap();

        let roles: Vec<_> = l.params.iter().map(|p| p.role).collect();
        assert_eq!(
            roles,
            vec![
                ParamRole::ConstTable,
                ParamRole::SamplerTable,
                ParamRole::ResourceTable,
                ParamRole::VertexBufferTable,
                ParamRole::StreamoutBufferTable,
                ParamRole::StartInstance,
                ParamRole::VertexId,
                ParamRole::Unused(0),
                ParamRole::Unused(1),
                ParamRole::InstanceId,
            ]
        );
        assert_eq!(l.num_uniform, 6);
        assert_eq!(
            l.params[0].attrs,
            ParamAttrs::IN_REG | ParamAttrs::BY_VAL
        );
        assert_eq!(l.params[5].attrs, ParamAttrs::IN_REG);
        assert!(l.params[6..].iter().all(|p| p.attrs.is_empty()));
        assert!(l.scratch.is_none());
    }

    #[test]
    fn streamout_offsets_only_for_nonzero_strides() {
        let streamout = StreamOutputInfo {
            stride: [4, 0, 2, 0],
            outputs: vec![StreamOutput {
                register_index: 0,
                start_component: 0,
                num_components: 4,
                output_buffer: 0,
                dst_offset: 0,
            }],
        };
        let l = layout(
            Some(Processor::Vertex),
            &ShaderInfo::default(),
            &streamout,
            &Capabilities::default(),
        )
        .unwrap();

        assert_eq!(l.index_of(ParamRole::StreamoutConfig), Some(6));
        assert_eq!(l.index_of(ParamRole::StreamoutWriteIndex), Some(7));
        assert_eq!(l.index_of(ParamRole::StreamoutOffset(0)), Some(8));
        assert_eq!(l.index_of(ParamRole::StreamoutOffset(1)), None);
        assert_eq!(l.index_of(ParamRole::StreamoutOffset(2)), Some(9));
        assert_eq!(l.num_uniform, 10);
        assert_eq!(l.index_of(ParamRole::VertexId), Some(10));

        let StageParams::Vertex(vs) = l.stage else {
            panic!("expected vertex params");
        };
        let so = vs.streamout.unwrap();
        assert!(so.offsets[0].is_some());
        assert!(so.offsets[1].is_none());
    }

    #[test]
    fn fragment_layout_prefix_and_positions() {
        let l = layout(
            Some(Processor::Fragment),
            &ShaderInfo::default(),
            &StreamOutputInfo::default(),
            &Capabilities::default(),
        )
        .unwrap();

        assert_eq!(l.num_uniform, 5);
        assert_eq!(l.index_of(ParamRole::AlphaRef), Some(3));
        assert_eq!(l.index_of(ParamRole::PrimMask), Some(4));
        assert_eq!(l.index_of(ParamRole::PerspSample), Some(5));
        assert_eq!(l.index_of(ParamRole::PosX), Some(13));
        assert_eq!(l.index_of(ParamRole::FrontFace), Some(17));
        assert_eq!(l.index_of(ParamRole::PosFixedPt), Some(20));
        assert_eq!(l.params.len(), 21);
        assert_eq!(l.params[5].ty, Ty::VecI32(2));
        assert_eq!(l.params[8].ty, Ty::VecI32(3));
    }

    #[test]
    fn derivative_scratch_requires_capability_and_usage() {
        let mut shader = TgsiShader::new(Processor::Fragment);
        shader.push(Instruction::new(
            Opcode::Ddx,
            vec![DstRegister::new(File::Temporary, 0)],
            vec![SrcRegister::new(File::Temporary, 0)],
        ));
        let info = ShaderInfo::scan(&shader);

        let caps = Capabilities {
            derivatives: true,
            wave_size: 32,
        };
        let with = layout(shader.processor, &info, &StreamOutputInfo::default(), &caps).unwrap();
        assert_eq!(with.scratch, Some(ScratchAlloc { words: 32 }));

        let caps = Capabilities {
            derivatives: false,
            ..caps
        };
        let without =
            layout(shader.processor, &info, &StreamOutputInfo::default(), &caps).unwrap();
        assert_eq!(without.scratch, None);

        let unused = layout(
            shader.processor,
            &ShaderInfo::default(),
            &StreamOutputInfo::default(),
            &Capabilities::default(),
        )
        .unwrap();
        assert_eq!(unused.scratch, None);
    }

    #[test]
    fn geometry_stage_is_rejected() {
        let err = layout(
            Some(Processor::Geometry),
            &ShaderInfo::default(),
            &StreamOutputInfo::default(),
            &Capabilities::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnsupportedStage(Some(Processor::Geometry))
        ));
    }
}
