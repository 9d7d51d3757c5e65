//! Descriptor and constant preloading.
//!
//! Everything a shader references is loaded up front through [`Op::IndexedLoad`]: one
//! descriptor per used constant buffer followed by every scalar constant in its used range, the
//! resource and sampler descriptors of every used texture unit (plus the fmask descriptor of
//! multisampled units), and one descriptor per enabled streamout buffer. Unused loads are left to
//! the backend's dead-code elimination.
//!
//! [`Op::IndexedLoad`]: crate::ir::Op::IndexedLoad

use std::collections::BTreeMap;

use tracing::debug;

use crate::abi::{ParamLayout, StageParams};
use crate::builder::IrBuilder;
use crate::ir::{DescKind, Intrinsic, Ty, Value};
use crate::key::StreamOutputInfo;
use crate::limits::{
    FMASK_RESOURCE_OFFSET, MAX_CONST_BUFFERS, MAX_STREAMOUT_BUFFERS, MAX_TEXTURE_UNITS,
};
use crate::scan::ShaderInfo;

/// Constants of one buffer: the buffer descriptor and `4 * num_const` scalar loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantBuffer {
    pub descriptor: Value,
    /// Scalar `i` is channel `i % 4` of register `i / 4`.
    pub scalars: Vec<Value>,
}

/// Preloaded descriptors, keyed by the binding index the shader uses.
///
/// Multisample auxiliary (fmask) descriptors live in their own map keyed by the same texture
/// unit index as the resource they belong to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceBindings {
    pub constants: BTreeMap<u32, ConstantBuffer>,
    pub resources: BTreeMap<u32, Value>,
    pub samplers: BTreeMap<u32, Value>,
    pub fmasks: BTreeMap<u32, Value>,
    pub streamout_buffers: [Option<Value>; MAX_STREAMOUT_BUFFERS],
}

impl ResourceBindings {
    /// Loads every binding `info` and `streamout` reference.
    ///
    /// # Panics
    ///
    /// Panics if the shader uses more texture units than [`MAX_TEXTURE_UNITS`].
    pub fn preload(
        b: &mut IrBuilder,
        layout: &ParamLayout,
        info: &ShaderInfo,
        streamout: &StreamOutputInfo,
    ) -> Self {
        let mut bindings = ResourceBindings::default();
        let common = *layout.common();

        for buffer in 0..MAX_CONST_BUFFERS {
            let num_const = info.num_constants(buffer);
            if num_const == 0 {
                continue;
            }
            let index = b.const_i32(buffer);
            let descriptor = b.indexed_load(common.const_table, index, Ty::Desc(DescKind::Buffer));
            let scalars = (0..num_const * 4)
                .map(|i| {
                    let offset = b.const_i32(i * 4);
                    b.call(Intrinsic::LoadConst, vec![descriptor, offset], Ty::F32)
                })
                .collect();
            bindings.constants.insert(
                buffer,
                ConstantBuffer {
                    descriptor,
                    scalars,
                },
            );
        }

        let num_samplers = info.num_samplers();
        assert!(
            num_samplers <= MAX_TEXTURE_UNITS,
            "shader uses {num_samplers} texture units, limit is {MAX_TEXTURE_UNITS}"
        );
        for unit in 0..num_samplers {
            let index = b.const_i32(unit);
            let resource = b.indexed_load(common.resource_table, index, Ty::Desc(DescKind::Image));
            let sampler = b.indexed_load(common.sampler_table, index, Ty::Desc(DescKind::Sampler));
            bindings.resources.insert(unit, resource);
            bindings.samplers.insert(unit, sampler);

            if info.is_msaa_sampler(unit) {
                let index = b.const_i32(FMASK_RESOURCE_OFFSET + unit);
                let fmask = b.indexed_load(common.resource_table, index, Ty::Desc(DescKind::Image));
                bindings.fmasks.insert(unit, fmask);
            }
        }

        if let StageParams::Vertex(vs) = &layout.stage {
            if streamout.is_enabled() {
                for i in streamout.enabled_buffers() {
                    let index = b.const_i32(i as u32);
                    bindings.streamout_buffers[i] = Some(b.indexed_load(
                        vs.streamout_buffer_table,
                        index,
                        Ty::Desc(DescKind::Buffer),
                    ));
                }
            }
        }

        debug!(
            const_buffers = bindings.constants.len(),
            texture_units = bindings.resources.len(),
            fmasks = bindings.fmasks.len(),
            "preloaded resources"
        );
        bindings
    }

    pub fn constant(&self, buffer: u32, index: u32, chan: usize) -> Option<Value> {
        self.constants
            .get(&buffer)?
            .scalars
            .get(index as usize * 4 + chan)
            .copied()
    }

    pub fn const_descriptor(&self, buffer: u32) -> Option<Value> {
        self.constants.get(&buffer).map(|c| c.descriptor)
    }

    pub fn resource(&self, unit: u32) -> Option<Value> {
        self.resources.get(&unit).copied()
    }

    pub fn sampler(&self, unit: u32) -> Option<Value> {
        self.samplers.get(&unit).copied()
    }

    pub fn fmask(&self, unit: u32) -> Option<Value> {
        self.fmasks.get(&unit).copied()
    }

    pub fn streamout_buffer(&self, index: usize) -> Option<Value> {
        self.streamout_buffers.get(index).copied().flatten()
    }
}
