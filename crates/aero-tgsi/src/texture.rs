//! Texture opcodes: address packing and sampling intrinsics.
//!
//! The address operand is assembled in a fixed order:
//!
//! 1. bias (`TXB`)
//! 2. depth-compare value (shadow targets; cube coordinates are remapped first)
//! 3. array layer (`SHADOWCUBE_ARRAY`)
//! 4. derivative pairs (`TXD`), one `(ddx, ddy)` pair per coordinate
//! 5. coordinates
//! 6. LOD (`TXL`) or sample index (`TXF`)
//!
//! and padded with undefined lanes to a power-of-two width.

use crate::builder::IrBuilder;
use crate::ir::{BinaryOp, CmpOp, Intrinsic, SampleVariant, Ty, UnaryOp, Value};
use crate::limits::MAX_TEXTURE_ADDRESS_WIDTH;
use crate::tgsi::{File, Instruction, Opcode, TextureTarget};
use crate::translate::{ShaderContext, TranslateError};

/// Number of coordinates a texel offset applies to. Multisampled targets take no offsets.
fn offset_dims(target: TextureTarget) -> usize {
    match target {
        TextureTarget::Tex1D
        | TextureTarget::Shadow1D
        | TextureTarget::Array1D
        | TextureTarget::Shadow1DArray => 1,
        TextureTarget::Tex2D
        | TextureTarget::Rect
        | TextureTarget::Shadow2D
        | TextureTarget::ShadowRect
        | TextureTarget::Array2D
        | TextureTarget::Shadow2DArray => 2,
        TextureTarget::Tex3D => 3,
        _ => 0,
    }
}

impl ShaderContext<'_> {
    /// Emits a texture opcode and returns the four result channels as `f32` values.
    pub(crate) fn emit_texture(&mut self, inst: &Instruction) -> Result<[Value; 4], TranslateError> {
        let target = inst
            .texture
            .ok_or_else(|| TranslateError::UnsupportedOpcode(inst.opcode.name()))?;
        let sampler = inst
            .src
            .last()
            .filter(|s| s.file == File::Sampler)
            .ok_or(TranslateError::MissingOperand {
                opcode: inst.opcode.name(),
                operand: inst.src.len(),
            })?;
        let unit = sampler.index;
        let resource = self
            .bindings
            .resource(unit)
            .ok_or(TranslateError::SamplerNotPreloaded(unit))?;
        let target_code = self.b.const_i32(target.code());

        if inst.opcode == Opcode::Txq && target == TextureTarget::Buffer {
            // The element count lives in the third descriptor word.
            let size = self.b.extract(resource, 2);
            let size = self.b.unary(UnaryOp::BitcastToF32, size);
            let undef = self.b.undef(Ty::F32);
            return Ok([size, undef, undef, undef]);
        }

        if inst.opcode == Opcode::Txq {
            let src = self.src_operand(inst, 0)?;
            let lod = self.fetch(&src, 0)?;
            let info = self.b.call(
                Intrinsic::ResInfo,
                vec![lod, resource, target_code],
                Ty::VecI32(4),
            );
            return Ok(self.split_result(info));
        }

        if target == TextureTarget::Buffer {
            let src = self.src_operand(inst, 0)?;
            let index = self.fetch(&src, 0)?;
            let index = self.b.unary(UnaryOp::BitcastToI32, index);
            let desc = self.b.unary(UnaryOp::TruncateDesc, resource);
            let base = self.b.const_i32(0);
            let ty = if inst.opcode == Opcode::Txf {
                Ty::VecI32(4)
            } else {
                Ty::VecF32(4)
            };
            let texel = self
                .b
                .call(Intrinsic::BufferLoad, vec![desc, base, index], ty);
            return Ok(self.split_result(texel));
        }

        let address = self.build_address(inst, target, unit)?;

        let result = match inst.opcode {
            Opcode::Txf => {
                let width = self.address_width(address);
                self.b.call(
                    Intrinsic::ImageLoad {
                        address_width: width,
                    },
                    vec![address, resource, target_code],
                    Ty::VecI32(4),
                )
            }
            opcode => {
                let sampler_desc = self
                    .bindings
                    .sampler(unit)
                    .ok_or(TranslateError::SamplerNotPreloaded(unit))?;
                let variant = match opcode {
                    Opcode::Txb => SampleVariant::Bias,
                    Opcode::Txd => SampleVariant::Deriv,
                    Opcode::Txl => SampleVariant::Lod,
                    _ => SampleVariant::Plain,
                };
                let width = self.address_width(address);
                self.b.call(
                    Intrinsic::Sample {
                        variant,
                        address_width: width,
                    },
                    vec![address, resource, sampler_desc, target_code],
                    Ty::VecF32(4),
                )
            }
        };
        Ok(self.split_result(result))
    }

    fn address_width(&self, address: Value) -> u8 {
        match self.b.ty(address) {
            Ty::VecI32(n) | Ty::VecF32(n) => n,
            _ => 1,
        }
    }

    fn split_result(&mut self, vector: Value) -> [Value; 4] {
        let is_int = matches!(self.b.ty(vector), Ty::VecI32(_));
        [0, 1, 2, 3].map(|lane| {
            let v = self.b.extract(vector, lane);
            if is_int {
                self.b.unary(UnaryOp::BitcastToF32, v)
            } else {
                v
            }
        })
    }

    fn build_address(
        &mut self,
        inst: &Instruction,
        target: TextureTarget,
        unit: u32,
    ) -> Result<Value, TranslateError> {
        let opcode = inst.opcode;
        let src0 = self.src_operand(inst, 0)?;
        let mut coords = [
            self.fetch(&src0, 0)?,
            self.fetch(&src0, 1)?,
            self.fetch(&src0, 2)?,
            self.fetch(&src0, 3)?,
        ];

        if opcode == Opcode::Txp {
            let w = coords[3];
            for coord in coords.iter_mut().take(3) {
                *coord = self.b.binary(BinaryOp::FDiv, *coord, w);
            }
            coords[3] = self.b.const_f32(1.0);
        }

        let mut address: Vec<Value> = Vec::with_capacity(MAX_TEXTURE_ADDRESS_WIDTH);

        if opcode == Opcode::Txb {
            address.push(coords[3]);
        }

        if target.is_cube() {
            self.remap_cube_coords(&mut coords, target);
        }

        if let Some(lane) = target.shadow_ref_lane() {
            address.push(coords[lane]);
        } else if target == TextureTarget::ShadowCubeArray {
            let src1 = self.src_operand(inst, 1)?;
            address.push(self.fetch(&src1, 0)?);
        }

        if target == TextureTarget::ShadowCubeArray {
            address.push(coords[3]);
        }

        let dims = target.coord_dim();
        if opcode == Opcode::Txd {
            let ddx = self.src_operand(inst, 1)?;
            let ddy = self.src_operand(inst, 2)?;
            for chan in 0..dims {
                address.push(self.fetch(&ddx, chan)?);
                address.push(self.fetch(&ddy, chan)?);
            }
        }

        let coord_start = address.len();
        address.extend_from_slice(&coords[..dims]);

        if opcode == Opcode::Txl || opcode == Opcode::Txf {
            address.push(coords[3]);
        }

        let mut address: Vec<Value> = address
            .into_iter()
            .map(|v| self.b.unary(UnaryOp::BitcastToI32, v))
            .collect();

        if opcode == Opcode::Txf {
            if let Some(offset) = inst.offsets.first() {
                let imm = self
                    .immediates
                    .get(offset.immediate as usize)
                    .copied()
                    .ok_or(TranslateError::UndeclaredRegister {
                        file: File::Immediate,
                        index: offset.immediate,
                    })?;
                for c in 0..offset_dims(target) {
                    let delta = self.b.const_i32(imm[(offset.swizzle[c] & 3) as usize]);
                    address[coord_start + c] = self.b.iadd(address[coord_start + c], delta);
                }
            }

            if target.is_msaa() {
                let sample_lane = address.len() - 1;
                let layer =
                    (target == TextureTarget::Array2DMsaa).then(|| address[coord_start + 2]);
                address[sample_lane] = self.correct_sample_index(
                    unit,
                    [address[coord_start], address[coord_start + 1]],
                    layer,
                    address[sample_lane],
                )?;
            }
        }

        Ok(self.pad_address(address))
    }

    /// Pads to the next power of two with undefined lanes and gathers into one vector.
    ///
    /// # Panics
    ///
    /// Panics if the address is wider than [`MAX_TEXTURE_ADDRESS_WIDTH`].
    fn pad_address(&mut self, mut address: Vec<Value>) -> Value {
        let width = address.len().next_power_of_two();
        assert!(
            width <= MAX_TEXTURE_ADDRESS_WIDTH,
            "texture address of {} lanes",
            address.len()
        );
        let undef = self.b.undef(Ty::I32);
        address.resize(width, undef);
        self.b.gather(address)
    }

    /// Replaces `coords[0..3]` with the face-relative `(s, t, face)` triple. `coords[3]` keeps the
    /// source `w` (compare value, LOD or array layer).
    fn remap_cube_coords(&mut self, coords: &mut [Value; 4], target: TextureTarget) {
        let b = &mut self.b;
        let input = b.gather(coords.to_vec());
        let cube = b.call(Intrinsic::Cube, vec![input], Ty::VecF32(4));
        let tc = b.extract(cube, 0);
        let sc = b.extract(cube, 1);
        let ma = b.extract(cube, 2);
        let face = b.extract(cube, 3);

        let ma = b.unary(UnaryOp::FAbs, ma);
        let one = b.const_f32(1.0);
        let inv_ma = b.binary(BinaryOp::FDiv, one, ma);
        let one_half = b.const_f32(1.5);
        let mad = |b: &mut IrBuilder, x: Value| {
            let scaled = b.fmul(x, inv_ma);
            b.fadd(scaled, one_half)
        };
        let t = mad(b, tc);
        let s = mad(b, sc);

        let face = if target == TextureTarget::CubeArray {
            // Layer and face share one lane: face + 8 * layer.
            let eight = b.const_f32(8.0);
            let layer = b.fmul(coords[3], eight);
            b.fadd(face, layer)
        } else {
            face
        };

        coords[0] = s;
        coords[1] = t;
        coords[2] = face;
    }

    /// Maps a logical sample index to its physical sample through the fmask.
    ///
    /// The fmask stores one nibble per sample; a descriptor whose second dword is zero marks an
    /// uncompressed surface and leaves the index untouched.
    fn correct_sample_index(
        &mut self,
        unit: u32,
        xy: [Value; 2],
        layer: Option<Value>,
        sample: Value,
    ) -> Result<Value, TranslateError> {
        let fmask = self
            .bindings
            .fmask(unit)
            .ok_or(TranslateError::SamplerNotPreloaded(unit))?;
        let b = &mut self.b;
        let zero = b.const_i32(0);
        let fmask_address = b.gather(vec![xy[0], xy[1], layer.unwrap_or(zero), zero]);
        // The fmask itself is a single-sampled surface.
        let fmask_target = match layer {
            Some(_) => TextureTarget::Array2D,
            None => TextureTarget::Tex2D,
        };
        let target = b.const_i32(fmask_target.code());
        let texel = b.call(
            Intrinsic::ImageLoad { address_width: 4 },
            vec![fmask_address, fmask, target],
            Ty::VecI32(4),
        );
        let word = b.extract(texel, 0);

        let four = b.const_i32(4);
        let shift = b.imul(sample, four);
        let shifted = b.binary(BinaryOp::LShr, word, shift);
        let nibble = b.const_i32(0xf);
        let corrected = b.binary(BinaryOp::And, shifted, nibble);

        let format = b.extract(fmask, 1);
        let valid = b.icmp(CmpOp::Ne, format, zero);
        Ok(b.select(valid, corrected, sample))
    }
}
