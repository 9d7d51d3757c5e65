mod common;

use aero_tgsi::abi::ParamRole;
use aero_tgsi::eval::{self, EvalError, Val};
use aero_tgsi::ir::{
    ExportTarget, Function, Inst, Intrinsic, Op, SampleVariant, Ty, UnaryOp, Value,
};
use aero_tgsi::tgsi::{
    Declaration, DstRegister, File, Instruction, Opcode, Processor, Semantic, SrcRegister,
    TexOffset, TextureTarget, TgsiShader,
};
use aero_tgsi::{
    translate, CompilerOptions, FragmentKey, ShaderInfo, ShaderKey, StreamOutputInfo,
    TranslateError,
};
use pretty_assertions::assert_eq;

use common::*;

fn imm(index: u32) -> SrcRegister {
    SrcRegister::new(File::Immediate, index)
}

fn sampler() -> SrcRegister {
    SrcRegister::new(File::Sampler, 0)
}

/// Fragment shader writing the result of one texture instruction to color 0.
fn texture_shader(
    immediates: &[[f32; 4]],
    opcode: Opcode,
    target: TextureTarget,
    src: Vec<SrcRegister>,
) -> TgsiShader {
    let mut shader = TgsiShader::new(Processor::Fragment);
    shader.declare(Declaration::output(0, Semantic::Color, 0));
    for values in immediates {
        shader.immediate_f32(*values);
    }
    shader.push(Instruction::texture(
        opcode,
        target,
        DstRegister::new(File::Output, 0),
        src,
    ));
    shader
}

fn fragment(shader: &TgsiShader) -> Function {
    translate_key(shader, ShaderKey::Fragment(FragmentKey::default())).function
}

fn single_call<'f>(f: &'f Function, mut pred: impl FnMut(&Intrinsic) -> bool) -> &'f Inst {
    let calls = f.calls(&mut pred);
    assert_eq!(calls.len(), 1, "expected exactly one matching call");
    calls[0]
}

fn call_parts(inst: &Inst) -> (Intrinsic, &[Value]) {
    match &inst.op {
        Op::Call { intrinsic, args } => (*intrinsic, args.as_slice()),
        other => panic!("not a call: {other:?}"),
    }
}

/// Float constants behind each lane of a packed address; `None` for undefined padding.
fn address_lanes(f: &Function, inst: &Inst) -> Vec<Option<f32>> {
    let (_, args) = call_parts(inst);
    let Some(Inst {
        op: Op::Gather { elems },
        ..
    }) = f.def(args[0])
    else {
        panic!("address is not a gathered vector");
    };
    elems
        .iter()
        .map(|lane| match f.def(*lane).map(|i| &i.op) {
            Some(Op::Unary {
                op: UnaryOp::BitcastToI32,
                src,
            }) => Some(f.const_f32(*src).expect("non-constant address lane")),
            None => None,
            Some(other) => panic!("unexpected address lane {other:?}"),
        })
        .collect()
}

fn lanes_f32(values: &[Val]) -> Vec<Val> {
    values
        .iter()
        .map(|v| match v {
            Val::I32(bits) => Val::F32(f32::from_bits(*bits)),
            other => other.clone(),
        })
        .collect()
}

/// Sampling double that returns its own address, reinterpreted as floats and padded to four lanes.
fn echo_address(intrinsic: Intrinsic, args: &[Val]) -> Result<Val, EvalError> {
    match (intrinsic, &args[0]) {
        (Intrinsic::Sample { .. }, Val::Vector(lanes)) => {
            let mut lanes = lanes_f32(lanes);
            lanes.resize(lanes.len().max(4), Val::Undef);
            Ok(Val::Vector(lanes))
        }
        (Intrinsic::Cube, _) => Ok(Val::Vector(vec![
            Val::F32(0.5),
            Val::F32(-0.5),
            Val::F32(-2.0),
            Val::F32(3.0),
        ])),
        (other, _) => Err(unhandled(other)),
    }
}

fn color0(f: &Function, handler: &mut dyn eval::IntrinsicHandler) -> [Val; 4] {
    let out = eval::run(f, args(f, |_| None), 0, handler).unwrap();
    out.export(ExportTarget::Mrt(0)).unwrap().data.clone()
}

#[test]
fn plain_sample_packs_the_used_coordinates() {
    let shader = texture_shader(
        &[[0.25, 0.75, 0.5, 0.125]],
        Opcode::Tex,
        TextureTarget::Tex2D,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| matches!(i, Intrinsic::Sample { .. }));
    let (intrinsic, args) = call_parts(call);

    assert_eq!(intrinsic.name(), "hw.sample.v2i32");
    assert_eq!(address_lanes(&f, call), vec![Some(0.25), Some(0.75)]);
    assert_eq!(f.ty(args[0]), Ty::VecI32(2));
    assert_eq!(f.const_i32(args[3]), Some(TextureTarget::Tex2D.code()));
}

#[test]
fn bias_leads_and_address_is_padded() {
    let shader = texture_shader(
        &[[0.1, 0.2, 0.3, 2.0]],
        Opcode::Txb,
        TextureTarget::Tex2D,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| matches!(i, Intrinsic::Sample { .. }));

    assert_eq!(
        call_parts(call).0,
        Intrinsic::Sample {
            variant: SampleVariant::Bias,
            address_width: 4
        }
    );
    assert_eq!(
        address_lanes(&f, call),
        vec![Some(2.0), Some(0.1), Some(0.2), None]
    );
}

#[test]
fn shadow_reference_precedes_coordinates() {
    let shader = texture_shader(
        &[[0.1, 0.2, 0.5, 0.0]],
        Opcode::Tex,
        TextureTarget::Shadow2D,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| matches!(i, Intrinsic::Sample { .. }));
    assert_eq!(
        address_lanes(&f, call),
        vec![Some(0.5), Some(0.1), Some(0.2), None]
    );
}

#[test]
fn explicit_lod_follows_coordinates() {
    let shader = texture_shader(
        &[[0.1, 0.2, 0.3, 3.0]],
        Opcode::Txl,
        TextureTarget::Tex3D,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| matches!(i, Intrinsic::Sample { .. }));
    assert_eq!(call_parts(call).0.name(), "hw.samplel.v4i32");
    assert_eq!(
        address_lanes(&f, call),
        vec![Some(0.1), Some(0.2), Some(0.3), Some(3.0)]
    );
}

#[test]
fn explicit_gradients_are_interleaved_per_coordinate() {
    let shader = texture_shader(
        &[[0.5, 0.25, 0.0, 0.0], [1.0, 2.0, 0.0, 0.0], [3.0, 4.0, 0.0, 0.0]],
        Opcode::Txd,
        TextureTarget::Tex2D,
        vec![imm(0), imm(1), imm(2), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| matches!(i, Intrinsic::Sample { .. }));

    assert_eq!(call_parts(call).0.name(), "hw.sampled.v8i32");
    assert_eq!(
        address_lanes(&f, call),
        vec![
            Some(1.0),
            Some(3.0),
            Some(2.0),
            Some(4.0),
            Some(0.5),
            Some(0.25),
            None,
            None
        ]
    );
}

#[test]
fn projective_coordinates_are_divided_by_w() {
    let shader = texture_shader(
        &[[1.0, 2.0, 3.0, 4.0]],
        Opcode::Txp,
        TextureTarget::Tex2D,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    assert_eq!(
        color0(&f, &mut echo_address),
        [Val::F32(0.25), Val::F32(0.5), Val::Undef, Val::Undef]
    );
}

#[test]
fn cube_array_folds_the_layer_into_the_face() {
    let shader = texture_shader(
        &[[1.0, 0.0, 0.0, 2.0]],
        Opcode::Tex,
        TextureTarget::CubeArray,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    // s = -0.5 / 2 + 1.5, t = 0.5 / 2 + 1.5, face = 3 + 8 * 2
    assert_eq!(
        color0(&f, &mut echo_address),
        [Val::F32(1.25), Val::F32(1.75), Val::F32(19.0), Val::Undef]
    );
}

#[test]
fn shadow_cube_array_takes_reference_from_second_operand() {
    let shader = texture_shader(
        &[[1.0, 0.0, 0.0, 2.0], [0.7, 0.0, 0.0, 0.0]],
        Opcode::Tex,
        TextureTarget::ShadowCubeArray,
        vec![imm(0), imm(1), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| matches!(i, Intrinsic::Sample { .. }));
    assert_eq!(call_parts(call).0.name(), "hw.sample.v8i32");
    assert_eq!(
        color0(&f, &mut echo_address),
        [Val::F32(0.7), Val::F32(2.0), Val::F32(1.25), Val::F32(1.75)]
    );
}

#[test]
fn texel_fetch_applies_immediate_offsets() {
    let mut shader = TgsiShader::new(Processor::Fragment);
    shader
        .declare(Declaration::output(0, Semantic::Color, 0))
        .immediate_u32([10, 20, 0, 1])
        .immediate_u32([1, (-2i32) as u32, 0, 0])
        .push(
            Instruction::texture(
                Opcode::Txf,
                TextureTarget::Tex2D,
                DstRegister::new(File::Output, 0),
                vec![imm(0), sampler()],
            )
            .with_offset(TexOffset {
                immediate: 1,
                swizzle: [0, 1, 2],
            }),
        );
    let f = fragment(&shader);
    assert!(f.calls(|i| matches!(i, Intrinsic::Sample { .. })).is_empty());

    let mut load = |intrinsic: Intrinsic, args: &[Val]| match intrinsic {
        Intrinsic::ImageLoad { address_width: 4 } => Ok(args[0].clone()),
        other => Err(unhandled(other)),
    };
    assert_eq!(
        color0(&f, &mut load),
        [
            Val::F32(f32::from_bits(11)),
            Val::F32(f32::from_bits(18)),
            Val::F32(f32::from_bits(1)),
            Val::Undef
        ]
    );
}

/// Runs a multisampled fetch of `sample` at (3, 5) and returns the `[x, y, sample]` address the
/// image load received, along with the fmask address.
fn msaa_fetch(
    f: &Function,
    descriptor: [u32; 8],
    fmask_word: u32,
    sample: u32,
) -> ([u32; 3], Val) {
    let mut fmask_address = None;
    let mut handler = |intrinsic: Intrinsic, args: &[Val]| match intrinsic {
        Intrinsic::Interp => {
            let lane = [3, 5, 0, sample][i32_arg(args, 0) as usize];
            Ok(Val::F32(f32::from_bits(lane)))
        }
        Intrinsic::ImageLoad { address_width: 4 } if fmask_address.is_none() => {
            assert_eq!(
                i32_arg(args, 2),
                TextureTarget::Tex2D.code(),
                "fmask is read as a single-sampled 2D image"
            );
            fmask_address = Some(args[0].clone());
            Ok(Val::Vector(vec![
                Val::I32(fmask_word),
                Val::I32(0),
                Val::I32(0),
                Val::I32(0),
            ]))
        }
        Intrinsic::ImageLoad { address_width: 4 } => Ok(args[0].clone()),
        other => Err(unhandled(other)),
    };

    let params = args(f, |role| match role {
        ParamRole::ResourceTable => Some(image_table(descriptor)),
        _ => None,
    });
    let out = eval::run(f, params, 0, &mut handler).unwrap();
    let data = &out.export(ExportTarget::Mrt(0)).unwrap().data;
    let lane = |i: usize| match data[i] {
        Val::F32(v) => v.to_bits(),
        ref other => panic!("address lane {i} is {other:?}"),
    };
    (
        [lane(0), lane(1), lane(2)],
        fmask_address.expect("fmask was not read"),
    )
}

fn msaa_shader_with(offset: Option<TexOffset>) -> Function {
    let mut shader = TgsiShader::new(Processor::Fragment);
    let mut fetch = Instruction::texture(
        Opcode::Txf,
        TextureTarget::Tex2DMsaa,
        DstRegister::new(File::Output, 0),
        vec![SrcRegister::new(File::Input, 0), sampler()],
    );
    if let Some(offset) = offset {
        fetch = fetch.with_offset(offset);
    }
    shader
        .declare(Declaration::input(0, Semantic::Generic, 0))
        .declare(Declaration::output(0, Semantic::Color, 0))
        .immediate_u32([1, 2, 0, 0])
        .push(fetch);
    fragment(&shader)
}

fn msaa_shader() -> Function {
    msaa_shader_with(None)
}

#[test]
fn uncompressed_fmask_keeps_the_sample_index() {
    let f = msaa_shader();
    for sample in 0..16 {
        let ([_, _, fetched], _) = msaa_fetch(&f, [0; 8], 0xdead_beef, sample);
        assert_eq!(fetched, sample);
    }
}

#[test]
fn fmask_remaps_the_sample_index() {
    let f = msaa_shader();
    let mut descriptor = [0; 8];
    descriptor[1] = 0x10;

    for sample in 0..8 {
        let ([_, _, fetched], fmask_address) = msaa_fetch(&f, descriptor, 0x0123_4567, sample);
        assert_eq!(fetched, 7 - sample);
        assert_eq!(
            fmask_address,
            Val::Vector(vec![Val::I32(3), Val::I32(5), Val::I32(0), Val::I32(0)])
        );
    }
}

#[test]
fn multisampled_fetch_ignores_texel_offsets() {
    let f = msaa_shader_with(Some(TexOffset {
        immediate: 0,
        swizzle: [0, 1, 2],
    }));
    let mut descriptor = [0; 8];
    descriptor[1] = 0x10;

    let (address, fmask_address) = msaa_fetch(&f, descriptor, 0x0123_4567, 2);
    assert_eq!(address, [3, 5, 5]);
    assert_eq!(
        fmask_address,
        Val::Vector(vec![Val::I32(3), Val::I32(5), Val::I32(0), Val::I32(0)])
    );
}

#[test]
fn buffer_textures_use_a_typed_buffer_load() {
    let shader = texture_shader(
        &[[7.0, 0.0, 0.0, 0.0]],
        Opcode::Tex,
        TextureTarget::Buffer,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    assert!(f.calls(|i| matches!(i, Intrinsic::Sample { .. })).is_empty());

    let call = single_call(&f, |i| *i == Intrinsic::BufferLoad);
    let (_, args) = call_parts(call);
    assert_eq!(f.const_i32(args[1]), Some(0));
    let Some(Inst {
        op: Op::Unary {
            op: UnaryOp::TruncateDesc,
            ..
        },
        ..
    }) = f.def(args[0])
    else {
        panic!("buffer descriptor is not truncated");
    };
}

#[test]
fn size_query_reads_lod_from_x() {
    let shader = texture_shader(
        &[[2.0, 0.0, 0.0, 0.0]],
        Opcode::Txq,
        TextureTarget::Tex2D,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    let call = single_call(&f, |i| *i == Intrinsic::ResInfo);
    let (_, args) = call_parts(call);
    assert_eq!(f.const_f32(args[0]), Some(2.0));
    assert_eq!(f.ty(call.result.unwrap()), Ty::VecI32(4));
}

#[test]
fn buffer_size_query_reads_the_descriptor() {
    let shader = texture_shader(
        &[[0.0; 4]],
        Opcode::Txq,
        TextureTarget::Buffer,
        vec![imm(0), sampler()],
    );
    let f = fragment(&shader);
    assert!(f.calls(|i| *i == Intrinsic::ResInfo).is_empty());
    assert!(f.calls(|i| *i == Intrinsic::BufferLoad).is_empty());

    let mut descriptor = [0; 8];
    descriptor[2] = 96;
    let params = args(&f, |role| match role {
        ParamRole::ResourceTable => Some(image_table(descriptor)),
        _ => None,
    });
    let mut handler = |intrinsic: Intrinsic, _: &[Val]| Err(unhandled(intrinsic));
    let out = eval::run(&f, params, 0, &mut handler).unwrap();
    assert_eq!(
        out.export(ExportTarget::Mrt(0)).unwrap().data[0],
        Val::F32(f32::from_bits(96))
    );
}

#[test]
fn unscanned_sampler_is_reported() {
    let shader = texture_shader(
        &[[0.0; 4]],
        Opcode::Tex,
        TextureTarget::Tex2D,
        vec![imm(0), sampler()],
    );
    // Usage info of a shader that never touches a sampler.
    let info = ShaderInfo::scan(&TgsiShader::new(Processor::Fragment));
    let err = translate(
        &shader,
        &info,
        &ShaderKey::Fragment(FragmentKey::default()),
        &StreamOutputInfo::default(),
        &CompilerOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TranslateError::SamplerNotPreloaded(0)), "{err}");
}

#[test]
fn texture_without_sampler_operand_fails() {
    let shader = texture_shader(&[[0.0; 4]], Opcode::Tex, TextureTarget::Tex2D, vec![imm(0)]);
    let info = ShaderInfo::scan(&shader);
    let err = translate(
        &shader,
        &info,
        &ShaderKey::Fragment(FragmentKey::default()),
        &StreamOutputInfo::default(),
        &CompilerOptions::default(),
    )
    .unwrap_err();
    assert!(
        matches!(err, TranslateError::MissingOperand { operand: 1, .. }),
        "{err}"
    );
}
