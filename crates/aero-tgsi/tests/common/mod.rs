#![allow(dead_code)]

use aero_tgsi::abi::ParamRole;
use aero_tgsi::eval::{EvalError, Val};
use aero_tgsi::ir::{DescKind, ExportTarget, Function, Intrinsic, Ty};
use aero_tgsi::tgsi::TgsiShader;
use aero_tgsi::{
    translate, BackendError, CodeGenerator, CompilerOptions, ShaderBinary, ShaderInfo, ShaderKey,
    StreamOutputInfo, Translation,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn translate_with(
    shader: &TgsiShader,
    key: ShaderKey,
    streamout: &StreamOutputInfo,
) -> Translation {
    init_tracing();
    let info = ShaderInfo::scan(shader);
    translate(shader, &info, &key, streamout, &CompilerOptions::default())
        .expect("translation failed")
}

pub fn translate_key(shader: &TgsiShader, key: ShaderKey) -> Translation {
    translate_with(shader, key, &StreamOutputInfo::default())
}

pub fn targets(f: &Function) -> Vec<ExportTarget> {
    f.exports().iter().map(|e| e.target).collect()
}

pub fn done_count(f: &Function) -> usize {
    f.exports().iter().filter(|e| e.done).count()
}

/// Float constants behind the four data lanes of an export; `None` for non-constant lanes.
pub fn const_lanes(f: &Function, target: ExportTarget) -> [Option<f32>; 4] {
    let export = f
        .exports()
        .into_iter()
        .find(|e| e.target == target)
        .unwrap_or_else(|| panic!("no export to {target}"));
    export.data.map(|v| f.const_f32(v))
}

/// Default value for a parameter of type `ty`: zeroed scalars and 32-entry zeroed tables.
pub fn zero_of(ty: Ty) -> Val {
    match ty {
        Ty::Bool => Val::Bool(false),
        Ty::I32 => Val::I32(0),
        Ty::F32 => Val::F32(0.0),
        Ty::VecI32(n) => Val::Vector(vec![Val::I32(0); n as usize]),
        Ty::VecF32(n) => Val::Vector(vec![Val::F32(0.0); n as usize]),
        Ty::Desc(kind) => Val::Desc(vec![0; kind.words()]),
        Ty::Table(kind) => Val::Table(vec![vec![0; kind.words()]; 32]),
        Ty::Void => Val::Undef,
    }
}

/// Builds the argument list for `f`, letting `fill` override parameters by role.
pub fn args(f: &Function, mut fill: impl FnMut(ParamRole) -> Option<Val>) -> Vec<Val> {
    f.params
        .iter()
        .map(|p| fill(p.role).unwrap_or_else(|| zero_of(p.ty)))
        .collect()
}

pub fn i32_arg(args: &[Val], index: usize) -> u32 {
    args[index]
        .as_i32()
        .unwrap_or_else(|| panic!("argument {index} is {:?}", args[index]))
}

pub fn unhandled(intrinsic: Intrinsic) -> EvalError {
    EvalError::Unhandled(intrinsic.name())
}

/// Image descriptor table whose entries are all `words`.
pub fn image_table(words: [u32; 8]) -> Val {
    Val::Table(vec![words.to_vec(); 32])
}

pub fn buffer_desc() -> Val {
    Val::Desc(vec![0; DescKind::Buffer.words()])
}

/// Code generator double: emits the IR dump as "code" and a fixed register table.
#[derive(Default)]
pub struct FakeBackend {
    pub calls: usize,
    pub fail: bool,
    pub config: Vec<(u32, u32)>,
}

impl CodeGenerator for FakeBackend {
    fn compile(&mut self, function: &Function) -> Result<ShaderBinary, BackendError> {
        self.calls += 1;
        if self.fail {
            return Err(BackendError::new("register allocation failed"));
        }
        Ok(ShaderBinary {
            code: function.to_string().into_bytes(),
            config: self.config.clone(),
        })
    }
}
