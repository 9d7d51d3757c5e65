//! Reference interpreter for emitted programs.
//!
//! Runs a [`Function`] for one invocation. Arithmetic, compares, selects, vector plumbing,
//! bitcasts, descriptor loads and scratch memory are evaluated here; every other intrinsic is
//! delegated to an [`IntrinsicHandler`]. Exports and kills are collected into the returned
//! [`Invocation`].
//!
//! Scratch memory is private to the invocation and starts zeroed; a quad derivative only sees
//! the value this invocation stored.

use thiserror::Error;

use crate::ir::{
    BinaryOp, Block, CmpOp, ExportTarget, Function, Intrinsic, Op, Stmt, UnaryOp, Value, ValueKind,
};

/// Runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Undef,
    Bool(bool),
    I32(u32),
    F32(f32),
    Vector(Vec<Val>),
    /// Descriptor dwords.
    Desc(Vec<u32>),
    /// Descriptor table.
    Table(Vec<Vec<u32>>),
}

impl Val {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Val::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<u32> {
        match self {
            Val::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_undef(&self) -> bool {
        matches!(self, Val::Undef)
    }

    fn kind(&self) -> &'static str {
        match self {
            Val::Undef => "undef",
            Val::Bool(_) => "bool",
            Val::I32(_) => "i32",
            Val::F32(_) => "f32",
            Val::Vector(_) => "vector",
            Val::Desc(_) => "descriptor",
            Val::Table(_) => "table",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("expected {expected} arguments, got {found}")]
    ArgumentCount { expected: usize, found: usize },
    #[error("%{value} used before it was defined")]
    Unbound { value: u32 },
    #[error("%{value}: expected {expected}, found {found}")]
    TypeMismatch {
        value: u32,
        expected: &'static str,
        found: &'static str,
    },
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },
    #[error("program has no scratch memory")]
    NoScratch,
    #[error("no handler for {0}")]
    Unhandled(String),
}

/// Supplies the results of opaque hardware operations.
pub trait IntrinsicHandler {
    fn call(&mut self, intrinsic: Intrinsic, args: &[Val]) -> Result<Val, EvalError>;
}

impl<F> IntrinsicHandler for F
where
    F: FnMut(Intrinsic, &[Val]) -> Result<Val, EvalError>,
{
    fn call(&mut self, intrinsic: Intrinsic, args: &[Val]) -> Result<Val, EvalError> {
        self(intrinsic, args)
    }
}

/// An export with its data lanes evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportValues {
    pub target: ExportTarget,
    pub enabled_mask: u8,
    pub valid_mask: bool,
    pub done: bool,
    pub compressed: bool,
    pub data: [Val; 4],
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Invocation {
    pub exports: Vec<ExportValues>,
    /// A kill fired during the invocation.
    pub killed: bool,
}

impl Invocation {
    pub fn export(&self, target: ExportTarget) -> Option<&ExportValues> {
        self.exports.iter().find(|e| e.target == target)
    }
}

/// Runs `function` with `args` bound to its parameters, in order.
///
/// `thread_id` is returned by [`Intrinsic::ThreadId`].
pub fn run(
    function: &Function,
    args: Vec<Val>,
    thread_id: u32,
    handler: &mut dyn IntrinsicHandler,
) -> Result<Invocation, EvalError> {
    if args.len() != function.params.len() {
        return Err(EvalError::ArgumentCount {
            expected: function.params.len(),
            found: args.len(),
        });
    }

    let mut interp = Interpreter {
        function,
        args,
        values: vec![None; function.num_values()],
        scratch: function.scratch.map(|s| vec![0; s.words as usize]),
        thread_id,
        handler,
        out: Invocation::default(),
    };
    interp.block(&function.body)?;
    Ok(interp.out)
}

struct Interpreter<'a, 'h> {
    function: &'a Function,
    args: Vec<Val>,
    values: Vec<Option<Val>>,
    scratch: Option<Vec<u32>>,
    thread_id: u32,
    handler: &'h mut dyn IntrinsicHandler,
    out: Invocation,
}

impl Interpreter<'_, '_> {
    fn get(&self, value: Value) -> Result<Val, EvalError> {
        let def = self.function.value(value);
        match def.kind {
            ValueKind::Param(i) => self
                .args
                .get(i as usize)
                .cloned()
                .ok_or(EvalError::Unbound { value: value.0 }),
            ValueKind::ConstF32(bits) => Ok(Val::F32(f32::from_bits(bits))),
            ValueKind::ConstI32(v) => Ok(Val::I32(v)),
            ValueKind::Undef => Ok(Val::Undef),
            ValueKind::Inst => self.values[value.index()]
                .clone()
                .ok_or(EvalError::Unbound { value: value.0 }),
        }
    }

    fn f32(&self, value: Value) -> Result<Option<f32>, EvalError> {
        match self.get(value)? {
            Val::F32(v) => Ok(Some(v)),
            Val::Undef => Ok(None),
            other => Err(mismatch(value, "f32", &other)),
        }
    }

    fn i32(&self, value: Value) -> Result<Option<u32>, EvalError> {
        match self.get(value)? {
            Val::I32(v) => Ok(Some(v)),
            Val::Undef => Ok(None),
            other => Err(mismatch(value, "i32", &other)),
        }
    }

    fn block(&mut self, block: &Block) -> Result<(), EvalError> {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Inst(inst) => {
                    let result = self.op(&inst.op)?;
                    if let Some(r) = inst.result {
                        self.values[r.index()] = Some(result);
                    }
                }
                Stmt::If { cond, then_block } => match self.get(*cond)? {
                    Val::Bool(true) => self.block(then_block)?,
                    Val::Bool(false) => {}
                    other => return Err(mismatch(*cond, "bool", &other)),
                },
            }
        }
        Ok(())
    }

    fn op(&mut self, op: &Op) -> Result<Val, EvalError> {
        Ok(match op {
            Op::IndexedLoad { table, index } => {
                let entries = match self.get(*table)? {
                    Val::Table(entries) => entries,
                    other => return Err(mismatch(*table, "table", &other)),
                };
                let Some(i) = self.i32(*index)? else {
                    return Ok(Val::Undef);
                };
                let entry = entries.get(i as usize).ok_or(EvalError::OutOfBounds {
                    index: i as usize,
                    len: entries.len(),
                })?;
                Val::Desc(entry.clone())
            }
            Op::Unary { op, src } => self.unary(*op, *src)?,
            Op::Binary { op, lhs, rhs } => self.binary(*op, *lhs, *rhs)?,
            Op::FCmp { op, lhs, rhs } => match (self.f32(*lhs)?, self.f32(*rhs)?) {
                (Some(a), Some(b)) => Val::Bool(fcmp(*op, a, b)),
                _ => Val::Undef,
            },
            Op::ICmp { op, lhs, rhs } => match (self.i32(*lhs)?, self.i32(*rhs)?) {
                (Some(a), Some(b)) => Val::Bool(icmp(*op, a, b)),
                _ => Val::Undef,
            },
            Op::Select {
                cond,
                on_true,
                on_false,
            } => match self.get(*cond)? {
                Val::Bool(true) => self.get(*on_true)?,
                Val::Bool(false) => self.get(*on_false)?,
                Val::Undef => Val::Undef,
                other => return Err(mismatch(*cond, "bool", &other)),
            },
            Op::Extract { vector, lane } => {
                let lane = *lane as usize;
                match self.get(*vector)? {
                    Val::Vector(lanes) => lanes.get(lane).cloned().ok_or(EvalError::OutOfBounds {
                        index: lane,
                        len: lanes.len(),
                    })?,
                    Val::Desc(words) => Val::I32(*words.get(lane).ok_or(EvalError::OutOfBounds {
                        index: lane,
                        len: words.len(),
                    })?),
                    Val::Undef => Val::Undef,
                    other => return Err(mismatch(*vector, "vector", &other)),
                }
            }
            Op::Gather { elems } => Val::Vector(
                elems
                    .iter()
                    .map(|e| self.get(*e))
                    .collect::<Result<_, _>>()?,
            ),
            Op::Call { intrinsic, args } => self.call(*intrinsic, args)?,
            Op::Export(e) => {
                let data = [
                    self.get(e.data[0])?,
                    self.get(e.data[1])?,
                    self.get(e.data[2])?,
                    self.get(e.data[3])?,
                ];
                self.out.exports.push(ExportValues {
                    target: e.target,
                    enabled_mask: e.enabled_mask,
                    valid_mask: e.valid_mask,
                    done: e.done,
                    compressed: e.compressed,
                    data,
                });
                Val::Undef
            }
            Op::ScratchStore { index, value } => {
                let index = self.i32(*index)?;
                let bits = match self.get(*value)? {
                    Val::F32(v) => Some(v.to_bits()),
                    Val::I32(v) => Some(v),
                    _ => None,
                };
                if let (Some(index), Some(bits)) = (index, bits) {
                    *self.scratch_word(index)? = bits;
                }
                Val::Undef
            }
            Op::ScratchLoad { index } => match self.i32(*index)? {
                Some(index) => Val::F32(f32::from_bits(*self.scratch_word(index)?)),
                None => Val::Undef,
            },
        })
    }

    fn scratch_word(&mut self, index: u32) -> Result<&mut u32, EvalError> {
        let scratch = self.scratch.as_mut().ok_or(EvalError::NoScratch)?;
        let len = scratch.len();
        scratch.get_mut(index as usize).ok_or(EvalError::OutOfBounds {
            index: index as usize,
            len,
        })
    }

    fn unary(&self, op: UnaryOp, src: Value) -> Result<Val, EvalError> {
        let v = self.get(src)?;
        if v.is_undef() {
            return Ok(Val::Undef);
        }
        Ok(match (op, v) {
            (UnaryOp::FNeg, Val::F32(x)) => Val::F32(-x),
            (UnaryOp::FAbs, Val::F32(x)) => Val::F32(x.abs()),
            (UnaryOp::BitcastToI32, Val::F32(x)) => Val::I32(x.to_bits()),
            (UnaryOp::BitcastToI32, Val::I32(x)) => Val::I32(x),
            (UnaryOp::BitcastToF32, Val::I32(x)) => Val::F32(f32::from_bits(x)),
            (UnaryOp::BitcastToF32, Val::F32(x)) => Val::F32(x),
            (UnaryOp::FloorToI32, Val::F32(x)) => Val::I32(x.floor() as i32 as u32),
            (UnaryOp::TruncateDesc, Val::Desc(mut words)) => {
                words.truncate(4);
                Val::Desc(words)
            }
            (_, other) => return Err(mismatch(src, "operand", &other)),
        })
    }

    fn binary(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Val, EvalError> {
        let float = matches!(
            op,
            BinaryOp::FAdd
                | BinaryOp::FSub
                | BinaryOp::FMul
                | BinaryOp::FDiv
                | BinaryOp::FMin
                | BinaryOp::FMax
        );
        if float {
            let (Some(a), Some(b)) = (self.f32(lhs)?, self.f32(rhs)?) else {
                return Ok(Val::Undef);
            };
            return Ok(Val::F32(match op {
                BinaryOp::FAdd => a + b,
                BinaryOp::FSub => a - b,
                BinaryOp::FMul => a * b,
                BinaryOp::FDiv => a / b,
                BinaryOp::FMin => a.min(b),
                _ => a.max(b),
            }));
        }

        let (Some(a), Some(b)) = (self.i32(lhs)?, self.i32(rhs)?) else {
            return Ok(Val::Undef);
        };
        Ok(Val::I32(match op {
            BinaryOp::IAdd => a.wrapping_add(b),
            BinaryOp::IMul => a.wrapping_mul(b),
            // Hardware returns all ones on division by zero.
            BinaryOp::UDiv => a.checked_div(b).unwrap_or(u32::MAX),
            BinaryOp::LShr => a.wrapping_shr(b),
            _ => a & b,
        }))
    }

    fn call(&mut self, intrinsic: Intrinsic, args: &[Value]) -> Result<Val, EvalError> {
        match intrinsic {
            Intrinsic::ThreadId => Ok(Val::I32(self.thread_id)),
            Intrinsic::KillAll => {
                self.out.killed = true;
                Ok(Val::Undef)
            }
            Intrinsic::Kill => {
                let arg = args.first().copied().ok_or(EvalError::ArgumentCount {
                    expected: 1,
                    found: 0,
                })?;
                if self.f32(arg)?.is_some_and(|x| x < 0.0) {
                    self.out.killed = true;
                }
                Ok(Val::Undef)
            }
            _ => {
                let args = self.args_of(args)?;
                self.handler.call(intrinsic, &args)
            }
        }
    }

    fn args_of(&self, args: &[Value]) -> Result<Vec<Val>, EvalError> {
        args.iter().map(|a| self.get(*a)).collect()
    }
}

fn mismatch(value: Value, expected: &'static str, found: &Val) -> EvalError {
    EvalError::TypeMismatch {
        value: value.0,
        expected,
        found: found.kind(),
    }
}

/// Ordered compare: false when either side is NaN.
fn fcmp(op: CmpOp, a: f32, b: f32) -> bool {
    if a.is_nan() || b.is_nan() {
        return false;
    }
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

fn icmp(op: CmpOp, a: u32, b: u32) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::IrBuilder;
    use crate::ir::{Export, Stage, Ty};
    use pretty_assertions::assert_eq;

    fn function(b: IrBuilder, scratch: bool) -> Function {
        let (values, body) = b.finish();
        Function {
            stage: Stage::Fragment,
            params: Vec::new(),
            scratch: scratch.then_some(crate::ir::ScratchAlloc { words: 8 }),
            values,
            body,
        }
    }

    fn no_calls(intrinsic: Intrinsic, _: &[Val]) -> Result<Val, EvalError> {
        Err(EvalError::Unhandled(intrinsic.name()))
    }

    #[test]
    fn arithmetic_select_and_export() {
        let mut b = IrBuilder::new();
        let two = b.const_f32(2.0);
        let three = b.const_f32(3.0);
        let sum = b.fadd(two, three);
        let is_big = b.fcmp(CmpOp::Gt, sum, three);
        let picked = b.select(is_big, sum, two);
        let undef = b.undef(Ty::F32);
        b.export(Export {
            enabled_mask: 0xf,
            valid_mask: true,
            done: true,
            target: ExportTarget::Mrt(0),
            compressed: false,
            data: [picked, undef, undef, undef],
        });
        let f = function(b, false);

        let out = run(&f, Vec::new(), 0, &mut no_calls).unwrap();
        assert_eq!(out.exports.len(), 1);
        assert_eq!(out.exports[0].data[0], Val::F32(5.0));
        assert!(out.exports[0].data[1].is_undef());
        assert!(!out.killed);
    }

    #[test]
    fn if_blocks_follow_the_condition() {
        let mut b = IrBuilder::new();
        let tid = b.call(Intrinsic::ThreadId, Vec::new(), Ty::I32);
        let two = b.const_i32(2);
        let cond = b.icmp(CmpOp::Lt, tid, two);
        b.begin_if(cond);
        b.call_void(Intrinsic::KillAll, Vec::new());
        b.end_if();
        let f = function(b, false);

        assert!(run(&f, Vec::new(), 1, &mut no_calls).unwrap().killed);
        assert!(!run(&f, Vec::new(), 5, &mut no_calls).unwrap().killed);
    }

    #[test]
    fn scratch_round_trips_bits() {
        let mut b = IrBuilder::new();
        let index = b.const_i32(3);
        let value = b.const_f32(-1.5);
        b.scratch_store(index, value);
        let loaded = b.scratch_load(index);
        b.call_void(Intrinsic::Kill, vec![loaded]);

        let out = run(&function(b, true), Vec::new(), 0, &mut no_calls).unwrap();
        assert!(out.killed);
    }

    #[test]
    fn argument_count_is_checked() {
        let f = function(IrBuilder::new(), false);
        let err = run(&f, vec![Val::I32(1)], 0, &mut no_calls).unwrap_err();
        assert_eq!(
            err,
            EvalError::ArgumentCount {
                expected: 0,
                found: 1
            }
        );
    }
}
