//! Incremental construction of an [`ir::Function`](crate::ir::Function) body.
//!
//! Instructions are appended to the innermost open block. `If` blocks are opened with
//! [`IrBuilder::begin_if`] and closed with [`IrBuilder::end_if`]; the builder keeps the stack of
//! open blocks the same way the structured control-flow pass of a token-stream frontend does.

use std::collections::HashMap;

use crate::ir::{
    BinaryOp, Block, CmpOp, Export, Inst, Intrinsic, Op, Stmt, Ty, UnaryOp, Value, ValueDef,
    ValueKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConstKey {
    F32(u32),
    I32(u32),
    Undef(Ty),
}

#[derive(Debug, Default)]
pub struct IrBuilder {
    values: Vec<ValueDef>,
    consts: HashMap<ConstKey, Value>,
    root: Block,
    open: Vec<(Value, Block)>,
}

fn scalar_of(ty: Ty) -> Ty {
    match ty {
        Ty::VecI32(_) => Ty::I32,
        Ty::VecF32(_) => Ty::F32,
        Ty::Desc(_) => Ty::I32,
        other => other,
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_value(&mut self, ty: Ty, kind: ValueKind) -> Value {
        let v = Value(self.values.len() as u32);
        self.values.push(ValueDef { ty, kind });
        v
    }

    pub fn ty(&self, value: Value) -> Ty {
        self.values[value.index()].ty
    }

    /// Declares function parameter `index`.
    pub fn param(&mut self, index: u32, ty: Ty) -> Value {
        self.new_value(ty, ValueKind::Param(index))
    }

    fn interned(&mut self, key: ConstKey, ty: Ty, kind: ValueKind) -> Value {
        if let Some(v) = self.consts.get(&key) {
            return *v;
        }
        let v = self.new_value(ty, kind);
        self.consts.insert(key, v);
        v
    }

    pub fn const_f32(&mut self, value: f32) -> Value {
        let bits = value.to_bits();
        self.interned(ConstKey::F32(bits), Ty::F32, ValueKind::ConstF32(bits))
    }

    pub fn const_i32(&mut self, value: u32) -> Value {
        self.interned(ConstKey::I32(value), Ty::I32, ValueKind::ConstI32(value))
    }

    pub fn undef(&mut self, ty: Ty) -> Value {
        self.interned(ConstKey::Undef(ty), ty, ValueKind::Undef)
    }

    fn current(&mut self) -> &mut Block {
        match self.open.last_mut() {
            Some((_, block)) => block,
            None => &mut self.root,
        }
    }

    /// Appends `op` producing a value of type `ty`.
    pub fn push(&mut self, op: Op, ty: Ty) -> Value {
        let result = self.new_value(ty, ValueKind::Inst);
        self.current().stmts.push(Stmt::Inst(Inst {
            result: Some(result),
            op,
        }));
        result
    }

    /// Appends a side-effecting `op` without a result.
    pub fn push_void(&mut self, op: Op) {
        self.current()
            .stmts
            .push(Stmt::Inst(Inst { result: None, op }));
    }

    pub fn indexed_load(&mut self, table: Value, index: Value, ty: Ty) -> Value {
        self.push(Op::IndexedLoad { table, index }, ty)
    }

    pub fn unary(&mut self, op: UnaryOp, src: Value) -> Value {
        let ty = match (op, self.ty(src)) {
            (UnaryOp::BitcastToI32, Ty::VecF32(n)) => Ty::VecI32(n),
            (UnaryOp::BitcastToI32 | UnaryOp::FloorToI32, _) => Ty::I32,
            (UnaryOp::BitcastToF32, Ty::VecI32(n)) => Ty::VecF32(n),
            (UnaryOp::BitcastToF32, _) => Ty::F32,
            (UnaryOp::TruncateDesc, _) => Ty::Desc(crate::ir::DescKind::Buffer),
            (UnaryOp::FNeg | UnaryOp::FAbs, ty) => ty,
        };
        self.push(Op::Unary { op, src }, ty)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: Value, rhs: Value) -> Value {
        let ty = self.ty(lhs);
        self.push(Op::Binary { op, lhs, rhs }, ty)
    }

    pub fn fadd(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::FAdd, lhs, rhs)
    }

    pub fn fmul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::FMul, lhs, rhs)
    }

    pub fn iadd(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::IAdd, lhs, rhs)
    }

    pub fn imul(&mut self, lhs: Value, rhs: Value) -> Value {
        self.binary(BinaryOp::IMul, lhs, rhs)
    }

    pub fn fcmp(&mut self, op: CmpOp, lhs: Value, rhs: Value) -> Value {
        self.push(Op::FCmp { op, lhs, rhs }, Ty::Bool)
    }

    pub fn icmp(&mut self, op: CmpOp, lhs: Value, rhs: Value) -> Value {
        self.push(Op::ICmp { op, lhs, rhs }, Ty::Bool)
    }

    pub fn select(&mut self, cond: Value, on_true: Value, on_false: Value) -> Value {
        let ty = self.ty(on_true);
        self.push(
            Op::Select {
                cond,
                on_true,
                on_false,
            },
            ty,
        )
    }

    pub fn extract(&mut self, vector: Value, lane: u8) -> Value {
        let ty = scalar_of(self.ty(vector));
        self.push(Op::Extract { vector, lane }, ty)
    }

    /// Builds a vector from scalars of one type.
    ///
    /// # Panics
    ///
    /// Panics if `elems` is empty.
    pub fn gather(&mut self, elems: Vec<Value>) -> Value {
        assert!(!elems.is_empty(), "gather of an empty vector");
        let n = elems.len() as u8;
        let ty = match self.ty(elems[0]) {
            Ty::I32 => Ty::VecI32(n),
            _ => Ty::VecF32(n),
        };
        self.push(Op::Gather { elems }, ty)
    }

    pub fn call(&mut self, intrinsic: Intrinsic, args: Vec<Value>, ty: Ty) -> Value {
        self.push(Op::Call { intrinsic, args }, ty)
    }

    pub fn call_void(&mut self, intrinsic: Intrinsic, args: Vec<Value>) {
        self.push_void(Op::Call { intrinsic, args });
    }

    pub fn export(&mut self, export: Export) {
        self.push_void(Op::Export(export));
    }

    pub fn scratch_store(&mut self, index: Value, value: Value) {
        self.push_void(Op::ScratchStore { index, value });
    }

    pub fn scratch_load(&mut self, index: Value) -> Value {
        self.push(Op::ScratchLoad { index }, Ty::F32)
    }

    /// Opens an `If` block; following instructions land inside it until [`Self::end_if`].
    pub fn begin_if(&mut self, cond: Value) {
        self.open.push((cond, Block::new()));
    }

    /// # Panics
    ///
    /// Panics when no `If` block is open.
    pub fn end_if(&mut self) {
        let Some((cond, then_block)) = self.open.pop() else {
            panic!("end_if without begin_if");
        };
        self.current().stmts.push(Stmt::If { cond, then_block });
    }

    /// # Panics
    ///
    /// Panics when an `If` block is still open.
    pub fn finish(self) -> (Vec<ValueDef>, Block) {
        assert!(self.open.is_empty(), "unterminated If block");
        (self.values, self.root)
    }
}
