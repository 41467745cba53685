//! Expression lowering
//!
//! `lower_expr` is the single entry point: it dispatches on the node kind
//! and applies the lvalue protocol. A node flagged as an lvalue produces
//! an address; callers that want the value ask for a load, callers that
//! want the location (assignments, address-of) suppress it. Everything
//! here consults the layout resolver before touching a value by value,
//! which is what forces aggregate completion at the right moments.

pub mod casts;
pub mod memory;
pub mod operators;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use inkwell::types::BasicTypeEnum;
use inkwell::values::{BasicValueEnum, IntValue, PointerValue, VectorValue};
use inkwell::IntPredicate;

use farro_ir::{
    AllocVar, CallExpr, Expr, ExprKind, GlobalId, Lit, LocalId, SelectExpr, TypeDef,
};

use crate::diagnostics::{Diagnostic, DiagnosticResult};

use super::{berr, CodeGen, LocalSlot};

impl<'a> CodeGen<'a> {
    /// Lowers an expression. With `load_lvalue` set, lvalue nodes yield
    /// their loaded value; otherwise they yield the address itself.
    pub(crate) fn lower_expr(
        &self,
        expr: &'a Expr,
        load_lvalue: bool,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let raw = self.lower_expr_raw(expr)?;
        if expr.lvalue && load_lvalue {
            self.load_lvalue(expr, raw)
        } else {
            Ok(raw)
        }
    }

    fn lower_expr_raw(&self, expr: &'a Expr) -> DiagnosticResult<BasicValueEnum<'a>> {
        match &expr.kind {
            ExprKind::Lit(lit) => self.lower_literal(lit, expr),
            ExprKind::ConstBytes(bytes) => self.lower_const_bytes(bytes, expr),
            ExprKind::Local(id) => self.local_address(*id),
            ExprKind::Global(id) => Ok(self.global_address(*id)?.into()),
            ExprKind::FuncRef(id) => {
                // Function values are uniformly opaque pointers; the precise
                // signature is applied at each call site.
                let f = self.declared_function(*id)?;
                Ok(f.as_global_value().as_pointer_value().into())
            }
            ExprKind::AllocVar(decl) => self.lower_alloc_var(decl, expr),
            ExprKind::Unary(unary) => self.lower_unary(unary, expr),
            ExprKind::Bin(bin) => self.lower_binary(bin, expr),
            ExprKind::Cast(inner) => self.lower_cast(inner, expr),
            ExprKind::Index(index) => self.lower_index(index, expr),
            ExprKind::Field(field) => self.lower_field(field),
            ExprKind::Call(call) => self.lower_call(call),
            ExprKind::Select(select) => self.lower_select(select),
            ExprKind::Ctor(ctor) => self.lower_ctor(ctor, expr),
            ExprKind::Load(load) => self.lower_attributed_load(load, expr),
            ExprKind::Store(store) => self.lower_attributed_store(store),
            ExprKind::InlineAsm(asm) => self.lower_inline_asm(asm, expr),
            ExprKind::SizeOf(ty) => {
                let size = self.size_of(*ty)?;
                let mt = self.resolve_incomplete(expr.ty)?;
                Ok(mt.llvm.into_int_type().const_int(size, false).into())
            }
        }
    }

    /// Loads an lvalue's value through its address. A by-value read is
    /// what forces the type's layout.
    fn load_lvalue(
        &self,
        expr: &'a Expr,
        addr: BasicValueEnum<'a>,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let BasicValueEnum::PointerValue(ptr) = addr else {
            return Err(Diagnostic::internal_boxed("lvalue without an address"));
        };
        let mt = self.resolve(expr.ty)?;
        self.builder
            .build_load(mt.llvm, ptr, "load")
            .map_err(berr("load"))
    }

    /// The operand's address: directly for lvalues, through a spill slot
    /// for already-materialized values.
    pub(super) fn address_of(
        &self,
        expr: &'a Expr,
        name: &str,
    ) -> DiagnosticResult<PointerValue<'a>> {
        if expr.lvalue {
            let addr = self.lower_expr(expr, false)?;
            let BasicValueEnum::PointerValue(ptr) = addr else {
                return Err(Diagnostic::internal_boxed("lvalue without an address"));
            };
            return Ok(ptr);
        }
        let value = self.lower_expr(expr, true)?;
        let mt = self.resolve(expr.ty)?;
        let slot = self.entry_alloca(name, mt.llvm)?;
        self.builder
            .build_store(slot, value)
            .map_err(berr("spill"))?;
        Ok(slot)
    }

    /// Reduces a scalar to an i1 for branching, selects, and conversions
    /// to logical. Nonzero is true; a null pointer is false.
    pub(crate) fn truthy(&self, value: BasicValueEnum<'a>) -> DiagnosticResult<IntValue<'a>> {
        match value {
            BasicValueEnum::IntValue(iv) => {
                if iv.get_type().get_bit_width() == 1 {
                    return Ok(iv);
                }
                self.builder
                    .build_int_compare(IntPredicate::NE, iv, iv.get_type().const_zero(), "tobool")
                    .map_err(berr("truth test"))
            }
            BasicValueEnum::FloatValue(fv) => self
                .builder
                .build_float_compare(
                    inkwell::FloatPredicate::ONE,
                    fv,
                    fv.get_type().const_zero(),
                    "tobool",
                )
                .map_err(berr("truth test")),
            BasicValueEnum::PointerValue(pv) => {
                let addr = self
                    .builder
                    .build_ptr_to_int(pv, self.i64_t, "ptr.addr")
                    .map_err(berr("address read"))?;
                self.builder
                    .build_int_compare(IntPredicate::NE, addr, self.i64_t.const_zero(), "tobool")
                    .map_err(berr("truth test"))
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "truth test on {:?}",
                other.get_type()
            ))),
        }
    }

    /// Lanewise truth test for vector conditions; each nonzero lane is
    /// true, mirroring the scalar rule.
    fn truthy_lanes(&self, value: VectorValue<'a>) -> DiagnosticResult<VectorValue<'a>> {
        let vt = value.get_type();
        match vt.get_element_type() {
            BasicTypeEnum::IntType(_) => self
                .builder
                .build_int_compare(IntPredicate::NE, value, vt.const_zero(), "tobool")
                .map_err(berr("truth test")),
            BasicTypeEnum::FloatType(_) => self
                .builder
                .build_float_compare(
                    inkwell::FloatPredicate::ONE,
                    value,
                    vt.const_zero(),
                    "tobool",
                )
                .map_err(berr("truth test")),
            other => Err(Diagnostic::internal_boxed(format!(
                "truth test on vector of {:?}",
                other
            ))),
        }
    }

    fn local_address(&self, id: LocalId) -> DiagnosticResult<BasicValueEnum<'a>> {
        self.locals
            .borrow()
            .get(&id)
            .map(|slot| slot.ptr.into())
            .ok_or_else(|| Diagnostic::internal_boxed("reference to an unbound local"))
    }

    /// Backing storage for a module-level global, created on first use.
    pub(crate) fn global_address(&self, id: GlobalId) -> DiagnosticResult<PointerValue<'a>> {
        if let Some(ptr) = self.global_slots.borrow().get(&id) {
            return Ok(*ptr);
        }
        let global = self.program.global(id);
        let mt = self.resolve(global.ty)?;
        let align = self.align_of(global.ty)? as u32;
        let gv = match &global.init {
            Some(bytes) => {
                // Initialized globals carry their raw byte image; loads
                // through the pointer apply the declared type.
                let image = self.context.const_string(bytes, false);
                let gv = self
                    .module
                    .add_global(image.get_type(), None, &global.name);
                gv.set_initializer(&image);
                gv
            }
            None => {
                let gv = self.module.add_global(mt.llvm, None, &global.name);
                gv.set_initializer(&mt.llvm.const_zero());
                gv
            }
        };
        if global.constant {
            gv.set_constant(true);
        }
        gv.set_alignment(align);
        let ptr = gv.as_pointer_value();
        self.global_slots.borrow_mut().insert(id, ptr);
        Ok(ptr)
    }

    fn lower_alloc_var(
        &self,
        decl: &'a AllocVar,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let mt = self.resolve(expr.ty)?;
        let ptr = self.entry_alloca(&decl.name, mt.llvm)?;
        self.locals.borrow_mut().insert(
            decl.local,
            LocalSlot {
                ptr,
                ty: expr.ty,
            },
        );
        Ok(ptr.into())
    }

    fn lower_literal(&self, lit: &'a Lit, expr: &'a Expr) -> DiagnosticResult<BasicValueEnum<'a>> {
        let mt = self.resolve_incomplete(expr.ty)?;
        match lit {
            Lit::Int(v) => Ok(mt
                .llvm
                .into_int_type()
                .const_int(*v as u64, mt.signed)
                .into()),
            Lit::Float(v) => Ok(mt.llvm.into_float_type().const_float(*v).into()),
            Lit::Bool(b) => Ok(mt
                .llvm
                .into_int_type()
                .const_int(u64::from(*b), false)
                .into()),
            Lit::Str(s) => self.string_literal_ptr(s),
        }
    }

    /// Interned NUL-terminated string buffer, decayed to a pointer.
    pub(crate) fn string_literal_ptr(&self, s: &str) -> DiagnosticResult<BasicValueEnum<'a>> {
        if let Some(ptr) = self.string_literals.borrow().get(s) {
            return Ok((*ptr).into());
        }
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        let name = format!("str.intern.{:016x}", hasher.finish());
        let image = self.context.const_string(s.as_bytes(), true);
        let gv = self.module.add_global(image.get_type(), None, &name);
        gv.set_initializer(&image);
        gv.set_constant(true);
        let ptr = gv.as_pointer_value();
        self.string_literals
            .borrow_mut()
            .insert(s.to_string(), ptr);
        Ok(ptr.into())
    }

    /// Calls go through the classifier: arguments are evaluated here, the
    /// marshalling is shared with function entry and return.
    fn lower_call(&self, call: &'a CallExpr) -> DiagnosticResult<BasicValueEnum<'a>> {
        let fc = self.classify(call.fn_ty)?;
        let callee = self.lower_expr(&call.callee, true)?;
        let BasicValueEnum::PointerValue(callee_ptr) = callee else {
            return Err(Diagnostic::internal_boxed("callee is not a function pointer"));
        };
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.lower_expr(arg, true)?);
        }
        self.emit_call(&fc, callee_ptr, &args)
    }

    /// Eager ternary; both arms are evaluated. A vector condition tests
    /// lanewise and picks each lane independently.
    fn lower_select(&self, select: &'a SelectExpr) -> DiagnosticResult<BasicValueEnum<'a>> {
        let cond = self.lower_expr(&select.cond, true)?;
        let cons = self.lower_expr(&select.cons, true)?;
        let alt = self.lower_expr(&select.alt, true)?;
        if let BasicValueEnum::VectorValue(v) = cond {
            let lanes = self.truthy_lanes(v)?;
            return self
                .builder
                .build_select(lanes, cons, alt, "select")
                .map_err(berr("select"));
        }
        let bit = self.truthy(cond)?;
        self.builder
            .build_select(bit, cons, alt, "select")
            .map_err(berr("select"))
    }

    /// Whether a type is the zero-sized unit.
    pub(crate) fn is_unit(&self, ty: farro_ir::TypeId) -> bool {
        matches!(self.program.type_def(ty), TypeDef::Unit)
    }
}
