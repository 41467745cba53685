//! Unary and binary operators
//!
//! Scalar arithmetic picks signed or unsigned instructions from the
//! operand type, comparisons produce an i1 that is widened to the
//! declared result type, and the logical connectives on scalars build
//! the usual short-circuit diamond with a phi. Vector operands reuse
//! the same instruction builders lane-wise; pointer arithmetic scales
//! through GEPs so the element type sets the stride.

use inkwell::values::{BasicValueEnum, FloatMathValue, IntMathValue, IntValue};
use inkwell::{FloatPredicate, IntPredicate};

use farro_ir::{BinExpr, BinOp, Expr, TypeDef, TypeId, UnaryExpr, UnaryOp};

use crate::diagnostics::{Diagnostic, DiagnosticResult};

use super::super::{berr, CodeGen};

impl<'a> CodeGen<'a> {
    pub(super) fn lower_unary(
        &self,
        unary: &'a UnaryExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        match unary.op {
            UnaryOp::AddrOf => Ok(self.address_of(&unary.arg, "addr")?.into()),
            UnaryOp::Deref => {
                // The operand's value is the referent's address. The node
                // itself is an lvalue, so the caller decides whether to
                // load through it.
                self.ensure_points_to_complete_type(unary.arg.ty)?;
                self.lower_expr(&unary.arg, true)
            }
            UnaryOp::Not => self.lower_not(unary, expr),
            UnaryOp::Neg => self.lower_neg(unary),
        }
    }

    fn lower_not(
        &self,
        unary: &'a UnaryExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let mt = self.resolve_incomplete(unary.arg.ty)?;
        let value = self.lower_expr(&unary.arg, true)?;
        if mt.logical {
            let bit = self.truthy(value)?;
            let flipped = self
                .builder
                .build_not(bit, "not")
                .map_err(berr("logical not"))?;
            return self.widen_bit(flipped, expr);
        }
        // Logical lanes invert by comparing against zero; a bitwise
        // complement would leave a true lane truthy.
        if let TypeDef::Vector { element, .. } = self.program.type_def(unary.arg.ty) {
            if self.resolve_incomplete(*element)?.logical {
                let BasicValueEnum::VectorValue(v) = value else {
                    return Err(Diagnostic::internal_boxed("logical vector without lanes"));
                };
                let lanes = self
                    .builder
                    .build_int_compare(IntPredicate::EQ, v, v.get_type().const_zero(), "not")
                    .map_err(berr("logical not"))?;
                let out = self.resolve(expr.ty)?.llvm.into_vector_type();
                if lanes.get_type() == out {
                    return Ok(lanes.into());
                }
                return self
                    .builder
                    .build_int_z_extend(lanes, out, "not.ext")
                    .map(Into::into)
                    .map_err(berr("logical widen"));
            }
        }
        match value {
            BasicValueEnum::IntValue(v) => self
                .builder
                .build_not(v, "not")
                .map(Into::into)
                .map_err(berr("bitwise not")),
            BasicValueEnum::VectorValue(v) => self
                .builder
                .build_not(v, "not")
                .map(Into::into)
                .map_err(berr("bitwise not")),
            other => Err(Diagnostic::internal_boxed(format!(
                "complement of {:?}",
                other.get_type()
            ))),
        }
    }

    fn lower_neg(&self, unary: &'a UnaryExpr) -> DiagnosticResult<BasicValueEnum<'a>> {
        let value = self.lower_expr(&unary.arg, true)?;
        match value {
            BasicValueEnum::IntValue(v) => self
                .builder
                .build_int_neg(v, "neg")
                .map(Into::into)
                .map_err(berr("negation")),
            BasicValueEnum::FloatValue(v) => self
                .builder
                .build_float_neg(v, "neg")
                .map(Into::into)
                .map_err(berr("negation")),
            BasicValueEnum::VectorValue(v) => {
                if v.get_type().get_element_type().is_float_type() {
                    self.builder
                        .build_float_neg(v, "neg")
                        .map(Into::into)
                        .map_err(berr("negation"))
                } else {
                    self.builder
                        .build_int_neg(v, "neg")
                        .map(Into::into)
                        .map_err(berr("negation"))
                }
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "negation of {:?}",
                other.get_type()
            ))),
        }
    }

    pub(super) fn lower_binary(
        &self,
        bin: &'a BinExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        // Scalar logicals short-circuit; vector logicals are eager
        // lane-wise bit operations and fall through to the arithmetic
        // path below.
        if matches!(bin.op, BinOp::And | BinOp::Or)
            && !matches!(self.program.type_def(bin.left.ty), TypeDef::Vector { .. })
        {
            return self.lower_short_circuit(bin, expr);
        }

        let l_ptr = matches!(self.program.type_def(bin.left.ty), TypeDef::Pointer { .. });
        let r_ptr = matches!(self.program.type_def(bin.right.ty), TypeDef::Pointer { .. });
        if l_ptr || r_ptr {
            return self.lower_pointer_binary(bin, expr, l_ptr, r_ptr);
        }

        let signed = self.operand_signedness(bin.left.ty);
        let lhs = self.lower_expr(&bin.left, true)?;
        let rhs = self.lower_expr(&bin.right, true)?;
        if is_comparison(bin.op) {
            return self.lower_comparison(bin.op, lhs, rhs, signed, expr);
        }
        match (lhs, rhs) {
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => {
                self.int_arith(bin.op, l, r, signed)
            }
            (BasicValueEnum::FloatValue(l), BasicValueEnum::FloatValue(r)) => {
                self.float_arith(bin.op, l, r)
            }
            (BasicValueEnum::VectorValue(l), BasicValueEnum::VectorValue(r)) => {
                if l.get_type().get_element_type().is_float_type() {
                    self.float_arith(bin.op, l, r)
                } else {
                    self.int_arith(bin.op, l, r, signed)
                }
            }
            (l, r) => Err(Diagnostic::internal_boxed(format!(
                "{:?} between {:?} and {:?}",
                bin.op,
                l.get_type(),
                r.get_type()
            ))),
        }
    }

    fn int_arith<T>(
        &self,
        op: BinOp,
        l: T,
        r: T,
        signed: bool,
    ) -> DiagnosticResult<BasicValueEnum<'a>>
    where
        T: IntMathValue<'a> + Into<BasicValueEnum<'a>>,
    {
        let b = &self.builder;
        let out = match op {
            BinOp::Add => b.build_int_add(l, r, "add"),
            BinOp::Sub => b.build_int_sub(l, r, "sub"),
            BinOp::Mul => b.build_int_mul(l, r, "mul"),
            BinOp::Div if signed => b.build_int_signed_div(l, r, "div"),
            BinOp::Div => b.build_int_unsigned_div(l, r, "div"),
            BinOp::Rem if signed => b.build_int_signed_rem(l, r, "rem"),
            BinOp::Rem => b.build_int_unsigned_rem(l, r, "rem"),
            BinOp::And | BinOp::BitAnd => b.build_and(l, r, "and"),
            BinOp::Or | BinOp::BitOr => b.build_or(l, r, "or"),
            BinOp::BitXor => b.build_xor(l, r, "xor"),
            BinOp::Shl => b.build_left_shift(l, r, "shl"),
            BinOp::Shr => b.build_right_shift(l, r, signed, "shr"),
            other => {
                return Err(Diagnostic::internal_boxed(format!(
                    "integer operator {:?}",
                    other
                )));
            }
        };
        out.map(Into::into).map_err(berr("integer arithmetic"))
    }

    fn float_arith<T>(&self, op: BinOp, l: T, r: T) -> DiagnosticResult<BasicValueEnum<'a>>
    where
        T: FloatMathValue<'a> + Into<BasicValueEnum<'a>>,
    {
        let b = &self.builder;
        let out = match op {
            BinOp::Add => b.build_float_add(l, r, "fadd"),
            BinOp::Sub => b.build_float_sub(l, r, "fsub"),
            BinOp::Mul => b.build_float_mul(l, r, "fmul"),
            BinOp::Div => b.build_float_div(l, r, "fdiv"),
            BinOp::Rem => b.build_float_rem(l, r, "frem"),
            other => {
                return Err(Diagnostic::internal_boxed(format!(
                    "float operator {:?}",
                    other
                )));
            }
        };
        out.map(Into::into).map_err(berr("float arithmetic"))
    }

    fn lower_comparison(
        &self,
        op: BinOp,
        lhs: BasicValueEnum<'a>,
        rhs: BasicValueEnum<'a>,
        signed: bool,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        match (lhs, rhs) {
            (BasicValueEnum::IntValue(l), BasicValueEnum::IntValue(r)) => {
                let pred = int_predicate(op, signed).ok_or_else(|| bad_comparison(op))?;
                let bit = self
                    .builder
                    .build_int_compare(pred, l, r, "cmp")
                    .map_err(berr("comparison"))?;
                self.widen_bit(bit, expr)
            }
            (BasicValueEnum::FloatValue(l), BasicValueEnum::FloatValue(r)) => {
                let pred = float_predicate(op).ok_or_else(|| bad_comparison(op))?;
                let bit = self
                    .builder
                    .build_float_compare(pred, l, r, "fcmp")
                    .map_err(berr("comparison"))?;
                self.widen_bit(bit, expr)
            }
            (BasicValueEnum::VectorValue(l), BasicValueEnum::VectorValue(r)) => {
                let lanes = if l.get_type().get_element_type().is_float_type() {
                    let pred = float_predicate(op).ok_or_else(|| bad_comparison(op))?;
                    self.builder
                        .build_float_compare(pred, l, r, "fcmp")
                        .map_err(berr("comparison"))?
                } else {
                    let pred = int_predicate(op, signed).ok_or_else(|| bad_comparison(op))?;
                    self.builder
                        .build_int_compare(pred, l, r, "cmp")
                        .map_err(berr("comparison"))?
                };
                let out = self.resolve(expr.ty)?.llvm.into_vector_type();
                if lanes.get_type() == out {
                    Ok(lanes.into())
                } else {
                    self.builder
                        .build_int_z_extend(lanes, out, "cmp.ext")
                        .map(Into::into)
                        .map_err(berr("comparison widen"))
                }
            }
            (l, r) => Err(Diagnostic::internal_boxed(format!(
                "comparison between {:?} and {:?}",
                l.get_type(),
                r.get_type()
            ))),
        }
    }

    /// Comparison results are i1 in the IR; the surface type is the
    /// declared logical, so widen on the way out.
    fn widen_bit(&self, bit: IntValue<'a>, expr: &'a Expr) -> DiagnosticResult<BasicValueEnum<'a>> {
        let out = self.resolve_incomplete(expr.ty)?.llvm.into_int_type();
        if out.get_bit_width() == 1 {
            return Ok(bit.into());
        }
        self.builder
            .build_int_z_extend(bit, out, "cmp.ext")
            .map(Into::into)
            .map_err(berr("comparison widen"))
    }

    /// The short-circuit diamond. The right operand evaluates only on
    /// the fallthrough edge; the other edge carries the settled constant
    /// into the merge phi.
    fn lower_short_circuit(
        &self,
        bin: &'a BinExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let is_and = bin.op == BinOp::And;
        let stem = if is_and { "and" } else { "or" };
        let lhs_bit = self.truthy(self.lower_expr(&bin.left, true)?)?;
        let then_bb = self.append_block(&format!("{}.then", stem))?;
        let else_bb = self.append_block(&format!("{}.else", stem))?;
        let merge_bb = self.append_block(&format!("{}.merge", stem))?;
        self.builder
            .build_conditional_branch(lhs_bit, then_bb, else_bb)
            .map_err(berr("short-circuit branch"))?;

        // and: rhs on the true edge, false settled on the false edge.
        // or: rhs on the false edge, true settled on the true edge.
        let (rhs_bb, settled_bb) = if is_and {
            (then_bb, else_bb)
        } else {
            (else_bb, then_bb)
        };
        self.builder.position_at_end(rhs_bb);
        let rhs_bit = self.truthy(self.lower_expr(&bin.right, true)?)?;
        let rhs_end = self.cur_block()?;
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(berr("merge branch"))?;

        self.builder.position_at_end(settled_bb);
        self.builder
            .build_unconditional_branch(merge_bb)
            .map_err(berr("merge branch"))?;

        self.builder.position_at_end(merge_bb);
        let phi = self
            .builder
            .build_phi(self.i1_t, &format!("{}.value", stem))
            .map_err(berr("merge phi"))?;
        let settled = self.i1_t.const_int(u64::from(!is_and), false);
        phi.add_incoming(&[(&rhs_bit, rhs_end), (&settled, settled_bb)]);
        self.widen_bit(phi.as_basic_value().into_int_value(), expr)
    }

    fn lower_pointer_binary(
        &self,
        bin: &'a BinExpr,
        expr: &'a Expr,
        l_ptr: bool,
        r_ptr: bool,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        match bin.op {
            BinOp::Add | BinOp::Sub if l_ptr != r_ptr => {
                if r_ptr && bin.op == BinOp::Sub {
                    return Err(Diagnostic::internal_boxed("integer minus pointer"));
                }
                let (ptr_expr, int_expr) = if l_ptr {
                    (&bin.left, &bin.right)
                } else {
                    (&bin.right, &bin.left)
                };
                self.ensure_points_to_complete_type(ptr_expr.ty)?;
                let TypeDef::Pointer { pointee, .. } = self.program.type_def(ptr_expr.ty) else {
                    return Err(Diagnostic::internal_boxed("pointer operand lost its type"));
                };
                let elem = self.resolve(*pointee)?;
                let base = self.lower_expr(ptr_expr, true)?.into_pointer_value();
                let mut idx = self.coerce_index(int_expr, self.i64_t)?;
                if bin.op == BinOp::Sub {
                    idx = self
                        .builder
                        .build_int_neg(idx, "idx.neg")
                        .map_err(berr("offset negation"))?;
                }
                // Plain gep, not inbounds: offsets that leave the object
                // are well defined here.
                let out = unsafe { self.builder.build_gep(elem.llvm, base, &[idx], "ptr.off") }
                    .map_err(berr("address offset"))?;
                Ok(out.into())
            }
            BinOp::Sub => {
                let TypeDef::Pointer { pointee, .. } = self.program.type_def(bin.left.ty) else {
                    return Err(Diagnostic::internal_boxed("pointer operand lost its type"));
                };
                let (size, _) = self.size_and_align_of(*pointee)?;
                if size == 0 {
                    return Err(Diagnostic::internal_boxed(
                        "pointer difference over a zero-sized element",
                    ));
                }
                let l = self.lower_expr(&bin.left, true)?.into_pointer_value();
                let r = self.lower_expr(&bin.right, true)?.into_pointer_value();
                let li = self
                    .builder
                    .build_ptr_to_int(l, self.i64_t, "ptr.l")
                    .map_err(berr("address read"))?;
                let ri = self
                    .builder
                    .build_ptr_to_int(r, self.i64_t, "ptr.r")
                    .map_err(berr("address read"))?;
                let delta = self
                    .builder
                    .build_int_sub(li, ri, "ptr.delta")
                    .map_err(berr("address difference"))?;
                let step = self.i64_t.const_int(size, false);
                let count = self
                    .builder
                    .build_int_signed_div(delta, step, "ptr.diff")
                    .map_err(berr("address difference"))?;
                let out = self.resolve_incomplete(expr.ty)?.llvm.into_int_type();
                if out.get_bit_width() == 64 {
                    Ok(count.into())
                } else {
                    self.builder
                        .build_int_truncate(count, out, "ptr.diff.narrow")
                        .map(Into::into)
                        .map_err(berr("difference narrowing"))
                }
            }
            op if is_comparison(op) => {
                // Addresses compare as unsigned integers.
                let l = self.lower_expr(&bin.left, true)?.into_pointer_value();
                let r = self.lower_expr(&bin.right, true)?.into_pointer_value();
                let li = self
                    .builder
                    .build_ptr_to_int(l, self.i64_t, "ptr.l")
                    .map_err(berr("address read"))?;
                let ri = self
                    .builder
                    .build_ptr_to_int(r, self.i64_t, "ptr.r")
                    .map_err(berr("address read"))?;
                let pred = int_predicate(op, false).ok_or_else(|| bad_comparison(op))?;
                let bit = self
                    .builder
                    .build_int_compare(pred, li, ri, "ptr.cmp")
                    .map_err(berr("comparison"))?;
                self.widen_bit(bit, expr)
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "{:?} on pointer operands",
                other
            ))),
        }
    }

    fn operand_signedness(&self, ty: TypeId) -> bool {
        match self.program.type_def(ty) {
            TypeDef::Primitive { signed, .. } => *signed,
            TypeDef::Vector { element, .. } => self.operand_signedness(*element),
            _ => false,
        }
    }
}

fn is_comparison(op: BinOp) -> bool {
    matches!(
        op,
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
    )
}

fn int_predicate(op: BinOp, signed: bool) -> Option<IntPredicate> {
    Some(match op {
        BinOp::Eq => IntPredicate::EQ,
        BinOp::Ne => IntPredicate::NE,
        BinOp::Lt if signed => IntPredicate::SLT,
        BinOp::Lt => IntPredicate::ULT,
        BinOp::Le if signed => IntPredicate::SLE,
        BinOp::Le => IntPredicate::ULE,
        BinOp::Gt if signed => IntPredicate::SGT,
        BinOp::Gt => IntPredicate::UGT,
        BinOp::Ge if signed => IntPredicate::SGE,
        BinOp::Ge => IntPredicate::UGE,
        _ => return None,
    })
}

fn float_predicate(op: BinOp) -> Option<FloatPredicate> {
    Some(match op {
        BinOp::Eq => FloatPredicate::OEQ,
        BinOp::Ne => FloatPredicate::ONE,
        BinOp::Lt => FloatPredicate::OLT,
        BinOp::Le => FloatPredicate::OLE,
        BinOp::Gt => FloatPredicate::OGT,
        BinOp::Ge => FloatPredicate::OGE,
        _ => return None,
    })
}

fn bad_comparison(op: BinOp) -> Box<Diagnostic> {
    Diagnostic::internal_boxed(format!("{:?} is not a comparison", op))
}
