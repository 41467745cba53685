//! Conversions
//!
//! One entry point, `lower_cast`, plus the reusable value-level matrix
//! `cast_value`. Integer width changes extend per the source's
//! signedness, int/float conversions take the signedness of whichever
//! side is the integer, and anything targeting a logical type is a
//! truth test rather than a truncation. Under opaque pointers the
//! pointer-to-pointer arm is a no-op.

use inkwell::values::{BasicValueEnum, VectorValue};
use inkwell::IntPredicate;

use farro_ir::{Expr, PrimKind, TypeDef, TypeId};

use crate::diagnostics::{Diagnostic, DiagnosticResult};

use super::super::{berr, CodeGen};

impl<'a> CodeGen<'a> {
    pub(super) fn lower_cast(
        &self,
        src: &'a Expr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        if src.ty == expr.ty {
            return self.lower_expr(src, true);
        }
        // Array decay never loads the array; it takes the address and
        // points at element zero.
        if matches!(self.program.type_def(src.ty), TypeDef::Array { .. })
            && matches!(self.program.type_def(expr.ty), TypeDef::Pointer { .. })
        {
            let base = self.address_of(src, "decay.base")?;
            let arr = self.resolve(src.ty)?;
            let zero = self.i64_t.const_zero();
            let first = unsafe {
                self.builder
                    .build_in_bounds_gep(arr.llvm, base, &[zero, zero], "decay")
            }
            .map_err(berr("array decay"))?;
            return Ok(first.into());
        }
        let value = self.lower_expr(src, true)?;
        self.cast_value(value, src.ty, expr.ty)
    }

    /// Converts `value` from `from` to `to`. Same type in and out is an
    /// identity.
    pub(crate) fn cast_value(
        &self,
        value: BasicValueEnum<'a>,
        from: TypeId,
        to: TypeId,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        if from == to {
            return Ok(value);
        }
        let from_def = self.program.type_def(from);
        let to_def = self.program.type_def(to);

        if let TypeDef::Primitive {
            kind: PrimKind::Logical,
            ..
        } = to_def
        {
            let bit = self.truthy(value)?;
            let out = self.resolve_incomplete(to)?.llvm.into_int_type();
            if out.get_bit_width() == 1 {
                return Ok(bit.into());
            }
            return self
                .builder
                .build_int_z_extend(bit, out, "tolog")
                .map(Into::into)
                .map_err(berr("logical widen"));
        }

        match (from_def, to_def) {
            (
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    width: fw,
                    ..
                },
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    width: tw,
                    ..
                },
            ) => {
                let fv = value.into_float_value();
                let out = self.resolve_incomplete(to)?.llvm.into_float_type();
                if tw > fw {
                    self.builder
                        .build_float_ext(fv, out, "fext")
                        .map(Into::into)
                        .map_err(berr("float widen"))
                } else if tw < fw {
                    self.builder
                        .build_float_trunc(fv, out, "ftrunc")
                        .map(Into::into)
                        .map_err(berr("float narrow"))
                } else {
                    Ok(value)
                }
            }
            (
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    ..
                },
                TypeDef::Primitive { signed, .. },
            ) => {
                let fv = value.into_float_value();
                let out = self.resolve_incomplete(to)?.llvm.into_int_type();
                if *signed {
                    self.builder
                        .build_float_to_signed_int(fv, out, "toint")
                        .map(Into::into)
                        .map_err(berr("float to int"))
                } else {
                    self.builder
                        .build_float_to_unsigned_int(fv, out, "toint")
                        .map(Into::into)
                        .map_err(berr("float to int"))
                }
            }
            (
                TypeDef::Primitive { signed, .. },
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    ..
                },
            ) => {
                let iv = value.into_int_value();
                let out = self.resolve_incomplete(to)?.llvm.into_float_type();
                if *signed {
                    self.builder
                        .build_signed_int_to_float(iv, out, "tofloat")
                        .map(Into::into)
                        .map_err(berr("int to float"))
                } else {
                    self.builder
                        .build_unsigned_int_to_float(iv, out, "tofloat")
                        .map(Into::into)
                        .map_err(berr("int to float"))
                }
            }
            (
                TypeDef::Primitive {
                    width: fw,
                    signed: from_signed,
                    ..
                },
                TypeDef::Primitive { width: tw, .. },
            ) => {
                let iv = value.into_int_value();
                let out = self.resolve_incomplete(to)?.llvm.into_int_type();
                if tw > fw {
                    // Widening takes the source's signedness.
                    if *from_signed {
                        self.builder
                            .build_int_s_extend(iv, out, "sext")
                            .map(Into::into)
                            .map_err(berr("integer widen"))
                    } else {
                        self.builder
                            .build_int_z_extend(iv, out, "zext")
                            .map(Into::into)
                            .map_err(berr("integer widen"))
                    }
                } else if tw < fw {
                    self.builder
                        .build_int_truncate(iv, out, "trunc")
                        .map(Into::into)
                        .map_err(berr("integer narrow"))
                } else {
                    Ok(value)
                }
            }
            (TypeDef::Pointer { .. }, TypeDef::Pointer { .. }) => {
                // Identical under opaque pointers unless the address
                // space changes.
                let pv = value.into_pointer_value();
                let out = self.resolve_incomplete(to)?.llvm.into_pointer_type();
                if pv.get_type() == out {
                    Ok(value)
                } else {
                    self.builder
                        .build_address_space_cast(pv, out, "tospace")
                        .map(Into::into)
                        .map_err(berr("address space cast"))
                }
            }
            (TypeDef::Pointer { .. }, TypeDef::Primitive { .. }) => {
                let out = self.resolve_incomplete(to)?.llvm.into_int_type();
                self.builder
                    .build_ptr_to_int(value.into_pointer_value(), out, "toaddr")
                    .map(Into::into)
                    .map_err(berr("pointer to int"))
            }
            (TypeDef::Primitive { signed, .. }, TypeDef::Pointer { .. }) => {
                // Narrow sources go through the full address word first,
                // so a negative signed value keeps its sign.
                let mut iv = value.into_int_value();
                if iv.get_type().get_bit_width() < 64 {
                    iv = if *signed {
                        self.builder
                            .build_int_s_extend(iv, self.i64_t, "sext")
                            .map_err(berr("integer widen"))?
                    } else {
                        self.builder
                            .build_int_z_extend(iv, self.i64_t, "zext")
                            .map_err(berr("integer widen"))?
                    };
                }
                let out = self.resolve_incomplete(to)?.llvm.into_pointer_type();
                self.builder
                    .build_int_to_ptr(iv, out, "toptr")
                    .map(Into::into)
                    .map_err(berr("int to pointer"))
            }
            (f, TypeDef::Vector { element, lanes })
                if !matches!(f, TypeDef::Vector { .. }) =>
            {
                self.broadcast(value, from, *element, *lanes, to)
            }
            (
                TypeDef::Vector {
                    element: from_elem, ..
                },
                TypeDef::Vector {
                    element: to_elem, ..
                },
            ) => self.cast_vector(value.into_vector_value(), *from_elem, *to_elem, to),
            (
                TypeDef::Struct { .. } | TypeDef::Union { .. },
                TypeDef::Struct { .. } | TypeDef::Union { .. },
            ) => self.cast_record(value, from, to),
            (f, t) => Err(Diagnostic::internal_boxed(format!(
                "no conversion from {:?} to {:?}",
                f, t
            ))),
        }
    }

    /// Scalar-to-vector broadcast: convert to the element type once,
    /// then fill every lane.
    fn broadcast(
        &self,
        value: BasicValueEnum<'a>,
        from: TypeId,
        element: TypeId,
        lanes: u32,
        to: TypeId,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let scalar = self.cast_value(value, from, element)?;
        let vt = self.resolve(to)?.llvm.into_vector_type();
        let mut acc = vt.get_undef();
        for lane in 0..lanes {
            let idx = self.i32_t.const_int(u64::from(lane), false);
            acc = self
                .builder
                .build_insert_element(acc, scalar, idx, "splat")
                .map_err(berr("lane insert"))?;
        }
        Ok(acc.into())
    }

    /// Element-wise vector conversion, expressed as one whole-vector
    /// instruction per step.
    fn cast_vector(
        &self,
        value: VectorValue<'a>,
        from_elem: TypeId,
        to_elem: TypeId,
        to: TypeId,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let out = self.resolve(to)?.llvm.into_vector_type();
        let from_def = self.program.type_def(from_elem);
        let to_def = self.program.type_def(to_elem);
        match (from_def, to_def) {
            (
                TypeDef::Primitive { .. },
                TypeDef::Primitive {
                    kind: PrimKind::Logical,
                    ..
                },
            ) => {
                let zero = value.get_type().const_zero();
                let bits = if value.get_type().get_element_type().is_float_type() {
                    self.builder
                        .build_float_compare(inkwell::FloatPredicate::ONE, value, zero, "tobool")
                        .map_err(berr("truth test"))?
                } else {
                    self.builder
                        .build_int_compare(IntPredicate::NE, value, zero, "tobool")
                        .map_err(berr("truth test"))?
                };
                self.builder
                    .build_int_z_extend(bits, out, "tolog")
                    .map(Into::into)
                    .map_err(berr("logical widen"))
            }
            (
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    width: fw,
                    ..
                },
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    width: tw,
                    ..
                },
            ) => {
                if tw > fw {
                    self.builder
                        .build_float_ext(value, out, "fext")
                        .map(Into::into)
                        .map_err(berr("float widen"))
                } else if tw < fw {
                    self.builder
                        .build_float_trunc(value, out, "ftrunc")
                        .map(Into::into)
                        .map_err(berr("float narrow"))
                } else {
                    Ok(value.into())
                }
            }
            (
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    ..
                },
                TypeDef::Primitive { signed, .. },
            ) => {
                if *signed {
                    self.builder
                        .build_float_to_signed_int(value, out, "toint")
                        .map(Into::into)
                        .map_err(berr("float to int"))
                } else {
                    self.builder
                        .build_float_to_unsigned_int(value, out, "toint")
                        .map(Into::into)
                        .map_err(berr("float to int"))
                }
            }
            (
                TypeDef::Primitive { signed, .. },
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    ..
                },
            ) => {
                if *signed {
                    self.builder
                        .build_signed_int_to_float(value, out, "tofloat")
                        .map(Into::into)
                        .map_err(berr("int to float"))
                } else {
                    self.builder
                        .build_unsigned_int_to_float(value, out, "tofloat")
                        .map(Into::into)
                        .map_err(berr("int to float"))
                }
            }
            (
                TypeDef::Primitive {
                    width: fw,
                    signed: from_signed,
                    ..
                },
                TypeDef::Primitive { width: tw, .. },
            ) => {
                if tw > fw {
                    if *from_signed {
                        self.builder
                            .build_int_s_extend(value, out, "sext")
                            .map(Into::into)
                            .map_err(berr("integer widen"))
                    } else {
                        self.builder
                            .build_int_z_extend(value, out, "zext")
                            .map(Into::into)
                            .map_err(berr("integer widen"))
                    }
                } else if tw < fw {
                    self.builder
                        .build_int_truncate(value, out, "trunc")
                        .map(Into::into)
                        .map_err(berr("integer narrow"))
                } else {
                    Ok(value.into())
                }
            }
            (f, t) => Err(Diagnostic::internal_boxed(format!(
                "no lane conversion from {:?} to {:?}",
                f, t
            ))),
        }
    }

    /// Record-to-record conversion: both sides get temporary storage and
    /// fields copy by index, re-entering the cast machinery so nested
    /// conversions compose.
    fn cast_record(
        &self,
        value: BasicValueEnum<'a>,
        from: TypeId,
        to: TypeId,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let from_mt = self.resolve(from)?;
        let to_mt = self.resolve(to)?;
        let from_layout = self.struct_layout(from)?;
        let to_layout = self.struct_layout(to)?;
        let from_fields = self.record_field_types(from)?;
        let to_fields = self.record_field_types(to)?;
        if from_fields.len() != to_fields.len() {
            return Err(Diagnostic::internal_boxed(
                "record conversion between different field counts",
            ));
        }

        let src = self.entry_alloca("cast.src", from_mt.llvm)?;
        self.builder
            .build_store(src, value)
            .map_err(berr("record spill"))?;
        let dst = self.entry_alloca("cast.dst", to_mt.llvm)?;

        for (i, (from_ty, to_ty)) in from_fields.iter().zip(&to_fields).enumerate() {
            let from_slot = &from_layout.slots[i];
            let to_slot = &to_layout.slots[i];
            let src_addr = self
                .builder
                .build_struct_gep(
                    from_mt.llvm.into_struct_type(),
                    src,
                    from_slot.element,
                    "cast.field",
                )
                .map_err(berr("field address"))?;
            let field_mt = self.resolve(*from_ty)?;
            let field = self
                .builder
                .build_load(field_mt.llvm, src_addr, "cast.load")
                .map_err(berr("field load"))?;
            let converted = self.cast_value(field, *from_ty, *to_ty)?;
            let dst_addr = self
                .builder
                .build_struct_gep(
                    to_mt.llvm.into_struct_type(),
                    dst,
                    to_slot.element,
                    "cast.field",
                )
                .map_err(berr("field address"))?;
            self.builder
                .build_store(dst_addr, converted)
                .map_err(berr("field store"))?;
        }
        self.builder
            .build_load(to_mt.llvm, dst, "cast.value")
            .map_err(berr("record load"))
    }

    fn record_field_types(&self, ty: TypeId) -> DiagnosticResult<Vec<TypeId>> {
        match self.program.type_def(ty) {
            TypeDef::Struct { fields, .. } | TypeDef::Union { fields, .. } => {
                Ok(fields.iter().map(|f| f.ty).collect())
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "record conversion on {:?}",
                other
            ))),
        }
    }
}
