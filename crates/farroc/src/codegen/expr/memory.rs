//! Memory-shaped expressions
//!
//! Indexing, field selection, constructors, attributed loads and stores,
//! raw constant images, and inline assembly. Address computation always
//! goes through typed GEPs; union members and byte-image globals rely on
//! loads applying the declared type, so no address is ever reinterpreted
//! explicitly.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use inkwell::types::BasicMetadataTypeEnum;
use inkwell::values::{
    BasicMetadataValueEnum, BasicValue, BasicValueEnum, InstructionValue, IntValue, PointerValue,
};

use farro_ir::{
    CtorExpr, Expr, FieldExpr, IndexExpr, InlineAsmExpr, LoadExpr, MemAttrs, PrimKind, StoreExpr,
    TypeDef,
};

use crate::diagnostics::{Diagnostic, DiagnosticResult};

use super::super::{berr, CodeGen};

impl<'a> CodeGen<'a> {
    pub(super) fn lower_index(
        &self,
        index: &'a IndexExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        match self.program.type_def(index.base.ty) {
            TypeDef::Vector { .. } => {
                let vec = self.lower_expr(&index.base, true)?.into_vector_value();
                let lane = self.coerce_index(&index.index, self.i32_t)?;
                self.builder
                    .build_extract_element(vec, lane, "lane")
                    .map_err(berr("lane extract"))
            }
            TypeDef::Pointer { pointee, .. } => {
                self.ensure_points_to_complete_type(index.base.ty)?;
                let base = self.lower_expr(&index.base, true)?.into_pointer_value();
                let elem = self.resolve(*pointee)?;
                let idx = self.coerce_index(&index.index, self.i64_t)?;
                let addr = unsafe {
                    self.builder
                        .build_in_bounds_gep(elem.llvm, base, &[idx], "elem")
                }
                .map_err(berr("element address"))?;
                Ok(addr.into())
            }
            TypeDef::Array { .. } => {
                let base = self.address_of(&index.base, "index.base")?;
                let arr = self.resolve(index.base.ty)?;
                let idx = self.coerce_index(&index.index, self.i64_t)?;
                let zero = self.i64_t.const_zero();
                let addr = unsafe {
                    self.builder
                        .build_in_bounds_gep(arr.llvm, base, &[zero, idx], "elem")
                }
                .map_err(berr("element address"))?;
                Ok(addr.into())
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "indexing into {:?} at {:?}",
                other, expr.span
            ))),
        }
    }

    /// The index value coerced to the address width the base requires:
    /// 64-bit for pointers and arrays, 32-bit for vector lanes.
    pub(super) fn coerce_index(
        &self,
        index: &'a Expr,
        target: inkwell::types::IntType<'a>,
    ) -> DiagnosticResult<IntValue<'a>> {
        let mt = self.resolve_incomplete(index.ty)?;
        let value = self.lower_expr(index, true)?.into_int_value();
        let width = value.get_type().get_bit_width();
        if width == target.get_bit_width() {
            Ok(value)
        } else if width < target.get_bit_width() {
            if mt.signed {
                self.builder
                    .build_int_s_extend(value, target, "idx")
                    .map_err(berr("index widening"))
            } else {
                self.builder
                    .build_int_z_extend(value, target, "idx")
                    .map_err(berr("index widening"))
            }
        } else {
            self.builder
                .build_int_truncate(value, target, "idx")
                .map_err(berr("index narrowing"))
        }
    }

    /// Field selection: the base aggregate's address plus the field's
    /// slot. Union members share their group's slot; the declared type is
    /// applied by the load, not by the address.
    pub(super) fn lower_field(&self, field: &'a FieldExpr) -> DiagnosticResult<BasicValueEnum<'a>> {
        let base = self.address_of(&field.base, "field.base")?;
        let layout = self.struct_layout(field.base.ty)?;
        let slot = layout.slots.get(field.field as usize).ok_or_else(|| {
            Diagnostic::internal_boxed(format!("field {} out of range", field.field))
        })?;
        let base_mt = self.resolve(field.base.ty)?;
        let addr = self
            .builder
            .build_struct_gep(
                base_mt.llvm.into_struct_type(),
                base,
                slot.element,
                "field",
            )
            .map_err(berr("field address"))?;
        Ok(addr.into())
    }

    pub(super) fn lower_attributed_load(
        &self,
        load: &'a LoadExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        self.ensure_points_to_complete_type(load.addr.ty)?;
        let addr = self.lower_expr(&load.addr, true)?.into_pointer_value();
        let mt = self.resolve(expr.ty)?;
        let value = self
            .builder
            .build_load(mt.llvm, addr, "load")
            .map_err(berr("load"))?;
        self.apply_mem_attrs(value.as_instruction_value(), &load.attrs)?;
        Ok(value)
    }

    pub(super) fn lower_attributed_store(
        &self,
        store: &'a StoreExpr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        self.ensure_points_to_complete_type(store.addr.ty)?;
        let addr = self.lower_expr(&store.addr, true)?.into_pointer_value();
        let value = self.lower_expr(&store.value, true)?;
        let instr = self
            .builder
            .build_store(addr, value)
            .map_err(berr("store"))?;
        self.apply_mem_attrs(Some(instr), &store.attrs)?;
        Ok(self.unit_value())
    }

    fn apply_mem_attrs(
        &self,
        instr: Option<InstructionValue<'a>>,
        attrs: &MemAttrs,
    ) -> DiagnosticResult<()> {
        let Some(instr) = instr else {
            return Ok(());
        };
        if let Some(align) = attrs.align {
            instr
                .set_alignment(align)
                .map_err(|e| Diagnostic::internal_boxed(format!("access alignment: {}", e)))?;
        }
        if attrs.volatile {
            instr
                .set_volatile(true)
                .map_err(|e| Diagnostic::internal_boxed(format!("volatile flag: {}", e)))?;
        }
        if attrs.nontemporal {
            let one = self.i32_t.const_int(1, false);
            let node = self.context.metadata_node(&[one.into()]);
            instr
                .set_metadata(node, self.context.get_kind_id("nontemporal"))
                .map_err(|e| Diagnostic::internal_boxed(format!("nontemporal hint: {}", e)))?;
        }
        Ok(())
    }

    /// Struct and array constructors fill temporary storage slot by slot
    /// and load the whole; vector constructors stay in registers through
    /// lane inserts.
    pub(super) fn lower_ctor(
        &self,
        ctor: &'a CtorExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        match self.program.type_def(expr.ty) {
            TypeDef::Vector { .. } => {
                let vt = self.resolve(expr.ty)?.llvm.into_vector_type();
                let mut acc = vt.get_undef();
                for (i, elem) in ctor.elems.iter().enumerate() {
                    let value = self.lower_expr(elem, true)?;
                    let lane = self.i32_t.const_int(i as u64, false);
                    acc = self
                        .builder
                        .build_insert_element(acc, value, lane, "ctor.lane")
                        .map_err(berr("lane insert"))?;
                }
                Ok(acc.into())
            }
            TypeDef::Struct { .. } | TypeDef::Union { .. } => {
                let mt = self.resolve(expr.ty)?;
                let layout = self.struct_layout(expr.ty)?;
                let tmp = self.entry_alloca("ctor", mt.llvm)?;
                for (i, elem) in ctor.elems.iter().enumerate() {
                    let value = self.lower_expr(elem, true)?;
                    let slot = layout.slots.get(i).ok_or_else(|| {
                        Diagnostic::internal_boxed("constructor element out of range")
                    })?;
                    let addr = self
                        .builder
                        .build_struct_gep(mt.llvm.into_struct_type(), tmp, slot.element, "ctor.field")
                        .map_err(berr("field address"))?;
                    self.builder
                        .build_store(addr, value)
                        .map_err(berr("field store"))?;
                }
                self.builder
                    .build_load(mt.llvm, tmp, "ctor.value")
                    .map_err(berr("constructor load"))
            }
            TypeDef::Array { .. } => {
                let mt = self.resolve(expr.ty)?;
                let tmp = self.entry_alloca("ctor", mt.llvm)?;
                let zero = self.i64_t.const_zero();
                for (i, elem) in ctor.elems.iter().enumerate() {
                    let value = self.lower_expr(elem, true)?;
                    let idx = self.i64_t.const_int(i as u64, false);
                    let addr = unsafe {
                        self.builder
                            .build_in_bounds_gep(mt.llvm, tmp, &[zero, idx], "ctor.elem")
                    }
                    .map_err(berr("element address"))?;
                    self.builder
                        .build_store(addr, value)
                        .map_err(berr("element store"))?;
                }
                self.builder
                    .build_load(mt.llvm, tmp, "ctor.value")
                    .map_err(berr("constructor load"))
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "constructor for non-aggregate {:?}",
                other
            ))),
        }
    }

    /// Decodes a little-endian byte image. Scalars decode directly;
    /// aggregates materialize once as a read-only global and load.
    pub(super) fn lower_const_bytes(
        &self,
        bytes: &[u8],
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let mt = self.resolve(expr.ty)?;
        match self.program.type_def(expr.ty) {
            TypeDef::Primitive {
                kind: PrimKind::Float,
                width,
                ..
            } => {
                let value = match *width {
                    4 => {
                        let raw: [u8; 4] = bytes
                            .get(..4)
                            .and_then(|s| s.try_into().ok())
                            .ok_or_else(|| short_image(bytes.len(), 4))?;
                        f64::from(f32::from_le_bytes(raw))
                    }
                    8 => {
                        let raw: [u8; 8] = bytes
                            .get(..8)
                            .and_then(|s| s.try_into().ok())
                            .ok_or_else(|| short_image(bytes.len(), 8))?;
                        f64::from_le_bytes(raw)
                    }
                    w => {
                        return Err(Diagnostic::internal_boxed(format!(
                            "float constant of width {}",
                            w
                        )));
                    }
                };
                Ok(mt.llvm.into_float_type().const_float(value).into())
            }
            TypeDef::Primitive { width, .. } => {
                let width = *width as usize;
                if bytes.len() < width {
                    return Err(short_image(bytes.len(), width));
                }
                let out = mt.llvm.into_int_type();
                if width <= 8 {
                    return Ok(out.const_int(le_word(&bytes[..width]), false).into());
                }
                // Wide integers decode 64 bits per word, least
                // significant word first.
                let words: Vec<u64> = bytes[..width].chunks(8).map(le_word).collect();
                Ok(out.const_int_arbitrary_precision(&words).into())
            }
            TypeDef::Pointer { .. } => {
                let out = mt.llvm.into_pointer_type();
                let value = le_word(&bytes[..bytes.len().min(8)]);
                if value == 0 {
                    Ok(out.const_null().into())
                } else {
                    Ok(self
                        .i64_t
                        .const_int(value, false)
                        .const_to_pointer(out)
                        .into())
                }
            }
            TypeDef::Struct { .. }
            | TypeDef::Union { .. }
            | TypeDef::Array { .. }
            | TypeDef::Vector { .. } => {
                let align = self.align_of(expr.ty)?;
                let image = self.interned_const_image(bytes, align)?;
                self.builder
                    .build_load(mt.llvm, image, "const")
                    .map_err(berr("constant load"))
            }
            other => Err(Diagnostic::internal_boxed(format!(
                "byte image for {:?}",
                other
            ))),
        }
    }

    /// Read-only global holding a raw constant image, interned by content
    /// and alignment.
    fn interned_const_image(
        &self,
        bytes: &[u8],
        align: u64,
    ) -> DiagnosticResult<PointerValue<'a>> {
        let key = (bytes.to_vec(), align);
        if let Some(ptr) = self.const_interns.borrow().get(&key) {
            return Ok(*ptr);
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let name = format!("const.intern.{:016x}", hasher.finish());
        let image = self.context.const_string(bytes, false);
        let gv = self.module.add_global(image.get_type(), None, &name);
        gv.set_initializer(&image);
        gv.set_constant(true);
        gv.set_alignment(align as u32);
        let ptr = gv.as_pointer_value();
        self.const_interns.borrow_mut().insert(key, ptr);
        Ok(ptr)
    }

    /// Inline assembly, typed void when the declared result is unit.
    pub(super) fn lower_inline_asm(
        &self,
        asm: &'a InlineAsmExpr,
        expr: &'a Expr,
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let mut values = Vec::with_capacity(asm.args.len());
        for arg in &asm.args {
            values.push(self.lower_expr(arg, true)?);
        }
        let param_tys: Vec<BasicMetadataTypeEnum> =
            values.iter().map(|v| v.get_type().into()).collect();
        let fn_ty = if self.is_unit(expr.ty) {
            self.context.void_type().fn_type(&param_tys, false)
        } else {
            use inkwell::types::BasicType;
            self.resolve(expr.ty)?.llvm.fn_type(&param_tys, false)
        };
        let target = self.context.create_inline_asm(
            fn_ty,
            asm.asm.clone(),
            asm.constraints.clone(),
            asm.volatile,
            false,
            None,
            false,
        );
        let args: Vec<BasicMetadataValueEnum> = values.iter().map(|v| (*v).into()).collect();
        let site = self
            .builder
            .build_indirect_call(fn_ty, target, &args, "asm")
            .map_err(berr("inline asm"))?;
        if self.is_unit(expr.ty) {
            Ok(self.unit_value())
        } else {
            site.try_as_basic_value()
                .basic()
                .ok_or_else(|| Diagnostic::internal_boxed("inline asm produced no value"))
        }
    }
}

/// Little-endian unsigned decode of up to eight bytes.
fn le_word(bytes: &[u8]) -> u64 {
    let mut value: u64 = 0;
    for (i, b) in bytes.iter().take(8).enumerate() {
        value |= u64::from(*b) << (8 * i);
    }
    value
}

fn short_image(got: usize, want: usize) -> Box<Diagnostic> {
    Diagnostic::internal_boxed(format!(
        "constant image has {} bytes, type needs {}",
        got, want
    ))
}
