//! Calling convention classification and argument marshalling
//!
//! Decides, per function type, how the return value and each parameter
//! travel: scalars pass directly (sub-32-bit integers widened), small
//! aggregates are unpacked into one or two machine words described by a
//! synthetic struct, and everything else goes through a hidden pointer.
//! The decision threads a register budget across the whole parameter list
//! in declaration order, so a small struct late in the list can still be
//! forced to memory by earlier parameters.
//!
//! The classification is pure and cached per function type id. Running
//! out of registers is a classification outcome, never an error. The
//! marshalling entry points (`emit_entry_unpacking`, `emit_return`,
//! `emit_call`) are exact mirrors of one another; a value must round-trip
//! bit-for-bit through a call boundary.

use inkwell::attributes::{Attribute, AttributeLoc};
use inkwell::types::{
    AnyType, BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType, StructType,
};
use inkwell::values::{BasicMetadataValueEnum, BasicValueEnum, FunctionValue, PointerValue};
use log::trace;
use std::rc::Rc;

use farro_ir::{PrimKind, TypeDef, TypeId};

use crate::diagnostics::{Diagnostic, DiagnosticResult};

use super::layout::MachineType;
use super::{berr, CodeGen, LocalSlot};

/// Target calling convention, fixed at compiler construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetAbi {
    /// System V AMD64 (Linux, the BSDs, macOS).
    SysV64,
    /// Microsoft x64.
    Win64,
}

impl TargetAbi {
    pub(crate) fn policy(self) -> Box<dyn CallingConventionPolicy> {
        match self {
            TargetAbi::SysV64 => Box::new(SysV64Policy),
            TargetAbi::Win64 => Box::new(Win64Policy),
        }
    }
}

/// Remaining register-class slots while classifying one parameter list.
#[derive(Debug, Clone, Copy)]
pub struct RegBudget {
    pub ints: u32,
    pub sses: u32,
}

impl RegBudget {
    /// Scalars spill to the stack physically but keep their class, so
    /// consumption saturates instead of failing.
    fn take_int(&mut self) {
        self.ints = self.ints.saturating_sub(1);
    }

    fn take_sse(&mut self) {
        self.sses = self.sses.saturating_sub(1);
    }

    fn admits(&self, ints: u32, sses: u32) -> bool {
        self.ints >= ints && self.sses >= sses
    }

    fn consume(&mut self, ints: u32, sses: u32) {
        self.ints -= ints;
        self.sses -= sses;
    }
}

/// The per-target knobs of the classifier. One implementation per
/// supported convention, selected once at construction.
pub trait CallingConventionPolicy {
    fn name(&self) -> &'static str;
    fn initial_budget(&self) -> RegBudget;
    /// Is an aggregate of this size register-passable at all.
    fn admits_size(&self, size: u64) -> bool;
    /// Merge per-eightbyte register classes. When false, admitted
    /// aggregates pass as one integer word of their exact size.
    fn merges_eightbytes(&self) -> bool;
    /// Mark memory-aggregate parameters `byval` at declaration and call
    /// sites.
    fn annotates_byval(&self) -> bool;
}

pub struct SysV64Policy;

impl CallingConventionPolicy for SysV64Policy {
    fn name(&self) -> &'static str {
        "sysv64"
    }

    fn initial_budget(&self) -> RegBudget {
        // rdi rsi rdx rcx r8 r9 / xmm0-xmm7
        RegBudget { ints: 6, sses: 8 }
    }

    fn admits_size(&self, size: u64) -> bool {
        size <= 16
    }

    fn merges_eightbytes(&self) -> bool {
        true
    }

    fn annotates_byval(&self) -> bool {
        true
    }
}

pub struct Win64Policy;

impl CallingConventionPolicy for Win64Policy {
    fn name(&self) -> &'static str {
        "win64"
    }

    fn initial_budget(&self) -> RegBudget {
        RegBudget { ints: 4, sses: 4 }
    }

    fn admits_size(&self, size: u64) -> bool {
        matches!(size, 1 | 2 | 4 | 8)
    }

    fn merges_eightbytes(&self) -> bool {
        false
    }

    fn annotates_byval(&self) -> bool {
        false
    }
}

/// Register class of one eightbyte, merged over every primitive leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegClass {
    None,
    Int,
    Sse,
    Mem,
}

impl RegClass {
    fn merge(self, other: RegClass) -> RegClass {
        match (self, other) {
            (RegClass::Mem, _) | (_, RegClass::Mem) => RegClass::Mem,
            (RegClass::Int, _) | (_, RegClass::Int) => RegClass::Int,
            (RegClass::Sse, _) | (_, RegClass::Sse) => RegClass::Sse,
            (RegClass::None, RegClass::None) => RegClass::None,
        }
    }
}

/// How one value crosses the call boundary.
#[derive(Debug, Clone, Copy)]
pub enum ArgClass<'a> {
    /// Scalar passed directly, optionally widened to 32 bits.
    Primitive {
        mt: MachineType<'a>,
        coerce: Option<BasicTypeEnum<'a>>,
    },
    /// Small aggregate unpacked into the synthetic struct's words.
    RegisterAggregate {
        mt: MachineType<'a>,
        synthetic: StructType<'a>,
    },
    /// Passed through a hidden pointer to caller-owned storage.
    MemoryAggregate {
        mt: MachineType<'a>,
        size: u64,
        align: u64,
    },
    /// Zero-sized return; nothing crosses the boundary.
    Void,
}

impl<'a> ArgClass<'a> {
    /// Number of low-level parameters this value occupies.
    pub fn lowered_arity(&self) -> u32 {
        match self {
            ArgClass::Primitive { .. } | ArgClass::MemoryAggregate { .. } => 1,
            ArgClass::RegisterAggregate { synthetic, .. } => synthetic.count_fields(),
            ArgClass::Void => 0,
        }
    }
}

/// Complete calling-convention decision for one function type.
#[derive(Debug)]
pub struct FunctionClassification<'a> {
    pub ret: ArgClass<'a>,
    pub params: Vec<ArgClass<'a>>,
    /// The flattened low-level signature every call and declaration uses.
    pub fn_ty: FunctionType<'a>,
}

impl<'a> FunctionClassification<'a> {
    /// The hidden return pointer occupies low-level parameter 0 when the
    /// return value is a memory aggregate.
    pub fn has_sret(&self) -> bool {
        matches!(self.ret, ArgClass::MemoryAggregate { .. })
    }
}

fn is_aggregate_def(def: &TypeDef) -> bool {
    matches!(
        def,
        TypeDef::Struct { .. } | TypeDef::Union { .. } | TypeDef::Array { .. }
    )
}

impl<'a> CodeGen<'a> {
    /// Classifies a function type, caching the result per type id.
    pub fn classify(&self, fn_ty: TypeId) -> DiagnosticResult<Rc<FunctionClassification<'a>>> {
        if let Some(c) = self.classifications.borrow().get(&fn_ty) {
            return Ok(c.clone());
        }
        let TypeDef::Function {
            params,
            ret,
            is_vararg,
        } = self.program.type_def(fn_ty)
        else {
            return Err(Diagnostic::internal_boxed(
                "classification requested for a non-function type",
            ));
        };

        let mut budget = self.policy.initial_budget();
        let ret_class = self.classify_return(*ret, &mut budget)?;
        let mut param_classes = Vec::with_capacity(params.len());
        for &param in params {
            param_classes.push(self.classify_argument(param, &mut budget, true)?);
        }

        let mut lowered: Vec<BasicMetadataTypeEnum<'a>> = Vec::new();
        if matches!(ret_class, ArgClass::MemoryAggregate { .. }) {
            lowered.push(self.ptr_t.into());
        }
        for class in &param_classes {
            match class {
                ArgClass::Primitive { mt, coerce } => {
                    lowered.push(coerce.unwrap_or(mt.llvm).into());
                }
                ArgClass::RegisterAggregate { synthetic, .. } => {
                    for field in synthetic.get_field_types() {
                        lowered.push(field.into());
                    }
                }
                ArgClass::MemoryAggregate { .. } => lowered.push(self.ptr_t.into()),
                ArgClass::Void => {}
            }
        }
        let signature = match &ret_class {
            ArgClass::Primitive { mt, .. } => mt.llvm.fn_type(&lowered, *is_vararg),
            ArgClass::RegisterAggregate { synthetic, .. } => {
                synthetic.fn_type(&lowered, *is_vararg)
            }
            ArgClass::MemoryAggregate { .. } | ArgClass::Void => {
                self.context.void_type().fn_type(&lowered, *is_vararg)
            }
        };

        trace!(
            "classified {:?} under {}: ret={:?} params={:?}",
            fn_ty,
            self.policy.name(),
            ret_class,
            param_classes
        );
        let classification = Rc::new(FunctionClassification {
            ret: ret_class,
            params: param_classes,
            fn_ty: signature,
        });
        self.classifications
            .borrow_mut()
            .insert(fn_ty, classification.clone());
        Ok(classification)
    }

    /// Return values own the return-register file, so they classify
    /// against a fresh budget; only a hidden return pointer eats into the
    /// parameter budget.
    fn classify_return(&self, id: TypeId, budget: &mut RegBudget) -> DiagnosticResult<ArgClass<'a>> {
        if matches!(self.program.type_def(id), TypeDef::Unit) {
            return Ok(ArgClass::Void);
        }
        let mt = self.resolve(id)?;
        if !is_aggregate_def(self.program.type_def(id)) {
            return Ok(ArgClass::Primitive { mt, coerce: None });
        }
        if self.size_of(id)? == 0 {
            // An empty aggregate return must be a true void return, not a
            // zero-sized struct return.
            return Ok(ArgClass::Void);
        }
        let mut ret_budget = self.policy.initial_budget();
        let class = self.classify_argument(id, &mut ret_budget, false)?;
        if matches!(class, ArgClass::MemoryAggregate { .. }) {
            budget.take_int();
        }
        Ok(class)
    }

    fn classify_argument(
        &self,
        id: TypeId,
        budget: &mut RegBudget,
        promote: bool,
    ) -> DiagnosticResult<ArgClass<'a>> {
        let mt = self.resolve(id)?;
        let def = self.program.type_def(id);
        if !is_aggregate_def(def) {
            match def {
                TypeDef::Primitive {
                    kind: PrimKind::Float,
                    ..
                }
                | TypeDef::Vector { .. } => budget.take_sse(),
                _ => budget.take_int(),
            }
            let coerce = match mt.llvm {
                BasicTypeEnum::IntType(t) if promote && t.get_bit_width() < 32 => {
                    Some(self.i32_t.into())
                }
                _ => None,
            };
            return Ok(ArgClass::Primitive { mt, coerce });
        }

        let (size, align) = self.size_and_align_of(id)?;
        if size == 0 {
            // Zero-sized values occupy no registers on any target.
            return Ok(ArgClass::RegisterAggregate {
                mt,
                synthetic: self.context.struct_type(&[], false),
            });
        }
        if !self.policy.admits_size(size) {
            return Ok(ArgClass::MemoryAggregate { mt, size, align });
        }

        if !self.policy.merges_eightbytes() {
            if !budget.admits(1, 0) {
                return Ok(ArgClass::MemoryAggregate { mt, size, align });
            }
            budget.consume(1, 0);
            let word: BasicTypeEnum = self.int_type_of_width(size as u32).into();
            return Ok(ArgClass::RegisterAggregate {
                mt,
                synthetic: self.context.struct_type(&[word], false),
            });
        }

        let mut classes = [RegClass::None; 2];
        self.merge_leaf_classes(id, 0, &mut classes)?;
        let words = ((size + 7) / 8) as usize;
        let used = &classes[..words];
        if used.contains(&RegClass::Mem) {
            return Ok(ArgClass::MemoryAggregate { mt, size, align });
        }
        let ints = used.iter().filter(|c| **c == RegClass::Int).count() as u32;
        let sses = used.iter().filter(|c| **c == RegClass::Sse).count() as u32;
        if !budget.admits(ints, sses) {
            return Ok(ArgClass::MemoryAggregate { mt, size, align });
        }
        budget.consume(ints, sses);

        let mut fields = Vec::with_capacity(words);
        for (i, class) in used.iter().enumerate() {
            let word_size = (size - 8 * i as u64).min(8);
            fields.push(self.eightbyte_word(*class, word_size)?);
        }
        Ok(ArgClass::RegisterAggregate {
            mt,
            synthetic: self.context.struct_type(&fields, false),
        })
    }

    /// Merges register classes over every primitive leaf of an aggregate,
    /// descending nested structs, unions and arrays at their byte offsets.
    fn merge_leaf_classes(
        &self,
        id: TypeId,
        offset: u64,
        classes: &mut [RegClass; 2],
    ) -> DiagnosticResult<()> {
        let idx = ((offset / 8) as usize).min(1);
        match self.program.type_def(id) {
            TypeDef::Primitive {
                kind: PrimKind::Float,
                ..
            } => classes[idx] = classes[idx].merge(RegClass::Sse),
            TypeDef::Primitive { .. } | TypeDef::Pointer { .. } => {
                classes[idx] = classes[idx].merge(RegClass::Int);
            }
            TypeDef::Vector { .. } => {
                // Vectors inside aggregates never register-pass.
                classes[0] = RegClass::Mem;
                classes[1] = RegClass::Mem;
            }
            TypeDef::Array { element, len } => {
                let (elem_size, _) = self.size_and_align_of(*element)?;
                for i in 0..*len {
                    self.merge_leaf_classes(*element, offset + i * elem_size, classes)?;
                }
            }
            TypeDef::Struct { fields, .. } | TypeDef::Union { fields, .. } => {
                let layout = self.struct_layout(id)?;
                for (field, slot) in fields.iter().zip(layout.slots.iter()) {
                    self.merge_leaf_classes(field.ty, offset + slot.offset, classes)?;
                }
            }
            TypeDef::Unit => {}
            other => {
                return Err(Diagnostic::internal_boxed(format!(
                    "unclassifiable leaf {:?} inside an aggregate",
                    other
                )));
            }
        }
        Ok(())
    }

    /// The machine word carrying one eightbyte of a register aggregate.
    fn eightbyte_word(&self, class: RegClass, size: u64) -> DiagnosticResult<BasicTypeEnum<'a>> {
        match class {
            RegClass::Sse if size <= 4 => Ok(self.f32_t.into()),
            RegClass::Sse => Ok(self.f64_t.into()),
            RegClass::Int => Ok(self.int_type_of_width(size as u32).into()),
            other => Err(Diagnostic::internal_boxed(format!(
                "eightbyte with class {:?} has no register word",
                other
            ))),
        }
    }

    /// The parameter attributes a declaration and every call site of this
    /// classification must carry, at lowered argument positions.
    pub(crate) fn classification_attributes(
        &self,
        fc: &FunctionClassification<'a>,
    ) -> Vec<(AttributeLoc, Attribute)> {
        let mut attrs = Vec::new();
        let mut idx: u32 = 0;
        if let ArgClass::MemoryAggregate { mt, align, .. } = &fc.ret {
            let sret = self.context.create_type_attribute(
                Attribute::get_named_enum_kind_id("sret"),
                mt.llvm.as_any_type_enum(),
            );
            let noalias = self
                .context
                .create_enum_attribute(Attribute::get_named_enum_kind_id("noalias"), 0);
            let al = self
                .context
                .create_enum_attribute(Attribute::get_named_enum_kind_id("align"), *align);
            attrs.push((AttributeLoc::Param(0), sret));
            attrs.push((AttributeLoc::Param(0), noalias));
            attrs.push((AttributeLoc::Param(0), al));
            idx = 1;
        }
        for class in &fc.params {
            if let ArgClass::MemoryAggregate { mt, align, .. } = class {
                if self.policy.annotates_byval() {
                    let byval = self.context.create_type_attribute(
                        Attribute::get_named_enum_kind_id("byval"),
                        mt.llvm.as_any_type_enum(),
                    );
                    let al = self
                        .context
                        .create_enum_attribute(Attribute::get_named_enum_kind_id("align"), *align);
                    attrs.push((AttributeLoc::Param(idx), byval));
                    attrs.push((AttributeLoc::Param(idx), al));
                }
            }
            idx += class.lowered_arity();
        }
        attrs
    }

    /// Stack slot with an explicit alignment, for marshalling scratch
    /// storage whose access type disagrees with its allocation type.
    pub(crate) fn aligned_alloca(
        &self,
        name: &str,
        ty: BasicTypeEnum<'a>,
        align: u32,
    ) -> DiagnosticResult<PointerValue<'a>> {
        let ptr = self.entry_alloca(name, ty)?;
        if let Some(instr) = ptr.as_instruction() {
            instr
                .set_alignment(align)
                .map_err(|e| Diagnostic::internal_boxed(format!("alloca alignment: {}", e)))?;
        }
        Ok(ptr)
    }

    /// Copies incoming low-level arguments into the per-parameter storage
    /// slots the body was generated against.
    pub(crate) fn emit_entry_unpacking(
        &self,
        fc: &FunctionClassification<'a>,
        function: FunctionValue<'a>,
        slots: &[LocalSlot<'a>],
    ) -> DiagnosticResult<()> {
        let mut idx: u32 = if fc.has_sret() { 1 } else { 0 };
        for (class, slot) in fc.params.iter().zip(slots.iter()) {
            match class {
                ArgClass::Primitive { mt, coerce } => {
                    let incoming = nth_param(function, idx)?;
                    let value: BasicValueEnum = if coerce.is_some() {
                        self.builder
                            .build_int_truncate(
                                incoming.into_int_value(),
                                mt.llvm.into_int_type(),
                                "arg.narrow",
                            )
                            .map_err(berr("argument narrowing"))?
                            .into()
                    } else {
                        incoming
                    };
                    self.builder
                        .build_store(slot.ptr, value)
                        .map_err(berr("argument store"))?;
                }
                ArgClass::RegisterAggregate { synthetic, .. } => {
                    // The slot's storage is viewed as the synthetic struct;
                    // word offsets stay inside the declared type's size.
                    for i in 0..synthetic.count_fields() {
                        let word = nth_param(function, idx + i)?;
                        let word_ptr = self
                            .builder
                            .build_struct_gep(*synthetic, slot.ptr, i, "arg.word")
                            .map_err(berr("argument word address"))?;
                        self.builder
                            .build_store(word_ptr, word)
                            .map_err(berr("argument word store"))?;
                    }
                }
                ArgClass::MemoryAggregate { size, align, .. } => {
                    let incoming = nth_param(function, idx)?.into_pointer_value();
                    self.builder
                        .build_memcpy(
                            slot.ptr,
                            *align as u32,
                            incoming,
                            *align as u32,
                            self.i64_t.const_int(*size, false),
                        )
                        .map_err(berr("argument copy"))?;
                }
                ArgClass::Void => {}
            }
            idx += class.lowered_arity();
        }
        Ok(())
    }

    /// Emits the return sequence for the current function.
    pub(crate) fn emit_return(
        &self,
        fc: &FunctionClassification<'a>,
        value: Option<BasicValueEnum<'a>>,
    ) -> DiagnosticResult<()> {
        match &fc.ret {
            ArgClass::Void => {
                self.builder.build_return(None).map_err(berr("return"))?;
            }
            ArgClass::Primitive { .. } => {
                let v = value
                    .ok_or_else(|| Diagnostic::internal_boxed("scalar return without a value"))?;
                self.builder
                    .build_return(Some(&v))
                    .map_err(berr("return"))?;
            }
            ArgClass::RegisterAggregate { synthetic, .. } => {
                let v = value.ok_or_else(|| {
                    Diagnostic::internal_boxed("aggregate return without a value")
                })?;
                // Spill sized by the synthetic words, which cover the
                // declared type.
                let spill = self.aligned_alloca("ret.spill", (*synthetic).into(), 8)?;
                self.builder
                    .build_store(spill, v)
                    .map_err(berr("return spill"))?;
                let words = self
                    .builder
                    .build_load(*synthetic, spill, "ret.words")
                    .map_err(berr("return load"))?;
                self.builder
                    .build_return(Some(&words))
                    .map_err(berr("return"))?;
            }
            ArgClass::MemoryAggregate { .. } => {
                let v = value.ok_or_else(|| {
                    Diagnostic::internal_boxed("aggregate return without a value")
                })?;
                let hidden = nth_param(self.cur_fn()?, 0)?.into_pointer_value();
                self.builder
                    .build_store(hidden, v)
                    .map_err(berr("return store"))?;
                self.builder.build_return(None).map_err(berr("return"))?;
            }
        }
        Ok(())
    }

    /// Issues a call through a function pointer, marshalling arguments and
    /// result per the classification. The callee is held as an opaque
    /// pointer; this call site is what types it.
    pub(crate) fn emit_call(
        &self,
        fc: &FunctionClassification<'a>,
        callee: PointerValue<'a>,
        args: &[BasicValueEnum<'a>],
    ) -> DiagnosticResult<BasicValueEnum<'a>> {
        let mut lowered: Vec<BasicMetadataValueEnum<'a>> = Vec::new();
        let ret_slot = match &fc.ret {
            ArgClass::MemoryAggregate { mt, align, .. } => {
                let slot = self.aligned_alloca("call.sret", mt.llvm, *align as u32)?;
                lowered.push(slot.into());
                Some(slot)
            }
            _ => None,
        };

        for (class, value) in fc.params.iter().zip(args.iter()) {
            match class {
                ArgClass::Primitive { mt, coerce } => {
                    if coerce.is_some() {
                        let wide = if mt.signed {
                            self.builder.build_int_s_extend(
                                value.into_int_value(),
                                self.i32_t,
                                "arg.widen",
                            )
                        } else {
                            self.builder.build_int_z_extend(
                                value.into_int_value(),
                                self.i32_t,
                                "arg.widen",
                            )
                        }
                        .map_err(berr("argument widening"))?;
                        lowered.push(wide.into());
                    } else {
                        lowered.push((*value).into());
                    }
                }
                ArgClass::RegisterAggregate { synthetic, .. } => {
                    let spill = self.aligned_alloca("call.spill", (*synthetic).into(), 8)?;
                    self.builder
                        .build_store(spill, *value)
                        .map_err(berr("argument spill"))?;
                    for i in 0..synthetic.count_fields() {
                        let word_ptr = self
                            .builder
                            .build_struct_gep(*synthetic, spill, i, "arg.word")
                            .map_err(berr("argument word address"))?;
                        let word_ty = synthetic.get_field_type_at_index(i).ok_or_else(|| {
                            Diagnostic::internal_boxed("synthetic word out of range")
                        })?;
                        let word = self
                            .builder
                            .build_load(word_ty, word_ptr, "arg.word")
                            .map_err(berr("argument word load"))?;
                        lowered.push(word.into());
                    }
                }
                ArgClass::MemoryAggregate { mt, align, .. } => {
                    let scratch = self.aligned_alloca("call.byval", mt.llvm, *align as u32)?;
                    self.builder
                        .build_store(scratch, *value)
                        .map_err(berr("argument store"))?;
                    lowered.push(scratch.into());
                }
                ArgClass::Void => {}
            }
        }
        // Variadic extras pass through unclassified; the front end has
        // already applied default promotions.
        for extra in args.iter().skip(fc.params.len()) {
            lowered.push((*extra).into());
        }

        let site = self
            .builder
            .build_indirect_call(fc.fn_ty, callee, &lowered, "call")
            .map_err(berr("call"))?;
        for (loc, attr) in self.classification_attributes(fc) {
            site.add_attribute(loc, attr);
        }

        match &fc.ret {
            ArgClass::Void => Ok(self.unit_value()),
            ArgClass::Primitive { .. } => site
                .try_as_basic_value()
                .basic()
                .ok_or_else(|| Diagnostic::internal_boxed("scalar call produced no value")),
            ArgClass::RegisterAggregate { mt, synthetic } => {
                let words = site
                    .try_as_basic_value()
                    .basic()
                    .ok_or_else(|| Diagnostic::internal_boxed("aggregate call produced no value"))?;
                let spill = self.aligned_alloca("call.unpack", (*synthetic).into(), 8)?;
                self.builder
                    .build_store(spill, words)
                    .map_err(berr("result spill"))?;
                self.builder
                    .build_load(mt.llvm, spill, "call.result")
                    .map_err(berr("result load"))
            }
            ArgClass::MemoryAggregate { mt, .. } => {
                let slot = ret_slot
                    .ok_or_else(|| Diagnostic::internal_boxed("hidden return slot missing"))?;
                self.builder
                    .build_load(mt.llvm, slot, "call.result")
                    .map_err(berr("result load"))
            }
        }
    }
}

/// Incoming low-level argument at `idx`.
fn nth_param<'a>(function: FunctionValue<'a>, idx: u32) -> DiagnosticResult<BasicValueEnum<'a>> {
    function
        .get_nth_param(idx)
        .ok_or_else(|| Diagnostic::internal_boxed(format!("missing low-level argument {}", idx)))
}
