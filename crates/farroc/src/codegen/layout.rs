//! Type descriptor resolution and aggregate layout
//!
//! Machine types are produced in two phases. `resolve_incomplete` maps a
//! descriptor to a backend type without forcing aggregate layout: struct
//! and union descriptors become named opaque placeholders, and pointers
//! never force their pointee, which is what lets self-referential and
//! mutually recursive pointer graphs terminate. `resolve` then completes
//! the layout when a type is actually used by value: fields are placed in
//! declaration order, with consecutive fields sharing a union allocation
//! group merged into one storage slot sized to the largest member and led
//! by the most-aligned member.
//!
//! Layout arithmetic follows the target C ABI exactly. Values cross an FFI
//! boundary into natively compiled code, so a mismatch here is a
//! correctness bug, not a cosmetic one.

use inkwell::types::{BasicType, BasicTypeEnum};
use inkwell::AddressSpace;
use log::{debug, trace};
use std::rc::Rc;

use farro_ir::{Field, PrimKind, TypeDef, TypeId};

use crate::diagnostics::{Diagnostic, DiagnosticResult, Severity};

use super::CodeGen;

/// Concrete backend rendering of a type descriptor.
#[derive(Debug, Clone, Copy)]
pub struct MachineType<'a> {
    pub llvm: BasicTypeEnum<'a>,
    pub signed: bool,
    /// Boolean-like semantics for comparisons and casts.
    pub logical: bool,
    /// Layout not yet performed; size and alignment are unavailable.
    pub incomplete: bool,
}

impl<'a> MachineType<'a> {
    fn plain(llvm: BasicTypeEnum<'a>) -> MachineType<'a> {
        MachineType {
            llvm,
            signed: false,
            logical: false,
            incomplete: false,
        }
    }
}

/// Completed layout of a struct or union.
#[derive(Debug)]
pub struct StructLayout<'a> {
    pub size: u64,
    pub align: u64,
    /// One entry per declared field, in declaration order.
    pub slots: Vec<FieldSlot<'a>>,
}

/// Where one declared field lives inside the laid-out aggregate.
#[derive(Debug, Clone, Copy)]
pub struct FieldSlot<'a> {
    /// Element index in the backend struct body.
    pub element: u32,
    /// Byte offset from the start of the aggregate.
    pub offset: u64,
    /// Storage type of the slot. Differs from the field's declared machine
    /// type for union members that are not the group's leading member;
    /// access then loads through the declared type instead.
    pub stored: BasicTypeEnum<'a>,
    pub stored_differs: bool,
}

/// Rounds `offset` up to a multiple of `align` (a power of two).
pub(crate) fn align_to(offset: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

impl<'a> CodeGen<'a> {
    /// Maps a descriptor to a machine type without forcing layout.
    ///
    /// The result is cached per `TypeId`. Aggregates come back with
    /// `incomplete` set until [`CodeGen::resolve`] lays them out.
    pub fn resolve_incomplete(&self, id: TypeId) -> DiagnosticResult<MachineType<'a>> {
        if let Some(mt) = self.machine_types.borrow().get(&id) {
            return Ok(*mt);
        }
        let mt = match self.program.type_def(id) {
            TypeDef::Primitive {
                kind,
                width,
                signed,
            } => self.primitive_machine_type(*kind, *width, *signed)?,
            TypeDef::Pointer {
                pointee,
                address_space,
            } => {
                // Pointees stay incomplete here; only by-value uses force
                // their layout.
                self.resolve_incomplete(*pointee)?;
                let space = AddressSpace::try_from(*address_space).map_err(|_| {
                    Diagnostic::simple_boxed(
                        Severity::Error,
                        format!("address space {} exceeds the backend limit", address_space),
                    )
                })?;
                MachineType::plain(self.context.ptr_type(space).into())
            }
            TypeDef::Array { element, len } => {
                let elem = self.resolve_incomplete(*element)?;
                if *len > u32::MAX as u64 {
                    return Err(Diagnostic::simple_boxed(
                        Severity::Error,
                        format!("array length {} exceeds backend limit", len),
                    ));
                }
                let mut mt = MachineType::plain(elem.llvm.array_type(*len as u32).into());
                mt.incomplete = elem.incomplete;
                mt
            }
            TypeDef::Vector { element, lanes } => {
                // Scalars resolve complete immediately; anything still
                // incomplete here can never be a lane type.
                let elem = self.resolve_incomplete(*element)?;
                if elem.incomplete {
                    return Err(Diagnostic::simple_boxed(
                        Severity::Error,
                        "vector of incomplete element type",
                    ));
                }
                MachineType::plain(self.vector_machine_type(elem.llvm, *lanes)?)
            }
            TypeDef::Struct { name, .. } | TypeDef::Union { name, .. } => {
                let type_name = self.aggregate_type_name(name.as_deref());
                let st = self.context.opaque_struct_type(&type_name);
                trace!("placeholder aggregate %{}", type_name);
                MachineType {
                    llvm: st.into(),
                    signed: false,
                    logical: false,
                    incomplete: true,
                }
            }
            TypeDef::Function { .. } => {
                // Function descriptors are only ever used behind pointers;
                // a single-byte placeholder keeps them addressable. The
                // precise signature comes from the classifier.
                MachineType::plain(self.i8_t.into())
            }
            TypeDef::Unit => MachineType::plain(self.unit_t.into()),
            TypeDef::Opaque { name } => {
                let st = self.context.opaque_struct_type(name);
                MachineType {
                    llvm: st.into(),
                    signed: false,
                    logical: false,
                    incomplete: true,
                }
            }
        };
        self.machine_types.borrow_mut().insert(id, mt);
        Ok(mt)
    }

    /// Resolves a descriptor and forces its layout.
    ///
    /// After this returns, `incomplete` is false and size and alignment
    /// may be queried.
    pub fn resolve(&self, id: TypeId) -> DiagnosticResult<MachineType<'a>> {
        let mt = self.resolve_incomplete(id)?;
        if !mt.incomplete {
            return Ok(mt);
        }
        match self.program.type_def(id) {
            TypeDef::Array { element, .. } => {
                self.resolve(*element)?;
            }
            TypeDef::Struct { .. } | TypeDef::Union { .. } => {
                self.complete_aggregate(id)?;
            }
            TypeDef::Opaque { name } => {
                return Err(Diagnostic::simple_boxed(
                    Severity::Error,
                    format!("opaque type '{}' used by value", name),
                ));
            }
            other => {
                return Err(Diagnostic::internal_boxed(format!(
                    "unexpected incomplete machine type for {:?}",
                    other
                )));
            }
        }
        let mut cache = self.machine_types.borrow_mut();
        let entry = cache
            .get_mut(&id)
            .ok_or_else(|| Diagnostic::internal_boxed("resolved type missing from cache"))?;
        entry.incomplete = false;
        Ok(*entry)
    }

    /// Forces completion of a pointer's pointee. Required before pointer
    /// arithmetic or dereference, which need the element size.
    pub fn ensure_points_to_complete_type(&self, id: TypeId) -> DiagnosticResult<()> {
        if let TypeDef::Pointer { pointee, .. } = self.program.type_def(id) {
            self.resolve(*pointee)?;
        }
        Ok(())
    }

    /// Byte size and alignment of a complete type.
    pub fn size_and_align_of(&self, id: TypeId) -> DiagnosticResult<(u64, u64)> {
        self.resolve(id)?;
        match self.program.type_def(id) {
            TypeDef::Primitive { width, .. } => {
                let w = u64::from(*width);
                Ok((w, w.max(1)))
            }
            TypeDef::Pointer { .. } => Ok((8, 8)),
            TypeDef::Array { element, len } => {
                let (elem_size, elem_align) = self.size_and_align_of(*element)?;
                let total = elem_size.checked_mul(*len).ok_or_else(|| {
                    Diagnostic::simple_boxed(Severity::Error, "array size overflows")
                })?;
                Ok((total, elem_align))
            }
            TypeDef::Vector { element, lanes } => {
                let (elem_size, _) = self.size_and_align_of(*element)?;
                let total = elem_size * u64::from(*lanes);
                Ok((total, total.next_power_of_two()))
            }
            TypeDef::Struct { .. } | TypeDef::Union { .. } => {
                let layout = self.struct_layout(id)?;
                Ok((layout.size, layout.align))
            }
            TypeDef::Unit => Ok((0, 1)),
            TypeDef::Function { .. } => Err(Diagnostic::simple_boxed(
                Severity::Error,
                "function type has no size",
            )),
            TypeDef::Opaque { name } => Err(Diagnostic::simple_boxed(
                Severity::Error,
                format!("opaque type '{}' has no size", name),
            )),
        }
    }

    /// Entry point: byte size of a type, forcing layout.
    pub fn size_of(&self, id: TypeId) -> DiagnosticResult<u64> {
        Ok(self.size_and_align_of(id)?.0)
    }

    /// Entry point: alignment of a type, forcing layout.
    pub fn align_of(&self, id: TypeId) -> DiagnosticResult<u64> {
        Ok(self.size_and_align_of(id)?.1)
    }

    /// The completed layout of a struct or union, forcing resolution.
    pub fn struct_layout(&self, id: TypeId) -> DiagnosticResult<Rc<StructLayout<'a>>> {
        self.resolve(id)?;
        self.struct_layouts
            .borrow()
            .get(&id)
            .cloned()
            .ok_or_else(|| Diagnostic::internal_boxed("aggregate resolved without layout"))
    }

    fn primitive_machine_type(
        &self,
        kind: PrimKind,
        width: u32,
        signed: bool,
    ) -> DiagnosticResult<MachineType<'a>> {
        match kind {
            PrimKind::Float => {
                let llvm = match width {
                    4 => self.f32_t.into(),
                    8 => self.f64_t.into(),
                    w => {
                        return Err(Diagnostic::internal_boxed(format!(
                            "unsupported float width {}",
                            w
                        )));
                    }
                };
                Ok(MachineType {
                    llvm,
                    signed: true,
                    logical: false,
                    incomplete: false,
                })
            }
            PrimKind::Integer => Ok(MachineType {
                llvm: self.int_type_of_width(width).into(),
                signed,
                logical: false,
                incomplete: false,
            }),
            // Logicals take the smallest addressable unit; boolean
            // semantics are applied at comparison and cast sites.
            PrimKind::Logical => Ok(MachineType {
                llvm: self.i8_t.into(),
                signed: false,
                logical: true,
                incomplete: false,
            }),
        }
    }

    fn vector_machine_type(
        &self,
        elem: BasicTypeEnum<'a>,
        lanes: u32,
    ) -> DiagnosticResult<BasicTypeEnum<'a>> {
        let vt = match elem {
            BasicTypeEnum::IntType(t) => t.vec_type(lanes),
            BasicTypeEnum::FloatType(t) => t.vec_type(lanes),
            BasicTypeEnum::PointerType(t) => t.vec_type(lanes),
            other => {
                return Err(Diagnostic::internal_boxed(format!(
                    "vector of non-scalar element {:?}",
                    other
                )));
            }
        };
        Ok(vt.into())
    }

    /// Picks the backend name for an aggregate. Source names survive
    /// unless they would land in the backend's reserved namespace.
    fn aggregate_type_name(&self, name: Option<&str>) -> String {
        match name {
            Some(n) if !n.is_empty() && !n.starts_with("llvm.") => n.to_string(),
            _ => {
                let id = self.next_anon_id.get();
                self.next_anon_id.set(id + 1);
                format!("anon.{}", id)
            }
        }
    }

    fn complete_aggregate(&self, id: TypeId) -> DiagnosticResult<()> {
        if !self.layout_in_progress.borrow_mut().insert(id) {
            return Err(Diagnostic::simple_boxed(
                Severity::Error,
                "aggregate type contains itself by value",
            ));
        }
        let result = self.lay_out_aggregate(id);
        self.layout_in_progress.borrow_mut().remove(&id);
        result
    }

    /// Places fields and fills in the placeholder's body.
    ///
    /// Consecutive fields sharing an allocation group become one slot:
    /// the most-aligned member leads, and padding bytes extend the slot
    /// when the most-aligned member is not also the largest, so the
    /// group's total size equals the largest member's allocation size.
    fn lay_out_aggregate(&self, id: TypeId) -> DiagnosticResult<()> {
        let (name, fields, defined) = match self.program.type_def(id) {
            TypeDef::Struct {
                name,
                fields,
                defined,
            }
            | TypeDef::Union {
                name,
                fields,
                defined,
            } => (name, fields, *defined),
            other => {
                return Err(Diagnostic::internal_boxed(format!(
                    "layout requested for non-aggregate {:?}",
                    other
                )));
            }
        };
        if !defined {
            return Err(Diagnostic::simple_boxed(
                Severity::Error,
                format!(
                    "aggregate '{}' used by value before its fields are defined",
                    name.as_deref().unwrap_or("<anonymous>")
                ),
            ));
        }

        let mut elements: Vec<BasicTypeEnum<'a>> = Vec::new();
        let mut slots: Vec<FieldSlot<'a>> = Vec::with_capacity(fields.len());
        let mut offset: u64 = 0;
        let mut max_align: u64 = 1;

        let mut i = 0;
        while i < fields.len() {
            let group_end = group_end(fields, i);
            // By-value use: every member must be fully laid out.
            let mut member_info = Vec::with_capacity(group_end - i);
            for field in &fields[i..group_end] {
                let mt = self.resolve(field.ty)?;
                let (size, align) = self.size_and_align_of(field.ty)?;
                member_info.push((mt, size, align));
            }
            let group_align = member_info.iter().map(|m| m.2).max().unwrap_or(1);
            let group_size = member_info.iter().map(|m| m.1).max().unwrap_or(0);
            let alloc_size = align_to(group_size, group_align);
            // Leading member: first one carrying the group alignment.
            let lead = member_info
                .iter()
                .position(|m| m.2 == group_align)
                .unwrap_or(0);
            let lead_mt = member_info[lead].0;
            let lead_size = member_info[lead].1;

            offset = align_to(offset, group_align);
            let element = elements.len() as u32;
            elements.push(lead_mt.llvm);
            if alloc_size > lead_size {
                elements.push(self.i8_t.array_type((alloc_size - lead_size) as u32).into());
            }
            for (k, (mt, _, _)) in member_info.iter().enumerate() {
                slots.push(FieldSlot {
                    element,
                    offset,
                    stored: lead_mt.llvm,
                    stored_differs: k != lead || mt.llvm != lead_mt.llvm,
                });
            }
            offset += alloc_size;
            max_align = max_align.max(group_align);
            i = group_end;
        }

        let size = align_to(offset, max_align);

        let mt = self.resolve_incomplete(id)?;
        let BasicTypeEnum::StructType(st) = mt.llvm else {
            return Err(Diagnostic::internal_boxed(
                "aggregate placeholder is not a struct type",
            ));
        };
        st.set_body(&elements, false);
        debug!(
            "laid out %{} size={} align={} ({} fields, {} slots)",
            st.get_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            size,
            max_align,
            slots.len(),
            elements.len()
        );
        self.struct_layouts.borrow_mut().insert(
            id,
            Rc::new(StructLayout {
                size,
                align: max_align,
                slots,
            }),
        );
        Ok(())
    }
}

/// End of the storage group starting at `start`: consecutive fields with
/// the same allocation id, when flagged as union members.
fn group_end(fields: &[Field], start: usize) -> usize {
    if !fields[start].in_union {
        return start + 1;
    }
    let alloc = fields[start].allocation;
    let mut end = start + 1;
    while end < fields.len() && fields[end].in_union && fields[end].allocation == alloc {
        end += 1;
    }
    end
}
