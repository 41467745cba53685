//! Top-level codegen module
//!
//! This module provides the `CodeGen` structure which holds the LLVM
//! `Context`, `Module`, `Builder`, the typed program being compiled, and
//! the memoization side tables shared by every compilation request. The
//! pipeline is organized across submodules:
//! - `layout` : type descriptor resolution and aggregate layout
//! - `abi`    : calling convention classification and ABI marshalling
//! - `expr`   : expression lowering
//! - `stmt`   : statement lowering
//! - `emit`   : top-level function emission
//!
//! One `CodeGen` compiles one function at a time into its module. The
//! caches are keyed by `TypeId` so repeated requests referencing the same
//! descriptor reuse the resolved layout and classification; `CodeGen` is
//! not `Sync`, so concurrent hosts must hold their own compilation lock.

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicTypeEnum, FloatType, IntType, PointerType, StructType};
use inkwell::values::{FunctionValue, PointerValue};
use inkwell::AddressSpace;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use farro_ir::{Expr, FuncId, GlobalId, LabelId, LocalId, Program, TypeId};

use crate::diagnostics::{Diagnostic, DiagnosticResult, Severity};

pub mod abi;
pub mod emit;
pub mod expr;
pub mod layout;
pub mod stmt;

pub use abi::TargetAbi;
use abi::{CallingConventionPolicy, FunctionClassification};
use layout::{MachineType, StructLayout};

/// A bound local: its stack slot and declared type.
#[derive(Clone, Copy)]
pub struct LocalSlot<'a> {
    pub ptr: PointerValue<'a>,
    pub ty: TypeId,
}

// Loop context for tracking break targets.
#[derive(Clone, Copy)]
pub struct LoopContext<'a> {
    pub break_block: BasicBlock<'a>,
}

/// Maps a builder error to a diagnostic naming the instruction family.
pub(crate) fn berr(
    what: &'static str,
) -> impl FnOnce(inkwell::builder::BuilderError) -> Box<Diagnostic> {
    move |_| Diagnostic::simple_boxed(Severity::Error, format!("failed to emit {}", what))
}

// The main code generation structure, holding the LLVM handles, the typed
// program, the selected calling convention policy, and the caches.
pub struct CodeGen<'a> {
    pub context: &'a Context,
    pub module: Module<'a>,
    pub builder: Builder<'a>,
    pub program: &'a Program,
    pub policy: Box<dyn CallingConventionPolicy>,

    // Frequently used LLVM types.
    pub f32_t: FloatType<'a>,
    pub f64_t: FloatType<'a>,
    pub i1_t: IntType<'a>,
    pub i8_t: IntType<'a>,
    pub i16_t: IntType<'a>,
    pub i32_t: IntType<'a>,
    pub i64_t: IntType<'a>,
    pub ptr_t: PointerType<'a>,
    pub unit_t: StructType<'a>,

    // Memoization side tables, keyed by arena TypeId.
    pub machine_types: RefCell<HashMap<TypeId, MachineType<'a>>>,
    pub struct_layouts: RefCell<HashMap<TypeId, Rc<StructLayout<'a>>>>,
    // Aggregates currently being laid out. Turns re-entrant completion
    // (by-value self-containment) into a state check.
    pub layout_in_progress: RefCell<HashSet<TypeId>>,
    pub classifications: RefCell<HashMap<TypeId, Rc<FunctionClassification<'a>>>>,
    pub next_anon_id: Cell<u32>,

    // Interned read-only globals: string literals and raw constant images.
    pub string_literals: RefCell<HashMap<String, PointerValue<'a>>>,
    pub const_interns: RefCell<HashMap<(Vec<u8>, u64), PointerValue<'a>>>,

    // Backend handles for declared entities, memoized so repeated
    // compilation reuses the same declaration instead of duplicating it.
    pub declared_functions: RefCell<HashMap<FuncId, FunctionValue<'a>>>,
    pub global_slots: RefCell<HashMap<GlobalId, PointerValue<'a>>>,

    // Per-function state, reset by the function emitter.
    pub locals: RefCell<HashMap<LocalId, LocalSlot<'a>>>,
    pub labels: RefCell<HashMap<LabelId, BasicBlock<'a>>>,
    pub defer_stack: RefCell<Vec<&'a Expr>>,
    pub loop_stack: RefCell<Vec<LoopContext<'a>>>,
    pub current_fn: Cell<Option<FunctionValue<'a>>>,
    pub entry_block: Cell<Option<BasicBlock<'a>>>,
    pub current_classification: RefCell<Option<Rc<FunctionClassification<'a>>>>,
}

impl<'a> CodeGen<'a> {
    pub fn new(
        context: &'a Context,
        program: &'a Program,
        module_name: &str,
        abi: TargetAbi,
    ) -> CodeGen<'a> {
        let module = context.create_module(module_name);
        let builder = context.create_builder();
        log::debug!("codegen module '{}' targeting {:?}", module_name, abi);
        CodeGen {
            context,
            module,
            builder,
            program,
            policy: abi.policy(),
            f32_t: context.f32_type(),
            f64_t: context.f64_type(),
            i1_t: context.bool_type(),
            i8_t: context.i8_type(),
            i16_t: context.i16_type(),
            i32_t: context.i32_type(),
            i64_t: context.i64_type(),
            ptr_t: context.ptr_type(AddressSpace::default()),
            unit_t: context.struct_type(&[], false),
            machine_types: RefCell::new(HashMap::new()),
            struct_layouts: RefCell::new(HashMap::new()),
            layout_in_progress: RefCell::new(HashSet::new()),
            classifications: RefCell::new(HashMap::new()),
            next_anon_id: Cell::new(0),
            string_literals: RefCell::new(HashMap::new()),
            const_interns: RefCell::new(HashMap::new()),
            declared_functions: RefCell::new(HashMap::new()),
            global_slots: RefCell::new(HashMap::new()),
            locals: RefCell::new(HashMap::new()),
            labels: RefCell::new(HashMap::new()),
            defer_stack: RefCell::new(Vec::new()),
            loop_stack: RefCell::new(Vec::new()),
            current_fn: Cell::new(None),
            entry_block: Cell::new(None),
            current_classification: RefCell::new(None),
        }
    }

    /// The block the builder is currently positioned in.
    pub(crate) fn cur_block(&self) -> DiagnosticResult<BasicBlock<'a>> {
        self.builder
            .get_insert_block()
            .ok_or_else(|| Diagnostic::internal_boxed("builder has no insertion point"))
    }

    /// The function currently being emitted.
    pub(crate) fn cur_fn(&self) -> DiagnosticResult<FunctionValue<'a>> {
        self.current_fn
            .get()
            .ok_or_else(|| Diagnostic::internal_boxed("no function under emission"))
    }

    /// Appends a block to the current function.
    pub(crate) fn append_block(&self, name: &str) -> DiagnosticResult<BasicBlock<'a>> {
        Ok(self.context.append_basic_block(self.cur_fn()?, name))
    }

    /// Allocates a stack slot in the entry block, before its terminator,
    /// so every alloca dominates all uses regardless of where in the body
    /// it is requested.
    pub(crate) fn entry_alloca(
        &self,
        name: &str,
        ty: BasicTypeEnum<'a>,
    ) -> DiagnosticResult<PointerValue<'a>> {
        let entry = self
            .entry_block
            .get()
            .ok_or_else(|| Diagnostic::internal_boxed("stack allocation outside a function"))?;
        let tmp = self.context.create_builder();
        match entry.get_terminator() {
            Some(term) => tmp.position_before(&term),
            None => tmp.position_at_end(entry),
        }
        tmp.build_alloca(ty, name).map_err(berr("stack slot"))
    }

    /// The unit value: an empty struct.
    pub(crate) fn unit_value(&self) -> inkwell::values::BasicValueEnum<'a> {
        use inkwell::values::BasicValue;
        self.unit_t.const_named_struct(&[]).as_basic_value_enum()
    }

    /// Integer type of the given byte width.
    pub(crate) fn int_type_of_width(&self, width_bytes: u32) -> IntType<'a> {
        match width_bytes {
            1 => self.i8_t,
            2 => self.i16_t,
            4 => self.i32_t,
            8 => self.i64_t,
            w => self.context.custom_width_int_type(w * 8),
        }
    }
}
