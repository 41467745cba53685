//! Function compilation driver
//!
//! `compile_function` runs the whole pipeline for one body: classify the
//! function type, create or reuse the declaration, bind parameters through
//! the entry unpacking convention, lower the body, and close the final
//! block. A diagnostic aborts the request; whatever was already emitted
//! stays in the module, which the host then treats as poisoned.

use inkwell::values::FunctionValue;
use log::debug;

use farro_ir::FuncId;

use super::super::abi::ArgClass;
use super::super::{berr, CodeGen, LocalSlot};
use crate::diagnostics::DiagnosticResult;

impl<'a> CodeGen<'a> {
    /// The module-level declaration for a function, created on first use.
    /// Functions already present under the same name are reused, never
    /// redeclared.
    pub(crate) fn declared_function(&self, id: FuncId) -> DiagnosticResult<FunctionValue<'a>> {
        if let Some(function) = self.declared_functions.borrow().get(&id) {
            return Ok(*function);
        }
        let func = self.program.function(id);
        let declared = match self.module.get_function(&func.name) {
            Some(existing) => existing,
            None => {
                let fc = self.classify(func.ty)?;
                let function = self.module.add_function(&func.name, fc.fn_ty, None);
                for (loc, attr) in self.classification_attributes(&fc) {
                    function.add_attribute(loc, attr);
                }
                function
            }
        };
        self.declared_functions.borrow_mut().insert(id, declared);
        Ok(declared)
    }

    /// Compiles one function body into the module and returns its handle.
    /// For an extern declaration (no body) only the declaration is
    /// created.
    pub fn compile_function(&self, id: FuncId) -> DiagnosticResult<FunctionValue<'a>> {
        let func = self.program.function(id);
        let function = self.declared_function(id)?;
        let Some(body) = &func.body else {
            return Ok(function);
        };
        // A repeated request for an already-emitted body reuses the first
        // definition; appending a second entry block would orphan it.
        if function.get_first_basic_block().is_some() {
            return Ok(function);
        }
        debug!("compiling '{}'", func.name);
        let fc = self.classify(func.ty)?;

        // Per-function state left over from the previous request.
        self.locals.borrow_mut().clear();
        self.labels.borrow_mut().clear();
        self.defer_stack.borrow_mut().clear();
        self.loop_stack.borrow_mut().clear();
        self.current_fn.set(Some(function));
        *self.current_classification.borrow_mut() = Some(fc.clone());

        let entry = self.context.append_basic_block(function, "entry");
        self.entry_block.set(Some(entry));
        self.builder.position_at_end(entry);

        // Every parameter gets a stack slot of its declared type; the
        // unpacking convention fills the slots from the low-level
        // parameter words.
        let mut slots = Vec::with_capacity(func.params.len());
        for param in &func.params {
            let mt = self.resolve(param.ty)?;
            let ptr = self.entry_alloca(&param.name, mt.llvm)?;
            let slot = LocalSlot { ptr, ty: param.ty };
            self.locals.borrow_mut().insert(param.local, slot);
            slots.push(slot);
        }
        self.emit_entry_unpacking(&fc, function, &slots)?;

        let terminated = self.lower_stmts(body)?;
        if !terminated {
            // Fell off the end: run the remaining defers, then return a
            // zero value of the low-level return type.
            self.replay_defers_from(0)?;
            let implicit = match &fc.ret {
                ArgClass::Void => None,
                ArgClass::Primitive { mt, .. }
                | ArgClass::RegisterAggregate { mt, .. }
                | ArgClass::MemoryAggregate { mt, .. } => Some(mt.llvm.const_zero()),
            };
            self.emit_return(&fc, implicit)?;
        } else if self.cur_block()?.get_terminator().is_none() {
            // The trailing dead block still needs a formal terminator.
            self.builder.build_unreachable().map_err(berr("unreachable"))?;
        }
        self.defer_stack.borrow_mut().clear();
        Ok(function)
    }
}
