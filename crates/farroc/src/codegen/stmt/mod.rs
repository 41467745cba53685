//! Statement lowering
//!
//! `lower_stmt` dispatches on the statement kind and reports whether the
//! position after the statement is unreachable. Terminating statements
//! (return, goto, break) finish their block and then open a fresh dead
//! block, so emission always continues: a label after a return is
//! reachable through gotos and must still be materialized.
//!
//! Deferred calls live on a per-function stack of IR nodes. Every exit
//! path replays (re-lowers) the entries it crosses without popping them;
//! only the scope that pushed an entry removes it, at scope exit.

pub mod control_flow;

use inkwell::values::{BasicValueEnum, PointerValue};

use farro_ir::{AssignStmt, AssignTarget, BlockStmt, DeferStmt, Expr, Stmt};

use crate::diagnostics::{Diagnostic, DiagnosticResult};

use super::{berr, CodeGen};

impl<'a> CodeGen<'a> {
    /// Lowers a statement list. Returns true when the position after the
    /// last statement cannot be reached.
    pub(crate) fn lower_stmts(&self, stmts: &'a [Stmt]) -> DiagnosticResult<bool> {
        let mut terminated = false;
        for stmt in stmts {
            let ended = self.lower_stmt(stmt)?;
            if matches!(stmt, Stmt::Label(_)) {
                // A label is a live position again; forward gotos land here.
                terminated = false;
            } else {
                terminated = terminated || ended;
            }
        }
        Ok(terminated)
    }

    pub(crate) fn lower_stmt(&self, stmt: &'a Stmt) -> DiagnosticResult<bool> {
        match stmt {
            Stmt::Block(block) => self.lower_block_stmt(block),
            Stmt::If(ifstmt) => self.lower_if_stmt(ifstmt),
            Stmt::While(whilestmt) => self.lower_while_stmt(whilestmt),
            Stmt::ForNum(forstmt) => self.lower_for_num_stmt(forstmt),
            Stmt::Repeat(repeatstmt) => self.lower_repeat_stmt(repeatstmt),
            Stmt::Return(ret) => self.lower_return_stmt(ret),
            Stmt::Goto(goto) => self.lower_goto_stmt(goto),
            Stmt::Break(brk) => self.lower_break_stmt(brk),
            Stmt::Label(label) => self.lower_label_stmt(label),
            Stmt::Assign(assign) => self.lower_assign_stmt(assign),
            Stmt::Defer(defer) => self.lower_defer_stmt(defer),
            // Statement/expression unification: a bare expression is
            // evaluated and its value discarded.
            Stmt::Expr(stmt) => {
                self.lower_expr(&stmt.expr, true)?;
                Ok(false)
            }
        }
    }

    /// Braced scope. Defers pushed inside replay at the normal exit and
    /// are dropped from the stack either way; an early exit has already
    /// replayed everything it crossed.
    pub(crate) fn lower_block_stmt(&self, block: &'a BlockStmt) -> DiagnosticResult<bool> {
        let depth = self.defer_stack.borrow().len();
        let terminated = self.lower_stmts(&block.stmts)?;
        if !terminated {
            self.replay_defers_from(depth)?;
        }
        self.defer_stack.borrow_mut().truncate(depth);
        Ok(terminated)
    }

    /// Multi-assignment. Every right-hand value is evaluated before any
    /// target address is computed.
    pub(crate) fn lower_assign_stmt(&self, assign: &'a AssignStmt) -> DiagnosticResult<bool> {
        let mut values = Vec::with_capacity(assign.values.len());
        for value in &assign.values {
            values.push(self.lower_expr(value, true)?);
        }
        for (target, value) in assign.targets.iter().zip(values) {
            match target {
                AssignTarget::Lvalue(dest) => {
                    let addr = self.assign_target_address(dest)?;
                    self.builder.build_store(addr, value).map_err(berr("store"))?;
                }
                AssignTarget::Setter(setter) => {
                    // Computed property: fill the backing slot, then run
                    // the setter call for its side effect.
                    let addr = self.assign_target_address(&setter.slot)?;
                    self.builder.build_store(addr, value).map_err(berr("store"))?;
                    self.lower_expr(&setter.call, true)?;
                }
            }
        }
        Ok(false)
    }

    fn assign_target_address(&self, target: &'a Expr) -> DiagnosticResult<PointerValue<'a>> {
        if !target.lvalue {
            return Err(Diagnostic::internal_boxed("assignment to a non-lvalue"));
        }
        let addr = self.lower_expr(target, false)?;
        let BasicValueEnum::PointerValue(ptr) = addr else {
            return Err(Diagnostic::internal_boxed("lvalue lowered without an address"));
        };
        Ok(ptr)
    }

    /// No control flow at the defer site; the call body is only emitted
    /// on replay paths.
    pub(crate) fn lower_defer_stmt(&self, defer: &'a DeferStmt) -> DiagnosticResult<bool> {
        self.defer_stack.borrow_mut().push(&defer.call);
        Ok(false)
    }

    /// Replays pending deferred calls above `depth`, newest first,
    /// without popping them.
    pub(crate) fn replay_defers_from(&self, depth: usize) -> DiagnosticResult<()> {
        // Snapshot first: lowering the calls must not hold the borrow.
        let pending: Vec<&'a Expr> = self.defer_stack.borrow()[depth..].to_vec();
        for call in pending.iter().rev() {
            self.lower_expr(call, true)?;
        }
        Ok(())
    }

    /// Replays the defers an early exit jumps over. The count comes from
    /// the checker.
    pub(crate) fn replay_crossed_defers(&self, count: u32) -> DiagnosticResult<()> {
        let len = self.defer_stack.borrow().len();
        let count = count as usize;
        if count > len {
            return Err(Diagnostic::internal_boxed(format!(
                "exit crosses {count} defers but only {len} are pending"
            )));
        }
        self.replay_defers_from(len - count)
    }

    /// Opens an unreachable continuation block after a terminator. Later
    /// statements (live again only through a label) need somewhere to go
    /// without touching the finished block.
    pub(crate) fn open_dead_block(&self) -> DiagnosticResult<()> {
        let dead = self.append_block("dead")?;
        self.builder.position_at_end(dead);
        Ok(())
    }
}
