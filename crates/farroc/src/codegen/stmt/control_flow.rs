//! Control flow lowering
//!
//! Conditions run through `lower_branch_on`, which fuses scalar `and`,
//! `or` and `not` directly into the control flow instead of materializing
//! a boolean first. Every construct's arms share a single merge block.
//! Loops record their merge block as the break target; early exits replay
//! the deferred calls they cross before branching away.

use inkwell::basic_block::BasicBlock;
use inkwell::values::{BasicValueEnum, IntValue};
use inkwell::{FloatPredicate, IntPredicate};

use farro_ir::{
    BinOp, BreakStmt, Expr, ExprKind, ForNumStmt, GotoStmt, IfStmt, LabelId, LabelStmt, PrimKind,
    RepeatStmt, ReturnStmt, TypeDef, UnaryOp, WhileStmt,
};

use crate::diagnostics::{Diagnostic, DiagnosticResult, Severity};

use super::super::{berr, CodeGen, LocalSlot, LoopContext};

impl<'a> CodeGen<'a> {
    /// Emits the conditional branch for `cond`. Scalar `and`/`or` become
    /// control flow (the right operand only evaluates on the fall-through
    /// edge) and logical `not` swaps the targets; anything else is
    /// evaluated and tested against zero.
    pub(crate) fn lower_branch_on(
        &self,
        cond: &'a Expr,
        on_true: BasicBlock<'a>,
        on_false: BasicBlock<'a>,
    ) -> DiagnosticResult<()> {
        match &cond.kind {
            ExprKind::Bin(bin)
                if matches!(bin.op, BinOp::And | BinOp::Or)
                    && !matches!(self.program.type_def(bin.left.ty), TypeDef::Vector { .. }) =>
            {
                let rhs_bb = match bin.op {
                    BinOp::And => self.append_block("and.rhs")?,
                    _ => self.append_block("or.rhs")?,
                };
                if bin.op == BinOp::And {
                    self.lower_branch_on(&bin.left, rhs_bb, on_false)?;
                } else {
                    self.lower_branch_on(&bin.left, on_true, rhs_bb)?;
                }
                self.builder.position_at_end(rhs_bb);
                self.lower_branch_on(&bin.right, on_true, on_false)
            }
            ExprKind::Unary(unary)
                if unary.op == UnaryOp::Not
                    && matches!(
                        self.program.type_def(unary.arg.ty),
                        TypeDef::Primitive { kind: PrimKind::Logical, .. }
                    ) =>
            {
                self.lower_branch_on(&unary.arg, on_false, on_true)
            }
            _ => {
                let value = self.lower_expr(cond, true)?;
                let bit = self.truthy(value)?;
                self.builder
                    .build_conditional_branch(bit, on_true, on_false)
                    .map_err(berr("conditional branch"))?;
                Ok(())
            }
        }
    }

    /// If/elseif chain. All arms branch to one merge block; the chain is a
    /// sequence of tests, not nested ifs. Returns true only when every arm
    /// terminates and an else arm exists, so no fall-through path reaches
    /// the merge.
    pub(crate) fn lower_if_stmt(&self, ifstmt: &'a IfStmt) -> DiagnosticResult<bool> {
        if ifstmt.branches.is_empty() {
            return match &ifstmt.alt {
                Some(alt) => self.lower_block_stmt(alt),
                None => Ok(false),
            };
        }

        // Arm-end blocks; their branches to the merge are emitted once the
        // merge exists, keeping textual block order close to source order.
        let mut fallthrough: Vec<BasicBlock<'a>> = Vec::new();
        let mut all_exit = true;
        let mut merge: Option<BasicBlock<'a>> = None;
        for (i, arm) in ifstmt.branches.iter().enumerate() {
            let then_bb = self.append_block("if.then")?;
            let last = i + 1 == ifstmt.branches.len();
            let false_bb = if !last {
                self.append_block("if.elseif")?
            } else if ifstmt.alt.is_some() {
                self.append_block("if.else")?
            } else {
                let bb = self.append_block("if.merge")?;
                merge = Some(bb);
                bb
            };
            self.lower_branch_on(&arm.cond, then_bb, false_bb)?;
            self.builder.position_at_end(then_bb);
            if !self.lower_block_stmt(&arm.body)? {
                all_exit = false;
            }
            fallthrough.push(self.cur_block()?);
            if merge.is_none() {
                self.builder.position_at_end(false_bb);
            }
        }
        if let Some(alt) = &ifstmt.alt {
            if !self.lower_block_stmt(alt)? {
                all_exit = false;
            }
            fallthrough.push(self.cur_block()?);
        } else {
            all_exit = false;
        }
        let merge_bb = match merge {
            Some(bb) => bb,
            None => self.append_block("if.merge")?,
        };
        for bb in fallthrough {
            self.builder.position_at_end(bb);
            self.builder
                .build_unconditional_branch(merge_bb)
                .map_err(berr("merge branch"))?;
        }
        self.builder.position_at_end(merge_bb);
        Ok(all_exit)
    }

    pub(crate) fn lower_while_stmt(&self, whilestmt: &'a WhileStmt) -> DiagnosticResult<bool> {
        let cond_bb = self.append_block("while.cond")?;
        let body_bb = self.append_block("while.body")?;
        let after_bb = self.append_block("while.after")?;
        self.loop_stack.borrow_mut().push(LoopContext { break_block: after_bb });

        self.builder
            .build_unconditional_branch(cond_bb)
            .map_err(berr("loop entry"))?;
        self.builder.position_at_end(cond_bb);
        self.lower_branch_on(&whilestmt.cond, body_bb, after_bb)?;

        self.builder.position_at_end(body_bb);
        self.lower_block_stmt(&whilestmt.body)?;
        self.builder
            .build_unconditional_branch(cond_bb)
            .map_err(berr("loop back-edge"))?;

        self.loop_stack.borrow_mut().pop();
        self.builder.position_at_end(after_bb);
        Ok(false)
    }

    /// Numeric for. Initial, limit, and step evaluate exactly once; the
    /// direction test re-runs each iteration and the step applies on the
    /// back-edge.
    pub(crate) fn lower_for_num_stmt(&self, forstmt: &'a ForNumStmt) -> DiagnosticResult<bool> {
        let mt = self.resolve(forstmt.var_ty)?;
        let initial = self.lower_expr(&forstmt.initial, true)?;
        let limit = self.lower_expr(&forstmt.limit, true)?;
        let step = self.lower_expr(&forstmt.step, true)?;
        let slot = self.entry_alloca(&forstmt.var_name, mt.llvm)?;
        self.locals
            .borrow_mut()
            .insert(forstmt.var, LocalSlot { ptr: slot, ty: forstmt.var_ty });
        self.builder
            .build_store(slot, initial)
            .map_err(berr("loop variable store"))?;

        let cond_bb = self.append_block("for.cond")?;
        let body_bb = self.append_block("for.body")?;
        let incr_bb = self.append_block("for.incr")?;
        let after_bb = self.append_block("for.after")?;
        self.loop_stack.borrow_mut().push(LoopContext { break_block: after_bb });

        self.builder
            .build_unconditional_branch(cond_bb)
            .map_err(berr("loop entry"))?;
        self.builder.position_at_end(cond_bb);
        let value = self
            .builder
            .build_load(mt.llvm, slot, "for.v")
            .map_err(berr("loop variable load"))?;
        let take = self.for_num_condition(value, limit, step, mt.signed)?;
        self.builder
            .build_conditional_branch(take, body_bb, after_bb)
            .map_err(berr("loop test branch"))?;

        self.builder.position_at_end(body_bb);
        self.lower_block_stmt(&forstmt.body)?;
        self.builder
            .build_unconditional_branch(incr_bb)
            .map_err(berr("loop back-edge"))?;

        self.builder.position_at_end(incr_bb);
        let value = self
            .builder
            .build_load(mt.llvm, slot, "for.v")
            .map_err(berr("loop variable load"))?;
        let next: BasicValueEnum<'a> = match (value, step) {
            (BasicValueEnum::IntValue(v), BasicValueEnum::IntValue(s)) => self
                .builder
                .build_int_add(v, s, "for.next")
                .map_err(berr("loop increment"))?
                .into(),
            (BasicValueEnum::FloatValue(v), BasicValueEnum::FloatValue(s)) => self
                .builder
                .build_float_add(v, s, "for.next")
                .map_err(berr("loop increment"))?
                .into(),
            _ => return Err(Diagnostic::internal_boxed("numeric for over a non-numeric type")),
        };
        self.builder
            .build_store(slot, next)
            .map_err(berr("loop variable store"))?;
        self.builder
            .build_unconditional_branch(cond_bb)
            .map_err(berr("loop back-edge"))?;

        self.loop_stack.borrow_mut().pop();
        self.builder.position_at_end(after_bb);
        Ok(false)
    }

    /// `(v < limit and step > 0) or (v > limit and step <= 0)`: one test
    /// covers ascending and descending ranges. A loop whose variable
    /// already equals the limit never enters the body.
    fn for_num_condition(
        &self,
        value: BasicValueEnum<'a>,
        limit: BasicValueEnum<'a>,
        step: BasicValueEnum<'a>,
        signed: bool,
    ) -> DiagnosticResult<IntValue<'a>> {
        let (below, above, step_pos, step_nonpos) = match (value, limit, step) {
            (
                BasicValueEnum::IntValue(v),
                BasicValueEnum::IntValue(l),
                BasicValueEnum::IntValue(s),
            ) => {
                let zero = s.get_type().const_zero();
                let (lt, gt, le) = if signed {
                    (IntPredicate::SLT, IntPredicate::SGT, IntPredicate::SLE)
                } else {
                    (IntPredicate::ULT, IntPredicate::UGT, IntPredicate::ULE)
                };
                (
                    self.builder
                        .build_int_compare(lt, v, l, "for.below")
                        .map_err(berr("comparison"))?,
                    self.builder
                        .build_int_compare(gt, v, l, "for.above")
                        .map_err(berr("comparison"))?,
                    self.builder
                        .build_int_compare(gt, s, zero, "for.up")
                        .map_err(berr("comparison"))?,
                    self.builder
                        .build_int_compare(le, s, zero, "for.down")
                        .map_err(berr("comparison"))?,
                )
            }
            (
                BasicValueEnum::FloatValue(v),
                BasicValueEnum::FloatValue(l),
                BasicValueEnum::FloatValue(s),
            ) => {
                let zero = s.get_type().const_zero();
                (
                    self.builder
                        .build_float_compare(FloatPredicate::OLT, v, l, "for.below")
                        .map_err(berr("comparison"))?,
                    self.builder
                        .build_float_compare(FloatPredicate::OGT, v, l, "for.above")
                        .map_err(berr("comparison"))?,
                    self.builder
                        .build_float_compare(FloatPredicate::OGT, s, zero, "for.up")
                        .map_err(berr("comparison"))?,
                    self.builder
                        .build_float_compare(FloatPredicate::OLE, s, zero, "for.down")
                        .map_err(berr("comparison"))?,
                )
            }
            _ => return Err(Diagnostic::internal_boxed("numeric for over a non-numeric type")),
        };
        let ascending = self
            .builder
            .build_and(below, step_pos, "for.asc")
            .map_err(berr("loop test"))?;
        let descending = self
            .builder
            .build_and(above, step_nonpos, "for.desc")
            .map_err(berr("loop test"))?;
        self.builder
            .build_or(ascending, descending, "for.take")
            .map_err(berr("loop test"))
    }

    /// Repeat/until. The condition evaluates inside the body's scope,
    /// before any of the body's defers run; both the exit path and the
    /// back-edge then replay the pending defers, the back-edge through a
    /// synthetic block since the body re-enters from the top.
    pub(crate) fn lower_repeat_stmt(&self, repeatstmt: &'a RepeatStmt) -> DiagnosticResult<bool> {
        let body_bb = self.append_block("repeat.body")?;
        let after_bb = self.append_block("repeat.after")?;
        self.loop_stack.borrow_mut().push(LoopContext { break_block: after_bb });
        let depth = self.defer_stack.borrow().len();

        self.builder
            .build_unconditional_branch(body_bb)
            .map_err(berr("loop entry"))?;
        self.builder.position_at_end(body_bb);
        self.lower_stmts(&repeatstmt.body)?;

        if self.defer_stack.borrow().len() > depth {
            let unwind_bb = self.append_block("repeat.unwind")?;
            let again_bb = self.append_block("repeat.again")?;
            self.lower_branch_on(&repeatstmt.until, unwind_bb, again_bb)?;
            self.builder.position_at_end(again_bb);
            self.replay_defers_from(depth)?;
            self.builder
                .build_unconditional_branch(body_bb)
                .map_err(berr("loop back-edge"))?;
            self.builder.position_at_end(unwind_bb);
            self.replay_defers_from(depth)?;
            self.builder
                .build_unconditional_branch(after_bb)
                .map_err(berr("loop exit"))?;
        } else {
            self.lower_branch_on(&repeatstmt.until, after_bb, body_bb)?;
        }

        self.defer_stack.borrow_mut().truncate(depth);
        self.loop_stack.borrow_mut().pop();
        self.builder.position_at_end(after_bb);
        Ok(false)
    }

    /// Return. The operand sees pre-cleanup state, so it evaluates before
    /// the entire pending defer stack replays.
    pub(crate) fn lower_return_stmt(&self, ret: &'a ReturnStmt) -> DiagnosticResult<bool> {
        let value = match &ret.value {
            Some(expr) => Some(self.lower_expr(expr, true)?),
            None => None,
        };
        self.replay_defers_from(0)?;
        let fc = self
            .current_classification
            .borrow()
            .clone()
            .ok_or_else(|| Diagnostic::internal_boxed("return outside of a function"))?;
        self.emit_return(&fc, value)?;
        self.open_dead_block()?;
        Ok(true)
    }

    pub(crate) fn lower_goto_stmt(&self, goto: &'a GotoStmt) -> DiagnosticResult<bool> {
        self.replay_crossed_defers(goto.defers_crossed)?;
        let target = self.label_block(goto.label, None)?;
        self.builder
            .build_unconditional_branch(target)
            .map_err(berr("goto"))?;
        self.open_dead_block()?;
        Ok(true)
    }

    pub(crate) fn lower_break_stmt(&self, brk: &'a BreakStmt) -> DiagnosticResult<bool> {
        let Some(ctx) = self.loop_stack.borrow().last().copied() else {
            return Err(Diagnostic::simple_with_span_boxed(
                Severity::Error,
                "break outside of a loop",
                brk.span.clone(),
            ));
        };
        self.replay_crossed_defers(brk.defers_crossed)?;
        self.builder
            .build_unconditional_branch(ctx.break_block)
            .map_err(berr("break"))?;
        self.open_dead_block()?;
        Ok(true)
    }

    /// Label definition: fall through into the label's block and continue
    /// emitting there.
    pub(crate) fn lower_label_stmt(&self, label: &'a LabelStmt) -> DiagnosticResult<bool> {
        let bb = self.label_block(label.label, Some(&label.name))?;
        self.builder
            .build_unconditional_branch(bb)
            .map_err(berr("label fall-through"))?;
        self.builder.position_at_end(bb);
        Ok(false)
    }

    /// The block for a label, created the first time the label or a goto
    /// naming it appears.
    fn label_block(&self, label: LabelId, name: Option<&str>) -> DiagnosticResult<BasicBlock<'a>> {
        if let Some(bb) = self.labels.borrow().get(&label) {
            return Ok(*bb);
        }
        let bb = self.append_block(name.unwrap_or("jump.target"))?;
        self.labels.borrow_mut().insert(label, bb);
        Ok(bb)
    }
}
