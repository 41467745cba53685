use anyhow::Result;

use inkwell::context::Context;

use farro_ir::{
    AllocVar, AssignStmt, AssignTarget, BinExpr, BinOp, BlockStmt, BreakStmt, CallExpr, DeferStmt,
    Expr, ExprKind, ExprStmt, ForNumStmt, FuncId, Function, GotoStmt, IfBranch, IfStmt, IndexExpr,
    InlineAsmExpr, LabelId, LabelStmt, Lit, LocalId, MemAttrs, ParamDecl, Program, RepeatStmt,
    ReturnStmt, SelectExpr, SetterTarget, Stmt, StoreExpr, TypeId, UnaryExpr, UnaryOp, WhileStmt,
};
use farroc::codegen::{CodeGen, TargetAbi};

fn lit_int(v: i64, ty: TypeId) -> Expr {
    Expr::new(ExprKind::Lit(Lit::Int(v)), ty)
}

fn lit_bool(v: bool, ty: TypeId) -> Expr {
    Expr::new(ExprKind::Lit(Lit::Bool(v)), ty)
}

fn local(id: u32, ty: TypeId) -> Expr {
    Expr::new_lvalue(ExprKind::Local(LocalId(id)), ty)
}

fn bin(op: BinOp, left: Expr, right: Expr, ty: TypeId) -> Expr {
    Expr::new(
        ExprKind::Bin(BinExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }),
        ty,
    )
}

fn call_fn(f: FuncId, fn_ty: TypeId, args: Vec<Expr>, ret_ty: TypeId) -> Expr {
    Expr::new(
        ExprKind::Call(CallExpr {
            callee: Box::new(Expr::new(ExprKind::FuncRef(f), fn_ty)),
            args,
            fn_ty,
        }),
        ret_ty,
    )
}

fn field(base: Expr, index: u32, ty: TypeId) -> Expr {
    Expr::new_lvalue(
        ExprKind::Field(farro_ir::FieldExpr {
            base: Box::new(base),
            field: index,
        }),
        ty,
    )
}

fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(ExprStmt { expr, span: 0..0 })
}

fn ret_stmt(value: Option<Expr>) -> Stmt {
    Stmt::Return(ReturnStmt { value, span: 0..0 })
}

fn block(stmts: Vec<Stmt>) -> BlockStmt {
    BlockStmt { stmts, span: 0..0 }
}

fn param(local: u32, name: &str, ty: TypeId) -> ParamDecl {
    ParamDecl {
        local: LocalId(local),
        name: name.into(),
        ty,
    }
}

fn define(
    program: &mut Program,
    name: &str,
    fn_ty: TypeId,
    params: Vec<ParamDecl>,
    body: Vec<Stmt>,
) -> FuncId {
    program.add_function(Function {
        name: name.into(),
        ty: fn_ty,
        params,
        body: Some(body),
        span: 0..0,
    })
}

fn declare(program: &mut Program, name: &str, fn_ty: TypeId) -> FuncId {
    program.add_function(Function {
        name: name.into(),
        ty: fn_ty,
        params: Vec::new(),
        body: None,
        span: 0..0,
    })
}

fn emit(program: &Program, ids: &[FuncId]) -> Result<String> {
    let context = Context::create();
    let cg = CodeGen::new(&context, program, "cg_test", TargetAbi::SysV64);
    for id in ids {
        cg.compile_function(*id)?;
    }
    Ok(cg.module.print_to_string().to_string())
}

#[test]
fn adds_two_integers() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![i64t, i64t], i64t, false);
    let body = vec![ret_stmt(Some(bin(
        BinOp::Add,
        local(0, i64t),
        local(1, i64t),
        i64t,
    )))];
    let add = define(
        &mut program,
        "add",
        fty,
        vec![param(0, "a", i64t), param(1, "b", i64t)],
        body,
    );

    let ir = emit(&program, &[add])?;
    assert!(
        ir.contains("define i64 @add(i64 %0, i64 %1)"),
        "unexpected signature: {}",
        ir
    );
    assert!(ir.contains("add i64"), "expected integer add: {}", ir);
    assert!(ir.contains("ret i64"), "expected integer return: {}", ir);
    Ok(())
}

#[test]
fn adds_two_doubles() -> Result<()> {
    let mut program = Program::new();
    let f64t = program.float(8);
    let fty = program.function_type(vec![f64t, f64t], f64t, false);
    let body = vec![ret_stmt(Some(bin(
        BinOp::Add,
        local(0, f64t),
        local(1, f64t),
        f64t,
    )))];
    let addf = define(
        &mut program,
        "addf",
        fty,
        vec![param(0, "a", f64t), param(1, "b", f64t)],
        body,
    );

    let ir = emit(&program, &[addf])?;
    assert!(
        ir.contains("define double @addf(double %0, double %1)"),
        "unexpected signature: {}",
        ir
    );
    assert!(ir.contains("fadd double"), "expected fadd: {}", ir);
    Ok(())
}

#[test]
fn logical_and_in_value_position_builds_a_phi() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let fty = program.function_type(vec![lt, lt], lt, false);
    let body = vec![ret_stmt(Some(bin(
        BinOp::And,
        local(0, lt),
        local(1, lt),
        lt,
    )))];
    let pick = define(
        &mut program,
        "pick",
        fty,
        vec![param(0, "a", lt), param(1, "b", lt)],
        body,
    );

    let ir = emit(&program, &[pick])?;
    // Logical parameters ride in as i32 and narrow at entry.
    assert!(
        ir.contains("define i8 @pick(i32 %0, i32 %1)"),
        "unexpected signature: {}",
        ir
    );
    assert!(ir.contains("arg.narrow"), "expected entry narrowing: {}", ir);
    assert!(ir.contains("and.then:"), "expected rhs block: {}", ir);
    assert!(ir.contains("and.else:"), "expected settled block: {}", ir);
    assert!(ir.contains("and.merge:"), "expected merge block: {}", ir);
    assert!(ir.contains("phi i1"), "expected a merge phi: {}", ir);
    assert!(ir.contains("and.value"), "expected the phi name: {}", ir);
    Ok(())
}

#[test]
fn branch_conditions_fuse_and_without_a_phi() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![lt, lt], i64t, false);
    let body = vec![
        Stmt::If(IfStmt {
            branches: vec![IfBranch {
                cond: bin(BinOp::And, local(0, lt), local(1, lt), lt),
                body: block(vec![ret_stmt(Some(lit_int(1, i64t)))]),
            }],
            alt: None,
            span: 0..0,
        }),
        ret_stmt(Some(lit_int(0, i64t))),
    ];
    let gate = define(
        &mut program,
        "gate",
        fty,
        vec![param(0, "a", lt), param(1, "b", lt)],
        body,
    );

    let ir = emit(&program, &[gate])?;
    assert!(ir.contains("and.rhs:"), "expected fused rhs block: {}", ir);
    assert!(ir.contains("if.then:"), "expected then block: {}", ir);
    assert!(ir.contains("if.merge:"), "expected merge block: {}", ir);
    assert!(
        !ir.contains("and.merge") && !ir.contains("phi"),
        "branch context must not materialize the boolean: {}",
        ir
    );
    Ok(())
}

#[test]
fn short_circuit_evaluates_the_right_side_once() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let effect_ty = program.function_type(vec![], lt, false);
    let effect = declare(&mut program, "effect", effect_ty);
    let fty = program.function_type(vec![lt], lt, false);
    let body = vec![ret_stmt(Some(bin(
        BinOp::And,
        local(0, lt),
        call_fn(effect, effect_ty, vec![], lt),
        lt,
    )))];
    let lazy = define(&mut program, "lazy", fty, vec![param(0, "a", lt)], body);

    let ir = emit(&program, &[lazy])?;
    assert_eq!(
        ir.matches("call i8 @effect").count(),
        1,
        "the right side must be emitted on one edge only: {}",
        ir
    );
    assert!(ir.contains("and.then:"), "expected rhs edge block: {}", ir);
    Ok(())
}

#[test]
fn defers_replay_newest_first_before_return() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let bump_ty = program.function_type(vec![i64t], unit, false);
    let bump = declare(&mut program, "bump", bump_ty);
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        Stmt::Defer(DeferStmt {
            call: call_fn(bump, bump_ty, vec![lit_int(1, i64t)], unit),
            span: 0..0,
        }),
        Stmt::Defer(DeferStmt {
            call: call_fn(bump, bump_ty, vec![lit_int(2, i64t)], unit),
            span: 0..0,
        }),
        Stmt::Defer(DeferStmt {
            call: call_fn(bump, bump_ty, vec![lit_int(3, i64t)], unit),
            span: 0..0,
        }),
    ];
    let waves = define(&mut program, "waves", fty, vec![], body);

    let ir = emit(&program, &[waves])?;
    let third = ir.find("call void @bump(i64 3)").expect("third defer");
    let second = ir.find("call void @bump(i64 2)").expect("second defer");
    let first = ir.find("call void @bump(i64 1)").expect("first defer");
    assert!(
        third < second && second < first,
        "defers must replay newest first: {}",
        ir
    );
    assert!(ir.contains("ret void"), "expected implicit return: {}", ir);
    Ok(())
}

#[test]
fn block_exit_replays_its_own_defers() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let bump_ty = program.function_type(vec![i64t], unit, false);
    let bump = declare(&mut program, "bump", bump_ty);
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        Stmt::Block(block(vec![Stmt::Defer(DeferStmt {
            call: call_fn(bump, bump_ty, vec![lit_int(1, i64t)], unit),
            span: 0..0,
        })])),
        expr_stmt(call_fn(bump, bump_ty, vec![lit_int(2, i64t)], unit)),
    ];
    let tidy = define(&mut program, "tidy", fty, vec![], body);

    let ir = emit(&program, &[tidy])?;
    let scoped = ir.find("call void @bump(i64 1)").expect("scoped defer");
    let after = ir.find("call void @bump(i64 2)").expect("later call");
    assert!(scoped < after, "the defer runs at block exit: {}", ir);
    assert_eq!(
        ir.matches("call void @bump(i64 1)").count(),
        1,
        "leaving the scope drops the entry: {}",
        ir
    );
    Ok(())
}

#[test]
fn numeric_for_tests_both_directions() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let fty = program.function_type(vec![], unit, false);
    let body = vec![Stmt::ForNum(ForNumStmt {
        var: LocalId(0),
        var_name: "i".into(),
        var_ty: i64t,
        initial: lit_int(1, i64t),
        limit: lit_int(10, i64t),
        step: lit_int(1, i64t),
        body: block(vec![]),
        span: 0..0,
    })];
    let count = define(&mut program, "count", fty, vec![], body);

    let ir = emit(&program, &[count])?;
    for bb in ["for.cond:", "for.body:", "for.incr:", "for.after:"] {
        assert!(ir.contains(bb), "expected {} in IR: {}", bb, ir);
    }
    assert!(ir.contains("icmp slt"), "expected ascending test: {}", ir);
    assert!(ir.contains("icmp sgt"), "expected descending test: {}", ir);
    assert!(ir.contains("for.take"), "expected combined test: {}", ir);
    Ok(())
}

#[test]
fn pointer_arithmetic_scales_by_the_element() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let cell = program.struct_type(
        Some("cell".into()),
        vec![("x".into(), i64t), ("y".into(), i64t)],
    );
    let pc = program.pointer_to(cell);
    let fty = program.function_type(vec![pc], pc, false);
    let body = vec![ret_stmt(Some(bin(
        BinOp::Add,
        local(0, pc),
        lit_int(3, i64t),
        pc,
    )))];
    let at = define(&mut program, "at", fty, vec![param(0, "p", pc)], body);

    let ir = emit(&program, &[at])?;
    assert!(
        ir.contains("getelementptr %cell"),
        "expected a typed gep: {}",
        ir
    );
    assert!(ir.contains("i64 3"), "expected the raw offset: {}", ir);
    assert!(ir.contains("ptr.off"), "expected the offset name: {}", ir);
    Ok(())
}

#[test]
fn casting_to_the_same_type_emits_nothing() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![i64t], i64t, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Cast(Box::new(local(0, i64t))),
        i64t,
    )))];
    let same = define(&mut program, "same", fty, vec![param(0, "x", i64t)], body);
    let ir = emit(&program, &[same])?;
    for op in ["sext", "zext", "trunc"] {
        assert!(!ir.contains(op), "identity cast must not {}: {}", op, ir);
    }

    let mut program = Program::new();
    let i8t = program.int(1, true);
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![i8t], i64t, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Cast(Box::new(local(0, i8t))),
        i64t,
    )))];
    let wide = define(&mut program, "wide", fty, vec![param(0, "x", i8t)], body);
    let ir = emit(&program, &[wide])?;
    assert!(ir.contains("sext"), "signed widening uses sext: {}", ir);
    Ok(())
}

#[test]
fn int_to_pointer_goes_through_the_address_word() -> Result<()> {
    let mut program = Program::new();
    let i32t = program.int(4, true);
    let i64t = program.int(8, true);
    let ptr = program.pointer_to(i64t);
    let fty = program.function_type(vec![i32t], ptr, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Cast(Box::new(local(0, i32t))),
        ptr,
    )))];
    let from_signed = define(
        &mut program,
        "from_signed",
        fty,
        vec![param(0, "a", i32t)],
        body,
    );
    let ir = emit(&program, &[from_signed])?;
    assert!(
        ir.contains("sext i32"),
        "signed addresses widen with sext: {}",
        ir
    );
    assert!(
        ir.contains("inttoptr i64"),
        "the conversion starts from the full word: {}",
        ir
    );

    let mut program = Program::new();
    let u32t = program.int(4, false);
    let i64t = program.int(8, true);
    let ptr = program.pointer_to(i64t);
    let fty = program.function_type(vec![u32t], ptr, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Cast(Box::new(local(0, u32t))),
        ptr,
    )))];
    let from_unsigned = define(
        &mut program,
        "from_unsigned",
        fty,
        vec![param(0, "a", u32t)],
        body,
    );
    let ir = emit(&program, &[from_unsigned])?;
    assert!(
        ir.contains("zext i32"),
        "unsigned addresses widen with zext: {}",
        ir
    );
    Ok(())
}

#[test]
fn pointer_casts_between_address_spaces() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let near = program.pointer_to(i64t);
    let far = program.pointer_in_space(i64t, 1);
    let fty = program.function_type(vec![near], far, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Cast(Box::new(local(0, near))),
        far,
    )))];
    let shift = define(&mut program, "shift", fty, vec![param(0, "p", near)], body);

    let ir = emit(&program, &[shift])?;
    assert!(
        ir.contains("addrspacecast ptr"),
        "crossing spaces must cast: {}",
        ir
    );
    assert!(
        ir.contains("ptr addrspace(1)"),
        "the target space must show in the type: {}",
        ir
    );
    Ok(())
}

#[test]
fn struct_parameters_unpack_into_words() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let pair = program.struct_type(
        Some("pair".into()),
        vec![("a".into(), i64t), ("b".into(), i64t)],
    );
    let fty = program.function_type(vec![pair], i64t, false);
    let body = vec![ret_stmt(Some(bin(
        BinOp::Add,
        field(local(0, pair), 0, i64t),
        field(local(0, pair), 1, i64t),
        i64t,
    )))];
    let sum = define(&mut program, "sum", fty, vec![param(0, "p", pair)], body);

    let ir = emit(&program, &[sum])?;
    assert!(
        ir.contains("define i64 @sum(i64 %0, i64 %1)"),
        "pair must flatten to two words: {}",
        ir
    );
    assert!(ir.contains("arg.word"), "expected entry repacking: {}", ir);
    Ok(())
}

#[test]
fn calls_flatten_register_aggregates() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let pair = program.struct_type(
        Some("pair".into()),
        vec![("a".into(), i64t), ("b".into(), i64t)],
    );
    let fty = program.function_type(vec![pair], i64t, false);
    let sum = define(
        &mut program,
        "sum",
        fty,
        vec![param(0, "p", pair)],
        vec![ret_stmt(Some(field(local(0, pair), 0, i64t)))],
    );
    let relay = define(
        &mut program,
        "relay",
        fty,
        vec![param(0, "p", pair)],
        vec![ret_stmt(Some(call_fn(
            sum,
            fty,
            vec![local(0, pair)],
            i64t,
        )))],
    );

    let ir = emit(&program, &[sum, relay])?;
    assert!(ir.contains("call.spill"), "expected argument spill: {}", ir);
    assert!(
        ir.contains("call i64 @sum(i64"),
        "expected a flattened call: {}",
        ir
    );
    Ok(())
}

#[test]
fn memory_aggregates_use_sret_and_byval() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let big = program.struct_type(
        Some("big".into()),
        vec![("x".into(), i64t), ("y".into(), i64t), ("z".into(), i64t)],
    );
    let eat_ty = program.function_type(vec![big], i64t, false);
    let eat = declare(&mut program, "eat", eat_ty);
    let produce_ty = program.function_type(vec![big], big, false);
    let produce = define(
        &mut program,
        "produce",
        produce_ty,
        vec![param(0, "b", big)],
        vec![ret_stmt(Some(local(0, big)))],
    );
    let wrap_ty = program.function_type(vec![big], i64t, false);
    let wrapper = define(
        &mut program,
        "wrapper",
        wrap_ty,
        vec![param(0, "b", big)],
        vec![ret_stmt(Some(call_fn(
            eat,
            eat_ty,
            vec![call_fn(produce, produce_ty, vec![local(0, big)], big)],
            i64t,
        )))],
    );

    let ir = emit(&program, &[produce, wrapper])?;
    assert!(ir.contains("sret(%big)"), "expected the sret marker: {}", ir);
    assert!(ir.contains("byval(%big)"), "expected the byval marker: {}", ir);
    assert!(ir.contains("call.sret"), "expected a hidden return slot: {}", ir);
    assert!(ir.contains("call.byval"), "expected byval scratch: {}", ir);
    // The sret path returns void and fills the hidden pointer.
    assert!(ir.contains("ret void"), "expected a void return: {}", ir);
    Ok(())
}

#[test]
fn break_leaves_through_the_loop_merge() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let unit = program.unit();
    let fty = program.function_type(vec![], unit, false);
    let body = vec![Stmt::While(WhileStmt {
        cond: lit_bool(true, lt),
        body: block(vec![Stmt::Break(BreakStmt {
            defers_crossed: 0,
            span: 0..0,
        })]),
        span: 0..0,
    })];
    let spin = define(&mut program, "spin", fty, vec![], body);

    let ir = emit(&program, &[spin])?;
    for bb in ["while.cond:", "while.body:", "while.after:", "dead:"] {
        assert!(ir.contains(bb), "expected {} in IR: {}", bb, ir);
    }
    Ok(())
}

#[test]
fn repeat_replays_defers_on_exit_and_back_edge() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let lt = program.logical();
    let unit = program.unit();
    let bump_ty = program.function_type(vec![i64t], unit, false);
    let bump = declare(&mut program, "bump", bump_ty);
    let fty = program.function_type(vec![lt], unit, false);
    let body = vec![Stmt::Repeat(RepeatStmt {
        body: vec![Stmt::Defer(DeferStmt {
            call: call_fn(bump, bump_ty, vec![lit_int(1, i64t)], unit),
            span: 0..0,
        })],
        until: local(0, lt),
        span: 0..0,
    })];
    let pump = define(&mut program, "pump", fty, vec![param(0, "done", lt)], body);

    let ir = emit(&program, &[pump])?;
    for bb in ["repeat.body:", "repeat.again:", "repeat.unwind:", "repeat.after:"] {
        assert!(ir.contains(bb), "expected {} in IR: {}", bb, ir);
    }
    assert_eq!(
        ir.matches("call void @bump(i64 1)").count(),
        2,
        "the defer replays on the back edge and on exit: {}",
        ir
    );
    Ok(())
}

#[test]
fn goto_replays_only_the_defers_it_crosses() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let bump_ty = program.function_type(vec![i64t], unit, false);
    let bump = declare(&mut program, "bump", bump_ty);
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        Stmt::Block(block(vec![
            Stmt::Defer(DeferStmt {
                call: call_fn(bump, bump_ty, vec![lit_int(7, i64t)], unit),
                span: 0..0,
            }),
            Stmt::Goto(GotoStmt {
                label: LabelId(0),
                defers_crossed: 1,
                span: 0..0,
            }),
        ])),
        Stmt::Label(LabelStmt {
            label: LabelId(0),
            name: "out".into(),
            span: 0..0,
        }),
        ret_stmt(None),
    ];
    let leap = define(&mut program, "leap", fty, vec![], body);

    let ir = emit(&program, &[leap])?;
    assert_eq!(
        ir.matches("call void @bump(i64 7)").count(),
        1,
        "the crossed defer replays exactly once: {}",
        ir
    );
    // A forward goto names the block before the label statement is seen.
    assert!(ir.contains("jump.target:"), "expected the label block: {}", ir);
    Ok(())
}

#[test]
fn backward_goto_reuses_the_label_block() -> Result<()> {
    let mut program = Program::new();
    let unit = program.unit();
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        Stmt::Label(LabelStmt {
            label: LabelId(0),
            name: "again".into(),
            span: 0..0,
        }),
        Stmt::Goto(GotoStmt {
            label: LabelId(0),
            defers_crossed: 0,
            span: 0..0,
        }),
    ];
    let busy = define(&mut program, "busy", fty, vec![], body);

    let ir = emit(&program, &[busy])?;
    assert!(ir.contains("again:"), "expected the named block: {}", ir);
    assert!(
        ir.contains("br label %again"),
        "expected the back edge: {}",
        ir
    );
    // The trailing dead block still needs a formal terminator.
    assert!(ir.contains("unreachable"), "expected unreachable: {}", ir);
    Ok(())
}

#[test]
fn assignments_evaluate_all_values_first() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let get_ty = program.function_type(vec![], i64t, false);
    let get1 = declare(&mut program, "get1", get_ty);
    let get2 = declare(&mut program, "get2", get_ty);
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        expr_stmt(Expr::new(
            ExprKind::AllocVar(AllocVar {
                local: LocalId(0),
                name: "x".into(),
            }),
            i64t,
        )),
        expr_stmt(Expr::new(
            ExprKind::AllocVar(AllocVar {
                local: LocalId(1),
                name: "y".into(),
            }),
            i64t,
        )),
        Stmt::Assign(AssignStmt {
            targets: vec![
                AssignTarget::Lvalue(local(0, i64t)),
                AssignTarget::Lvalue(local(1, i64t)),
            ],
            values: vec![
                call_fn(get1, get_ty, vec![], i64t),
                call_fn(get2, get_ty, vec![], i64t),
            ],
            span: 0..0,
        }),
    ];
    let shuffle = define(&mut program, "shuffle", fty, vec![], body);

    let ir = emit(&program, &[shuffle])?;
    let last_value = ir.find("call i64 @get2").expect("second value");
    let first_store = ir.find("store i64").expect("a store");
    assert!(
        last_value < first_store,
        "every value is computed before any store: {}",
        ir
    );
    Ok(())
}

#[test]
fn setter_targets_fill_the_slot_then_call() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let notify_ty = program.function_type(vec![], unit, false);
    let notify = declare(&mut program, "notify", notify_ty);
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        expr_stmt(Expr::new(
            ExprKind::AllocVar(AllocVar {
                local: LocalId(0),
                name: "x".into(),
            }),
            i64t,
        )),
        Stmt::Assign(AssignStmt {
            targets: vec![AssignTarget::Setter(SetterTarget {
                slot: local(0, i64t),
                call: call_fn(notify, notify_ty, vec![], unit),
            })],
            values: vec![lit_int(5, i64t)],
            span: 0..0,
        }),
    ];
    let put = define(&mut program, "put", fty, vec![], body);

    let ir = emit(&program, &[put])?;
    let store = ir.find("store i64 5").expect("the slot store");
    let side_effect = ir.find("call void @notify").expect("the setter call");
    assert!(store < side_effect, "store first, then the setter: {}", ir);
    Ok(())
}

#[test]
fn string_literals_intern_by_content() -> Result<()> {
    let mut program = Program::new();
    let i8t = program.int(1, true);
    let i64t = program.int(8, true);
    let unit = program.unit();
    let pi8 = program.pointer_to(i8t);
    let puts_ty = program.function_type(vec![pi8], i64t, false);
    let puts = declare(&mut program, "puts", puts_ty);
    let fty = program.function_type(vec![], unit, false);
    let hello = || Expr::new(ExprKind::Lit(Lit::Str("hi".into())), pi8);
    let body = vec![
        expr_stmt(call_fn(puts, puts_ty, vec![hello()], i64t)),
        expr_stmt(call_fn(puts, puts_ty, vec![hello()], i64t)),
    ];
    let greet = define(&mut program, "greet", fty, vec![], body);

    let ir = emit(&program, &[greet])?;
    assert!(ir.contains("str.intern."), "expected an interned name: {}", ir);
    assert_eq!(
        ir.matches("c\"hi\\00\"").count(),
        1,
        "one buffer serves both uses: {}",
        ir
    );
    Ok(())
}

#[test]
fn constant_images_decode_scalars_inline() -> Result<()> {
    let mut program = Program::new();
    let f64t = program.float(8);
    let i64t = program.int(8, true);
    let pair = program.struct_type(
        Some("pair".into()),
        vec![("a".into(), i64t), ("b".into(), i64t)],
    );
    let half_ty = program.function_type(vec![], f64t, false);
    let half = define(
        &mut program,
        "half",
        half_ty,
        vec![],
        vec![ret_stmt(Some(Expr::new(
            ExprKind::ConstBytes(1.5f64.to_le_bytes().to_vec()),
            f64t,
        )))],
    );
    let mut bytes = 1u64.to_le_bytes().to_vec();
    bytes.extend_from_slice(&2u64.to_le_bytes());
    let pairc_ty = program.function_type(vec![], pair, false);
    let pairc = define(
        &mut program,
        "pairc",
        pairc_ty,
        vec![],
        vec![ret_stmt(Some(Expr::new(ExprKind::ConstBytes(bytes), pair)))],
    );

    let ir = emit(&program, &[half, pairc])?;
    assert!(
        ir.contains("1.500000e+00"),
        "scalar image decodes to a literal: {}",
        ir
    );
    assert!(
        ir.contains("const.intern."),
        "aggregate image goes through a global: {}",
        ir
    );
    assert!(ir.contains("ret.words"), "expected the word return: {}", ir);
    Ok(())
}

#[test]
fn wide_integer_images_keep_their_high_bytes() -> Result<()> {
    let mut program = Program::new();
    let i128t = program.int(16, false);
    let fty = program.function_type(vec![], i128t, false);
    let mut bytes = vec![0u8; 8];
    bytes.extend_from_slice(&1u64.to_le_bytes());
    let wide = define(
        &mut program,
        "wide",
        fty,
        vec![],
        vec![ret_stmt(Some(Expr::new(
            ExprKind::ConstBytes(bytes),
            i128t,
        )))],
    );

    let ir = emit(&program, &[wide])?;
    assert!(
        ir.contains("ret i128 18446744073709551616"),
        "the second word is 2^64: {}",
        ir
    );
    Ok(())
}

#[test]
fn select_evaluates_both_arms() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![lt, i64t, i64t], i64t, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Select(SelectExpr {
            cond: Box::new(local(0, lt)),
            cons: Box::new(local(1, i64t)),
            alt: Box::new(local(2, i64t)),
        }),
        i64t,
    )))];
    let choose = define(
        &mut program,
        "choose",
        fty,
        vec![param(0, "c", lt), param(1, "a", i64t), param(2, "b", i64t)],
        body,
    );

    let ir = emit(&program, &[choose])?;
    assert!(ir.contains("select i1"), "expected a select: {}", ir);
    Ok(())
}

#[test]
fn select_picks_lanes_for_vector_conditions() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let f32t = program.float(4);
    let mask = program.vector_of(lt, 4);
    let v4 = program.vector_of(f32t, 4);
    let fty = program.function_type(vec![mask, v4, v4], v4, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Select(SelectExpr {
            cond: Box::new(local(0, mask)),
            cons: Box::new(local(1, v4)),
            alt: Box::new(local(2, v4)),
        }),
        v4,
    )))];
    let blend = define(
        &mut program,
        "blend",
        fty,
        vec![param(0, "c", mask), param(1, "a", v4), param(2, "b", v4)],
        body,
    );

    let ir = emit(&program, &[blend])?;
    assert!(
        ir.contains("icmp ne <4 x i8>"),
        "expected a lanewise truth test: {}",
        ir
    );
    assert!(
        ir.contains("select <4 x i1>"),
        "expected a per-lane select: {}",
        ir
    );
    Ok(())
}

#[test]
fn sizeof_folds_to_a_constant() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let big = program.struct_type(
        Some("big".into()),
        vec![("x".into(), i64t), ("y".into(), i64t), ("z".into(), i64t)],
    );
    let fty = program.function_type(vec![], i64t, false);
    let body = vec![ret_stmt(Some(Expr::new(ExprKind::SizeOf(big), i64t)))];
    let width = define(&mut program, "width", fty, vec![], body);

    let ir = emit(&program, &[width])?;
    assert!(ir.contains("ret i64 24"), "expected a folded size: {}", ir);
    Ok(())
}

#[test]
fn volatile_inline_asm_keeps_its_side_effect() -> Result<()> {
    let mut program = Program::new();
    let unit = program.unit();
    let fty = program.function_type(vec![], unit, false);
    let body = vec![expr_stmt(Expr::new(
        ExprKind::InlineAsm(InlineAsmExpr {
            asm: "nop".into(),
            constraints: "".into(),
            volatile: true,
            args: vec![],
        }),
        unit,
    ))];
    let pause = define(&mut program, "pause", fty, vec![], body);

    let ir = emit(&program, &[pause])?;
    assert!(
        ir.contains("asm sideeffect \"nop\""),
        "expected volatile asm: {}",
        ir
    );
    Ok(())
}

#[test]
fn vector_constructors_fill_lanes() -> Result<()> {
    let mut program = Program::new();
    let f32t = program.float(4);
    let i32t = program.int(4, true);
    let v4 = program.vector_of(f32t, 4);
    let fty = program.function_type(vec![f32t], f32t, false);
    let ctor = Expr::new(
        ExprKind::Ctor(farro_ir::CtorExpr {
            elems: vec![
                local(0, f32t),
                local(0, f32t),
                local(0, f32t),
                local(0, f32t),
            ],
        }),
        v4,
    );
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Index(IndexExpr {
            base: Box::new(ctor),
            index: Box::new(lit_int(2, i32t)),
        }),
        f32t,
    )))];
    let dup = define(&mut program, "dup", fty, vec![param(0, "a", f32t)], body);

    let ir = emit(&program, &[dup])?;
    assert!(
        ir.contains("insertelement <4 x float>"),
        "expected lane inserts: {}",
        ir
    );
    assert!(
        ir.contains("extractelement <4 x float>"),
        "expected the lane read: {}",
        ir
    );
    Ok(())
}

#[test]
fn logical_not_inverts_vector_lanes() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let mask = program.vector_of(lt, 4);
    let fty = program.function_type(vec![mask], mask, false);
    let body = vec![ret_stmt(Some(Expr::new(
        ExprKind::Unary(UnaryExpr {
            op: UnaryOp::Not,
            arg: Box::new(local(0, mask)),
        }),
        mask,
    )))];
    let invert = define(&mut program, "invert", fty, vec![param(0, "m", mask)], body);

    let ir = emit(&program, &[invert])?;
    assert!(
        ir.contains("icmp eq <4 x i8>"),
        "expected a lanewise zero test: {}",
        ir
    );
    assert!(
        ir.contains("zext <4 x i1>"),
        "expected the lanes widened back: {}",
        ir
    );
    assert!(!ir.contains("xor"), "complement must not be used: {}", ir);
    Ok(())
}

#[test]
fn falling_off_the_end_returns_zero() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let blank_ty = program.function_type(vec![], i64t, false);
    let blank = define(&mut program, "blank", blank_ty, vec![], vec![]);
    let quiet_ty = program.function_type(vec![], unit, false);
    let quiet = define(&mut program, "quiet", quiet_ty, vec![], vec![]);

    let ir = emit(&program, &[blank, quiet])?;
    assert!(ir.contains("ret i64 0"), "expected a zero return: {}", ir);
    assert!(ir.contains("ret void"), "expected a void return: {}", ir);
    Ok(())
}

#[test]
fn extern_functions_declare_once() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let bump_ty = program.function_type(vec![i64t], unit, false);
    let bump = declare(&mut program, "bump", bump_ty);
    let fty = program.function_type(vec![], unit, false);
    let body = vec![
        expr_stmt(call_fn(bump, bump_ty, vec![lit_int(1, i64t)], unit)),
        expr_stmt(call_fn(bump, bump_ty, vec![lit_int(2, i64t)], unit)),
    ];
    let knock = define(&mut program, "knock", fty, vec![], body);

    let ir = emit(&program, &[knock, bump])?;
    assert_eq!(
        ir.matches("declare void @bump").count(),
        1,
        "one declaration serves every use: {}",
        ir
    );
    Ok(())
}

#[test]
fn recompiling_a_function_reuses_the_first_body() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![i64t], i64t, false);
    let body = vec![ret_stmt(Some(local(0, i64t)))];
    let echo = define(&mut program, "echo", fty, vec![param(0, "x", i64t)], body);

    let ir = emit(&program, &[echo, echo])?;
    assert_eq!(
        ir.matches("define").count(),
        1,
        "one definition serves every request: {}",
        ir
    );
    assert_eq!(
        ir.matches("entry").count(),
        1,
        "the body keeps a single entry block: {}",
        ir
    );
    Ok(())
}

#[test]
fn globals_materialize_with_their_alignment() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let counter = program.add_global(farro_ir::Global {
        name: "counter".into(),
        ty: i64t,
        init: None,
        constant: false,
        span: 0..0,
    });
    let fty = program.function_type(vec![], i64t, false);
    let body = vec![ret_stmt(Some(Expr::new_lvalue(
        ExprKind::Global(counter),
        i64t,
    )))];
    let read = define(&mut program, "read", fty, vec![], body);

    let ir = emit(&program, &[read])?;
    assert!(
        ir.contains("@counter = global i64 0"),
        "expected zero initialization: {}",
        ir
    );
    assert!(ir.contains("align 8"), "expected the alignment: {}", ir);
    assert!(ir.contains("load i64, ptr @counter"), "expected the read: {}", ir);
    Ok(())
}

#[test]
fn volatile_stores_stay_volatile() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let pi64 = program.pointer_to(i64t);
    let fty = program.function_type(vec![pi64], unit, false);
    let body = vec![expr_stmt(Expr::new(
        ExprKind::Store(StoreExpr {
            addr: Box::new(local(0, pi64)),
            value: Box::new(lit_int(7, i64t)),
            attrs: MemAttrs {
                volatile: true,
                ..Default::default()
            },
        }),
        unit,
    ))];
    let poke = define(&mut program, "poke", fty, vec![param(0, "p", pi64)], body);

    let ir = emit(&program, &[poke])?;
    assert!(
        ir.contains("store volatile i64 7"),
        "expected a volatile store: {}",
        ir
    );
    Ok(())
}

#[test]
fn assigning_through_a_dereference_stores_to_the_pointee() -> Result<()> {
    let mut program = Program::new();
    let i64t = program.int(8, true);
    let unit = program.unit();
    let pi64 = program.pointer_to(i64t);
    let fty = program.function_type(vec![pi64], unit, false);
    let deref = Expr::new_lvalue(
        ExprKind::Unary(UnaryExpr {
            op: UnaryOp::Deref,
            arg: Box::new(local(0, pi64)),
        }),
        i64t,
    );
    let body = vec![Stmt::Assign(AssignStmt {
        targets: vec![AssignTarget::Lvalue(deref)],
        values: vec![lit_int(7, i64t)],
        span: 0..0,
    })];
    let poke = define(&mut program, "poke", fty, vec![param(0, "p", pi64)], body);

    let ir = emit(&program, &[poke])?;
    assert!(ir.contains("store i64 7,"), "expected the store: {}", ir);
    Ok(())
}

#[test]
fn if_chains_share_one_merge_block() -> Result<()> {
    let mut program = Program::new();
    let lt = program.logical();
    let i64t = program.int(8, true);
    let fty = program.function_type(vec![lt, lt], i64t, false);
    let body = vec![Stmt::If(IfStmt {
        branches: vec![
            IfBranch {
                cond: local(0, lt),
                body: block(vec![ret_stmt(Some(lit_int(1, i64t)))]),
            },
            IfBranch {
                cond: local(1, lt),
                body: block(vec![ret_stmt(Some(lit_int(2, i64t)))]),
            },
        ],
        alt: Some(block(vec![ret_stmt(Some(lit_int(3, i64t)))])),
        span: 0..0,
    })];
    let route = define(
        &mut program,
        "route",
        fty,
        vec![param(0, "a", lt), param(1, "b", lt)],
        body,
    );

    let ir = emit(&program, &[route])?;
    for bb in ["if.then:", "if.elseif:", "if.else:", "if.merge:"] {
        assert!(ir.contains(bb), "expected {} in IR: {}", bb, ir);
    }
    // Every arm returns, so the merge block is never entered.
    assert!(ir.contains("unreachable"), "expected unreachable: {}", ir);
    Ok(())
}
