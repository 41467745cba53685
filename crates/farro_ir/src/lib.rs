//! Farro typed IR definitions
//!
//! This crate defines the typed intermediate representation that the
//! compiler core consumes. It is the contract between the (out-of-tree)
//! front end and the code generator: every expression node arrives with its
//! type and lvalue-ness already determined, and early-exit statements carry
//! the defer-crossing counts computed by the checker. Nothing in this crate
//! depends on the backend.

use std::ops::Range;

/// Represents a source code span as a byte range.
pub type Span = Range<usize>;

/// Handle to a type descriptor inside a [`Program`]'s type arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

/// Handle to a local variable slot, unique within one function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

/// Handle to a module-level global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// Handle to a function (defined or extern) in a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Handle to a goto label, unique within one function body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// Primitive type kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimKind {
    Integer,
    Float,
    /// Boolean-like: smallest addressable unit, boolean semantics for
    /// comparisons and casts.
    Logical,
}

/// A struct or union field.
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    /// Storage group. Consecutive fields sharing an allocation index with
    /// `in_union` set overlap in memory (anonymous-union groups).
    pub allocation: u32,
    pub in_union: bool,
}

/// Type descriptors. Immutable once constructed.
#[derive(Debug, Clone)]
pub enum TypeDef {
    /// Scalar type; `width` is in bytes.
    Primitive {
        kind: PrimKind,
        width: u32,
        signed: bool,
    },
    Pointer {
        pointee: TypeId,
        address_space: u32,
    },
    Array {
        element: TypeId,
        len: u64,
    },
    Vector {
        element: TypeId,
        lanes: u32,
    },
    /// `defined` is false between [`Program::declare_struct`] and
    /// [`Program::define_fields`]; an undefined aggregate is legal to
    /// point at but has no layout.
    Struct {
        name: Option<String>,
        fields: Vec<Field>,
        defined: bool,
    },
    /// All fields overlap at offset zero.
    Union {
        name: Option<String>,
        fields: Vec<Field>,
        defined: bool,
    },
    Function {
        params: Vec<TypeId>,
        ret: TypeId,
        is_vararg: bool,
    },
    /// The zero-sized unit type.
    Unit,
    /// Externally defined aggregate; legal to point at, never usable by value.
    Opaque {
        name: String,
    },
}

/// Literal values.
#[derive(Debug, Clone)]
pub enum Lit {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Address-of. Yields the operand's address.
    AddrOf,
    /// Pointer dereference. Yields an lvalue for the pointee.
    Deref,
    Not,
    Neg,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And, // short-circuit on scalar logicals
    Or,  // short-circuit on scalar logicals
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Attributes carried by an explicit load or store.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemAttrs {
    pub align: Option<u32>,
    pub volatile: bool,
    pub nontemporal: bool,
}

/// A typed expression node.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    /// True when this node denotes an address; a load is required to
    /// obtain the value.
    pub lvalue: bool,
    pub span: Span,
}

impl Expr {
    /// A non-lvalue node with an empty span.
    pub fn new(kind: ExprKind, ty: TypeId) -> Self {
        Expr {
            kind,
            ty,
            lvalue: false,
            span: 0..0,
        }
    }

    /// An lvalue node with an empty span.
    pub fn new_lvalue(kind: ExprKind, ty: TypeId) -> Self {
        Expr {
            kind,
            ty,
            lvalue: true,
            span: 0..0,
        }
    }
}

/// Expression kinds.
#[derive(Debug, Clone)]
pub enum ExprKind {
    Lit(Lit),
    /// Raw little-endian byte image of a constant, decoded per the node's
    /// type (scalars directly, aggregates via a read-only global).
    ConstBytes(Vec<u8>),
    Local(LocalId),
    Global(GlobalId),
    FuncRef(FuncId),
    AllocVar(AllocVar),
    Unary(UnaryExpr),
    Bin(BinExpr),
    /// Conversion to the node's own type.
    Cast(Box<Expr>),
    Index(IndexExpr),
    Field(FieldExpr),
    Call(CallExpr),
    Select(SelectExpr),
    Ctor(CtorExpr),
    Load(LoadExpr),
    Store(StoreExpr),
    InlineAsm(InlineAsmExpr),
    SizeOf(TypeId),
}

/// Local variable declaration; evaluates to the new slot's address.
#[derive(Debug, Clone)]
pub struct AllocVar {
    pub local: LocalId,
    pub name: String,
}

/// Unary expression.
#[derive(Debug, Clone)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub arg: Box<Expr>,
}

/// Binary expression.
#[derive(Debug, Clone)]
pub struct BinExpr {
    pub op: BinOp,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

/// Indexing into a pointer, array, or vector base.
#[derive(Debug, Clone)]
pub struct IndexExpr {
    pub base: Box<Expr>,
    pub index: Box<Expr>,
}

/// Field selection by declaration index.
#[derive(Debug, Clone)]
pub struct FieldExpr {
    pub base: Box<Expr>,
    pub field: u32,
}

/// Call through a function value.
#[derive(Debug, Clone)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    /// The callee's function type descriptor.
    pub fn_ty: TypeId,
}

/// Eager ternary.
#[derive(Debug, Clone)]
pub struct SelectExpr {
    pub cond: Box<Expr>,
    pub cons: Box<Expr>,
    pub alt: Box<Expr>,
}

/// Struct, array, or vector constructor.
#[derive(Debug, Clone)]
pub struct CtorExpr {
    pub elems: Vec<Expr>,
}

/// Explicit load with attributes.
#[derive(Debug, Clone)]
pub struct LoadExpr {
    pub addr: Box<Expr>,
    pub attrs: MemAttrs,
}

/// Explicit store with attributes.
#[derive(Debug, Clone)]
pub struct StoreExpr {
    pub addr: Box<Expr>,
    pub value: Box<Expr>,
    pub attrs: MemAttrs,
}

/// Inline assembly. Void-typed when the node's type is unit.
#[derive(Debug, Clone)]
pub struct InlineAsmExpr {
    pub asm: String,
    pub constraints: String,
    pub volatile: bool,
    pub args: Vec<Expr>,
}

/// Statements.
#[derive(Debug, Clone)]
pub enum Stmt {
    Block(BlockStmt),
    If(IfStmt),
    While(WhileStmt),
    ForNum(ForNumStmt),
    Repeat(RepeatStmt),
    Return(ReturnStmt),
    Goto(GotoStmt),
    Break(BreakStmt),
    Label(LabelStmt),
    Assign(AssignStmt),
    Defer(DeferStmt),
    Expr(ExprStmt),
}

/// Braced scope.
#[derive(Debug, Clone)]
pub struct BlockStmt {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

/// If/elseif chain with one shared merge point.
#[derive(Debug, Clone)]
pub struct IfStmt {
    pub branches: Vec<IfBranch>,
    pub alt: Option<BlockStmt>,
    pub span: Span,
}

/// One arm of an if chain.
#[derive(Debug, Clone)]
pub struct IfBranch {
    pub cond: Expr,
    pub body: BlockStmt,
}

/// While loop.
#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub cond: Expr,
    pub body: BlockStmt,
    pub span: Span,
}

/// Numeric for loop. Initial, limit, and step share the variable's type
/// and are evaluated once, before the first iteration.
#[derive(Debug, Clone)]
pub struct ForNumStmt {
    pub var: LocalId,
    pub var_name: String,
    pub var_ty: TypeId,
    pub initial: Expr,
    pub limit: Expr,
    pub step: Expr,
    pub body: BlockStmt,
    pub span: Span,
}

/// Repeat-until loop. The condition is evaluated inside the body's scope.
#[derive(Debug, Clone)]
pub struct RepeatStmt {
    pub body: Vec<Stmt>,
    pub until: Expr,
    pub span: Span,
}

/// Return statement.
#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

/// Goto. `defers_crossed` counts the pending defers being jumped over,
/// computed by the checker.
#[derive(Debug, Clone)]
pub struct GotoStmt {
    pub label: LabelId,
    pub defers_crossed: u32,
    pub span: Span,
}

/// Break out of the innermost loop.
#[derive(Debug, Clone)]
pub struct BreakStmt {
    pub defers_crossed: u32,
    pub span: Span,
}

/// Goto label definition.
#[derive(Debug, Clone)]
pub struct LabelStmt {
    pub label: LabelId,
    pub name: String,
    pub span: Span,
}

/// Multi-assignment. All values are evaluated before any target address.
#[derive(Debug, Clone)]
pub struct AssignStmt {
    pub targets: Vec<AssignTarget>,
    pub values: Vec<Expr>,
    pub span: Span,
}

/// Assignment target.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Lvalue(Expr),
    Setter(SetterTarget),
}

/// Computed-property target: the value is stored into `slot`, then `call`
/// runs for its side effect.
#[derive(Debug, Clone)]
pub struct SetterTarget {
    pub slot: Expr,
    pub call: Expr,
}

/// Deferred call, replayed on every exit path of the enclosing scope.
#[derive(Debug, Clone)]
pub struct DeferStmt {
    pub call: Expr,
    pub span: Span,
}

/// Bare expression statement; the value is discarded.
#[derive(Debug, Clone)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

/// Formal parameter binding.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub local: LocalId,
    pub name: String,
    pub ty: TypeId,
}

/// A function definition, or an extern declaration when `body` is absent.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// Function type descriptor.
    pub ty: TypeId,
    pub params: Vec<ParamDecl>,
    pub body: Option<Vec<Stmt>>,
    pub span: Span,
}

/// A module-level global. `init` is a little-endian byte image;
/// zero-initialized when absent.
#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: TypeId,
    pub init: Option<Vec<u8>>,
    pub constant: bool,
    pub span: Span,
}

/// The typed program handed to the compiler core. Owns the type arena and
/// the function/global tables; passed by reference into every compilation
/// entry point so nothing in the core depends on ambient state.
#[derive(Debug, Default)]
pub struct Program {
    types: Vec<TypeDef>,
    functions: Vec<Function>,
    globals: Vec<Global>,
}

impl Program {
    /// An empty program. The unit type is pre-seeded at index zero.
    pub fn new() -> Self {
        Program {
            types: vec![TypeDef::Unit],
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn add_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(def);
        id
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    /// The pre-seeded unit type.
    pub fn unit(&self) -> TypeId {
        TypeId(0)
    }

    pub fn int(&mut self, width: u32, signed: bool) -> TypeId {
        self.add_type(TypeDef::Primitive {
            kind: PrimKind::Integer,
            width,
            signed,
        })
    }

    pub fn float(&mut self, width: u32) -> TypeId {
        self.add_type(TypeDef::Primitive {
            kind: PrimKind::Float,
            width,
            signed: true,
        })
    }

    pub fn logical(&mut self) -> TypeId {
        self.add_type(TypeDef::Primitive {
            kind: PrimKind::Logical,
            width: 1,
            signed: false,
        })
    }

    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.add_type(TypeDef::Pointer {
            pointee,
            address_space: 0,
        })
    }

    /// A pointer in a non-default address space.
    pub fn pointer_in_space(&mut self, pointee: TypeId, address_space: u32) -> TypeId {
        self.add_type(TypeDef::Pointer {
            pointee,
            address_space,
        })
    }

    pub fn array_of(&mut self, element: TypeId, len: u64) -> TypeId {
        self.add_type(TypeDef::Array { element, len })
    }

    pub fn vector_of(&mut self, element: TypeId, lanes: u32) -> TypeId {
        self.add_type(TypeDef::Vector { element, lanes })
    }

    /// A plain struct: every field is its own storage group.
    pub fn struct_type(
        &mut self,
        name: Option<String>,
        members: Vec<(String, TypeId)>,
    ) -> TypeId {
        let fields = members
            .into_iter()
            .enumerate()
            .map(|(i, (name, ty))| Field {
                name,
                ty,
                allocation: i as u32,
                in_union: false,
            })
            .collect();
        self.add_type(TypeDef::Struct {
            name,
            fields,
            defined: true,
        })
    }

    /// A struct with explicit storage groups (anonymous unions).
    pub fn struct_type_with_fields(
        &mut self,
        name: Option<String>,
        fields: Vec<Field>,
    ) -> TypeId {
        self.add_type(TypeDef::Struct {
            name,
            fields,
            defined: true,
        })
    }

    /// A union: every member shares storage group zero.
    pub fn union_type(
        &mut self,
        name: Option<String>,
        members: Vec<(String, TypeId)>,
    ) -> TypeId {
        let fields = members
            .into_iter()
            .map(|(name, ty)| Field {
                name,
                ty,
                allocation: 0,
                in_union: true,
            })
            .collect();
        self.add_type(TypeDef::Union {
            name,
            fields,
            defined: true,
        })
    }

    /// Declares a struct whose fields arrive later through
    /// [`Program::define_fields`]. The returned id may be pointed at
    /// immediately, which is how self-referential types are built.
    pub fn declare_struct(&mut self, name: Option<String>) -> TypeId {
        self.add_type(TypeDef::Struct {
            name,
            fields: Vec::new(),
            defined: false,
        })
    }

    /// Declares a union whose fields arrive later.
    pub fn declare_union(&mut self, name: Option<String>) -> TypeId {
        self.add_type(TypeDef::Union {
            name,
            fields: Vec::new(),
            defined: false,
        })
    }

    /// Supplies the fields of a previously declared struct or union.
    ///
    /// Panics if `id` does not name a struct or union.
    pub fn define_fields(&mut self, id: TypeId, new_fields: Vec<Field>) {
        match &mut self.types[id.0 as usize] {
            TypeDef::Struct { fields, defined, .. }
            | TypeDef::Union { fields, defined, .. } => {
                *fields = new_fields;
                *defined = true;
            }
            other => panic!("define_fields on non-aggregate type {:?}", other),
        }
    }

    pub fn function_type(
        &mut self,
        params: Vec<TypeId>,
        ret: TypeId,
        is_vararg: bool,
    ) -> TypeId {
        self.add_type(TypeDef::Function {
            params,
            ret,
            is_vararg,
        })
    }

    pub fn opaque(&mut self, name: impl Into<String>) -> TypeId {
        self.add_type(TypeDef::Opaque { name: name.into() })
    }

    pub fn add_function(&mut self, func: Function) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(func);
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FuncId(i as u32), f))
    }

    pub fn add_global(&mut self, global: Global) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(global);
        id
    }

    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.0 as usize]
    }
}
