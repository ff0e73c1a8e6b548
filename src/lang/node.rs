use super::value::Kind;

/// Index of an expression inside its owning [`Program`](super::program::Program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub(crate) u32);

/// Index of a statement inside its owning [`Program`](super::program::Program).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub(crate) u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binary operators accepted by the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }

    /// Comparison and logical operators produce a bool regardless of operand kind.
    pub fn yields_bool(self) -> bool {
        !matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
}

/// Expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    // ───────────────────────────── Literals ─────────────────────────────
    Int(i64),
    Float(f64),
    Char(char),
    Bool(bool),
    /// String literal. Only printable; there is no string value at runtime.
    Str(String),

    // ──────────────────────────── References ────────────────────────────
    /// Variable reference, resolved to a local or a global at generation time.
    Var(String),

    // ──────────────────────────── Operators ─────────────────────────────
    Binary {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary {
        op: UnaryOp,
        operand: ExprId,
    },

    /// Function call with arguments evaluated left to right.
    Call { name: String, args: Vec<ExprId> },

    /// Explicit numeric conversion: `int(e)` or `float(e)`.
    Convert { to: Kind, operand: ExprId },
}

/// Typed function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub kind: Kind,
}

impl Param {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Function declaration. Only valid at the top level.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// `Kind::Void` when the function declares no result.
    pub ret: Kind,
    pub body: Vec<StmtId>,
}

/// Statement node.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `var name kind [= init];`
    VarDecl {
        name: String,
        kind: Kind,
        init: Option<ExprId>,
    },

    /// `name = value;`
    Assign { name: String, value: ExprId },

    /// `print expr;`
    Print(ExprId),

    If {
        cond: ExprId,
        then_body: Vec<StmtId>,
        else_body: Option<Vec<StmtId>>,
    },

    While { cond: ExprId, body: Vec<StmtId> },

    Return(Option<ExprId>),

    Break,

    Continue,

    /// Expression evaluated for its side effects, e.g. `f(1);`.
    Expr(ExprId),

    Func(FuncDecl),
}

impl Stmt {
    /// Human-readable node name for diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            Stmt::VarDecl { .. } => "variable declaration",
            Stmt::Assign { .. } => "assignment",
            Stmt::Print(_) => "print",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::Return(_) => "return",
            Stmt::Break => "break",
            Stmt::Continue => "continue",
            Stmt::Expr(_) => "expression statement",
            Stmt::Func(_) => "function declaration",
        }
    }
}
