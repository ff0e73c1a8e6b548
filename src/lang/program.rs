use super::node::{BinOp, Expr, ExprId, FuncDecl, Param, Stmt, StmtId, UnaryOp};
use super::value::Kind;

/// Validated Gox program, as handed over by the front end.
///
/// Nodes live in two arenas owned by the program and refer to each other by
/// index. Ids are assigned at allocation time and are only meaningful for the
/// program that issued them.
#[derive(Debug, Clone, Default)]
pub struct Program {
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    /// Top-level statements in source order.
    pub items: Vec<StmtId>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn alloc_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    pub fn alloc_stmt(&mut self, stmt: Stmt) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(stmt);
        id
    }

    /// Allocate a statement and append it to the top level.
    pub fn push_item(&mut self, stmt: Stmt) -> StmtId {
        let id = self.alloc_stmt(stmt);
        self.items.push(id);
        id
    }

    // ─────────────────────────── Expression helpers ─────────────────────

    pub fn int(&mut self, n: i64) -> ExprId {
        self.alloc_expr(Expr::Int(n))
    }

    pub fn float(&mut self, x: f64) -> ExprId {
        self.alloc_expr(Expr::Float(x))
    }

    pub fn char(&mut self, c: char) -> ExprId {
        self.alloc_expr(Expr::Char(c))
    }

    pub fn bool(&mut self, b: bool) -> ExprId {
        self.alloc_expr(Expr::Bool(b))
    }

    pub fn string(&mut self, s: impl Into<String>) -> ExprId {
        self.alloc_expr(Expr::Str(s.into()))
    }

    pub fn var(&mut self, name: impl Into<String>) -> ExprId {
        self.alloc_expr(Expr::Var(name.into()))
    }

    pub fn binary(&mut self, op: BinOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.alloc_expr(Expr::Binary { op, lhs, rhs })
    }

    pub fn neg(&mut self, operand: ExprId) -> ExprId {
        self.alloc_expr(Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        })
    }

    pub fn call(&mut self, name: impl Into<String>, args: Vec<ExprId>) -> ExprId {
        self.alloc_expr(Expr::Call {
            name: name.into(),
            args,
        })
    }

    pub fn convert(&mut self, to: Kind, operand: ExprId) -> ExprId {
        self.alloc_expr(Expr::Convert { to, operand })
    }

    // ─────────────────────────── Statement helpers ──────────────────────

    pub fn var_decl(&mut self, name: impl Into<String>, kind: Kind, init: Option<ExprId>) -> StmtId {
        self.alloc_stmt(Stmt::VarDecl {
            name: name.into(),
            kind,
            init,
        })
    }

    pub fn assign(&mut self, name: impl Into<String>, value: ExprId) -> StmtId {
        self.alloc_stmt(Stmt::Assign {
            name: name.into(),
            value,
        })
    }

    pub fn print(&mut self, expr: ExprId) -> StmtId {
        self.alloc_stmt(Stmt::Print(expr))
    }

    pub fn if_else(
        &mut self,
        cond: ExprId,
        then_body: Vec<StmtId>,
        else_body: Option<Vec<StmtId>>,
    ) -> StmtId {
        self.alloc_stmt(Stmt::If {
            cond,
            then_body,
            else_body,
        })
    }

    pub fn while_loop(&mut self, cond: ExprId, body: Vec<StmtId>) -> StmtId {
        self.alloc_stmt(Stmt::While { cond, body })
    }

    pub fn ret(&mut self, expr: Option<ExprId>) -> StmtId {
        self.alloc_stmt(Stmt::Return(expr))
    }

    pub fn func(
        &mut self,
        name: impl Into<String>,
        params: Vec<Param>,
        ret: Kind,
        body: Vec<StmtId>,
    ) -> StmtId {
        self.alloc_stmt(Stmt::Func(FuncDecl {
            name: name.into(),
            params,
            ret,
            body,
        }))
    }
}
