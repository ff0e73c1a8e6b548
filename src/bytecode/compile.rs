use std::collections::HashMap;

use tracing::{debug, instrument};

use crate::{
    bytecode::{IrFunction, IrModule, Op, compile_error::GenError},
    lang::{
        node::{BinOp, Expr, ExprId, FuncDecl, Stmt, StmtId, UnaryOp},
        program::Program,
        value::Kind,
    },
};

/// Name of the synthesized entry function.
pub const ENTRY: &str = "main";

/// Function that receives the global initializers and top-level statements.
pub const ACTUAL_MAIN: &str = "_actual_main";

#[derive(Debug, Clone, Copy)]
struct Signature {
    arity: usize,
    ret: Kind,
}

/// Per-function lowering state.
struct FnCtx {
    func: IrFunction,
    loop_depth: usize,
}

impl FnCtx {
    fn new(func: IrFunction) -> Self {
        Self {
            func,
            loop_depth: 0,
        }
    }

    fn emit(&mut self, op: Op) {
        self.func.emit(op);
    }
}

/// Tree-walking translator from a validated [`Program`] to an [`IrModule`].
///
/// Module layout: user functions in source order, then `main` (which only
/// calls `_actual_main` and returns), then `_actual_main` holding the global
/// initializers followed by the remaining top-level statements.
#[derive(Default)]
pub struct IrGenerator {
    /// Output module
    module: IrModule,

    /// Every declared function, collected before any body is lowered
    signatures: HashMap<String, Signature>,
}

impl IrGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip_all, fields(items = program.items.len()))]
    pub fn generate(mut self, program: &Program) -> Result<IrModule, GenError> {
        // Signatures and globals first so that bodies can refer to anything
        // declared at the top level, in any order.
        for &id in &program.items {
            match program.stmt(id) {
                Stmt::Func(decl) => self.declare(decl)?,
                Stmt::VarDecl { name, kind, .. } => self.module.add_global(name.clone(), *kind),
                _ => {}
            }
        }

        for &id in &program.items {
            if let Stmt::Func(decl) = program.stmt(id) {
                let func = self.lower_function(program, decl)?;
                self.finish(func);
            }
        }

        let mut main = IrFunction::new(ENTRY, vec![], Kind::Void);
        main.emit(Op::Call(ACTUAL_MAIN.to_string()));
        main.emit(Op::Ret);
        self.finish(main);

        let mut ctx = FnCtx::new(IrFunction::new(ACTUAL_MAIN, vec![], Kind::Void));

        // Global initializers run before any top-level statement.
        for &id in &program.items {
            if let Stmt::VarDecl {
                name,
                init: Some(init),
                ..
            } = program.stmt(id)
            {
                self.lower_expr(program, &mut ctx, *init)?;
                ctx.emit(Op::GlobalSet(name.clone()));
            }
        }

        for &id in &program.items {
            match program.stmt(id) {
                Stmt::Func(_) | Stmt::VarDecl { .. } => {}
                _ => self.lower_stmt(program, &mut ctx, id)?,
            }
        }
        self.finish(ctx.func);

        Ok(self.module)
    }

    fn declare(&mut self, decl: &FuncDecl) -> Result<(), GenError> {
        if decl.name == ENTRY || decl.name == ACTUAL_MAIN {
            return Err(GenError::ReservedName(decl.name.clone()));
        }
        let signature = Signature {
            arity: decl.params.len(),
            ret: decl.ret,
        };
        if self.signatures.insert(decl.name.clone(), signature).is_some() {
            return Err(GenError::DuplicateFunction(decl.name.clone()));
        }
        Ok(())
    }

    fn finish(&mut self, func: IrFunction) {
        debug!(
            function = %func.name,
            params = func.arity(),
            instrs = func.code.len(),
            "emitted function"
        );
        self.module.add_function(func);
    }

    fn lower_function(&self, program: &Program, decl: &FuncDecl) -> Result<IrFunction, GenError> {
        let params = decl
            .params
            .iter()
            .map(|p| (p.name.clone(), p.kind))
            .collect();
        let mut ctx = FnCtx::new(IrFunction::new(decl.name.clone(), params, decl.ret));
        self.lower_block(program, &mut ctx, &decl.body)?;
        Ok(ctx.func)
    }

    // ─── Statements ───────────────────────────────────────────────────

    fn lower_block(
        &self,
        program: &Program,
        ctx: &mut FnCtx,
        body: &[StmtId],
    ) -> Result<(), GenError> {
        for &id in body {
            self.lower_stmt(program, ctx, id)?;
        }
        Ok(())
    }

    fn lower_stmt(&self, program: &Program, ctx: &mut FnCtx, id: StmtId) -> Result<(), GenError> {
        match program.stmt(id) {
            Stmt::VarDecl { name, kind, init } => {
                ctx.func.add_local(name.clone(), *kind);
                if let Some(init) = init {
                    self.lower_expr(program, ctx, *init)?;
                    ctx.emit(Op::LocalSet(name.clone()));
                }
            }

            Stmt::Assign { name, value } => {
                self.lower_expr(program, ctx, *value)?;
                let op = store(ctx, name);
                ctx.emit(op);
            }

            Stmt::Print(expr) => self.lower_print(program, ctx, *expr)?,

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                self.lower_expr(program, ctx, *cond)?;
                ctx.emit(Op::If);
                self.lower_block(program, ctx, then_body)?;
                if let Some(else_body) = else_body {
                    ctx.emit(Op::Else);
                    self.lower_block(program, ctx, else_body)?;
                }
                ctx.emit(Op::EndIf);
            }

            Stmt::While { cond, body } => {
                ctx.emit(Op::Loop);
                self.lower_expr(program, ctx, *cond)?;
                ctx.emit(Op::CBreak);
                ctx.loop_depth += 1;
                self.lower_block(program, ctx, body)?;
                ctx.loop_depth -= 1;
                ctx.emit(Op::EndLoop);
            }

            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.lower_expr(program, ctx, *value)?;
                }
                ctx.emit(Op::Ret);
            }

            Stmt::Break => {
                if ctx.loop_depth == 0 {
                    return Err(GenError::break_outside_loop());
                }
                ctx.emit(Op::ConstI(0));
                ctx.emit(Op::CBreak);
            }

            Stmt::Continue => {
                if ctx.loop_depth == 0 {
                    return Err(GenError::continue_outside_loop());
                }
                ctx.emit(Op::Continue);
            }

            // Every expression leaves exactly one value behind.
            Stmt::Expr(expr) => {
                self.lower_expr(program, ctx, *expr)?;
                ctx.emit(Op::Drop);
            }

            Stmt::Func(decl) => return Err(GenError::func_in_body(&decl.name)),
        }

        Ok(())
    }

    /// `print` is the only place string literals may appear.
    fn lower_print(&self, program: &Program, ctx: &mut FnCtx, expr: ExprId) -> Result<(), GenError> {
        match program.expr(expr) {
            Expr::Str(text) => {
                for c in text.chars() {
                    ctx.emit(Op::PushI(c as i64));
                    ctx.emit(Op::PrintB);
                }
            }
            Expr::Binary {
                op: BinOp::Add,
                lhs,
                rhs,
            } if is_string(program, expr) => {
                self.lower_print(program, ctx, *lhs)?;
                self.lower_print(program, ctx, *rhs)?;
            }
            _ => {
                let kind = self.kind_of(program, ctx, expr);
                self.lower_expr(program, ctx, expr)?;
                ctx.emit(match kind {
                    Kind::Float => Op::PrintF,
                    Kind::Char => Op::PrintB,
                    _ => Op::PrintI,
                });
            }
        }
        Ok(())
    }

    // ─── Expressions ──────────────────────────────────────────────────

    fn lower_expr(&self, program: &Program, ctx: &mut FnCtx, id: ExprId) -> Result<(), GenError> {
        match program.expr(id) {
            Expr::Int(n) => ctx.emit(Op::ConstI(*n)),
            Expr::Float(x) => ctx.emit(Op::ConstF(*x)),
            Expr::Char(c) => ctx.emit(Op::ConstI(*c as i64)),
            Expr::Bool(b) => ctx.emit(Op::ConstI(*b as i64)),
            Expr::Str(_) => return Err(GenError::StringNotPrintable),

            Expr::Var(name) => {
                let op = if ctx.func.has_local(name) {
                    Op::LocalGet(name.clone())
                } else {
                    Op::GlobalGet(name.clone())
                };
                ctx.emit(op);
            }

            Expr::Binary { op, lhs, rhs } => {
                if is_string(program, id) {
                    return Err(GenError::StringNotPrintable);
                }
                let float = self.kind_of(program, ctx, *lhs).is_float()
                    || self.kind_of(program, ctx, *rhs).is_float();
                let opcode = binary_opcode(*op, float).ok_or(GenError::UnsupportedOperator {
                    op: *op,
                    kind: if float { Kind::Float } else { Kind::Int },
                })?;
                self.lower_expr(program, ctx, *lhs)?;
                self.lower_expr(program, ctx, *rhs)?;
                ctx.emit(opcode);
            }

            Expr::Unary {
                op: UnaryOp::Neg,
                operand,
            } => {
                let float = self.kind_of(program, ctx, *operand).is_float();
                self.lower_expr(program, ctx, *operand)?;
                if float {
                    ctx.emit(Op::ConstF(-1.0));
                    ctx.emit(Op::MulF);
                } else {
                    ctx.emit(Op::ConstI(-1));
                    ctx.emit(Op::MulI);
                }
            }

            Expr::Call { name, args } => {
                let signature = self
                    .signatures
                    .get(name)
                    .ok_or_else(|| GenError::UnknownFunction(name.clone()))?;
                if signature.arity != args.len() {
                    return Err(GenError::ArityMismatch {
                        name: name.clone(),
                        expected: signature.arity,
                        found: args.len(),
                    });
                }
                for &arg in args {
                    self.lower_expr(program, ctx, arg)?;
                }
                ctx.emit(Op::Call(name.clone()));
            }

            Expr::Convert { to, operand } => {
                let from = self.kind_of(program, ctx, *operand);
                self.lower_expr(program, ctx, *operand)?;
                match (from.is_float(), to.is_float()) {
                    (false, true) => ctx.emit(Op::ItoF),
                    (true, false) => ctx.emit(Op::FtoI),
                    _ => {}
                }
            }
        }

        Ok(())
    }

    /// Static kind of an expression, used to pick opcode families.
    fn kind_of(&self, program: &Program, ctx: &FnCtx, id: ExprId) -> Kind {
        match program.expr(id) {
            Expr::Int(_) | Expr::Str(_) => Kind::Int,
            Expr::Float(_) => Kind::Float,
            Expr::Char(_) => Kind::Char,
            Expr::Bool(_) => Kind::Bool,
            Expr::Var(name) => ctx
                .func
                .locals
                .get(name)
                .or_else(|| self.module.globals.get(name))
                .copied()
                .unwrap_or(Kind::Int),
            Expr::Binary { op, lhs, rhs } => {
                if op.yields_bool() {
                    Kind::Bool
                } else if self.kind_of(program, ctx, *lhs).is_float()
                    || self.kind_of(program, ctx, *rhs).is_float()
                {
                    Kind::Float
                } else {
                    Kind::Int
                }
            }
            Expr::Unary { operand, .. } => match self.kind_of(program, ctx, *operand) {
                Kind::Float => Kind::Float,
                _ => Kind::Int,
            },
            Expr::Call { name, .. } => match self.signatures.get(name) {
                Some(Signature {
                    ret: Kind::Void, ..
                })
                | None => Kind::Int,
                Some(signature) => signature.ret,
            },
            Expr::Convert { to, .. } => *to,
        }
    }
}

fn store(ctx: &FnCtx, name: &str) -> Op {
    if ctx.func.has_local(name) {
        Op::LocalSet(name.to_string())
    } else {
        Op::GlobalSet(name.to_string())
    }
}

/// A string literal, or a `+` chain with a string literal somewhere in it.
fn is_string(program: &Program, id: ExprId) -> bool {
    match program.expr(id) {
        Expr::Str(_) => true,
        Expr::Binary {
            op: BinOp::Add,
            lhs,
            rhs,
        } => is_string(program, *lhs) || is_string(program, *rhs),
        _ => false,
    }
}

/// Operator to opcode table. `None` means the pair has no IR instruction.
fn binary_opcode(op: BinOp, float: bool) -> Option<Op> {
    let opcode = match (op, float) {
        (BinOp::Add, false) => Op::AddI,
        (BinOp::Sub, false) => Op::SubI,
        (BinOp::Mul, false) => Op::MulI,
        (BinOp::Div, false) => Op::DivI,
        (BinOp::Mod, false) => Op::ModI,
        (BinOp::Lt, false) => Op::LtI,
        (BinOp::Le, false) => Op::LeI,
        (BinOp::Gt, false) => Op::GtI,
        (BinOp::Ge, false) => Op::GeI,
        (BinOp::Eq, false) => Op::EqI,
        (BinOp::Ne, false) => Op::NeI,
        (BinOp::And, false) => Op::AndI,
        (BinOp::Or, false) => Op::OrI,

        (BinOp::Add, true) => Op::AddF,
        (BinOp::Sub, true) => Op::SubF,
        (BinOp::Mul, true) => Op::MulF,
        (BinOp::Div, true) => Op::DivF,
        (BinOp::Lt, true) => Op::LtF,
        (BinOp::Le, true) => Op::LeF,
        (BinOp::Gt, true) => Op::GtF,
        (BinOp::Ge, true) => Op::GeF,
        (BinOp::Eq, true) => Op::EqF,
        (BinOp::Ne, true) => Op::NeF,

        (BinOp::Mod | BinOp::And | BinOp::Or, true) => return None,
    };
    Some(opcode)
}
