use std::collections::{BTreeMap, HashMap};
use std::io::{self, Stdout, Write};
use std::rc::Rc;

use tracing::{debug, instrument, trace};

use crate::bytecode::stack_check::check_module;
use crate::bytecode::{IrFunction, IrModule, Op};
use crate::lang::value::Value;
use crate::runtime::config::VmConfig;
use crate::runtime::frame::CallFrame;
use crate::runtime::memory::Memory;
use crate::runtime::runtime_error::{MachineSnapshot, RuntimeError, VmError};

/// Float comparisons treat values closer than this as equal.
pub const FLOAT_EPSILON: f64 = 1e-9;

const SNAPSHOT_STACK: usize = 10;
const SNAPSHOT_GLOBALS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Ready,
    Running,
    Halted,
    Failed,
}

/// Control state of one activation, alongside its frame.
struct Activation {
    code: Rc<IrFunction>,
    ip: usize,
    frame: CallFrame,
    /// Index of each open `LOOP`, innermost last.
    loops: Vec<usize>,
    /// Operand stack height when the activation started.
    base: usize,
}

/// Stack machine for the Gox IR.
///
/// Calls do not recurse on the host stack: a single dispatch loop runs the
/// innermost activation and CALL/RET push and pop activations.
pub struct StackMachine<W: Write = Stdout> {
    functions: HashMap<String, Rc<IrFunction>>,
    stack: Vec<Value>,
    activations: Vec<Activation>,
    globals: BTreeMap<String, Value>,
    memory: Memory,
    out: W,
    state: MachineState,
    // Safety limits
    config: VmConfig,
    steps: usize,
}

impl StackMachine<Stdout> {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self::with_output(config, io::stdout())
    }
}

impl Default for StackMachine<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> StackMachine<W> {
    pub fn with_output(config: VmConfig, out: W) -> Self {
        Self {
            functions: HashMap::new(),
            stack: Vec::new(),
            activations: Vec::new(),
            globals: BTreeMap::new(),
            memory: Memory::new(config.initial_memory),
            out,
            state: MachineState::Ready,
            config,
            steps: 0,
        }
    }

    /// Install a module, replacing any previously loaded functions.
    #[instrument(level = "debug", skip_all, fields(functions = module.functions.len()))]
    pub fn load(&mut self, module: IrModule) -> Result<(), VmError> {
        if self.config.verify {
            check_module(&module)?;
        }
        self.functions = module
            .functions
            .into_iter()
            .map(|func| (func.name.clone(), Rc::new(func)))
            .collect();
        self.state = MachineState::Ready;
        Ok(())
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn globals(&self) -> &BTreeMap<String, Value> {
        &self.globals
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run `entry` to completion and return its result.
    #[instrument(skip(self))]
    pub fn run(&mut self, entry: &str) -> Result<Value, RuntimeError> {
        self.stack.clear();
        self.activations.clear();
        self.steps = 0;

        let Some(code) = self.functions.get(entry).cloned() else {
            self.state = MachineState::Failed;
            return Err(VmError::UnknownFunction(entry.to_string()).into());
        };
        self.activations.push(Activation {
            code,
            ip: 0,
            frame: CallFrame::new(entry, None),
            loops: Vec::new(),
            base: 0,
        });
        self.state = MachineState::Running;

        loop {
            match self.step() {
                Ok(None) => {}
                Ok(Some(value)) => {
                    self.state = MachineState::Halted;
                    debug!(%value, steps = self.steps, "halted");
                    return Ok(value);
                }
                Err(kind) => {
                    self.state = MachineState::Failed;
                    return Err(self.fail(kind));
                }
            }
        }
    }

    fn fail(&self, kind: VmError) -> RuntimeError {
        let current = self.activations.last();
        let start = self.stack.len().saturating_sub(SNAPSHOT_STACK);

        RuntimeError {
            kind,
            call_stack: self
                .activations
                .iter()
                .map(|a| a.frame.function.clone())
                .collect(),
            snapshot: MachineSnapshot {
                ip: current.map(|a| a.ip.saturating_sub(1)).unwrap_or(0),
                function: current.map(|a| a.frame.function.clone()),
                stack_top: self.stack[start..].to_vec(),
                stack_depth: self.stack.len(),
                globals: self
                    .globals
                    .iter()
                    .take(SNAPSHOT_GLOBALS)
                    .map(|(name, value)| (name.clone(), *value))
                    .collect(),
            },
        }
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), VmError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(VmError::LimitExceeded(format!("step ({})", max)));
            }
        }

        if self.stack.len() > self.config.max_stack_size {
            return Err(VmError::LimitExceeded(format!(
                "stack size ({})",
                self.config.max_stack_size
            )));
        }

        Ok(())
    }

    fn current(&mut self) -> Result<&mut Activation, VmError> {
        self.activations
            .last_mut()
            .ok_or_else(|| VmError::StructuralMismatch("no active frame".to_string()))
    }

    /// Execute one instruction. `Some` carries the result once the
    /// outermost activation returns.
    fn step(&mut self) -> Result<Option<Value>, VmError> {
        self.check_limits()?;

        let act = self.current()?;
        let code = Rc::clone(&act.code);
        let ip = act.ip;
        let Some(op) = code.code.get(ip) else {
            // Running off the end returns like a bare RET.
            return self.return_from_current();
        };
        act.ip += 1;

        trace!(function = %code.name, ip, op = op.mnemonic(), depth = self.stack.len());

        match op {
            // Literals
            Op::ConstI(n) | Op::PushI(n) => self.push(Value::Int(*n)),
            Op::ConstF(x) => self.push(Value::Float(*x)),

            // Integer arithmetic
            Op::AddI => self.int_binop(|a, b| Ok(a.wrapping_add(b)))?,
            Op::SubI => self.int_binop(|a, b| Ok(a.wrapping_sub(b)))?,
            Op::MulI => self.int_binop(|a, b| Ok(a.wrapping_mul(b)))?,
            Op::DivI => self.int_binop(floor_div)?,
            Op::ModI => self.int_binop(floor_mod)?,

            // Float arithmetic
            Op::AddF => self.float_binop(|a, b| a + b)?,
            Op::SubF => self.float_binop(|a, b| a - b)?,
            Op::MulF => self.float_binop(|a, b| a * b)?,
            Op::DivF => {
                let b = self.pop()?.as_f64();
                let a = self.pop()?.as_f64();
                if b == 0.0 {
                    return Err(VmError::DivisionByZero);
                }
                self.push(Value::Float(a / b));
            }

            // Integer comparison
            Op::EqI => self.int_binop(|a, b| Ok((a == b) as i64))?,
            Op::NeI => self.int_binop(|a, b| Ok((a != b) as i64))?,
            Op::LtI => self.int_binop(|a, b| Ok((a < b) as i64))?,
            Op::LeI => self.int_binop(|a, b| Ok((a <= b) as i64))?,
            Op::GtI => self.int_binop(|a, b| Ok((a > b) as i64))?,
            Op::GeI => self.int_binop(|a, b| Ok((a >= b) as i64))?,

            // Float comparison
            Op::EqF => self.float_cmp(|a, b| (a - b).abs() < FLOAT_EPSILON)?,
            Op::NeF => self.float_cmp(|a, b| (a - b).abs() >= FLOAT_EPSILON)?,
            Op::LtF => self.float_cmp(|a, b| a < b)?,
            Op::LeF => self.float_cmp(|a, b| a <= b)?,
            Op::GtF => self.float_cmp(|a, b| a > b)?,
            Op::GeF => self.float_cmp(|a, b| a >= b)?,

            // Logic
            Op::AndI => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::from(a.is_truthy() && b.is_truthy()));
            }
            Op::OrI => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::from(a.is_truthy() || b.is_truthy()));
            }

            // Conversion
            Op::ItoF => {
                let v = self.pop()?;
                self.push(Value::Float(v.as_f64()));
            }
            Op::FtoI => {
                let v = self.pop()?;
                self.push(Value::Int(v.as_i64()));
            }

            // Memory
            Op::PeekI => {
                let address = self.pop_int()?;
                let v = self.memory.read_i32(address)?;
                self.push(Value::Int(v as i64));
            }
            Op::PokeI => {
                let v = self.pop()?;
                let address = self.pop_int()?;
                let n = i32::try_from(v.as_i64()).map_err(|_| VmError::ValueOutOfRange {
                    value: v,
                    target: "i32",
                })?;
                self.memory.write_i32(address, n)?;
            }
            Op::PeekF => {
                let address = self.pop_int()?;
                let v = self.memory.read_f32(address)?;
                self.push(Value::Float(v as f64));
            }
            Op::PokeF => {
                let v = self.pop()?;
                let address = self.pop_int()?;
                let x = v.as_f64();
                let narrowed = x as f32;
                if x.is_finite() && !narrowed.is_finite() {
                    return Err(VmError::ValueOutOfRange {
                        value: v,
                        target: "f32",
                    });
                }
                self.memory.write_f32(address, narrowed)?;
            }
            Op::PeekB => {
                let address = self.pop_int()?;
                let v = self.memory.read_u8(address)?;
                self.push(Value::Int(v as i64));
            }
            Op::PokeB => {
                let v = self.pop()?;
                let address = self.pop_int()?;
                self.memory.write_u8(address, (v.as_i64() & 0xFF) as u8)?;
            }
            Op::Grow => {
                let requested = self.pop_int()?;
                let size = usize::try_from(requested).unwrap_or(0);
                if size > self.config.max_memory {
                    return Err(VmError::LimitExceeded(format!(
                        "memory ({} bytes)",
                        self.config.max_memory
                    )));
                }
                self.memory.grow(size);
            }

            // Variables
            Op::LocalGet(name) => {
                let v = self.current()?.frame.get_local(name);
                self.push(v);
            }
            Op::LocalSet(name) => {
                let v = self.pop()?;
                self.current()?.frame.set_local(name.clone(), v);
            }
            Op::GlobalGet(name) => {
                let v = self.globals.get(name).copied().unwrap_or_default();
                self.push(v);
            }
            Op::GlobalSet(name) => {
                let v = self.pop()?;
                self.globals.insert(name.clone(), v);
            }

            // Calls
            Op::Call(name) => self.call(name, ip)?,
            Op::Ret => return self.return_from_current(),

            // Structural control flow
            Op::If => {
                if !self.pop()?.is_truthy() {
                    let act = self.current()?;
                    act.ip = skip_branch(&code.code, ip + 1, true)
                        .ok_or_else(|| unmatched("IF", "ENDIF"))?;
                }
            }
            Op::Else => {
                let act = self.current()?;
                act.ip = skip_branch(&code.code, ip + 1, false)
                    .ok_or_else(|| unmatched("ELSE", "ENDIF"))?;
            }
            Op::EndIf => {}
            Op::Loop => self.current()?.loops.push(ip),
            Op::CBreak => {
                let cond = self.pop()?;
                let act = self.current()?;
                if act.loops.is_empty() {
                    return Err(VmError::StructuralMismatch(
                        "CBREAK outside of a LOOP".to_string(),
                    ));
                }
                if !cond.is_truthy() {
                    act.loops.pop();
                    act.ip = skip_loop(&code.code, ip + 1)
                        .ok_or_else(|| unmatched("LOOP", "ENDLOOP"))?;
                }
            }
            Op::EndLoop | Op::Continue => {
                let act = self.current()?;
                let start = act.loops.last().copied().ok_or_else(|| {
                    VmError::StructuralMismatch(format!("{} without a matching LOOP", op.mnemonic()))
                })?;
                act.ip = start + 1;
            }

            // Stack
            Op::Drop => {
                self.pop()?;
            }

            // I/O
            Op::PrintI => {
                let v = self.pop()?;
                writeln!(self.out, "{}", v.as_i64())?;
                self.out.flush()?;
            }
            Op::PrintF => {
                let v = self.pop()?;
                writeln!(self.out, "{}", Value::Float(v.as_f64()))?;
                self.out.flush()?;
            }
            Op::PrintB => {
                let v = self.pop()?;
                let c = u32::try_from(v.as_i64())
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or(VmError::ValueOutOfRange {
                        value: v,
                        target: "a character",
                    })?;
                write!(self.out, "{}", c)?;
                self.out.flush()?;
            }
        }

        Ok(None)
    }

    fn call(&mut self, name: &str, ip: usize) -> Result<(), VmError> {
        let callee = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| VmError::UnknownFunction(name.to_string()))?;

        if self.activations.len() >= self.config.max_call_depth {
            return Err(VmError::LimitExceeded(format!(
                "call depth ({})",
                self.config.max_call_depth
            )));
        }

        let arity = callee.arity();
        if self.stack.len() < arity {
            return Err(VmError::StackUnderflow);
        }
        // Arguments were pushed left to right; split_off keeps that order.
        let args = self.stack.split_off(self.stack.len() - arity);

        let mut frame = CallFrame::new(name, Some(ip + 1));
        for (param, value) in callee.params.iter().zip(args) {
            frame.set_local(param.clone(), value);
        }

        debug!(function = name, depth = self.activations.len() + 1, "call");

        self.activations.push(Activation {
            code: callee,
            ip: 0,
            frame,
            loops: Vec::new(),
            base: self.stack.len(),
        });
        Ok(())
    }

    /// Pop the current activation. Its result is the top value if it pushed
    /// one, else integer zero; anything else it left behind is discarded.
    fn return_from_current(&mut self) -> Result<Option<Value>, VmError> {
        let act = self
            .activations
            .pop()
            .ok_or_else(|| VmError::StructuralMismatch("RET with no active frame".to_string()))?;

        let value = if self.stack.len() > act.base {
            self.stack.pop().unwrap_or_default()
        } else {
            Value::default()
        };
        self.stack.truncate(act.base);

        debug!(function = %act.frame.function, %value, "return");

        match self.activations.last_mut() {
            None => Ok(Some(value)),
            Some(caller) => {
                if let Some(address) = act.frame.return_address {
                    caller.ip = address;
                }
                self.push(value);
                Ok(None)
            }
        }
    }

    // Stack helpers

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i64, VmError> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            other => Err(VmError::TypeMismatch {
                expected: "int",
                found: other.type_name(),
            }),
        }
    }

    fn int_binop(&mut self, f: impl FnOnce(i64, i64) -> Result<i64, VmError>) -> Result<(), VmError> {
        let b = self.pop_int()?;
        let a = self.pop_int()?;
        let result = f(a, b)?;
        self.push(Value::Int(result));
        Ok(())
    }

    fn float_binop(&mut self, f: impl FnOnce(f64, f64) -> f64) -> Result<(), VmError> {
        let b = self.pop()?.as_f64();
        let a = self.pop()?.as_f64();
        self.push(Value::Float(f(a, b)));
        Ok(())
    }

    fn float_cmp(&mut self, f: impl FnOnce(f64, f64) -> bool) -> Result<(), VmError> {
        let b = self.pop()?.as_f64();
        let a = self.pop()?.as_f64();
        self.push(Value::from(f(a, b)));
        Ok(())
    }
}

/// Integer division rounding toward negative infinity.
pub fn floor_div(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

/// Remainder with the sign of the divisor.
pub fn floor_mod(a: i64, b: i64) -> Result<i64, VmError> {
    if b == 0 {
        return Err(VmError::DivisionByZero);
    }
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        Ok(r + b)
    } else {
        Ok(r)
    }
}

fn unmatched(open: &str, close: &str) -> VmError {
    VmError::StructuralMismatch(format!("{} without a matching {}", open, close))
}

/// Position just past the matching `ENDIF` (or, with `stop_at_else`, the
/// matching `ELSE`), scanning from `from` at nesting depth 1.
fn skip_branch(code: &[Op], from: usize, stop_at_else: bool) -> Option<usize> {
    let mut depth = 1usize;
    for (i, op) in code.iter().enumerate().skip(from) {
        match op {
            Op::If => depth += 1,
            Op::EndIf => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            Op::Else if stop_at_else && depth == 1 => return Some(i + 1),
            _ => {}
        }
    }
    None
}

/// Position just past the `ENDLOOP` closing the loop open at `from`.
fn skip_loop(code: &[Op], from: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (i, op) in code.iter().enumerate().skip(from) {
        match op {
            Op::Loop => depth += 1,
            Op::EndLoop => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::value::Kind;

    // =========================================================================
    // Test helpers
    // =========================================================================

    fn module_from_ops(ops: Vec<Op>) -> IrModule {
        module_with_functions(ops, vec![])
    }

    fn module_with_functions(ops: Vec<Op>, functions: Vec<IrFunction>) -> IrModule {
        let mut module = IrModule::new();
        let mut main = IrFunction::new("main", vec![], Kind::Void);
        main.code = ops;
        module.add_function(main);
        for func in functions {
            module.add_function(func);
        }
        module
    }

    fn function(name: &str, params: &[&str], ops: Vec<Op>) -> IrFunction {
        let params = params.iter().map(|p| (p.to_string(), Kind::Int)).collect();
        let mut func = IrFunction::new(name, params, Kind::Int);
        func.code = ops;
        func
    }

    fn unverified() -> VmConfig {
        VmConfig {
            verify: false,
            ..VmConfig::default()
        }
    }

    fn machine(config: VmConfig) -> StackMachine<Vec<u8>> {
        StackMachine::with_output(config, Vec::new())
    }

    /// Run ops as `main` without the load-time check and return its result
    /// (the top value left when the stream runs out).
    fn run_ops(ops: Vec<Op>) -> Result<Value, RuntimeError> {
        run_module(module_from_ops(ops)).map(|(value, _)| value)
    }

    fn run_module(module: IrModule) -> Result<(Value, String), RuntimeError> {
        let mut vm = machine(unverified());
        vm.load(module)?;
        let value = vm.run("main")?;
        let output = String::from_utf8(vm.into_output()).unwrap();
        Ok((value, output))
    }

    fn output_of(ops: Vec<Op>) -> String {
        run_module(module_from_ops(ops))
            .expect("execution should succeed")
            .1
    }

    /// Assert the value left on top of the stack when `main` ends
    fn assert_result(ops: Vec<Op>, expected: Value) {
        let value = run_ops(ops).expect("execution should succeed");
        assert_eq!(value, expected, "result mismatch");
    }

    /// Assert execution produces an error containing the given substring
    fn assert_error(ops: Vec<Op>, error_contains: &str) {
        match run_ops(ops) {
            Ok(value) => panic!(
                "expected error containing '{}', got result: {:?}",
                error_contains, value
            ),
            Err(e) => assert!(
                e.to_string().contains(error_contains),
                "expected error containing '{}', got: {}",
                error_contains,
                e
            ),
        }
    }

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    // =========================================================================
    // Arithmetic
    // =========================================================================

    #[test]
    fn test_add_integers() {
        assert_result(vec![Op::ConstI(2), Op::ConstI(3), Op::AddI], int(5));
    }

    #[test]
    fn test_sub_pops_right_operand_first() {
        assert_result(vec![Op::ConstI(10), Op::ConstI(4), Op::SubI], int(6));
    }

    #[test]
    fn test_div_floors_toward_negative_infinity() {
        assert_result(vec![Op::ConstI(7), Op::ConstI(2), Op::DivI], int(3));
        assert_result(vec![Op::ConstI(-7), Op::ConstI(2), Op::DivI], int(-4));
        assert_result(vec![Op::ConstI(7), Op::ConstI(-2), Op::DivI], int(-4));
        assert_result(vec![Op::ConstI(-7), Op::ConstI(-2), Op::DivI], int(3));
    }

    #[test]
    fn test_mod_takes_divisor_sign() {
        assert_result(vec![Op::ConstI(-7), Op::ConstI(3), Op::ModI], int(2));
        assert_result(vec![Op::ConstI(7), Op::ConstI(-3), Op::ModI], int(-2));
    }

    #[test]
    fn test_div_by_zero() {
        assert_error(vec![Op::ConstI(1), Op::ConstI(0), Op::DivI], "division by zero");
        assert_error(vec![Op::ConstF(1.0), Op::ConstF(0.0), Op::DivF], "division by zero");
        assert_error(vec![Op::ConstI(1), Op::ConstI(0), Op::ModI], "division by zero");
    }

    #[test]
    fn test_integer_op_rejects_float() {
        assert_error(vec![Op::ConstF(1.0), Op::ConstI(1), Op::AddI], "type mismatch");
    }

    #[test]
    fn test_float_ops_coerce_ints() {
        assert_result(
            vec![Op::ConstI(1), Op::ConstF(0.5), Op::AddF],
            Value::Float(1.5),
        );
    }

    #[test]
    fn test_float_equality_uses_epsilon() {
        assert_result(
            vec![Op::ConstF(0.1 + 0.2), Op::ConstF(0.3), Op::EqF],
            int(1),
        );
        assert_result(vec![Op::ConstF(0.1), Op::ConstF(0.2), Op::NeF], int(1));
        assert_result(vec![Op::ConstF(1.0), Op::ConstF(2.0), Op::GeF], int(0));
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_result(vec![Op::ConstI(1), Op::ConstI(2), Op::LtI], int(1));
        assert_result(vec![Op::ConstI(2), Op::ConstI(2), Op::NeI], int(0));
        assert_result(vec![Op::ConstI(5), Op::ConstI(0), Op::AndI], int(0));
        assert_result(vec![Op::ConstI(0), Op::ConstI(5), Op::OrI], int(1));
    }

    #[test]
    fn test_conversions() {
        assert_result(vec![Op::ConstI(3), Op::ItoF], Value::Float(3.0));
        assert_result(vec![Op::ConstF(-2.7), Op::FtoI], int(-2));
    }

    #[test]
    fn test_stack_underflow() {
        assert_error(vec![Op::ConstI(1), Op::AddI], "stack underflow");
    }

    // =========================================================================
    // Memory
    // =========================================================================

    #[test]
    fn test_poke_then_peek() {
        assert_result(
            vec![
                Op::ConstI(8),
                Op::ConstI(-123),
                Op::PokeI,
                Op::ConstI(8),
                Op::PeekI,
            ],
            int(-123),
        );
        assert_result(
            vec![
                Op::ConstI(0),
                Op::ConstF(2.5),
                Op::PokeF,
                Op::ConstI(0),
                Op::PeekF,
            ],
            Value::Float(2.5),
        );
        assert_result(
            vec![
                Op::ConstI(1),
                Op::ConstI(0x1FF),
                Op::PokeB,
                Op::ConstI(1),
                Op::PeekB,
            ],
            int(0xFF),
        );
    }

    #[test]
    fn test_poke_rejects_values_that_do_not_fit() {
        assert_error(
            vec![Op::ConstI(0), Op::ConstI((1 << 32) + 5), Op::PokeI],
            "value 4294967301 does not fit in i32",
        );
        assert_error(
            vec![Op::ConstI(0), Op::ConstI(i32::MIN as i64 - 1), Op::PokeI],
            "does not fit in i32",
        );
        assert_error(
            vec![Op::ConstI(0), Op::ConstF(1e300), Op::PokeF],
            "does not fit in f32",
        );
        assert_result(
            vec![
                Op::ConstI(0),
                Op::ConstI(i32::MAX as i64),
                Op::PokeI,
                Op::ConstI(0),
                Op::PeekI,
            ],
            int(i32::MAX as i64),
        );
    }

    #[test]
    fn test_peek_out_of_bounds_fails() {
        let mut vm = machine(unverified());
        vm.load(module_from_ops(vec![Op::ConstI(4096), Op::PeekI]))
            .unwrap();

        let err = vm.run("main").unwrap_err();

        assert!(matches!(
            err.kind,
            VmError::MemoryOutOfBounds { address: 4096, .. }
        ));
        assert_eq!(vm.state(), MachineState::Failed);
        assert_eq!(err.ip(), 1);
    }

    #[test]
    fn test_grow_extends_memory() {
        let mut vm = machine(unverified());
        vm.load(module_from_ops(vec![
            Op::ConstI(8192),
            Op::Grow,
            Op::ConstI(8000),
            Op::PeekI,
        ]))
        .unwrap();

        assert_eq!(vm.run("main").unwrap(), int(0));
        assert_eq!(vm.memory().size(), 8192);
    }

    #[test]
    fn test_grow_beyond_limit() {
        assert_error(vec![Op::ConstI(1 << 40), Op::Grow], "memory");
    }

    // =========================================================================
    // Variables
    // =========================================================================

    #[test]
    fn test_unset_local_reads_zero() {
        assert_result(vec![Op::LocalGet("x".into())], int(0));
    }

    #[test]
    fn test_globals_persist() {
        let mut vm = machine(unverified());
        vm.load(module_from_ops(vec![Op::ConstI(7), Op::GlobalSet("g".into())]))
            .unwrap();
        vm.run("main").unwrap();

        assert_eq!(vm.globals().get("g"), Some(&int(7)));
    }

    // =========================================================================
    // Control flow
    // =========================================================================

    #[test]
    fn test_if_else() {
        let branch = |cond| {
            vec![
                Op::ConstI(cond),
                Op::If,
                Op::ConstI(10),
                Op::Else,
                Op::ConstI(20),
                Op::EndIf,
            ]
        };
        assert_result(branch(1), int(10));
        assert_result(branch(0), int(20));
    }

    #[test]
    fn test_false_if_skips_nested_loop() {
        let ops = vec![
            Op::ConstI(0),
            Op::If,
            Op::Loop,
            Op::ConstI(1),
            Op::CBreak,
            Op::ConstI(99),
            Op::PrintI,
            Op::EndLoop,
            Op::EndIf,
            Op::ConstI(5),
        ];
        assert_result(ops, int(5));
    }

    #[test]
    fn test_loop_counts() {
        // i = 0; while (i < 3) { print i; i = i + 1; }
        let ops = vec![
            Op::Loop,
            Op::LocalGet("i".into()),
            Op::ConstI(3),
            Op::LtI,
            Op::CBreak,
            Op::LocalGet("i".into()),
            Op::PrintI,
            Op::LocalGet("i".into()),
            Op::ConstI(1),
            Op::AddI,
            Op::LocalSet("i".into()),
            Op::EndLoop,
        ];
        assert_eq!(output_of(ops), "0\n1\n2\n");
    }

    #[test]
    fn test_break_from_nested_if() {
        let ops = vec![
            Op::Loop,
            Op::ConstI(1),
            Op::CBreak,
            Op::ConstI(1),
            Op::If,
            Op::ConstI(0),
            Op::CBreak,
            Op::EndIf,
            Op::ConstI(99),
            Op::PrintI,
            Op::EndLoop,
            Op::ConstI(42),
        ];
        assert_result(ops, int(42));
    }

    #[test]
    fn test_continue_skips_rest_of_body() {
        // n counts iterations; body prints only when it reaches the end.
        let ops = vec![
            Op::Loop,
            Op::LocalGet("n".into()),
            Op::ConstI(2),
            Op::LtI,
            Op::CBreak,
            Op::LocalGet("n".into()),
            Op::ConstI(1),
            Op::AddI,
            Op::LocalSet("n".into()),
            Op::Continue,
            Op::ConstI(99),
            Op::PrintI,
            Op::EndLoop,
            Op::LocalGet("n".into()),
        ];
        let (value, output) = run_module(module_from_ops(ops)).unwrap();
        assert_eq!(value, int(2));
        assert_eq!(output, "");
    }

    #[test]
    fn test_endloop_without_loop() {
        assert_error(vec![Op::EndLoop], "ENDLOOP without a matching LOOP");
        assert_error(vec![Op::ConstI(0), Op::CBreak], "CBREAK outside of a LOOP");
    }

    #[test]
    fn test_unclosed_if_is_structural_error() {
        assert_error(vec![Op::ConstI(0), Op::If, Op::ConstI(1)], "malformed control flow");
    }

    // =========================================================================
    // Calls
    // =========================================================================

    #[test]
    fn test_call_binds_params_in_order() {
        let sub = function(
            "sub",
            &["a", "b"],
            vec![
                Op::LocalGet("a".into()),
                Op::LocalGet("b".into()),
                Op::SubI,
                Op::Ret,
            ],
        );
        let module = module_with_functions(
            vec![Op::ConstI(10), Op::ConstI(3), Op::Call("sub".into())],
            vec![sub],
        );

        let (value, _) = run_module(module).unwrap();
        assert_eq!(value, int(7));
    }

    #[test]
    fn test_call_preserves_caller_state() {
        let clobber = function(
            "clobber",
            &["x"],
            vec![Op::ConstI(0), Op::LocalSet("x".into()), Op::ConstI(1), Op::Ret],
        );
        let module = module_with_functions(
            vec![
                Op::ConstI(5),
                Op::LocalSet("x".into()),
                Op::ConstI(100),
                Op::ConstI(9),
                Op::Call("clobber".into()),
                Op::AddI,
                Op::LocalGet("x".into()),
                Op::AddI,
            ],
            vec![clobber],
        );

        let (value, _) = run_module(module).unwrap();
        assert_eq!(value, int(106));
    }

    #[test]
    fn test_bare_ret_returns_zero_and_keeps_caller_operands() {
        let noop = function("noop", &[], vec![Op::Ret]);
        let module = module_with_functions(
            vec![Op::ConstI(4), Op::Call("noop".into()), Op::AddI],
            vec![noop],
        );

        let (value, _) = run_module(module).unwrap();
        assert_eq!(value, int(4));
    }

    #[test]
    fn test_exhausted_stream_returns() {
        let module = module_with_functions(
            vec![Op::Call("empty".into()), Op::ConstI(1), Op::AddI],
            vec![function("empty", &[], vec![])],
        );

        let (value, _) = run_module(module).unwrap();
        assert_eq!(value, int(1));
    }

    #[test]
    fn test_deep_recursion_does_not_overflow_host_stack() {
        // count(n) = n == 0 ? 0 : 1 + count(n - 1)
        let count = function(
            "count",
            &["n"],
            vec![
                Op::LocalGet("n".into()),
                Op::ConstI(0),
                Op::EqI,
                Op::If,
                Op::ConstI(0),
                Op::Ret,
                Op::EndIf,
                Op::ConstI(1),
                Op::LocalGet("n".into()),
                Op::ConstI(1),
                Op::SubI,
                Op::Call("count".into()),
                Op::AddI,
                Op::Ret,
            ],
        );
        let module = module_with_functions(
            vec![Op::ConstI(100_000), Op::Call("count".into())],
            vec![count],
        );

        let (value, _) = run_module(module).unwrap();
        assert_eq!(value, int(100_000));
    }

    #[test]
    fn test_call_depth_limit() {
        let forever = function("forever", &[], vec![Op::Call("forever".into())]);
        let mut vm = machine(VmConfig {
            max_call_depth: 50,
            ..unverified()
        });
        vm.load(module_with_functions(
            vec![Op::Call("forever".into())],
            vec![forever],
        ))
        .unwrap();

        let err = vm.run("main").unwrap_err();

        assert!(err.to_string().contains("call depth (50) limit exceeded"));
        assert_eq!(err.call_stack.len(), 50);
        assert_eq!(err.call_stack[0], "main");
    }

    #[test]
    fn test_unknown_function() {
        assert_error(vec![Op::Call("nowhere".into())], "unknown function 'nowhere'");

        let mut vm = machine(unverified());
        vm.load(module_from_ops(vec![])).unwrap();
        assert!(matches!(
            vm.run("start").unwrap_err().kind,
            VmError::UnknownFunction(_)
        ));
    }

    #[test]
    fn test_step_limit() {
        let mut vm = machine(VmConfig {
            max_steps: Some(100),
            ..unverified()
        });
        vm.load(module_from_ops(vec![Op::Loop, Op::ConstI(1), Op::CBreak, Op::EndLoop]))
            .unwrap();

        let err = vm.run("main").unwrap_err();
        assert!(matches!(err.kind, VmError::LimitExceeded(_)));
    }

    // =========================================================================
    // Output and diagnostics
    // =========================================================================

    #[test]
    fn test_print_formats() {
        let output = output_of(vec![
            Op::ConstI(42),
            Op::PrintI,
            Op::ConstF(3.0),
            Op::PrintF,
            Op::PushI('h' as i64),
            Op::PrintB,
            Op::PushI('i' as i64),
            Op::PrintB,
        ]);
        assert_eq!(output, "42\n3.0\nhi");
    }

    #[test]
    fn test_printb_rejects_invalid_code_point() {
        assert_error(vec![Op::ConstI(-1), Op::PrintB], "does not fit in a character");
        assert_error(vec![Op::ConstI(0xD800), Op::PrintB], "does not fit in a character");
    }

    #[test]
    fn test_snapshot_is_bounded() {
        let mut ops: Vec<Op> = (0..12).map(Op::ConstI).collect();
        for i in 0..6 {
            ops.push(Op::ConstI(i));
            ops.push(Op::GlobalSet(format!("g{}", i)));
        }
        ops.push(Op::ConstI(0));
        ops.push(Op::ConstI(0));
        ops.push(Op::DivI);

        let err = run_ops(ops).unwrap_err();

        assert_eq!(err.snapshot.stack_depth, 12);
        assert_eq!(err.snapshot.stack_top.len(), 10);
        assert_eq!(err.snapshot.stack_top[9], int(11));
        assert_eq!(err.snapshot.globals.len(), 5);
        assert_eq!(err.snapshot.globals[0].0, "g0");
        assert_eq!(err.function(), Some("main"));
    }

    #[test]
    fn test_verify_on_load() {
        let mut vm = machine(VmConfig::default());
        let err = vm.load(module_from_ops(vec![Op::AddI])).unwrap_err();
        assert!(matches!(err, VmError::Verify(_)));
    }
}
