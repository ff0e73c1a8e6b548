use std::collections::HashMap;

use crate::bytecode::{IrFunction, IrModule, Op};

/// Print disassembly of a whole module
pub fn print_module(module: &IrModule) {
    print!("{}", disassemble_module(module));
}

/// Return disassembly of a whole module as a String
pub fn disassemble_module(module: &IrModule) -> String {
    let mut output = String::from("=== IR MODULE ===\n\n");

    if !module.globals.is_empty() {
        output.push_str("globals:\n");
        for (name, kind) in &module.globals {
            output.push_str(&format!("  {:<14} {}\n", name, kind));
        }
        output.push('\n');
    }

    for func in &module.functions {
        output.push_str(&disassemble_function(func));
        output.push('\n');
    }

    output
}

/// One function: header box, then the listing
pub fn disassemble_function(func: &IrFunction) -> String {
    let params: Vec<String> = func
        .params
        .iter()
        .zip(func.param_kinds())
        .map(|(name, kind)| format!("{} {}", name, kind))
        .collect();

    let mut output = String::new();
    output.push_str("════════════════════════════════════════\n");
    output.push_str(&format!(" {}({}) {}\n", func.name, params.join(", "), func.ret));
    output.push_str(&format!(
        " {} instructions, {} locals\n",
        func.code.len(),
        func.declared_locals().count()
    ));
    output.push_str("════════════════════════════════════════\n");
    output.push_str(&disassemble_to_string(&func.code));
    output
}

/// Return disassembly of an instruction stream as a String.
///
/// Bodies of `IF`/`ELSE` and `LOOP` are indented one level per nesting depth.
pub fn disassemble_to_string(ops: &[Op]) -> String {
    let mut output = String::new();
    let mut depth: usize = 0;

    for (ip, op) in ops.iter().enumerate() {
        let level = match op {
            Op::Else | Op::EndIf | Op::EndLoop => {
                depth = depth.saturating_sub(1);
                depth
            }
            _ => depth,
        };

        output.push_str(&format!("{:04}  {}", ip, "  ".repeat(level)));
        output.push_str(&format_op_string(op));
        output.push('\n');

        if matches!(op, Op::If | Op::Else | Op::Loop) {
            depth += 1;
        }
    }

    output
}

fn format_op_string(op: &Op) -> String {
    match op {
        Op::ConstI(n) | Op::PushI(n) => format!("{:<11} {}", op.mnemonic(), n),
        Op::ConstF(x) => format!("{:<11} {:?}", op.mnemonic(), x),
        Op::LocalGet(name) | Op::LocalSet(name) | Op::GlobalGet(name) | Op::GlobalSet(name) => {
            format!("{:<11} {}", op.mnemonic(), name)
        }
        Op::Call(name) => format!("{:<11} \"{}\"", op.mnemonic(), name),
        other => other.mnemonic().to_string(),
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Count instructions by mnemonic across every function
pub fn op_counts(module: &IrModule) -> HashMap<&'static str, usize> {
    let mut counts = HashMap::new();
    for func in &module.functions {
        for op in &func.code {
            *counts.entry(op.mnemonic()).or_insert(0) += 1;
        }
    }
    counts
}

/// Print module statistics
pub fn print_stats(module: &IrModule) {
    let total: usize = module.functions.iter().map(|f| f.code.len()).sum();

    println!("=== IR STATISTICS ===\n");
    println!("Functions:    {}", module.functions.len());
    println!("Globals:      {}", module.globals.len());
    println!("Instructions: {}", total);
    println!();

    let counts = op_counts(module);
    let mut counts: Vec<_> = counts.iter().collect();
    counts.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    println!("Op frequency:");
    for (op, count) in counts.iter().take(10) {
        let pct = (**count as f64 / total as f64) * 100.0;
        println!("  {:<14} {:>4} ({:>5.1}%)", op, count, pct);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::value::Kind;

    #[test]
    fn test_nesting_indentation() {
        let ops = vec![
            Op::Loop,
            Op::LocalGet("i".into()),
            Op::CBreak,
            Op::ConstI(1),
            Op::If,
            Op::ConstF(2.0),
            Op::PrintF,
            Op::Else,
            Op::Call("f".into()),
            Op::EndIf,
            Op::EndLoop,
        ];

        let listing = disassemble_to_string(&ops);
        let lines: Vec<&str> = listing.lines().collect();

        assert_eq!(lines[0], "0000  LOOP");
        assert_eq!(lines[1], "0001    LOCAL_GET   i");
        assert_eq!(lines[5], "0005      CONSTF      2.0");
        assert_eq!(lines[7], "0007    ELSE");
        assert_eq!(lines[8], "0008      CALL        \"f\"");
        assert_eq!(lines[9], "0009    ENDIF");
        assert_eq!(lines[10], "0010  ENDLOOP");
    }

    #[test]
    fn test_unbalanced_stream_does_not_panic() {
        let listing = disassemble_to_string(&[Op::EndLoop, Op::EndIf]);
        assert_eq!(listing.lines().count(), 2);
    }

    #[test]
    fn test_function_header() {
        let mut func = IrFunction::new("add", vec![("x".into(), Kind::Int)], Kind::Float);
        func.add_local("t", Kind::Float);
        func.emit(Op::Ret);

        let text = disassemble_function(&func);

        assert!(text.contains(" add(x int) float"));
        assert!(text.contains("1 instructions, 1 locals"));
        assert!(text.contains("0000  RET"));
    }

    #[test]
    fn test_op_counts() {
        let mut module = IrModule::new();
        let mut func = IrFunction::new("main", vec![], Kind::Void);
        func.code = vec![Op::ConstI(1), Op::ConstI(2), Op::AddI, Op::PrintI];
        module.add_function(func);

        let counts = op_counts(&module);

        assert_eq!(counts.get("CONSTI"), Some(&2));
        assert_eq!(counts.get("ADDI"), Some(&1));
        assert_eq!(counts.get("RET"), None);
    }
}
